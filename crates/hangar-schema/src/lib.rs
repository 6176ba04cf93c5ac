//! Shared data model for the hangar build ingestion and resolution engine.
//!
//! This crate holds the types exchanged between the extraction engine
//! (`hangar-core`) and its callers: build metadata for iOS and Android
//! artifacts, entitlement/distribution classification, recovered icons,
//! device specifications, and resolved install sets. Every value here is
//! created fresh per extraction or resolution call and carries no shared
//! state.

pub mod device;
pub mod install;
pub mod types;

pub use device::{DeviceAttributes, DeviceSpec};
pub use install::{InstallFile, InstallRequest, InstallStatus, ResolvedInstallSet, StorageKind};
pub use types::{
    AndroidBuild, BuildMetadata, DeviceFamily, Distribution, DistributionKind, EntitlementsResult,
    IconAsset, IosBuild, TargetInfo, TargetRole,
};
