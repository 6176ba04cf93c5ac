//! Resolution request and result types for Android install sets.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::device::DeviceAttributes;

/// Where the artifact bytes live, from the storage collaborator's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// A path on the local filesystem.
    Local,
    /// An object-store key; resolution for these is deferred to the
    /// storage collaborator.
    Remote,
}

/// One resolution request, built by the caller per device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallRequest {
    /// Opaque build identifier, echoed back in the result.
    pub build_id: String,
    /// Storage backing of `storage_path`.
    pub storage_kind: StorageKind,
    /// Path (or key) of the artifact.
    pub storage_path: PathBuf,
    /// Attributes of the target device.
    pub device: DeviceAttributes,
}

/// Terminal status of one resolution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallStatus {
    /// A device-specific APK set was produced and fits the size cap.
    Resolved,
    /// The resolved set exceeds the maximum total size; no file list is
    /// returned because the caller cannot safely stream a partial set.
    ApkSetTooLarge,
    /// Resolution is not supported for this request (see `reason`).
    ResolverNotImplemented,
}

/// One file of a resolved APK set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallFile {
    /// Filesystem path of the `.apk`.
    pub path: PathBuf,
    /// File size in bytes.
    pub size_bytes: u64,
}

/// Outcome of resolving an installable APK set for one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedInstallSet {
    /// Build identifier from the request.
    pub build_id: String,
    /// Terminal status of the resolution.
    pub status: InstallStatus,
    /// Files of the set; present only when `status` is `resolved`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<InstallFile>>,
    /// Total size of the set in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    /// The enforced size cap; present only when the set was too large.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_bytes: Option<u64>,
    /// Why resolution was not attempted; present only on
    /// `resolver-not-implemented`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ResolvedInstallSet {
    /// A successfully resolved set.
    pub fn resolved(build_id: String, files: Vec<InstallFile>, total_bytes: u64) -> Self {
        Self {
            build_id,
            status: InstallStatus::Resolved,
            files: Some(files),
            total_bytes: Some(total_bytes),
            max_bytes: None,
            reason: None,
        }
    }

    /// A set that exceeded the size cap. Carries the limit and the observed
    /// total, but deliberately no file list.
    pub fn too_large(build_id: String, total_bytes: u64, max_bytes: u64) -> Self {
        Self {
            build_id,
            status: InstallStatus::ApkSetTooLarge,
            files: None,
            total_bytes: Some(total_bytes),
            max_bytes: Some(max_bytes),
            reason: None,
        }
    }

    /// Resolution declined for this request.
    pub fn not_implemented(build_id: String, reason: &str) -> Self {
        Self {
            build_id,
            status: InstallStatus::ResolverNotImplemented,
            files: None,
            total_bytes: None,
            max_bytes: None,
            reason: Some(reason.to_string()),
        }
    }
}
