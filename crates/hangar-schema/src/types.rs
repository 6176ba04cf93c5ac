//! Build metadata produced by the extraction engine.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Metadata extracted from one uploaded build artifact.
///
/// Tagged by platform so callers can persist a single column and still
/// round-trip the variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "lowercase")]
pub enum BuildMetadata {
    /// An iOS `.ipa` archive.
    Ios(IosBuild),
    /// An Android `.apk` package.
    Android(AndroidBuild),
}

impl BuildMetadata {
    /// Human-readable application name, independent of platform.
    pub fn app_name(&self) -> &str {
        match self {
            BuildMetadata::Ios(build) => &build.app_name,
            BuildMetadata::Android(build) => &build.app_name,
        }
    }

    /// Bundle identifier (iOS) or package name (Android).
    pub fn identifier(&self) -> &str {
        match self {
            BuildMetadata::Ios(build) => &build.identifier,
            BuildMetadata::Android(build) => &build.package_name,
        }
    }
}

/// Metadata for an iOS build, assembled from every `.app`/`.appex` bundle
/// found under `Payload/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IosBuild {
    /// Display name of the main application bundle.
    pub app_name: String,
    /// `CFBundleIdentifier` of the main application bundle.
    pub identifier: String,
    /// Marketing version (`CFBundleShortVersionString`), when present.
    pub version: Option<String>,
    /// Build number (`CFBundleVersion`), when present.
    pub build_number: Option<String>,
    /// One entry per bundle: the main app plus any embedded extensions.
    pub targets: Vec<TargetInfo>,
    /// Entitlements and distribution classification for the main bundle.
    pub entitlements: EntitlementsResult,
}

/// Metadata for a single iOS target (the main `.app` or an embedded `.appex`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    /// Display name (`CFBundleDisplayName`, falling back to `CFBundleName`).
    pub name: String,
    /// `CFBundleIdentifier` of this bundle.
    pub bundle_id: String,
    /// Marketing version of this bundle, when present.
    pub version: Option<String>,
    /// Build number of this bundle, when present.
    pub build: Option<String>,
    /// Archive path prefix of the bundle root (e.g. `Payload/My.app/`).
    pub root: String,
    /// Whether this is the main app or an embedded extension.
    pub role: TargetRole,
    /// Device families this bundle declares support for.
    pub supported_devices: BTreeSet<DeviceFamily>,
    /// Declared interface orientations (phone and tablet variants merged).
    pub orientations: Vec<String>,
    /// Recovered primary icon, when one could be decoded.
    pub icon: Option<IconAsset>,
}

/// Role of an iOS target within the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetRole {
    /// The `.app` bundle directly under `Payload/`.
    Main,
    /// A nested `.appex` extension bundle.
    Extension,
}

/// Device family declared in `UIDeviceFamily`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceFamily {
    /// `UIDeviceFamily` value 1.
    Iphone,
    /// `UIDeviceFamily` value 2.
    Ipad,
}

/// Metadata for an Android build, assembled from the decompiled manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AndroidBuild {
    /// Resolved application label (falls back to the artifact file name).
    pub app_name: String,
    /// `package` attribute of the manifest element.
    pub package_name: String,
    /// Version name, when declared.
    pub version_name: Option<String>,
    /// Version code, when declared.
    pub version_code: Option<String>,
    /// The raw decompiled manifest tree, for callers that need more fields.
    pub manifest: serde_json::Value,
    /// Names collected from `uses-permission` elements.
    pub permissions: Vec<String>,
    /// Recovered launcher icon, when one could be decoded.
    pub icon: Option<IconAsset>,
}

/// A recovered application icon, normalized to a standards-compliant PNG.
///
/// Invariant: `bytes` never contain a `CgBI` chunk, and `width`/`height`
/// always match the PNG's own IHDR.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IconAsset {
    /// Standard PNG bytes. Skipped during serialization; callers that need
    /// the pixels write them out-of-band.
    #[serde(skip)]
    pub bytes: Vec<u8>,
    /// Pixel width from the IHDR chunk.
    pub width: u32,
    /// Pixel height from the IHDR chunk.
    pub height: u32,
    /// Archive entry name the icon was extracted from.
    pub source_path: String,
}

/// Entitlements and distribution classification for an iOS build.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementsResult {
    /// Resolved entitlement key/value grants.
    pub entitlements: serde_json::Map<String, serde_json::Value>,
    /// Provenance tag naming where the entitlements came from
    /// (a sidecar entry name, or `<profile-entry>:Entitlements`).
    pub entitlements_source: String,
    /// Distribution classification derived from the provisioning profile.
    pub distribution: Distribution,
}

impl EntitlementsResult {
    /// Result for an archive with no provisioning profile at all.
    pub fn unprovisioned() -> Self {
        Self {
            entitlements: serde_json::Map::new(),
            entitlements_source: String::new(),
            distribution: Distribution {
                kind: DistributionKind::None,
                team_name: None,
                provisioned_device_count: None,
            },
        }
    }
}

/// How the build was provisioned for distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Distribution {
    /// Distribution channel classification.
    pub kind: DistributionKind,
    /// `TeamName` from the provisioning profile, when present.
    pub team_name: Option<String>,
    /// Number of `ProvisionedDevices`, for ad-hoc profiles.
    pub provisioned_device_count: Option<usize>,
}

/// Distribution channel derived from the embedded provisioning profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionKind {
    /// No provisioning profile present in the archive.
    None,
    /// Team/App Store distribution (neither device list nor all-devices flag).
    Appstore,
    /// `ProvisionedDevices` lists specific device identifiers.
    Adhoc,
    /// `ProvisionsAllDevices` is true (in-house/enterprise profile).
    Enterprise,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_metadata_platform_tag() {
        let build = BuildMetadata::Android(AndroidBuild {
            app_name: "Demo".to_string(),
            package_name: "com.example.demo".to_string(),
            version_name: Some("1.2.3".to_string()),
            version_code: Some("42".to_string()),
            manifest: serde_json::json!({}),
            permissions: vec![],
            icon: None,
        });

        let json = serde_json::to_value(&build).unwrap();
        assert_eq!(json["platform"], "android");
        assert_eq!(json["packageName"], "com.example.demo");
        assert_eq!(build.identifier(), "com.example.demo");
    }

    #[test]
    fn test_distribution_kind_wire_names() {
        let kinds = [
            (DistributionKind::None, "\"none\""),
            (DistributionKind::Appstore, "\"appstore\""),
            (DistributionKind::Adhoc, "\"adhoc\""),
            (DistributionKind::Enterprise, "\"enterprise\""),
        ];
        for (kind, expected) in kinds {
            assert_eq!(serde_json::to_string(&kind).unwrap(), expected);
        }
    }

    #[test]
    fn test_icon_bytes_not_serialized() {
        let icon = IconAsset {
            bytes: vec![1, 2, 3],
            width: 64,
            height: 64,
            source_path: "Payload/My.app/AppIcon60x60@2x.png".to_string(),
        };
        let json = serde_json::to_value(&icon).unwrap();
        assert!(json.get("bytes").is_none());
        assert_eq!(json["width"], 64);
    }
}
