//! Device descriptors for Android install resolution.
//!
//! [`DeviceAttributes`] is what the caller knows about a device (raw strings
//! from a user agent or device check-in). [`DeviceSpec`] is the bundletool
//! device-spec JSON shape built from it. Fields that fail to parse are
//! omitted, never defaulted: bundletool treats an absent field as "no
//! constraint", while a zero would actively mis-target the set.

use serde::{Deserialize, Serialize};

/// Raw device attributes supplied by the caller.
///
/// All fields are optional strings; mapping into a [`DeviceSpec`] decides
/// what is usable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAttributes {
    /// OS version string, expected to be an integer SDK level (e.g. `"33"`).
    pub os_version: Option<String>,
    /// Primary ABI (e.g. `"arm64-v8a"`).
    pub abi: Option<String>,
    /// Device locale (e.g. `"en-US"`).
    pub locale: Option<String>,
    /// Screen density in dpi, as a string (e.g. `"420"`).
    pub screen_density: Option<String>,
}

/// The device-spec JSON consumed by bundletool's `build-apks`/`extract-apks`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSpec {
    /// Integer SDK level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdk_version: Option<u32>,
    /// ABIs the device supports, most preferred first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported_abis: Option<Vec<String>>,
    /// Locales the device supports.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported_locales: Option<Vec<String>>,
    /// Screen density in dpi.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screen_density: Option<u32>,
}

impl DeviceSpec {
    /// Build a spec from raw attributes, omitting anything unparseable.
    ///
    /// Single ABI/locale values are wrapped into one-element lists; the OS
    /// version and density must parse as integers to be included.
    pub fn from_attributes(attrs: &DeviceAttributes) -> Self {
        Self {
            sdk_version: attrs
                .os_version
                .as_deref()
                .and_then(|v| v.trim().parse().ok()),
            supported_abis: attrs
                .abi
                .as_deref()
                .filter(|abi| !abi.is_empty())
                .map(|abi| vec![abi.to_string()]),
            supported_locales: attrs
                .locale
                .as_deref()
                .filter(|locale| !locale.is_empty())
                .map(|locale| vec![locale.to_string()]),
            screen_density: attrs
                .screen_density
                .as_deref()
                .and_then(|d| d.trim().parse().ok()),
        }
    }

    /// True when no attribute survived the mapping.
    pub fn is_empty(&self) -> bool {
        self.sdk_version.is_none()
            && self.supported_abis.is_none()
            && self.supported_locales.is_none()
            && self.screen_density.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_version_parses_to_sdk_level() {
        let attrs = DeviceAttributes {
            os_version: Some("33".to_string()),
            ..DeviceAttributes::default()
        };
        let spec = DeviceSpec::from_attributes(&attrs);
        assert_eq!(spec.sdk_version, Some(33));
    }

    #[test]
    fn test_single_abi_wrapped_into_list() {
        let attrs = DeviceAttributes {
            abi: Some("arm64-v8a".to_string()),
            ..DeviceAttributes::default()
        };
        let spec = DeviceSpec::from_attributes(&attrs);
        assert_eq!(spec.supported_abis, Some(vec!["arm64-v8a".to_string()]));
    }

    #[test]
    fn test_non_numeric_density_omitted_not_defaulted() {
        let attrs = DeviceAttributes {
            screen_density: Some("xxhdpi".to_string()),
            ..DeviceAttributes::default()
        };
        let spec = DeviceSpec::from_attributes(&attrs);
        assert_eq!(spec.screen_density, None);
    }

    #[test]
    fn test_non_numeric_os_version_omitted() {
        let attrs = DeviceAttributes {
            os_version: Some("13.2.1".to_string()),
            ..DeviceAttributes::default()
        };
        let spec = DeviceSpec::from_attributes(&attrs);
        assert_eq!(spec.sdk_version, None);
        assert!(spec.is_empty());
    }

    #[test]
    fn test_spec_json_omits_absent_fields() {
        let attrs = DeviceAttributes {
            os_version: Some("34".to_string()),
            abi: Some("x86_64".to_string()),
            ..DeviceAttributes::default()
        };
        let json = serde_json::to_string(&DeviceSpec::from_attributes(&attrs)).unwrap();
        assert!(json.contains("\"sdkVersion\":34"));
        assert!(json.contains("\"supportedAbis\":[\"x86_64\"]"));
        assert!(!json.contains("screenDensity"));
        assert!(!json.contains("supportedLocales"));
    }
}
