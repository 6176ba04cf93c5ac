//! Mobile build ingestion and resolution engine.
//!
//! Parses iOS `.ipa` and Android `.apk` artifacts into typed metadata
//! (identity, targets, entitlements, icons) and resolves device-specific
//! Android install sets. Archive reads are bounded, plists are depth
//! capped, and external tools run under a timeout; every failure maps to
//! one variant of [`ExtractError`].

use std::path::Path;

use hangar_schema::BuildMetadata;

pub mod apk;
pub mod archive;
pub mod error;
pub mod ipa;
pub mod plist;
pub mod png;
pub mod resolver;
pub mod tool;

pub use error::ExtractError;

/// Extract build metadata from an artifact, dispatching on file extension.
///
/// `.ipa` files are parsed in-process; `.apk` files additionally require a
/// manifest decompiler discoverable via [`apk::DECOMPILER_ENV`] or `PATH`.
///
/// # Errors
///
/// Returns [`ExtractError::UnsupportedFile`] for unrecognized extensions,
/// or the extractor's own error for recognized ones.
pub fn extract(path: &Path) -> Result<BuildMetadata, ExtractError> {
    let extension = path
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or_default()
        .to_ascii_lowercase();
    match extension.as_str() {
        "ipa" => Ok(BuildMetadata::Ios(ipa::extract_ipa(path)?)),
        "apk" => Ok(BuildMetadata::Android(
            apk::ApkExtractor::from_env()?.extract(path)?,
        )),
        _ => Err(ExtractError::UnsupportedFile(
            path.display().to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrecognized_extension_is_unsupported() {
        let err = extract(Path::new("build.exe")).unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFile(_)));
        assert!(err.is_deterministic());
    }

    #[test]
    fn test_extension_matching_is_case_insensitive() {
        // Uppercase .IPA dispatches to the iOS extractor, which then fails
        // on the missing file rather than on the extension.
        let err = extract(Path::new("/nonexistent/Build.IPA")).unwrap_err();
        assert!(matches!(err, ExtractError::Io(_)));
    }
}
