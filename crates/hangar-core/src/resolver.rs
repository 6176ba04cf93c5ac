//! Device-specific APK set resolution via bundletool.
//!
//! Android App Bundles (`.aab`) and universal APK sets (`.apks`) ship more
//! splits than any one device needs. Resolution narrows an artifact down
//! to the exact files a given device installs: build a device spec from
//! the reported attributes, let bundletool pick the matching splits, and
//! enforce a total-size cap before handing the file list back.
//!
//! The caller owns the output directory; intermediates live in a scratch
//! tempdir that is dropped when resolution finishes.

use std::path::Path;

use tracing::{debug, info};
use walkdir::WalkDir;

use hangar_schema::{DeviceSpec, InstallFile, InstallRequest, ResolvedInstallSet, StorageKind};

use crate::error::ExtractError;
use crate::tool::ExternalTool;

/// Env var that overrides bundletool discovery on `PATH`.
pub const BUNDLETOOL_ENV: &str = "HANGAR_BUNDLETOOL";

const BUNDLETOOL_NAME: &str = "bundletool";

/// Maximum total size of a resolved install set.
pub const MAX_APK_SET_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// Directory walk depth cap when collecting extracted APKs.
const MAX_WALK_DEPTH: usize = 16;

/// Resolves device-specific install sets from Android artifacts.
#[derive(Debug, Clone)]
pub struct AndroidDeviceResolver {
    bundletool: ExternalTool,
    max_set_bytes: u64,
}

impl AndroidDeviceResolver {
    /// Use an explicit bundletool invocation.
    pub fn new(bundletool: ExternalTool) -> Self {
        Self {
            bundletool,
            max_set_bytes: MAX_APK_SET_BYTES,
        }
    }

    /// Locate bundletool from [`BUNDLETOOL_ENV`] or `PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::ExternalTool`] when bundletool cannot be
    /// found.
    pub fn from_env() -> Result<Self, ExtractError> {
        Ok(Self::new(ExternalTool::resolve(
            BUNDLETOOL_NAME,
            BUNDLETOOL_ENV,
        )?))
    }

    #[cfg(test)]
    fn with_max_set_bytes(mut self, max: u64) -> Self {
        self.max_set_bytes = max;
        self
    }

    /// Resolve the install set for one request, extracting the device's
    /// APKs into `output_dir`.
    ///
    /// Plain `.apk` artifacts resolve to themselves without invoking
    /// bundletool. `.aab` artifacts are first built into an APK set,
    /// `.apks` artifacts skip straight to extraction. Remote storage is
    /// reported as `resolver-not-implemented` rather than an error so the
    /// caller can surface it per request.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::ExternalTool`] when bundletool fails and
    /// [`ExtractError::Io`] on scratch or output directory failures. An
    /// oversized set is a status, not an error.
    pub fn resolve(
        &self,
        request: &InstallRequest,
        output_dir: &Path,
    ) -> Result<ResolvedInstallSet, ExtractError> {
        if request.storage_kind != StorageKind::Local {
            return Ok(ResolvedInstallSet::not_implemented(
                request.build_id.clone(),
                "only local storage paths are supported",
            ));
        }

        let extension = request
            .storage_path
            .extension()
            .and_then(std::ffi::OsStr::to_str)
            .unwrap_or_default()
            .to_ascii_lowercase();

        // A single APK is already device-agnostic; resolve it as-is.
        if extension == "apk" {
            let size = std::fs::metadata(&request.storage_path)?.len();
            return Ok(self.finish(
                request,
                vec![InstallFile {
                    path: request.storage_path.clone(),
                    size_bytes: size,
                }],
            ));
        }

        let spec = DeviceSpec::from_attributes(&request.device);
        let scratch = tempfile::tempdir().map_err(ExtractError::Io)?;
        let spec_path = scratch.path().join("device-spec.json");
        let spec_json = serde_json::to_vec(&spec).map_err(std::io::Error::other)?;
        std::fs::write(&spec_path, spec_json)?;
        debug!(build_id = %request.build_id, ?spec, "wrote device spec");

        let apks_path = if extension == "apks" {
            request.storage_path.clone()
        } else {
            let built = scratch.path().join("set.apks");
            self.bundletool.run([
                "build-apks".to_string(),
                format!("--bundle={}", request.storage_path.display()),
                format!("--output={}", built.display()),
                format!("--device-spec={}", spec_path.display()),
                "--overwrite".to_string(),
            ])?;
            built
        };

        std::fs::create_dir_all(output_dir)?;
        self.bundletool.run([
            "extract-apks".to_string(),
            format!("--apks={}", apks_path.display()),
            format!("--device-spec={}", spec_path.display()),
            format!("--output-dir={}", output_dir.display()),
            "--overwrite".to_string(),
        ])?;

        let files = collect_apks(output_dir)?;
        Ok(self.finish(request, files))
    }

    /// Apply the size cap and build the terminal result.
    fn finish(&self, request: &InstallRequest, files: Vec<InstallFile>) -> ResolvedInstallSet {
        let total: u64 = files.iter().map(|file| file.size_bytes).sum();
        if total > self.max_set_bytes {
            info!(
                build_id = %request.build_id,
                total, max = self.max_set_bytes,
                "resolved set exceeds size cap"
            );
            return ResolvedInstallSet::too_large(request.build_id.clone(), total, self.max_set_bytes);
        }
        info!(
            build_id = %request.build_id,
            files = files.len(),
            total, "resolved install set"
        );
        ResolvedInstallSet::resolved(request.build_id.clone(), files, total)
    }
}

/// Collect `.apk` files under `dir`, sorted by path for determinism.
///
/// Any walk or metadata failure fails the whole collection: a file whose
/// size cannot be read would silently undercount the total checked
/// against the size cap.
fn collect_apks(dir: &Path) -> Result<Vec<InstallFile>, ExtractError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).max_depth(MAX_WALK_DEPTH) {
        let entry = entry.map_err(walk_error)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(std::ffi::OsStr::to_str) != Some("apk") {
            continue;
        }
        let size = entry.metadata().map_err(walk_error)?.len();
        files.push(InstallFile {
            path: path.to_path_buf(),
            size_bytes: size,
        });
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn walk_error(err: walkdir::Error) -> ExtractError {
    ExtractError::Io(err.into_io_error().unwrap_or_else(|| {
        std::io::Error::other("walk aborted on a symlink loop")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hangar_schema::{DeviceAttributes, InstallStatus};
    use std::path::PathBuf;

    fn device() -> DeviceAttributes {
        DeviceAttributes {
            os_version: Some("33".to_string()),
            abi: Some("arm64-v8a".to_string()),
            locale: Some("en-US".to_string()),
            screen_density: Some("440".to_string()),
        }
    }

    fn request(path: PathBuf) -> InstallRequest {
        InstallRequest {
            build_id: "build-1".to_string(),
            storage_kind: StorageKind::Local,
            storage_path: path,
            device: device(),
        }
    }

    fn stub_resolver() -> AndroidDeviceResolver {
        AndroidDeviceResolver::new(ExternalTool::new(
            "bundletool",
            PathBuf::from("/nonexistent/bundletool"),
        ))
    }

    #[test]
    fn test_plain_apk_resolves_to_itself() {
        let dir = tempfile::tempdir().unwrap();
        let apk = dir.path().join("app.apk");
        std::fs::write(&apk, b"apk-bytes").unwrap();

        let result = stub_resolver()
            .resolve(&request(apk.clone()), dir.path())
            .unwrap();
        assert_eq!(result.status, InstallStatus::Resolved);
        let files = result.files.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, apk);
        assert_eq!(result.total_bytes, Some(9));
    }

    #[test]
    fn test_oversized_apk_is_too_large_status() {
        let dir = tempfile::tempdir().unwrap();
        let apk = dir.path().join("big.apk");
        std::fs::write(&apk, b"0123456789").unwrap();

        let result = stub_resolver()
            .with_max_set_bytes(4)
            .resolve(&request(apk), dir.path())
            .unwrap();
        assert_eq!(result.status, InstallStatus::ApkSetTooLarge);
        assert!(result.files.is_none());
        assert_eq!(result.total_bytes, Some(10));
        assert_eq!(result.max_bytes, Some(4));
    }

    #[test]
    fn test_remote_storage_is_not_implemented() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(PathBuf::from("bucket/key.aab"));
        req.storage_kind = StorageKind::Remote;

        let result = stub_resolver().resolve(&req, dir.path()).unwrap();
        assert_eq!(result.status, InstallStatus::ResolverNotImplemented);
        assert!(result.reason.is_some());
    }

    #[test]
    fn test_collect_apks_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("splits")).unwrap();
        std::fs::write(dir.path().join("splits/base-b.apk"), b"bb").unwrap();
        std::fs::write(dir.path().join("splits/base-a.apk"), b"a").unwrap();
        std::fs::write(dir.path().join("toc.pb"), b"not an apk").unwrap();

        let files = collect_apks(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["base-a.apk", "base-b.apk"]);
        assert_eq!(files[0].size_bytes, 1);
    }

    #[test]
    fn test_collect_apks_propagates_walk_errors() {
        let missing = Path::new("/nonexistent/hangar-resolver-walk");
        let result = collect_apks(missing);
        assert!(matches!(result, Err(ExtractError::Io(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_apks_artifact_skips_build_step() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");

        // Stub bundletool: fails on build-apks, succeeds on extract-apks by
        // dropping one split into the output dir.
        let script = dir.path().join("bundletool.sh");
        std::fs::write(
            &script,
            r#"#!/bin/sh
case "$1" in
  extract-apks)
    outdir=""
    for arg in "$@"; do
      case "$arg" in --output-dir=*) outdir="${arg#--output-dir=}" ;; esac
    done
    printf split > "$outdir/base-master.apk"
    ;;
  *) echo "unexpected subcommand $1" >&2; exit 1 ;;
esac
"#,
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let apks = dir.path().join("universal.apks");
        std::fs::write(&apks, b"zip-ish").unwrap();

        let resolver = AndroidDeviceResolver::new(ExternalTool::new("bundletool", script));
        let result = resolver.resolve(&request(apks), &out).unwrap();

        assert_eq!(result.status, InstallStatus::Resolved);
        let files = result.files.unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].path.ends_with("base-master.apk"));
        assert_eq!(result.total_bytes, Some(5));
    }
}
