//! Android build extraction via an external manifest decompiler.
//!
//! An APK stores `AndroidManifest.xml` in Android's binary XML encoding,
//! so extraction shells out to a decompiler that writes two JSON files
//! into a scratch directory: `AndroidManifest.json`, an element tree of
//! `{"tag", "attributes", "children"}` objects, and `strings.json`, a
//! flat map from string-resource name to value. Everything after that is
//! plain JSON walking plus icon recovery from the archive itself.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

use hangar_schema::{AndroidBuild, IconAsset};

use crate::archive::{ArchiveEntry, ArchiveReader};
use crate::error::ExtractError;
use crate::png;
use crate::tool::ExternalTool;

/// Env var that overrides decompiler discovery on `PATH`.
pub const DECOMPILER_ENV: &str = "HANGAR_DECOMPILER";

const DECOMPILER_NAME: &str = "decompile";

/// Extracts Android build metadata by decompiling the binary manifest.
#[derive(Debug, Clone)]
pub struct ApkExtractor {
    decompiler: ExternalTool,
}

impl ApkExtractor {
    /// Use an explicit decompiler tool.
    pub fn new(decompiler: ExternalTool) -> Self {
        Self { decompiler }
    }

    /// Locate the decompiler from [`DECOMPILER_ENV`] or `PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::ExternalTool`] when no decompiler can be
    /// found.
    pub fn from_env() -> Result<Self, ExtractError> {
        Ok(Self::new(ExternalTool::resolve(
            DECOMPILER_NAME,
            DECOMPILER_ENV,
        )?))
    }

    /// Extract metadata from an `.apk` file on disk.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::InvalidArchive`] when the file is not a
    /// readable ZIP, [`ExtractError::ExternalTool`] when the decompiler
    /// fails or produces no usable manifest, and
    /// [`ExtractError::InvalidAppContent`] when the manifest lacks a
    /// `package` attribute.
    pub fn extract(&self, path: &Path) -> Result<AndroidBuild, ExtractError> {
        // Validate the archive up front; a truncated upload should fail as
        // an archive problem, not as a decompiler crash.
        let mut archive = ArchiveReader::open_path(path)?;
        let entries = archive.entries()?;

        let scratch = tempfile::tempdir().map_err(ExtractError::Io)?;
        self.decompiler
            .run([path.as_os_str(), "--output".as_ref(), scratch.path().as_os_str()])?;

        let manifest = self.read_manifest(scratch.path())?;
        let strings = self.read_strings(scratch.path());

        let package_name = attr(&manifest, "package")
            .ok_or_else(|| {
                ExtractError::InvalidAppContent(
                    "decompiled manifest has no package attribute".to_string(),
                )
            })?
            .to_string();
        let application = find_child(&manifest, "application");

        let app_name = application
            .and_then(|app| resolve_label(app, &strings))
            .unwrap_or_else(|| fallback_label(path));
        let icon = application
            .and_then(|app| attr(app, "icon"))
            .and_then(|icon| resolve_icon(&mut archive, &entries, icon));

        debug!(package = %package_name, "extracted android manifest");
        Ok(AndroidBuild {
            app_name,
            package_name,
            version_name: version_attr(&manifest, "versionName"),
            version_code: version_attr(&manifest, "versionCode"),
            permissions: collect_permissions(&manifest),
            manifest,
            icon,
        })
    }

    fn read_manifest(&self, scratch: &Path) -> Result<Value, ExtractError> {
        let path = scratch.join("AndroidManifest.json");
        let data = std::fs::read(&path).map_err(|err| ExtractError::ExternalTool {
            tool: self.decompiler.name().to_string(),
            reason: format!("produced no AndroidManifest.json: {err}"),
        })?;
        serde_json::from_slice(&data).map_err(|err| ExtractError::ExternalTool {
            tool: self.decompiler.name().to_string(),
            reason: format!("unparseable AndroidManifest.json: {err}"),
        })
    }

    /// String resources are best-effort: a missing or broken table only
    /// degrades label resolution.
    fn read_strings(&self, scratch: &Path) -> HashMap<String, String> {
        let path = scratch.join("strings.json");
        match std::fs::read(&path).map(|data| serde_json::from_slice(&data)) {
            Ok(Ok(strings)) => strings,
            Ok(Err(err)) => {
                warn!(%err, "ignoring unparseable strings.json");
                HashMap::new()
            }
            Err(err) => {
                debug!(%err, "no strings.json in decompiler output");
                HashMap::new()
            }
        }
    }
}

/// Attribute lookup that accepts both namespaced and bare keys, since
/// decompilers differ on whether they keep the `android:` prefix.
fn attr<'a>(element: &'a Value, name: &str) -> Option<&'a str> {
    let attributes = element.get("attributes")?.as_object()?;
    attributes
        .get(name)
        .or_else(|| attributes.get(&format!("android:{name}")))
        .and_then(Value::as_str)
}

fn children(element: &Value) -> &[Value] {
    element
        .get("children")
        .and_then(Value::as_array)
        .map_or(&[], Vec::as_slice)
}

fn find_child<'a>(element: &'a Value, tag: &str) -> Option<&'a Value> {
    children(element)
        .iter()
        .find(|child| child.get("tag").and_then(Value::as_str) == Some(tag))
}

/// `@string/app_name` -> `app_name`; non-references return `None`.
fn resource_name(value: &str) -> Option<&str> {
    value.strip_prefix('@')?.split_once('/').map(|(_, name)| name)
}

/// Resolve the application label: a literal stays as-is, a resource
/// reference goes through the string table.
fn resolve_label(application: &Value, strings: &HashMap<String, String>) -> Option<String> {
    let label = attr(application, "label")?;
    match resource_name(label) {
        Some(name) => strings.get(name).cloned(),
        None => Some(label.to_string()),
    }
}

fn fallback_label(path: &Path) -> String {
    path.file_stem()
        .map_or_else(|| "unknown".to_string(), |stem| stem.to_string_lossy().into_owned())
}

fn version_attr(manifest: &Value, name: &str) -> Option<String> {
    attr(manifest, name)
        .or_else(|| attr(manifest, &format!("platformBuild{}", capitalize(name))))
        .map(str::to_string)
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().collect::<String>() + chars.as_str()
    })
}

fn collect_permissions(manifest: &Value) -> Vec<String> {
    children(manifest)
        .iter()
        .filter(|child| child.get("tag").and_then(Value::as_str) == Some("uses-permission"))
        .filter_map(|child| attr(child, "name"))
        .map(str::to_string)
        .collect()
}

/// Find the densest variant of an icon resource among `res/` entries.
///
/// The manifest references icons by resource name (`@mipmap/ic_launcher`)
/// while the archive stores one file per density folder. All matching
/// `res/**/<name>.png` entries are candidates and the largest by byte
/// size is taken as the highest resolution.
fn resolve_icon<R: std::io::Read + std::io::Seek>(
    archive: &mut ArchiveReader<R>,
    entries: &[ArchiveEntry],
    icon_ref: &str,
) -> Option<IconAsset> {
    let name = resource_name(icon_ref).unwrap_or(icon_ref);
    let file_name = format!("{name}.png");

    let mut best: Option<&ArchiveEntry> = None;
    for entry in entries {
        if !entry.name.starts_with("res/") {
            continue;
        }
        if entry.name.rsplit('/').next() != Some(file_name.as_str()) {
            continue;
        }
        // Largest wins; ties break on name so the pick is deterministic
        // regardless of central-directory order.
        if best.is_none_or(|b| {
            entry.uncompressed_size > b.uncompressed_size
                || (entry.uncompressed_size == b.uncompressed_size && entry.name < b.name)
        }) {
            best = Some(entry);
        }
    }

    let entry = best?;
    let bytes = match archive.read_entry(&entry.name) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return None,
        Err(err) => {
            warn!(entry = %entry.name, %err, "failed to read icon entry");
            return None;
        }
    };
    png::normalize_icon(bytes, &entry.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest_fixture() -> Value {
        json!({
            "tag": "manifest",
            "attributes": {
                "package": "com.example.demo",
                "versionName": "3.4.1",
                "versionCode": "341"
            },
            "children": [
                {
                    "tag": "uses-permission",
                    "attributes": {"android:name": "android.permission.INTERNET"},
                    "children": []
                },
                {
                    "tag": "uses-permission",
                    "attributes": {"android:name": "android.permission.CAMERA"},
                    "children": []
                },
                {
                    "tag": "application",
                    "attributes": {
                        "android:label": "@string/app_name",
                        "android:icon": "@mipmap/ic_launcher"
                    },
                    "children": []
                }
            ]
        })
    }

    #[test]
    fn test_attr_accepts_namespaced_and_bare_keys() {
        let manifest = manifest_fixture();
        assert_eq!(attr(&manifest, "package"), Some("com.example.demo"));
        let app = find_child(&manifest, "application").unwrap();
        assert_eq!(attr(app, "label"), Some("@string/app_name"));
    }

    #[test]
    fn test_resource_name_parsing() {
        assert_eq!(resource_name("@string/app_name"), Some("app_name"));
        assert_eq!(resource_name("@mipmap/ic_launcher"), Some("ic_launcher"));
        assert_eq!(resource_name("Literal Label"), None);
    }

    #[test]
    fn test_resolve_label_through_string_table() {
        let manifest = manifest_fixture();
        let app = find_child(&manifest, "application").unwrap();
        let strings = HashMap::from([("app_name".to_string(), "Demo App".to_string())]);
        assert_eq!(resolve_label(app, &strings), Some("Demo App".to_string()));
        // Unresolvable reference yields None so the caller can fall back.
        assert_eq!(resolve_label(app, &HashMap::new()), None);
    }

    #[test]
    fn test_resolve_label_literal() {
        let app = json!({
            "tag": "application",
            "attributes": {"android:label": "Plain Name"},
            "children": []
        });
        assert_eq!(
            resolve_label(&app, &HashMap::new()),
            Some("Plain Name".to_string())
        );
    }

    #[test]
    fn test_collect_permissions() {
        let permissions = collect_permissions(&manifest_fixture());
        assert_eq!(
            permissions,
            vec!["android.permission.INTERNET", "android.permission.CAMERA"]
        );
    }

    #[test]
    fn test_version_attrs_with_platform_fallback() {
        let manifest = manifest_fixture();
        assert_eq!(
            version_attr(&manifest, "versionName"),
            Some("3.4.1".to_string())
        );

        let platform_only = json!({
            "tag": "manifest",
            "attributes": {
                "package": "p",
                "platformBuildVersionName": "14",
                "platformBuildVersionCode": "34"
            },
            "children": []
        });
        assert_eq!(
            version_attr(&platform_only, "versionName"),
            Some("14".to_string())
        );
        assert_eq!(
            version_attr(&platform_only, "versionCode"),
            Some("34".to_string())
        );
    }

    #[test]
    fn test_icon_picks_densest_variant() {
        use std::io::{Cursor, Write};
        use zip::ZipWriter;
        use zip::write::SimpleFileOptions;

        let small = png::encode_rgba(2, 2, &[200u8; 16]);
        let large = png::encode_rgba(6, 6, &[200u8; 144]);
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in [
            ("res/mipmap-mdpi/ic_launcher.png", small.as_slice()),
            ("res/mipmap-xxhdpi/ic_launcher.png", large.as_slice()),
            ("res/mipmap-xxhdpi/ic_launcher_round.png", large.as_slice()),
        ] {
            writer.start_file(name, SimpleFileOptions::default()).unwrap();
            writer.write_all(body).unwrap();
        }
        let mut archive = ArchiveReader::open(writer.finish().unwrap()).unwrap();
        let entries = archive.entries().unwrap();

        let icon = resolve_icon(&mut archive, &entries, "@mipmap/ic_launcher").unwrap();
        assert_eq!(icon.source_path, "res/mipmap-xxhdpi/ic_launcher.png");
        assert_eq!((icon.width, icon.height), (6, 6));
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_with_stub_decompiler() {
        use std::io::{Cursor, Write};
        use std::os::unix::fs::PermissionsExt;
        use zip::ZipWriter;
        use zip::write::SimpleFileOptions;

        let dir = tempfile::tempdir().unwrap();

        // A minimal but valid APK: one resource entry.
        let icon = png::encode_rgba(3, 3, &[64u8; 36]);
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("res/mipmap-hdpi/ic_launcher.png", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(&icon).unwrap();
        let apk_path = dir.path().join("demo.apk");
        std::fs::write(&apk_path, writer.finish().unwrap().into_inner()).unwrap();

        // Stub decompiler that writes the expected JSON files into the
        // scratch directory passed via --output.
        let manifest = manifest_fixture().to_string();
        let strings = r#"{"app_name": "Demo App"}"#;
        let script = dir.path().join("decompile.sh");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\nout=$3\ncat > \"$out/AndroidManifest.json\" <<'EOF'\n{manifest}\nEOF\ncat > \"$out/strings.json\" <<'EOF'\n{strings}\nEOF\n"
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let extractor = ApkExtractor::new(ExternalTool::new("decompile", script));
        let build = extractor.extract(&apk_path).unwrap();

        assert_eq!(build.package_name, "com.example.demo");
        assert_eq!(build.app_name, "Demo App");
        assert_eq!(build.version_name.as_deref(), Some("3.4.1"));
        assert_eq!(build.version_code.as_deref(), Some("341"));
        assert_eq!(build.permissions.len(), 2);
        let icon = build.icon.unwrap();
        assert_eq!(icon.source_path, "res/mipmap-hdpi/ic_launcher.png");
    }

    #[test]
    fn test_missing_package_is_invalid_app_content() {
        // Exercised through the pure parsing path: a manifest with no
        // package attribute maps to the typed error in `extract`.
        let manifest = json!({"tag": "manifest", "attributes": {}, "children": []});
        assert_eq!(attr(&manifest, "package"), None);
    }
}
