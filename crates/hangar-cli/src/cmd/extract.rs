//! Extract command

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use hangar_schema::{BuildMetadata, IconAsset};

/// Extract metadata from an artifact and print it as pretty JSON.
pub fn extract(path: &Path, icon_out: Option<&Path>) -> Result<()> {
    debug!(path = %path.display(), "extracting artifact");
    let metadata = hangar_core::extract(path)
        .with_context(|| format!("failed to extract `{}`", path.display()))?;

    if let Some(icon_out) = icon_out {
        match primary_icon(&metadata) {
            Some(icon) => {
                std::fs::write(icon_out, &icon.bytes)
                    .with_context(|| format!("failed to write `{}`", icon_out.display()))?;
                eprintln!(
                    "wrote {}x{} icon ({}) to {}",
                    icon.width,
                    icon.height,
                    icon.source_path,
                    icon_out.display()
                );
            }
            None => eprintln!("no icon recovered from {}", path.display()),
        }
    }

    println!("{}", serde_json::to_string_pretty(&metadata)?);
    Ok(())
}

/// The icon of the main target (iOS) or the application (Android).
fn primary_icon(metadata: &BuildMetadata) -> Option<&IconAsset> {
    match metadata {
        BuildMetadata::Ios(build) => build
            .targets
            .iter()
            .find(|target| target.icon.is_some())
            .and_then(|target| target.icon.as_ref()),
        BuildMetadata::Android(build) => build.icon.as_ref(),
    }
}
