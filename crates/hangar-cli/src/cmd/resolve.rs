//! Resolve command

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use hangar_core::resolver::AndroidDeviceResolver;
use hangar_schema::{DeviceAttributes, InstallRequest, StorageKind};

/// Resolve the install set for one device and print the result as JSON.
#[allow(clippy::too_many_arguments)]
pub fn resolve(
    build_id: String,
    path: PathBuf,
    output_dir: &Path,
    os_version: Option<String>,
    abi: Option<String>,
    locale: Option<String>,
    screen_density: Option<String>,
) -> Result<()> {
    let request = InstallRequest {
        build_id,
        storage_kind: StorageKind::Local,
        storage_path: path,
        device: DeviceAttributes {
            os_version,
            abi,
            locale,
            screen_density,
        },
    };

    debug!(
        build_id = %request.build_id,
        path = %request.storage_path.display(),
        "resolving install set"
    );
    let resolver = AndroidDeviceResolver::from_env().context("bundletool is required")?;
    let result = resolver
        .resolve(&request, output_dir)
        .context("resolution failed")?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
