//! iOS build extraction: identity metadata, multi-target info, icons, and
//! entitlement/distribution classification from an `.ipa` archive.
//!
//! An IPA is a ZIP with a `Payload/` directory holding one or more `.app`
//! bundles; extensions live as nested `.appex` bundles. Every bundle with
//! an `Info.plist` becomes one target. The first `.app` directly under
//! `Payload/` provides the build-level identity and the provisioning
//! profile used for classification.

use std::io::{Read, Seek};
use std::path::Path;

use tracing::debug;

use hangar_schema::{
    DeviceFamily, Distribution, DistributionKind, EntitlementsResult, IconAsset, IosBuild,
    TargetInfo, TargetRole,
};

use crate::archive::{ArchiveEntry, ArchiveReader};
use crate::error::ExtractError;
use crate::{plist, png};

/// Extract iOS build metadata from an `.ipa` file on disk.
///
/// # Errors
///
/// Returns [`ExtractError::InvalidArchive`] when the file is not a readable
/// ZIP, [`ExtractError::MalformedPlist`] when a required plist fails to
/// decode, and [`ExtractError::InvalidAppContent`] when identity fields are
/// missing after a successful parse.
pub fn extract_ipa(path: &Path) -> Result<IosBuild, ExtractError> {
    let mut archive = ArchiveReader::open_path(path)?;
    extract_from_archive(&mut archive)
}

/// Extract iOS build metadata from an already-open archive.
///
/// # Errors
///
/// Same error surface as [`extract_ipa`], minus the initial file open.
pub fn extract_from_archive<R: Read + Seek>(
    archive: &mut ArchiveReader<R>,
) -> Result<IosBuild, ExtractError> {
    let entries = archive.entries()?;

    let app_roots = app_bundle_roots(&entries);
    let Some(main_root) = app_roots.first().cloned() else {
        return Err(ExtractError::InvalidAppContent(
            "no .app bundle found under Payload/".to_string(),
        ));
    };
    let appex_roots = appex_bundle_roots(&entries);
    debug!(
        apps = app_roots.len(),
        extensions = appex_roots.len(),
        "discovered bundle targets"
    );

    let mut targets = Vec::new();
    for root in &app_roots {
        targets.push(read_target(archive, &entries, root, TargetRole::Main)?);
    }
    for root in &appex_roots {
        targets.push(read_target(archive, &entries, root, TargetRole::Extension)?);
    }

    let entitlements = classify_entitlements(archive, &entries, &main_root)?;

    let main = &targets[0];
    Ok(IosBuild {
        app_name: main.name.clone(),
        identifier: main.bundle_id.clone(),
        version: main.version.clone(),
        build_number: main.build.clone(),
        targets,
        entitlements,
    })
}

/// Roots of `.app` bundles directly under `Payload/`, sorted for
/// deterministic target ordering.
fn app_bundle_roots(entries: &[ArchiveEntry]) -> Vec<String> {
    let mut roots: Vec<String> = entries
        .iter()
        .filter_map(|entry| {
            let rest = entry.name.strip_prefix("Payload/")?;
            let (segment, _) = rest.split_once('/')?;
            segment
                .ends_with(".app")
                .then(|| format!("Payload/{segment}/"))
        })
        .collect();
    roots.sort();
    roots.dedup();
    roots
}

/// Roots of nested `.appex` extension bundles, sorted.
fn appex_bundle_roots(entries: &[ArchiveEntry]) -> Vec<String> {
    let mut roots: Vec<String> = entries
        .iter()
        .filter_map(|entry| {
            let mut prefix_len = 0;
            for segment in entry.name.split('/') {
                prefix_len += segment.len() + 1;
                if segment.ends_with(".appex") && prefix_len <= entry.name.len() {
                    return Some(entry.name[..prefix_len].to_string());
                }
            }
            None
        })
        .collect();
    roots.sort();
    roots.dedup();
    roots
}

/// Read one bundle's `Info.plist` and assemble its [`TargetInfo`].
fn read_target<R: Read + Seek>(
    archive: &mut ArchiveReader<R>,
    entries: &[ArchiveEntry],
    root: &str,
    role: TargetRole,
) -> Result<TargetInfo, ExtractError> {
    let plist_entry = format!("{root}Info.plist");
    let data = archive.read_entry(&plist_entry)?.ok_or_else(|| {
        ExtractError::InvalidAppContent(format!("bundle `{root}` has no Info.plist"))
    })?;
    let info = plist::decode_dictionary(&data, &plist_entry)?;

    let bundle_id = plist::dict_str(&info, "CFBundleIdentifier")
        .ok_or_else(|| {
            ExtractError::InvalidAppContent(format!(
                "`{plist_entry}` is missing CFBundleIdentifier"
            ))
        })?
        .to_string();
    let name = plist::dict_str(&info, "CFBundleDisplayName")
        .or_else(|| plist::dict_str(&info, "CFBundleName"))
        .ok_or_else(|| {
            ExtractError::InvalidAppContent(format!(
                "`{plist_entry}` has neither CFBundleDisplayName nor CFBundleName"
            ))
        })?
        .to_string();

    let icon = resolve_icon(archive, entries, root, &info)?;

    Ok(TargetInfo {
        name,
        bundle_id,
        version: plist::dict_str(&info, "CFBundleShortVersionString").map(str::to_string),
        build: plist::dict_str(&info, "CFBundleVersion").map(str::to_string),
        root: root.to_string(),
        role,
        supported_devices: device_families(&info),
        orientations: orientations(&info),
        icon,
    })
}

fn device_families(info: &plist::Dictionary) -> std::collections::BTreeSet<DeviceFamily> {
    let mut families = std::collections::BTreeSet::new();
    let values = match info.get("UIDeviceFamily") {
        Some(plist::Value::Array(items)) => items.clone(),
        Some(single @ plist::Value::Integer(_)) => vec![single.clone()],
        _ => Vec::new(),
    };
    for value in values {
        match value.as_signed_integer() {
            Some(1) => {
                families.insert(DeviceFamily::Iphone);
            }
            Some(2) => {
                families.insert(DeviceFamily::Ipad);
            }
            _ => {}
        }
    }
    families
}

/// Phone orientations first, then any tablet additions, in declared order.
fn orientations(info: &plist::Dictionary) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for key in [
        "UISupportedInterfaceOrientations",
        "UISupportedInterfaceOrientations~ipad",
    ] {
        for value in plist::dict_array(info, key).unwrap_or_default() {
            if let Some(orientation) = value.as_string()
                && !out.iter().any(|o| o == orientation)
            {
                out.push(orientation.to_string());
            }
        }
    }
    out
}

/// Candidate icon names from `CFBundleIcons(~ipad)`.
fn icon_candidates(info: &plist::Dictionary) -> Vec<String> {
    let mut names = Vec::new();
    for key in ["CFBundleIcons", "CFBundleIcons~ipad"] {
        let files = plist::dict_dict(info, key)
            .and_then(|icons| plist::dict_dict(icons, "CFBundlePrimaryIcon"))
            .and_then(|primary| plist::dict_array(primary, "CFBundleIconFiles"));
        for value in files.unwrap_or_default() {
            if let Some(name) = value.as_string()
                && !names.iter().any(|n| n == name)
            {
                names.push(name.to_string());
            }
        }
    }
    names
}

/// Pick the icon file for a bundle: substring-match each candidate name
/// against file names under the bundle root, then keep the largest match
/// by byte size. Larger files are assumed higher resolution - the plist
/// carries no reliable scale metadata.
fn resolve_icon<R: Read + Seek>(
    archive: &mut ArchiveReader<R>,
    entries: &[ArchiveEntry],
    root: &str,
    info: &plist::Dictionary,
) -> Result<Option<IconAsset>, ExtractError> {
    let candidates = icon_candidates(info);
    if candidates.is_empty() {
        return Ok(None);
    }

    let mut best: Option<&ArchiveEntry> = None;
    for entry in entries {
        if !entry.name.starts_with(root) || entry.name.ends_with('/') {
            continue;
        }
        let file_name = entry.name.rsplit('/').next().unwrap_or(&entry.name);
        if !candidates.iter().any(|c| file_name.contains(c.as_str())) {
            continue;
        }
        if best.is_none_or(|b| entry.uncompressed_size > b.uncompressed_size) {
            best = Some(entry);
        }
    }

    let Some(entry) = best else {
        return Ok(None);
    };
    let Some(bytes) = archive.read_entry(&entry.name)? else {
        return Ok(None);
    };
    Ok(png::normalize_icon(bytes, &entry.name))
}

/// Classify entitlements and distribution for the main bundle.
///
/// When no provisioning profile exists the archive is not read any
/// further: the result is `none` with empty entitlements. Otherwise a
/// sidecar `.xcent` file wins entirely over the profile's own
/// `Entitlements` dictionary - Xcode-signed archives often carry a
/// stricter enterprise/dev grant inside the profile while the sidecar
/// reflects the signing actually used for this build.
fn classify_entitlements<R: Read + Seek>(
    archive: &mut ArchiveReader<R>,
    entries: &[ArchiveEntry],
    root: &str,
) -> Result<EntitlementsResult, ExtractError> {
    let profile_entry = format!("{root}embedded.mobileprovision");
    if !entries.iter().any(|entry| entry.name == profile_entry) {
        return Ok(EntitlementsResult::unprovisioned());
    }

    let raw = archive.read_entry(&profile_entry)?.ok_or_else(|| {
        ExtractError::InvalidArchive(format!("entry `{profile_entry}` vanished mid-read"))
    })?;
    let payload = profile_plist_payload(&raw).ok_or_else(|| ExtractError::MalformedPlist {
        entry: profile_entry.clone(),
        reason: "no plist payload between CMS markers".to_string(),
    })?;
    let profile = plist::decode_dictionary(payload, &profile_entry)?;

    let provisions_all = profile
        .get("ProvisionsAllDevices")
        .and_then(plist::Value::as_boolean)
        .unwrap_or(false);
    let provisioned_devices = plist::dict_array(&profile, "ProvisionedDevices");
    let kind = if provisions_all {
        DistributionKind::Enterprise
    } else if provisioned_devices.is_some_and(|devices| !devices.is_empty()) {
        DistributionKind::Adhoc
    } else {
        DistributionKind::Appstore
    };
    let distribution = Distribution {
        kind,
        team_name: plist::dict_str(&profile, "TeamName").map(str::to_string),
        provisioned_device_count: match kind {
            DistributionKind::Adhoc => provisioned_devices.map(<[plist::Value]>::len),
            _ => None,
        },
    };

    let sidecar = entries
        .iter()
        .find(|entry| entry.name.starts_with(root) && entry.name.ends_with(".xcent"));
    let (entitlements, entitlements_source) = if let Some(sidecar) = sidecar {
        let data = archive.read_entry(&sidecar.name)?.unwrap_or_default();
        let dict = plist::decode_dictionary(&data, &sidecar.name)?;
        (plist::dict_to_json(&dict), sidecar.name.clone())
    } else {
        let dict = plist::dict_dict(&profile, "Entitlements");
        (
            dict.map(plist::dict_to_json).unwrap_or_default(),
            format!("{profile_entry}:Entitlements"),
        )
    };

    Ok(EntitlementsResult {
        entitlements,
        entitlements_source,
        distribution,
    })
}

/// Slice the plist payload out of a CMS-wrapped provisioning profile.
///
/// The CMS signature is not verified; only the XML between the first
/// `<?xml`/`<plist` marker and the last `</plist>` is taken.
fn profile_plist_payload(raw: &[u8]) -> Option<&[u8]> {
    let start = find(raw, b"<?xml").or_else(|| find(raw, b"<plist"))?;
    let end = rfind(raw, b"</plist>")? + b"</plist>".len();
    (end > start).then(|| &raw[start..end])
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}
