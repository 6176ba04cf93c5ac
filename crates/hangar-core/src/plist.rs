//! Property-list decoding on top of the `plist` crate.
//!
//! `decode` auto-detects binary vs. XML from the leading bytes (the crate
//! handles both) and enforces a maximum nesting depth. The decoder itself
//! recurses per nesting level with no limit of its own, so the depth bound
//! is applied in two passes: an iterative pre-scan of the raw bytes
//! rejects deep nesting before the recursive decoder ever runs, and an
//! exact post-decode walk enforces the value-depth cap.
//!
//! The accessors here return `Option`; extractors decide which absences
//! are fatal and map them to typed errors instead of treating a missing
//! field as an empty value.

pub use plist::{Dictionary, Value};

use crate::error::ExtractError;

/// Maximum nesting depth accepted from untrusted plists.
const MAX_DEPTH: usize = 64;

/// Pre-scan cap on raw XML element nesting. Keys and scalar values are
/// elements too, so element depth over-counts value depth; the headroom
/// keeps legitimate plists near the value cap from being rejected early.
const MAX_SCAN_DEPTH: usize = MAX_DEPTH * 4;

/// Pre-scan cap on binary plist object-graph nodes, so crafted reference
/// cycles or huge fan-out terminate instead of looping.
const MAX_SCAN_NODES: usize = 1_000_000;

/// Decode a property list (binary or XML) into a [`Value`] tree.
///
/// `entry` names the archive entry the bytes came from and is carried in
/// the error for triage.
///
/// # Errors
///
/// Returns [`ExtractError::MalformedPlist`] on truncated or invalid
/// structure, or when nesting exceeds the depth cap. The cap is checked
/// against the raw bytes first, so hostile nesting never reaches the
/// recursive decoder.
pub fn decode(bytes: &[u8], entry: &str) -> Result<Value, ExtractError> {
    scan_depth(bytes).map_err(|reason| ExtractError::MalformedPlist {
        entry: entry.to_string(),
        reason,
    })?;
    let value: Value = plist::from_bytes(bytes).map_err(|err| ExtractError::MalformedPlist {
        entry: entry.to_string(),
        reason: err.to_string(),
    })?;
    check_depth(&value, MAX_DEPTH).map_err(|depth| ExtractError::MalformedPlist {
        entry: entry.to_string(),
        reason: format!("nesting exceeds {depth} levels"),
    })?;
    Ok(value)
}

/// Decode a plist whose root must be a dictionary.
///
/// # Errors
///
/// Returns [`ExtractError::MalformedPlist`] if decoding fails or the root
/// is not a dictionary.
pub fn decode_dictionary(bytes: &[u8], entry: &str) -> Result<Dictionary, ExtractError> {
    match decode(bytes, entry)? {
        Value::Dictionary(dict) => Ok(dict),
        other => Err(ExtractError::MalformedPlist {
            entry: entry.to_string(),
            reason: format!("expected dictionary root, found {}", kind_name(&other)),
        }),
    }
}

/// String value for `key`, if present and actually a string.
pub fn dict_str<'a>(dict: &'a Dictionary, key: &str) -> Option<&'a str> {
    dict.get(key).and_then(Value::as_string)
}

/// Nested dictionary for `key`, if present.
pub fn dict_dict<'a>(dict: &'a Dictionary, key: &str) -> Option<&'a Dictionary> {
    dict.get(key).and_then(Value::as_dictionary)
}

/// Array value for `key`, if present.
pub fn dict_array<'a>(dict: &'a Dictionary, key: &str) -> Option<&'a [Value]> {
    dict.get(key).and_then(Value::as_array).map(Vec::as_slice)
}

/// Convert a decoded dictionary into a JSON object map.
///
/// Values that have no JSON representation decode to `null` rather than
/// dropping the key, so callers can still see it was present.
pub fn dict_to_json(dict: &Dictionary) -> serde_json::Map<String, serde_json::Value> {
    dict.iter()
        .map(|(key, value)| {
            let json = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
            (key.clone(), json)
        })
        .collect()
}

/// Iteratively bound nesting in the raw bytes before decoding.
///
/// Structural problems other than depth are left for the decoder to
/// report (it fails without recursing into them), so this scan only ever
/// rejects input, never accepts it on the decoder's behalf.
fn scan_depth(bytes: &[u8]) -> Result<(), String> {
    if bytes.starts_with(b"bplist") {
        scan_binary_depth(bytes)
    } else {
        scan_xml_depth(bytes)
    }
}

/// Count XML element nesting with a plain cursor, no recursion.
///
/// Processing instructions, doctypes, and comments are skipped;
/// self-closing elements do not nest.
fn scan_xml_depth(bytes: &[u8]) -> Result<(), String> {
    let mut depth = 0usize;
    let mut pos = 0;
    while pos < bytes.len() {
        if bytes[pos] != b'<' {
            pos += 1;
            continue;
        }
        let Some(close) = bytes[pos + 1..].iter().position(|&b| b == b'>') else {
            break;
        };
        let end = pos + 1 + close;
        match bytes.get(pos + 1).copied() {
            Some(b'/') => depth = depth.saturating_sub(1),
            Some(b'?' | b'!') => {}
            _ => {
                if bytes[end - 1] != b'/' {
                    depth += 1;
                    if depth > MAX_SCAN_DEPTH {
                        return Err(format!("nesting exceeds {MAX_SCAN_DEPTH} element levels"));
                    }
                }
            }
        }
        pos = end + 1;
    }
    Ok(())
}

/// Walk a binary plist's object graph with an explicit stack, bounding
/// both depth and total nodes visited.
fn scan_binary_depth(bytes: &[u8]) -> Result<(), String> {
    // Trailer: 5 unused bytes, sort version, offset size, ref size, then
    // object count, top object, and offset table location as u64s.
    let Some(trailer) = bytes.len().checked_sub(32).and_then(|start| bytes.get(start..)) else {
        return Ok(());
    };
    let offset_size = trailer[6] as usize;
    let ref_size = trailer[7] as usize;
    let top_object = u64::from_be_bytes(trailer[16..24].try_into().unwrap_or_default()) as usize;
    let table_offset = u64::from_be_bytes(trailer[24..32].try_into().unwrap_or_default()) as usize;
    if !(1..=8).contains(&offset_size) || !(1..=8).contains(&ref_size) {
        return Ok(());
    }

    let object_offset = |index: usize| -> Option<usize> {
        let start = table_offset.checked_add(index.checked_mul(offset_size)?)?;
        be_uint(bytes.get(start..start.checked_add(offset_size)?)?)
    };

    let mut stack = vec![(top_object, 1usize)];
    let mut nodes = 1usize;
    while let Some((index, depth)) = stack.pop() {
        if depth > MAX_DEPTH {
            return Err(format!("nesting exceeds {MAX_DEPTH} levels"));
        }
        let Some(offset) = object_offset(index) else {
            return Ok(());
        };
        let Some(&marker) = bytes.get(offset) else {
            return Ok(());
        };
        // Only containers (array 0xA, set 0xC, dict 0xD) have children.
        if !matches!(marker >> 4, 0xA | 0xC | 0xD) {
            continue;
        }
        let Some((count, refs_at)) = container_count(bytes, offset) else {
            return Ok(());
        };
        let ref_count = if marker >> 4 == 0xD {
            count.checked_mul(2)
        } else {
            Some(count)
        };
        let Some(ref_count) = ref_count else {
            return Ok(());
        };
        for i in 0..ref_count {
            let Some(start) = i.checked_mul(ref_size).and_then(|o| refs_at.checked_add(o)) else {
                return Ok(());
            };
            let Some(child) = start
                .checked_add(ref_size)
                .and_then(|end| bytes.get(start..end))
                .and_then(be_uint)
            else {
                return Ok(());
            };
            nodes += 1;
            if nodes > MAX_SCAN_NODES {
                return Err("object graph too large to validate".to_string());
            }
            stack.push((child, depth + 1));
        }
    }
    Ok(())
}

/// Container element count and the offset where its refs begin. Counts of
/// 15 or more are stored as a following int object.
fn container_count(bytes: &[u8], marker_offset: usize) -> Option<(usize, usize)> {
    let nibble = (*bytes.get(marker_offset)? & 0x0F) as usize;
    if nibble != 0x0F {
        return Some((nibble, marker_offset + 1));
    }
    let int_marker = *bytes.get(marker_offset + 1)?;
    if int_marker >> 4 != 0x1 {
        return None;
    }
    let len = 1usize << (int_marker & 0x0F);
    if len > 8 {
        return None;
    }
    let start = marker_offset + 2;
    let count = be_uint(bytes.get(start..start + len)?)?;
    Some((count, start + len))
}

fn be_uint(bytes: &[u8]) -> Option<usize> {
    let mut value = 0usize;
    for &byte in bytes {
        value = value.checked_mul(256)?.checked_add(byte as usize)?;
    }
    Some(value)
}

fn check_depth(value: &Value, remaining: usize) -> Result<(), usize> {
    if remaining == 0 {
        return Err(MAX_DEPTH);
    }
    match value {
        Value::Array(items) => {
            for item in items {
                check_depth(item, remaining - 1)?;
            }
        }
        Value::Dictionary(dict) => {
            for item in dict.values() {
                check_depth(item, remaining - 1)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Array(_) => "array",
        Value::Dictionary(_) => "dictionary",
        Value::Boolean(_) => "boolean",
        Value::Data(_) => "data",
        Value::Date(_) => "date",
        Value::Real(_) => "real",
        Value::Integer(_) => "integer",
        Value::String(_) => "string",
        _ => "unknown",
    }
}
