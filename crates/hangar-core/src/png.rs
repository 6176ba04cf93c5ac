//! PNG chunk streams and Apple's proprietary `CgBI` variant.
//!
//! App Store optimization rewrites PNG icons into a nonstandard layout: a
//! `CgBI` chunk after the signature, IDAT pixel data stored BGRA with
//! premultiplied alpha, and the deflate stream written raw (no zlib
//! wrapper). Generic decoders reject these outright, so recovered icons
//! must be converted back before anything downstream can display them.
//!
//! Conversion deliberately decodes to a raw pixel buffer and re-encodes
//! with a conventional PNG writer instead of patching bytes in place: the
//! premultiplied-alpha and byte-order differences make patching unreliable.
//! Chunk parsing, by contrast, is read-only and lenient - it validates the
//! signature and bounds but not CRCs.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::{DeflateDecoder, ZlibDecoder};
use flate2::write::ZlibEncoder;
use thiserror::Error;
use tracing::{debug, warn};

use hangar_schema::IconAsset;

/// The 8-byte PNG file signature.
pub const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

const CGBI: [u8; 4] = *b"CgBI";
const IHDR: [u8; 4] = *b"IHDR";
const IDAT: [u8; 4] = *b"IDAT";
const IEND: [u8; 4] = *b"IEND";

/// Caps against crafted chunk streams.
const MAX_CHUNKS: usize = 4096;
const MAX_DIMENSION: u32 = 16_384;

/// Bytes per RGBA pixel.
const BPP: usize = 4;

/// Failures while converting a `CgBI` image.
///
/// These never escape an extraction: icons are optional, so callers log
/// and drop the asset instead.
#[derive(Error, Debug)]
pub enum PngError {
    /// The chunk stream or pixel data is structurally broken.
    #[error("malformed PNG: {0}")]
    Malformed(String),

    /// A valid but unconvertible layout (unexpected bit depth, color type,
    /// or interlacing).
    #[error("unsupported CgBI layout: {0}")]
    Unsupported(String),
}

/// One chunk of a PNG stream.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// 4-byte chunk type tag.
    pub tag: [u8; 4],
    /// Chunk payload.
    pub data: Vec<u8>,
    /// Stored CRC (not verified on read).
    pub crc: u32,
}

/// Parse a PNG byte buffer into its chunk sequence.
///
/// Returns `None` (never an error) for anything that is not a PNG: a
/// missing signature, a truncated chunk header, or a length field running
/// past the buffer. CRCs are carried through but not checked; read-only
/// consumers do not care, and hostile input would just recompute them
/// anyway.
pub fn parse_chunks(bytes: &[u8]) -> Option<Vec<Chunk>> {
    if bytes.len() < PNG_SIGNATURE.len() || bytes[..8] != PNG_SIGNATURE {
        return None;
    }

    let mut chunks = Vec::new();
    let mut pos = PNG_SIGNATURE.len();
    let mut terminated = false;
    while pos + 8 <= bytes.len() {
        if chunks.len() >= MAX_CHUNKS {
            return None;
        }
        let len = u32::from_be_bytes(bytes[pos..pos + 4].try_into().ok()?) as usize;
        let tag: [u8; 4] = bytes[pos + 4..pos + 8].try_into().ok()?;
        let data_start = pos + 8;
        let data_end = data_start.checked_add(len)?;
        if data_end + 4 > bytes.len() {
            return None;
        }
        let crc = u32::from_be_bytes(bytes[data_end..data_end + 4].try_into().ok()?);
        chunks.push(Chunk {
            tag,
            data: bytes[data_start..data_end].to_vec(),
            crc,
        });
        pos = data_end + 4;
        if tag == IEND {
            terminated = true;
            break;
        }
    }

    // A stream must end cleanly: either an IEND chunk was seen (trailing
    // bytes after it are tolerated) or the last chunk ended exactly at the
    // buffer boundary. Anything else is a truncated chunk header.
    if !terminated && pos != bytes.len() {
        return None;
    }
    if chunks.is_empty() { None } else { Some(chunks) }
}

/// True iff a chunk of type `CgBI` appears anywhere in the stream.
///
/// In practice the chunk sits immediately after the signature, but
/// detection scans every chunk rather than assuming position.
pub fn is_cgbi_png(bytes: &[u8]) -> bool {
    parse_chunks(bytes)
        .is_some_and(|chunks| chunks.iter().any(|chunk| chunk.tag == CGBI))
}

/// Width and height from the IHDR chunk, independent of `CgBI`-ness.
pub fn read_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    let chunks = parse_chunks(bytes)?;
    let ihdr = chunks.iter().find(|chunk| chunk.tag == IHDR)?;
    if ihdr.data.len() < 8 {
        return None;
    }
    let width = u32::from_be_bytes(ihdr.data[0..4].try_into().ok()?);
    let height = u32::from_be_bytes(ihdr.data[4..8].try_into().ok()?);
    Some((width, height))
}

/// Convert a `CgBI` PNG into a standards-compliant one.
///
/// Returns `Ok(None)` when the input is not a `CgBI` PNG (including non-PNG
/// input). On success the output carries no `CgBI` chunk and preserves the
/// IHDR dimensions exactly.
///
/// # Errors
///
/// Returns [`PngError`] when the input claims to be `CgBI` but its pixel
/// data cannot be recovered (truncated IDAT, bad filter bytes) or uses a
/// layout Apple's optimizer does not emit (anything but 8-bit
/// non-interlaced RGBA).
pub fn convert_cgbi_to_standard(bytes: &[u8]) -> Result<Option<Vec<u8>>, PngError> {
    let Some(chunks) = parse_chunks(bytes) else {
        return Ok(None);
    };
    if !chunks.iter().any(|chunk| chunk.tag == CGBI) {
        return Ok(None);
    }

    let ihdr = chunks
        .iter()
        .find(|chunk| chunk.tag == IHDR)
        .ok_or_else(|| PngError::Malformed("missing IHDR".to_string()))?;
    if ihdr.data.len() < 13 {
        return Err(PngError::Malformed("short IHDR".to_string()));
    }
    let width = u32::from_be_bytes(ihdr.data[0..4].try_into().unwrap_or_default());
    let height = u32::from_be_bytes(ihdr.data[4..8].try_into().unwrap_or_default());
    let bit_depth = ihdr.data[8];
    let color_type = ihdr.data[9];
    let interlace = ihdr.data[12];

    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(PngError::Malformed(format!(
            "implausible dimensions {width}x{height}"
        )));
    }
    if bit_depth != 8 || color_type != 6 || interlace != 0 {
        return Err(PngError::Unsupported(format!(
            "bit depth {bit_depth}, color type {color_type}, interlace {interlace}"
        )));
    }

    let idat: Vec<u8> = chunks
        .iter()
        .filter(|chunk| chunk.tag == IDAT)
        .flat_map(|chunk| chunk.data.iter().copied())
        .collect();
    if idat.is_empty() {
        return Err(PngError::Malformed("no IDAT data".to_string()));
    }

    let stride = width as usize * BPP;
    let expected = (stride + 1) * height as usize;
    let raw = inflate_idat(&idat, expected)?;
    let mut pixels = unfilter(&raw, stride, height as usize)?;

    // CgBI pixels are premultiplied BGRA; restore straight RGBA.
    for pixel in pixels.chunks_exact_mut(BPP) {
        pixel.swap(0, 2);
        let alpha = pixel[3];
        if alpha != 0 && alpha != 255 {
            for channel in &mut pixel[..3] {
                *channel = ((u16::from(*channel) * 255 + u16::from(alpha) / 2)
                    / u16::from(alpha))
                .min(255) as u8;
            }
        }
    }

    let out = encode_rgba(width, height, &pixels);
    debug!(width, height, "converted CgBI icon to standard PNG");
    Ok(Some(out))
}

/// Normalize possibly-`CgBI` icon bytes into an [`IconAsset`].
///
/// Returns `None` (and logs) when the bytes are not a decodable PNG or a
/// claimed `CgBI` image cannot be converted - the icon is optional in the
/// data model, so extraction proceeds without it.
pub fn normalize_icon(bytes: Vec<u8>, source_path: &str) -> Option<IconAsset> {
    let bytes = match convert_cgbi_to_standard(&bytes) {
        Ok(Some(converted)) => converted,
        Ok(None) => bytes,
        Err(err) => {
            warn!(source_path, %err, "dropping icon that failed CgBI conversion");
            return None;
        }
    };
    let Some((width, height)) = read_dimensions(&bytes) else {
        debug!(source_path, "icon candidate is not a PNG, skipping");
        return None;
    };
    Some(IconAsset {
        bytes,
        width,
        height,
        source_path: source_path.to_string(),
    })
}

/// Encode straight-alpha RGBA pixels as a minimal standard PNG
/// (IHDR + one zlib IDAT with filter `None` rows + IEND).
pub(crate) fn encode_rgba(width: u32, height: u32, pixels: &[u8]) -> Vec<u8> {
    let stride = width as usize * BPP;
    let mut scanlines = Vec::with_capacity((stride + 1) * height as usize);
    for row in pixels.chunks_exact(stride) {
        scanlines.push(0); // filter: None
        scanlines.extend_from_slice(row);
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    // Writing to a Vec cannot fail.
    let _ = encoder.write_all(&scanlines);
    let compressed = encoder.finish().unwrap_or_default();

    let mut ihdr = Vec::with_capacity(13);
    ihdr.extend_from_slice(&width.to_be_bytes());
    ihdr.extend_from_slice(&height.to_be_bytes());
    ihdr.extend_from_slice(&[8, 6, 0, 0, 0]); // 8-bit RGBA, no interlace

    let mut out = Vec::new();
    out.extend_from_slice(&PNG_SIGNATURE);
    write_chunk(&mut out, IHDR, &ihdr);
    write_chunk(&mut out, IDAT, &compressed);
    write_chunk(&mut out, IEND, &[]);
    out
}

/// Append one chunk with a freshly computed CRC over tag + data.
pub(crate) fn write_chunk(out: &mut Vec<u8>, tag: [u8; 4], data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(&tag);
    out.extend_from_slice(data);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&tag);
    hasher.update(data);
    out.extend_from_slice(&hasher.finalize().to_be_bytes());
}

/// Inflate `CgBI` IDAT data.
///
/// Apple writes the stream as raw deflate with no zlib wrapper; some
/// variants keep the wrapper, so fall back to zlib when raw inflation
/// does not produce the expected scanline bytes.
fn inflate_idat(idat: &[u8], expected: usize) -> Result<Vec<u8>, PngError> {
    let mut raw = Vec::with_capacity(expected);
    let ok = DeflateDecoder::new(idat)
        .take(expected as u64 + 1)
        .read_to_end(&mut raw)
        .is_ok();
    if ok && raw.len() == expected {
        return Ok(raw);
    }

    raw.clear();
    ZlibDecoder::new(idat)
        .take(expected as u64 + 1)
        .read_to_end(&mut raw)
        .map_err(|err| PngError::Malformed(format!("IDAT inflate failed: {err}")))?;
    if raw.len() != expected {
        return Err(PngError::Malformed(format!(
            "IDAT inflated to {} bytes, expected {expected}",
            raw.len()
        )));
    }
    Ok(raw)
}

/// Reverse the per-scanline PNG filters, producing packed RGBA pixels.
fn unfilter(raw: &[u8], stride: usize, height: usize) -> Result<Vec<u8>, PngError> {
    let mut out = vec![0u8; stride * height];
    for row in 0..height {
        let line_start = row * (stride + 1);
        let filter = raw[line_start];
        let line = &raw[line_start + 1..line_start + 1 + stride];
        for (i, &x) in line.iter().enumerate() {
            let left = if i >= BPP { out[row * stride + i - BPP] } else { 0 };
            let up = if row > 0 { out[(row - 1) * stride + i] } else { 0 };
            let up_left = if row > 0 && i >= BPP {
                out[(row - 1) * stride + i - BPP]
            } else {
                0
            };
            let value = match filter {
                0 => x,
                1 => x.wrapping_add(left),
                2 => x.wrapping_add(up),
                3 => x.wrapping_add(u16::midpoint(u16::from(left), u16::from(up)) as u8),
                4 => x.wrapping_add(paeth(left, up, up_left)),
                other => {
                    return Err(PngError::Malformed(format!(
                        "unknown filter type {other} in row {row}"
                    )));
                }
            };
            out[row * stride + i] = value;
        }
    }
    Ok(out)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = i32::from(a) + i32::from(b) - i32::from(c);
    let pa = (p - i32::from(a)).abs();
    let pb = (p - i32::from(b)).abs();
    let pc = (p - i32::from(c)).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}
