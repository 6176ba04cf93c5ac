//! ZIP central-directory reading with bounded, on-demand decompression.
//!
//! Every extractor goes through [`ArchiveReader`]: list entries without
//! extracting anything (metadata-only scans of large archives), then
//! decompress only the entries a caller asks for. Total decompressed bytes
//! per call are capped so a crafted archive cannot amplify a small upload
//! into gigabytes of memory.
//!
//! Entry names are untrusted: they may repeat, or contain `..` segments.
//! They are treated as opaque keys and never joined onto the filesystem.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use zip::ZipArchive;
use zip::result::ZipError;

use crate::error::ExtractError;

/// Cap on total decompressed bytes per read call.
const MAX_DECOMPRESSED_BYTES: u64 = 256 * 1024 * 1024;

/// Cap on central-directory entries considered per archive.
const MAX_ENTRIES: usize = 65_536;

/// One central-directory record.
///
/// `name` is not guaranteed unique or safe; treat it as an opaque key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Entry name as stored in the central directory.
    pub name: String,
    /// Compressed size in bytes.
    pub compressed_size: u64,
    /// Declared uncompressed size in bytes (untrusted).
    pub uncompressed_size: u64,
    /// Offset of the local file header within the archive.
    pub local_header_offset: u64,
}

/// Reads ZIP central-directory entries and decompresses selected entries
/// on demand. Owns the underlying reader for the lifetime of one
/// extraction call.
#[derive(Debug)]
pub struct ArchiveReader<R: Read + Seek> {
    archive: ZipArchive<R>,
}

impl ArchiveReader<File> {
    /// Open an archive from a file on disk.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Io`] if the file cannot be opened and
    /// [`ExtractError::InvalidArchive`] if the ZIP structure is unreadable.
    pub fn open_path(path: &Path) -> Result<Self, ExtractError> {
        Self::open(File::open(path)?)
    }
}

impl<R: Read + Seek> ArchiveReader<R> {
    /// Open an archive from any seekable byte source.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::InvalidArchive`] when the end-of-central-
    /// directory signature is absent or the directory is inconsistent.
    /// I/O failures surface as [`ExtractError::Io`] so callers can
    /// distinguish a broken file from a broken disk.
    pub fn open(reader: R) -> Result<Self, ExtractError> {
        let archive = ZipArchive::new(reader).map_err(archive_error)?;
        if archive.len() > MAX_ENTRIES {
            return Err(ExtractError::InvalidArchive(format!(
                "too many entries: {} (max {MAX_ENTRIES})",
                archive.len()
            )));
        }
        Ok(Self { archive })
    }

    /// List all central-directory entries without decompressing anything.
    ///
    /// The order matches the central directory and is stable across calls.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::InvalidArchive`] if an entry record is
    /// unreadable.
    pub fn entries(&mut self) -> Result<Vec<ArchiveEntry>, ExtractError> {
        let mut out = Vec::with_capacity(self.archive.len());
        for index in 0..self.archive.len() {
            let file = self.archive.by_index(index).map_err(archive_error)?;
            out.push(ArchiveEntry {
                name: file.name().to_string(),
                compressed_size: file.compressed_size(),
                uncompressed_size: file.size(),
                local_header_offset: file.header_start(),
            });
        }
        Ok(out)
    }

    /// Read one entry fully into memory, or `None` if no entry has that
    /// name. Decompressed bytes are bounded.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::InvalidArchive`] if the entry is corrupt or
    /// decompresses past the per-call bound.
    pub fn read_entry(&mut self, name: &str) -> Result<Option<Vec<u8>>, ExtractError> {
        self.read_entry_bounded(name, MAX_DECOMPRESSED_BYTES)
    }

    /// Read every entry matching `selector` into a name-to-bytes map.
    ///
    /// Only the selected entries are decompressed; the total decompressed
    /// size across all of them is bounded. When duplicate names match, the
    /// last occurrence wins (mirroring how ZIP tools overwrite on extract).
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::InvalidArchive`] if a selected entry is
    /// corrupt or the combined decompressed size exceeds the bound.
    pub fn read_entries<F>(&mut self, selector: F) -> Result<HashMap<String, Vec<u8>>, ExtractError>
    where
        F: Fn(&str) -> bool,
    {
        let mut selected = Vec::new();
        for index in 0..self.archive.len() {
            if let Some(name) = self.archive.name_for_index(index)
                && selector(name)
            {
                selected.push(index);
            }
        }

        let mut remaining = MAX_DECOMPRESSED_BYTES;
        let mut out = HashMap::with_capacity(selected.len());
        for index in selected {
            let mut file = self.archive.by_index(index).map_err(archive_error)?;
            let name = file.name().to_string();
            let data = read_bounded(&mut file, &name, remaining)?;
            remaining -= data.len() as u64;
            out.insert(name, data);
        }
        Ok(out)
    }

    fn read_entry_bounded(
        &mut self,
        name: &str,
        limit: u64,
    ) -> Result<Option<Vec<u8>>, ExtractError> {
        let mut file = match self.archive.by_name(name) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(err) => return Err(archive_error(err)),
        };
        let data = read_bounded(&mut file, name, limit)?;
        Ok(Some(data))
    }
}

/// Read a decompression stream to its end, failing once it crosses `limit`.
///
/// The declared uncompressed size is checked first so obvious bombs are
/// rejected before any inflation happens, but the real guard is on the
/// bytes actually produced.
fn read_bounded(
    file: &mut impl Read,
    name: &str,
    limit: u64,
) -> Result<Vec<u8>, ExtractError> {
    let mut data = Vec::new();
    file.take(limit + 1)
        .read_to_end(&mut data)
        .map_err(ExtractError::Io)?;
    if data.len() as u64 > limit {
        return Err(ExtractError::InvalidArchive(format!(
            "entry `{name}` decompresses past the {limit}-byte bound"
        )));
    }
    Ok(data)
}

fn archive_error(err: ZipError) -> ExtractError {
    match err {
        ZipError::Io(err) => ExtractError::Io(err),
        other => ExtractError::InvalidArchive(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    const FILE_CONTENT: &[u8] = b"testcontent";
    const FILE_NAME: &str = "Payload/Test.app/Info.plist";

    fn create_test_zip() -> Cursor<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file(FILE_NAME, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(FILE_CONTENT).unwrap();
        writer.finish().unwrap()
    }

    #[test]
    fn test_single_entry_round_trip() {
        let mut reader = ArchiveReader::open(create_test_zip()).unwrap();
        let entries = reader.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, FILE_NAME);
        assert_eq!(entries[0].uncompressed_size, FILE_CONTENT.len() as u64);

        let data = reader.read_entry(FILE_NAME).unwrap().unwrap();
        assert_eq!(data, FILE_CONTENT);
    }

    #[test]
    fn test_missing_entry_is_none_not_error() {
        let mut reader = ArchiveReader::open(create_test_zip()).unwrap();
        assert!(reader.read_entry("nope.txt").unwrap().is_none());
    }

    #[test]
    fn test_corrupted_eocd_is_invalid_archive() {
        let mut bytes = create_test_zip().into_inner();
        // Flip the EOCD signature (50 4B 05 06) near the end of the buffer.
        let pos = bytes
            .windows(4)
            .rposition(|w| w == [0x50, 0x4B, 0x05, 0x06])
            .unwrap();
        bytes[pos] = 0xFF;

        let result = ArchiveReader::open(Cursor::new(bytes));
        assert!(matches!(result, Err(ExtractError::InvalidArchive(_))));
    }

    #[test]
    fn test_truncated_buffer_is_invalid_archive() {
        let result = ArchiveReader::open(Cursor::new(b"PK\x03\x04 not a real zip".to_vec()));
        assert!(matches!(result, Err(ExtractError::InvalidArchive(_))));
    }

    #[test]
    fn test_read_entries_selector() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in [
            ("Payload/A.app/Info.plist", "a"),
            ("Payload/A.app/icon.png", "b"),
            ("Payload/A.app/binary", "c"),
        ] {
            writer
                .start_file(name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        let cursor = writer.finish().unwrap();

        let mut reader = ArchiveReader::open(cursor).unwrap();
        let selected = reader
            .read_entries(|name| name.ends_with(".plist") || name.ends_with(".png"))
            .unwrap();
        assert_eq!(selected.len(), 2);
        assert_eq!(selected["Payload/A.app/icon.png"], b"b");
    }

    #[test]
    fn test_decompression_bound_enforced() {
        let mut reader = ArchiveReader::open(create_test_zip()).unwrap();
        let result = reader.read_entry_bounded(FILE_NAME, 4);
        assert!(matches!(result, Err(ExtractError::InvalidArchive(_))));
    }
}
