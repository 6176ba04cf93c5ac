//! Error taxonomy for extraction and resolution.
//!
//! Parse-level failures (`InvalidArchive`, `MalformedPlist`,
//! `InvalidAppContent`) are deterministic functions of the input bytes and
//! are never worth retrying. `ExternalTool` is the one class a caller may
//! reasonably retry, since a subprocess can fail transiently. I/O errors
//! are kept distinct so callers can tell a broken file apart from a broken
//! disk.

use thiserror::Error;

/// Errors surfaced by the extraction and resolution engine.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// The ZIP structure is unreadable (absent end-of-central-directory
    /// signature, inconsistent entries). Distinguishable from "entry not
    /// found" and from I/O errors because callers probe file validity
    /// with it.
    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    /// A property list failed to decode.
    #[error("malformed plist in `{entry}`: {reason}")]
    MalformedPlist {
        /// Archive entry (or file) the plist came from.
        entry: String,
        /// What the decoder rejected.
        reason: String,
    },

    /// A required identity field is missing after a successful parse.
    #[error("invalid app content: {0}")]
    InvalidAppContent(String),

    /// An external tool exited non-zero, timed out, or violated its
    /// output contract.
    #[error("external tool `{tool}` failed: {reason}")]
    ExternalTool {
        /// Tool name (e.g. `decompile`, `bundletool`).
        tool: String,
        /// Exit status, timeout, or captured stderr tail.
        reason: String,
    },

    /// The dispatcher does not recognize the artifact's file extension.
    #[error("unsupported file: {0}")]
    UnsupportedFile(String),

    /// An I/O error occurred while reading the artifact or scratch files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    /// True for failures that are deterministic in the input bytes and
    /// therefore not worth retrying.
    pub fn is_deterministic(&self) -> bool {
        !matches!(
            self,
            ExtractError::ExternalTool { .. } | ExtractError::Io(_)
        )
    }
}
