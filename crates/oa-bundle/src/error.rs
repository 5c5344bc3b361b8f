//! Error types for archive operations.

use thiserror::Error;

/// Errors that can occur while writing or reading an archive.
#[derive(Error, Debug)]
pub enum BundleError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// ZIP archive error
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Checksum verification failed
    #[error("checksum mismatch for '{path}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    /// Missing required file in archive
    #[error("missing required file: {0}")]
    MissingFile(String),

    /// Archive holds entries other than the manifest and data file
    #[error("unexpected archive entry: {0}")]
    UnexpectedEntry(String),

    /// Unknown or unsupported archive format version
    #[error("unsupported archive version: {version} (supported: {supported})")]
    UnsupportedVersion { version: String, supported: String },

    /// Corrupted manifest
    #[error("corrupted manifest: {0}")]
    CorruptedManifest(String),

    /// Data file does not parse or does not match the manifest
    #[error("malformed data file: {0}")]
    MalformedData(String),

    /// Row does not belong in this archive
    #[error("row rejected: {0}")]
    RowRejected(String),
}

impl BundleError {
    /// True when the archive content contradicts its own manifest.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            BundleError::ChecksumMismatch { .. }
                | BundleError::MalformedData(_)
                | BundleError::CorruptedManifest(_)
                | BundleError::UnexpectedEntry(_)
                | BundleError::MissingFile(_)
        )
    }
}

impl From<BundleError> for oa_common::Error {
    fn from(err: BundleError) -> Self {
        match err {
            BundleError::Io(e) => oa_common::Error::Io(e),
            other if other.is_integrity_failure() => {
                oa_common::Error::CorruptedArchive(other.to_string())
            }
            other => oa_common::Error::Bundle(other.to_string()),
        }
    }
}

/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, BundleError>;
