//! Archive Store clients.
//!
//! An archive store holds one object per uploaded block under a key of the
//! form `backups/<kind>_<start:012>_<end:012>.zip`. Two backends exist:
//!
//! - [`FsArchiveStore`]: a directory acting as the bucket.
//! - [`HttpArchiveStore`]: an S3-compatible HTTP endpoint.
//!
//! `exists` is the only verification primitive the sweeper relies on: it must
//! answer `Ok(false)` for an absent object, fail with
//! [`ArchiveStoreError::ChecksumMismatch`] when the stored bytes do not hash to
//! the expected value, and fail otherwise only on genuine transport problems.

mod fs;
mod http;

pub use fs::FsArchiveStore;
pub use http::{HttpArchiveStore, SHA256_HEADER};

use oa_common::{BlockRange, MeasureType};
use oa_config::{ArchiveBackend, ArchiveConfig};
use std::path::Path;
use thiserror::Error;

/// Prefix shared by every archive key.
pub const KEY_PREFIX: &str = "backups/";

/// Errors reported by archive store backends.
#[derive(Error, Debug)]
pub enum ArchiveStoreError {
    #[error("archive store I/O error for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport error for '{key}': {message}")]
    Transport { key: String, message: String },

    #[error("archive store rejected credentials for '{key}' (HTTP {status})")]
    Auth { key: String, status: u16 },

    #[error("archive store answered HTTP {status} for '{key}'")]
    Status { key: String, status: u16 },

    #[error("checksum mismatch for '{key}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    /// The object exists but carries nothing to compare the checksum with.
    #[error("cannot verify '{key}': {message}")]
    Unverifiable { key: String, message: String },

    #[error("invalid archive key '{0}'")]
    InvalidKey(String),

    #[error("archive store misconfigured: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ArchiveStoreError>;

impl ArchiveStoreError {
    /// True when the stored object contradicts the recorded checksum.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, ArchiveStoreError::ChecksumMismatch { .. })
    }
}

impl From<ArchiveStoreError> for oa_common::Error {
    fn from(err: ArchiveStoreError) -> Self {
        match err {
            ArchiveStoreError::ChecksumMismatch {
                key,
                expected,
                actual,
            } => oa_common::Error::ChecksumMismatch {
                key,
                expected,
                actual,
            },
            ArchiveStoreError::Config(message) => oa_common::Error::Config(message),
            other => oa_common::Error::Archive(other.to_string()),
        }
    }
}

/// Object storage for block archives.
pub trait ArchiveStore {
    /// Upload the file at `path` under `key`.
    ///
    /// Either the whole object is stored or an error is returned.
    fn store(&self, key: &str, path: &Path) -> Result<()>;

    /// Check that `key` exists, and when `expected_sha` is given, that the
    /// stored bytes hash to it.
    fn exists(&self, key: &str, expected_sha: Option<&str>) -> Result<bool>;

    /// Short human-readable location, for logs and status output.
    fn describe(&self) -> String;
}

/// Storage key for a block archive.
pub fn archive_key(kind: MeasureType, range: BlockRange) -> String {
    format!(
        "{}{}_{:012}_{:012}.zip",
        KEY_PREFIX,
        kind.marker(),
        range.start_id,
        range.end_id
    )
}

/// Inverse of [`archive_key`].
pub fn parse_archive_key(key: &str) -> Option<(MeasureType, BlockRange)> {
    let stem = key.strip_prefix(KEY_PREFIX)?.strip_suffix(".zip")?;
    let mut parts = stem.split('_');
    let marker = parts.next()?;
    let start: i64 = parts.next()?.parse().ok()?;
    let end: i64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let kind = MeasureType::ALL
        .into_iter()
        .find(|kind| kind.marker() == marker)?;
    let range = BlockRange::new(start, end).ok()?;
    Some((kind, range))
}

/// Reject keys that could escape the bucket.
pub(crate) fn check_key(key: &str) -> Result<()> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(ArchiveStoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Build the configured archive store backend.
pub fn from_config(config: &ArchiveConfig) -> Result<Box<dyn ArchiveStore>> {
    match config.backend {
        ArchiveBackend::Fs => Ok(Box::new(FsArchiveStore::new(
            &config.root,
            &config.bucket,
        ))),
        ArchiveBackend::Http => {
            let endpoint = config.endpoint.as_deref().ok_or_else(|| {
                ArchiveStoreError::Config("archive.endpoint is required for the http backend".into())
            })?;
            let token = match config.token_env.as_deref() {
                Some(var) => Some(std::env::var(var).map_err(|_| {
                    ArchiveStoreError::Config(format!(
                        "archive.token_env names '{}' but it is not set",
                        var
                    ))
                })?),
                None => None,
            };
            Ok(Box::new(HttpArchiveStore::new(endpoint, &config.bucket, token)))
        }
    }
}
