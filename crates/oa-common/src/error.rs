//! Error types for the archival pipeline.
//!
//! Every error carries:
//! - A stable numeric code for machine parsing
//! - A category for grouping in monitoring
//! - A severity, so integrity failures page louder than transient ones
//! - A recoverability hint for the task executor
//!
//! Errors serialize to structured JSON for the monitoring channel:
//! ```json
//! {
//!   "code": 40,
//!   "category": "integrity",
//!   "severity": "critical",
//!   "message": "checksum mismatch for 'backups/cell_000000000001_000000000011.zip': ...",
//!   "recoverable": false
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration and argument errors.
    Config,
    /// Observation store / ledger database errors.
    Store,
    /// Archive store transport or authentication errors.
    Archive,
    /// Archive content does not match what the ledger recorded.
    Integrity,
    /// Concurrent scheduling collisions.
    Scheduling,
    /// Local file I/O and serialization errors.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Store => write!(f, "store"),
            ErrorCategory::Archive => write!(f, "archive"),
            ErrorCategory::Integrity => write!(f, "integrity"),
            ErrorCategory::Scheduling => write!(f, "scheduling"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// How loudly an error should be surfaced to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Unified error type for the archival pipeline.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid block range [{start_id}, {end_id})")]
    InvalidRange { start_id: i64, end_id: i64 },

    // Store errors (20-29)
    #[error("observation store error: {0}")]
    Store(String),

    #[error("block {block_id} not found")]
    BlockNotFound { block_id: i64 },

    // Archive store errors (30-39)
    #[error("archive store error: {0}")]
    Archive(String),

    #[error("archive missing from store: {key}")]
    ArchiveMissing { key: String },

    // Integrity errors (40-49)
    #[error("checksum mismatch for '{key}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("corrupted archive: {0}")]
    CorruptedArchive(String),

    // Scheduling errors (50-59)
    #[error("scheduling conflict: {measure_type} block starting at {start_id} overlaps an existing block")]
    SchedulingConflict { measure_type: String, start_id: i64 },

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("archive format error: {0}")]
    Bundle(String),
}

impl Error {
    /// Returns the stable error code.
    ///
    /// - 10-19: Configuration errors
    /// - 20-29: Store errors
    /// - 30-39: Archive store errors
    /// - 40-49: Integrity errors
    /// - 50-59: Scheduling errors
    /// - 60-69: I/O errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidArgument(_) => 11,
            Error::InvalidRange { .. } => 12,
            Error::Store(_) => 20,
            Error::BlockNotFound { .. } => 21,
            Error::Archive(_) => 30,
            Error::ArchiveMissing { .. } => 31,
            Error::ChecksumMismatch { .. } => 40,
            Error::CorruptedArchive(_) => 41,
            Error::SchedulingConflict { .. } => 50,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
            Error::Bundle(_) => 62,
        }
    }

    /// Returns the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::InvalidArgument(_) | Error::InvalidRange { .. } => {
                ErrorCategory::Config
            }
            Error::Store(_) | Error::BlockNotFound { .. } => ErrorCategory::Store,
            Error::Archive(_) | Error::ArchiveMissing { .. } => ErrorCategory::Archive,
            Error::ChecksumMismatch { .. } | Error::CorruptedArchive(_) => {
                ErrorCategory::Integrity
            }
            Error::SchedulingConflict { .. } => ErrorCategory::Scheduling,
            Error::Io(_) | Error::Json(_) | Error::Bundle(_) => ErrorCategory::Io,
        }
    }

    /// Returns how loudly this error should be surfaced.
    pub fn severity(&self) -> Severity {
        match self.category() {
            ErrorCategory::Integrity => Severity::Critical,
            ErrorCategory::Scheduling => Severity::Warning,
            ErrorCategory::Archive => match self {
                Error::ArchiveMissing { .. } => Severity::Warning,
                _ => Severity::Error,
            },
            _ => Severity::Error,
        }
    }

    /// Returns whether rerunning the invocation may succeed.
    ///
    /// Integrity failures need an operator; they are never retried into deletion.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Config(_) | Error::InvalidArgument(_) | Error::InvalidRange { .. } => false,
            Error::Store(_) => true,
            Error::BlockNotFound { .. } => false,
            Error::Archive(_) => true,
            Error::ArchiveMissing { .. } => true,
            Error::ChecksumMismatch { .. } | Error::CorruptedArchive(_) => false,
            Error::SchedulingConflict { .. } => true,
            Error::Io(_) => true,
            Error::Json(_) | Error::Bundle(_) => true,
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Config(_) => "Configuration Error",
            Error::InvalidArgument(_) => "Invalid Argument",
            Error::InvalidRange { .. } => "Invalid Block Range",
            Error::Store(_) => "Observation Store Error",
            Error::BlockNotFound { .. } => "Block Not Found",
            Error::Archive(_) => "Archive Store Error",
            Error::ArchiveMissing { .. } => "Archive Missing",
            Error::ChecksumMismatch { .. } => "Archive Checksum Mismatch",
            Error::CorruptedArchive(_) => "Corrupted Archive",
            Error::SchedulingConflict { .. } => "Scheduling Conflict",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Error",
            Error::Bundle(_) => "Archive Format Error",
        }
    }
}

/// Structured error for the monitoring channel and JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code.
    pub code: u32,

    /// Error category for grouping.
    pub category: ErrorCategory,

    /// Severity for alert routing.
    pub severity: Severity,

    /// Human-readable error message.
    pub message: String,

    /// Whether rerunning may resolve the error.
    pub recoverable: bool,

    /// Additional structured context (e.g., key, block id).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let mut context = HashMap::new();

        match err {
            Error::InvalidRange { start_id, end_id } => {
                context.insert("start_id".to_string(), serde_json::json!(start_id));
                context.insert("end_id".to_string(), serde_json::json!(end_id));
            }
            Error::BlockNotFound { block_id } => {
                context.insert("block_id".to_string(), serde_json::json!(block_id));
            }
            Error::ArchiveMissing { key } => {
                context.insert("key".to_string(), serde_json::json!(key));
            }
            Error::ChecksumMismatch {
                key,
                expected,
                actual,
            } => {
                context.insert("key".to_string(), serde_json::json!(key));
                context.insert("expected_sha".to_string(), serde_json::json!(expected));
                context.insert("actual_sha".to_string(), serde_json::json!(actual));
            }
            Error::SchedulingConflict {
                measure_type,
                start_id,
            } => {
                context.insert("measure_type".to_string(), serde_json::json!(measure_type));
                context.insert("start_id".to_string(), serde_json::json!(start_id));
            }
            _ => {}
        }

        StructuredError {
            code: err.code(),
            category: err.category(),
            severity: err.severity(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            context,
        }
    }
}

impl StructuredError {
    /// Add additional context to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"error":"serialization_failed"}}"#, self.code)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_fall_in_category_ranges() {
        let cases: Vec<(Error, ErrorCategory)> = vec![
            (Error::Config("x".into()), ErrorCategory::Config),
            (Error::Store("x".into()), ErrorCategory::Store),
            (Error::Archive("x".into()), ErrorCategory::Archive),
            (
                Error::ChecksumMismatch {
                    key: "k".into(),
                    expected: "a".into(),
                    actual: "b".into(),
                },
                ErrorCategory::Integrity,
            ),
            (
                Error::SchedulingConflict {
                    measure_type: "cell".into(),
                    start_id: 1,
                },
                ErrorCategory::Scheduling,
            ),
            (Error::Bundle("x".into()), ErrorCategory::Io),
        ];

        for (err, category) in cases {
            assert_eq!(err.category(), category, "{err}");
            let decade = err.code() / 10;
            let expected = match category {
                ErrorCategory::Config => 1,
                ErrorCategory::Store => 2,
                ErrorCategory::Archive => 3,
                ErrorCategory::Integrity => 4,
                ErrorCategory::Scheduling => 5,
                ErrorCategory::Io => 6,
            };
            assert_eq!(decade, expected, "{err}");
        }
    }

    #[test]
    fn test_integrity_is_critical_and_not_recoverable() {
        let err = Error::ChecksumMismatch {
            key: "backups/cell_1_2.zip".into(),
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert_eq!(err.severity(), Severity::Critical);
        assert!(!err.is_recoverable());
        assert!(err.severity() > Error::Archive("timeout".into()).severity());
    }

    #[test]
    fn test_transient_archive_error_is_recoverable() {
        let err = Error::Archive("connection reset".into());
        assert!(err.is_recoverable());
        assert_eq!(err.severity(), Severity::Error);
    }

    #[test]
    fn test_structured_error_context() {
        let err = Error::ChecksumMismatch {
            key: "backups/wifi_1_2.zip".into(),
            expected: "aa".into(),
            actual: "bb".into(),
        };
        let structured = StructuredError::from(&err).with_context("block_id", 9);
        assert_eq!(structured.code, 40);
        assert_eq!(structured.context["key"], "backups/wifi_1_2.zip");
        assert_eq!(structured.context["block_id"], 9);

        let json = structured.to_json();
        assert!(json.contains("\"severity\":\"critical\""));
        assert!(json.contains("\"category\":\"integrity\""));
    }
}
