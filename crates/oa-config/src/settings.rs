//! Typed configuration sections.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) yields a usable configuration. Unknown keys are rejected to catch
//! typos early.

use crate::validate::ValidationError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete archival pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub archive: ArchiveConfig,
    pub schedule: ScheduleConfig,
    pub write: WriteConfig,
    pub sweep: SweepConfig,
    pub monitoring: MonitoringConfig,
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ValidationError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ValidationError::IoError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        Self::parse_toml(&content)
    }

    /// Parse settings from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self, ValidationError> {
        toml::from_str(content)
            .map_err(|e| ValidationError::ParseError(format!("Invalid TOML: {}", e)))
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, ValidationError> {
        toml::to_string_pretty(self)
            .map_err(|e| ValidationError::ParseError(format!("Cannot render TOML: {}", e)))
    }
}

/// `[database]`: the observation store and Block Ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// SQLite database file.
    pub path: PathBuf,

    /// How long a writer waits on a locked database before failing.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("obsarchive.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

/// Which Archive Store implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveBackend {
    /// Directory-backed bucket under `root`.
    #[default]
    Fs,
    /// S3-compatible HTTP bucket at `endpoint`.
    Http,
}

impl std::fmt::Display for ArchiveBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveBackend::Fs => write!(f, "fs"),
            ArchiveBackend::Http => write!(f, "http"),
        }
    }
}

/// `[archive]`: where archives go and how they are staged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArchiveConfig {
    pub backend: ArchiveBackend,

    /// Root directory for the `fs` backend.
    pub root: PathBuf,

    /// Bucket name.
    pub bucket: String,

    /// Base URL for the `http` backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Name of the environment variable holding the bearer token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    /// Local directory archives are written to before upload.
    /// Defaults to the system temp directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,

    /// Remove the local archive after a successful upload.
    pub cleanup_local_file: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            backend: ArchiveBackend::Fs,
            root: PathBuf::from("archive"),
            bucket: "obsarchive".to_string(),
            endpoint: None,
            token_env: None,
            work_dir: None,
            cleanup_local_file: true,
        }
    }
}

impl ArchiveConfig {
    /// Effective staging directory.
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// `[schedule]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleConfig {
    /// Ids per block.
    pub batch: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { batch: 100 }
    }
}

/// `[write]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WriteConfig {
    /// Maximum blocks archived per invocation.
    pub limit: u32,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self { limit: 100 }
    }
}

/// `[sweep]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweepConfig {
    /// Maximum blocks examined per invocation.
    pub batch: u32,

    /// Retention window in days.
    pub days_old: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            batch: 100,
            days_old: 7,
        }
    }
}

/// `[monitoring]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitoringConfig {
    /// Directory for `archive_events_<timestamp>.jsonl` files. Unset disables
    /// event persistence; tracing events are emitted either way.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_log_dir: Option<PathBuf>,
}
