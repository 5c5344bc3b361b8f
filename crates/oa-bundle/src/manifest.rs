//! Archive manifest types and serialization.
//!
//! The manifest is the archive's metadata file. It records:
//! - Archive format version and observation schema revision at write time
//! - The measure type and block range the archive covers
//! - The data file with its SHA-256 checksum and row count

use chrono::{DateTime, Utc};
use oa_common::{BlockRange, MeasureType, SCHEMA_REVISION};
use serde::{Deserialize, Serialize};

use crate::sha256_hex;

/// Current archive format version.
pub const ARCHIVE_FORMAT_VERSION: &str = "1.0.0";

/// Manifest file name within the archive.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Archive manifest describing one block's export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveManifest {
    /// Archive container format version.
    pub format_version: String,

    /// Observation table layout revision in effect at write time.
    pub schema_revision: String,

    /// Creation time of the newest row, `None` for an empty block.
    ///
    /// Archive bytes depend only on the block's rows, so two writers
    /// exporting the same block produce the same object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newest_created: Option<DateTime<Utc>>,

    /// Measure kind of every row in the archive.
    pub measure_type: MeasureType,

    /// Block range `[start_id, end_id)` the archive covers.
    pub range: BlockRange,

    /// Number of data rows (excluding the header line).
    pub row_count: u64,

    /// The tabular data file.
    pub data_file: FileEntry,

    /// Version of the tool that wrote the archive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_version: Option<String>,
}

impl ArchiveManifest {
    /// Create a manifest for a block; the data file entry is filled in on write.
    pub fn new(measure_type: MeasureType, range: BlockRange) -> Self {
        Self {
            format_version: ARCHIVE_FORMAT_VERSION.to_string(),
            schema_revision: SCHEMA_REVISION.to_string(),
            newest_created: None,
            measure_type,
            range,
            row_count: 0,
            data_file: FileEntry::new(measure_type.data_file_name(), String::new(), 0),
            tool_version: None,
        }
    }

    /// Set the schema revision.
    pub fn with_schema_revision(mut self, revision: impl Into<String>) -> Self {
        self.schema_revision = revision.into();
        self
    }

    /// Set the tool version.
    pub fn with_tool_version(mut self, version: impl Into<String>) -> Self {
        self.tool_version = Some(version.into());
        self
    }

    /// Validate the manifest structure.
    pub fn validate(&self) -> crate::Result<()> {
        if self.format_version != ARCHIVE_FORMAT_VERSION {
            return Err(crate::BundleError::UnsupportedVersion {
                version: self.format_version.clone(),
                supported: ARCHIVE_FORMAT_VERSION.to_string(),
            });
        }

        if self.schema_revision.is_empty() {
            return Err(crate::BundleError::CorruptedManifest(
                "schema_revision is empty".to_string(),
            ));
        }

        if self.range.start_id >= self.range.end_id {
            return Err(crate::BundleError::CorruptedManifest(format!(
                "empty range {}",
                self.range
            )));
        }

        if self.row_count > self.range.len() as u64 {
            return Err(crate::BundleError::CorruptedManifest(format!(
                "row_count {} exceeds range size {}",
                self.row_count,
                self.range.len()
            )));
        }

        let expected_name = self.measure_type.data_file_name();
        if self.data_file.path != expected_name {
            return Err(crate::BundleError::CorruptedManifest(format!(
                "data file '{}' does not match measure type {} (expected '{}')",
                self.data_file.path, self.measure_type, expected_name
            )));
        }

        if self.data_file.sha256.len() != 64 {
            return Err(crate::BundleError::CorruptedManifest(format!(
                "file '{}' has invalid checksum length",
                self.data_file.path
            )));
        }

        Ok(())
    }

    /// Serialize to JSON with consistent formatting.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// File entry in the manifest with checksum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path within the archive.
    pub path: String,

    /// SHA-256 checksum (64 hex characters).
    pub sha256: String,

    /// Size in bytes.
    pub bytes: u64,
}

impl FileEntry {
    /// Create a new file entry.
    pub fn new(path: impl Into<String>, sha256: impl Into<String>, bytes: u64) -> Self {
        Self {
            path: path.into(),
            sha256: sha256.into(),
            bytes,
        }
    }

    /// Create an entry describing `data`.
    pub fn describe(path: impl Into<String>, data: &[u8]) -> Self {
        Self::new(path, sha256_hex(data), data.len() as u64)
    }

    /// Verify the checksum against data.
    pub fn verify(&self, data: &[u8]) -> bool {
        sha256_hex(data) == self.sha256
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> ArchiveManifest {
        let mut manifest =
            ArchiveManifest::new(MeasureType::Cell, BlockRange::new(100, 110).unwrap());
        manifest.data_file = FileEntry::describe("cell_measure.csv", b"id\n");
        manifest
    }

    #[test]
    fn test_manifest_new() {
        let manifest = ArchiveManifest::new(MeasureType::Wifi, BlockRange::new(1, 2).unwrap());

        assert_eq!(manifest.format_version, ARCHIVE_FORMAT_VERSION);
        assert_eq!(manifest.schema_revision, SCHEMA_REVISION);
        assert_eq!(manifest.data_file.path, "wifi_measure.csv");
        assert_eq!(manifest.row_count, 0);
    }

    #[test]
    fn test_manifest_validate_success() {
        assert!(manifest().validate().is_ok());
    }

    #[test]
    fn test_manifest_validate_unknown_version() {
        let mut manifest = manifest();
        manifest.format_version = "9.9.9".to_string();
        assert!(matches!(
            manifest.validate(),
            Err(crate::BundleError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_manifest_validate_row_count_exceeds_range() {
        let mut manifest = manifest();
        manifest.row_count = 11;
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_manifest_validate_wrong_data_file() {
        let mut manifest = manifest();
        manifest.data_file.path = "wifi_measure.csv".to_string();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_manifest_validate_invalid_checksum() {
        let mut manifest = manifest();
        manifest.data_file.sha256 = "invalid".to_string();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_manifest_json_roundtrip() {
        let manifest = manifest().with_tool_version("0.1.0");

        let json = manifest.to_json().unwrap();
        let parsed = ArchiveManifest::from_json(&json).unwrap();

        assert_eq!(parsed.measure_type, MeasureType::Cell);
        assert_eq!(parsed.range, manifest.range);
        assert_eq!(parsed.data_file.sha256, manifest.data_file.sha256);
        assert_eq!(parsed.tool_version.as_deref(), Some("0.1.0"));
    }

    #[test]
    fn test_file_entry_verify() {
        let entry = FileEntry::describe("cell_measure.csv", b"test data");

        assert_eq!(entry.bytes, 9);
        assert!(entry.verify(b"test data"));
        assert!(!entry.verify(b"different data"));
    }
}
