//! Archive reader with integrity verification.

use crate::manifest::{ArchiveManifest, MANIFEST_FILE_NAME};
use crate::tabular::decode;
use crate::{sha256_hex, BundleError, Result, ARCHIVE_FORMAT_VERSION};
use oa_common::{BlockRange, MeasureType};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::Path;
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// Result of a full archive verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveSummary {
    pub measure_type: MeasureType,
    pub range: BlockRange,
    pub schema_revision: String,
    pub row_count: u64,
    pub first_id: Option<i64>,
    pub last_id: Option<i64>,
}

/// Reader for observation archives.
pub struct ArchiveReader<R: Read + Seek> {
    manifest: ArchiveManifest,
    archive: ZipArchive<R>,
}

impl ArchiveReader<File> {
    /// Open an archive from a file path.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }
}

impl ArchiveReader<Cursor<Vec<u8>>> {
    /// Open an archive from bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_reader(Cursor::new(bytes))
    }
}

impl<R: Read + Seek> ArchiveReader<R> {
    /// Create a reader from any Read + Seek source.
    ///
    /// Fails if the container holds anything besides the manifest and the
    /// data file the manifest names.
    pub fn from_reader(reader: R) -> Result<Self> {
        let mut archive = ZipArchive::new(reader)?;

        let manifest = Self::read_manifest(&mut archive)?;
        manifest.validate()?;

        for name in archive.file_names() {
            if name != MANIFEST_FILE_NAME && name != manifest.data_file.path {
                return Err(BundleError::UnexpectedEntry(name.to_string()));
            }
        }
        if archive.len() != 2 {
            return Err(BundleError::MissingFile(manifest.data_file.path.clone()));
        }

        info!(
            measure_type = %manifest.measure_type,
            range = %manifest.range,
            rows = manifest.row_count,
            "Archive opened"
        );

        Ok(Self { manifest, archive })
    }

    fn read_manifest(archive: &mut ZipArchive<R>) -> Result<ArchiveManifest> {
        let mut manifest_file = archive
            .by_name(MANIFEST_FILE_NAME)
            .map_err(|_| BundleError::MissingFile(MANIFEST_FILE_NAME.to_string()))?;

        let mut json = String::new();
        manifest_file.read_to_string(&mut json)?;

        let manifest = ArchiveManifest::from_json(&json)?;

        if manifest.format_version != ARCHIVE_FORMAT_VERSION {
            warn!(
                format_version = %manifest.format_version,
                supported = %ARCHIVE_FORMAT_VERSION,
                "Archive version mismatch"
            );
        }

        Ok(manifest)
    }

    /// Get the manifest.
    pub fn manifest(&self) -> &ArchiveManifest {
        &self.manifest
    }

    /// Read the data file without verification.
    pub fn read_data_raw(&mut self) -> Result<Vec<u8>> {
        let path = self.manifest.data_file.path.clone();
        let mut file = self
            .archive
            .by_name(&path)
            .map_err(|_| BundleError::MissingFile(path.clone()))?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        debug!(path = %path, bytes = data.len(), "Read data file (unverified)");
        Ok(data)
    }

    /// Read the data file, checking it against the manifest checksum.
    pub fn read_data_verified(&mut self) -> Result<Vec<u8>> {
        let data = self.read_data_raw()?;
        let actual = sha256_hex(&data);
        if actual != self.manifest.data_file.sha256 {
            return Err(BundleError::ChecksumMismatch {
                path: self.manifest.data_file.path.clone(),
                expected: self.manifest.data_file.sha256.clone(),
                actual,
            });
        }
        Ok(data)
    }

    /// Parse the verified data file into records, header excluded.
    ///
    /// The header must match the measure type's exported columns exactly.
    pub fn records(&mut self) -> Result<Vec<Vec<String>>> {
        let data = self.read_data_verified()?;
        let text = String::from_utf8(data)
            .map_err(|e| BundleError::MalformedData(format!("data file is not UTF-8: {}", e)))?;

        let mut records = decode(&text)?.into_iter();
        let header = records
            .next()
            .ok_or_else(|| BundleError::MalformedData("missing header line".to_string()))?;

        let expected = self.manifest.measure_type.columns();
        if header.len() != expected.len() || header.iter().zip(expected).any(|(a, b)| a != b) {
            return Err(BundleError::MalformedData(format!(
                "header {:?} does not match {} columns",
                header, self.manifest.measure_type
            )));
        }

        let rows: Vec<Vec<String>> = records.collect();
        for (i, row) in rows.iter().enumerate() {
            if row.len() != expected.len() {
                return Err(BundleError::MalformedData(format!(
                    "row {} has {} fields, expected {}",
                    i + 1,
                    row.len(),
                    expected.len()
                )));
            }
        }
        Ok(rows)
    }

    /// Verify checksum, header, row count, and that every id lies inside the
    /// block range in ascending order.
    pub fn verify(&mut self) -> Result<ArchiveSummary> {
        let rows = self.records()?;

        if rows.len() as u64 != self.manifest.row_count {
            return Err(BundleError::MalformedData(format!(
                "manifest declares {} rows, data file has {}",
                self.manifest.row_count,
                rows.len()
            )));
        }

        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row[0]
                .parse()
                .map_err(|_| BundleError::MalformedData(format!("invalid id '{}'", row[0])))?;
            if !self.manifest.range.contains(id) {
                return Err(BundleError::MalformedData(format!(
                    "id {} outside {}",
                    id, self.manifest.range
                )));
            }
            if ids.last().is_some_and(|last| id <= *last) {
                return Err(BundleError::MalformedData(format!(
                    "id {} is not ascending",
                    id
                )));
            }
            ids.push(id);
        }

        debug!(rows = ids.len(), "Archive verified");

        Ok(ArchiveSummary {
            measure_type: self.manifest.measure_type,
            range: self.manifest.range,
            schema_revision: self.manifest.schema_revision.clone(),
            row_count: ids.len() as u64,
            first_id: ids.first().copied(),
            last_id: ids.last().copied(),
        })
    }
}
