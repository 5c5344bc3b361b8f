//! Archive writer.
//!
//! Serializes one block's rows to CSV and packages them with the manifest
//! into a deflate-compressed ZIP.

use crate::manifest::{ArchiveManifest, FileEntry, MANIFEST_FILE_NAME};
use crate::tabular::encode_record;
use crate::{BundleError, Result};
use oa_common::{BlockRange, MeasureType, Observation};
use std::fs::File;
use std::io::{Cursor, Seek, Write};
use std::path::Path;
use tracing::{debug, info};
use zip::write::{FileOptions, ZipWriter};
use zip::{CompressionMethod, DateTime};

/// Builder for one block archive.
pub struct ArchiveWriter {
    manifest: ArchiveManifest,
    data: String,
    rows: u64,
    last_id: Option<i64>,
}

impl ArchiveWriter {
    /// Create a writer for `range` of `measure_type`. The CSV header is
    /// written immediately so even an empty block yields a well-formed file.
    pub fn new(measure_type: MeasureType, range: BlockRange) -> Self {
        Self {
            manifest: ArchiveManifest::new(measure_type, range),
            data: encode_record(measure_type.columns()),
            rows: 0,
            last_id: None,
        }
    }

    /// Set the schema revision recorded in the manifest.
    pub fn with_schema_revision(mut self, revision: impl Into<String>) -> Self {
        self.manifest = self.manifest.with_schema_revision(revision);
        self
    }

    /// Set the tool version recorded in the manifest.
    pub fn with_tool_version(mut self, version: impl Into<String>) -> Self {
        self.manifest = self.manifest.with_tool_version(version);
        self
    }

    /// Append one observation.
    ///
    /// Rows must be of the archive's measure type, inside its range, and in
    /// strictly ascending id order.
    pub fn add_observation(&mut self, obs: &Observation) -> Result<()> {
        if obs.measure_type() != self.manifest.measure_type {
            return Err(BundleError::RowRejected(format!(
                "{} observation in {} archive",
                obs.measure_type(),
                self.manifest.measure_type
            )));
        }

        let id = obs
            .id()
            .ok_or_else(|| BundleError::RowRejected("observation has no id".to_string()))?;
        if !self.manifest.range.contains(id) {
            return Err(BundleError::RowRejected(format!(
                "id {} outside {}",
                id, self.manifest.range
            )));
        }
        if self.last_id.is_some_and(|last| id <= last) {
            return Err(BundleError::RowRejected(format!(
                "id {} is not ascending",
                id
            )));
        }

        self.data.push_str(&encode_record(obs.to_record().as_slice()));
        let created = obs.created();
        if self.manifest.newest_created.map_or(true, |newest| created > newest) {
            self.manifest.newest_created = Some(created);
        }
        self.rows += 1;
        self.last_id = Some(id);
        Ok(())
    }

    /// Append many observations.
    pub fn add_observations<'a, I>(&mut self, observations: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Observation>,
    {
        for obs in observations {
            self.add_observation(obs)?;
        }
        Ok(())
    }

    /// Get the current manifest (for inspection before writing).
    pub fn manifest(&self) -> &ArchiveManifest {
        &self.manifest
    }

    /// Number of rows added so far.
    pub fn row_count(&self) -> u64 {
        self.rows
    }

    /// Write the archive to a file.
    pub fn write(self, path: &Path) -> Result<ArchiveManifest> {
        let file = File::create(path)?;
        let (file, manifest) = self.write_zip(file)?;
        file.sync_all()?;

        info!(
            path = %path.display(),
            measure_type = %manifest.measure_type,
            range = %manifest.range,
            rows = manifest.row_count,
            "Archive written"
        );

        Ok(manifest)
    }

    /// Write the archive to a byte vector (for in-memory use).
    pub fn write_to_vec(self) -> Result<(Vec<u8>, ArchiveManifest)> {
        let (cursor, manifest) = self.write_zip(Cursor::new(Vec::new()))?;
        let bytes = cursor.into_inner();

        debug!(
            compressed_bytes = bytes.len(),
            rows = manifest.row_count,
            "Archive written to memory"
        );

        Ok((bytes, manifest))
    }

    fn write_zip<W: Write + Seek>(mut self, sink: W) -> Result<(W, ArchiveManifest)> {
        let data = self.data.into_bytes();
        self.manifest.row_count = self.rows;
        self.manifest.data_file = FileEntry::describe(self.manifest.data_file.path.clone(), &data);

        let manifest_json = self.manifest.to_json()?;

        // Fixed entry timestamps: the same rows always give the same bytes
        let mut zip = ZipWriter::new(sink);
        let options: FileOptions<'_, ()> = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(DateTime::default())
            .unix_permissions(0o644);

        // Manifest first so readers can stream it before the data
        zip.start_file(MANIFEST_FILE_NAME, options)?;
        zip.write_all(manifest_json.as_bytes())?;

        zip.start_file(self.manifest.data_file.path.as_str(), options)?;
        zip.write_all(&data)?;

        let sink = zip.finish()?;
        Ok((sink, self.manifest))
    }
}
