//! Ledger status and local archive inspection.

use oa_bundle::{ArchiveManifest, ArchiveReader, ArchiveSummary};
use oa_common::{MeasureType, Result};
use oa_store::ObservationStore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Ledger and table summary for one measure kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindStatus {
    pub measure_type: MeasureType,
    pub pending_blocks: u64,
    pub uploaded_blocks: u64,
    pub archived_blocks: u64,
    /// First id the next scheduled block may start at.
    pub next_start_id: i64,
    /// Rows still in the observation table.
    pub live_observations: u64,
    /// Rows not yet covered by any block.
    pub unscheduled_observations: u64,
}

pub fn kind_status(store: &ObservationStore, kind: MeasureType) -> Result<KindStatus> {
    let counts = store.ledger_counts(kind)?;
    let next_start_id = store.max_end_id(kind)?;
    Ok(KindStatus {
        measure_type: kind,
        pending_blocks: counts.pending,
        uploaded_blocks: counts.uploaded,
        archived_blocks: counts.archived,
        next_start_id,
        live_observations: store.count_observations(kind)?,
        unscheduled_observations: store.count_from(kind, next_start_id)?,
    })
}

/// Result of opening and verifying a local archive file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectReport {
    pub path: PathBuf,
    /// SHA-256 of the whole file, comparable with the ledger's `archive_sha`.
    pub sha256: String,
    pub bytes: u64,
    pub manifest: ArchiveManifest,
    pub summary: ArchiveSummary,
}

/// Open `path`, check its manifest, data checksum and rows.
pub fn inspect_archive(path: &Path) -> Result<InspectReport> {
    let sha256 = oa_bundle::sha256_file(path)?;
    let bytes = std::fs::metadata(path)?.len();
    let mut reader = ArchiveReader::open(path)?;
    let summary = reader.verify()?;
    Ok(InspectReport {
        path: path.to_path_buf(),
        sha256,
        bytes,
        manifest: reader.manifest().clone(),
        summary,
    })
}
