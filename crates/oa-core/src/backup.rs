//! Archive writer.
//!
//! For each pending block: read its rows, build the archive in the local work
//! directory, hash it, upload it, then claim the block in the ledger with a
//! compare-and-swap on `s3_key IS NULL`. A failure on one block leaves that
//! block pending for the next run and does not stop the others.

use crate::archive_store::{archive_key, ArchiveStore};
use chrono::{DateTime, Utc};
use oa_bundle::ArchiveWriter;
use oa_common::{Block, BlockRange, Error, MeasureType, Result, StructuredError};
use oa_store::ObservationStore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Options for one writer invocation.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Maximum number of pending blocks handled.
    pub limit: u32,
    /// Directory local archives are staged in.
    pub work_dir: PathBuf,
    /// Remove the local archive once the block is settled.
    pub cleanup_local_file: bool,
}

/// What happened to one block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WriteOutcome {
    /// Archive uploaded and recorded in the ledger.
    Uploaded {
        key: String,
        sha: String,
        rows: u64,
        bytes: u64,
        /// Set when the local copy was kept.
        #[serde(skip_serializing_if = "Option::is_none")]
        local_path: Option<PathBuf>,
    },
    /// Another writer recorded an archive for this block first.
    Conflict { key: String },
    /// Block left pending.
    Failed { error: StructuredError },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockWriteResult {
    pub block_id: i64,
    pub measure_type: MeasureType,
    pub range: BlockRange,
    #[serde(flatten)]
    pub outcome: WriteOutcome,
}

/// Summary of one writer invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteReport {
    pub measure_type: MeasureType,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub archive_store: String,
    pub results: Vec<BlockWriteResult>,
}

impl WriteReport {
    pub fn uploaded(&self) -> usize {
        self.count(|o| matches!(o, WriteOutcome::Uploaded { .. }))
    }

    pub fn conflicts(&self) -> usize {
        self.count(|o| matches!(o, WriteOutcome::Conflict { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, WriteOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&WriteOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Write and upload archives for up to `opts.limit` pending blocks of `kind`.
///
/// Only selecting the pending blocks can fail the whole invocation.
pub fn write_backups(
    store: &ObservationStore,
    archive: &dyn ArchiveStore,
    kind: MeasureType,
    opts: &WriteOptions,
) -> Result<WriteReport> {
    let started_at = Utc::now();
    let blocks = store.pending_blocks(kind, opts.limit)?;
    debug!(
        measure_type = %kind,
        pending = blocks.len(),
        limit = opts.limit,
        "Selected pending blocks"
    );

    let mut results = Vec::with_capacity(blocks.len());
    for block in &blocks {
        let outcome = match write_block(store, archive, block, opts) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(
                    block_id = block.id,
                    measure_type = %kind,
                    range = %block.range,
                    error = %err,
                    "Block archive failed; block stays pending"
                );
                WriteOutcome::Failed {
                    error: StructuredError::from(&err).with_context("block_id", block.id),
                }
            }
        };
        results.push(BlockWriteResult {
            block_id: block.id,
            measure_type: kind,
            range: block.range,
            outcome,
        });
    }

    let report = WriteReport {
        measure_type: kind,
        started_at,
        finished_at: Utc::now(),
        archive_store: archive.describe(),
        results,
    };
    info!(
        measure_type = %kind,
        uploaded = report.uploaded(),
        conflicts = report.conflicts(),
        failed = report.failed(),
        "Write pass finished"
    );
    Ok(report)
}

/// Local staging file for a block. The random suffix keeps two writers on
/// one host from sharing a file.
fn local_archive_path(work_dir: &Path, key: &str) -> PathBuf {
    let name = key.rsplit('/').next().unwrap_or(key);
    let stem = name.strip_suffix(".zip").unwrap_or(name);
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    work_dir.join(format!("{}-{}.zip", stem, &suffix[..8]))
}

fn write_block(
    store: &ObservationStore,
    archive: &dyn ArchiveStore,
    block: &Block,
    opts: &WriteOptions,
) -> Result<WriteOutcome> {
    let key = archive_key(block.measure_type, block.range);
    fs::create_dir_all(&opts.work_dir)?;
    let local = local_archive_path(&opts.work_dir, &key);

    let mut outcome = upload_block(store, archive, block, &key, &local);

    if !opts.cleanup_local_file {
        if let Ok(WriteOutcome::Uploaded { local_path, .. }) = &mut outcome {
            *local_path = Some(local.clone());
            return outcome;
        }
    }
    if let Err(e) = fs::remove_file(&local) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %local.display(), error = %e, "Could not remove local archive");
        }
    }
    outcome
}

fn upload_block(
    store: &ObservationStore,
    archive: &dyn ArchiveStore,
    block: &Block,
    key: &str,
    local: &Path,
) -> Result<WriteOutcome> {
    let rows = store.observations_in_range(block.measure_type, block.range)?;

    let mut writer = ArchiveWriter::new(block.measure_type, block.range)
        .with_tool_version(env!("CARGO_PKG_VERSION"));
    writer.add_observations(&rows)?;
    let manifest = writer.write(local)?;

    let sha = oa_bundle::sha256_file(local)?;
    let bytes = fs::metadata(local)?.len();

    // Another writer may have claimed the block while we exported it
    if store
        .get_block(block.id)?
        .is_some_and(|current| current.s3_key.is_some())
    {
        debug!(block_id = block.id, key, "Block claimed before upload; skipping");
        return Ok(WriteOutcome::Conflict {
            key: key.to_string(),
        });
    }

    archive.store(key, local).map_err(Error::from)?;

    if !store.record_upload(block.id, key, &sha)? {
        let recorded = store.get_block(block.id)?.and_then(|b| b.archive_sha);
        if recorded.as_deref() == Some(sha.as_str()) {
            warn!(
                block_id = block.id,
                key,
                "Block already has an archive recorded; this upload is a duplicate"
            );
        } else {
            error!(
                block_id = block.id,
                key,
                sha = %sha,
                recorded = ?recorded,
                "Duplicate upload differs from the recorded archive"
            );
        }
        return Ok(WriteOutcome::Conflict {
            key: key.to_string(),
        });
    }

    info!(
        block_id = block.id,
        measure_type = %block.measure_type,
        range = %block.range,
        key,
        rows = manifest.row_count,
        bytes,
        "Block archived to store"
    );
    Ok(WriteOutcome::Uploaded {
        key: key.to_string(),
        sha,
        rows: manifest.row_count,
        bytes,
        local_path: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_archive_path_is_unique() {
        let dir = Path::new("/tmp/work");
        let key = "backups/cell_000000000001_000000000011.zip";
        let a = local_archive_path(dir, key);
        let b = local_archive_path(dir, key);
        assert_ne!(a, b);
        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("cell_000000000001_000000000011-"));
        assert!(name.ends_with(".zip"));
    }

    #[test]
    fn test_report_counts() {
        let range = BlockRange::new(1, 2).unwrap();
        let result = |outcome| BlockWriteResult {
            block_id: 1,
            measure_type: MeasureType::Cell,
            range,
            outcome,
        };
        let report = WriteReport {
            measure_type: MeasureType::Cell,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            archive_store: "fs:/x".into(),
            results: vec![
                result(WriteOutcome::Conflict { key: "k".into() }),
                result(WriteOutcome::Failed {
                    error: StructuredError::from(&Error::Archive("down".into())),
                }),
            ],
        };
        assert_eq!(report.uploaded(), 0);
        assert_eq!(report.conflicts(), 1);
        assert_eq!(report.failed(), 1);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["results"][0]["outcome"], "conflict");
        assert_eq!(json["results"][1]["error"]["category"], "archive");
    }
}
