//! Retention sweeper.
//!
//! Deletes the source rows of uploaded blocks once every row in the block is
//! older than the retention cutoff and the stored archive still matches the
//! recorded checksum. Row deletion and ledger finalization commit together.
//!
//! A block is only ever finalized after its archive was confirmed present
//! with the expected hash. Missing or mismatching archives leave the rows in
//! place.

use crate::archive_store::{ArchiveStore, ArchiveStoreError};
use chrono::{DateTime, Duration, Utc};
use oa_common::{Block, BlockRange, Error, MeasureType, Result, StructuredError};
use oa_store::ObservationStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// Options for one sweeper invocation.
#[derive(Debug, Clone)]
pub struct SweepOptions {
    /// Minimum age in whole days.
    pub days_old: u32,
    /// Maximum number of uploaded blocks examined.
    pub batch: u32,
    /// Reference time; also recorded as the archive date.
    pub now: DateTime<Utc>,
}

/// Rows created strictly before this instant are old enough to delete.
///
/// It is the UTC midnight that ends the calendar day of `now - days_old`, so
/// the cutoff is the same for every run within one day.
pub fn retention_cutoff(now: DateTime<Utc>, days_old: u32) -> DateTime<Utc> {
    let day = (now - Duration::days(i64::from(days_old))).date_naive();
    let next = day.succ_opt().unwrap_or(day);
    next.and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
}

/// What happened to one block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SweepOutcome {
    /// Rows deleted and block finalized.
    Archived {
        rows_deleted: u64,
        archive_date: DateTime<Utc>,
    },
    /// At least one row is newer than the cutoff.
    SkippedRecent { newest: DateTime<Utc> },
    /// The archive store has no object under the recorded key.
    SkippedMissing,
    /// The stored object does not match the recorded checksum.
    IntegrityFailure { expected: String, actual: String },
    /// Another sweeper finalized the block first.
    AlreadyFinalized,
    /// Verification or deletion failed; the block is retried next run.
    Failed { error: StructuredError },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockSweepResult {
    pub block_id: i64,
    pub measure_type: MeasureType,
    pub range: BlockRange,
    pub key: String,
    #[serde(flatten)]
    pub outcome: SweepOutcome,
}

/// Summary of one sweeper invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub measure_type: MeasureType,
    pub cutoff: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub archive_store: String,
    pub results: Vec<BlockSweepResult>,
}

impl SweepReport {
    pub fn archived(&self) -> usize {
        self.count(|o| matches!(o, SweepOutcome::Archived { .. }))
    }

    pub fn rows_deleted(&self) -> u64 {
        self.results
            .iter()
            .map(|r| match r.outcome {
                SweepOutcome::Archived { rows_deleted, .. } => rows_deleted,
                _ => 0,
            })
            .sum()
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| {
            matches!(
                o,
                SweepOutcome::SkippedRecent { .. }
                    | SweepOutcome::SkippedMissing
                    | SweepOutcome::AlreadyFinalized
            )
        })
    }

    pub fn integrity_failures(&self) -> usize {
        self.count(|o| matches!(o, SweepOutcome::IntegrityFailure { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, SweepOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&SweepOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Sweep up to `opts.batch` uploaded blocks of `kind`.
///
/// Only selecting the candidate blocks can fail the whole invocation.
pub fn sweep_blocks(
    store: &mut ObservationStore,
    archive: &dyn ArchiveStore,
    kind: MeasureType,
    opts: &SweepOptions,
) -> Result<SweepReport> {
    let started_at = Utc::now();
    let cutoff = retention_cutoff(opts.now, opts.days_old);
    let candidates = store.uploaded_blocks(kind, opts.batch)?;
    debug!(
        measure_type = %kind,
        candidates = candidates.len(),
        cutoff = %cutoff,
        "Selected uploaded blocks"
    );

    let mut results = Vec::with_capacity(candidates.len());
    for block in &candidates {
        // uploaded_blocks only returns keyed blocks
        let Some(key) = block.s3_key.clone() else {
            continue;
        };
        let outcome = match sweep_block(store, archive, block, &key, cutoff, opts.now) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(
                    block_id = block.id,
                    key = %key,
                    error = %err,
                    "Sweep failed; block will be retried"
                );
                SweepOutcome::Failed {
                    error: StructuredError::from(&err).with_context("block_id", block.id),
                }
            }
        };
        results.push(BlockSweepResult {
            block_id: block.id,
            measure_type: kind,
            range: block.range,
            key,
            outcome,
        });
    }

    let report = SweepReport {
        measure_type: kind,
        cutoff,
        started_at,
        finished_at: Utc::now(),
        archive_store: archive.describe(),
        results,
    };
    info!(
        measure_type = %kind,
        archived = report.archived(),
        rows_deleted = report.rows_deleted(),
        skipped = report.skipped(),
        integrity_failures = report.integrity_failures(),
        failed = report.failed(),
        "Sweep pass finished"
    );
    Ok(report)
}

fn sweep_block(
    store: &mut ObservationStore,
    archive: &dyn ArchiveStore,
    block: &Block,
    key: &str,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<SweepOutcome> {
    if let Some(newest) = store.max_created_in_range(block.measure_type, block.range)? {
        if newest >= cutoff {
            debug!(block_id = block.id, newest = %newest, "Block has recent rows");
            return Ok(SweepOutcome::SkippedRecent { newest });
        }
    }

    let expected = block.archive_sha.as_deref().ok_or_else(|| {
        Error::Store(format!("block {} has a key but no checksum", block.id))
    })?;

    match archive.exists(key, Some(expected)) {
        Ok(true) => {}
        Ok(false) => {
            warn!(block_id = block.id, key, "Archive not found in store; rows kept");
            return Ok(SweepOutcome::SkippedMissing);
        }
        Err(ArchiveStoreError::ChecksumMismatch {
            expected, actual, ..
        }) => {
            error!(
                block_id = block.id,
                key,
                expected = %expected,
                actual = %actual,
                "Archive checksum mismatch; rows kept"
            );
            return Ok(SweepOutcome::IntegrityFailure { expected, actual });
        }
        Err(e) => return Err(e.into()),
    }

    let kind = block.measure_type;
    let range = block.range;
    let deleted = store.with_immediate_tx(|tx| {
        if !tx.finalize_block(block.id, now)? {
            return Ok(None);
        }
        Ok(Some(tx.delete_range(kind, range)?))
    })?;

    match deleted {
        Some(rows) => {
            info!(
                block_id = block.id,
                measure_type = %kind,
                range = %range,
                rows,
                "Block rows deleted"
            );
            Ok(SweepOutcome::Archived {
                rows_deleted: rows as u64,
                archive_date: now,
            })
        }
        None => {
            debug!(block_id = block.id, "Block finalized by another sweeper");
            Ok(SweepOutcome::AlreadyFinalized)
        }
    }
}
