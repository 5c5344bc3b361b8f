//! Archive audit: re-verify stored archives without touching any rows.

use crate::archive_store::{ArchiveStore, ArchiveStoreError};
use chrono::{DateTime, Utc};
use oa_common::{BlockRange, BlockState, Error, MeasureType, Result, StructuredError};
use oa_store::ObservationStore;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum AuditVerdict {
    Verified,
    Missing,
    Mismatch { expected: String, actual: String },
    Error { error: StructuredError },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub block_id: i64,
    pub measure_type: MeasureType,
    pub range: BlockRange,
    pub state: BlockState,
    pub key: String,
    #[serde(flatten)]
    pub verdict: AuditVerdict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub measure_type: MeasureType,
    pub checked_at: DateTime<Utc>,
    pub archive_store: String,
    pub entries: Vec<AuditEntry>,
}

impl AuditReport {
    pub fn verified(&self) -> usize {
        self.count(|v| matches!(v, AuditVerdict::Verified))
    }

    pub fn missing(&self) -> usize {
        self.count(|v| matches!(v, AuditVerdict::Missing))
    }

    pub fn mismatches(&self) -> usize {
        self.count(|v| matches!(v, AuditVerdict::Mismatch { .. }))
    }

    pub fn errors(&self) -> usize {
        self.count(|v| matches!(v, AuditVerdict::Error { .. }))
    }

    fn count(&self, pred: impl Fn(&AuditVerdict) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.verdict)).count()
    }
}

/// Check the archives of up to `limit` uploaded or archived blocks of `kind`.
pub fn audit_archives(
    store: &ObservationStore,
    archive: &dyn ArchiveStore,
    kind: MeasureType,
    limit: u32,
) -> Result<AuditReport> {
    let blocks = store.blocks_with_archive(kind, limit)?;
    let mut entries = Vec::with_capacity(blocks.len());

    for block in blocks {
        let Some(key) = block.s3_key.clone() else {
            continue;
        };
        let verdict = match block.archive_sha.as_deref() {
            None => AuditVerdict::Error {
                error: StructuredError::from(&Error::Store(format!(
                    "block {} has a key but no checksum",
                    block.id
                ))),
            },
            Some(sha) => match archive.exists(&key, Some(sha)) {
                Ok(true) => AuditVerdict::Verified,
                Ok(false) => {
                    warn!(block_id = block.id, key = %key, state = %block.state(), "Archive missing");
                    AuditVerdict::Missing
                }
                Err(ArchiveStoreError::ChecksumMismatch {
                    expected, actual, ..
                }) => {
                    error!(block_id = block.id, key = %key, "Archive checksum mismatch");
                    AuditVerdict::Mismatch { expected, actual }
                }
                Err(e) => AuditVerdict::Error {
                    error: StructuredError::from(&Error::from(e)),
                },
            },
        };
        entries.push(AuditEntry {
            block_id: block.id,
            measure_type: kind,
            range: block.range,
            state: block.state(),
            key,
            verdict,
        });
    }

    let report = AuditReport {
        measure_type: kind,
        checked_at: Utc::now(),
        archive_store: archive.describe(),
        entries,
    };
    info!(
        measure_type = %kind,
        verified = report.verified(),
        missing = report.missing(),
        mismatches = report.mismatches(),
        errors = report.errors(),
        "Audit finished"
    );
    Ok(report)
}
