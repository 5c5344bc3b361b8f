//! Block ranges and ledger entries.
//!
//! A block covers the half-open identifier range `[start_id, end_id)` of one
//! measure kind. Blocks move through three states:
//!
//! ```text
//! Pending (no key) -> Uploaded (key + sha) -> Archived (archive_date, terminal)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::measure::MeasureType;

/// Half-open identifier range `[start_id, end_id)`. Always non-empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockRange {
    pub start_id: i64,
    pub end_id: i64,
}

impl BlockRange {
    /// Create a range, rejecting empty or inverted bounds.
    pub fn new(start_id: i64, end_id: i64) -> Result<Self> {
        if start_id >= end_id {
            return Err(Error::InvalidRange { start_id, end_id });
        }
        Ok(Self { start_id, end_id })
    }

    /// Number of identifiers covered.
    pub fn len(&self) -> i64 {
        self.end_id - self.start_id
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: i64) -> bool {
        id >= self.start_id && id < self.end_id
    }

    pub fn overlaps(&self, other: &BlockRange) -> bool {
        self.start_id < other.end_id && other.start_id < self.end_id
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start_id, self.end_id)
    }
}

impl From<BlockRange> for (i64, i64) {
    fn from(range: BlockRange) -> Self {
        (range.start_id, range.end_id)
    }
}

/// Lifecycle state derived from which ledger columns are populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockState {
    /// Scheduled, archive not written yet.
    Pending,
    /// Archive uploaded, source rows still present.
    Uploaded,
    /// Rows deleted after verifying the archive. Terminal.
    Archived,
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockState::Pending => write!(f, "pending"),
            BlockState::Uploaded => write!(f, "uploaded"),
            BlockState::Archived => write!(f, "archived"),
        }
    }
}

/// A Block Ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: i64,
    pub measure_type: MeasureType,
    pub range: BlockRange,
    /// Hex SHA-256 of the uploaded archive.
    pub archive_sha: Option<String>,
    /// Storage key of the uploaded archive.
    pub s3_key: Option<String>,
    /// Set once source rows were deleted after verification.
    pub archive_date: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
}

impl Block {
    pub fn start_id(&self) -> i64 {
        self.range.start_id
    }

    pub fn end_id(&self) -> i64 {
        self.range.end_id
    }

    pub fn state(&self) -> BlockState {
        match (&self.s3_key, &self.archive_date) {
            (_, Some(_)) => BlockState::Archived,
            (Some(_), None) => BlockState::Uploaded,
            (None, None) => BlockState::Pending,
        }
    }
}
