//! Error types for store operations.

use oa_common::MeasureType;
use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors from the observation store and Block Ledger.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A block of this kind already covers part of the range starting here
    #[error("{measure_type} block starting at {start_id} overlaps an existing block")]
    Conflict {
        measure_type: MeasureType,
        start_id: i64,
    },

    /// A stored row could not be decoded
    #[error("invalid row in {table}: {message}")]
    InvalidRow { table: String, message: String },

    /// Opening the database file failed
    #[error("cannot open {path}: {message}")]
    Open { path: String, message: String },
}

impl StoreError {
    /// True when SQLite reported the database as locked past the busy timeout.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::DatabaseBusy || err.code == ErrorCode::DatabaseLocked
        )
    }
}

/// True for UNIQUE/CHECK constraint failures and trigger aborts.
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

impl From<StoreError> for oa_common::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict {
                measure_type,
                start_id,
            } => oa_common::Error::SchedulingConflict {
                measure_type: measure_type.to_string(),
                start_id,
            },
            other => oa_common::Error::Store(other.to_string()),
        }
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
