//! SQLite-backed observation store and Block Ledger.
//!
//! One database holds the `cell_measure` and `wifi_measure` observation
//! tables plus the `measure_block` ledger. Every connection runs in WAL mode
//! with a busy timeout; multi-statement changes go through short IMMEDIATE
//! transactions via [`ObservationStore::with_immediate_tx`], so concurrent
//! pipeline processes serialize on the write lock instead of interleaving.

pub mod error;
pub mod ledger;
pub mod observations;
pub mod schema;

pub use error::{Result, StoreError};
pub use ledger::LedgerCounts;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default busy timeout for new connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the observation database.
pub struct ObservationStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl ObservationStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Open {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        schema::apply(&conn)?;

        debug!(path = %path.display(), "Observation store opened");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a private in-memory database (tests and dry runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::apply(&conn)?;
        Ok(Self { conn, path: None })
    }

    /// Database file path, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` inside an IMMEDIATE transaction.
    ///
    /// The write lock is taken up front. The transaction commits when `f`
    /// returns `Ok` and rolls back otherwise.
    pub fn with_immediate_tx<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&StoreTx { tx: &tx })?;
        tx.commit()?;
        Ok(result)
    }
}

/// Operations available inside an IMMEDIATE transaction.
pub struct StoreTx<'a> {
    tx: &'a Transaction<'a>,
}

/// Format a timestamp the way the store persists it.
///
/// Fixed-width RFC 3339 with microseconds, so text order equals time order.
pub fn to_db_time(ts: &DateTime<Utc>) -> String {
    oa_common::measure::format_timestamp(ts)
}

pub(crate) fn from_db_time(
    value: &str,
) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|d| d.with_timezone(&Utc))
}

/// Read a timestamp column, reporting bad text as a conversion failure.
pub(crate) fn time_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    from_db_time(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn opt_time_column(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        from_db_time(&t).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}
