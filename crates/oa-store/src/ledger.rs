//! Block Ledger: the `measure_block` table.
//!
//! Rows are inserted by the scheduler, filled in once by the writer
//! (compare-and-swap on `s3_key IS NULL`) and finalized once by the sweeper
//! (compare-and-swap on `archive_date IS NULL`). Finalized rows are never
//! touched again.

use chrono::{DateTime, Utc};
use oa_common::{Block, BlockRange, MeasureType};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::error::is_constraint_violation;
use crate::{opt_time_column, time_column, to_db_time, ObservationStore, Result, StoreError, StoreTx};

const BLOCK_COLUMNS: &str =
    "id, measure_type, start_id, end_id, archive_sha, s3_key, archive_date, created";

/// Ledger totals for one measure kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerCounts {
    pub pending: u64,
    pub uploaded: u64,
    pub archived: u64,
}

impl LedgerCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.uploaded + self.archived
    }
}

fn read_block(row: &Row<'_>) -> rusqlite::Result<Block> {
    let code: i64 = row.get(1)?;
    let measure_type = MeasureType::from_code(code).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Integer,
            format!("unknown measure_type {}", code).into(),
        )
    })?;
    let start_id: i64 = row.get(2)?;
    let end_id: i64 = row.get(3)?;
    let range = BlockRange::new(start_id, end_id).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Integer,
            e.to_string().into(),
        )
    })?;

    Ok(Block {
        id: row.get(0)?,
        measure_type,
        range,
        archive_sha: row.get(4)?,
        s3_key: row.get(5)?,
        archive_date: opt_time_column(row, 6)?,
        created: time_column(row, 7)?,
    })
}

fn query_blocks(conn: &Connection, filter: &str, kind: MeasureType, limit: i64) -> Result<Vec<Block>> {
    let sql = format!(
        "SELECT {} FROM measure_block WHERE measure_type = ?1 {} ORDER BY start_id ASC LIMIT ?2",
        BLOCK_COLUMNS, filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let blocks = stmt
        .query_map(params![kind.code(), limit], read_block)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(blocks)
}

fn max_end_id_on(conn: &Connection, kind: MeasureType) -> Result<i64> {
    let h: Option<i64> = conn.query_row(
        "SELECT max(end_id) FROM measure_block WHERE measure_type = ?1",
        params![kind.code()],
        |row| row.get(0),
    )?;
    Ok(h.unwrap_or(0))
}

fn insert_block_on(
    conn: &Connection,
    kind: MeasureType,
    range: BlockRange,
    now: DateTime<Utc>,
) -> Result<i64> {
    let result = conn.execute(
        "INSERT INTO measure_block (measure_type, start_id, end_id, created) VALUES (?1, ?2, ?3, ?4)",
        params![kind.code(), range.start_id, range.end_id, to_db_time(&now)],
    );
    match result {
        Ok(_) => Ok(conn.last_insert_rowid()),
        Err(err) if is_constraint_violation(&err) => Err(StoreError::Conflict {
            measure_type: kind,
            start_id: range.start_id,
        }),
        Err(err) => Err(err.into()),
    }
}

fn clamp_limit(limit: u32) -> i64 {
    i64::from(limit)
}

impl ObservationStore {
    /// Highest `end_id` over blocks of `kind`, 0 if there are none.
    pub fn max_end_id(&self, kind: MeasureType) -> Result<i64> {
        max_end_id_on(&self.conn, kind)
    }

    /// Insert a pending block outside of scheduling. Overlapping ranges are
    /// rejected the same way as inside a transaction.
    pub fn insert_block(&self, kind: MeasureType, range: BlockRange) -> Result<i64> {
        insert_block_on(&self.conn, kind, range, Utc::now())
    }

    /// Fetch one block by ledger id.
    pub fn get_block(&self, block_id: i64) -> Result<Option<Block>> {
        let sql = format!("SELECT {} FROM measure_block WHERE id = ?1", BLOCK_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![block_id], read_block)
            .optional()?)
    }

    /// Every block of `kind`, ascending by `start_id`.
    pub fn blocks(&self, kind: MeasureType) -> Result<Vec<Block>> {
        query_blocks(&self.conn, "", kind, -1)
    }

    /// Blocks without an archive yet, ascending by `start_id`.
    pub fn pending_blocks(&self, kind: MeasureType, limit: u32) -> Result<Vec<Block>> {
        query_blocks(&self.conn, "AND s3_key IS NULL", kind, clamp_limit(limit))
    }

    /// Blocks uploaded but not yet finalized, ascending by `start_id`.
    pub fn uploaded_blocks(&self, kind: MeasureType, limit: u32) -> Result<Vec<Block>> {
        query_blocks(
            &self.conn,
            "AND s3_key IS NOT NULL AND archive_date IS NULL",
            kind,
            clamp_limit(limit),
        )
    }

    /// Blocks that have an archive, finalized or not, ascending by `start_id`.
    pub fn blocks_with_archive(&self, kind: MeasureType, limit: u32) -> Result<Vec<Block>> {
        query_blocks(&self.conn, "AND s3_key IS NOT NULL", kind, clamp_limit(limit))
    }

    /// Record the uploaded archive for a pending block.
    ///
    /// Compare-and-swap on `s3_key IS NULL`: returns `false` when another
    /// writer already recorded an archive for this block.
    pub fn record_upload(&self, block_id: i64, key: &str, sha: &str) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE measure_block SET s3_key = ?1, archive_sha = ?2 WHERE id = ?3 AND s3_key IS NULL",
            params![key, sha, block_id],
        )?;
        debug!(block_id, key, updated, "Recorded upload");
        Ok(updated == 1)
    }

    /// Pending/uploaded/archived totals for `kind`.
    pub fn ledger_counts(&self, kind: MeasureType) -> Result<LedgerCounts> {
        let counts = self.conn.query_row(
            "SELECT \
                coalesce(sum(CASE WHEN s3_key IS NULL AND archive_date IS NULL THEN 1 ELSE 0 END), 0), \
                coalesce(sum(CASE WHEN s3_key IS NOT NULL AND archive_date IS NULL THEN 1 ELSE 0 END), 0), \
                coalesce(sum(CASE WHEN archive_date IS NOT NULL THEN 1 ELSE 0 END), 0) \
             FROM measure_block WHERE measure_type = ?1",
            params![kind.code()],
            |row| {
                Ok(LedgerCounts {
                    pending: row.get::<_, i64>(0)? as u64,
                    uploaded: row.get::<_, i64>(1)? as u64,
                    archived: row.get::<_, i64>(2)? as u64,
                })
            },
        )?;
        Ok(counts)
    }
}

impl StoreTx<'_> {
    /// Highest `end_id` over blocks of `kind`, 0 if there are none.
    pub fn max_end_id(&self, kind: MeasureType) -> Result<i64> {
        max_end_id_on(self.tx, kind)
    }

    /// Insert a pending block. A range overlapping any block of the same kind
    /// yields [`StoreError::Conflict`].
    pub fn insert_block(&self, kind: MeasureType, range: BlockRange, now: DateTime<Utc>) -> Result<i64> {
        insert_block_on(self.tx, kind, range, now)
    }

    /// Set `archive_date` on a block not finalized yet. Returns `false` when
    /// the block was already finalized (or does not exist).
    pub fn finalize_block(&self, block_id: i64, archive_date: DateTime<Utc>) -> Result<bool> {
        let updated = self.tx.execute(
            "UPDATE measure_block SET archive_date = ?1 WHERE id = ?2 AND archive_date IS NULL",
            params![to_db_time(&archive_date), block_id],
        )?;
        Ok(updated == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(s: i64, e: i64) -> BlockRange {
        BlockRange::new(s, e).unwrap()
    }

    #[test]
    fn test_max_end_id_defaults_to_zero() {
        let store = ObservationStore::open_in_memory().unwrap();
        assert_eq!(store.max_end_id(MeasureType::Cell).unwrap(), 0);

        store.insert_block(MeasureType::Cell, range(1, 16)).unwrap();
        assert_eq!(store.max_end_id(MeasureType::Cell).unwrap(), 16);
        assert_eq!(store.max_end_id(MeasureType::Wifi).unwrap(), 0);
    }

    #[test]
    fn test_duplicate_start_is_conflict() {
        let store = ObservationStore::open_in_memory().unwrap();
        store.insert_block(MeasureType::Wifi, range(1, 11)).unwrap();

        let err = store.insert_block(MeasureType::Wifi, range(1, 5)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { start_id: 1, .. }));

        // Same start on the other kind is fine
        assert!(store.insert_block(MeasureType::Cell, range(1, 11)).is_ok());
    }

    #[test]
    fn test_overlapping_range_is_conflict() {
        let store = ObservationStore::open_in_memory().unwrap();
        store.insert_block(MeasureType::Cell, range(1, 11)).unwrap();

        let err = store.insert_block(MeasureType::Cell, range(5, 15)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { start_id: 5, .. }));
        assert!(store.insert_block(MeasureType::Cell, range(0, 2)).is_err());
        assert!(store.insert_block(MeasureType::Cell, range(3, 4)).is_err());

        // Touching ranges and other kinds are fine
        assert!(store.insert_block(MeasureType::Cell, range(11, 21)).is_ok());
        assert!(store.insert_block(MeasureType::Wifi, range(5, 15)).is_ok());

        let blocks = store.blocks(MeasureType::Cell).unwrap();
        let ranges: Vec<_> = blocks.iter().map(|b| b.range).collect();
        assert_eq!(ranges, vec![range(1, 11), range(11, 21)]);
    }

    #[test]
    fn test_conflict_inside_tx_rolls_back() {
        let mut store = ObservationStore::open_in_memory().unwrap();
        store.insert_block(MeasureType::Cell, range(11, 21)).unwrap();

        let result = store.with_immediate_tx(|tx| {
            tx.insert_block(MeasureType::Cell, range(1, 11), Utc::now())?;
            tx.insert_block(MeasureType::Cell, range(11, 21), Utc::now())
        });
        assert!(matches!(result, Err(StoreError::Conflict { .. })));
        assert_eq!(store.blocks(MeasureType::Cell).unwrap().len(), 1);
    }

    #[test]
    fn test_record_upload_is_compare_and_swap() {
        let store = ObservationStore::open_in_memory().unwrap();
        let id = store.insert_block(MeasureType::Cell, range(1, 11)).unwrap();

        assert!(store.record_upload(id, "backups/a.zip", "aa").unwrap());
        assert!(!store.record_upload(id, "backups/b.zip", "bb").unwrap());

        let block = store.get_block(id).unwrap().unwrap();
        assert_eq!(block.s3_key.as_deref(), Some("backups/a.zip"));
        assert_eq!(block.archive_sha.as_deref(), Some("aa"));
    }

    #[test]
    fn test_selection_by_state() {
        let mut store = ObservationStore::open_in_memory().unwrap();
        let a = store.insert_block(MeasureType::Cell, range(1, 11)).unwrap();
        let b = store.insert_block(MeasureType::Cell, range(11, 21)).unwrap();
        store.insert_block(MeasureType::Cell, range(21, 31)).unwrap();
        store.record_upload(a, "k/a", "sa").unwrap();
        store.record_upload(b, "k/b", "sb").unwrap();
        store
            .with_immediate_tx(|tx| tx.finalize_block(a, Utc::now()))
            .unwrap();

        let pending = store.pending_blocks(MeasureType::Cell, 10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].start_id(), 21);

        let uploaded = store.uploaded_blocks(MeasureType::Cell, 10).unwrap();
        assert_eq!(uploaded.len(), 1);
        assert_eq!(uploaded[0].id, b);

        assert_eq!(store.blocks_with_archive(MeasureType::Cell, 10).unwrap().len(), 2);
        assert_eq!(
            store.ledger_counts(MeasureType::Cell).unwrap(),
            LedgerCounts {
                pending: 1,
                uploaded: 1,
                archived: 1
            }
        );
    }

    #[test]
    fn test_pending_respects_limit_and_order() {
        let store = ObservationStore::open_in_memory().unwrap();
        store.insert_block(MeasureType::Wifi, range(21, 31)).unwrap();
        store.insert_block(MeasureType::Wifi, range(1, 11)).unwrap();
        store.insert_block(MeasureType::Wifi, range(11, 21)).unwrap();

        let pending = store.pending_blocks(MeasureType::Wifi, 2).unwrap();
        let starts: Vec<i64> = pending.iter().map(|b| b.start_id()).collect();
        assert_eq!(starts, vec![1, 11]);
    }

    #[test]
    fn test_finalize_only_once() {
        let mut store = ObservationStore::open_in_memory().unwrap();
        let id = store.insert_block(MeasureType::Cell, range(1, 11)).unwrap();

        assert!(store
            .with_immediate_tx(|tx| tx.finalize_block(id, Utc::now()))
            .unwrap());
        assert!(!store
            .with_immediate_tx(|tx| tx.finalize_block(id, Utc::now()))
            .unwrap());
    }
}
