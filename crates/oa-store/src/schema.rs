//! Database schema.
//!
//! Observation ids use AUTOINCREMENT so an id is never handed out twice,
//! even after the highest rows were archived and deleted.

use rusqlite::Connection;

use crate::Result;

/// Value stored in `PRAGMA user_version` once the schema is applied.
pub const SCHEMA_VERSION: i64 = 2;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cell_measure (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    report_id TEXT,
    created TEXT NOT NULL,
    lat REAL,
    lon REAL,
    time TEXT,
    accuracy INTEGER,
    altitude INTEGER,
    altitude_accuracy INTEGER,
    heading REAL,
    speed REAL,
    radio INTEGER,
    mcc INTEGER,
    mnc INTEGER,
    lac INTEGER,
    cid INTEGER,
    psc INTEGER,
    asu INTEGER,
    signal INTEGER,
    ta INTEGER
);
CREATE INDEX IF NOT EXISTS cell_measure_created_idx ON cell_measure(created);

CREATE TABLE IF NOT EXISTS wifi_measure (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    report_id TEXT,
    created TEXT NOT NULL,
    lat REAL,
    lon REAL,
    time TEXT,
    accuracy INTEGER,
    altitude INTEGER,
    altitude_accuracy INTEGER,
    heading REAL,
    speed REAL,
    "key" TEXT,
    channel INTEGER,
    signal INTEGER,
    snr INTEGER
);
CREATE INDEX IF NOT EXISTS wifi_measure_created_idx ON wifi_measure(created);

CREATE TABLE IF NOT EXISTS measure_block (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    measure_type INTEGER NOT NULL,
    start_id INTEGER NOT NULL,
    end_id INTEGER NOT NULL,
    archive_sha TEXT,
    s3_key TEXT,
    archive_date TEXT,
    created TEXT NOT NULL,
    CHECK (start_id < end_id),
    UNIQUE (measure_type, start_id)
);
CREATE INDEX IF NOT EXISTS measure_block_end_idx ON measure_block(measure_type, end_id);
CREATE INDEX IF NOT EXISTS measure_block_s3_key_idx ON measure_block(measure_type, s3_key);

-- Ranges of one kind never overlap
CREATE TRIGGER IF NOT EXISTS measure_block_no_overlap
BEFORE INSERT ON measure_block
WHEN EXISTS (
    SELECT 1 FROM measure_block
    WHERE measure_type = NEW.measure_type
      AND start_id < NEW.end_id
      AND NEW.start_id < end_id
)
BEGIN
    SELECT RAISE(ABORT, 'measure_block range overlaps an existing block');
END;
"#;

/// Create tables and indexes if they do not exist yet.
pub fn apply(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

/// Read back the applied schema version.
pub fn version(conn: &Connection) -> Result<i64> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}
