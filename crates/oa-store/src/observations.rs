//! Observation tables: append-only inserts, ordered range reads, bulk range
//! deletes.

use chrono::{DateTime, Utc};
use oa_common::measure::Position;
use oa_common::{BlockRange, CellObservation, MeasureType, Observation, WifiObservation};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::{opt_time_column, time_column, to_db_time, ObservationStore, Result, StoreTx};

fn quoted_columns(kind: MeasureType) -> String {
    kind.columns()
        .iter()
        .map(|c| format!("\"{}\"", c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn int(v: Option<i64>) -> Value {
    v.map(Value::Integer).unwrap_or(Value::Null)
}

fn real(v: Option<f64>) -> Value {
    v.map(Value::Real).unwrap_or(Value::Null)
}

fn text(v: Option<String>) -> Value {
    v.map(Value::Text).unwrap_or(Value::Null)
}

fn position_values(p: &Position, out: &mut Vec<Value>) {
    out.push(real(p.lat));
    out.push(real(p.lon));
    out.push(text(p.time.as_ref().map(to_db_time)));
    out.push(int(p.accuracy));
    out.push(int(p.altitude));
    out.push(int(p.altitude_accuracy));
    out.push(real(p.heading));
    out.push(real(p.speed));
}

/// Column values in `MeasureType::columns()` order, id first.
fn row_values(obs: &Observation) -> Vec<Value> {
    let mut out = Vec::with_capacity(obs.measure_type().columns().len());
    match obs {
        Observation::Cell(o) => {
            out.push(int(o.id));
            out.push(text(o.report_id.clone()));
            out.push(Value::Text(to_db_time(&o.created)));
            position_values(&o.position, &mut out);
            for v in [o.radio, o.mcc, o.mnc, o.lac, o.cid, o.psc, o.asu, o.signal, o.ta] {
                out.push(int(v));
            }
        }
        Observation::Wifi(o) => {
            out.push(int(o.id));
            out.push(text(o.report_id.clone()));
            out.push(Value::Text(to_db_time(&o.created)));
            position_values(&o.position, &mut out);
            out.push(text(o.key.clone()));
            out.push(int(o.channel));
            out.push(int(o.signal));
            out.push(int(o.snr));
        }
    }
    out
}

fn read_position(row: &Row<'_>) -> rusqlite::Result<Position> {
    Ok(Position {
        lat: row.get(3)?,
        lon: row.get(4)?,
        time: opt_time_column(row, 5)?,
        accuracy: row.get(6)?,
        altitude: row.get(7)?,
        altitude_accuracy: row.get(8)?,
        heading: row.get(9)?,
        speed: row.get(10)?,
    })
}

fn read_observation(kind: MeasureType, row: &Row<'_>) -> rusqlite::Result<Observation> {
    let id: i64 = row.get(0)?;
    let report_id: Option<String> = row.get(1)?;
    let created = time_column(row, 2)?;
    let position = read_position(row)?;

    Ok(match kind {
        MeasureType::Cell => Observation::Cell(CellObservation {
            id: Some(id),
            report_id,
            created,
            position,
            radio: row.get(11)?,
            mcc: row.get(12)?,
            mnc: row.get(13)?,
            lac: row.get(14)?,
            cid: row.get(15)?,
            psc: row.get(16)?,
            asu: row.get(17)?,
            signal: row.get(18)?,
            ta: row.get(19)?,
        }),
        MeasureType::Wifi => Observation::Wifi(WifiObservation {
            id: Some(id),
            report_id,
            created,
            position,
            key: row.get(11)?,
            channel: row.get(12)?,
            signal: row.get(13)?,
            snr: row.get(14)?,
        }),
    })
}

fn insert_on(conn: &Connection, obs: &Observation) -> Result<i64> {
    let kind = obs.measure_type();
    let columns = kind.columns();
    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        kind.table(),
        quoted_columns(kind),
        placeholders
    );
    // A NULL id lets SQLite assign the next AUTOINCREMENT value.
    conn.prepare_cached(&sql)?
        .execute(params_from_iter(row_values(obs)))?;
    Ok(conn.last_insert_rowid())
}

fn ids_from_on(conn: &Connection, kind: MeasureType, from_id: i64) -> Result<Vec<i64>> {
    let sql = format!(
        "SELECT id FROM {} WHERE id >= ?1 ORDER BY id ASC",
        kind.table()
    );
    let mut stmt = conn.prepare(&sql)?;
    let ids = stmt
        .query_map(params![from_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}

fn delete_range_on(conn: &Connection, kind: MeasureType, range: BlockRange) -> Result<usize> {
    let sql = format!(
        "DELETE FROM {} WHERE id >= ?1 AND id < ?2",
        kind.table()
    );
    Ok(conn.execute(&sql, params![range.start_id, range.end_id])?)
}

impl ObservationStore {
    /// Append one observation and return its assigned id.
    pub fn insert(&self, obs: &Observation) -> Result<i64> {
        insert_on(&self.conn, obs)
    }

    /// Append many observations in one transaction, returning their ids.
    pub fn insert_many(&mut self, observations: &[Observation]) -> Result<Vec<i64>> {
        self.with_immediate_tx(|tx| observations.iter().map(|obs| tx.insert(obs)).collect())
    }

    /// Rows of `kind` with ids in `range`, ascending by id.
    pub fn observations_in_range(
        &self,
        kind: MeasureType,
        range: BlockRange,
    ) -> Result<Vec<Observation>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id >= ?1 AND id < ?2 ORDER BY id ASC",
            quoted_columns(kind),
            kind.table()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![range.start_id, range.end_id], |row| {
                read_observation(kind, row)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Newest `created` in `range`, `None` if the range holds no rows.
    pub fn max_created_in_range(
        &self,
        kind: MeasureType,
        range: BlockRange,
    ) -> Result<Option<DateTime<Utc>>> {
        let sql = format!(
            "SELECT max(created) FROM {} WHERE id >= ?1 AND id < ?2",
            kind.table()
        );
        let newest: Option<String> = self
            .conn
            .query_row(&sql, params![range.start_id, range.end_id], |row| row.get(0))?;
        newest
            .map(|t| {
                crate::from_db_time(&t).map_err(|e| crate::StoreError::InvalidRow {
                    table: kind.table().to_string(),
                    message: format!("created '{}': {}", t, e),
                })
            })
            .transpose()
    }

    /// Number of rows of `kind` with ids in `range`.
    pub fn count_in_range(&self, kind: MeasureType, range: BlockRange) -> Result<u64> {
        let sql = format!(
            "SELECT count(*) FROM {} WHERE id >= ?1 AND id < ?2",
            kind.table()
        );
        let n: i64 = self
            .conn
            .query_row(&sql, params![range.start_id, range.end_id], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Number of live rows of `kind`.
    pub fn count_observations(&self, kind: MeasureType) -> Result<u64> {
        let sql = format!("SELECT count(*) FROM {}", kind.table());
        let n: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Number of live rows of `kind` with `id >= from_id`.
    pub fn count_from(&self, kind: MeasureType, from_id: i64) -> Result<u64> {
        let sql = format!("SELECT count(*) FROM {} WHERE id >= ?1", kind.table());
        let n: i64 = self.conn.query_row(&sql, params![from_id], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Fetch a single row by id.
    pub fn get_observation(&self, kind: MeasureType, id: i64) -> Result<Option<Observation>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ?1",
            quoted_columns(kind),
            kind.table()
        );
        Ok(self
            .conn
            .query_row(&sql, params![id], |row| read_observation(kind, row))
            .optional()?)
    }
}

impl StoreTx<'_> {
    /// Append one observation inside the transaction.
    pub fn insert(&self, obs: &Observation) -> Result<i64> {
        insert_on(self.tx, obs)
    }

    /// All ids of `kind` at or above `from_id`, ascending.
    pub fn ids_from(&self, kind: MeasureType, from_id: i64) -> Result<Vec<i64>> {
        ids_from_on(self.tx, kind, from_id)
    }

    /// Delete every row of `kind` inside `range`. Returns rows deleted.
    pub fn delete_range(&self, kind: MeasureType, range: BlockRange) -> Result<usize> {
        delete_range_on(self.tx, kind, range)
    }
}
