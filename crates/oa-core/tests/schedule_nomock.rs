//! No-mock scheduler tests against a real database file.

use chrono::{TimeZone, Utc};
use oa_common::{BlockRange, CellObservation, MeasureType, Observation, WifiObservation};
use oa_core::schedule::schedule_blocks;
use oa_store::{ObservationStore, DEFAULT_BUSY_TIMEOUT};
use std::path::Path;
use std::thread;
use tempfile::TempDir;

fn open(path: &Path) -> ObservationStore {
    ObservationStore::open(path, DEFAULT_BUSY_TIMEOUT).expect("open store")
}

fn old() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(1980, 1, 1, 0, 0, 0).unwrap()
}

fn seed(store: &mut ObservationStore, kind: MeasureType, n: usize) -> Vec<i64> {
    let rows: Vec<Observation> = (0..n)
        .map(|_| match kind {
            MeasureType::Cell => CellObservation::new(old()).into(),
            MeasureType::Wifi => WifiObservation::new(old()).into(),
        })
        .collect();
    store.insert_many(&rows).expect("seed observations")
}

fn range(start: i64, end: i64) -> BlockRange {
    BlockRange::new(start, end).unwrap()
}

#[test]
fn cell_batches_claim_only_full_runs() {
    let dir = TempDir::new().unwrap();
    let mut store = open(&dir.path().join("obs.db"));

    let blocks = schedule_blocks(&mut store, MeasureType::Cell, 1).unwrap();
    assert!(blocks.is_empty(), "empty table schedules nothing");

    let ids = seed(&mut store, MeasureType::Cell, 20);
    let start = ids[0];

    let blocks = schedule_blocks(&mut store, MeasureType::Cell, 15).unwrap();
    assert_eq!(blocks, vec![range(start, start + 15)]);

    let blocks = schedule_blocks(&mut store, MeasureType::Cell, 6).unwrap();
    assert!(blocks.is_empty(), "five leftover rows do not fill a batch of six");

    let blocks = schedule_blocks(&mut store, MeasureType::Cell, 5).unwrap();
    assert_eq!(blocks, vec![range(start + 15, start + 20)]);

    let blocks = schedule_blocks(&mut store, MeasureType::Cell, 1).unwrap();
    assert!(blocks.is_empty());

    let ledger = store.blocks(MeasureType::Cell).unwrap();
    assert_eq!(ledger.len(), 2);
    assert!(ledger.iter().all(|b| b.s3_key.is_none() && b.archive_date.is_none()));
}

#[test]
fn wifi_exact_multiple_schedules_two_blocks_once() {
    let dir = TempDir::new().unwrap();
    let mut store = open(&dir.path().join("obs.db"));

    assert!(schedule_blocks(&mut store, MeasureType::Wifi, 1)
        .unwrap()
        .is_empty());

    let ids = seed(&mut store, MeasureType::Wifi, 20);
    let start = ids[0];

    let blocks = schedule_blocks(&mut store, MeasureType::Wifi, 10).unwrap();
    assert_eq!(
        blocks,
        vec![range(start, start + 10), range(start + 10, start + 20)]
    );

    let again = schedule_blocks(&mut store, MeasureType::Wifi, 10).unwrap();
    assert!(again.is_empty(), "rerun must not schedule the same rows twice");
}

#[test]
fn kinds_are_scheduled_independently() {
    let dir = TempDir::new().unwrap();
    let mut store = open(&dir.path().join("obs.db"));
    seed(&mut store, MeasureType::Cell, 10);
    seed(&mut store, MeasureType::Wifi, 4);

    assert_eq!(
        schedule_blocks(&mut store, MeasureType::Cell, 5).unwrap().len(),
        2
    );
    assert!(schedule_blocks(&mut store, MeasureType::Wifi, 5)
        .unwrap()
        .is_empty());
    assert!(store.blocks(MeasureType::Wifi).unwrap().is_empty());
}

#[test]
fn later_rows_continue_after_the_high_water_mark() {
    let dir = TempDir::new().unwrap();
    let mut store = open(&dir.path().join("obs.db"));
    let first = seed(&mut store, MeasureType::Cell, 12);
    schedule_blocks(&mut store, MeasureType::Cell, 10).unwrap();

    let second = seed(&mut store, MeasureType::Cell, 8);
    let blocks = schedule_blocks(&mut store, MeasureType::Cell, 10).unwrap();
    assert_eq!(blocks, vec![range(first[10], second[7] + 1)]);
}

#[test]
fn zero_batch_is_rejected() {
    let dir = TempDir::new().unwrap();
    let mut store = open(&dir.path().join("obs.db"));
    seed(&mut store, MeasureType::Cell, 3);
    let err = schedule_blocks(&mut store, MeasureType::Cell, 0).unwrap_err();
    assert_eq!(err.category(), oa_common::ErrorCategory::Config);
    assert!(store.blocks(MeasureType::Cell).unwrap().is_empty());
}

#[test]
fn concurrent_schedulers_never_overlap() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("obs.db");
    let ids = {
        let mut store = open(&path);
        seed(&mut store, MeasureType::Cell, 100)
    };

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let path = path.clone();
            thread::spawn(move || {
                let mut store = open(&path);
                schedule_blocks(&mut store, MeasureType::Cell, 10).unwrap()
            })
        })
        .collect();
    let mut all: Vec<BlockRange> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    all.sort_by_key(|r| r.start_id);

    assert_eq!(all.len(), 10);
    assert_eq!(all[0].start_id, ids[0]);
    for pair in all.windows(2) {
        assert_eq!(pair[0].end_id, pair[1].start_id);
    }

    let ledger = open(&path).blocks(MeasureType::Cell).unwrap();
    assert_eq!(ledger.len(), 10);
}
