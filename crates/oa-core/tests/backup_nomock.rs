//! No-mock archive writer tests: real database file, real directory-backed
//! archive store, real archives.

use chrono::{TimeZone, Utc};
use oa_bundle::ArchiveReader;
use oa_common::{CellObservation, MeasureType, Observation, WifiObservation};
use oa_core::archive_store::{
    archive_key, parse_archive_key, ArchiveStore, ArchiveStoreError, FsArchiveStore,
};
use oa_core::backup::{write_backups, WriteOptions, WriteOutcome};
use oa_core::schedule::schedule_blocks;
use oa_core::sweep::{sweep_blocks, SweepOptions, SweepOutcome};
use oa_store::{ObservationStore, DEFAULT_BUSY_TIMEOUT};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    store: ObservationStore,
    archive: FsArchiveStore,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = ObservationStore::open(&dir.path().join("obs.db"), DEFAULT_BUSY_TIMEOUT)
            .expect("open store");
        let archive = FsArchiveStore::new(&dir.path().join("bucket-root"), "obs");
        Self {
            dir,
            store,
            archive,
        }
    }

    fn db_path(&self) -> PathBuf {
        self.dir.path().join("obs.db")
    }

    fn seed(&mut self, kind: MeasureType, n: usize) -> Vec<i64> {
        let created = Utc.with_ymd_and_hms(1980, 1, 1, 0, 0, 0).unwrap();
        let rows: Vec<Observation> = (0..n)
            .map(|i| match kind {
                MeasureType::Cell => {
                    let mut obs = CellObservation::new(created);
                    obs.mcc = Some(262);
                    obs.cid = Some(1000 + i as i64);
                    obs.into()
                }
                MeasureType::Wifi => {
                    let mut obs = WifiObservation::new(created);
                    obs.key = Some(format!("01005e{:06x}", i));
                    obs.into()
                }
            })
            .collect();
        self.store.insert_many(&rows).expect("seed")
    }

    fn options(&self, cleanup_local_file: bool) -> WriteOptions {
        WriteOptions {
            limit: 10,
            work_dir: self.dir.path().join("work"),
            cleanup_local_file,
        }
    }
}

#[test]
fn cell_block_round_trips_through_the_store() {
    let mut fx = Fixture::new();
    let ids = fx.seed(MeasureType::Cell, 10);
    let ranges = schedule_blocks(&mut fx.store, MeasureType::Cell, 10).unwrap();
    assert_eq!(ranges.len(), 1);

    let report = write_backups(&fx.store, &fx.archive, MeasureType::Cell, &fx.options(true))
        .unwrap();
    assert_eq!(report.uploaded(), 1);
    let (key, sha) = match &report.results[0].outcome {
        WriteOutcome::Uploaded {
            key,
            sha,
            rows,
            local_path,
            ..
        } => {
            assert_eq!(*rows, 10);
            assert!(local_path.is_none());
            (key.clone(), sha.clone())
        }
        other => panic!("unexpected outcome: {:?}", other),
    };

    assert!(key.starts_with("backups/cell_"));
    assert_eq!(key, archive_key(MeasureType::Cell, ranges[0]));
    assert_eq!(parse_archive_key(&key), Some((MeasureType::Cell, ranges[0])));

    let block = &fx.store.blocks(MeasureType::Cell).unwrap()[0];
    assert_eq!(block.s3_key.as_deref(), Some(key.as_str()));
    assert_eq!(block.archive_sha.as_deref(), Some(sha.as_str()));
    assert!(block.archive_date.is_none(), "writer never finalizes");

    let stored = fx.archive.object_path(&key).unwrap();
    assert_eq!(oa_bundle::sha256_file(&stored).unwrap(), sha);
    assert!(fx.archive.exists(&key, Some(&sha)).unwrap());

    let mut reader = ArchiveReader::open(&stored).unwrap();
    let summary = reader.verify().unwrap();
    assert_eq!(summary.row_count, 10);
    assert_eq!(reader.manifest().measure_type, MeasureType::Cell);
    let records = reader.records().unwrap();
    assert_eq!(records.len(), 10);
    assert_eq!(records[0][0], ids[0].to_string());

    assert_eq!(
        fx.store.count_observations(MeasureType::Cell).unwrap(),
        10,
        "writing never deletes rows"
    );
    let leftovers = std::fs::read_dir(fx.dir.path().join("work")).unwrap().count();
    assert_eq!(leftovers, 0, "local archive cleaned up");
}

#[test]
fn wifi_archive_uses_wifi_marker_and_keeps_local_copy() {
    let mut fx = Fixture::new();
    fx.seed(MeasureType::Wifi, 10);
    schedule_blocks(&mut fx.store, MeasureType::Wifi, 10).unwrap();

    let report = write_backups(&fx.store, &fx.archive, MeasureType::Wifi, &fx.options(false))
        .unwrap();
    match &report.results[0].outcome {
        WriteOutcome::Uploaded {
            key,
            sha,
            local_path: Some(local),
            ..
        } => {
            assert!(key.contains("/wifi_"));
            assert!(local.exists());
            assert_eq!(&oa_bundle::sha256_file(local).unwrap(), sha);
            let mut reader = ArchiveReader::open(local).unwrap();
            assert_eq!(reader.verify().unwrap().row_count, 10);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[test]
fn rerun_uploads_nothing_new() {
    let mut fx = Fixture::new();
    fx.seed(MeasureType::Cell, 20);
    schedule_blocks(&mut fx.store, MeasureType::Cell, 10).unwrap();

    let first = write_backups(&fx.store, &fx.archive, MeasureType::Cell, &fx.options(true))
        .unwrap();
    assert_eq!(first.uploaded(), 2);
    let second = write_backups(&fx.store, &fx.archive, MeasureType::Cell, &fx.options(true))
        .unwrap();
    assert!(second.results.is_empty());
}

#[test]
fn limit_caps_blocks_per_run() {
    let mut fx = Fixture::new();
    fx.seed(MeasureType::Cell, 30);
    schedule_blocks(&mut fx.store, MeasureType::Cell, 10).unwrap();

    let mut opts = fx.options(true);
    opts.limit = 2;
    let report = write_backups(&fx.store, &fx.archive, MeasureType::Cell, &opts).unwrap();
    assert_eq!(report.uploaded(), 2);
    assert_eq!(fx.store.pending_blocks(MeasureType::Cell, 10).unwrap().len(), 1);
}

/// Fails every upload whose key names the given start id.
struct FlakyStore {
    inner: FsArchiveStore,
    fail_start: i64,
}

impl ArchiveStore for FlakyStore {
    fn store(&self, key: &str, path: &Path) -> Result<(), ArchiveStoreError> {
        match parse_archive_key(key) {
            Some((_, range)) if range.start_id == self.fail_start => {
                Err(ArchiveStoreError::Transport {
                    key: key.to_string(),
                    message: "connection reset by peer".into(),
                })
            }
            _ => self.inner.store(key, path),
        }
    }

    fn exists(&self, key: &str, expected_sha: Option<&str>) -> Result<bool, ArchiveStoreError> {
        self.inner.exists(key, expected_sha)
    }

    fn describe(&self) -> String {
        format!("flaky:{}", self.inner.describe())
    }
}

#[test]
fn failed_upload_leaves_block_pending_and_others_proceed() {
    let mut fx = Fixture::new();
    let ids = fx.seed(MeasureType::Cell, 30);
    schedule_blocks(&mut fx.store, MeasureType::Cell, 10).unwrap();
    let flaky = FlakyStore {
        inner: FsArchiveStore::new(&fx.dir.path().join("bucket-root"), "obs"),
        fail_start: ids[10],
    };

    let report = write_backups(&fx.store, &flaky, MeasureType::Cell, &fx.options(true)).unwrap();
    assert_eq!(report.uploaded(), 2);
    assert_eq!(report.failed(), 1);

    let pending = fx.store.pending_blocks(MeasureType::Cell, 10).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].start_id(), ids[10]);
    assert!(pending[0].archive_sha.is_none());

    // The next run with a healthy store picks the block up again.
    let retry = write_backups(&fx.store, &fx.archive, MeasureType::Cell, &fx.options(true))
        .unwrap();
    assert_eq!(retry.uploaded(), 1);
    assert!(fx
        .store
        .pending_blocks(MeasureType::Cell, 10)
        .unwrap()
        .is_empty());
}

/// Runs a complete rival writer on its own connection the first time an
/// upload starts, then performs this writer's upload over the rival's object.
struct RacingStore {
    inner: FsArchiveStore,
    rival: Mutex<Option<ObservationStore>>,
    rival_work_dir: PathBuf,
}

impl ArchiveStore for RacingStore {
    fn store(&self, key: &str, path: &Path) -> Result<(), ArchiveStoreError> {
        if let Some(rival) = self.rival.lock().unwrap().take() {
            // Let the wall clock move so any time-dependent bytes would differ.
            std::thread::sleep(std::time::Duration::from_millis(1100));
            let opts = WriteOptions {
                limit: 10,
                work_dir: self.rival_work_dir.clone(),
                cleanup_local_file: true,
            };
            let report = write_backups(&rival, &self.inner, MeasureType::Cell, &opts).unwrap();
            assert_eq!(report.uploaded(), 1);
        }
        self.inner.store(key, path)
    }

    fn exists(&self, key: &str, expected_sha: Option<&str>) -> Result<bool, ArchiveStoreError> {
        self.inner.exists(key, expected_sha)
    }

    fn describe(&self) -> String {
        "racing".to_string()
    }
}

#[test]
fn duplicate_upload_by_losing_writer_still_sweeps() {
    let mut fx = Fixture::new();
    fx.seed(MeasureType::Cell, 10);
    schedule_blocks(&mut fx.store, MeasureType::Cell, 10).unwrap();
    let block_id = fx.store.blocks(MeasureType::Cell).unwrap()[0].id;

    let racing = RacingStore {
        inner: FsArchiveStore::new(&fx.dir.path().join("bucket-root"), "obs"),
        rival: Mutex::new(Some(
            ObservationStore::open(&fx.db_path(), DEFAULT_BUSY_TIMEOUT).unwrap(),
        )),
        rival_work_dir: fx.dir.path().join("rival-work"),
    };
    let report = write_backups(&fx.store, &racing, MeasureType::Cell, &fx.options(true)).unwrap();
    assert_eq!(report.conflicts(), 1);
    assert_eq!(report.uploaded(), 0);

    // The loser's bytes are the last ones stored and must match the ledger.
    let block = fx.store.get_block(block_id).unwrap().unwrap();
    let key = block.s3_key.clone().unwrap();
    let sha = block.archive_sha.clone().unwrap();
    assert!(fx.archive.exists(&key, Some(&sha)).unwrap());

    let sweep_opts = SweepOptions {
        days_old: 0,
        batch: 10,
        now: Utc::now(),
    };
    let swept = sweep_blocks(&mut fx.store, &fx.archive, MeasureType::Cell, &sweep_opts).unwrap();
    assert!(
        matches!(swept.results[0].outcome, SweepOutcome::Archived { .. }),
        "unexpected outcome: {:?}",
        swept.results[0].outcome
    );
    assert_eq!(fx.store.count_observations(MeasureType::Cell).unwrap(), 0);
}
