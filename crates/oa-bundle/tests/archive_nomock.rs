//! No-mock archive integration tests.
//!
//! Exercises real archive creation and verification on disk:
//! - Both measure kinds with realistic field content
//! - Exactly one manifest and one data file per archive
//! - Manifest checksum and row count verify on read-back
//! - File-level SHA-256 is stable for the bytes on disk

use chrono::{TimeZone, Utc};
use oa_bundle::{sha256_file, ArchiveReader, ArchiveWriter, MANIFEST_FILE_NAME};
use oa_common::{BlockRange, CellObservation, MeasureType, Observation, WifiObservation};
use std::fs::File;
use tempfile::TempDir;

// ============================================================================
// Helpers
// ============================================================================

fn cell_rows(ids: std::ops::Range<i64>) -> Vec<Observation> {
    let created = Utc.with_ymd_and_hms(2014, 7, 1, 8, 30, 0).unwrap();
    ids.map(|id| {
        let mut obs = CellObservation::new(created);
        obs.id = Some(id);
        obs.report_id = Some(format!("{:032x}", id));
        obs.position.lat = Some(37.7749);
        obs.position.lon = Some(-122.4194);
        obs.position.accuracy = Some(10);
        obs.radio = Some(2);
        obs.mcc = Some(310);
        obs.mnc = Some(410);
        obs.lac = Some(5126);
        obs.cid = Some(10000 + id);
        obs.signal = Some(-61);
        obs.into()
    })
    .collect()
}

fn wifi_rows(ids: std::ops::Range<i64>) -> Vec<Observation> {
    let created = Utc.with_ymd_and_hms(2014, 7, 2, 9, 0, 0).unwrap();
    ids.map(|id| {
        let mut obs = WifiObservation::new(created);
        obs.id = Some(id);
        obs.key = Some(format!("0123456789{:02x}", id % 256));
        obs.channel = Some(6);
        obs.signal = Some(-70);
        // Free text should survive quoting
        obs.report_id = Some(format!("r,\"{}\"", id));
        obs.into()
    })
    .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn cell_archive_roundtrip_on_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cell_000000000001_000000000016.zip");
    let range = BlockRange::new(1, 16).unwrap();

    let mut writer = ArchiveWriter::new(MeasureType::Cell, range).with_tool_version("test");
    writer.add_observations(&cell_rows(1..16)).unwrap();
    let manifest = writer.write(&path).unwrap();
    assert_eq!(manifest.row_count, 15);

    let mut reader = ArchiveReader::open(&path).unwrap();
    let summary = reader.verify().unwrap();
    assert_eq!(summary.measure_type, MeasureType::Cell);
    assert_eq!(summary.range, range);
    assert_eq!(summary.row_count as i64, range.len());
    assert_eq!(summary.first_id, Some(1));
    assert_eq!(summary.last_id, Some(15));

    let rows = reader.records().unwrap();
    assert_eq!(rows[0][15], "10001");
    assert_eq!(rows[14][2], "2014-07-01T08:30:00.000000Z");
}

#[test]
fn wifi_archive_preserves_quoted_fields() {
    let range = BlockRange::new(100, 110).unwrap();
    let mut writer = ArchiveWriter::new(MeasureType::Wifi, range);
    writer.add_observations(&wifi_rows(100..110)).unwrap();
    let (bytes, _) = writer.write_to_vec().unwrap();

    let mut reader = ArchiveReader::from_bytes(bytes).unwrap();
    let rows = reader.records().unwrap();
    assert_eq!(rows.len(), 10);
    assert_eq!(rows[0][1], "r,\"100\"");
    assert_eq!(rows[0][11], "012345678964");
}

#[test]
fn archive_contains_exactly_manifest_and_data_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("wifi.zip");
    let mut writer = ArchiveWriter::new(MeasureType::Wifi, BlockRange::new(1, 4).unwrap());
    writer.add_observations(&wifi_rows(1..4)).unwrap();
    writer.write(&path).unwrap();

    let archive = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
    let mut names: Vec<&str> = archive.file_names().collect();
    names.sort_unstable();
    assert_eq!(names, vec![MANIFEST_FILE_NAME, "wifi_measure.csv"]);
}

#[test]
fn gapped_block_verifies_with_fewer_rows() {
    let range = BlockRange::new(1, 11).unwrap();
    let rows: Vec<Observation> = cell_rows(1..11)
        .into_iter()
        .filter(|o| o.id().is_some_and(|id| id % 3 != 0))
        .collect();

    let mut writer = ArchiveWriter::new(MeasureType::Cell, range);
    writer.add_observations(&rows).unwrap();
    let (bytes, manifest) = writer.write_to_vec().unwrap();
    assert_eq!(manifest.row_count, 7);

    let summary = ArchiveReader::from_bytes(bytes).unwrap().verify().unwrap();
    assert_eq!(summary.row_count, 7);
    assert_eq!(summary.last_id, Some(10));
}

#[test]
fn file_hash_matches_bytes_on_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cell.zip");
    let mut writer = ArchiveWriter::new(MeasureType::Cell, BlockRange::new(1, 6).unwrap());
    writer.add_observations(&cell_rows(1..6)).unwrap();
    writer.write(&path).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let first = sha256_file(&path).unwrap();
    assert_eq!(first, oa_bundle::sha256_hex(&bytes));
    assert_eq!(first.len(), 64);
    assert_eq!(first, sha256_file(&path).unwrap());
}

#[test]
fn empty_block_still_has_header() {
    let (bytes, manifest) =
        ArchiveWriter::new(MeasureType::Cell, BlockRange::new(50, 60).unwrap())
            .write_to_vec()
            .unwrap();
    assert_eq!(manifest.row_count, 0);

    let mut reader = ArchiveReader::from_bytes(bytes).unwrap();
    let raw = String::from_utf8(reader.read_data_verified().unwrap()).unwrap();
    assert!(raw.starts_with("id,report_id,created,"));
    assert_eq!(raw.lines().count(), 1);
    assert_eq!(reader.verify().unwrap().row_count, 0);
}
