//! Observation archive writer/reader.
//!
//! An archive packages the rows of one ledger block so they can be stored
//! off-host before the source rows are deleted.
//!
//! # Archive Format
//!
//! Archives are ZIP files containing exactly two entries:
//! - `manifest.json`: format version, observation schema revision, measure
//!   type, block range, row count, and the data file's SHA-256
//! - `<kind>_measure.csv`: one header line followed by one line per row,
//!   columns in the fixed order of the kind's exported fields
//!
//! # Example
//!
//! ```no_run
//! use oa_bundle::{ArchiveReader, ArchiveWriter};
//! use oa_common::{BlockRange, MeasureType};
//! use std::path::Path;
//!
//! let range = BlockRange::new(1, 11).unwrap();
//! let writer = ArchiveWriter::new(MeasureType::Cell, range);
//! writer.write(Path::new("cell_1_11.zip")).unwrap();
//!
//! let mut reader = ArchiveReader::open(Path::new("cell_1_11.zip")).unwrap();
//! let summary = reader.verify().unwrap();
//! assert_eq!(summary.row_count, 0);
//! ```

pub mod error;
pub mod manifest;
pub mod reader;
pub mod tabular;
pub mod writer;

pub use error::{BundleError, Result};
pub use manifest::{ArchiveManifest, FileEntry, ARCHIVE_FORMAT_VERSION, MANIFEST_FILE_NAME};
pub use reader::{ArchiveReader, ArchiveSummary};
pub use writer::ArchiveWriter;

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Compute the hex SHA-256 of a byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Compute the hex SHA-256 of a file's exact bytes, streaming.
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
