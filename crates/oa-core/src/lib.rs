//! Observation archival pipeline.
//!
//! Observations are carved into fixed-size id blocks by the scheduler
//! ([`schedule`]), exported and uploaded by the archive writer ([`backup`]),
//! and deleted from the database by the retention sweeper ([`sweep`]) once
//! they are old enough and their archive verifies. Block state lives in the
//! Block Ledger of [`oa_store`]; each stage is an idempotent [`tasks::Task`].

pub mod archive_store;
pub mod audit;
pub mod backup;
pub mod exit_codes;
pub mod logging;
pub mod monitoring;
pub mod output;
pub mod schedule;
pub mod status;
pub mod sweep;
pub mod tasks;

pub use archive_store::{ArchiveStore, ArchiveStoreError, FsArchiveStore, HttpArchiveStore};
pub use backup::{write_backups, WriteOptions, WriteOutcome, WriteReport};
pub use exit_codes::ExitCode;
pub use schedule::schedule_blocks;
pub use sweep::{retention_cutoff, sweep_blocks, SweepOptions, SweepOutcome, SweepReport};
pub use tasks::{run, Task, TaskContext, TaskOutcome};
