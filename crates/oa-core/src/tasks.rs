//! Task surface for external schedulers.
//!
//! Each [`Task`] is one idempotent stage invocation. The executor (cron, a
//! job queue, the CLI) decides when to run and when to retry; rerunning a
//! task after any failure is always safe.

use crate::archive_store::{self, ArchiveStore};
use crate::backup::{write_backups, WriteOptions, WriteReport};
use crate::exit_codes::ExitCode;
use crate::logging::{event_names, LogContext, Stage};
use crate::monitoring::Monitor;
use crate::schedule::schedule_blocks;
use crate::sweep::{sweep_blocks, SweepOptions, SweepReport};
use chrono::Utc;
use oa_common::{BlockRange, MeasureType, Result};
use oa_config::Settings;
use oa_store::ObservationStore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// One stage invocation for one measure kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum Task {
    Schedule {
        kind: MeasureType,
        batch: u32,
    },
    Write {
        kind: MeasureType,
        limit: u32,
        cleanup_local_file: bool,
    },
    Sweep {
        kind: MeasureType,
        batch: u32,
        days_old: u32,
    },
}

impl Task {
    /// Schedule, write and sweep `kind` with the configured defaults.
    pub fn pipeline(kind: MeasureType, settings: &Settings) -> [Task; 3] {
        [
            Task::Schedule {
                kind,
                batch: settings.schedule.batch,
            },
            Task::Write {
                kind,
                limit: settings.write.limit,
                cleanup_local_file: settings.archive.cleanup_local_file,
            },
            Task::Sweep {
                kind,
                batch: settings.sweep.batch,
                days_old: settings.sweep.days_old,
            },
        ]
    }

    pub fn kind(&self) -> MeasureType {
        match self {
            Task::Schedule { kind, .. } | Task::Write { kind, .. } | Task::Sweep { kind, .. } => {
                *kind
            }
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Task::Schedule { .. } => Stage::Schedule,
            Task::Write { .. } => Stage::Write,
            Task::Sweep { .. } => Stage::Sweep,
        }
    }
}

/// Result of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum TaskOutcome {
    Schedule {
        measure_type: MeasureType,
        ranges: Vec<BlockRange>,
    },
    Write(WriteReport),
    Sweep(SweepReport),
}

impl TaskOutcome {
    /// Exit code describing this outcome alone.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            TaskOutcome::Schedule { .. } => ExitCode::Clean,
            TaskOutcome::Write(report) if report.failed() > 0 => ExitCode::PartialFail,
            TaskOutcome::Write(_) => ExitCode::Clean,
            TaskOutcome::Sweep(report) if report.integrity_failures() > 0 => {
                ExitCode::IntegrityFailure
            }
            TaskOutcome::Sweep(report) if report.failed() > 0 => ExitCode::PartialFail,
            TaskOutcome::Sweep(_) => ExitCode::Clean,
        }
    }
}

/// Everything a task needs: the database, the archive store, staging
/// directory and the monitoring channel.
pub struct TaskContext {
    pub store: ObservationStore,
    pub archive: Box<dyn ArchiveStore>,
    pub work_dir: PathBuf,
    pub monitor: Monitor,
}

impl TaskContext {
    pub fn new(
        store: ObservationStore,
        archive: Box<dyn ArchiveStore>,
        work_dir: PathBuf,
        monitor: Monitor,
    ) -> Self {
        Self {
            store,
            archive,
            work_dir,
            monitor,
        }
    }

    /// Open the configured database and archive store.
    pub fn from_settings(settings: &Settings, log: LogContext) -> Result<Self> {
        let store = ObservationStore::open(
            &settings.database.path,
            Duration::from_millis(settings.database.busy_timeout_ms),
        )?;
        let archive = archive_store::from_config(&settings.archive)?;
        let monitor = Monitor::new(log, settings.monitoring.event_log_dir.clone());
        Ok(Self::new(store, archive, settings.archive.work_dir(), monitor))
    }
}

/// Run one task to completion.
///
/// Per-block problems are part of the returned outcome; an `Err` means the
/// stage could not start (bad argument, database unavailable).
pub fn run(ctx: &mut TaskContext, task: Task) -> Result<TaskOutcome> {
    let kind = task.kind();
    let stage = task.stage();
    let log = ctx.monitor.context().clone();
    crate::log_event!(
        log,
        DEBUG,
        event_names::RUN_STARTED,
        stage,
        "Task started",
        measure_type = kind.marker()
    );

    let outcome = match task {
        Task::Schedule { kind, batch } => {
            let ranges = schedule_blocks(&mut ctx.store, kind, batch)?;
            ctx.monitor.record_schedule(kind, &ranges);
            TaskOutcome::Schedule {
                measure_type: kind,
                ranges,
            }
        }
        Task::Write {
            kind,
            limit,
            cleanup_local_file,
        } => {
            let opts = WriteOptions {
                limit,
                work_dir: ctx.work_dir.clone(),
                cleanup_local_file,
            };
            let report = write_backups(&ctx.store, ctx.archive.as_ref(), kind, &opts)?;
            ctx.monitor.record_write(&report);
            TaskOutcome::Write(report)
        }
        Task::Sweep {
            kind,
            batch,
            days_old,
        } => {
            let opts = SweepOptions {
                days_old,
                batch,
                now: Utc::now(),
            };
            let report = sweep_blocks(&mut ctx.store, ctx.archive.as_ref(), kind, &opts)?;
            ctx.monitor.record_sweep(&report);
            TaskOutcome::Sweep(report)
        }
    };
    ctx.monitor.persist();

    crate::log_event!(
        log,
        DEBUG,
        event_names::RUN_FINISHED,
        stage,
        "Task finished",
        measure_type = kind.marker(),
        exit_code = outcome.exit_code().as_i32()
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive_store::FsArchiveStore;
    use oa_common::{CellObservation, Observation};
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> TaskContext {
        TaskContext::new(
            ObservationStore::open_in_memory().unwrap(),
            Box::new(FsArchiveStore::new(dir.path(), "bucket")),
            dir.path().join("work"),
            Monitor::new(LogContext::new("run-test", "host-test"), None),
        )
    }

    #[test]
    fn test_pipeline_uses_settings() {
        let mut settings = Settings::default();
        settings.schedule.batch = 42;
        settings.sweep.days_old = 3;
        let tasks = Task::pipeline(MeasureType::Wifi, &settings);
        assert_eq!(
            tasks[0],
            Task::Schedule {
                kind: MeasureType::Wifi,
                batch: 42
            }
        );
        assert!(matches!(tasks[2], Task::Sweep { days_old: 3, .. }));
        assert!(tasks.iter().all(|t| t.kind() == MeasureType::Wifi));
    }

    #[test]
    fn test_run_schedule_then_write() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);
        let rows: Vec<Observation> = (0..10)
            .map(|_| CellObservation::new(Utc::now()).into())
            .collect();
        ctx.store.insert_many(&rows).unwrap();

        let outcome = run(
            &mut ctx,
            Task::Schedule {
                kind: MeasureType::Cell,
                batch: 5,
            },
        )
        .unwrap();
        assert!(matches!(&outcome, TaskOutcome::Schedule { ranges, .. } if ranges.len() == 2));

        let outcome = run(
            &mut ctx,
            Task::Write {
                kind: MeasureType::Cell,
                limit: 10,
                cleanup_local_file: true,
            },
        )
        .unwrap();
        match &outcome {
            TaskOutcome::Write(report) => assert_eq!(report.uploaded(), 2),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(outcome.exit_code(), ExitCode::Clean);
        // two block events and one summary per stage
        assert_eq!(ctx.monitor.events().len(), 6);
    }

    #[test]
    fn test_run_rejects_zero_batch() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);
        let err = run(
            &mut ctx,
            Task::Schedule {
                kind: MeasureType::Cell,
                batch: 0,
            },
        )
        .unwrap_err();
        assert_eq!(ExitCode::from_error(&err), ExitCode::ArgsError);
    }

    #[test]
    fn test_task_serialization() {
        let task = Task::Sweep {
            kind: MeasureType::Cell,
            batch: 10,
            days_old: 7,
        };
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["task"], "sweep");
        assert_eq!(json["kind"], "cell");
    }
}
