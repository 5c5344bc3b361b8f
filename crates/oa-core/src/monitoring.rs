//! Monitoring channel for per-block outcomes.
//!
//! Every block outcome becomes a [`LogEvent`] with a stable event name. Events
//! are logged through `tracing` as they are recorded and, when an event log
//! directory is configured, appended as JSON lines to
//! `archive_events_<timestamp>.jsonl` on [`Monitor::persist`].

use crate::audit::{AuditReport, AuditVerdict};
use crate::backup::{WriteOutcome, WriteReport};
use crate::logging::{event_names, Level, LogContext, LogEvent, Stage};
use crate::sweep::{SweepOutcome, SweepReport};
use chrono::Utc;
use oa_common::{BlockRange, MeasureType};
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

pub struct Monitor {
    ctx: LogContext,
    event_log_dir: Option<PathBuf>,
    events: Vec<LogEvent>,
}

impl Monitor {
    pub fn new(ctx: LogContext, event_log_dir: Option<PathBuf>) -> Self {
        Self {
            ctx,
            event_log_dir,
            events: Vec::new(),
        }
    }

    pub fn context(&self) -> &LogContext {
        &self.ctx
    }

    /// Events recorded and not yet persisted.
    pub fn events(&self) -> &[LogEvent] {
        &self.events
    }

    /// Log and buffer one event.
    pub fn record(&mut self, event: LogEvent) {
        match event.level {
            Level::Error => error!(
                event = %event.event,
                run_id = %event.run_id,
                block_id = ?event.block_id,
                fields = ?event.fields,
                "{}", event.message
            ),
            Level::Warn => warn!(
                event = %event.event,
                run_id = %event.run_id,
                block_id = ?event.block_id,
                fields = ?event.fields,
                "{}", event.message
            ),
            Level::Info => info!(
                event = %event.event,
                run_id = %event.run_id,
                block_id = ?event.block_id,
                "{}", event.message
            ),
            Level::Debug | Level::Trace => debug!(
                event = %event.event,
                run_id = %event.run_id,
                block_id = ?event.block_id,
                "{}", event.message
            ),
        }
        self.events.push(event);
    }

    pub fn record_schedule(&mut self, kind: MeasureType, ranges: &[BlockRange]) {
        for range in ranges {
            let event = self
                .ctx
                .info(
                    event_names::SCHEDULE_BLOCK_CREATED,
                    Stage::Schedule,
                    format!("Scheduled {} block {}", kind, range),
                )
                .with_field("measure_type", kind)
                .with_field("start_id", range.start_id)
                .with_field("end_id", range.end_id);
            self.record(event);
        }
        let summary = self
            .ctx
            .info(
                event_names::SCHEDULE_FINISHED,
                Stage::Schedule,
                format!("Scheduled {} {} blocks", ranges.len(), kind),
            )
            .with_field("measure_type", kind)
            .with_field("blocks", ranges.len());
        self.record(summary);
    }

    pub fn record_write(&mut self, report: &WriteReport) {
        for result in &report.results {
            let (level, name, message) = match &result.outcome {
                WriteOutcome::Uploaded { key, .. } => (
                    Level::Info,
                    event_names::WRITE_UPLOADED,
                    format!("Uploaded {}", key),
                ),
                WriteOutcome::Conflict { key } => (
                    Level::Warn,
                    event_names::WRITE_CONFLICT,
                    format!("Another writer already recorded {}", key),
                ),
                WriteOutcome::Failed { error } => (
                    Level::Error,
                    event_names::WRITE_FAILED,
                    format!("Archive write failed: {}", error.message),
                ),
            };
            let event = self
                .block_event(
                    level,
                    name,
                    Stage::Write,
                    message,
                    result.block_id,
                    result.measure_type,
                    result.range,
                )
                .with_field("result", &result.outcome);
            self.record(event);
        }
        let level = if report.failed() > 0 {
            Level::Warn
        } else {
            Level::Info
        };
        let mut summary = self
            .ctx
            .event(
                level,
                event_names::WRITE_FINISHED,
                Stage::Write,
                format!(
                    "Write pass for {}: {} uploaded, {} conflicts, {} failed",
                    report.measure_type,
                    report.uploaded(),
                    report.conflicts(),
                    report.failed()
                ),
            )
            .with_field("archive_store", &report.archive_store)
            .with_field("uploaded", report.uploaded())
            .with_field("conflicts", report.conflicts())
            .with_field("failed", report.failed());
        summary.measure_type = Some(report.measure_type);
        self.record(summary);
    }

    pub fn record_sweep(&mut self, report: &SweepReport) {
        for result in &report.results {
            let (level, name, message) = match &result.outcome {
                SweepOutcome::Archived { rows_deleted, .. } => (
                    Level::Info,
                    event_names::SWEEP_ARCHIVED,
                    format!("Deleted {} rows archived in {}", rows_deleted, result.key),
                ),
                SweepOutcome::SkippedRecent { newest } => (
                    Level::Debug,
                    event_names::SWEEP_SKIPPED_RECENT,
                    format!("Block holds rows newer than the cutoff ({})", newest),
                ),
                SweepOutcome::SkippedMissing => (
                    Level::Warn,
                    event_names::SWEEP_SKIPPED_MISSING,
                    format!("Archive {} not found; rows kept", result.key),
                ),
                SweepOutcome::IntegrityFailure { expected, actual } => (
                    Level::Error,
                    event_names::SWEEP_INTEGRITY_FAILURE,
                    format!(
                        "Archive {} hashes to {}, ledger records {}; rows kept",
                        result.key, actual, expected
                    ),
                ),
                SweepOutcome::AlreadyFinalized => (
                    Level::Info,
                    event_names::SWEEP_ALREADY_FINALIZED,
                    "Block finalized by another sweeper".to_string(),
                ),
                SweepOutcome::Failed { error } => (
                    Level::Error,
                    event_names::SWEEP_FAILED,
                    format!("Sweep failed: {}", error.message),
                ),
            };
            let event = self
                .block_event(
                    level,
                    name,
                    Stage::Sweep,
                    message,
                    result.block_id,
                    result.measure_type,
                    result.range,
                )
                .with_field("key", &result.key)
                .with_field("cutoff", report.cutoff)
                .with_field("result", &result.outcome);
            self.record(event);
        }
        let level = if report.integrity_failures() > 0 {
            Level::Error
        } else if report.failed() > 0 {
            Level::Warn
        } else {
            Level::Info
        };
        let mut summary = self
            .ctx
            .event(
                level,
                event_names::SWEEP_FINISHED,
                Stage::Sweep,
                format!(
                    "Sweep pass for {}: {} archived, {} rows deleted",
                    report.measure_type,
                    report.archived(),
                    report.rows_deleted()
                ),
            )
            .with_field("cutoff", report.cutoff)
            .with_field("archived", report.archived())
            .with_field("rows_deleted", report.rows_deleted())
            .with_field("skipped", report.skipped())
            .with_field("integrity_failures", report.integrity_failures())
            .with_field("failed", report.failed());
        summary.measure_type = Some(report.measure_type);
        self.record(summary);
    }

    pub fn record_audit(&mut self, report: &AuditReport) {
        for entry in &report.entries {
            let level = match entry.verdict {
                AuditVerdict::Verified => Level::Debug,
                AuditVerdict::Missing => Level::Warn,
                AuditVerdict::Mismatch { .. } | AuditVerdict::Error { .. } => Level::Error,
            };
            let event = self
                .block_event(
                    level,
                    event_names::AUDIT_RESULT,
                    Stage::Audit,
                    format!("Audited {}", entry.key),
                    entry.block_id,
                    entry.measure_type,
                    entry.range,
                )
                .with_field("key", &entry.key)
                .with_field("state", entry.state)
                .with_field("result", &entry.verdict);
            self.record(event);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn block_event(
        &self,
        level: Level,
        name: &str,
        stage: Stage,
        message: String,
        block_id: i64,
        kind: MeasureType,
        range: BlockRange,
    ) -> LogEvent {
        let mut event = self.ctx.event(level, name, stage, message);
        event.measure_type = Some(kind);
        event.block_id = Some(block_id);
        event.start_id = Some(range.start_id);
        event.end_id = Some(range.end_id);
        event
    }

    /// Append buffered events to the event log, if one is configured.
    ///
    /// Returns the file written. A failure is logged and the events are kept
    /// so a later call can retry; monitoring never fails a stage.
    pub fn persist(&mut self) -> Option<PathBuf> {
        let dir = self.event_log_dir.clone()?;
        if self.events.is_empty() {
            return None;
        }
        match persist_events(&self.events, &dir) {
            Ok(path) => {
                info!(
                    "Wrote {} archive events to {}",
                    self.events.len(),
                    path.display()
                );
                self.events.clear();
                Some(path)
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Could not persist archive events");
                None
            }
        }
    }
}

fn persist_events(events: &[LogEvent], log_dir: &Path) -> std::io::Result<PathBuf> {
    fs::create_dir_all(log_dir)?;

    let filename = format!("archive_events_{}.jsonl", Utc::now().format("%Y%m%d_%H%M%S"));
    let log_path = log_dir.join(filename);

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let mut writer = BufWriter::new(file);
    for event in events {
        serde_json::to_writer(&mut writer, event)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(log_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use oa_common::{Error, StructuredError};
    use tempfile::TempDir;

    fn write_report(outcomes: Vec<WriteOutcome>) -> WriteReport {
        WriteReport {
            measure_type: MeasureType::Cell,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            archive_store: "fs:/tmp".into(),
            results: outcomes
                .into_iter()
                .enumerate()
                .map(|(i, outcome)| crate::backup::BlockWriteResult {
                    block_id: i as i64 + 1,
                    measure_type: MeasureType::Cell,
                    range: BlockRange::new(i as i64 * 10 + 1, i as i64 * 10 + 11).unwrap(),
                    outcome,
                })
                .collect(),
        }
    }

    #[test]
    fn test_record_write_names_events() {
        let mut monitor = Monitor::new(LogContext::new("run-1", "host-1"), None);
        monitor.record_write(&write_report(vec![
            WriteOutcome::Conflict { key: "k".into() },
            WriteOutcome::Failed {
                error: StructuredError::from(&Error::Archive("down".into())),
            },
        ]));

        let names: Vec<_> = monitor.events().iter().map(|e| e.event.as_str()).collect();
        assert_eq!(
            names,
            vec![
                event_names::WRITE_CONFLICT,
                event_names::WRITE_FAILED,
                event_names::WRITE_FINISHED
            ]
        );
        assert_eq!(monitor.events()[1].level, Level::Error);
        assert_eq!(monitor.events()[1].block_id, Some(2));
        assert_eq!(monitor.events()[2].level, Level::Warn);
        assert_eq!(monitor.events()[2].fields["failed"], 1);
    }

    #[test]
    fn test_persist_without_dir_keeps_nothing_on_disk() {
        let mut monitor = Monitor::new(LogContext::new("run-1", "host-1"), None);
        monitor.record_schedule(MeasureType::Wifi, &[BlockRange::new(1, 11).unwrap()]);
        assert_eq!(monitor.persist(), None);
        assert_eq!(monitor.events().len(), 2);
    }

    #[test]
    fn test_persist_writes_jsonl() {
        let dir = TempDir::new().unwrap();
        let mut monitor = Monitor::new(
            LogContext::new("run-1", "host-1"),
            Some(dir.path().join("events")),
        );
        monitor.record_schedule(
            MeasureType::Cell,
            &[BlockRange::new(1, 11).unwrap(), BlockRange::new(11, 21).unwrap()],
        );

        let path = monitor.persist().expect("event log written");
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("archive_events_"));
        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["event"], "schedule.block_created");
        assert_eq!(lines[1]["fields"]["start_id"], 11);
        assert_eq!(lines[2]["event"], "schedule.finished");
        assert_eq!(lines[2]["fields"]["blocks"], 2);
        assert!(monitor.events().is_empty());
    }
}
