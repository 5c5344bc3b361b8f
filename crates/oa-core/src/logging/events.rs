//! Structured event definitions for logging.
//!
//! Events follow a consistent schema for machine-parseable JSONL output.
//! All events carry the run correlation ID, the host, and the stage. Events
//! about a single block also carry its kind and range.

use chrono::{DateTime, Utc};
use oa_common::{Block, MeasureType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Log levels for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Stages of the archival pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Startup and configuration.
    Init,
    /// Carving new observation ranges into blocks.
    Schedule,
    /// Writing and uploading block archives.
    Write,
    /// Verifying archives and deleting source rows.
    Sweep,
    /// Re-verifying archives without deleting.
    Audit,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Init => "init",
            Stage::Schedule => "schedule",
            Stage::Write => "write",
            Stage::Sweep => "sweep",
            Stage::Audit => "audit",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown stage: {}", s))
    }
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Init,
        Stage::Schedule,
        Stage::Write,
        Stage::Sweep,
        Stage::Audit,
    ];

    /// Leading components of the event names logged in this stage. Event
    /// names double as tracing targets, so these are the filter targets.
    pub fn event_prefixes(self) -> &'static [&'static str] {
        match self {
            Stage::Init => &["run", "config", "internal_error"],
            Stage::Schedule => &["schedule"],
            Stage::Write => &["write"],
            Stage::Sweep => &["sweep"],
            Stage::Audit => &["audit"],
        }
    }

    /// Stage owning an event name, by its leading component.
    pub fn of_event(event: &str) -> Option<Stage> {
        let head = event.split('.').next().unwrap_or(event);
        Stage::ALL
            .into_iter()
            .find(|stage| stage.event_prefixes().contains(&head))
    }
}

/// Standard event names used in logging.
pub mod event_names {
    // Run lifecycle
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_FINISHED: &str = "run.finished";

    // Schedule stage
    pub const SCHEDULE_BLOCK_CREATED: &str = "schedule.block_created";
    pub const SCHEDULE_FINISHED: &str = "schedule.finished";

    // Write stage
    pub const WRITE_UPLOADED: &str = "write.uploaded";
    pub const WRITE_CONFLICT: &str = "write.conflict";
    pub const WRITE_FAILED: &str = "write.failed";
    pub const WRITE_FINISHED: &str = "write.finished";

    // Sweep stage
    pub const SWEEP_ARCHIVED: &str = "sweep.archived";
    pub const SWEEP_SKIPPED_RECENT: &str = "sweep.skipped_recent";
    pub const SWEEP_SKIPPED_MISSING: &str = "sweep.skipped_missing";
    pub const SWEEP_INTEGRITY_FAILURE: &str = "sweep.integrity_failure";
    pub const SWEEP_ALREADY_FINALIZED: &str = "sweep.already_finalized";
    pub const SWEEP_FAILED: &str = "sweep.failed";
    pub const SWEEP_FINISHED: &str = "sweep.finished";

    // Audit stage
    pub const AUDIT_RESULT: &str = "audit.result";

    // Config/init events
    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const CONFIG_DEFAULT_USED: &str = "config.default_used";
    pub const CONFIG_ERROR: &str = "config.error";

    // Error events
    pub const INTERNAL_ERROR: &str = "internal_error";

    pub const ALL: &[&str] = &[
        RUN_STARTED,
        RUN_FINISHED,
        SCHEDULE_BLOCK_CREATED,
        SCHEDULE_FINISHED,
        WRITE_UPLOADED,
        WRITE_CONFLICT,
        WRITE_FAILED,
        WRITE_FINISHED,
        SWEEP_ARCHIVED,
        SWEEP_SKIPPED_RECENT,
        SWEEP_SKIPPED_MISSING,
        SWEEP_INTEGRITY_FAILURE,
        SWEEP_ALREADY_FINALIZED,
        SWEEP_FAILED,
        SWEEP_FINISHED,
        AUDIT_RESULT,
        CONFIG_LOADED,
        CONFIG_DEFAULT_USED,
        CONFIG_ERROR,
        INTERNAL_ERROR,
    ];
}

/// A structured log event for JSONL output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    /// Timestamp when the event occurred.
    pub ts: DateTime<Utc>,

    /// Log level.
    pub level: Level,

    /// Event name (e.g., "run.started", "sweep.archived").
    pub event: String,

    /// Unique ID for this invocation.
    pub run_id: String,

    /// Current pipeline stage.
    pub stage: Stage,

    /// Host identifier.
    pub host_id: String,

    /// Human-readable message.
    pub message: String,

    /// Additional structured fields (stable keys).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub fields: HashMap<String, serde_json::Value>,

    /// Measure kind when the event concerns a block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measure_type: Option<MeasureType>,

    /// Ledger id when the event concerns a block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_id: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_id: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_id: Option<i64>,
}

impl LogEvent {
    /// Create a new log event with required fields.
    pub fn new(
        level: Level,
        event: impl Into<String>,
        run_id: impl Into<String>,
        host_id: impl Into<String>,
        stage: Stage,
        message: impl Into<String>,
    ) -> Self {
        LogEvent {
            ts: Utc::now(),
            level,
            event: event.into(),
            run_id: run_id.into(),
            stage,
            host_id: host_id.into(),
            message: message.into(),
            fields: HashMap::new(),
            measure_type: None,
            block_id: None,
            start_id: None,
            end_id: None,
        }
    }

    /// Add a field to the event.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.fields.insert(key.into(), v);
        }
        self
    }

    /// Set block context.
    pub fn with_block(mut self, block: &Block) -> Self {
        self.measure_type = Some(block.measure_type);
        self.block_id = Some(block.id);
        self.start_id = Some(block.range.start_id);
        self.end_id = Some(block.range.end_id);
        self
    }

    /// Serialize to a single JSON line.
    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"error":"serialization_failed","event":"{}"}}"#,
                self.event
            )
        })
    }
}

/// Context for generating log events with a consistent run ID.
#[derive(Debug, Clone)]
pub struct LogContext {
    /// Unique ID for this invocation.
    pub run_id: String,
    /// Host identifier.
    pub host_id: String,
}

impl LogContext {
    pub fn new(run_id: impl Into<String>, host_id: impl Into<String>) -> Self {
        LogContext {
            run_id: run_id.into(),
            host_id: host_id.into(),
        }
    }

    /// Create an event with this context.
    pub fn event(
        &self,
        level: Level,
        event: impl Into<String>,
        stage: Stage,
        message: impl Into<String>,
    ) -> LogEvent {
        LogEvent::new(level, event, &self.run_id, &self.host_id, stage, message)
    }

    pub fn info(
        &self,
        event: impl Into<String>,
        stage: Stage,
        message: impl Into<String>,
    ) -> LogEvent {
        self.event(Level::Info, event, stage, message)
    }

    pub fn warn(
        &self,
        event: impl Into<String>,
        stage: Stage,
        message: impl Into<String>,
    ) -> LogEvent {
        self.event(Level::Warn, event, stage, message)
    }

    pub fn error(
        &self,
        event: impl Into<String>,
        stage: Stage,
        message: impl Into<String>,
    ) -> LogEvent {
        self.event(Level::Error, event, stage, message)
    }
}
