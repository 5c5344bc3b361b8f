//! Logging configuration.
//!
//! The level comes from `OA_LOG` (falling back to the bare level in
//! `RUST_LOG`), the format from `OA_LOG_FORMAT`, and `-v`/`-q`/`--log-format`
//! override both. `OA_LOG` also takes per-stage overrides, so
//! `OA_LOG=warn,sweep=debug` keeps everything quiet except sweep events.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::events::Stage;

/// Environment variable holding the log level and stage overrides.
pub const ENV_LOG: &str = "OA_LOG";
/// Environment variable holding the log format.
pub const ENV_LOG_FORMAT: &str = "OA_LOG_FORMAT";

/// Crates whose own diagnostics follow the default level.
const CRATE_TARGETS: [&str; 4] = ["oa_core", "oa_store", "oa_bundle", "oa_config"];

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Console lines for operators (default).
    #[default]
    Human,
    /// One JSON object per line, for log shippers.
    Jsonl,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "human" | "console" => Ok(LogFormat::Human),
            "jsonl" | "json" => Ok(LogFormat::Jsonl),
            _ => Err(format!("unknown log format: {}", s)),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LogFormat::Human => "human",
            LogFormat::Jsonl => "jsonl",
        })
    }
}

/// Log level filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Off,
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "off" | "quiet" => Ok(LogLevel::Off),
            _ => Err(format!("unknown log level: {}", s)),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        })
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Level for crate diagnostics and every stage without an override.
    pub level: LogLevel,
    /// Per-stage levels from `OA_LOG`.
    pub stage_levels: HashMap<Stage, LogLevel>,
    /// Omit timestamps from human output (set under systemd).
    pub without_time: bool,
}

impl LogConfig {
    /// Build the config from the process environment plus CLI overrides.
    pub fn from_env(cli_level: Option<LogLevel>, cli_format: Option<LogFormat>) -> Self {
        let var = |name: &str| std::env::var(name).ok();
        let mut config = Self::from_sources(
            var(ENV_LOG).as_deref(),
            var("RUST_LOG").as_deref(),
            var(ENV_LOG_FORMAT).as_deref(),
            cli_level,
            cli_format,
        );
        // journald stamps every line itself
        config.without_time = std::env::var_os("JOURNAL_STREAM").is_some();
        config
    }

    /// Resolve the config from raw variable values. Unparseable parts are
    /// ignored so a typo never stops a scheduled run.
    pub fn from_sources(
        oa_log: Option<&str>,
        rust_log: Option<&str>,
        log_format: Option<&str>,
        cli_level: Option<LogLevel>,
        cli_format: Option<LogFormat>,
    ) -> Self {
        let mut config = LogConfig::default();

        match oa_log {
            Some(value) => config.apply_directives(value),
            None => {
                // Only RUST_LOG's bare level applies here; its target
                // directives are handed to EnvFilter unchanged.
                if let Some(level) = rust_log
                    .into_iter()
                    .flat_map(|v| v.split(','))
                    .find_map(|part| part.trim().parse::<LogLevel>().ok())
                {
                    config.level = level;
                }
            }
        }

        if let Some(format) = log_format.and_then(|v| v.parse().ok()) {
            config.format = format;
        }
        if let Some(level) = cli_level {
            config.level = level;
        }
        if let Some(format) = cli_format {
            config.format = format;
        }
        config
    }

    fn apply_directives(&mut self, value: &str) {
        for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.split_once('=') {
                None => {
                    if let Ok(level) = part.parse() {
                        self.level = level;
                    }
                }
                Some((stage, level)) => {
                    let parsed = (stage.trim().parse::<Stage>(), level.trim().parse::<LogLevel>());
                    if let (Ok(stage), Ok(level)) = parsed {
                        self.stage_levels.insert(stage, level);
                    }
                }
            }
        }
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Effective level for events of `stage`.
    pub fn stage_level(&self, stage: Stage) -> LogLevel {
        self.stage_levels
            .get(&stage)
            .copied()
            .unwrap_or(self.level)
    }

    /// EnvFilter directive: crate targets at the default level, then every
    /// stage's event-name targets at that stage's level.
    pub fn filter_directive(&self) -> String {
        let crates = CRATE_TARGETS
            .iter()
            .map(|target| format!("{}={}", target, self.level));
        let stages = Stage::ALL.into_iter().flat_map(|stage| {
            let level = self.stage_level(stage);
            stage
                .event_prefixes()
                .iter()
                .map(move |prefix| format!("{}={}", prefix, level))
        });
        crates.chain(stages).collect::<Vec<_>>().join(",")
    }
}
