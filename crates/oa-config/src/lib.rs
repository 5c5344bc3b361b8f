//! Observation archival configuration loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for `obsarchive.toml`
//! - Config resolution (CLI → env → XDG → /etc → defaults)
//! - Semantic validation reporting every issue found

pub mod resolve;
pub mod settings;
pub mod validate;

pub use resolve::{resolve_config, ConfigSource, ResolvedConfig};
pub use settings::{
    ArchiveBackend, ArchiveConfig, DatabaseConfig, MonitoringConfig, ScheduleConfig, Settings,
    SweepConfig, WriteConfig,
};
pub use validate::{check_settings, validate_settings, ValidationError, ValidationResult};

use std::path::{Path, PathBuf};

/// Configuration file name looked up in each config directory.
pub const CONFIG_FILENAME: &str = "obsarchive.toml";

/// Settings together with where they came from.
#[derive(Debug, Clone)]
pub struct LoadedSettings {
    pub settings: Settings,
    pub path: Option<PathBuf>,
    pub source: ConfigSource,
}

/// Resolve, parse, and validate settings in one step.
///
/// With no config file anywhere on the resolution path the built-in
/// defaults are returned.
pub fn load_settings(cli_path: Option<&Path>) -> ValidationResult<LoadedSettings> {
    let resolved = resolve_config(cli_path);
    let settings = match &resolved.path {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };
    validate_settings(&settings)?;

    Ok(LoadedSettings {
        settings,
        path: resolved.path,
        source: resolved.source,
    })
}
