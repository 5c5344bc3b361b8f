//! Configuration resolution and path discovery.
//!
//! Resolution order: CLI argument → environment variables → XDG paths →
//! system config → defaults.

use crate::CONFIG_FILENAME;
use std::path::{Path, PathBuf};

/// Where a configuration file was found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Explicitly provided via CLI argument.
    CliArgument,

    /// Set via environment variable.
    Environment,

    /// Found in XDG config directory.
    XdgConfig,

    /// Found in /etc/obsarchive/.
    SystemConfig,

    /// Using built-in defaults.
    #[default]
    BuiltinDefault,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::CliArgument => write!(f, "CLI argument"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::XdgConfig => write!(f, "XDG config"),
            ConfigSource::SystemConfig => write!(f, "system config"),
            ConfigSource::BuiltinDefault => write!(f, "builtin default"),
        }
    }
}

/// Discovered configuration file path.
#[derive(Debug, Clone, Default)]
pub struct ResolvedConfig {
    /// Path to obsarchive.toml (or None if not found).
    pub path: Option<PathBuf>,

    /// Source of the config (for diagnostics).
    pub source: ConfigSource,
}

/// Environment variable names.
pub const ENV_CONFIG_PATH: &str = "OBSARCHIVE_CONFIG";
pub const ENV_CONFIG_DIR: &str = "OBSARCHIVE_CONFIG_DIR";

/// Application name for XDG directories.
const APP_NAME: &str = "obsarchive";

/// Resolve the configuration file path.
///
/// 1. Explicit CLI path, returned even when missing so loading reports it
/// 2. `OBSARCHIVE_CONFIG` (direct path)
/// 3. `OBSARCHIVE_CONFIG_DIR` + `obsarchive.toml`
/// 4. XDG config directory (`~/.config/obsarchive/`)
/// 5. System config (`/etc/obsarchive/`)
/// 6. Built-in defaults (None)
pub fn resolve_config(cli_path: Option<&Path>) -> ResolvedConfig {
    if let Some(path) = cli_path {
        return ResolvedConfig {
            path: Some(path.to_path_buf()),
            source: ConfigSource::CliArgument,
        };
    }

    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return found(path, ConfigSource::Environment);
        }
    }

    if let Ok(config_dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = PathBuf::from(config_dir).join(CONFIG_FILENAME);
        if path.exists() {
            return found(path, ConfigSource::Environment);
        }
    }

    if let Some(dir) = xdg_config_dir() {
        let path = dir.join(CONFIG_FILENAME);
        if path.exists() {
            return found(path, ConfigSource::XdgConfig);
        }
    }

    let system_path = system_config_dir().join(CONFIG_FILENAME);
    if system_path.exists() {
        return found(system_path, ConfigSource::SystemConfig);
    }

    ResolvedConfig::default()
}

fn found(path: PathBuf, source: ConfigSource) -> ResolvedConfig {
    ResolvedConfig {
        path: Some(path),
        source,
    }
}

/// Get the XDG config directory for obsarchive.
pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Get the system config directory.
pub fn system_config_dir() -> PathBuf {
    PathBuf::from("/etc").join(APP_NAME)
}
