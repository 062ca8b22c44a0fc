//! frameloop configuration
//!
//! # Lookup order
//!
//! ```text
//! Priority (high → low):
//! 1. Explicit path (CLI --config)
//! 2. $FRAMELOOP_CONFIG
//! 3. User-level ($XDG_CONFIG_HOME/frameloop/config.toml, ~/.config/frameloop/config.toml)
//! 4. Default values
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use frameloop::util::config::load_config;
//!
//! let config = load_config(None).unwrap();
//! println!("{}", config.thread_name);
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "FRAMELOOP_CONFIG";

/// Executor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Name given to the thread spawned by `run_async`
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
    /// Stack size of the thread spawned by `run_async`
    #[serde(default)]
    pub stack_size: Option<usize>,
    /// Longest an idle pump sleeps before re-checking its frame, in ms
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Log level used by the binary (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log a statistics snapshot at shutdown
    #[serde(default)]
    pub collect_stats: bool,
}

fn default_thread_name() -> String {
    "frameloop-executor".to_string()
}

fn default_idle_timeout_ms() -> u64 {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            thread_name: default_thread_name(),
            stack_size: None,
            idle_timeout_ms: default_idle_timeout_ms(),
            log_level: default_log_level(),
            collect_stats: false,
        }
    }
}

impl ExecutorConfig {
    /// Idle timeout as a duration. Never zero.
    #[inline]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms.max(1))
    }
}

/// Get the user config directory
pub fn get_config_dir() -> Option<PathBuf> {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config).join("frameloop"));
    }

    if let Ok(home) = std::env::var("HOME") {
        return Some(PathBuf::from(home).join(".config").join("frameloop"));
    }

    if let Ok(appdata) = std::env::var("APPDATA") {
        return Some(PathBuf::from(appdata).join("frameloop"));
    }

    None
}

/// Get the user config file path (~/.config/frameloop/config.toml)
pub fn get_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("config.toml"))
}

/// Load configuration from a file
pub fn load_config_from(path: &Path) -> Result<ExecutorConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

/// Parse configuration from TOML text
pub fn parse_config(content: &str) -> Result<ExecutorConfig, ConfigError> {
    toml::from_str(content).map_err(ConfigError::Parse)
}

/// Load configuration following the lookup order.
///
/// An explicit path or `$FRAMELOOP_CONFIG` must exist; a missing user-level
/// file falls back to defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<ExecutorConfig, ConfigError> {
    if let Some(path) = explicit {
        return load_config_from(path);
    }

    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return load_config_from(Path::new(&path));
    }

    match get_config_path() {
        Some(path) if path.exists() => load_config_from(&path),
        _ => Ok(ExecutorConfig::default()),
    }
}

/// Save configuration to a file, creating parent directories
pub fn save_config(
    config: &ExecutorConfig,
    path: &Path,
) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
    }

    let content = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;
    fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Config parse error: {0}")]
    Parse(#[source] toml::de::Error),
    #[error("Config serialize error: {0}")]
    Serialize(#[source] toml::ser::Error),
}
