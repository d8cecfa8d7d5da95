//! Runtime configuration (`runtime.toml`).
//!
//! Every field carries a serde default, so a missing file or an empty
//! table yields the reference deployment paths from [`crate::consts`].

use crate::consts;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`RuntimeConfig`].
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Control socket path (removed and re-created on startup).
    #[serde(default = "default_control_socket")]
    pub control_socket: PathBuf,

    /// Log transport socket path.
    #[serde(default = "default_log_socket")]
    pub log_socket: PathBuf,

    /// Directory scanned for `libplc_*.so` artifacts.
    #[serde(default = "default_build_dir")]
    pub build_dir: PathBuf,

    /// Plugin configuration file.
    #[serde(default = "default_plugin_config")]
    pub plugin_config: PathBuf,

    /// SCHED_FIFO priority requested for the scan thread.
    #[serde(default = "default_rt_priority")]
    pub rt_priority: i32,

    /// Interval between statistics reports [s]; 0 disables the reporter.
    #[serde(default)]
    pub stats_interval_secs: u64,

    /// Attempt an initial program start at boot when an artifact exists.
    #[serde(default)]
    pub autostart: bool,
}

fn default_control_socket() -> PathBuf {
    PathBuf::from(consts::CONTROL_SOCKET_PATH)
}

fn default_log_socket() -> PathBuf {
    PathBuf::from(consts::LOG_SOCKET_PATH)
}

fn default_build_dir() -> PathBuf {
    PathBuf::from(consts::BUILD_DIR)
}

fn default_plugin_config() -> PathBuf {
    PathBuf::from(consts::PLUGIN_CONFIG_PATH)
}

fn default_rt_priority() -> i32 {
    consts::SCAN_RT_PRIORITY
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            control_socket: default_control_socket(),
            log_socket: default_log_socket(),
            build_dir: default_build_dir(),
            plugin_config: default_plugin_config(),
            rt_priority: default_rt_priority(),
            stats_interval_secs: 0,
            autostart: false,
        }
    }
}

impl RuntimeConfig {
    /// Load a configuration file.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load a configuration file, falling back to defaults when it does
    /// not exist. Parse errors on an existing file are still surfaced.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!("config file {:?} not found, using defaults", path);
            Ok(Self::default())
        }
    }
}
