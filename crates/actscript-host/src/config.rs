use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::info;

const APP_NAME: &str = "actscript";

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Settings for the script host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Whether scripts are loaded at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory containing `.txt` scripts (default: <data dir>/scripts)
    #[serde(default)]
    pub script_dir: Option<PathBuf>,

    /// Reload scripts when files in the directory change
    #[serde(default = "default_true")]
    pub hot_reload: bool,

    /// Minimum time between directory scans
    #[serde(default = "default_hot_reload_interval")]
    pub hot_reload_interval_ms: u64,

    /// Minimum time between scheduler ticks (50ms = 20Hz)
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_hot_reload_interval() -> u64 {
    1000
}

fn default_tick_interval() -> u64 {
    50
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            script_dir: None,
            hot_reload: true,
            hot_reload_interval_ms: default_hot_reload_interval(),
            tick_interval_ms: default_tick_interval(),
        }
    }
}

impl HostConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigLoadError> {
        if !path.exists() {
            return Err(ConfigLoadError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!(target: "scripting", "Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigLoadError> {
        toml::from_str(content).map_err(|e| ConfigLoadError::Parse(e.to_string()))
    }

    /// Script directory, falling back to the platform data directory
    pub fn script_dir(&self) -> PathBuf {
        self.script_dir.clone().unwrap_or_else(|| {
            data_dir()
                .map(|dir| dir.join("scripts"))
                .unwrap_or_else(|| PathBuf::from(".scripts"))
        })
    }

    pub fn hot_reload_interval(&self) -> Duration {
        Duration::from_millis(self.hot_reload_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Platform data directory for the host (logs, default scripts)
pub fn data_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_dir().to_path_buf())
}
