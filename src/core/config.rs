//! Configuration management for sessionscope.
//!
//! Handles loading and saving configuration from TOML files.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::DEFAULT_CHANNEL_CAPACITY;

/// Local config file name, looked up in the current directory.
pub const LOCAL_CONFIG_FILE: &str = ".sessionscope.toml";

/// Default event log file name inside the data directory.
pub const EVENTS_FILE_NAME: &str = "events.jsonl";

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Event dispatcher settings
    pub dispatcher: DispatcherSettings,

    /// Event storage settings
    pub storage: StorageConfig,
}

/// General application settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Working directory handed to plugins (defaults to the current directory)
    pub working_dir: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is unset
    pub log_level: String,
}

/// Event dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    /// Capacity of the aggregation channel
    pub channel_capacity: usize,
}

/// Event storage settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the JSON-lines event log
    pub events_file: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self { working_dir: None, log_level: "warn".to_string() }
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self { channel_capacity: DEFAULT_CHANNEL_CAPACITY }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Looks for config in:
    /// 1. `.sessionscope.toml` in current directory
    /// 2. `~/.config/sessionscope/config.toml`
    /// 3. Falls back to defaults
    pub fn load() -> anyhow::Result<Self> {
        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Some(global_config) = Self::config_dir().map(|d| d.join("config.toml")) {
            if global_config.exists() {
                return Self::load_from_file(&global_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the global config file.
    pub fn save(&self) -> anyhow::Result<()> {
        let config_dir =
            Self::config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        self.save_to(&config_dir.join("config.toml"))
    }

    /// Save configuration to a specific file.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("sessionscope"))
    }

    /// Get the data directory path (for the event log).
    pub fn data_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("sessionscope"))
    }

    /// Resolved event log path.
    pub fn events_path(&self) -> PathBuf {
        self.storage.events_file.clone().unwrap_or_else(|| {
            Self::data_dir()
                .unwrap_or_else(|| PathBuf::from(".sessionscope"))
                .join(EVENTS_FILE_NAME)
        })
    }

    /// Resolved working directory.
    pub fn working_dir(&self) -> PathBuf {
        self.general
            .working_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}
