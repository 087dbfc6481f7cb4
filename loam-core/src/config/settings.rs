//! Settings configuration loaded from TOML files.
//!
//! This module handles configuration stored in TOML format in the XDG config
//! directory (`~/.config/loam/config.toml`). Every knowledge field is optional
//! here; [`super::KnowledgeSettings`] holds the resolved values.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG_TOML: &str = r#"# loam configuration

[knowledge]
# Root of the default project (markdown files live here)
# home = "~/loam"
project_name = "main"
sync_delay_ms = 1000

[knowledge.search]
page_size = 10

[knowledge.context]
depth = 1
max_related = 10
timeframe = "7d"

[logging]
level = "info"
"#;

/// Settings loaded from the TOML configuration file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    /// Knowledge engine configuration
    #[serde(default)]
    pub knowledge: KnowledgeToolsSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Logging settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// Log level (error, warn, info, debug, trace) or a full `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Knowledge engine configuration as written by the user.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KnowledgeToolsSettings {
    /// Root directory of the default project
    pub home: Option<String>,

    /// Name of the default project
    pub project_name: Option<String>,

    /// Override for the data directory (index DB, watcher status)
    pub data_root_override: Option<String>,

    /// Optional override for the knowledge index DB path
    pub knowledge_db_path_override: Option<String>,

    /// Optional override for the watcher status file
    pub watch_status_path_override: Option<String>,

    /// Quiet period before the watcher runs a sync pass
    pub sync_delay_ms: Option<u64>,

    /// Search defaults
    #[serde(default)]
    pub search: KnowledgeSearchSettings,

    /// Graph context defaults
    #[serde(default)]
    pub context: KnowledgeContextSettings,
}

/// Knowledge search defaults
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KnowledgeSearchSettings {
    pub page_size: Option<usize>,
    pub max_page_size: Option<usize>,
    pub snippet_chars: Option<usize>,
}

/// Graph context defaults
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KnowledgeContextSettings {
    pub depth: Option<u8>,
    pub max_depth: Option<u8>,
    pub max_related: Option<usize>,
    pub timeframe: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Errors that can occur when loading settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config directory not found")]
    ConfigDirNotFound,
}

impl Settings {
    /// Load settings from the TOML configuration file.
    ///
    /// If the config file doesn't exist, creates it with default values.
    pub fn load() -> Result<Self, SettingsError> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            tracing::info!("Creating default configuration at {:?}", config_path);
            Self::create_default_config(&config_path)?;
        }

        let content = fs::read_to_string(&config_path)?;
        Self::from_toml(&content)
    }

    /// Parse settings from TOML content.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(content)?;
        Ok(settings)
    }

    /// Serialize settings to TOML content.
    pub fn to_toml(&self) -> Result<String, SettingsError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Get the configuration file path.
    ///
    /// Uses `LOAM_CONFIG_DIR` when set, otherwise `~/.config/loam/config.toml`.
    pub fn config_path() -> Result<PathBuf, SettingsError> {
        if let Ok(override_dir) = std::env::var("LOAM_CONFIG_DIR") {
            let dir = PathBuf::from(override_dir);
            return Ok(dir.join("config.toml"));
        }

        let config_dir = dirs::config_dir()
            .ok_or(SettingsError::ConfigDirNotFound)?
            .join("loam");

        Ok(config_dir.join("config.toml"))
    }

    fn create_default_config(path: &PathBuf) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, DEFAULT_CONFIG_TOML)?;
        Ok(())
    }

    /// Save settings to a specific file path.
    pub fn save_to_path(&self, path: &PathBuf) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = self.to_toml()?;
        fs::write(path, content)?;
        Ok(())
    }
}
