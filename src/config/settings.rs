//! User settings and preferences
//!
//! Manages application settings stored in ~/.pgsession/config.toml

use crate::config::connections::config_dir;
use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};

/// Application settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Log SQL text and timing for every statement
    #[serde(default = "default_true")]
    pub log_sql: bool,

    /// tracing filter directive, overrides PGSESSION_LOG / RUST_LOG
    #[serde(default)]
    pub log_filter: Option<String>,

    /// Database to switch to for cluster-level DDL (drop/rename database)
    #[serde(default = "default_maintenance_database")]
    pub maintenance_database: String,
}

fn default_true() -> bool {
    true
}

fn default_maintenance_database() -> String {
    "postgres".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_sql: default_true(),
            log_filter: None,
            maintenance_database: default_maintenance_database(),
        }
    }
}

/// Load settings from config file
pub fn load_settings() -> ConfigResult<Settings> {
    let path = config_dir()?.join("config.toml");
    if !path.exists() {
        return Ok(Settings::default());
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| ConfigError::NotFound(format!("Failed to read settings file: {}", e)))?;
    parse_settings(&content)
}

fn parse_settings(content: &str) -> ConfigResult<Settings> {
    let settings: Settings = toml::from_str(content)?;
    if settings.maintenance_database.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "maintenance_database must not be empty".to_string(),
        ));
    }
    Ok(settings)
}
