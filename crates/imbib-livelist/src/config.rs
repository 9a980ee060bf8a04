//! Configuration for the live item list
//!
//! Timing and batching parameters for the engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Quiet period before a search edit re-queries, in milliseconds
    pub search_debounce_ms: u64,
    /// Quiet period before "attachment files deleted" is acted on, in milliseconds
    pub file_deleted_debounce_ms: u64,
    /// Rows processed between intermediate publishes during a reconcile pass
    pub update_threshold: usize,
    /// Remote files live on a WebDAV server instead of the sync server
    pub webdav_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            search_debounce_ms: 150,
            file_deleted_debounce_ms: 100,
            update_threshold: 20,
            webdav_enabled: false,
        }
    }
}

impl EngineConfig {
    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    pub fn file_deleted_debounce(&self) -> Duration {
        Duration::from_millis(self.file_deleted_debounce_ms)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Serialize configuration to TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Load configuration from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json_str)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.update_threshold == 0 {
            return Err(ConfigError::OutOfRange(
                "update_threshold must be positive".to_string(),
            ));
        }

        if self.search_debounce_ms > 10_000 {
            return Err(ConfigError::OutOfRange(
                "search_debounce_ms must be at most 10000".to_string(),
            ));
        }

        if self.file_deleted_debounce_ms > 10_000 {
            return Err(ConfigError::OutOfRange(
                "file_deleted_debounce_ms must be at most 10000".to_string(),
            ));
        }

        Ok(())
    }
}
