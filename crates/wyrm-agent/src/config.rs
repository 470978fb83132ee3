//! Provider configuration persistence

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Model used when no configuration exists
pub const DEFAULT_MODEL: &str = "llama3.1:8b";

/// Which inference server a session talks to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Model name the server should run
    pub model: String,
    /// Base URL of the local server
    pub server_url: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            server_url: wyrm_ai::client::DEFAULT_URL.to_string(),
        }
    }
}

impl ProviderConfig {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wyrm")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        // Check for WYRM_CONFIG_PATH env var first
        if let Ok(path) = std::env::var("WYRM_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load the config, falling back to defaults when the file is missing
    /// or unreadable. Never fails.
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("failed to parse config file, using defaults: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("failed to read config file, using defaults: {}", e);
                Self::default()
            }
        }
    }

    /// Save the config to the per-user config file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }
}
