use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tabsync_storage::{ApiConfig, RetryPolicy};
use tabsync_sync::{PollConfig, SyncConfig};

/// Contents of `config.toml`. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub retry: RetryPolicy,
    pub sync: SyncConfig,
    pub polling: PollConfig,
}

impl AppConfig {
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "tabsync", "Tabsync")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("Failed to parse configuration")
    }

    /// Reads `explicit` when given, which must exist. Otherwise reads the
    /// platform config file if there is one and falls back to defaults.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => {
                    tracing::debug!("No config file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config =
            Self::from_toml(&content).with_context(|| format!("In {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }
}
