use anyhow::{Context, Result};
use llamactl_shared::{ModelConfig, RuntimeFlags};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::poller::PollerOptions;
use crate::supervisor::SupervisorOptions;
use crate::system;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server_command: Vec<String>,
    pub ready_marker: String,
    pub ready_timeout_secs: u64,
    pub stop_grace_secs: u64,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub model_history: usize,
    pub recent_window: usize,
    pub system_interval_ms: u64,
    pub system_history: usize,
    pub log_level: String,
    /// Flags applied to every model unless the model sets its own value.
    pub default_flags: RuntimeFlags,
    pub models: BTreeMap<String, ModelConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_command: vec!["llama-server".to_string()],
            ready_marker: "listening".to_string(),
            ready_timeout_secs: 60,
            stop_grace_secs: 5,
            poll_interval_ms: 1000,
            request_timeout_ms: 3000,
            model_history: 300,
            recent_window: 60,
            system_interval_ms: 1000,
            system_history: system::DEFAULT_HISTORY,
            log_level: "info".to_string(),
            default_flags: RuntimeFlags::default(),
            models: BTreeMap::new(),
        }
    }
}

/// Where [`Config::load`] got its configuration from.
///
/// Loading happens before the subscriber exists, so the caller logs this once
/// tracing is up.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    File(PathBuf),
    /// No file existed, defaults were written here.
    Created(PathBuf),
}

impl ConfigSource {
    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => info!("Loaded config from: {:?}", path),
            ConfigSource::Created(path) => {
                warn!("Config file not found, wrote defaults to: {:?}", path)
            }
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file at the default location is created with defaults. A
    /// missing explicit path is an error.
    pub fn load(path: Option<&Path>) -> Result<(Self, ConfigSource)> {
        match path {
            Some(path) => Ok((Self::read(path)?, ConfigSource::File(path.to_path_buf()))),
            None => Self::load_or_create(&Self::config_file_path()?),
        }
    }

    fn load_or_create(path: &Path) -> Result<(Self, ConfigSource)> {
        if path.exists() {
            return Ok((Self::read(path)?, ConfigSource::File(path.to_path_buf())));
        }
        let config = Self::default();
        config.save(path)?;
        Ok((config, ConfigSource::Created(path.to_path_buf())))
    }

    fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(config_dir) = path.parent() {
            std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
        }

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    pub fn config_file_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Failed to get config directory")?;
        Ok(config_dir.join("llamactl").join("config.json"))
    }

    /// The named model with `default_flags` filled in.
    pub fn model(&self, name: &str) -> Option<ModelConfig> {
        let model = self.models.get(name)?.clone();
        let flags = model.flags.merged_over(&self.default_flags);
        Some(ModelConfig { flags, ..model })
    }

    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions {
            server_command: self.server_command.clone(),
            ready_marker: self.ready_marker.clone(),
            ready_timeout: Duration::from_secs(self.ready_timeout_secs),
            stop_grace: Duration::from_secs(self.stop_grace_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn poller_options(&self) -> PollerOptions {
        PollerOptions {
            history_capacity: self.model_history,
            recent_window: self.recent_window,
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }

    pub fn system_interval(&self) -> Duration {
        Duration::from_millis(self.system_interval_ms)
    }
}
