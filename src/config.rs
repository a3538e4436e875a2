use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

use crate::audio::EncodingProfile;
use crate::session::{default_storage_dir, SessionConfig, DEFAULT_HISTORY_CAPACITY};

/// Default config file location (extension optional)
pub const DEFAULT_CONFIG_PATH: &str = "config/loqa-recorder";

/// Environment override prefix, e.g. `LOQA_RECORDER__SERVICE__HTTP__PORT=9000`
pub const ENV_PREFIX: &str = "LOQA_RECORDER";

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct RecorderConfig {
    /// Recordings directory; `~` is expanded. Defaults to `~/.loqa/recordings`.
    #[serde(default)]
    pub storage_dir: Option<String>,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    /// Lifecycle events kept in memory for the HTTP event log
    #[serde(default = "default_event_log_capacity")]
    pub event_log_capacity: usize,
    /// Finished sessions kept for `/recording/history`
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

fn default_service_name() -> String {
    "loqa-recorder".to_string()
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3030
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_channels() -> u16 {
    1
}

fn default_event_log_capacity() -> usize {
    1000
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            storage_dir: None,
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            event_log_capacity: default_event_log_capacity(),
            history_capacity: default_history_capacity(),
        }
    }
}

impl Config {
    /// Load from `path` (if the file exists) layered under environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to load config from {}", path))?;

        settings
            .try_deserialize()
            .context("Failed to parse recorder config")
    }

    pub fn session_config(&self) -> SessionConfig {
        let profile = EncodingProfile {
            sample_rate: self.recorder.sample_rate,
            channels: self.recorder.channels,
            ..EncodingProfile::default()
        };

        SessionConfig {
            profile,
            storage_dir: self.recorder.storage_dir(),
            history_capacity: self.recorder.history_capacity,
        }
    }
}

impl RecorderConfig {
    /// Resolved recordings directory, `None` if nothing could be resolved
    pub fn storage_dir(&self) -> Option<PathBuf> {
        match &self.configured_dir() {
            Some(raw) => match shellexpand::full(raw) {
                Ok(expanded) => Some(PathBuf::from(expanded.as_ref())),
                Err(e) => {
                    tracing::warn!("Cannot expand storage_dir {}: {}", raw, e);
                    None
                }
            },
            None => default_storage_dir(),
        }
    }

    fn configured_dir(&self) -> Option<String> {
        self.storage_dir.clone().filter(|s| !s.trim().is_empty())
    }
}
