//! Configuration (layered: defaults < TOML file < env < code).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::background::PollConfig;
use crate::error::SidestreamError;
use crate::util::RetryPolicy;

const DEFAULT_MODEL: &str = "gpt-5-mini";
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8787";
const MIN_RETENTION_MINUTES: u64 = 15;
const MAX_RETENTION_MINUTES: u64 = 60;

/// Runtime configuration for the orchestrator, task manager and server.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SidestreamConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: String,
    /// Directory for the durable background-task store.
    pub state_dir: Option<PathBuf>,
    /// How long terminal task records are kept.
    pub retention_minutes: u64,
    /// Persist the stream cursor once per this many sequence numbers.
    pub sequence_persist_interval: u64,
    pub poll: PollConfig,
    pub consumer_throttle_ms: u64,
    pub retry: RetryPolicy,
    pub listen_addr: String,
}

impl std::fmt::Debug for SidestreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SidestreamConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| ".."))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("state_dir", &self.state_dir)
            .field("retention_minutes", &self.retention_minutes)
            .field("sequence_persist_interval", &self.sequence_persist_interval)
            .field("poll", &self.poll)
            .field("consumer_throttle_ms", &self.consumer_throttle_ms)
            .field("retry", &self.retry)
            .field("listen_addr", &self.listen_addr)
            .finish()
    }
}

impl Default for SidestreamConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: DEFAULT_MODEL.to_string(),
            state_dir: None,
            retention_minutes: 30,
            sequence_persist_interval: 10,
            poll: PollConfig::default(),
            consumer_throttle_ms: 50,
            retry: RetryPolicy::default(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
        }
    }
}

impl SidestreamConfig {
    /// Resolve the full layered configuration.
    ///
    /// The file is `$SIDESTREAM_CONFIG` if set, else `config.toml` in the
    /// platform config directory; a missing file is not an error.
    pub fn load() -> Result<Self, SidestreamError> {
        Self::load_from(None)
    }

    /// Like [`load`](Self::load), reading `path` instead of the configured file.
    pub fn load_from(path: Option<PathBuf>) -> Result<Self, SidestreamError> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let path = path
            .or_else(|| std::env::var_os("SIDESTREAM_CONFIG").map(PathBuf::from))
            .or_else(default_config_path);
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env();
        Ok(config.normalized())
    }

    /// Load from environment variables only, on top of defaults.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        config.apply_env();
        config.normalized()
    }

    pub fn from_file(path: &Path) -> Result<Self, SidestreamError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, SidestreamError> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| SidestreamError::Configuration(format!("invalid config file: {e}")))?;
        Ok(config.normalized())
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            self.base_url = Some(url);
        }
        if let Ok(model) = std::env::var("SIDESTREAM_MODEL") {
            self.model = model;
        }
        if let Ok(dir) = std::env::var("SIDESTREAM_STATE_DIR") {
            self.state_dir = Some(PathBuf::from(dir));
        }
        if let Some(minutes) = env_u64("SIDESTREAM_RETENTION_MINUTES") {
            self.retention_minutes = minutes;
        }
        if let Ok(addr) = std::env::var("SIDESTREAM_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
    }

    fn normalized(mut self) -> Self {
        self.retention_minutes = self
            .retention_minutes
            .clamp(MIN_RETENTION_MINUTES, MAX_RETENTION_MINUTES);
        self.sequence_persist_interval = self.sequence_persist_interval.max(1);
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_minutes * 60)
    }

    pub fn consumer_throttle(&self) -> Duration {
        Duration::from_millis(self.consumer_throttle_ms)
    }

    /// State directory, falling back to the platform data directory.
    pub fn resolved_state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("dev", "sidestream", "sidestream")
                .map(|dirs| dirs.data_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".sidestream"))
        })
    }
}

fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "sidestream", "sidestream")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
