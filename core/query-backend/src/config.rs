//! FILENAME: core/query-backend/src/config.rs
//! Backend configuration, serde JSON with the host's camelCase names.

use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid backend config json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid backend config: {0}")]
    Invalid(String),
}

/// Most rows one INSERT may carry. Each row binds one SQL variable, and
/// 32766 is the smallest variable limit of current SQLite builds.
pub const MAX_BATCH_SIZE: usize = 32_766;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendConfig {
    /// Upper bound on the init handshake. Loads use the request timeout.
    pub init_timeout_ms: u64,

    /// Per-call bound on steady-state requests. None waits indefinitely.
    pub request_timeout_ms: Option<u64>,

    /// Rows per INSERT statement during load, at most `MAX_BATCH_SIZE`.
    pub batch_size: usize,

    /// Cap on rows returned by `query_data`.
    pub query_row_limit: Option<usize>,

    /// SQLite file. None keeps the store in memory.
    pub database_path: Option<PathBuf>,

    /// Bounded request queue between bridge and worker.
    pub channel_capacity: usize,

    /// How long SQLite waits on a locked database file.
    pub busy_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            init_timeout_ms: 10_000,
            request_timeout_ms: None,
            batch_size: 1000,
            query_row_limit: None,
            database_path: None,
            channel_capacity: 64,
            busy_timeout_ms: 5_000,
        }
    }
}

impl BackendConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: BackendConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.init_timeout_ms == 0 {
            return Err(ConfigError::Invalid("initTimeoutMs must be positive".to_string()));
        }
        if self.request_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid("requestTimeoutMs must be positive".to_string()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batchSize must be positive".to_string()));
        }
        if self.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::Invalid(format!(
                "batchSize must be at most {}",
                MAX_BATCH_SIZE
            )));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid("channelCapacity must be positive".to_string()));
        }
        Ok(())
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Batch size the store actually uses.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(1, MAX_BATCH_SIZE)
    }

    pub fn in_memory() -> Self {
        BackendConfig::default()
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_query_row_limit(mut self, limit: usize) -> Self {
        self.query_row_limit = Some(limit);
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = timeout.as_millis() as u64;
        self
    }
}
