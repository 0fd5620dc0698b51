//! Dispatch configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use orb_protocol::Endpoint;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Runtime-wide dispatch settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DispatchConfig {
    /// Forward hops allowed per request before giving up.
    pub max_forwards: usize,
    /// Full re-lookup cycles allowed after the target adapter was destroyed.
    pub destroy_retries: usize,
    /// Upper bound for administrative waits on in-flight requests.
    pub completion_timeout_ms: u64,
    /// Capacity of the adapter event broadcast channel.
    pub event_capacity: usize,
    pub server_id: u32,
    pub orb_id: String,
    /// Endpoints advertised in every reference template.
    pub endpoints: Vec<Endpoint>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_forwards: 10,
            destroy_retries: 1,
            completion_timeout_ms: 5_000,
            event_capacity: 256,
            server_id: 1,
            orb_id: "orb".into(),
            endpoints: vec![Endpoint::new("127.0.0.1", 2809)],
        }
    }
}

impl DispatchConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_forwards == 0 {
            return Err(ConfigError::Invalid("maxForwards must be at least 1".into()));
        }
        if self.completion_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "completionTimeoutMs must be greater than zero".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("eventCapacity must be at least 1".into()));
        }
        Ok(())
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }
}
