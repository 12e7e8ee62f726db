use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const TIMEOUT_ENV_VAR: &str = "UDP_RPC_TIMEOUT_MS";
pub const RETRIES_TIMEOUT_ENV_VAR: &str = "UDP_RPC_RETRIES_TIMEOUT_MS";

pub const DEFAULT_TIMEOUT_MS: u64 = 40;
pub const DEFAULT_RETRIES_TIMEOUT_MS: u64 = 150;

/// Timing configuration for an engine. Read once, when the engine is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// How long a single attempt waits for its response before a new attempt is made.
    pub timeout_ms: u64,
    /// How long a call may take in total, across all attempts.
    pub retries_timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self { timeout_ms: DEFAULT_TIMEOUT_MS, retries_timeout_ms: DEFAULT_RETRIES_TIMEOUT_MS }
    }
}

impl RpcConfig {
    pub fn new(timeout: Duration, retries_timeout: Duration) -> Self {
        Self { timeout_ms: saturating_ms(timeout), retries_timeout_ms: saturating_ms(retries_timeout) }
    }

    /// Build a configuration from `UDP_RPC_TIMEOUT_MS` and `UDP_RPC_RETRIES_TIMEOUT_MS`. Missing variables fall back
    /// to the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().merge_lookup(|key| std::env::var(key).ok())
    }

    /// Override the fields of `self` with whatever values `lookup` returns for the environment variable names.
    pub fn merge_lookup<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ms) = parse_ms(TIMEOUT_ENV_VAR, lookup(TIMEOUT_ENV_VAR))? {
            self.timeout_ms = ms;
        }
        if let Some(ms) = parse_ms(RETRIES_TIMEOUT_ENV_VAR, lookup(RETRIES_TIMEOUT_ENV_VAR))? {
            self.retries_timeout_ms = ms;
        }
        Ok(self)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retries_timeout(&self) -> Duration {
        Duration::from_millis(self.retries_timeout_ms)
    }
}

fn saturating_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_ms(key: &str, value: Option<String>) -> Result<Option<u64>, ConfigError> {
    match value {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key: key.to_string(), value }),
    }
}
