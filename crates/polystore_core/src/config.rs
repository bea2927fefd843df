use crate::error::{Result, StoreError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Driver-specific connection options as an opaque map.
///
/// The core never interprets these; each driver documents the keys it reads
/// (`url`, `namespace`, `database`, ...). Callers can populate the map from
/// environment variables or files outside the core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub options: IndexMap<String, String>,
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Fetch a required option, failing with a schema-level error naming the
    /// missing key.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| StoreError::schema(format!("missing connection option '{key}'")))
    }
}

/// Caller-level retry policy for idempotent operations.
///
/// Delay grows as `base_delay * backoff_factor^attempt`, capped at
/// `max_delay`. The pool itself never retries user operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub attempts: u32,
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
    pub backoff_factor: f64,
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Backoff delay before the given retry attempt (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.powi(attempt as i32);
        let delay = self.base_delay.mul_f64(factor.max(0.0));
        delay.min(self.max_delay)
    }
}

/// Connection-pool sizing and timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub min: usize,
    pub max: usize,
    #[serde(with = "duration_millis")]
    pub idle_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub acquire_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub health_check_interval: Duration,
    pub retry: RetryConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: 1,
            max: 10,
            idle_timeout: Duration::from_secs(300),
            acquire_timeout: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(60),
            retry: RetryConfig::default(),
        }
    }
}

impl PoolConfig {
    /// Small pool for tests and examples.
    pub fn small() -> Self {
        Self {
            min: 1,
            max: 3,
            ..Self::default()
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_backoff_is_capped() {
        let retry = RetryConfig {
            attempts: 5,
            base_delay: Duration::from_millis(100),
            backoff_factor: 10.0,
            max_delay: Duration::from_secs(1),
        };

        assert_eq!(retry.delay_for(0), Duration::from_millis(100));
        assert_eq!(retry.delay_for(1), Duration::from_secs(1));
        assert_eq!(retry.delay_for(4), Duration::from_secs(1));
    }

    #[test]
    fn connection_config_requires_named_options() {
        let config = ConnectionConfig::new().with("url", "ws://localhost:8000");
        assert_eq!(config.require("url").unwrap(), "ws://localhost:8000");
        assert!(config.require("namespace").is_err());
        assert_eq!(config.get_or("database", "test"), "test");
    }

    #[test]
    fn pool_config_serde_round_trip() {
        let config = PoolConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: PoolConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max, config.max);
        assert_eq!(back.idle_timeout, config.idle_timeout);
    }
}
