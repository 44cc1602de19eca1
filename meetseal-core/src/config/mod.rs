//! Configuration management
//!
//! Environment-based configuration with TOML file support, defaults and
//! validation. Environment variables follow the pattern
//! `MEETSEAL_<SECTION>_<KEY>`.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,

    /// Session configuration
    pub session: SessionConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include target module
    pub with_target: bool,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics collection
    pub enabled: bool,
}

/// What to do with sends while the session is not ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendPolicy {
    /// Queue the message and flush it once the session is ready
    Buffer,
    /// Fail the send immediately
    Reject,
}

/// Encrypted chat session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Superseded epoch keys retained for late message decryption
    pub epoch_cache_size: usize,

    /// Deadline for publishing one rotation's envelopes
    #[serde(with = "humantime_serde")]
    pub rotation_timeout: Duration,

    /// Consecutive rotation failures before the session enters the
    /// error state
    pub max_rotation_failures: u32,

    /// Behavior of sends while not ready
    pub send_policy: SendPolicy,

    /// Maximum buffered outbound messages under [`SendPolicy::Buffer`]
    pub max_outbox: usize,

    /// Event broadcast channel capacity
    pub event_capacity: usize,

    /// Session command queue depth
    pub command_queue_depth: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_target: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            epoch_cache_size: 3,
            rotation_timeout: Duration::from_secs(10),
            max_rotation_failures: 3,
            send_policy: SendPolicy::Buffer,
            max_outbox: 64,
            event_capacity: 100,
            command_queue_depth: 256,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Example: `MEETSEAL_SESSION_EPOCH_CACHE_SIZE=5`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Logging config
        if let Ok(level) = env::var("MEETSEAL_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(json) = env::var("MEETSEAL_LOG_JSON") {
            config.logging.json_format = json
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid JSON flag: {}", e)))?;
        }

        // Metrics config
        if let Ok(enabled) = env::var("MEETSEAL_METRICS_ENABLED") {
            config.metrics.enabled = enabled
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid metrics flag: {}", e)))?;
        }

        // Session config
        if let Ok(size) = env::var("MEETSEAL_SESSION_EPOCH_CACHE_SIZE") {
            config.session.epoch_cache_size = size.parse().map_err(|e| {
                ConfigError::InvalidValue(format!("Invalid epoch cache size: {}", e))
            })?;
        }
        if let Ok(timeout) = env::var("MEETSEAL_SESSION_ROTATION_TIMEOUT_SECS") {
            let secs: u64 = timeout.parse().map_err(|e| {
                ConfigError::InvalidValue(format!("Invalid rotation timeout: {}", e))
            })?;
            config.session.rotation_timeout = Duration::from_secs(secs);
        }
        if let Ok(max) = env::var("MEETSEAL_SESSION_MAX_ROTATION_FAILURES") {
            config.session.max_rotation_failures = max.parse().map_err(|e| {
                ConfigError::InvalidValue(format!("Invalid max rotation failures: {}", e))
            })?;
        }
        if let Ok(policy) = env::var("MEETSEAL_SESSION_SEND_POLICY") {
            config.session.send_policy = match policy.to_lowercase().as_str() {
                "buffer" => SendPolicy::Buffer,
                "reject" => SendPolicy::Reject,
                other => {
                    return Err(ConfigError::InvalidValue(format!(
                        "Invalid send policy: {}",
                        other
                    )))
                }
            };
        }
        if let Ok(max) = env::var("MEETSEAL_SESSION_MAX_OUTBOX") {
            config.session.max_outbox = max
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid max outbox: {}", e)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        if self.session.epoch_cache_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "epoch_cache_size must be greater than 0".to_string(),
            ));
        }

        if self.session.rotation_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "rotation_timeout must be greater than 0".to_string(),
            ));
        }

        if self.session.max_rotation_failures == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_rotation_failures must be greater than 0".to_string(),
            ));
        }

        if self.session.max_outbox == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_outbox must be greater than 0".to_string(),
            ));
        }

        if self.session.event_capacity == 0 || self.session.command_queue_depth == 0 {
            return Err(ConfigError::ValidationFailed(
                "channel capacities must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
