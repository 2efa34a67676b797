use shared::messaging::{KafkaConfig, MessageError};
use shared::observability::{LogConfig, ObservabilityError};
use std::env;
use std::time::Duration;

use crate::workers::RetryPolicy;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub kafka: KafkaConfig,
    pub retry: RetryPolicy,
    pub logging: LogConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| env::var(key).ok())
    }

    pub fn from_vars<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let retry_defaults = RetryPolicy::default();

        let config = Config {
            kafka: KafkaConfig::from_vars(&var, "subscriber-service")?,
            retry: RetryPolicy {
                max_attempts: parse_or(&var, "LISTENER_MAX_ATTEMPTS", retry_defaults.max_attempts)?,
                backoff: Duration::from_millis(parse_or(
                    &var,
                    "LISTENER_BACKOFF_MS",
                    retry_defaults.backoff.as_millis() as u64,
                )?),
            },
            logging: LogConfig::from_vars(&var, "subscriber-service")?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidConfig("LISTENER_MAX_ATTEMPTS must be > 0".to_string()));
        }

        Ok(())
    }
}

fn parse_or<F, T>(var: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match var(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("cannot parse '{}'", raw),
        }),
        None => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Kafka(#[from] MessageError),

    #[error(transparent)]
    Logging(#[from] ObservabilityError),
}
