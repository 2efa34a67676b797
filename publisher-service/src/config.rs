use shared::messaging::{KafkaConfig, MessageError};
use shared::observability::{LogConfig, ObservabilityError};
use std::env;

use crate::emitter::DeliveryMode;
use crate::targets::PublishTarget;
use crate::workers::{OverflowPolicy, PoolConfig};

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub kafka: KafkaConfig,
    pub publish: PublishConfig,
    pub logging: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub delivery: DeliveryMode,
    pub pool: PoolConfig,
    pub targets: Vec<PublishTarget>,
}

impl PublishConfig {
    pub fn target(&self, route: &str) -> Option<&PublishTarget> {
        self.targets.iter().find(|t| t.route == route)
    }
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
        let pool_defaults = PoolConfig::default();

        let mut targets = PublishTarget::defaults();
        for (position, target) in targets.iter_mut().enumerate() {
            let key = format!("PUBLISH_TOPIC{}_COUNT", position + 1);
            target.count = parse_or(&var, &key, target.count)?;
        }

        let config = Config {
            server: ServerConfig {
                host: var("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: var("SERVER_PORT")
                    .unwrap_or_else(|| "8080".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidPort)?,
            },
            kafka: KafkaConfig::from_vars(&var, "publisher-service")?,
            publish: PublishConfig {
                delivery: if parse_or(&var, "PUBLISH_AWAIT_DELIVERY", false)? {
                    DeliveryMode::AwaitAcks
                } else {
                    DeliveryMode::FireAndForget
                },
                pool: PoolConfig {
                    workers: parse_or(&var, "PUBLISH_WORKERS", pool_defaults.workers)?,
                    queue_capacity: parse_or(
                        &var,
                        "PUBLISH_QUEUE_CAPACITY",
                        pool_defaults.queue_capacity,
                    )?,
                    overflow: match var("PUBLISH_OVERFLOW") {
                        Some(raw) => raw
                            .parse::<OverflowPolicy>()
                            .map_err(|reason| ConfigError::InvalidValue {
                                key: "PUBLISH_OVERFLOW".to_string(),
                                reason,
                            })?,
                        None => pool_defaults.overflow,
                    },
                },
                targets,
            },
            logging: LogConfig::from_vars(&var, "publisher-service")?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        if self.publish.pool.workers == 0 {
            return Err(ConfigError::InvalidConfig("PUBLISH_WORKERS must be > 0".to_string()));
        }

        if self.publish.pool.queue_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "PUBLISH_QUEUE_CAPACITY must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
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
    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Kafka(#[from] MessageError),

    #[error(transparent)]
    Logging(#[from] ObservabilityError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();

        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.kafka.client_id, "publisher-service");
        assert_eq!(config.publish.delivery, DeliveryMode::FireAndForget);
        assert_eq!(config.publish.pool.workers, 10);
        assert_eq!(config.publish.pool.overflow, OverflowPolicy::Block);
        assert_eq!(config.publish.targets, PublishTarget::defaults());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("SERVER_PORT", "9000"),
            ("KAFKA_BROKERS", "kafka:29092"),
            ("PUBLISH_AWAIT_DELIVERY", "true"),
            ("PUBLISH_WORKERS", "4"),
            ("PUBLISH_OVERFLOW", "reject"),
            ("PUBLISH_TOPIC3_COUNT", "42"),
        ])
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.kafka.bootstrap_servers(), "kafka:29092");
        assert_eq!(config.publish.delivery, DeliveryMode::AwaitAcks);
        assert_eq!(config.publish.pool.workers, 4);
        assert_eq!(config.publish.pool.overflow, OverflowPolicy::Reject);
        assert_eq!(config.publish.target("topic3").map(|t| t.count), Some(42));
        assert_eq!(config.publish.target("topic1").map(|t| t.count), Some(10_000));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(load(&[("SERVER_PORT", "0")]), Err(ConfigError::InvalidPort)));
        assert!(matches!(load(&[("SERVER_PORT", "http")]), Err(ConfigError::InvalidPort)));
        assert!(matches!(load(&[("PUBLISH_WORKERS", "0")]), Err(ConfigError::InvalidConfig(_))));
        assert!(matches!(
            load(&[("PUBLISH_TOPIC2_COUNT", "many")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            load(&[("PUBLISH_OVERFLOW", "drop")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(load(&[("KAFKA_BROKERS", ",")]), Err(ConfigError::Kafka(_))));
        assert!(matches!(load(&[("LOG_FORMAT", "xml")]), Err(ConfigError::Logging(_))));
    }

    #[test]
    fn test_unknown_route() {
        let config = load(&[]).unwrap();
        assert!(config.publish.target("topic4").is_none());
    }
}
