//! Broker configuration

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::domain::BrokerError;

pub const DEFAULT_QUEUE: &str = "machinery_tasks";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Queue used for both publishing and consuming.
    pub default_queue: String,
    pub consumer: ConsumerSettings,
    pub transport: TransportSettings,
}

/// Receive-loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerSettings {
    /// Delay before re-entering receive after a transport error. 0 retries immediately.
    pub receive_retry_backoff_ms: u64,
    /// Upper bound for the doubling backoff.
    pub max_receive_retry_backoff_ms: u64,
}

/// Settings for the bundled in-memory transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Deliveries before a message is dead-lettered automatically.
    pub max_delivery_count: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            default_queue: DEFAULT_QUEUE.to_string(),
            consumer: ConsumerSettings::default(),
            transport: TransportSettings::default(),
        }
    }
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            receive_retry_backoff_ms: 0,
            max_receive_retry_backoff_ms: 5_000,
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            max_delivery_count: 10,
        }
    }
}

impl BrokerConfig {
    /// Load configuration from an optional file and `TASKBUS__*` environment variables
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("TASKBUS").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    pub fn with_default_queue(mut self, queue: impl Into<String>) -> Self {
        self.default_queue = queue.into();
        self
    }

    pub fn validate(&self) -> Result<(), BrokerError> {
        if self.default_queue.trim().is_empty() {
            return Err(BrokerError::Config("default_queue must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BrokerConfig::default();
        assert_eq!(config.default_queue, DEFAULT_QUEUE);
        assert_eq!(config.consumer.receive_retry_backoff_ms, 0);
        assert_eq!(config.transport.max_delivery_count, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_queue_is_rejected() {
        let config = BrokerConfig::default().with_default_queue("  ");
        assert!(matches!(config.validate(), Err(BrokerError::Config(_))));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = BrokerConfig::load("does-not-exist/taskbus").unwrap();
        assert_eq!(config.default_queue, DEFAULT_QUEUE);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: BrokerConfig =
            serde_json::from_str(r#"{"default_queue":"orders","consumer":{"receive_retry_backoff_ms":50}}"#)
                .unwrap();
        assert_eq!(config.default_queue, "orders");
        assert_eq!(config.consumer.receive_retry_backoff_ms, 50);
        assert_eq!(config.consumer.max_receive_retry_backoff_ms, 5_000);
        assert_eq!(config.transport.max_delivery_count, 10);
    }
}
