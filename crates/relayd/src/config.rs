//! Engine configuration and the facade error type

use relayd_queue::{BatcherConfig, QueueConfig, QueueError};
use relayd_resilience::{
    BulkheadConfig, CircuitBreakerConfig, ConfigError, RateLimiterConfig, RetryPolicy,
    TransportConfig,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the [`Engine`](crate::Engine)
#[derive(Error, Debug)]
pub enum EngineError {
    // ============ Configuration Errors ============
    /// A component setting is out of range
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The configuration document could not be parsed
    #[error("Failed to parse engine configuration: {0}")]
    Parse(#[from] serde_json::Error),

    // ============ Queue Errors ============
    /// The queue refused the job
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Settings for every engine component
///
/// Missing sections and fields fall back to their defaults, so
/// `{"retry": {"max_attempts": 5}}` is a complete document. Durations are
/// written as integer milliseconds (`base_delay_ms`, `reset_timeout_ms`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-call retries inside the transport
    pub retry: RetryPolicy,
    /// Outbound token bucket
    pub rate_limiter: RateLimiterConfig,
    /// Downstream circuit breaker
    pub circuit_breaker: CircuitBreakerConfig,
    /// Concurrency cap on downstream calls
    pub bulkhead: BulkheadConfig,
    /// Job requeue policy
    pub queue: QueueConfig,
    /// Dispatch cycle settings
    pub batcher: BatcherConfig,
}

impl EngineConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validates every section and the limits they share
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.transport_config().validate()?;
        self.queue.validate()?;
        self.batcher.validate()?;
        if self.batcher.concurrency > self.bulkhead.max_concurrency {
            return Err(ConfigError::invalid(
                "batcher",
                "concurrency",
                "must not exceed bulkhead.max_concurrency",
            ));
        }
        Ok(())
    }

    /// Transport sections bundled for [`ReliableTransport`](relayd_resilience::ReliableTransport)
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            retry: self.retry.clone(),
            rate_limiter: self.rate_limiter.clone(),
            circuit_breaker: self.circuit_breaker.clone(),
            bulkhead: self.bulkhead.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{
                "retry": { "max_attempts": 5, "base_delay_ms": 250 },
                "circuit_breaker": { "name": "eth-mainnet", "reset_timeout_ms": 10000 },
                "batcher": { "batch_size": 25 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.retry.max_delay, RetryPolicy::default().max_delay);
        assert_eq!(config.circuit_breaker.name, "eth-mainnet");
        assert_eq!(config.circuit_breaker.reset_timeout, Duration::from_secs(10));
        assert_eq!(config.batcher.batch_size, 25);
        assert_eq!(config.batcher.concurrency, BatcherConfig::default().concurrency);
        assert_eq!(config.queue, QueueConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = EngineConfig::from_json_str(r#"{ "bulkhead": { "max_concurrency": 0 } }"#)
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));

        let err = EngineConfig::from_json_str(r#"{ "rate_limiter": { "requests_per_second": -1.0 } }"#)
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_concurrency_bounded_by_bulkhead() {
        let err = EngineConfig::from_json_str(
            r#"{ "bulkhead": { "max_concurrency": 2 }, "batcher": { "concurrency": 8 } }"#,
        )
        .unwrap_err();
        match err {
            EngineError::Config(ConfigError::Invalid {
                component, field, ..
            }) => {
                assert_eq!(component, "batcher");
                assert_eq!(field, "concurrency");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let ok = EngineConfig::from_json_str(
            r#"{ "bulkhead": { "max_concurrency": 8 }, "batcher": { "concurrency": 8 } }"#,
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_malformed_document_rejected() {
        let err = EngineConfig::from_json_str("{ retry: ").unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));
        assert!(err.to_string().starts_with("Failed to parse engine configuration"));
    }

    #[test]
    fn test_json_round_trip_uses_millis() {
        let json = EngineConfig::default().to_json_string().unwrap();
        assert!(json.contains("\"base_delay_ms\": 100"));
        assert!(json.contains("\"poll_interval_ms\": 500"));
        assert_eq!(EngineConfig::from_json_str(&json).unwrap(), EngineConfig::default());
    }
}
