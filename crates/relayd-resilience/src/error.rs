//! Error taxonomy shared by every resilience component
//!
//! Callers inspect [`ResilienceError::kind`] (or the predicates below) rather
//! than matching on concrete downstream error types, so "the downstream is
//! unhealthy", "we are locally overloaded" and "the request itself was bad"
//! stay distinguishable all the way up to the batch result.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Shared, cloneable wrapped cause
pub type BoxedCause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias for resilience operations
pub type Result<T> = std::result::Result<T, ResilienceError>;

/// Where a per-call deadline ran out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStage {
    /// Waiting for rate-limiter tokens (never dispatched)
    RateLimit,
    /// Sleeping between retry attempts (not dispatched again)
    Backoff,
    /// Waiting on the downstream call itself
    InFlight,
}

impl fmt::Display for TimeoutStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimit => write!(f, "waiting for rate limit"),
            Self::Backoff => write!(f, "retry backoff"),
            Self::InFlight => write!(f, "downstream call"),
        }
    }
}

/// Errors produced by, or flowing through, the resilience layer
#[derive(Error, Debug, Clone)]
pub enum ResilienceError {
    // ============ Downstream outcomes ============
    /// Connection failure, timeout or 5xx-class response. Retryable.
    #[error("transient failure: {message}")]
    Transient {
        /// Sanitized description
        message: String,
        /// Underlying cause, if any
        #[source]
        source: Option<BoxedCause>,
    },

    /// Validation, 4xx-class or malformed request. Never retried.
    #[error("client error: {message}")]
    Client {
        /// Sanitized description
        message: String,
    },

    // ============ Admission rejections ============
    /// Circuit breaker is open and the call was not attempted
    #[error("circuit '{name}' is open, retry after {retry_after:?}")]
    CircuitOpen {
        /// Breaker name
        name: String,
        /// Time until the breaker allows a probe
        retry_after: Duration,
    },

    /// Bulkhead is at capacity
    #[error("bulkhead full: {max_concurrency} calls already in flight")]
    BulkheadFull {
        /// Configured concurrency cap
        max_concurrency: usize,
    },

    /// Not enough rate-limiter tokens in non-blocking mode
    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimited {
        /// Estimated wait until enough tokens are available
        retry_after: Duration,
    },

    // ============ Terminal / control flow ============
    /// Every attempt failed with a retryable error
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made
        attempts: u32,
        /// Last observed failure
        #[source]
        last: Box<ResilienceError>,
    },

    /// The per-call deadline elapsed
    #[error("deadline exceeded during {stage}")]
    Timeout {
        /// Where the deadline ran out
        stage: TimeoutStage,
    },

    /// The caller cancelled the call while it was suspended
    #[error("operation cancelled")]
    Cancelled,
}

/// Discriminant of [`ResilienceError`] for programmatic handling and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`ResilienceError::Transient`]
    Transient,
    /// See [`ResilienceError::Client`]
    Client,
    /// See [`ResilienceError::CircuitOpen`]
    CircuitOpen,
    /// See [`ResilienceError::BulkheadFull`]
    BulkheadFull,
    /// See [`ResilienceError::RateLimited`]
    RateLimited,
    /// See [`ResilienceError::RetriesExhausted`]
    RetriesExhausted,
    /// See [`ResilienceError::Timeout`]
    Timeout,
    /// See [`ResilienceError::Cancelled`]
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Transient => "transient",
            Self::Client => "client",
            Self::CircuitOpen => "circuit_open",
            Self::BulkheadFull => "bulkhead_full",
            Self::RateLimited => "rate_limited",
            Self::RetriesExhausted => "retries_exhausted",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

impl ResilienceError {
    /// Transient failure without a wrapped cause
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            source: None,
        }
    }

    /// Transient failure wrapping a cause
    pub fn transient_with<E>(message: impl Into<String>, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transient {
            message: message.into(),
            source: Some(Arc::new(cause)),
        }
    }

    /// Client/validation failure
    pub fn client(message: impl Into<String>) -> Self {
        Self::Client {
            message: message.into(),
        }
    }

    /// Map an HTTP status code onto the taxonomy
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        let message = format!("HTTP {}: {}", status, message.into());
        if crate::retry::HttpRetryClassifier::is_status_retryable(status) {
            Self::transient(message)
        } else {
            Self::client(message)
        }
    }

    /// Map a JSON-RPC error code onto the taxonomy
    pub fn from_rpc_code(code: i64, message: impl Into<String>) -> Self {
        let message = format!("RPC error {}: {}", code, message.into());
        if crate::retry::RpcRetryClassifier::is_code_retryable(code) {
            Self::transient(message)
        } else {
            Self::client(message)
        }
    }

    /// Returns the kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient { .. } => ErrorKind::Transient,
            Self::Client { .. } => ErrorKind::Client,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::BulkheadFull { .. } => ErrorKind::BulkheadFull,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Returns true if the retry executor may try again
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns true if the call was turned away locally without reaching the downstream
    pub fn is_admission_rejection(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen { .. } | Self::BulkheadFull { .. } | Self::RateLimited { .. }
        )
    }

    /// Returns true if a queued job failing with this error may be dispatched again later
    pub fn is_requeueable(&self) -> bool {
        !matches!(self.root_cause(), Self::Client { .. })
    }

    /// Innermost error, looking through `RetriesExhausted`
    pub fn root_cause(&self) -> &ResilienceError {
        let mut current = self;
        while let Self::RetriesExhausted { last, .. } = current {
            current = last;
        }
        current
    }

    /// Suggested wait before trying again, if the error carries one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } | Self::RateLimited { retry_after } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }
}

/// Invalid configuration, reported at construction time
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A setting is out of its valid range
    #[error("invalid {component} setting `{field}`: {reason}")]
    Invalid {
        /// Component being configured
        component: &'static str,
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

impl ConfigError {
    /// Build an `Invalid` error
    pub fn invalid(component: &'static str, field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            component,
            field,
            reason: reason.into(),
        }
    }
}
