//! # relayd Resilience
//!
//! Resilience patterns for submitting signed transactions to unreliable
//! blockchain endpoints.
//!
//! - **Retry Executor**: Bounded retries with exponential backoff and jitter
//! - **Rate Limiter**: Token bucket with fractional refill rates
//! - **Circuit Breaker**: Consecutive-failure breaker with a single half-open probe
//! - **Bulkhead**: Concurrency cap that rejects instead of queueing
//! - **Reliable Transport**: All of the above composed in a fixed order
//!
//! Every component reads time through an injected [`Clock`] and samples
//! jitter through a [`RandomSource`], so tests run on a [`ManualClock`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relayd_resilience::{
//!     CallContext, ReliableTransport, ResilienceError, SystemClock, ThreadRandom,
//!     TransportConfig,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = ReliableTransport::new(
//!     TransportConfig::default(),
//!     Arc::new(SystemClock),
//!     Arc::new(ThreadRandom),
//! )?;
//!
//! let ctx = CallContext::new().with_timeout(&SystemClock, Duration::from_secs(5));
//! let tx_hash = transport
//!     .call(&ctx, || async {
//!         // Your RPC call here
//!         Ok::<_, ResilienceError>("0xabc".to_string())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Circuit Breaker
//!
//! ```rust
//! use relayd_resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, ManualClock};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let clock = ManualClock::new();
//! let config = CircuitBreakerConfig::new("eth_rpc")
//!     .with_failure_threshold(3)                     // Open after 3 consecutive failures
//!     .with_reset_timeout(Duration::from_secs(30));  // Probe again after 30s
//!
//! let cb = CircuitBreaker::new(config, Arc::new(clock.clone())).unwrap();
//! assert_eq!(cb.state(), CircuitState::Closed);
//! ```
//!
//! ## Exponential Backoff
//!
//! ```rust
//! use relayd_resilience::{Backoff, FixedRandom, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new()
//!     .with_max_attempts(4)
//!     .with_base_delay(Duration::from_millis(100))
//!     .with_jitter(Duration::ZERO);
//!
//! let delays: Vec<_> = Backoff::new(&policy, &FixedRandom::zero()).collect();
//! assert_eq!(delays[2], Duration::from_millis(400));
//! ```
//!
//! ## Error Classification
//!
//! ```rust
//! use relayd_resilience::{HttpRetryClassifier, ResilienceError, RpcRetryClassifier};
//!
//! assert!(HttpRetryClassifier::is_status_retryable(503));  // Service Unavailable
//! assert!(!HttpRetryClassifier::is_status_retryable(400)); // Bad Request
//! assert!(RpcRetryClassifier::is_code_retryable(-32000));  // Server error
//! assert!(ResilienceError::from_http_status(502, "bad gateway").is_transient());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backoff;
pub mod bulkhead;
pub mod circuit_breaker;
pub mod clock;
pub mod context;
pub mod error;
pub mod rate_limiter;
pub mod retry;
pub mod serde_millis;
pub mod transport;

// Re-export main types
pub use backoff::{Backoff, RetryPolicy};

pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadMetrics, BulkheadPermit};

pub use circuit_breaker::{
    BreakerPermit, CircuitBreaker, CircuitBreakerConfig, CircuitMetrics, CircuitState,
};

pub use clock::{
    Clock, FixedRandom, ManualClock, RandomSource, SharedClock, SharedRandom, SystemClock,
    ThreadRandom,
};

pub use context::CallContext;

pub use error::{BoxedCause, ConfigError, ErrorKind, ResilienceError, Result, TimeoutStage};

pub use rate_limiter::{RateLimiter, RateLimiterConfig};

pub use retry::{
    HttpRetryClassifier, RetryClassifier, RetryExecutor, RpcRetryClassifier, TransientClassifier,
};

pub use transport::{ReliableTransport, TransportConfig};
