//! # relayd - Resilient Transaction Broadcasting
//!
//! relayd takes signed blockchain transactions and gets them to a node
//! without hammering it, duplicating them, or losing them to a flaky link.
//!
//! ## Crates
//!
//! | Crate | Description |
//! |-------|-------------|
//! | [`resilience`] | Retry, rate limiter, circuit breaker, bulkhead, reliable transport |
//! | [`queue`] | Idempotent job queue, batcher, tracer, error sanitizer |
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `default` | Engine plus `telemetry` |
//! | `telemetry` | `tracing-subscriber` setup helpers |
//!
//! ## Example
//!
//! ```rust,no_run
//! use relayd::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(node: Arc<dyn Downstream>) -> Result<(), EngineError> {
//! let config = EngineConfig::from_json_str(r#"{ "rate_limiter": { "requests_per_second": 5.0 } }"#)?;
//! let engine = Engine::new(config, node)?;
//!
//! let job = TransactionJob::new(Payload::bytes(vec![0x02, 0xf8, 0x70]))
//!     .with_metadata("driver", "ethereum");
//! let token = engine.submit(job)?;
//!
//! let result = engine.dispatch().await;
//! println!("{token}: {} ok, {} failed", result.success_count(), result.failure_count());
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

// ============================================================================
// Component crates
// ============================================================================

pub use relayd_queue as queue;
pub use relayd_resilience as resilience;

// ============================================================================
// Engine
// ============================================================================

pub mod config;
pub mod engine;

#[cfg(feature = "telemetry")]
#[cfg_attr(docsrs, doc(cfg(feature = "telemetry")))]
pub mod telemetry;

pub use config::{EngineConfig, EngineError, Result};
pub use engine::Engine;

#[cfg(feature = "telemetry")]
pub use telemetry::init_tracing;

/// Prelude with the types most callers need
pub mod prelude {
    pub use crate::config::{EngineConfig, EngineError};
    pub use crate::engine::Engine;
    pub use relayd_queue::{
        BatchResult, Downstream, OperationTracer, Payload, Receipt, TracerHandle, TransactionJob,
    };
    pub use relayd_resilience::{CallContext, CircuitState, ErrorKind, ResilienceError};
}
