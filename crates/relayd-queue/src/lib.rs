//! # relayd Queue
//!
//! Job orchestration for signed blockchain transactions.
//!
//! - **Transaction Queue**: FIFO job store with backoff-gated visibility
//! - **Idempotency Tokens**: Assigned once at enqueue, reused on every retry
//! - **Batcher**: Drains ready jobs through a [`ReliableTransport`](relayd_resilience::ReliableTransport)
//! - **Operation Tracer**: Passive lifecycle observer that can never disrupt dispatch
//! - **Error Sanitizer**: Strips key material from error text before it is stored
//!
//! ## Quick Start
//!
//! ```rust
//! use relayd_queue::{Payload, QueueConfig, TransactionJob, TransactionQueue};
//! use relayd_resilience::{ManualClock, ResilienceError};
//! use std::sync::Arc;
//!
//! let clock = ManualClock::new();
//! let queue = TransactionQueue::new(QueueConfig::default(), Arc::new(clock.clone())).unwrap();
//!
//! let job = TransactionJob::with_id("tx-1", Payload::bytes(vec![0xf8, 0x6b]))
//!     .with_metadata("driver", "ethereum");
//! queue.enqueue(job).unwrap();
//!
//! let job = queue.dequeue().unwrap();
//! assert!(job.idempotency_token().unwrap().starts_with("idem-"));
//!
//! // A transient failure puts the job back behind a backoff delay
//! let outcome = queue
//!     .record_failure(&job, &ResilienceError::transient("503 service unavailable"))
//!     .unwrap();
//! assert!(!outcome.is_terminal());
//! assert!(queue.dequeue().is_none());
//! ```
//!
//! ## Error Sanitization
//!
//! ```rust
//! use relayd_queue::sanitize_message;
//!
//! let clean = sanitize_message("signing failed: private_key=0xdeadbeef");
//! assert_eq!(clean, "signing failed: private_key=[REDACTED]");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod batch;
pub mod batcher;
pub mod downstream;
pub mod idempotency;
pub mod job;
pub mod queue;
pub mod sanitize;
pub mod tracer;

// Jobs
pub use job::{Payload, TransactionJob};

// Queue
pub use idempotency::{DefaultIdempotencyKeys, IdempotencyKeys, TOKEN_PREFIX};
pub use queue::{FailureOutcome, QueueConfig, QueueError, TransactionQueue, MAX_BACKOFF_LIMIT};

// Dispatch
pub use batch::{BatchResult, FailedJob, Receipt, SucceededJob};
pub use batcher::{Batcher, BatcherConfig};
pub use downstream::Downstream;

// Observability
pub use sanitize::{sanitize_message, SanitizedError, MAX_MESSAGE_CHARS};
pub use tracer::{
    JobEvent, LoggingTracer, NoopTracer, OperationTracer, TracerHandle, TransactionBuiltEvent,
};
