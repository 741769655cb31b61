//! Passive lifecycle observers
//!
//! A tracer is told about every queue mutation and dispatch cycle but can
//! never influence them: [`TracerHandle`] swallows (and logs) tracer panics.

use crate::job::TransactionJob;
use crate::sanitize::SanitizedError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// Non-sensitive view of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    /// Job id
    pub job_id: String,
    /// Failed attempts so far
    pub attempts: u32,
    /// Descriptive metadata
    pub metadata: BTreeMap<String, String>,
}

impl JobEvent {
    /// Event describing `job`; the payload is never included
    pub fn from_job(job: &TransactionJob) -> Self {
        Self {
            job_id: job.id().to_string(),
            attempts: job.attempts(),
            metadata: job.metadata().clone(),
        }
    }
}

/// Emitted when a signed transaction is handed to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionBuiltEvent {
    /// Chain driver name
    pub driver: String,
    /// Sending address, if known
    pub sender: Option<String>,
    /// Whether the payload is already signed
    pub signed: bool,
    /// When the event was recorded
    pub timestamp: DateTime<Utc>,
}

impl TransactionBuiltEvent {
    /// Metadata keys read by [`TransactionBuiltEvent::from_job`]
    pub const DRIVER_KEY: &'static str = "driver";
    /// Sender metadata key
    pub const SENDER_KEY: &'static str = "sender";
    /// Signed flag metadata key
    pub const SIGNED_KEY: &'static str = "signed";

    /// Build from a job's metadata
    pub fn from_job(job: &TransactionJob, timestamp: DateTime<Utc>) -> Self {
        let signed = job
            .metadata_value(Self::SIGNED_KEY)
            .is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"));
        Self {
            driver: job
                .metadata_value(Self::DRIVER_KEY)
                .unwrap_or("unknown")
                .to_string(),
            sender: job.metadata_value(Self::SENDER_KEY).map(str::to_string),
            signed,
            timestamp,
        }
    }
}

/// Observer notified at each lifecycle point; every method defaults to a no-op
pub trait OperationTracer: Send + Sync {
    /// Job added to the queue
    fn job_enqueued(&self, _event: &JobEvent) {}
    /// Job handed to a dispatcher
    fn job_dequeued(&self, _event: &JobEvent) {}
    /// Failed job scheduled for another attempt after `delay`
    fn job_requeued(&self, _event: &JobEvent, _delay: Duration) {}
    /// Failed job removed from the queue for good
    fn job_dropped(&self, _event: &JobEvent) {}
    /// Job removed after success
    fn job_acknowledged(&self, _event: &JobEvent) {}
    /// In-flight job handed back without a charged attempt
    fn job_released(&self, _event: &JobEvent) {}
    /// Dispatch cycle started with `count` jobs
    fn batch_started(&self, _count: usize) {}
    /// Dispatch cycle finished
    fn batch_completed(&self, _successes: usize, _failures: usize) {}
    /// Downstream accepted the job
    fn job_succeeded(&self, _event: &JobEvent) {}
    /// Job attempt failed
    fn job_failed(&self, _event: &JobEvent, _error: &SanitizedError) {}
    /// Signed transaction submitted to the engine
    fn transaction_built(&self, _event: &TransactionBuiltEvent) {}
}

/// Tracer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl OperationTracer for NoopTracer {}

/// Tracer that forwards events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingTracer;

impl OperationTracer for LoggingTracer {
    fn job_enqueued(&self, event: &JobEvent) {
        tracing::debug!(job_id = %event.job_id, "Job enqueued");
    }

    fn job_dequeued(&self, event: &JobEvent) {
        tracing::trace!(job_id = %event.job_id, attempts = event.attempts, "Job dequeued");
    }

    fn job_requeued(&self, event: &JobEvent, delay: Duration) {
        tracing::info!(
            job_id = %event.job_id,
            attempts = event.attempts,
            delay = ?delay,
            "Job requeued"
        );
    }

    fn job_dropped(&self, event: &JobEvent) {
        tracing::warn!(job_id = %event.job_id, attempts = event.attempts, "Job dropped");
    }

    fn job_released(&self, event: &JobEvent) {
        tracing::debug!(job_id = %event.job_id, attempts = event.attempts, "Job released");
    }

    fn batch_started(&self, count: usize) {
        tracing::debug!(jobs = count, "Dispatch started");
    }

    fn batch_completed(&self, successes: usize, failures: usize) {
        tracing::info!(successes, failures, "Dispatch completed");
    }

    fn job_succeeded(&self, event: &JobEvent) {
        tracing::debug!(job_id = %event.job_id, "Job succeeded");
    }

    fn job_failed(&self, event: &JobEvent, error: &SanitizedError) {
        tracing::warn!(
            job_id = %event.job_id,
            kind = %error.kind,
            error = %error.message,
            "Job failed"
        );
    }

    fn transaction_built(&self, event: &TransactionBuiltEvent) {
        tracing::debug!(
            driver = %event.driver,
            signed = event.signed,
            "Transaction built"
        );
    }
}

/// Shared tracer that isolates the caller from tracer panics
#[derive(Clone)]
pub struct TracerHandle {
    inner: Arc<dyn OperationTracer>,
}

impl std::fmt::Debug for TracerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracerHandle").finish_non_exhaustive()
    }
}

impl Default for TracerHandle {
    fn default() -> Self {
        Self::new(Arc::new(NoopTracer))
    }
}

impl TracerHandle {
    /// Wrap a tracer
    pub fn new(inner: Arc<dyn OperationTracer>) -> Self {
        Self { inner }
    }

    fn notify(&self, event: &'static str, f: impl FnOnce(&dyn OperationTracer)) {
        let tracer = self.inner.as_ref();
        if catch_unwind(AssertUnwindSafe(|| f(tracer))).is_err() {
            tracing::warn!(event, "Tracer panicked; event discarded");
        }
    }

    /// See [`OperationTracer::job_enqueued`]
    pub fn job_enqueued(&self, event: &JobEvent) {
        self.notify("job_enqueued", |t| t.job_enqueued(event));
    }

    /// See [`OperationTracer::job_dequeued`]
    pub fn job_dequeued(&self, event: &JobEvent) {
        self.notify("job_dequeued", |t| t.job_dequeued(event));
    }

    /// See [`OperationTracer::job_requeued`]
    pub fn job_requeued(&self, event: &JobEvent, delay: Duration) {
        self.notify("job_requeued", |t| t.job_requeued(event, delay));
    }

    /// See [`OperationTracer::job_dropped`]
    pub fn job_dropped(&self, event: &JobEvent) {
        self.notify("job_dropped", |t| t.job_dropped(event));
    }

    /// See [`OperationTracer::job_acknowledged`]
    pub fn job_acknowledged(&self, event: &JobEvent) {
        self.notify("job_acknowledged", |t| t.job_acknowledged(event));
    }

    /// See [`OperationTracer::job_released`]
    pub fn job_released(&self, event: &JobEvent) {
        self.notify("job_released", |t| t.job_released(event));
    }

    /// See [`OperationTracer::batch_started`]
    pub fn batch_started(&self, count: usize) {
        self.notify("batch_started", |t| t.batch_started(count));
    }

    /// See [`OperationTracer::batch_completed`]
    pub fn batch_completed(&self, successes: usize, failures: usize) {
        self.notify("batch_completed", |t| t.batch_completed(successes, failures));
    }

    /// See [`OperationTracer::job_succeeded`]
    pub fn job_succeeded(&self, event: &JobEvent) {
        self.notify("job_succeeded", |t| t.job_succeeded(event));
    }

    /// See [`OperationTracer::job_failed`]
    pub fn job_failed(&self, event: &JobEvent, error: &SanitizedError) {
        self.notify("job_failed", |t| t.job_failed(event, error));
    }

    /// See [`OperationTracer::transaction_built`]
    pub fn transaction_built(&self, event: &TransactionBuiltEvent) {
        self.notify("transaction_built", |t| t.transaction_built(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Payload;
    use parking_lot::Mutex;

    struct PanickingTracer;

    impl OperationTracer for PanickingTracer {
        fn job_enqueued(&self, _event: &JobEvent) {
            panic!("sink unavailable");
        }
    }

    #[derive(Default)]
    struct CountingTracer {
        batches: Mutex<Vec<(usize, usize)>>,
    }

    impl OperationTracer for CountingTracer {
        fn batch_completed(&self, successes: usize, failures: usize) {
            self.batches.lock().push((successes, failures));
        }
    }

    fn job() -> TransactionJob {
        TransactionJob::with_id("tx-1", Payload::bytes(vec![0xaa; 64]))
            .with_metadata("driver", "ethereum")
            .with_metadata("sender", "0x1234")
            .with_metadata("signed", "true")
    }

    #[test]
    fn test_job_event_excludes_payload() {
        let event = JobEvent::from_job(&job());
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("tx-1"));
        assert!(!json.contains("payload"));
    }

    #[test]
    fn test_transaction_built_from_metadata() {
        let now = Utc::now();
        let event = TransactionBuiltEvent::from_job(&job(), now);
        assert_eq!(event.driver, "ethereum");
        assert_eq!(event.sender.as_deref(), Some("0x1234"));
        assert!(event.signed);
        assert_eq!(event.timestamp, now);

        let bare = TransactionJob::with_id("tx-2", Payload::bytes(vec![1]));
        let event = TransactionBuiltEvent::from_job(&bare, now);
        assert_eq!(event.driver, "unknown");
        assert!(!event.signed);
    }

    #[test]
    fn test_handle_swallows_panics() {
        let handle = TracerHandle::new(Arc::new(PanickingTracer));
        handle.job_enqueued(&JobEvent::from_job(&job()));
        handle.batch_started(1);
    }

    #[test]
    fn test_handle_forwards_events() {
        let tracer = Arc::new(CountingTracer::default());
        let handle = TracerHandle::new(tracer.clone());
        handle.batch_completed(2, 1);
        assert_eq!(*tracer.batches.lock(), vec![(2, 1)]);
    }
}
