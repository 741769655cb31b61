//! # relayd Testing Infrastructure
//!
//! Test doubles and generators shared by the relayd integration tests:
//! - Scripted downstream endpoints with per-job outcomes
//! - Recording tracers and deterministic idempotency keys
//! - Seeded randomness for reproducible jitter
//! - Property-based testing strategies
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relayd_testing::*;
//!
//! let node = ScriptedDownstream::new("eth-node")
//!     .script("tx-2", [ScriptedOutcome::transient("503 service unavailable")]);
//!
//! proptest! {
//!     #[test]
//!     fn test_delay_capped(policy in retry_policy(), attempt in 1u32..64) {
//!         // ...
//!     }
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use relayd_queue::{
    Downstream, IdempotencyKeys, JobEvent, OperationTracer, Payload, QueueConfig, Receipt,
    SanitizedError, TracerHandle, TransactionBuiltEvent, TransactionJob, TOKEN_PREFIX,
};
use relayd_resilience::{RandomSource, ResilienceError, Result, RetryPolicy};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Scripted Downstream
// ============================================================================

/// What a [`ScriptedDownstream`] does with one submission
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    /// Accept and return a receipt
    Accept,
    /// Fail with the given error
    Fail(ResilienceError),
    /// Wait on the tokio timer, then accept
    Stall(Duration),
}

impl ScriptedOutcome {
    /// Transient failure
    pub fn transient(message: &str) -> Self {
        Self::Fail(ResilienceError::transient(message))
    }

    /// Client failure
    pub fn client(message: &str) -> Self {
        Self::Fail(ResilienceError::client(message))
    }
}

/// One request observed by a [`ScriptedDownstream`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Job id
    pub job_id: String,
    /// Idempotency token carried by the job
    pub token: Option<String>,
    /// Whether it arrived inside a native batch
    pub batched: bool,
}

/// Downstream whose responses are scripted per job id
///
/// Each job id has a queue of outcomes consumed one per submission; once a
/// script runs dry the job is accepted.
#[derive(Debug)]
pub struct ScriptedDownstream {
    name: String,
    batching: bool,
    scripts: Mutex<HashMap<String, VecDeque<ScriptedOutcome>>>,
    batch_failures: Mutex<VecDeque<ResilienceError>>,
    submissions: Mutex<Vec<Submission>>,
    batch_calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedDownstream {
    /// Endpoint that accepts everything
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            batching: false,
            scripts: Mutex::new(HashMap::new()),
            batch_failures: Mutex::new(VecDeque::new()),
            submissions: Mutex::new(Vec::new()),
            batch_calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Advertise native batch support
    pub fn with_batching(mut self) -> Self {
        self.batching = true;
        self
    }

    /// Queue outcomes for `job_id`
    pub fn script(self, job_id: &str, outcomes: impl IntoIterator<Item = ScriptedOutcome>) -> Self {
        self.scripts
            .lock()
            .entry(job_id.to_string())
            .or_default()
            .extend(outcomes);
        self
    }

    /// Fail the next native batch request as a whole
    pub fn fail_next_batch(self, error: ResilienceError) -> Self {
        self.batch_failures.lock().push_back(error);
        self
    }

    /// Every submission seen, in arrival order
    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().clone()
    }

    /// Submissions of one job
    pub fn submissions_for(&self, job_id: &str) -> Vec<Submission> {
        self.submissions
            .lock()
            .iter()
            .filter(|s| s.job_id == job_id)
            .cloned()
            .collect()
    }

    /// Number of native batch requests
    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent single submissions
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, job: &TransactionJob, batched: bool) -> ScriptedOutcome {
        self.submissions.lock().push(Submission {
            job_id: job.id().to_string(),
            token: job.idempotency_token().map(str::to_string),
            batched,
        });
        self.scripts
            .lock()
            .get_mut(job.id())
            .and_then(VecDeque::pop_front)
            .unwrap_or(ScriptedOutcome::Accept)
    }

    fn receipt(job: &TransactionJob) -> Receipt {
        Receipt::with_hash(format!("0x{}", hex::encode(job.id())))
    }
}

#[async_trait]
impl Downstream for ScriptedDownstream {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, job: &TransactionJob) -> Result<Receipt> {
        let outcome = self.next_outcome(job, false);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let result = match outcome {
            ScriptedOutcome::Accept => {
                tokio::task::yield_now().await;
                Ok(Self::receipt(job))
            }
            ScriptedOutcome::Fail(error) => Err(error),
            ScriptedOutcome::Stall(duration) => {
                tokio::time::sleep(duration).await;
                Ok(Self::receipt(job))
            }
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn supports_batching(&self) -> bool {
        self.batching
    }

    async fn submit_batch(&self, jobs: &[TransactionJob]) -> Result<Vec<Result<Receipt>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let failure = self.batch_failures.lock().pop_front();
        if let Some(error) = failure {
            return Err(error);
        }

        let mut results = Vec::with_capacity(jobs.len());
        for job in jobs {
            let result = match self.next_outcome(job, true) {
                ScriptedOutcome::Accept => Ok(Self::receipt(job)),
                ScriptedOutcome::Fail(error) => Err(error),
                ScriptedOutcome::Stall(duration) => {
                    tokio::time::sleep(duration).await;
                    Ok(Self::receipt(job))
                }
            };
            results.push(result);
        }
        Ok(results)
    }
}

// ============================================================================
// Recording Tracer
// ============================================================================

/// One tracer notification
#[derive(Debug, Clone, PartialEq)]
pub enum TraceRecord {
    /// Job added to the queue
    Enqueued(String),
    /// Job handed to a dispatcher
    Dequeued(String),
    /// Job scheduled for another attempt
    Requeued(String, Duration),
    /// Job removed after a terminal failure
    Dropped(String),
    /// Job removed after success
    Acknowledged(String),
    /// Job handed back without a charged attempt
    Released(String),
    /// Cycle started with this many jobs
    BatchStarted(usize),
    /// Cycle finished with (successes, failures)
    BatchCompleted(usize, usize),
    /// Downstream accepted the job
    Succeeded(String),
    /// Attempt failed
    Failed(SanitizedError),
    /// Transaction handed to the engine
    TransactionBuilt(TransactionBuiltEvent),
}

/// Tracer that keeps every notification in order
#[derive(Debug, Default)]
pub struct RecordingTracer {
    records: Mutex<Vec<TraceRecord>>,
}

impl RecordingTracer {
    /// Create a shared recorder
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Handle that feeds this recorder
    pub fn handle(self: &Arc<Self>) -> TracerHandle {
        TracerHandle::new(self.clone())
    }

    /// Everything recorded so far
    pub fn records(&self) -> Vec<TraceRecord> {
        self.records.lock().clone()
    }

    /// Sanitized failures recorded so far
    pub fn failures(&self) -> Vec<SanitizedError> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| match r {
                TraceRecord::Failed(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of records matching `predicate`
    pub fn count(&self, predicate: impl Fn(&TraceRecord) -> bool) -> usize {
        self.records.lock().iter().filter(|r| predicate(r)).count()
    }

    fn push(&self, record: TraceRecord) {
        self.records.lock().push(record);
    }
}

impl OperationTracer for RecordingTracer {
    fn job_enqueued(&self, event: &JobEvent) {
        self.push(TraceRecord::Enqueued(event.job_id.clone()));
    }

    fn job_dequeued(&self, event: &JobEvent) {
        self.push(TraceRecord::Dequeued(event.job_id.clone()));
    }

    fn job_requeued(&self, event: &JobEvent, delay: Duration) {
        self.push(TraceRecord::Requeued(event.job_id.clone(), delay));
    }

    fn job_dropped(&self, event: &JobEvent) {
        self.push(TraceRecord::Dropped(event.job_id.clone()));
    }

    fn job_acknowledged(&self, event: &JobEvent) {
        self.push(TraceRecord::Acknowledged(event.job_id.clone()));
    }

    fn job_released(&self, event: &JobEvent) {
        self.push(TraceRecord::Released(event.job_id.clone()));
    }

    fn batch_started(&self, count: usize) {
        self.push(TraceRecord::BatchStarted(count));
    }

    fn batch_completed(&self, successes: usize, failures: usize) {
        self.push(TraceRecord::BatchCompleted(successes, failures));
    }

    fn job_succeeded(&self, event: &JobEvent) {
        self.push(TraceRecord::Succeeded(event.job_id.clone()));
    }

    fn job_failed(&self, _event: &JobEvent, error: &SanitizedError) {
        self.push(TraceRecord::Failed(error.clone()));
    }

    fn transaction_built(&self, event: &TransactionBuiltEvent) {
        self.push(TraceRecord::TransactionBuilt(event.clone()));
    }
}

/// Tracer that panics on every notification
#[derive(Debug, Clone, Copy, Default)]
pub struct PanickingTracer;

impl OperationTracer for PanickingTracer {
    fn job_enqueued(&self, _event: &JobEvent) {
        panic!("tracer sink unavailable");
    }

    fn job_dequeued(&self, _event: &JobEvent) {
        panic!("tracer sink unavailable");
    }

    fn batch_started(&self, _count: usize) {
        panic!("tracer sink unavailable");
    }

    fn job_failed(&self, _event: &JobEvent, _error: &SanitizedError) {
        panic!("tracer sink unavailable");
    }

    fn transaction_built(&self, _event: &TransactionBuiltEvent) {
        panic!("tracer sink unavailable");
    }
}

// ============================================================================
// Deterministic Sources
// ============================================================================

/// Tokens of the form `idem-{hint}-{n}`
#[derive(Debug, Default)]
pub struct SequentialIdempotencyKeys {
    next: AtomicUsize,
}

impl SequentialIdempotencyKeys {
    /// Create a shared generator starting at zero
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Tokens handed out so far
    pub fn issued(&self) -> usize {
        self.next.load(Ordering::SeqCst)
    }
}

impl IdempotencyKeys for SequentialIdempotencyKeys {
    fn generate(&self, hint: &str) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        format!("{}{}-{}", TOKEN_PREFIX, hint, n)
    }
}

/// Reproducible jitter source
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    /// Source seeded with `seed`
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_unit(&self) -> f64 {
        self.rng.lock().gen_range(0.0..1.0)
    }
}

// ============================================================================
// Property-Based Testing Strategies
// ============================================================================

/// Valid retry policies with small, millisecond-scale delays
pub fn retry_policy() -> impl Strategy<Value = RetryPolicy> {
    (1u32..=10, 1u64..=1_000, 1.0f64..=4.0, 0u64..=500, 0u64..=60_000).prop_map(
        |(attempts, base_ms, multiplier, jitter_ms, extra_ms)| {
            RetryPolicy::new()
                .with_max_attempts(attempts)
                .with_base_delay(Duration::from_millis(base_ms))
                .with_multiplier(multiplier)
                .with_jitter(Duration::from_millis(jitter_ms))
                .with_max_delay(Duration::from_millis(base_ms + extra_ms))
        },
    )
}

/// Valid queue configurations
pub fn queue_config() -> impl Strategy<Value = QueueConfig> {
    (1u32..=8, 1u64..=5_000, 0u64..=120_000).prop_map(|(attempts, base_ms, extra_ms)| {
        QueueConfig::default()
            .with_max_attempts(attempts)
            .with_base_backoff(Duration::from_millis(base_ms))
            .with_max_backoff(Duration::from_millis(base_ms + extra_ms))
    })
}

/// Job ids such as `tx-0042`
pub fn job_id() -> impl Strategy<Value = String> {
    (0u32..10_000).prop_map(|n| format!("tx-{:04}", n))
}

/// Raw signed transaction bytes
pub fn raw_transaction() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..=512)
}

/// Jobs with unique ids and byte payloads
pub fn unique_jobs(max: usize) -> impl Strategy<Value = Vec<TransactionJob>> {
    prop::collection::vec(raw_transaction(), 1..=max).prop_map(|payloads| {
        payloads
            .into_iter()
            .enumerate()
            .map(|(i, bytes)| {
                TransactionJob::with_id(format!("tx-{:04}", i), Payload::bytes(bytes))
                    .with_metadata("driver", "ethereum")
            })
            .collect()
    })
}

/// 32-byte secrets rendered as hex, with or without `0x`
pub fn hex_secret() -> impl Strategy<Value = String> {
    (prop::array::uniform32(any::<u8>()), any::<bool>()).prop_map(|(bytes, prefixed)| {
        let encoded = hex::encode(bytes);
        if prefixed {
            format!("0x{}", encoded)
        } else {
            encoded
        }
    })
}

/// Per-job scripts mixing accepts and transient failures
pub fn outcome_script(max_len: usize) -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec(any::<bool>(), 0..=max_len)
}

/// Convert a boolean script (`true` = transient failure) into outcomes
pub fn to_outcomes(script: &[bool]) -> Vec<ScriptedOutcome> {
    script
        .iter()
        .map(|&fail| {
            if fail {
                ScriptedOutcome::transient("503 service unavailable")
            } else {
                ScriptedOutcome::Accept
            }
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
