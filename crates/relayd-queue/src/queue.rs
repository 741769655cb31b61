//! FIFO job queue with per-job availability times
//!
//! Jobs are ordered by the sequence number they received on first enqueue.
//! A failed job goes back to its original position but stays invisible to
//! [`TransactionQueue::dequeue`] until its backoff has elapsed.

use crate::idempotency::{DefaultIdempotencyKeys, IdempotencyKeys};
use crate::job::TransactionJob;
use crate::sanitize::sanitize_message;
use crate::tracer::{JobEvent, TracerHandle};
use parking_lot::Mutex;
use relayd_resilience::{
    ConfigError, ResilienceError, RetryPolicy, SharedClock, SharedRandom, ThreadRandom,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Longest backoff a queue may be configured with
pub const MAX_BACKOFF_LIMIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Queue errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    /// A job with this id is already pending or in flight
    #[error("job {id} is already queued")]
    Duplicate {
        /// Job id
        id: String,
    },

    /// The job is not in flight
    #[error("job {id} is not in flight")]
    UnknownJob {
        /// Job id
        id: String,
    },

    /// Invalid queue settings
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Queue retry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Attempts before a job is dropped as terminal
    pub max_attempts: u32,
    /// Delay before the first requeued attempt
    #[serde(with = "relayd_resilience::serde_millis", rename = "base_backoff_ms")]
    pub base_backoff: Duration,
    /// Backoff cap
    #[serde(with = "relayd_resilience::serde_millis", rename = "max_backoff_ms")]
    pub max_backoff: Duration,
    /// Growth factor between consecutive backoffs
    pub backoff_multiplier: f64,
    /// Upper bound of random jitter added to each backoff
    #[serde(with = "relayd_resilience::serde_millis", rename = "jitter_ms")]
    pub jitter: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: Duration::ZERO,
        }
    }
}

impl QueueConfig {
    /// Set maximum attempts
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set base backoff
    pub fn with_base_backoff(mut self, backoff: Duration) -> Self {
        self.base_backoff = backoff;
        self
    }

    /// Set backoff cap
    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Set jitter range
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// The backoff schedule as a [`RetryPolicy`]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.base_backoff,
            backoff_multiplier: self.backoff_multiplier,
            jitter: self.jitter,
            max_delay: self.max_backoff,
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        const COMPONENT: &str = "queue";
        if self.max_attempts < 1 {
            return Err(ConfigError::invalid(COMPONENT, "max_attempts", "must be at least 1"));
        }
        if self.base_backoff.is_zero() {
            return Err(ConfigError::invalid(COMPONENT, "base_backoff", "must be greater than zero"));
        }
        if self.max_backoff < self.base_backoff {
            return Err(ConfigError::invalid(
                COMPONENT,
                "max_backoff",
                format!(
                    "must be at least base_backoff ({:?}), got {:?}",
                    self.base_backoff, self.max_backoff
                ),
            ));
        }
        if self.max_backoff > MAX_BACKOFF_LIMIT {
            return Err(ConfigError::invalid(
                COMPONENT,
                "max_backoff",
                format!("must not exceed {:?}", MAX_BACKOFF_LIMIT),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::invalid(
                COMPONENT,
                "backoff_multiplier",
                format!("must be a finite value >= 1.0, got {}", self.backoff_multiplier),
            ));
        }
        Ok(())
    }
}

/// What happened to a job after a failed attempt
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    /// Back in the queue, invisible until `next_available_at`
    Requeued {
        /// The job with its failure recorded
        job: TransactionJob,
        /// Backoff applied
        delay: Duration,
        /// When the job becomes eligible again
        next_available_at: Instant,
    },
    /// Attempts exhausted or error not retryable; removed from the queue
    Terminal {
        /// The job with its failure recorded
        job: TransactionJob,
    },
}

impl FailureOutcome {
    /// The updated job
    pub fn job(&self) -> &TransactionJob {
        match self {
            Self::Requeued { job, .. } | Self::Terminal { job } => job,
        }
    }

    /// Consume into the updated job
    pub fn into_job(self) -> TransactionJob {
        match self {
            Self::Requeued { job, .. } | Self::Terminal { job } => job,
        }
    }

    /// Check if the job was dropped
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal { .. })
    }
}

#[derive(Debug)]
struct InFlight {
    seq: u64,
    job: TransactionJob,
}

#[derive(Debug, Default)]
struct QueueState {
    next_seq: u64,
    pending: BTreeMap<u64, TransactionJob>,
    pending_ids: HashMap<String, u64>,
    in_flight: HashMap<String, InFlight>,
}

impl QueueState {
    fn contains(&self, id: &str) -> bool {
        self.pending_ids.contains_key(id) || self.in_flight.contains_key(id)
    }

    fn insert_pending(&mut self, seq: u64, job: TransactionJob) {
        self.pending_ids.insert(job.id().to_string(), seq);
        self.pending.insert(seq, job);
    }

    fn take_ready(&mut self, now: Instant) -> Option<TransactionJob> {
        let seq = self
            .pending
            .iter()
            .find(|(_, job)| job.is_available(now))
            .map(|(seq, _)| *seq)?;
        let job = self.pending.remove(&seq)?;
        self.pending_ids.remove(job.id());
        self.in_flight.insert(
            job.id().to_string(),
            InFlight {
                seq,
                job: job.clone(),
            },
        );
        Some(job)
    }

    fn take_in_flight(&mut self, id: &str) -> Result<InFlight, QueueError> {
        self.in_flight
            .remove(id)
            .ok_or_else(|| QueueError::UnknownJob { id: id.to_string() })
    }
}

/// In-memory job queue shared by producers and the batcher
pub struct TransactionQueue {
    config: QueueConfig,
    policy: RetryPolicy,
    clock: SharedClock,
    random: SharedRandom,
    keys: Arc<dyn IdempotencyKeys>,
    tracer: TracerHandle,
    state: Mutex<QueueState>,
}

impl std::fmt::Debug for TransactionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TransactionQueue")
            .field("config", &self.config)
            .field("pending", &state.pending.len())
            .field("in_flight", &state.in_flight.len())
            .finish()
    }
}

impl TransactionQueue {
    /// Create an empty queue
    pub fn new(config: QueueConfig, clock: SharedClock) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            policy: config.retry_policy(),
            config,
            clock,
            random: Arc::new(ThreadRandom),
            keys: Arc::new(DefaultIdempotencyKeys),
            tracer: TracerHandle::default(),
            state: Mutex::new(QueueState::default()),
        })
    }

    /// Use a specific jitter source
    pub fn with_random(mut self, random: SharedRandom) -> Self {
        self.random = random;
        self
    }

    /// Use a specific token generator
    pub fn with_idempotency_keys(mut self, keys: Arc<dyn IdempotencyKeys>) -> Self {
        self.keys = keys;
        self
    }

    /// Notify `tracer` of every mutation
    pub fn with_tracer(mut self, tracer: TracerHandle) -> Self {
        self.tracer = tracer;
        self
    }

    /// The configuration in use
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Add a job; returns its idempotency token
    pub fn enqueue(&self, mut job: TransactionJob) -> Result<String, QueueError> {
        if job.idempotency_token().is_none() {
            let token = self.keys.generate(job.id());
            job.assign_token(token);
        }
        let token = job.idempotency_token().unwrap_or_default().to_string();

        let event = {
            let mut state = self.state.lock();
            if state.contains(job.id()) {
                tracing::debug!(job_id = %job.id(), "Rejected duplicate enqueue");
                return Err(QueueError::Duplicate {
                    id: job.id().to_string(),
                });
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            let event = JobEvent::from_job(&job);
            state.insert_pending(seq, job);
            event
        };

        self.tracer.job_enqueued(&event);
        Ok(token)
    }

    /// Take the earliest-enqueued job whose backoff has elapsed
    pub fn dequeue(&self) -> Option<TransactionJob> {
        let now = self.clock.now();
        let job = self.state.lock().take_ready(now)?;
        self.tracer.job_dequeued(&JobEvent::from_job(&job));
        Some(job)
    }

    /// Take up to `max` ready jobs in queue order under a single lock
    pub fn dequeue_ready(&self, max: usize) -> Vec<TransactionJob> {
        let now = self.clock.now();
        let jobs: Vec<_> = {
            let mut state = self.state.lock();
            std::iter::from_fn(|| state.take_ready(now)).take(max).collect()
        };
        for job in &jobs {
            self.tracer.job_dequeued(&JobEvent::from_job(job));
        }
        jobs
    }

    /// Record a failed attempt of an in-flight job
    ///
    /// The sanitized cause is appended to the job's history and its attempt
    /// counter incremented. The job is requeued with backoff unless attempts
    /// are exhausted or the cause is a client error.
    pub fn record_failure(
        &self,
        job: &TransactionJob,
        cause: &ResilienceError,
    ) -> Result<FailureOutcome, QueueError> {
        let message = sanitize_message(&cause.to_string());
        let now = self.clock.now();

        let outcome = {
            let mut state = self.state.lock();
            let InFlight { seq, job: mut stored } = state.take_in_flight(job.id())?;

            let attempts = stored.record_attempt_failure(message);
            if cause.is_requeueable() && attempts < self.config.max_attempts {
                let delay = self.policy.delay(attempts, self.random.as_ref());
                let next_available_at = now + delay;
                stored.set_next_available_at(next_available_at);
                state.insert_pending(seq, stored.clone());
                FailureOutcome::Requeued {
                    job: stored,
                    delay,
                    next_available_at,
                }
            } else {
                FailureOutcome::Terminal { job: stored }
            }
        };

        let event = JobEvent::from_job(outcome.job());
        match &outcome {
            FailureOutcome::Requeued { delay, .. } => self.tracer.job_requeued(&event, *delay),
            FailureOutcome::Terminal { .. } => self.tracer.job_dropped(&event),
        }
        Ok(outcome)
    }

    /// Remove an in-flight job after success
    pub fn acknowledge(&self, job: &TransactionJob) -> Result<(), QueueError> {
        let InFlight { job, .. } = self.state.lock().take_in_flight(job.id())?;
        self.tracer.job_acknowledged(&JobEvent::from_job(&job));
        Ok(())
    }

    /// Return an in-flight job to its original queue position
    ///
    /// Used when a dispatch was abandoned before the downstream gave an
    /// outcome. Attempts, error history and backoff are left untouched.
    pub fn release(&self, job: &TransactionJob) -> Result<TransactionJob, QueueError> {
        let released = {
            let mut state = self.state.lock();
            let InFlight { seq, job: stored } = state.take_in_flight(job.id())?;
            state.insert_pending(seq, stored.clone());
            stored
        };
        self.tracer.job_released(&JobEvent::from_job(&released));
        Ok(released)
    }

    /// Pending plus in-flight jobs
    pub fn size(&self) -> usize {
        let state = self.state.lock();
        state.pending.len() + state.in_flight.len()
    }

    /// Jobs waiting in the queue, ready or not
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Jobs handed out and not yet acknowledged or failed
    pub fn in_flight_len(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Jobs that `dequeue` would return right now
    pub fn ready_len(&self) -> usize {
        let now = self.clock.now();
        self.state
            .lock()
            .pending
            .values()
            .filter(|job| job.is_available(now))
            .count()
    }

    /// Check if the queue holds no jobs at all
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Check if a job with `id` is pending or in flight
    pub fn contains(&self, id: &str) -> bool {
        self.state.lock().contains(id)
    }

    /// Time until the next pending job becomes ready; zero if one is ready now
    pub fn next_ready_in(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.state
            .lock()
            .pending
            .values()
            .map(|job| {
                job.next_available_at()
                    .map_or(Duration::ZERO, |at| at.saturating_duration_since(now))
            })
            .min()
    }
}
