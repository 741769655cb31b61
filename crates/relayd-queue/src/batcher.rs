//! Drains ready jobs from the queue and submits them through the transport
//!
//! A dispatch cycle takes up to `batch_size` ready jobs. If the downstream
//! accepts native batches the whole set goes out as one transport call;
//! otherwise each job gets its own call, `concurrency` at a time. Every job
//! is then acknowledged or handed back to the queue with its failure. Jobs
//! whose call was cancelled, or timed out waiting for a rate limit token,
//! are released without charging an attempt.

use crate::batch::{BatchResult, Receipt};
use crate::downstream::Downstream;
use crate::job::TransactionJob;
use crate::queue::TransactionQueue;
use crate::sanitize::SanitizedError;
use crate::tracer::{JobEvent, TracerHandle};
use futures::stream::{self, StreamExt};
use relayd_resilience::{
    CallContext, ConfigError, ReliableTransport, ResilienceError, Result, TimeoutStage,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Dispatch settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatcherConfig {
    /// Maximum jobs per dispatch cycle
    pub batch_size: usize,
    /// Individual submissions in flight at once
    pub concurrency: usize,
    /// Pause between cycles in [`Batcher::run`]
    #[serde(with = "relayd_resilience::serde_millis", rename = "poll_interval_ms")]
    pub poll_interval: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            concurrency: 4,
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl BatcherConfig {
    /// Set batch size
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set submission concurrency
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the pause between cycles
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.batch_size < 1 {
            return Err(ConfigError::invalid("batcher", "batch_size", "must be at least 1"));
        }
        if self.concurrency < 1 {
            return Err(ConfigError::invalid("batcher", "concurrency", "must be at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::invalid(
                "batcher",
                "poll_interval",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Batch dispatcher
pub struct Batcher {
    config: BatcherConfig,
    queue: Arc<TransactionQueue>,
    transport: Arc<ReliableTransport>,
    downstream: Arc<dyn Downstream>,
    tracer: TracerHandle,
}

impl std::fmt::Debug for Batcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batcher")
            .field("config", &self.config)
            .field("downstream", &self.downstream.name())
            .finish_non_exhaustive()
    }
}

impl Batcher {
    /// Create a batcher over `queue`, submitting to `downstream` through `transport`
    ///
    /// `concurrency` may not exceed the transport's bulkhead capacity.
    pub fn new(
        config: BatcherConfig,
        queue: Arc<TransactionQueue>,
        transport: Arc<ReliableTransport>,
        downstream: Arc<dyn Downstream>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        if config.concurrency > transport.bulkhead().max_concurrency() {
            return Err(ConfigError::invalid(
                "batcher",
                "concurrency",
                "must not exceed bulkhead.max_concurrency",
            ));
        }
        Ok(Self {
            config,
            queue,
            transport,
            downstream,
            tracer: TracerHandle::default(),
        })
    }

    /// Notify `tracer` about dispatch cycles and per-job outcomes
    pub fn with_tracer(mut self, tracer: TracerHandle) -> Self {
        self.tracer = tracer;
        self
    }

    /// The configuration in use
    pub fn config(&self) -> &BatcherConfig {
        &self.config
    }

    /// The queue being drained
    pub fn queue(&self) -> &Arc<TransactionQueue> {
        &self.queue
    }

    /// Dequeue up to `max` ready jobs, never more than `batch_size`
    pub fn collect_ready_jobs(&self, max: usize) -> Vec<TransactionJob> {
        self.queue.dequeue_ready(max.min(self.config.batch_size))
    }

    /// Run one dispatch cycle without a deadline
    pub async fn dispatch(&self) -> BatchResult {
        self.dispatch_with(&CallContext::new()).await
    }

    /// Run one dispatch cycle; `ctx` bounds every transport call in it
    pub async fn dispatch_with(&self, ctx: &CallContext) -> BatchResult {
        let jobs = self.collect_ready_jobs(self.config.batch_size);
        if jobs.is_empty() {
            return BatchResult::new();
        }

        let count = jobs.len();
        self.tracer.batch_started(count);
        tracing::debug!(
            jobs = count,
            downstream = %self.downstream.name(),
            native = self.downstream.supports_batching(),
            "Dispatching batch"
        );

        let outcomes = if self.downstream.supports_batching() {
            self.submit_native(ctx, jobs).await
        } else {
            self.submit_individually(ctx, jobs).await
        };

        let mut result = BatchResult::new();
        for (job, outcome) in outcomes {
            self.settle(&mut result, job, outcome);
        }

        self.tracer
            .batch_completed(result.success_count(), result.failure_count());
        result
    }

    /// Dispatch every `poll_interval` until `cancel` fires; returns the cycles run
    pub async fn run(&self, cancel: CancellationToken) -> u64 {
        let clock = self.transport.clock().clone();
        let mut cycles = 0u64;
        tracing::info!(
            downstream = %self.downstream.name(),
            interval = ?self.config.poll_interval,
            "Batcher started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(cycles, "Batcher stopped");
                    break;
                }
                _ = clock.sleep(self.config.poll_interval) => {
                    let ctx = CallContext::new().with_cancellation(cancel.clone());
                    let result = self.dispatch_with(&ctx).await;
                    cycles += 1;
                    if !result.is_empty() {
                        tracing::debug!(
                            cycle = cycles,
                            successes = result.success_count(),
                            failures = result.failure_count(),
                            pending = self.queue.pending_len(),
                            "Dispatch cycle finished"
                        );
                    }
                }
            }
        }
        cycles
    }

    async fn submit_native(
        &self,
        ctx: &CallContext,
        jobs: Vec<TransactionJob>,
    ) -> Vec<(TransactionJob, Result<Receipt>)> {
        let downstream = self.downstream.as_ref();
        let batch = self
            .transport
            .call(ctx, || downstream.submit_batch(&jobs))
            .await;

        match batch {
            Ok(results) if results.len() == jobs.len() => jobs.into_iter().zip(results).collect(),
            Ok(results) => {
                tracing::warn!(
                    expected = jobs.len(),
                    received = results.len(),
                    downstream = %downstream.name(),
                    "Batch response does not match request size"
                );
                let error = ResilienceError::transient(format!(
                    "batch response carried {} results for {} jobs",
                    results.len(),
                    jobs.len()
                ));
                jobs.into_iter().map(|job| (job, Err(error.clone()))).collect()
            }
            Err(error) => jobs.into_iter().map(|job| (job, Err(error.clone()))).collect(),
        }
    }

    async fn submit_individually(
        &self,
        ctx: &CallContext,
        jobs: Vec<TransactionJob>,
    ) -> Vec<(TransactionJob, Result<Receipt>)> {
        let transport = self.transport.as_ref();
        let downstream = self.downstream.as_ref();

        stream::iter(jobs)
            .map(|job| async move {
                let outcome = transport.call(ctx, || downstream.submit(&job)).await;
                (job, outcome)
            })
            .buffered(self.config.concurrency)
            .collect()
            .await
    }

    fn settle(&self, result: &mut BatchResult, job: TransactionJob, outcome: Result<Receipt>) {
        match outcome {
            Ok(receipt) => {
                if let Err(e) = self.queue.acknowledge(&job) {
                    tracing::warn!(job_id = %job.id(), error = %e, "Acknowledge failed");
                }
                self.tracer.job_succeeded(&JobEvent::from_job(&job));
                result.push_success(job, receipt);
            }
            Err(error) if is_abandoned(&error) => {
                let sanitized = SanitizedError::new(job.id(), &error);
                let job = match self.queue.release(&job) {
                    Ok(released) => released,
                    Err(e) => {
                        tracing::warn!(job_id = %job.id(), error = %e, "Release failed");
                        job
                    }
                };
                self.tracer.job_failed(&JobEvent::from_job(&job), &sanitized);
                result.push_failure(job, sanitized, false);
            }
            Err(error) => {
                let sanitized = SanitizedError::new(job.id(), &error);
                let (job, terminal) = match self.queue.record_failure(&job, &error) {
                    Ok(outcome) => {
                        let terminal = outcome.is_terminal();
                        (outcome.into_job(), terminal)
                    }
                    Err(e) => {
                        tracing::warn!(job_id = %job.id(), error = %e, "Recording failure failed");
                        (job, true)
                    }
                };
                self.tracer.job_failed(&JobEvent::from_job(&job), &sanitized);
                result.push_failure(job, sanitized, terminal);
            }
        }
    }
}

/// The caller gave up before the downstream produced an outcome
///
/// Such jobs go back to the queue without charging an attempt.
fn is_abandoned(error: &ResilienceError) -> bool {
    matches!(
        error,
        ResilienceError::Cancelled
            | ResilienceError::Timeout {
                stage: TimeoutStage::RateLimit
            }
    )
}
