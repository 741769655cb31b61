//! Wiring of queue, transport and batcher around one downstream

use crate::config::{EngineConfig, Result};
use chrono::Utc;
use relayd_queue::{
    BatchResult, Batcher, DefaultIdempotencyKeys, Downstream, IdempotencyKeys, LoggingTracer,
    TracerHandle, TransactionBuiltEvent, TransactionJob, TransactionQueue,
};
use relayd_resilience::{
    CallContext, CircuitState, ReliableTransport, SharedClock, SharedRandom, SystemClock,
    ThreadRandom,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Transaction broadcasting engine
///
/// Submitted jobs are queued with an idempotency token, then drained by the
/// batcher through the rate limiter, circuit breaker, bulkhead and retry
/// stages of the transport.
pub struct Engine {
    config: EngineConfig,
    queue: Arc<TransactionQueue>,
    transport: Arc<ReliableTransport>,
    batcher: Batcher,
    tracer: TracerHandle,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("batcher", &self.batcher)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Engine on the system clock, logging lifecycle events through `tracing`
    pub fn new(config: EngineConfig, downstream: Arc<dyn Downstream>) -> Result<Self> {
        Self::with_parts(
            config,
            downstream,
            Arc::new(SystemClock),
            Arc::new(ThreadRandom),
            Arc::new(DefaultIdempotencyKeys),
            TracerHandle::new(Arc::new(LoggingTracer)),
        )
    }

    /// Engine with every collaborator supplied by the caller
    pub fn with_parts(
        config: EngineConfig,
        downstream: Arc<dyn Downstream>,
        clock: SharedClock,
        random: SharedRandom,
        keys: Arc<dyn IdempotencyKeys>,
        tracer: TracerHandle,
    ) -> Result<Self> {
        config.validate()?;

        let queue = Arc::new(
            TransactionQueue::new(config.queue.clone(), clock.clone())?
                .with_random(random.clone())
                .with_idempotency_keys(keys)
                .with_tracer(tracer.clone()),
        );
        let transport = Arc::new(ReliableTransport::new(
            config.transport_config(),
            clock,
            random,
        )?);
        let batcher = Batcher::new(
            config.batcher.clone(),
            queue.clone(),
            transport.clone(),
            downstream,
        )?
        .with_tracer(tracer.clone());

        tracing::debug!(
            circuit = %transport.circuit_breaker().name(),
            batch_size = config.batcher.batch_size,
            "Engine initialised"
        );

        Ok(Self {
            config,
            queue,
            transport,
            batcher,
            tracer,
        })
    }

    /// Accept a signed transaction; returns its idempotency token
    pub fn submit(&self, job: TransactionJob) -> Result<String> {
        self.tracer
            .transaction_built(&TransactionBuiltEvent::from_job(&job, Utc::now()));
        Ok(self.queue.enqueue(job)?)
    }

    /// Run one dispatch cycle
    pub async fn dispatch(&self) -> BatchResult {
        self.batcher.dispatch().await
    }

    /// Run one dispatch cycle bounded by `ctx`
    pub async fn dispatch_with(&self, ctx: &CallContext) -> BatchResult {
        self.batcher.dispatch_with(ctx).await
    }

    /// Dispatch periodically until `cancel` fires; returns the cycles run
    pub async fn run(&self, cancel: CancellationToken) -> u64 {
        self.batcher.run(cancel).await
    }

    /// Current downstream circuit state
    pub fn circuit_state(&self) -> CircuitState {
        self.transport.circuit_breaker().state()
    }

    /// The configuration in use
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The job queue
    pub fn queue(&self) -> &Arc<TransactionQueue> {
        &self.queue
    }

    /// The resilience pipeline
    pub fn transport(&self) -> &Arc<ReliableTransport> {
        &self.transport
    }

    /// The dispatcher
    pub fn batcher(&self) -> &Batcher {
        &self.batcher
    }
}
