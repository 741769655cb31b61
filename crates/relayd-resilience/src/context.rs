//! Per-call deadline and cancellation
//!
//! A [`CallContext`] travels with one logical call through the rate limiter,
//! the retry loop and the downstream invocation. Every suspension point
//! consults it.

use crate::clock::Clock;
use crate::error::{ResilienceError, Result, TimeoutStage};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Deadline and cancellation signal for one call
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: Option<CancellationToken>,
}

impl CallContext {
    /// Context with no deadline and no cancellation
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an absolute deadline
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set a deadline relative to the clock's current time
    ///
    /// A timeout too large to represent as an `Instant` leaves the context
    /// without a deadline.
    pub fn with_timeout(mut self, clock: &dyn Clock, timeout: Duration) -> Self {
        self.deadline = clock.now().checked_add(timeout);
        self
    }

    /// Attach a cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Absolute deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when there is no deadline
    pub fn remaining(&self, clock: &dyn Clock) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(clock.now()))
    }

    /// Check if the deadline has passed
    pub fn is_expired(&self, clock: &dyn Clock) -> bool {
        self.deadline.is_some_and(|deadline| clock.now() >= deadline)
    }

    /// Check if the cancellation token has fired
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// Suspend for `duration`, honouring cancellation and the deadline
    ///
    /// A wait that cannot finish before the deadline fails with `Timeout`
    /// straight away instead of sleeping until the deadline first.
    pub async fn sleep(
        &self,
        clock: &dyn Clock,
        duration: Duration,
        stage: TimeoutStage,
    ) -> Result<()> {
        if self.is_cancelled() {
            return Err(ResilienceError::Cancelled);
        }
        if let Some(remaining) = self.remaining(clock) {
            if duration > remaining {
                return Err(ResilienceError::Timeout { stage });
            }
        }

        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(ResilienceError::Cancelled),
                    _ = clock.sleep(duration) => Ok(()),
                }
            }
            None => {
                clock.sleep(duration).await;
                Ok(())
            }
        }
    }

    /// Drive an in-flight downstream future under the deadline and cancellation
    ///
    /// The remaining budget is read once from `clock` when the call starts,
    /// then enforced with `tokio::time::timeout`. Advancing a [`ManualClock`]
    /// does not expire a call already in flight; tests that need the deadline
    /// to fire run on a paused tokio runtime.
    ///
    /// [`ManualClock`]: crate::clock::ManualClock
    pub async fn run_in_flight<F>(&self, clock: &dyn Clock, future: F) -> Result<F::Output>
    where
        F: Future,
    {
        if self.is_cancelled() {
            return Err(ResilienceError::Cancelled);
        }

        let bounded = async {
            match self.remaining(clock) {
                Some(remaining) => tokio::time::timeout(remaining, future)
                    .await
                    .map_err(|_| ResilienceError::Timeout {
                        stage: TimeoutStage::InFlight,
                    }),
                None => Ok(future.await),
            }
        };

        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(ResilienceError::Cancelled),
                    output = bounded => output,
                }
            }
            None => bounded.await,
        }
    }
}
