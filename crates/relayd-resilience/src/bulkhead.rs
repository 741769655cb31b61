//! Bulkhead pattern for limiting concurrent operations
//!
//! At most `max_concurrency` calls run at once. A call arriving at capacity
//! is rejected immediately with `BulkheadFull`; there is no waiting queue.

use crate::error::{ConfigError, ResilienceError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Configuration for bulkhead behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkheadConfig {
    /// Maximum number of concurrent operations allowed
    pub max_concurrency: usize,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self { max_concurrency: 16 }
    }
}

impl BulkheadConfig {
    /// Create a config with the given cap
    pub fn new(max_concurrency: usize) -> Self {
        Self { max_concurrency }
    }

    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::invalid(
                "bulkhead",
                "max_concurrency",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Metrics for bulkhead monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkheadMetrics {
    /// Calls currently holding a permit
    pub active: usize,
    /// Configured cap
    pub max_concurrency: usize,
    /// Calls turned away since creation
    pub rejected: u64,
}

/// Concurrency limiter
#[derive(Debug)]
pub struct Bulkhead {
    config: BulkheadConfig,
    active: AtomicUsize,
    rejected: AtomicU64,
}

impl Bulkhead {
    /// Create a new bulkhead with the given configuration
    pub fn new(config: BulkheadConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            active: AtomicUsize::new(0),
            rejected: AtomicU64::new(0),
        })
    }

    /// Configured cap
    pub fn max_concurrency(&self) -> usize {
        self.config.max_concurrency
    }

    /// Calls currently in flight
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Permits left before the bulkhead rejects
    pub fn available(&self) -> usize {
        self.config
            .max_concurrency
            .saturating_sub(self.active_count())
    }

    /// Get metrics
    pub fn metrics(&self) -> BulkheadMetrics {
        BulkheadMetrics {
            active: self.active_count(),
            max_concurrency: self.config.max_concurrency,
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    /// Take a slot without waiting
    ///
    /// The slot is returned when the permit is dropped, whichever way the
    /// holder exits.
    pub fn try_enter(&self) -> Result<BulkheadPermit<'_>> {
        let max = self.config.max_concurrency;
        let entered = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < max).then_some(current + 1)
            });

        match entered {
            Ok(_) => Ok(BulkheadPermit { bulkhead: self }),
            Err(current) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(active = current, max_concurrency = max, "Bulkhead full");
                Err(ResilienceError::BulkheadFull {
                    max_concurrency: max,
                })
            }
        }
    }

    /// Run `operation` inside the bulkhead
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _permit = self.try_enter()?;
        operation().await
    }
}

/// A held bulkhead slot
#[must_use = "the slot is released as soon as the permit is dropped"]
#[derive(Debug)]
pub struct BulkheadPermit<'a> {
    bulkhead: &'a Bulkhead,
}

impl Drop for BulkheadPermit<'_> {
    fn drop(&mut self) {
        self.bulkhead.active.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_zero_concurrency_rejected() {
        assert!(Bulkhead::new(BulkheadConfig::new(0)).is_err());
    }

    #[test]
    fn test_permits_up_to_cap() {
        let bulkhead = Bulkhead::new(BulkheadConfig::new(2)).unwrap();
        let first = bulkhead.try_enter().unwrap();
        let _second = bulkhead.try_enter().unwrap();
        assert_eq!(bulkhead.available(), 0);

        let err = bulkhead.try_enter().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BulkheadFull);
        assert_eq!(bulkhead.metrics().rejected, 1);

        drop(first);
        assert_eq!(bulkhead.active_count(), 1);
        assert!(bulkhead.try_enter().is_ok());
    }

    #[tokio::test]
    async fn test_execute_releases_on_error() {
        let bulkhead = Bulkhead::new(BulkheadConfig::new(1)).unwrap();
        let result: Result<()> = bulkhead
            .execute(|| async { Err(ResilienceError::transient("boom")) })
            .await;
        assert!(result.is_err());
        assert_eq!(bulkhead.active_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_future_releases_slot() {
        let bulkhead = Arc::new(Bulkhead::new(BulkheadConfig::new(1)).unwrap());
        let inner = bulkhead.clone();
        let handle = tokio::spawn(async move {
            inner
                .execute(|| async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                })
                .await
        });

        while bulkhead.active_count() == 0 {
            tokio::task::yield_now().await;
        }
        handle.abort();
        let _ = handle.await;
        assert_eq!(bulkhead.active_count(), 0);
    }

    #[test]
    fn test_slot_released_on_panic() {
        let bulkhead = Bulkhead::new(BulkheadConfig::new(1)).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _permit = bulkhead.try_enter().unwrap();
            panic!("worker crashed");
        }));
        assert!(result.is_err());
        assert_eq!(bulkhead.active_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_never_exceeds_cap() {
        let bulkhead = Arc::new(Bulkhead::new(BulkheadConfig::new(3)).unwrap());
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let bulkhead = bulkhead.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                bulkhead
                    .execute(|| async {
                        peak.fetch_max(bulkhead.active_count(), Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        Ok(())
                    })
                    .await
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                admitted += 1;
            }
        }
        assert!(admitted >= 1);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(bulkhead.active_count(), 0);
    }
}
