//! Time and randomness sources
//!
//! Every component that reads the time, sleeps, or samples jitter does so
//! through these traits so tests can run against a virtual clock.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of monotonic time and non-blocking sleeps
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;

    /// Suspend the calling task for `duration` without blocking the worker thread
    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `Instant::now` and `tokio::time::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock for deterministic tests
///
/// Time only moves when [`ManualClock::advance`] is called or when a task
/// sleeps; a sleep advances the clock by the requested duration and returns
/// immediately. Every requested sleep is recorded.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualState>>,
}

#[derive(Debug)]
struct ManualState {
    origin: Instant,
    offset: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualState {
                origin: Instant::now(),
                offset: Duration::ZERO,
                sleeps: Vec::new(),
            })),
        }
    }

    /// Move virtual time forward
    pub fn advance(&self, by: Duration) {
        self.inner.lock().offset += by;
    }

    /// Total virtual time elapsed since creation
    pub fn elapsed(&self) -> Duration {
        self.inner.lock().offset
    }

    /// Durations passed to `sleep`, in call order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.inner.lock().sleeps.clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let state = self.inner.lock();
        state.origin + state.offset
    }

    async fn sleep(&self, duration: Duration) {
        {
            let mut state = self.inner.lock();
            state.offset += duration;
            state.sleeps.push(duration);
        }
        tokio::task::yield_now().await;
    }
}

/// Source of uniformly distributed samples used for jitter
pub trait RandomSource: Send + Sync {
    /// Sample in `[0, 1)`
    fn next_unit(&self) -> f64;
}

/// Thread-local RNG
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_unit(&self) -> f64 {
        rand::thread_rng().gen_range(0.0..1.0)
    }
}

/// Always returns the same sample (clamped into `[0, 1)`)
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom(f64);

impl FixedRandom {
    /// Create a source returning `value`
    pub fn new(value: f64) -> Self {
        Self(value.clamp(0.0, 1.0 - f64::EPSILON))
    }

    /// Source that always returns zero, i.e. no jitter
    pub fn zero() -> Self {
        Self(0.0)
    }
}

impl RandomSource for FixedRandom {
    fn next_unit(&self) -> f64 {
        self.0
    }
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// Shared random source handle
pub type SharedRandom = Arc<dyn RandomSource>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_clock_sleep_advances_time() {
        let clock = ManualClock::new();
        let start = clock.now();

        clock.sleep(Duration::from_millis(250)).await;
        clock.advance(Duration::from_millis(50));

        assert_eq!(clock.now() - start, Duration::from_millis(300));
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(250)]);
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        clock.advance(Duration::from_secs(1));
        assert_eq!(other.elapsed(), Duration::from_secs(1));
    }

    #[test]
    fn test_fixed_random_clamped() {
        assert_eq!(FixedRandom::new(-1.0).next_unit(), 0.0);
        assert!(FixedRandom::new(2.0).next_unit() < 1.0);
        assert_eq!(FixedRandom::new(0.5).next_unit(), 0.5);
    }

    #[test]
    fn test_thread_random_in_range() {
        let random = ThreadRandom;
        for _ in 0..100 {
            let sample = random.next_unit();
            assert!((0.0..1.0).contains(&sample));
        }
    }
}
