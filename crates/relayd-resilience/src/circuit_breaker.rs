//! Circuit breaker pattern implementation
//!
//! Stops calls to an unhealthy downstream after `failure_threshold`
//! consecutive failures. Once `reset_timeout` has passed the breaker lets a
//! single probe through; its outcome decides whether the circuit closes or
//! reopens.

use crate::clock::SharedClock;
use crate::error::{ConfigError, ResilienceError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed - requests flow normally
    Closed,
    /// Circuit is open - requests are rejected
    Open,
    /// Circuit is half-open - one probe may test if the service recovered
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Configuration for circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Name for logging
    pub name: String,
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time to wait in open state before allowing a probe
    #[serde(with = "crate::serde_millis", rename = "reset_timeout_ms")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "downstream".to_string(),
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config with a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set failure threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set reset timeout
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.failure_threshold < 1 {
            return Err(ConfigError::invalid(
                "circuit_breaker",
                "failure_threshold",
                "must be at least 1",
            ));
        }
        if self.reset_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "circuit_breaker",
                "reset_timeout",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_state_change: Instant,
    probe_in_flight: bool,
    opened_count: u64,
}

/// Circuit breaker for preventing cascading failures
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: SharedClock,
    inner: Mutex<BreakerState>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &*self.inner.lock())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with config
    pub fn new(config: CircuitBreakerConfig, clock: SharedClock) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let now = clock.now();
        Ok(Self {
            config,
            clock,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_state_change: now,
                probe_in_flight: false,
                opened_count: 0,
            }),
        })
    }

    /// Breaker name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The configuration in use
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get current state; an expired open circuit reports `HalfOpen`
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// Check if the circuit would admit a call right now, without reserving anything
    pub fn check(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen if !inner.probe_in_flight => Ok(()),
            _ => Err(self.open_error(&inner)),
        }
    }

    /// Reserve the right to make one call
    ///
    /// In half-open state exactly one permit, the probe, can be outstanding;
    /// everyone else is rejected with `CircuitOpen` until it reports back.
    pub fn acquire(&self) -> Result<BreakerPermit<'_>> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        match inner.state {
            CircuitState::Closed => Ok(BreakerPermit::new(self, false)),
            CircuitState::HalfOpen if !inner.probe_in_flight => {
                inner.probe_in_flight = true;
                tracing::debug!(circuit = %self.config.name, "Admitting half-open probe");
                Ok(BreakerPermit::new(self, true))
            }
            _ => Err(self.open_error(&inner)),
        }
    }

    /// Record a successful operation outside of a permit
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        let probe = inner.state == CircuitState::HalfOpen;
        self.on_success(&mut inner, probe);
    }

    /// Record a failed operation outside of a permit
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        let probe = inner.state == CircuitState::HalfOpen;
        self.on_failure(&mut inner, probe);
    }

    /// Get metrics
    pub fn metrics(&self) -> CircuitMetrics {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        CircuitMetrics {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            probe_in_flight: inner.probe_in_flight,
            opened_count: inner.opened_count,
        }
    }

    /// Force close the circuit (for testing/admin)
    pub fn force_close(&self) {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, CircuitState::Closed);
    }

    /// Force open the circuit (for testing/admin)
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        self.transition(&mut inner, CircuitState::Open);
    }

    fn refresh(&self, inner: &mut BreakerState) {
        if inner.state != CircuitState::Open {
            return;
        }
        let elapsed = self
            .clock
            .now()
            .saturating_duration_since(inner.last_state_change);
        if elapsed >= self.config.reset_timeout {
            self.transition(inner, CircuitState::HalfOpen);
            tracing::debug!(circuit = %self.config.name, "Circuit half-open, awaiting probe");
        }
    }

    fn open_error(&self, inner: &BreakerState) -> ResilienceError {
        let retry_after = match inner.state {
            CircuitState::Open => {
                let elapsed = self
                    .clock
                    .now()
                    .saturating_duration_since(inner.last_state_change);
                self.config.reset_timeout.saturating_sub(elapsed)
            }
            _ => Duration::ZERO,
        };
        ResilienceError::CircuitOpen {
            name: self.config.name.clone(),
            retry_after,
        }
    }

    fn on_success(&self, inner: &mut BreakerState, probe: bool) {
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen if probe => {
                self.transition(inner, CircuitState::Closed);
                tracing::info!(
                    circuit = %self.config.name,
                    "Circuit closed after successful probe"
                );
            }
            // Reported by a call admitted before the circuit opened
            _ => {}
        }
    }

    fn on_failure(&self, inner: &mut BreakerState, probe: bool) {
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                if inner.consecutive_failures >= self.config.failure_threshold {
                    let failures = inner.consecutive_failures;
                    self.transition(inner, CircuitState::Open);
                    tracing::warn!(
                        circuit = %self.config.name,
                        failures,
                        reset_timeout = ?self.config.reset_timeout,
                        "Circuit opened due to failures"
                    );
                }
            }
            CircuitState::HalfOpen if probe => {
                self.transition(inner, CircuitState::Open);
                tracing::warn!(
                    circuit = %self.config.name,
                    "Circuit reopened after half-open failure"
                );
            }
            _ => {}
        }
    }

    fn on_release(&self, inner: &mut BreakerState, probe: bool) {
        if probe && inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        if to == CircuitState::Open {
            inner.opened_count += 1;
        }
        inner.state = to;
        inner.last_state_change = self.clock.now();
        inner.probe_in_flight = false;
        inner.consecutive_failures = 0;
    }

    fn settle(&self, probe: bool, outcome: Outcome) {
        let mut inner = self.inner.lock();
        match outcome {
            Outcome::Success => self.on_success(&mut inner, probe),
            Outcome::Failure => self.on_failure(&mut inner, probe),
            Outcome::Released => self.on_release(&mut inner, probe),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Success,
    Failure,
    Released,
}

/// Admission to make one call through a [`CircuitBreaker`]
///
/// Dropping a permit without recording an outcome releases it.
#[must_use = "an unrecorded permit is released on drop"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl std::fmt::Debug for BreakerPermit<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerPermit")
            .field("circuit", &self.breaker.config.name)
            .field("probe", &self.probe)
            .finish()
    }
}

impl<'a> BreakerPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    /// Whether this permit is the half-open probe
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// The downstream answered successfully
    pub fn record_success(mut self) {
        self.finish(Outcome::Success);
    }

    /// The downstream failed in a way that counts against its health
    pub fn record_failure(mut self) {
        self.finish(Outcome::Failure);
    }

    /// The outcome says nothing about downstream health
    pub fn release(mut self) {
        self.finish(Outcome::Released);
    }

    fn finish(&mut self, outcome: Outcome) {
        if !self.settled {
            self.settled = true;
            self.breaker.settle(self.probe, outcome);
        }
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        self.finish(Outcome::Released);
    }
}

/// Circuit breaker metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitMetrics {
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures counted in closed state
    pub consecutive_failures: u32,
    /// Whether a half-open probe is outstanding
    pub probe_in_flight: bool,
    /// Number of times the circuit has opened
    pub opened_count: u64,
}
