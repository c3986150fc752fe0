//! Circuit breaker with deterministic time for tests
//!
//! One breaker guards one unreliable dependency (here: one calendar
//! provider). States: `Closed → Open → HalfOpen → Closed`. Reaching
//! `failure_threshold` consecutive failures opens the circuit; while open,
//! calls fail fast without touching the dependency. After
//! `recovery_timeout` a bounded number of probe calls (one by default) is
//! admitted in half-open state; probe success closes the circuit, probe
//! failure reopens it and restarts the timer.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Trait for time operations to enable deterministic testing
///
/// Production uses [`SystemClock`]; tests use [`MockClock`] to step through
/// recovery timeouts without real delays.
pub trait Clock: Send + Sync + 'static {
    /// Current instant (monotonic time).
    fn now(&self) -> Instant;
}

/// Real system clock for production use.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Mock clock for deterministic tests.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self { start: Instant::now(), elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Advance the clock without waiting.
    pub fn advance(&self, duration: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(PoisonError::into_inner);
        *elapsed += duration;
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        let elapsed = *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner);
        self.start + elapsed
    }
}

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Allowing requests.
    Closed,
    /// Rejecting requests until the recovery timeout elapses.
    Open,
    /// Admitting a bounded number of probe requests.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Error produced by a breaker-guarded call.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The circuit is open; the dependency was not contacted.
    #[error("circuit breaker is open, rejecting calls")]
    Open,

    /// The guarded operation itself failed.
    #[error("operation failed: {0}")]
    Operation(E),
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Probe successes needed to close from half-open.
    pub success_threshold: u32,
    /// Cooldown before an open circuit admits a probe.
    pub recovery_timeout: Duration,
    /// Probes admitted while half-open.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }
}

/// Builder for [`CircuitBreakerConfig`] with validation.
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
    invalid: Option<&'static str>,
}

impl CircuitBreakerConfigBuilder {
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        if threshold == 0 {
            self.invalid = Some("failure_threshold must be greater than 0");
        }
        self.config.failure_threshold = threshold;
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        if threshold == 0 {
            self.invalid = Some("success_threshold must be greater than 0");
        }
        self.config.success_threshold = threshold;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    pub fn half_open_max_calls(mut self, calls: u32) -> Self {
        if calls == 0 {
            self.invalid = Some("half_open_max_calls must be greater than 0");
        }
        self.config.half_open_max_calls = calls;
        self
    }

    pub fn build(self) -> Result<CircuitBreakerConfig, &'static str> {
        match self.invalid {
            Some(reason) => Err(reason),
            None => Ok(self.config),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    half_open_calls: u32,
    opened_at: Option<Instant>,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            half_open_calls: 0,
            opened_at: None,
        }
    }
}

/// Circuit breaker guarding one dependency.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    clock: C,
}

impl CircuitBreaker<SystemClock> {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker with a custom clock (test hook).
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> Self {
        Self { config, inner: Mutex::new(BreakerInner::new()), clock }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a call may proceed right now.
    ///
    /// An open circuit whose recovery timeout has elapsed transitions to
    /// half-open here, so the next caller becomes the probe.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| self.clock.now().duration_since(at))
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_calls = 0;
                    inner.half_open_successes = 0;
                    debug!("circuit transitioning to half-open after recovery timeout");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => inner.half_open_calls < self.config.half_open_max_calls,
        }
    }

    /// Record a successful operation.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                    info!("circuit closed after successful probe");
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed operation.
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    warn!(failures = inner.consecutive_failures, "circuit opened");
                }
            }
            CircuitState::HalfOpen => {
                // A failed probe reopens immediately and restarts the timer.
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                warn!("circuit reopened after failed probe");
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Force the breaker back to closed.
    pub fn reset(&self) {
        let mut inner = self.lock();
        *inner = BreakerInner::new();
        info!("circuit manually reset to closed");
    }

    /// Run an operation under the breaker, recording its outcome.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.can_execute() {
            debug!(state = %self.state(), "circuit rejecting call");
            return Err(BreakerError::Open);
        }

        {
            let mut inner = self.lock();
            if inner.state == CircuitState::HalfOpen {
                inner.half_open_calls += 1;
            }
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                self.record_failure();
                Err(BreakerError::Operation(error))
            }
        }
    }
}

/// Hands out one shared breaker per dependency key (provider identifier).
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self { config, breakers: DashMap::new() }
    }

    /// Breaker for the given key, created on first use.
    pub fn get(&self, key: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config.clone())))
            .value()
            .clone()
    }
}
