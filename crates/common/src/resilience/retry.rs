//! Generic retry with exponential backoff
//!
//! A retry policy decides per-error whether another attempt is worthwhile;
//! the executor owns the backoff schedule. The schedule for attempt `n`
//! (1-based) is `min(base_delay * 2^(n-1), max_delay)`, deterministic unless
//! jitter is enabled. Exhausting attempts surfaces the operation's last
//! error unchanged inside [`RetryError::Exhausted`].

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcome of a retried operation that did not succeed.
///
/// The operation's own error is carried unchanged so callers can flatten it
/// back out without losing information.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// All attempts were used; holds the final attempt's error.
    #[error("retry attempts exhausted: {0}")]
    Exhausted(E),

    /// The policy declined to retry; holds the error as seen.
    #[error("not retryable: {0}")]
    NotRetryable(E),

    /// Cancelled while waiting between attempts.
    #[error("cancelled while retrying")]
    Cancelled,
}

impl<E> RetryError<E> {
    /// The operation error, if one was observed.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Exhausted(e) | Self::NotRetryable(e) => Some(e),
            Self::Cancelled => None,
        }
    }
}

/// Decides whether an error is worth another attempt.
pub trait RetryPolicy<E>: Send + Sync {
    /// `attempt` is the 1-based number of the attempt that just failed.
    fn should_retry(&self, error: &E, attempt: u32) -> bool;
}

/// Retry configuration: attempt limit and backoff schedule.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first (must be >= 1).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling for the exponential schedule.
    pub max_delay: Duration,
    /// Add up to 25% random jitter to each delay. Off by default so the
    /// schedule stays deterministic.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            jitter: false,
        }
    }
}

impl RetryConfig {
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::default()
    }

    /// Backoff delay before retrying after the given 1-based failed attempt:
    /// `min(base_delay * 2^(attempt-1), max_delay)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let factor = 2u64.saturating_pow(exponent);
        let delay_ms = (self.base_delay.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_delay.as_millis() as u64))
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        use rand::Rng;
        let spread = (delay.as_millis() as u64) / 4;
        let extra = rand::thread_rng().gen_range(0..=spread);
        delay + Duration::from_millis(extra)
    }
}

/// Builder for [`RetryConfig`] with validation.
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
    invalid: Option<&'static str>,
}

impl RetryConfigBuilder {
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        if attempts == 0 {
            self.invalid = Some("max_attempts must be greater than 0");
        }
        self.config.max_attempts = attempts;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    pub fn jitter(mut self, jitter: bool) -> Self {
        self.config.jitter = jitter;
        self
    }

    pub fn build(self) -> Result<RetryConfig, &'static str> {
        match self.invalid {
            Some(reason) => Err(reason),
            None => Ok(self.config),
        }
    }
}

/// Executes operations under a retry config and policy.
pub struct RetryExecutor<P> {
    config: RetryConfig,
    policy: P,
}

impl<P> RetryExecutor<P> {
    pub fn new(config: RetryConfig, policy: P) -> Self {
        Self { config, policy }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute without external cancellation.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        P: RetryPolicy<E>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_cancellable(&CancellationToken::new(), operation).await
    }

    /// Execute, aborting promptly if `cancel` fires during a backoff sleep.
    pub async fn execute_cancellable<F, Fut, T, E>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        P: RetryPolicy<E>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1u32;
        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if attempt >= self.config.max_attempts {
                        warn!(attempt, "retry attempts exhausted");
                        return Err(RetryError::Exhausted(error));
                    }
                    if !self.policy.should_retry(&error, attempt) {
                        return Err(RetryError::NotRetryable(error));
                    }

                    let delay = self.config.apply_jitter(self.config.delay_for_attempt(attempt));
                    warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying after backoff");

                    tokio::select! {
                        _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Pre-defined retry policies.
pub mod policies {
    use super::RetryPolicy;

    /// Retries on any error.
    #[derive(Debug, Clone, Copy)]
    pub struct AlwaysRetry;

    impl<E> RetryPolicy<E> for AlwaysRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> bool {
            true
        }
    }

    /// Never retries.
    #[derive(Debug, Clone, Copy)]
    pub struct NeverRetry;

    impl<E> RetryPolicy<E> for NeverRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> bool {
            false
        }
    }

    /// Retry decision delegated to a predicate.
    #[derive(Debug)]
    pub struct PredicateRetry<F>(pub F);

    impl<F, E> RetryPolicy<E> for PredicateRetry<F>
    where
        F: Fn(&E, u32) -> bool + Send + Sync,
    {
        fn should_retry(&self, error: &E, attempt: u32) -> bool {
            (self.0)(error, attempt)
        }
    }
}
