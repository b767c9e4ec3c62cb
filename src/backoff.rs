//! Standalone retry helper with exponential backoff
//!
//! Unlike the pipeline's [`RetryPolicy`](crate::pipeline::RetryPolicy), this helper
//! counts *retries* rather than attempts, grows the delay without a cap, and wraps
//! the last failure in [`Error::RetryExhausted`] once the ceiling is hit.

use crate::error::{Error, Result};
use rand::{Rng, thread_rng};
use std::future::Future;
use std::time::Duration;
use tracing::info;

/// Exponential backoff settings.
///
/// After the n-th failure the delay becomes `delay * exponential_base * (1 + r)`,
/// where `r` is uniform in `[0, 1)` when `jitter` is set and 0 otherwise. The first
/// sleep is therefore `initial_delay * exponential_base`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    exponential_base: f64,
    jitter: bool,
    max_retries: u32,
    retry_if: fn(&Error) -> bool,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            exponential_base: 2.0,
            jitter: true,
            max_retries: 7,
            retry_if: Error::is_retryable,
        }
    }
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    pub fn exponential_base(mut self, exponential_base: f64) -> Self {
        self.exponential_base = exponential_base;
        self
    }

    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Replace the predicate deciding which errors are retried
    pub fn retry_if(mut self, predicate: fn(&Error) -> bool) -> Self {
        self.retry_if = predicate;
        self
    }

    /// Check that the delay can grow; a non-positive or non-finite base cannot
    pub fn validate(&self) -> Result<()> {
        if !self.exponential_base.is_finite() || self.exponential_base <= 0.0 {
            return Err(Error::Config(format!(
                "exponential base must be a positive number, got {}",
                self.exponential_base
            )));
        }
        Ok(())
    }

    /// Run `op` until it succeeds or fails more than `max_retries` times
    pub async fn run<F, Fut, R>(&self, mut op: F) -> Result<R>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        self.validate()?;
        let mut state = BackoffState::new(self.initial_delay);

        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !(self.retry_if)(&err) {
                return Err(err);
            }

            state.attempt += 1;
            if state.attempt > self.max_retries {
                return Err(Error::RetryExhausted {
                    retries: self.max_retries,
                    source: Box::new(err),
                });
            }

            let delay = state.advance(self.exponential_base, self.jitter, &mut thread_rng());
            info!("Retrying in {:.2} seconds due to {}", delay.as_secs_f64(), err);
            tokio::time::sleep(delay).await;
        }
    }
}

/// Retry bookkeeping for a single [`ExponentialBackoff::run`] invocation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffState {
    /// Number of failures seen so far
    pub attempt: u32,
    /// Delay slept after the latest failure
    pub current_delay: Duration,
}

impl BackoffState {
    pub fn new(initial_delay: Duration) -> Self {
        Self {
            attempt: 0,
            current_delay: initial_delay,
        }
    }

    /// Grow the delay for the next sleep and return it
    pub fn advance<R: Rng>(&mut self, exponential_base: f64, jitter: bool, rng: &mut R) -> Duration {
        let spread = if jitter { rng.gen_range(0.0..1.0) } else { 0.0 };
        let secs = self.current_delay.as_secs_f64() * exponential_base * (1.0 + spread);
        self.current_delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
        self.current_delay
    }
}

/// A function wrapped with exponential backoff; see [`retry_with_exponential_backoff`]
#[derive(Debug, Clone)]
pub struct BackoffRetry<F> {
    func: F,
    backoff: ExponentialBackoff,
}

impl<F> BackoffRetry<F> {
    /// Call the wrapped function with `args`, retrying on failure
    pub async fn call<A, Fut, R>(&self, args: A) -> Result<R>
    where
        F: Fn(A) -> Fut,
        A: Clone,
        Fut: Future<Output = Result<R>>,
    {
        self.backoff.run(|| (self.func)(args.clone())).await
    }
}

/// Wrap `func` so that failed calls are retried with exponential backoff
pub fn retry_with_exponential_backoff<F>(func: F, backoff: ExponentialBackoff) -> BackoffRetry<F> {
    BackoffRetry { func, backoff }
}
