//! Per-batch retry with delay, backoff, jitter and a delay cap

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use rand::{Rng, thread_rng};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retries a failing call up to `tries` attempts in total.
///
/// After a failed attempt the policy sleeps for the current delay plus up to
/// `jitter` of random extra time, never longer than `max_delay`. It then multiplies
/// the delay by `backoff` and caps it at `max_delay`. When every attempt fails the
/// last error is returned as is.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    retry_if: fn(&Error) -> bool,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            retry_if: Error::is_retryable,
        })
    }

    /// Replace the predicate deciding which errors are retried.
    pub fn retry_if(mut self, predicate: fn(&Error) -> bool) -> Self {
        self.retry_if = predicate;
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `op` until it succeeds, fails with a permanent error, or runs out of tries
    pub async fn run<F, Fut, R>(&self, mut op: F) -> Result<R>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let mut delay = self.config.delay;
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Call succeeded after retrying");
                    }
                    return Ok(value);
                }
                Err(err) if !(self.retry_if)(&err) => return Err(err),
                Err(err) if attempt >= self.config.tries => {
                    warn!(attempt, error = %err, "Giving up after {} attempts", attempt);
                    return Err(err);
                }
                Err(err) => {
                    let wait = self.cap(delay.saturating_add(self.jitter()));
                    warn!(
                        attempt,
                        tries = self.config.tries,
                        error = %err,
                        "Call failed, retrying in {:.2} seconds",
                        wait.as_secs_f64()
                    );
                    tokio::time::sleep(wait).await;
                    delay = self.next_delay(delay);
                    attempt += 1;
                }
            }
        }
    }

    /// Delay used after the one given, before jitter.
    pub fn next_delay(&self, delay: Duration) -> Duration {
        let next = Duration::try_from_secs_f64(delay.as_secs_f64() * self.config.backoff)
            .unwrap_or(Duration::MAX);
        self.cap(next)
    }

    fn cap(&self, delay: Duration) -> Duration {
        match self.config.max_delay {
            Some(max_delay) => delay.min(max_delay),
            None => delay,
        }
    }

    fn jitter(&self) -> Duration {
        if self.config.jitter.is_zero() {
            return Duration::ZERO;
        }
        let secs = thread_rng().gen_range(0.0..=self.config.jitter.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy(tries: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            tries,
            delay: Duration::from_secs(1),
            max_delay: Some(Duration::from_secs(3)),
            backoff: 2.0,
            jitter: Duration::ZERO,
        })
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = policy(5)
            .run(|| {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if call <= 3 {
                        Err(Error::embedding(format!("failure {call}")))
                    } else {
                        Ok(call)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_last_error_unchanged() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = policy(4)
            .run(|| {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err(Error::embedding(format!("failure {call}"))) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match result {
            Err(Error::Embedding(message)) => assert_eq!(message, "failure 4"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_grows_and_is_capped() {
        let start = Instant::now();
        let result: Result<()> = policy(4)
            .run(|| async { Err(Error::embedding("down")) })
            .await;

        assert!(result.is_err());
        // 1s + 2s + min(4s, 3s)
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(6), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(6100), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_adds_bounded_delay() {
        let policy = RetryPolicy::new(RetryConfig {
            tries: 2,
            delay: Duration::from_secs(1),
            max_delay: None,
            backoff: 1.0,
            jitter: Duration::from_secs(1),
        })
        .unwrap();

        let start = Instant::now();
        let _ = policy
            .run(|| async { Err::<(), _>(Error::embedding("down")) })
            .await;

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed <= Duration::from_millis(2100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_jittered_sleep_never_exceeds_max_delay() {
        let policy = RetryPolicy::new(RetryConfig {
            tries: 3,
            delay: Duration::from_secs(1),
            max_delay: Some(Duration::from_secs(1)),
            backoff: 2.0,
            jitter: Duration::from_secs(5),
        })
        .unwrap();

        let start = Instant::now();
        let result = policy
            .run(|| async { Err::<(), _>(Error::embedding("down")) })
            .await;

        assert!(result.is_err());
        // two sleeps, each capped at 1s
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(2100), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = policy(5)
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::InvalidInput("empty string".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_predicate_retries_everything() {
        let calls = AtomicU32::new(0);
        let result = policy(3)
            .retry_if(|_| true)
            .run(|| {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if call == 1 {
                        Err(Error::InvalidInput("flaky".to_string()))
                    } else {
                        Ok(call)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn test_next_delay() {
        let policy = policy(3);
        assert_eq!(policy.next_delay(Duration::from_secs(1)), Duration::from_secs(2));
        assert_eq!(policy.next_delay(Duration::from_secs(2)), Duration::from_secs(3));
    }

    #[test]
    fn test_zero_tries_is_config_error() {
        let result = RetryPolicy::new(RetryConfig {
            tries: 0,
            ..Default::default()
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
