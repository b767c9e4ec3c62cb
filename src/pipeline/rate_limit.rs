//! Call-frequency limiting for batch calls

use crate::config::RateLimitConfig;
use crate::error::Result;
use governor::{DefaultDirectRateLimiter, Quota};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{Instrument, debug_span};

/// Spaces calls at least `period / max_calls` apart.
///
/// The limiter allows a burst of one, so no window of length `period` ever sees more
/// than `max_calls` calls. Callers over the limit are suspended until a slot frees up.
pub struct RateLimiter {
    limiter: DefaultDirectRateLimiter,
    interval: Duration,
}

impl RateLimiter {
    /// Build a limiter for `config`.
    ///
    /// Returns `Ok(None)` when the rate is valid but cannot be enforced, for example
    /// when the spacing between calls rounds down to zero.
    pub fn new(config: &RateLimitConfig) -> Result<Option<Self>> {
        config.validate()?;
        let Some(interval) = config.min_interval() else {
            return Ok(None);
        };
        let Some(quota) = Quota::with_period(interval) else {
            return Ok(None);
        };
        Ok(Some(Self {
            limiter: DefaultDirectRateLimiter::direct(quota),
            interval,
        }))
    }

    /// Minimum spacing between two calls
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until the next call is allowed
    pub async fn until_ready(&self) {
        self.limiter.until_ready().instrument(debug_span!("limiter")).await;
    }

    /// Wait for a slot, then run `op`
    pub async fn run<F, Fut, R>(&self, op: F) -> R
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        self.until_ready().await;
        op().await
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
