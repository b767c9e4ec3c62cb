//! # Embedding Pipeline Module
//!
//! This module wraps a raw embedding function into a pipeline that batches its
//! input, retries failed batch calls, throttles call frequency and reports progress.
//!
//! ## Key Components
//!
//! - `FunctionWrapper`: Chainable builder collecting the pipeline configuration
//! - `Pipeline`: Frozen pipeline produced by `FunctionWrapper::build`
//! - `Batcher`: Lazy fixed-size batching with an optional progress bar
//! - `RetryPolicy`: Per-batch retry with backoff, jitter and a delay cap
//! - `RateLimiter`: Minimum spacing between batch calls
//!
//! ## Example
//!
//! ```rust,no_run
//! use embedkit::pipeline::FunctionWrapper;
//! use std::time::Duration;
//!
//! # async fn example() -> embedkit::Result<()> {
//! let embed = |batch: Vec<String>| async move {
//!     let vectors: Vec<Vec<f32>> = batch.iter().map(|s| vec![s.len() as f32]).collect();
//!     Ok::<_, embedkit::Error>(vectors)
//! };
//!
//! let pipeline = FunctionWrapper::new(&embed)
//!     .with_default_retry()
//!     .rate_limit(10.0, Duration::from_secs(1))
//!     .batch_size(64)
//!     .show_progress()
//!     .build()?;
//!
//! let texts = vec!["hello".to_string(), "world".to_string()];
//! let vectors = pipeline.call(&texts).await?;
//! assert_eq!(vectors.len(), texts.len());
//! # Ok(())
//! # }
//! ```

mod batcher;
mod rate_limit;
mod retry;

pub use batcher::{Batcher, batch_count};
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;

use crate::config::{BatchConfig, PipelineConfig, RateLimitConfig, RetryConfig};
use crate::embedding::{EmbeddingFunction, Vector};
use crate::error::{Error, Result};
use std::fmt;
use std::time::Duration;
use tracing::{Instrument, Span, debug, info, info_span, warn};

/// Builder wrapping an embedding function with batching, retry, rate limiting and
/// progress reporting.
///
/// Every method consumes and returns the builder so calls can be chained. The
/// wrapped function is borrowed, never owned.
pub struct FunctionWrapper<'f, F> {
    func: &'f F,
    config: PipelineConfig,
    retry_if: fn(&Error) -> bool,
    span: Option<Span>,
}

impl<'f, F> FunctionWrapper<'f, F> {
    pub fn new(func: &'f F) -> Self {
        Self::from_config(func, PipelineConfig::default())
    }

    /// Start from an existing configuration, e.g. one read from a file
    pub fn from_config(func: &'f F, config: PipelineConfig) -> Self {
        Self {
            func,
            config,
            retry_if: Error::is_retryable,
            span: None,
        }
    }

    /// Allow at most `max_calls` batch calls per `period`
    pub fn rate_limit(mut self, max_calls: f64, period: Duration) -> Self {
        self.config.rate_limit = Some(RateLimitConfig { max_calls, period });
        self
    }

    /// Rate limit with the default of 0.9 calls per second
    pub fn with_default_rate_limit(mut self) -> Self {
        self.config.rate_limit = Some(RateLimitConfig::default());
        self
    }

    /// Retry each failing batch call according to `retry`
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = Some(retry);
        self
    }

    /// Retry with the default schedule: 10 tries, 1s delay tripling up to 30s, 1s jitter
    pub fn with_default_retry(self) -> Self {
        self.retry(RetryConfig::default())
    }

    /// Replace the predicate deciding which errors are retried
    pub fn retry_if(mut self, predicate: fn(&Error) -> bool) -> Self {
        self.retry_if = predicate;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch.batch_size = batch_size;
        self
    }

    pub fn show_progress(mut self) -> Self {
        self.config.batch.show_progress = true;
        self
    }

    /// Declare whether rate limiting can be enforced in this environment.
    ///
    /// When `false`, a configured rate limit is skipped with a warning and every call
    /// runs unthrottled.
    pub fn rate_limiting_available(mut self, available: bool) -> Self {
        self.config.rate_limiting_available = available;
        self
    }

    /// Emit the pipeline's log events inside `span`
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Validate the configuration and freeze it into a [`Pipeline`]
    pub fn build(self) -> Result<Pipeline<'f, F>> {
        let span = self
            .span
            .unwrap_or_else(|| info_span!("embedding_pipeline"));
        let entered = span.enter();

        self.config.batch.validate()?;

        let retry = self
            .config
            .retry
            .map(|retry| RetryPolicy::new(retry).map(|policy| policy.retry_if(self.retry_if)))
            .transpose()?;

        let limiter = match &self.config.rate_limit {
            None => None,
            Some(rate_limit) if !self.config.rate_limiting_available => {
                rate_limit.validate()?;
                warn!("Rate limiting is not available, proceeding without rate limiter");
                None
            }
            Some(rate_limit) => {
                let limiter = RateLimiter::new(rate_limit)?;
                if limiter.is_none() {
                    warn!(
                        max_calls = rate_limit.max_calls,
                        period_secs = rate_limit.period.as_secs_f64(),
                        "Rate limit cannot be enforced, proceeding without rate limiter"
                    );
                }
                limiter
            }
        };

        drop(entered);
        Ok(Pipeline {
            func: self.func,
            batch: self.config.batch,
            retry,
            limiter,
            span,
        })
    }
}

/// A frozen embedding pipeline.
///
/// Calling it splits the input into batches, runs each batch through the configured
/// rate limiter and retry policy, and concatenates the results in input order.
pub struct Pipeline<'f, F> {
    func: &'f F,
    batch: BatchConfig,
    retry: Option<RetryPolicy>,
    limiter: Option<RateLimiter>,
    span: Span,
}

impl<'f, F> Pipeline<'f, F> {
    pub fn batch_size(&self) -> usize {
        self.batch.batch_size
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    pub fn is_rate_limited(&self) -> bool {
        self.limiter.is_some()
    }

    /// Embed every item of `input`, returning one vector per item in input order
    pub async fn call<T>(&self, input: &[T]) -> Result<Vec<Vector>>
    where
        F: EmbeddingFunction<T>,
        T: Clone,
    {
        self.embed_all(input).instrument(self.span.clone()).await
    }

    async fn embed_all<T>(&self, input: &[T]) -> Result<Vec<Vector>>
    where
        F: EmbeddingFunction<T>,
        T: Clone,
    {
        let batches = Batcher::new(input, self.batch.batch_size)?;
        let batches = if self.batch.show_progress {
            batches.with_progress()
        } else {
            batches
        };
        let batch_count = batches.len();
        debug!(items = input.len(), batch_count, "Embedding input");

        let mut embeddings = Vec::with_capacity(input.len());
        for (index, batch) in batches.enumerate() {
            let vectors = self.embed_batch(batch).await?;
            if vectors.len() != batch.len() {
                return Err(Error::LengthMismatch {
                    expected: batch.len(),
                    actual: vectors.len(),
                });
            }
            debug!(batch = index, size = batch.len(), "Embedded batch");
            embeddings.extend(vectors);
        }

        info!(items = embeddings.len(), batch_count, "Embedding completed");
        Ok(embeddings)
    }

    async fn embed_batch<T>(&self, batch: &[T]) -> Result<Vec<Vector>>
    where
        F: EmbeddingFunction<T>,
        T: Clone,
    {
        let call = || self.func.embed(batch.to_vec());
        match (&self.limiter, &self.retry) {
            (Some(limiter), Some(retry)) => limiter.run(|| retry.run(call)).await,
            (Some(limiter), None) => limiter.run(call).await,
            (None, Some(retry)) => retry.run(call).await,
            (None, None) => call().await,
        }
    }
}

impl<F> fmt::Display for Pipeline<'_, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EmbeddingFunction(batch_size={}", self.batch.batch_size)?;
        if let Some(retry) = &self.retry {
            write!(f, ", retry_tries={}", retry.config().tries)?;
        }
        if let Some(limiter) = &self.limiter {
            write!(f, ", min_interval={:?}", limiter.interval())?;
        }
        if self.batch.show_progress {
            write!(f, ", show_progress")?;
        }
        write!(f, ")")
    }
}
