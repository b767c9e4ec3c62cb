//! # Pipeline Configuration Module
//!
//! This module provides the configuration structures for the embedding pipeline:
//! how inputs are batched, how failed batch calls are retried, and how often the
//! wrapped function may be invoked.
//!
//! ## Key Components
//!
//! - `BatchConfig`: Batch size and progress reporting
//! - `RetryConfig`: Per-batch retry schedule (tries, delay, backoff, jitter, cap)
//! - `RateLimitConfig`: Maximum calls per period
//! - `PipelineConfig`: Complete configuration, loadable from a JSON file
//!
//! Durations are (de)serialized as fractional seconds, so `{"delay": 0.5}` means
//! half a second.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Number of rows passed to each call of the embedding function by default
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Configuration for splitting inputs into batches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Number of items per call; must be at least 1
    pub batch_size: usize,

    /// Whether to display a progress bar ticking once per batch
    pub show_progress: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            show_progress: false,
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Retry schedule applied around every batch call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one
    pub tries: u32,

    /// Delay before the first retry
    #[serde(with = "secs")]
    pub delay: Duration,

    /// Upper bound for the delay; `None` leaves it uncapped
    #[serde(with = "opt_secs")]
    pub max_delay: Option<Duration>,

    /// Multiplier applied to the delay after every failed attempt
    pub backoff: f64,

    /// Upper bound of the random delay added to every sleep
    #[serde(with = "secs")]
    pub jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            tries: 10,
            delay: Duration::from_secs(1),
            max_delay: Some(Duration::from_secs(30)),
            backoff: 3.0,
            jitter: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tries == 0 {
            return Err(Error::Config("retry tries must be at least 1".to_string()));
        }
        if !self.backoff.is_finite() || self.backoff <= 0.0 {
            return Err(Error::Config(format!(
                "retry backoff must be a positive number, got {}",
                self.backoff
            )));
        }
        Ok(())
    }
}

/// Limit on how often the wrapped function may be called
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Calls allowed per period; may be fractional
    pub max_calls: f64,

    /// Length of the window `max_calls` applies to
    #[serde(with = "secs")]
    pub period: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls: 0.9,
            period: Duration::from_secs(1),
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.max_calls.is_finite() || self.max_calls <= 0.0 {
            return Err(Error::Config(format!(
                "rate limit max_calls must be a positive number, got {}",
                self.max_calls
            )));
        }
        if self.period.is_zero() {
            return Err(Error::Config(
                "rate limit period must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Minimum spacing between two calls, or `None` if it is not representable.
    pub fn min_interval(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(self.period.as_secs_f64() / self.max_calls).ok()
    }
}

/// Complete configuration for an embedding pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Batching options
    pub batch: BatchConfig,

    /// Retry schedule; `None` calls each batch exactly once
    pub retry: Option<RetryConfig>,

    /// Rate limit; `None` leaves calls unthrottled
    pub rate_limit: Option<RateLimitConfig>,

    /// Whether the runtime can throttle calls. When `false` a configured rate limit
    /// is skipped with a warning.
    pub rate_limiting_available: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            retry: None,
            rate_limit: None,
            rate_limiting_available: true,
        }
    }
}

impl PipelineConfig {
    /// Read a configuration from a JSON file
    pub async fn read_config(path: impl AsRef<Path>) -> Result<Self> {
        let config = tokio::fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&config)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.batch.validate()?;
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        if let Some(rate_limit) = &self.rate_limit {
            rate_limit.validate()?;
        }
        Ok(())
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
            .transpose()
    }
}
