//! Error types for the embedkit crate

use reqwest::StatusCode;
use thiserror::Error;

/// Result type for embedkit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for embedkit operations
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid pipeline, cache or limiter configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The requested source column does not exist in the table
    #[error("Column not found: {0}")]
    MissingColumn(String),

    /// No API key could be found for a provider
    #[error("Please set the {env_var} environment variable.")]
    MissingApiKey {
        /// Provider name as given by the caller
        provider: String,
        /// Environment variable the key is expected in
        env_var: String,
    },

    /// An embedding function returned a different number of vectors than it was given
    #[error("Embedding count mismatch: expected {expected} vectors, got {actual}")]
    LengthMismatch {
        /// Number of inputs
        expected: usize,
        /// Number of vectors returned
        actual: usize,
    },

    /// Input that can never be embedded successfully
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Failure raised by the underlying embedding call
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Rate limit exceeded on the provider side
    #[error("Rate limit exceeded. Please retry after {retry_after_secs} seconds")]
    RateLimit {
        /// Seconds to wait before retrying
        retry_after_secs: u64,
    },

    /// All retry attempts failed
    #[error("Maximum number of retries ({retries}) exceeded: {source}")]
    RetryExhausted {
        /// Retry ceiling that was hit
        retries: u32,
        /// The last failure
        #[source]
        source: Box<Error>,
    },

    /// DNS or transport failure while downloading a URL
    #[error("could not download {url} due to {source}")]
    Connection {
        /// The URL that was requested
        url: String,
        /// Underlying transport error
        #[source]
        source: reqwest::Error,
    },

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Arrow array or schema error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a retry loop may try the failed operation again.
    ///
    /// Configuration and contract violations are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Embedding(_) | Error::RateLimit { .. } | Error::Other(_) => true,
            Error::Connection { .. } => true,
            Error::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|status| {
                        status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
                    })
            }
            Error::Config(_)
            | Error::MissingColumn(_)
            | Error::MissingApiKey { .. }
            | Error::LengthMismatch { .. }
            | Error::InvalidInput(_)
            | Error::RetryExhausted { .. }
            | Error::InvalidUrl(_)
            | Error::Arrow(_)
            | Error::Json(_)
            | Error::Io(_) => false,
        }
    }

    /// Shorthand for an [`Error::Embedding`] with the given message.
    pub fn embedding(message: impl Into<String>) -> Self {
        Error::Embedding(message.into())
    }
}
