//! # embedkit - Batched, resilient embedding calls for Rust
//!
//! This crate wraps a raw embedding function (a callable mapping a batch of inputs
//! to one vector per input) with the plumbing every embedding workload ends up
//! needing: fixed-size batching, retry with backoff and jitter, call-rate limiting,
//! progress reporting and tracing spans. It also ships helpers for embedding a
//! column of an Arrow table and for caching per-instance results.
//!
//! ## Features
//!
//! - `FunctionWrapper` builder producing an immutable `Pipeline`
//! - Retry policy limited to transient failures, with capped exponential backoff
//! - Rate limiting backed by `governor`
//! - Progress bars via `indicatif`
//! - `with_embeddings` for appending a `vector` column to a table
//! - `WeakLru`, an LRU cache keyed on instance identity that never keeps instances alive
//! - `retry_with_exponential_backoff` for wrapping arbitrary async calls
//!
//! ## Example
//!
//! ```rust,no_run
//! use embedkit::{EmbeddingOptions, FunctionWrapper};
//! use embedkit::table::with_embeddings;
//! use arrow_array::{RecordBatch, StringArray};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> embedkit::Result<()> {
//!     embedkit::telemetry::init_tracing_subscriber();
//!
//!     let embed = |batch: Vec<String>| async move {
//!         let vectors: Vec<Vec<f32>> = batch.iter().map(|s| vec![s.len() as f32, 1.0]).collect();
//!         Ok::<_, embedkit::Error>(vectors)
//!     };
//!
//!     // Embed a slice directly
//!     let pipeline = FunctionWrapper::new(&embed).with_default_retry().batch_size(2).build()?;
//!     let vectors = pipeline.call(&["a".to_string(), "bb".to_string()]).await?;
//!     assert_eq!(vectors[1], vec![2.0, 1.0]);
//!
//!     // Or append a vector column to a table
//!     let batch = RecordBatch::try_from_iter([(
//!         "text",
//!         Arc::new(StringArray::from(vec!["hello", "world"])) as _,
//!     )])?;
//!     let embedded = with_embeddings(&embed, batch, &EmbeddingOptions::default()).await?;
//!     assert_eq!(embedded.num_columns(), 2);
//!     Ok(())
//! }
//! ```

mod error;

pub mod backoff;
pub mod cache;
pub mod config;
pub mod credentials;
pub mod embedding;
pub mod http;
pub mod pipeline;
pub mod table;
pub mod telemetry;

pub use backoff::{ExponentialBackoff, retry_with_exponential_backoff};
pub use cache::WeakLru;
pub use config::PipelineConfig;
pub use credentials::api_key_not_found_help;
pub use embedding::{EmbeddingFunction, Vector};
pub use error::{Error, Result};
pub use http::url_retrieve;
pub use pipeline::{FunctionWrapper, Pipeline};
pub use table::{EmbeddingOptions, Table, with_embeddings};

/// Commonly used types
pub mod prelude {
    pub use crate::embedding::{EmbeddingFunction, Vector};
    pub use crate::error::Error;
    pub use crate::error::Result;
    pub use crate::pipeline::{FunctionWrapper, Pipeline};
    pub use crate::table::{EmbeddingOptions, Table};
}
