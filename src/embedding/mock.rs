//! # Mock Embedding Function for Testing
//!
//! Provides a `MockEmbedding` that implements `EmbeddingFunction` for use in tests.
//! It records every batch it receives and can be told to fail a number of times
//! before succeeding, to exercise the retry layers without a real provider.

use super::{EmbeddingFunction, Vector};
use crate::error::{Error, Result};
use std::future::Future;
use std::sync::Mutex;

/// A mock embedding function for testing purposes.
///
/// Each item is embedded as a constant vector of `dims` values equal to the sum of
/// its bytes, so `"a"` becomes `[97.0; dims]`.
#[derive(Debug)]
pub struct MockEmbedding {
    dims: usize,
    failures_remaining: Mutex<usize>,
    failure: fn() -> Error,
    drop_last: bool,
    batches: Mutex<Vec<Vec<String>>>,
}

impl MockEmbedding {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            failures_remaining: Mutex::new(0),
            failure: || Error::embedding("mock failure"),
            drop_last: false,
            batches: Mutex::new(Vec::new()),
        }
    }

    /// Fail the next `count` calls with a transient embedding error.
    pub fn failing(self, count: usize) -> Self {
        *self.failures_remaining.lock().unwrap() = count;
        self
    }

    /// Use `failure` to build the error returned by failing calls.
    pub fn with_failure(mut self, failure: fn() -> Error) -> Self {
        self.failure = failure;
        self
    }

    /// Return one vector fewer than requested.
    pub fn dropping_last(mut self) -> Self {
        self.drop_last = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn vector_for(&self, item: &str) -> Vector {
        let value: u32 = item.bytes().map(u32::from).sum();
        vec![value as f32; self.dims]
    }

    fn respond<T: AsRef<str>>(&self, batch: Vec<T>) -> Result<Vec<Vector>> {
        let batch: Vec<String> = batch.iter().map(|s| s.as_ref().to_string()).collect();
        self.batches.lock().unwrap().push(batch.clone());

        let mut failures = self.failures_remaining.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err((self.failure)());
        }
        drop(failures);

        let mut vectors: Vec<Vector> = batch.iter().map(|s| self.vector_for(s)).collect();
        if self.drop_last {
            vectors.pop();
        }
        Ok(vectors)
    }
}

impl<T: AsRef<str>> EmbeddingFunction<T> for MockEmbedding {
    fn embed(&self, batch: Vec<T>) -> impl Future<Output = Result<Vec<Vector>>> {
        let result = self.respond(batch);
        async move { result }
    }
}
