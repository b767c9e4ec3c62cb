//! # Embedding Function Contract
//!
//! An embedding function takes a batch of items and returns one vector per item, in
//! the same order. Anything implementing [`EmbeddingFunction`] can be wrapped by a
//! [`FunctionWrapper`](crate::pipeline::FunctionWrapper); async closures of the shape
//! `Fn(Vec<T>) -> impl Future<Output = Result<Vec<Vector>>>` implement it already.

use crate::error::Result;
use std::future::Future;

#[cfg(test)]
pub(crate) mod mock;

/// A single embedding vector
pub type Vector = Vec<f32>;

/// A function turning a batch of items into one vector per item.
///
/// Implementations must be length-preserving: the returned list has exactly as many
/// vectors as `batch` has items. The pipeline checks this after every call.
pub trait EmbeddingFunction<T> {
    fn embed(&self, batch: Vec<T>) -> impl Future<Output = Result<Vec<Vector>>>;
}

impl<T, F, Fut> EmbeddingFunction<T> for F
where
    F: Fn(Vec<T>) -> Fut,
    Fut: Future<Output = Result<Vec<Vector>>>,
{
    fn embed(&self, batch: Vec<T>) -> impl Future<Output = Result<Vec<Vector>>> {
        self(batch)
    }
}

/// Dimension shared by every vector, or `None` if the vectors are ragged.
///
/// An empty slice has dimension 0.
pub fn common_dimension(vectors: &[Vector]) -> Option<usize> {
    let dims = vectors.first().map_or(0, Vec::len);
    vectors.iter().all(|v| v.len() == dims).then_some(dims)
}
