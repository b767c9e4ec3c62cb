//! Lazy fixed-size batching with optional progress reporting

use crate::error::{Error, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::slice::Chunks;

const PROGRESS_TEMPLATE: &str = "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({eta}) {msg}";

/// Number of batches `len` items split into; zero when `batch_size` is zero.
pub fn batch_count(len: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        return 0;
    }
    len.div_ceil(batch_size)
}

/// Iterator over contiguous, non-overlapping batches of a slice.
///
/// The last batch may be shorter than the batch size. When a progress bar is
/// attached it ticks once for every batch the caller has finished with (that is,
/// on the following call to `next`) and finishes when the iterator is exhausted.
pub struct Batcher<'a, T> {
    chunks: Chunks<'a, T>,
    progress: Option<ProgressBar>,
    pending_tick: bool,
}

impl<'a, T> Batcher<'a, T> {
    pub fn new(items: &'a [T], batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }
        Ok(Self {
            chunks: items.chunks(batch_size),
            progress: None,
            pending_tick: false,
        })
    }

    /// Attach a progress bar drawn to stderr.
    pub fn with_progress(self) -> Self {
        let progress_bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::with_template(PROGRESS_TEMPLATE) {
            progress_bar.set_style(style.progress_chars("##-"));
        }
        progress_bar.set_message("Embedding batches...");
        self.with_progress_bar(progress_bar)
    }

    /// Attach a caller-provided progress bar; its length is set to the batch count.
    pub fn with_progress_bar(mut self, progress_bar: ProgressBar) -> Self {
        progress_bar.set_length(self.chunks.len() as u64);
        self.progress = Some(progress_bar);
        self
    }

    pub fn progress_bar(&self) -> Option<&ProgressBar> {
        self.progress.as_ref()
    }
}

impl<'a, T> Iterator for Batcher<'a, T> {
    type Item = &'a [T];

    fn next(&mut self) -> Option<Self::Item> {
        let batch = self.chunks.next();
        if let Some(progress_bar) = &self.progress {
            if self.pending_tick {
                progress_bar.inc(1);
            }
            self.pending_tick = batch.is_some();
            if batch.is_none() && !progress_bar.is_finished() {
                progress_bar.finish_with_message("Embedding completed");
            }
        }
        batch
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

impl<T> ExactSizeIterator for Batcher<'_, T> {}

impl<T> Drop for Batcher<'_, T> {
    fn drop(&mut self) {
        if let Some(progress_bar) = &self.progress {
            if !progress_bar.is_finished() {
                progress_bar.abandon();
            }
        }
    }
}
