//! Systematic residual resampling.
//!
//! [`SampleIter`] yields exactly `n` kernel indices with frequencies
//! proportional to kernel weight, using a single uniform offset and a fixed
//! stride. The iterator state is explicit (cursor, cumulative weight, next
//! threshold) so cloning it at any point produces an identical
//! continuation.

use super::KernelCollection;

#[derive(Debug, Clone)]
pub struct SampleIter<'a> {
    collection: &'a KernelCollection,
    stride: f64,
    /// Next threshold to cross, in cumulative-weight space.
    threshold: f64,
    remaining: usize,
    cursor: usize,
    /// Cumulative weight up to and including `cursor`.
    cum: f64,
    /// Weight each yielded kernel represents.
    uniform_weight: f64,
}

impl<'a> SampleIter<'a> {
    pub(crate) fn new(
        collection: &'a KernelCollection,
        n: usize,
        total_weight: f64,
        offset: f64,
    ) -> Self {
        let stride = if n > 0 { total_weight / n as f64 } else { 0.0 };
        let first = collection.kernels().first().map(|k| k.weight).unwrap_or(0.0);
        Self {
            collection,
            stride,
            threshold: offset * stride,
            remaining: n,
            cursor: 0,
            cum: first,
            uniform_weight: stride,
        }
    }

    /// The weight each yielded kernel carries in a resampled cloud
    /// (`total_weight / n`).
    pub fn uniform_weight(&self) -> f64 {
        self.uniform_weight
    }
}

impl Iterator for SampleIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        let kernels = self.collection.kernels();
        while self.cum <= self.threshold && self.cursor + 1 < kernels.len() {
            self.cursor += 1;
            self.cum += kernels[self.cursor].weight;
        }
        self.remaining -= 1;
        self.threshold += self.stride;
        Some(self.cursor)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}
