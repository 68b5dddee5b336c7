//! K-d tree over kernel locations.
//!
//! Thin wrapper around kiddo's immutable tree, keyed by kernel index.
//! Queries are deterministic under distance ties: results are re-sorted by
//! `(distance, index)` so the lower index always wins.

use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;

/// Bucket size raised from the default to tolerate planar and duplicated
/// point clouds.
const BUCKET_SIZE: usize = 256;

#[derive(Debug)]
pub struct LocationIndex {
    tree: ImmutableKdTree<f64, u64, 3, BUCKET_SIZE>,
}

impl LocationIndex {
    /// Build an index over the given points; entry `i` maps back to kernel
    /// index `i`.
    pub fn build(points: &[[f64; 3]]) -> Self {
        let tree: ImmutableKdTree<f64, u64, 3, BUCKET_SIZE> = points.into();
        Self { tree }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// The `k` nearest kernels to `query`, as `(kernel index, squared
    /// distance)` sorted nearest first.
    pub fn k_nearest(&self, query: &[f64; 3], k: usize) -> Vec<(usize, f64)> {
        let k = match std::num::NonZero::new(k) {
            Some(k) => k,
            None => return Vec::new(),
        };
        let mut out: Vec<(usize, f64)> = self
            .tree
            .nearest_n::<SquaredEuclidean>(query, k)
            .into_iter()
            .map(|nn| (nn.item as usize, nn.distance))
            .collect();
        out.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        out
    }

    /// All kernels within `radius` of `query`, as `(kernel index, squared
    /// distance)` sorted nearest first.
    pub fn nearest_within(&self, query: &[f64; 3], radius: f64) -> Vec<(usize, f64)> {
        let mut out: Vec<(usize, f64)> = self
            .tree
            .within::<SquaredEuclidean>(query, radius * radius)
            .into_iter()
            .map(|nn| (nn.item as usize, nn.distance))
            .collect();
        out.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Vec<[f64; 3]> {
        let mut points = Vec::new();
        for x in 0..4 {
            for y in 0..4 {
                points.push([x as f64, y as f64, 0.0]);
            }
        }
        points
    }

    #[test]
    fn test_k_nearest_returns_k_sorted() {
        let index = LocationIndex::build(&grid());
        let hits = index.k_nearest(&[0.1, 0.1, 0.0], 4);
        assert_eq!(hits.len(), 4);
        assert_eq!(hits[0].0, 0);
        for w in hits.windows(2) {
            assert!(w[0].1 <= w[1].1);
        }
    }

    #[test]
    fn test_range_query() {
        let index = LocationIndex::build(&grid());
        let hits = index.nearest_within(&[0.0, 0.0, 0.0], 1.1);
        // Origin plus its two axis neighbors.
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].0, 0);
    }

    #[test]
    fn test_ties_prefer_lower_index() {
        // Two coincident points: the lower index must come first.
        let points = vec![[1.0, 1.0, 1.0], [1.0, 1.0, 1.0], [5.0, 5.0, 5.0]];
        let index = LocationIndex::build(&points);
        let hits = index.k_nearest(&[1.0, 1.0, 1.0], 2);
        assert_eq!(hits[0].0, 0);
        assert_eq!(hits[1].0, 1);
    }

    #[test]
    fn test_k_larger_than_size() {
        let points = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]];
        let index = LocationIndex::build(&points);
        let hits = index.k_nearest(&[0.0, 0.0, 0.0], 10);
        assert_eq!(hits.len(), 2);
    }
}
