//! Kernel density evaluation over a collection.
//!
//! Two strategies: the weighted sum over all contributing kernels (the
//! textbook KDE) and the max over kernels (a robust surrogate that is less
//! sensitive to multi-modal scenes). Both are truncated to the nearest
//! kernels through the k-d tree when `kdtree_density_eval` is set, which is
//! the default; evaluation then requires the tree to have been built.

use crate::error::{Error, Result};
use crate::kernel::Kernel;

use super::KernelCollection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationStrategy {
    /// `max_i wᵢ φ(q; kᵢ)`.
    MaxEval,
    /// `Σ_i wᵢ φ(q; kᵢ)`.
    WeightedSumEval,
}

impl KernelCollection {
    /// Evaluate the collection's density at `at`.
    ///
    /// Returns 0 for an empty collection. Fails on manifold mismatch, and
    /// with a contract error if truncated evaluation is configured but no
    /// k-d tree has been built.
    pub fn evaluation_at(&self, at: &Kernel, strategy: EvaluationStrategy) -> Result<f64> {
        if self.is_empty() {
            return Ok(0.0);
        }
        let manifold = self.manifold().expect("non-empty collection");
        if manifold != at.manifold() {
            return Err(Error::DomainMismatch {
                object: manifold,
                scene: at.manifold(),
            });
        }

        let use_tree = self.config.kdtree_density_eval && at.location().is_some();
        if use_tree {
            let tree = self.tree.as_ref().ok_or(Error::TreeRequired)?;
            let loc = at.location().expect("located manifold");
            let hits = tree.k_nearest(
                &[loc.x, loc.y, loc.z],
                self.config.kde_kth_nearest_neighbor,
            );
            self.accumulate(at, strategy, hits.iter().map(|&(i, _)| i))
        } else {
            self.accumulate(at, strategy, 0..self.len())
        }
    }

    fn accumulate(
        &self,
        at: &Kernel,
        strategy: EvaluationStrategy,
        indices: impl Iterator<Item = usize>,
    ) -> Result<f64> {
        let mut value = 0.0;
        for i in indices {
            let k = self.at(i);
            let contribution = k.weight * k.density_at(at, &self.config)?;
            match strategy {
                EvaluationStrategy::MaxEval => value = f64::max(value, contribution),
                EvaluationStrategy::WeightedSumEval => value += contribution,
            }
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::kernel::Kernel;
    use nalgebra::Vector3;

    fn cloud(kdtree_eval: bool) -> KernelCollection {
        let mut config = Config::default();
        config.kdtree_density_eval = kdtree_eval;
        let mut c = KernelCollection::with_config(config);
        for i in 0..10 {
            c.add(
                Kernel::r3(Vector3::new(i as f64, 0.0, 0.0))
                    .with_weight(0.1)
                    .with_bandwidths(0.5, 0.0),
            )
            .unwrap();
        }
        c
    }

    #[test]
    fn test_empty_collection_evaluates_to_zero() {
        let c = KernelCollection::new();
        let q = Kernel::r3(Vector3::zeros());
        assert_eq!(c.evaluation_at(&q, EvaluationStrategy::MaxEval).unwrap(), 0.0);
        assert_eq!(
            c.evaluation_at(&q, EvaluationStrategy::WeightedSumEval).unwrap(),
            0.0
        );
    }

    #[test]
    fn test_tree_contract_error() {
        let c = cloud(true);
        let q = Kernel::r3(Vector3::zeros());
        assert!(matches!(
            c.evaluation_at(&q, EvaluationStrategy::MaxEval),
            Err(Error::TreeRequired)
        ));
    }

    #[test]
    fn test_max_bounded_by_weighted_sum() {
        let mut c = cloud(true);
        c.build_kd_tree().unwrap();
        let q = Kernel::r3(Vector3::new(3.3, 0.1, 0.0));
        let max = c.evaluation_at(&q, EvaluationStrategy::MaxEval).unwrap();
        let sum = c
            .evaluation_at(&q, EvaluationStrategy::WeightedSumEval)
            .unwrap();
        assert!(max > 0.0);
        assert!(max <= sum);
    }

    #[test]
    fn test_max_eval_bounded_by_peak_density() {
        let mut c = cloud(true);
        c.build_kd_tree().unwrap();
        // The densest possible reply is a kernel evaluated at its own
        // center, times its weight.
        let peak: f64 = c
            .iter()
            .map(|k| k.weight * k.density_at(k, c.config()).unwrap())
            .fold(0.0, f64::max);
        for x in [-1.0, 0.0, 1.7, 4.2, 9.0, 12.0] {
            let q = Kernel::r3(Vector3::new(x, 0.0, 0.0));
            let v = c.evaluation_at(&q, EvaluationStrategy::MaxEval).unwrap();
            assert!(v >= 0.0);
            assert!(v <= peak + 1e-12);
        }
    }

    #[test]
    fn test_brute_force_matches_tree_on_far_query() {
        // With k covering the whole cloud, truncated and exhaustive
        // evaluation agree.
        let mut with_tree = cloud(true);
        with_tree.build_kd_tree().unwrap();
        let brute = cloud(false);
        let q = Kernel::r3(Vector3::new(2.5, 0.3, 0.0));
        let a = with_tree
            .evaluation_at(&q, EvaluationStrategy::MaxEval)
            .unwrap();
        let b = brute.evaluation_at(&q, EvaluationStrategy::MaxEval).unwrap();
        assert!((a - b).abs() < 1e-12);
    }

    #[test]
    fn test_domain_mismatch() {
        let mut c = cloud(true);
        c.build_kd_tree().unwrap();
        let q = Kernel::so3(nalgebra::UnitQuaternion::identity());
        assert!(matches!(
            c.evaluation_at(&q, EvaluationStrategy::MaxEval),
            Err(Error::DomainMismatch { .. })
        ));
    }
}
