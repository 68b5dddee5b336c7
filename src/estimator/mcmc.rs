//! Annealed Metropolis–Hastings chain.
//!
//! Each chain seeds itself with a fully evaluated independent proposal,
//! then runs `10·n` steps (`40·n` with partial view) of MH with a mixture
//! proposal: with probability 0.75 an independent proposal built from a
//! random model-point/scene-point correspondence, otherwise a local
//! Gaussian/von-Mises–Fisher perturbation of the current pose whose
//! bandwidths anneal linearly over the run. Acceptance is tempered by a
//! geometric cooling schedule and evaluated incrementally with an early
//! abort, so hopeless proposals only pay for a few kernel evaluations.

use nalgebra::Unit;

use crate::collection::EvaluationStrategy;
use crate::error::{Error, Result};
use crate::geometry::SE3;
use crate::rng::RandomStream;

use super::{PoseEstimator, PoseHypothesis};

/// Slack applied to the acceptance threshold during incremental
/// evaluation: a proposal is abandoned once its tempered ratio drops below
/// `EARLY_ABORT_SLACK · u`. Empirical.
pub const EARLY_ABORT_SLACK: f64 = 0.6;

/// Probability of drawing an independent (correspondence) proposal.
const INDEPENDENT_PROPOSAL_PROBABILITY: f64 = 0.75;

/// Proposal attempts per step before the step becomes a no-op.
const PROPOSAL_RETRY_LIMIT: usize = 100;

/// Minimum partial-view size for a pose to be worth evaluating.
const MIN_PARTIAL_VIEW_INDICES: usize = 20;

/// Initial and final temperature of the cooling schedule.
const T0: f64 = 0.5;
const TF: f64 = 0.05;

/// Local-proposal bandwidth endpoints, as fractions of the object size
/// (location) and in radians (orientation).
const ANNEAL_LOC_BEGIN_DIV: f64 = 10.0;
const ANNEAL_LOC_END_DIV: f64 = 40.0;
const ANNEAL_ORI_BEGIN: f64 = 0.1;
const ANNEAL_ORI_END: f64 = 0.02;

/// Cooling factor at step `i` with horizon `f`:
/// `max(T0 · (TF/T0)^(i/f), TF)`. Non-increasing in `i`, clamped at `TF`.
pub fn temperature(i: usize, f: usize) -> f64 {
    let f = f.max(1);
    (T0 * (TF / T0).powf(i as f64 / f as f64)).max(TF)
}

/// One independent MH chain over the pose posterior.
pub(crate) struct Chain<'a> {
    est: &'a PoseEstimator,
    rng: RandomStream,
    n: usize,
}

impl<'a> Chain<'a> {
    pub fn new(est: &'a PoseEstimator, chain_id: u64, n: usize) -> Self {
        Self {
            est,
            rng: RandomStream::for_chain(est.seed, chain_id),
            n,
        }
    }

    pub fn run(mut self) -> Result<PoseHypothesis> {
        let mut current = PoseHypothesis::identity();
        let mut best = current.clone();

        // Seed state: forced accept of one fully evaluated transformation.
        self.step(&mut current, 1.0, true)?;

        let n_steps = 10 * self.n * if self.est.partial_view { 4 } else { 1 };
        let horizon = n_steps / 5;
        let last = (n_steps.saturating_sub(1)).max(1) as f64;

        for i in 0..n_steps {
            if self.est.is_cancelled() {
                break;
            }

            let a = (last - i as f64) / last;
            let b = i as f64 / last;
            current.loc_h = a * self.est.object_size / ANNEAL_LOC_BEGIN_DIV
                + b * self.est.object_size / ANNEAL_LOC_END_DIV;
            current.ori_h = a * ANNEAL_ORI_BEGIN + b * ANNEAL_ORI_END;
            if current.loc_h <= 0.0 {
                return Err(Error::InvalidBandwidth {
                    value: current.loc_h,
                });
            }

            self.step(&mut current, temperature(i, horizon), false)?;

            if current.weight > best.weight {
                best = current.clone();
            }
        }

        Ok(best)
    }

    /// One Metropolis–Hastings step. On `first_run` the proposal is always
    /// independent, fully evaluated and unconditionally accepted.
    fn step(
        &mut self,
        current: &mut PoseHypothesis,
        temperature: f64,
        first_run: bool,
    ) -> Result<()> {
        let est = self.est;
        let object = &est.object;
        let scene = &est.scene;

        let mut indices: Vec<usize> = object.sample_begin(self.n, &mut self.rng)?.collect();
        self.rng.shuffle(&mut indices);

        let independent = first_run || self.rng.uniform() < INDEPENDENT_PROPOSAL_PROBABILITY;

        let mut next = SE3::identity();
        let mut found = false;
        for _ in 0..PROPOSAL_RETRY_LIMIT {
            let candidate = if independent {
                let model_point = object.at(indices[self.rng.uniform_int(indices.len())]);
                let model_frame = model_point.se3_projection()?;
                let scene_frame = scene
                    .at(self.rng.uniform_int(scene.len()))
                    .se3_projection()?;
                let candidate = scene_frame.transformation_from(&model_frame);

                if let Some(cif) = &est.cif {
                    if !cif.test(&candidate) {
                        continue;
                    }
                }
                if est.partial_view {
                    let vp = est.viewpoint_in_frame(&candidate);
                    if !object.is_visible_from(model_point, &vp, est.mesh_tol)? {
                        continue;
                    }
                    if !self.recompute_indices(&mut indices, &candidate)? {
                        continue;
                    }
                }
                candidate
            } else {
                let candidate = current.sample(&mut self.rng);
                if let Some(cif) = &est.cif {
                    if !cif.test(&candidate) {
                        continue;
                    }
                }
                if est.partial_view && !self.recompute_indices(&mut indices, &candidate)? {
                    continue;
                }
                candidate
            };
            next = candidate;
            found = true;
            break;
        }
        if !found {
            // Retry budget exhausted; the step is a no-op.
            return Ok(());
        }

        let threshold = self.rng.uniform();
        let factor = est.cif.as_ref().map(|c| c.factor(&next)).unwrap_or(1.0);
        let white_noise = match est.strategy {
            EvaluationStrategy::WeightedSumEval => {
                est.config.white_noise_power / scene.len() as f64
            }
            EvaluationStrategy::MaxEval => est.config.white_noise_power,
        };

        let count = indices.len();
        let min_consider = (count as f64).sqrt();
        let mut sum = 0.0;

        for (pi, &idx) in indices.iter().enumerate() {
            let transformed = object.at(idx).transformed_with(&next);
            sum += (scene.evaluation_at(&transformed, est.strategy)? + white_noise) * factor;

            let is_last = pi + 1 == count;
            // Visit at least √count points before any decision.
            if !is_last && (pi as f64) < min_consider {
                continue;
            }

            let next_weight = if est.partial_view {
                sum / ((pi + 1) as f64).sqrt()
            } else {
                sum / (pi + 1) as f64
            };

            if first_run {
                if is_last {
                    current.pose = next;
                    current.weight = next_weight;
                }
                continue;
            }

            let mut dec = (next_weight / current.weight).powf(1.0 / temperature);
            if independent {
                // Cancels the proposal asymmetry of the independence
                // sampler.
                dec *= current.weight / next_weight;
            }

            if dec < EARLY_ABORT_SLACK * threshold {
                return Ok(());
            }
            if is_last {
                if dec > threshold {
                    current.pose = next;
                    current.weight = next_weight;
                }
                return Ok(());
            }
        }
        Ok(())
    }

    /// Replace the evaluation indices by the cached partial view for the
    /// direction from the model mean to the viewpoint under `next`.
    /// Rejects poses showing fewer than 20 points.
    fn recompute_indices(&mut self, indices: &mut Vec<usize>, next: &SE3) -> Result<bool> {
        let est = self.est;
        let mean = est.object.mean_location()?;
        let vp = est.viewpoint_in_frame(next);
        let dir = match Unit::try_new(vp - mean, 1e-12) {
            Some(d) => d,
            None => return Ok(false),
        };
        let view = est.object.partial_view_cached(&dir)?;
        if view.len() < MIN_PARTIAL_VIEW_INDICES {
            return Ok(false);
        }
        let mut fresh = view.to_vec();
        self.rng.shuffle(&mut fresh);
        fresh.truncate(self.n);
        *indices = fresh;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temperature_monotone_and_clamped() {
        let f = 400;
        let mut prev = f64::INFINITY;
        for i in 0..2000 {
            let t = temperature(i, f);
            assert!(t <= prev, "temperature increased at step {i}");
            assert!(t >= TF - 1e-15);
            assert!(t <= T0 + 1e-15);
            prev = t;
        }
        assert!((temperature(0, f) - T0).abs() < 1e-12);
        assert!((temperature(10_000, f) - TF).abs() < 1e-12);
    }

    #[test]
    fn test_temperature_zero_horizon() {
        // A degenerate horizon must not divide by zero.
        assert!(temperature(5, 0).is_finite());
    }
}
