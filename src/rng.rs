//! Seeded random streams.
//!
//! All randomness in the crate flows through [`RandomStream`], a thin wrapper
//! over a seeded [`StdRng`]. Chains running in parallel each own a stream
//! derived from the master seed and their chain id, so results are
//! reproducible regardless of thread scheduling.

use nalgebra::{Unit, UnitQuaternion, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};

/// Multiplier used to decorrelate per-chain seeds (Weyl constant).
const STREAM_MULTIPLIER: u64 = 0x9E37_79B9_7F4A_7C15;

/// A reproducible pseudo-random stream with a 64-bit seed.
#[derive(Debug, Clone)]
pub struct RandomStream {
    rng: StdRng,
}

impl RandomStream {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Stream for chain `id`, decorrelated from every other chain of the
    /// same master seed.
    pub fn for_chain(seed: u64, id: u64) -> Self {
        Self::new(seed ^ (id.wrapping_add(1)).wrapping_mul(STREAM_MULTIPLIER))
    }

    /// Uniform draw from `[0, 1)`.
    pub fn uniform(&mut self) -> f64 {
        self.rng.random::<f64>()
    }

    /// Uniform index from `0..n`. `n` must be positive.
    pub fn uniform_int(&mut self, n: usize) -> usize {
        self.rng.random_range(0..n)
    }

    /// Standard normal draw.
    pub fn standard_normal(&mut self) -> f64 {
        StandardNormal.sample(&mut self.rng)
    }

    /// Normal draw with the given mean and standard deviation. A
    /// non-positive `stdev` yields the mean (point mass).
    pub fn normal(&mut self, mean: f64, stdev: f64) -> f64 {
        if stdev <= 0.0 {
            mean
        } else {
            mean + stdev * self.standard_normal()
        }
    }

    /// Fisher–Yates shuffle driven by [`uniform_int`](Self::uniform_int), so
    /// shuffles are reproducible for a given seed.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.uniform_int(i + 1);
            items.swap(i, j);
        }
    }

    /// Uniform draw from the unit sphere.
    pub fn unit_vector(&mut self) -> Unit<Vector3<f64>> {
        loop {
            let v = Vector3::new(
                self.standard_normal(),
                self.standard_normal(),
                self.standard_normal(),
            );
            if let Some(u) = Unit::try_new(v, 1e-12) {
                return u;
            }
        }
    }

    /// Uniform draw from the unit quaternions (Haar measure on SO(3)).
    pub fn unit_quaternion(&mut self) -> UnitQuaternion<f64> {
        loop {
            let q = nalgebra::Quaternion::new(
                self.standard_normal(),
                self.standard_normal(),
                self.standard_normal(),
                self.standard_normal(),
            );
            if q.norm() > 1e-12 {
                return UnitQuaternion::from_quaternion(q);
            }
        }
    }

    pub(crate) fn inner(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}
