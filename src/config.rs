//! Runtime constants, collected into a single immutable [`Config`].
//!
//! Every constant can be overridden through the environment
//! (`KDEPOSE_<NAME>`, e.g. `KDEPOSE_WHITE_NOISE_POWER=1e-3`); overrides are
//! read once by [`Config::from_env`] and logged at debug level. Estimators
//! and collections hold a copy of the configuration instead of consulting
//! process-wide mutable state.

use std::str::FromStr;

use tracing::debug;

/// Hard floor for location bandwidths used in evaluation (coordinate units).
pub const LOC_STDEV_MIN: f64 = 0.1;

/// Hard floor for orientation bandwidths used in evaluation (radians).
pub const ORI_STDEV_MIN: f64 = 0.04;

#[derive(Debug, Clone)]
pub struct Config {
    /// Default rotation spread for orientation kernels.
    pub rotation_stdev: f64,

    /// Default orientation bandwidth assumed for raw observations.
    pub observation_orientation_stdev: f64,

    /// Default location bandwidth assumed for raw observations.
    pub observation_location_stdev: f64,

    /// Constant density floor added to kernel evaluations to keep
    /// log-likelihoods finite on empty regions.
    pub white_noise_power: f64,

    /// Number of nearest kernels considered when a k-d tree truncates a
    /// density evaluation.
    pub kde_kth_nearest_neighbor: usize,

    /// Maximum number of concurrently running chains. `0` means one per
    /// available core.
    pub n_threads: usize,

    /// Enables the nonparametric-BP message passing machinery. Recognized
    /// for compatibility; nothing in this crate consumes it.
    pub mcmc_nbp: bool,

    /// Chain count for nonparametric-BP sampling. Recognized, unused here.
    pub mcmc_nbp_n_chains: usize,

    /// See [`LOC_STDEV_MIN`].
    pub loc_stdev_min: f64,

    /// See [`ORI_STDEV_MIN`].
    pub ori_stdev_min: f64,

    /// When set, kernel evaluations include their normalization constants so
    /// that each kernel integrates to one.
    pub normalize_densities: bool,

    /// When set, density evaluation goes through the k-d tree and fails if
    /// none has been built. When unset, evaluation scans every kernel.
    pub kdtree_density_eval: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rotation_stdev: 0.2,
            observation_orientation_stdev: 0.4,
            observation_location_stdev: 12.0,
            white_noise_power: 1e-4,
            kde_kth_nearest_neighbor: 8,
            n_threads: 0,
            mcmc_nbp: false,
            mcmc_nbp_n_chains: 2,
            loc_stdev_min: LOC_STDEV_MIN,
            ori_stdev_min: ORI_STDEV_MIN,
            normalize_densities: true,
            kdtree_density_eval: true,
        }
    }
}

impl Config {
    /// Build a configuration from defaults, applying any `KDEPOSE_*`
    /// environment overrides.
    pub fn from_env() -> Self {
        let mut c = Self::default();
        read_env("ROTATION_STDEV", &mut c.rotation_stdev);
        read_env(
            "OBSERVATION_ORIENTATION_STDEV",
            &mut c.observation_orientation_stdev,
        );
        read_env(
            "OBSERVATION_LOCATION_STDEV",
            &mut c.observation_location_stdev,
        );
        read_env("WHITE_NOISE_POWER", &mut c.white_noise_power);
        read_env("KDE_KTH_NEAREST_NEIGHBOR", &mut c.kde_kth_nearest_neighbor);
        read_env("N_THREADS", &mut c.n_threads);
        read_env("MCMC_NBP", &mut c.mcmc_nbp);
        read_env("MCMC_NBP_N_CHAINS", &mut c.mcmc_nbp_n_chains);
        read_env("LOC_STDEV_MIN", &mut c.loc_stdev_min);
        read_env("ORI_STDEV_MIN", &mut c.ori_stdev_min);
        read_env("NORMALIZE_DENSITIES", &mut c.normalize_densities);
        read_env("KDTREE_DENSITY_EVAL", &mut c.kdtree_density_eval);
        c
    }
}

fn read_env<T: FromStr + std::fmt::Display>(name: &str, slot: &mut T) {
    let var = format!("KDEPOSE_{name}");
    if let Ok(raw) = std::env::var(&var) {
        match raw.parse::<T>() {
            Ok(value) => {
                debug!("{var}={value} (default: {slot})");
                *slot = value;
            }
            Err(_) => debug!("{var}: could not parse `{raw}`, keeping {slot}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = Config::default();
        assert_eq!(c.white_noise_power, 1e-4);
        assert_eq!(c.kde_kth_nearest_neighbor, 8);
        assert_eq!(c.loc_stdev_min, 0.1);
        assert_eq!(c.ori_stdev_min, 0.04);
        assert!(c.normalize_densities);
        assert!(c.kdtree_density_eval);
        assert_eq!(c.n_threads, 0);
    }
}
