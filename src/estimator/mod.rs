//! Pose estimation: aligning an object model to a scene cloud.
//!
//! The [`PoseEstimator`] is the top-level struct users interact with. It
//! owns the two kernel collections, runs a set of annealed
//! Metropolis–Hastings chains in parallel and returns the best pose found,
//! re-scored on the full model.
//!
//! Chains only read the shared state (collections, mesh, k-d tree,
//! partial-view cache), so inference needs no locking; the one mutable
//! cross-thread bit is a cooperative cancellation flag.

pub mod mcmc;
pub mod parallel;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nalgebra::Vector3;
use tracing::{info, warn};

use crate::collection::{EvaluationStrategy, KernelCollection};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::geometry::SE3;
use crate::kernel::{directional, Manifold};
use crate::rng::RandomStream;

/// Exponent applied to the visible-point count when normalizing a
/// partial-view matching score.
pub const PARTIAL_VIEW_SCORE_EXPONENT: f64 = 0.7;

const DEFAULT_N_CHAINS: usize = 8;
const DEFAULT_MESH_TOL: f64 = 4.0;

/// Cap on the number of model points used per inference loop when the
/// caller lets the estimator choose.
const MAX_AUTO_MODEL_POINTS: usize = 1000;

/// Scene size above which `light` loading subsamples the cloud.
const LIGHT_SCENE_LIMIT: usize = 10_000;

/// Caller-supplied multiplicative prior over poses.
///
/// Estimators hold the factor behind a shared handle, so one instance can
/// serve several estimators concurrently; implementations must not mutate
/// through `&self`.
pub trait CustomIntegrandFactor: Send + Sync {
    /// Multiplicative weight on the posterior.
    fn factor(&self, _pose: &SE3) -> f64 {
        1.0
    }

    /// Hard plausibility test; poses failing it are never proposed and
    /// score zero.
    fn test(&self, _pose: &SE3) -> bool {
        true
    }
}

/// A pose with its matching weight and the bandwidths attached to it
/// (proposal bandwidths during inference, success tolerances on a
/// ground-truth pose).
#[derive(Debug, Clone)]
pub struct PoseHypothesis {
    pub pose: SE3,
    pub weight: f64,
    pub loc_h: f64,
    pub ori_h: f64,
}

impl PoseHypothesis {
    pub fn new(pose: SE3) -> Self {
        Self {
            pose,
            weight: 0.0,
            loc_h: 0.0,
            ori_h: 0.0,
        }
    }

    pub fn identity() -> Self {
        Self::new(SE3::identity())
    }

    /// Local proposal: Gaussian in R³ with stdev `loc_h`, von Mises–Fisher
    /// on SO(3) with concentration derived from `ori_h`.
    pub(crate) fn sample(&self, rng: &mut RandomStream) -> SE3 {
        let kappa = directional::concentration(self.ori_h.max(1e-12));
        let t = &self.pose.translation;
        SE3::from_parts(
            directional::sample_vmf_s3(rng, &self.pose.rotation, kappa),
            Vector3::new(
                rng.normal(t.x, self.loc_h),
                rng.normal(t.y, self.loc_h),
                rng.normal(t.z, self.loc_h),
            ),
        )
    }
}

pub struct PoseEstimator {
    config: Config,
    strategy: EvaluationStrategy,
    loc_h: f64,
    ori_h: f64,
    n_chains: usize,
    /// Model points per chain iteration; 0 lets `load` pick.
    n: usize,
    cif: Option<Arc<dyn CustomIntegrandFactor>>,
    partial_view: bool,
    mesh_tol: f64,
    seed: u64,
    cancel: Arc<AtomicBool>,

    object: KernelCollection,
    scene: KernelCollection,
    object_size: f64,
    viewpoint: Vector3<f64>,
    loaded: bool,
}

impl PoseEstimator {
    /// Create an estimator.
    ///
    /// `loc_h ≤ 0` defers the location bandwidth to `load` (a tenth of the
    /// object size). `n_chains = 0` selects the default of 8 chains.
    /// `n = 0` lets `load` clamp the per-iteration model point count.
    pub fn new(
        config: &Config,
        loc_h: f64,
        ori_h: f64,
        n_chains: usize,
        n: usize,
        cif: Option<Arc<dyn CustomIntegrandFactor>>,
        partial_view: bool,
    ) -> Self {
        Self {
            config: config.clone(),
            strategy: EvaluationStrategy::MaxEval,
            loc_h,
            ori_h,
            n_chains: if n_chains == 0 {
                DEFAULT_N_CHAINS
            } else {
                n_chains
            },
            n,
            cif,
            partial_view,
            mesh_tol: DEFAULT_MESH_TOL,
            seed: 0,
            cancel: Arc::new(AtomicBool::new(false)),
            object: KernelCollection::with_config(config.clone()),
            scene: KernelCollection::with_config(config.clone()),
            object_size: 0.0,
            viewpoint: Vector3::zeros(),
            loaded: false,
        }
    }

    /// Master seed for the chain random streams.
    pub fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
    }

    /// Distance to the mesh at which a point still counts as visible.
    pub fn set_mesh_tol(&mut self, tol: f64) {
        self.mesh_tol = tol;
    }

    pub fn set_evaluation_strategy(&mut self, strategy: EvaluationStrategy) {
        self.strategy = strategy;
    }

    pub fn set_custom_integrand_factor(&mut self, cif: Option<Arc<dyn CustomIntegrandFactor>>) {
        self.cif = cif;
    }

    pub fn custom_integrand_factor(&self) -> Option<&Arc<dyn CustomIntegrandFactor>> {
        self.cif.as_ref()
    }

    /// Cooperative cancellation flag, polled once per chain iteration.
    /// Cancelled chains return their best pose so far.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn object_model(&self) -> &KernelCollection {
        &self.object
    }

    pub fn scene_model(&self) -> &KernelCollection {
        &self.scene
    }

    /// Positional spread of the object model, set by `load`.
    pub fn object_size(&self) -> f64 {
        self.object_size
    }

    pub fn loc_h(&self) -> f64 {
        self.loc_h
    }

    pub fn ori_h(&self) -> f64 {
        self.ori_h
    }

    fn require_loaded(&self) -> Result<()> {
        if self.loaded {
            Ok(())
        } else {
            Err(Error::EmptyInputCloud)
        }
    }

    /// Load the object and scene clouds and build every structure inference
    /// needs: normals (optional), statistics, the scene k-d tree, and in
    /// partial-view mode the object mesh and view cache.
    ///
    /// With `light`, scenes larger than 10000 kernels are subsampled to
    /// 10000 by weighted systematic sampling.
    pub fn load(
        &mut self,
        object: KernelCollection,
        scene: KernelCollection,
        mesh_file: Option<&Path>,
        viewpoint: Option<Vector3<f64>>,
        light: bool,
        compute_normals: bool,
    ) -> Result<()> {
        let mut object = object;
        let mut scene = scene;

        if object.is_empty() || scene.is_empty() {
            return Err(Error::EmptyInputCloud);
        }

        self.viewpoint = if self.partial_view {
            viewpoint.ok_or(Error::MissingViewpoint)?
        } else {
            viewpoint.unwrap_or_else(Vector3::zeros)
        };

        if compute_normals {
            for cloud in [&mut object, &mut scene] {
                if cloud.manifold() == Some(Manifold::R3) {
                    cloud.build_kd_tree()?;
                    cloud.compute_surface_normals()?;
                }
            }
        }

        let object_manifold = object.manifold().ok_or(Error::EmptyInputCloud)?;
        let scene_manifold = scene.manifold().ok_or(Error::EmptyInputCloud)?;
        if object_manifold != scene_manifold {
            return Err(Error::DomainMismatch {
                object: object_manifold,
                scene: scene_manifold,
            });
        }

        if self.config.normalize_densities {
            object.normalize_weights()?;
            scene.normalize_weights()?;
        }

        if light && scene.len() > LIGHT_SCENE_LIMIT {
            info!(
                from = scene.len(),
                to = LIGHT_SCENE_LIMIT,
                "subsampling scene cloud"
            );
            scene.compute_kernel_statistics()?;
            let mut rng = RandomStream::new(self.seed);
            let iter = scene.sample_begin(LIGHT_SCENE_LIMIT, &mut rng)?;
            let weight = iter.uniform_weight();
            let indices: Vec<usize> = iter.collect();
            let mut subsampled = KernelCollection::with_config(self.config.clone());
            for i in indices {
                subsampled.add(scene.at(i).clone().with_weight(weight))?;
            }
            scene = subsampled;
        }

        object.compute_kernel_statistics()?;
        self.object_size = object.moments()?.loc_h;
        if self.loc_h <= 0.0 {
            self.loc_h = self.object_size / 10.0;
        }

        object.set_kernel_loc_h(self.loc_h);
        object.set_kernel_ori_h(self.ori_h);
        scene.set_kernel_loc_h(self.loc_h);
        scene.set_kernel_ori_h(self.ori_h);

        scene.compute_kernel_statistics()?;
        scene.build_kd_tree()?;

        if self.partial_view {
            match mesh_file {
                Some(path) => object.read_mesh_from_off(path)?,
                None => object.build_mesh()?,
            }
            let use_normals = object.manifold() == Some(Manifold::R3xS2P);
            object.build_partial_view_cache(self.mesh_tol, use_normals)?;
        }

        self.object = object;
        self.scene = scene;
        self.loaded = true;
        Ok(())
    }

    /// The viewpoint expressed in the object frame of a candidate pose.
    pub(crate) fn viewpoint_in_frame(&self, frame: &SE3) -> Vector3<f64> {
        frame.inverse().transform_point(&self.viewpoint)
    }

    fn effective_model_points(&self) -> usize {
        if self.n > 0 {
            return self.n;
        }
        let n = self.object.len();
        if n > MAX_AUTO_MODEL_POINTS {
            warn!(
                "object model has {n} points; only {MAX_AUTO_MODEL_POINTS} will be used \
                 at each inference loop"
            );
            MAX_AUTO_MODEL_POINTS
        } else {
            n
        }
    }

    /// Run the chains and return the best pose, re-scored with
    /// [`find_matching_score`](Self::find_matching_score).
    ///
    /// With a ground-truth hypothesis, prints each chain's matching score,
    /// distance to ground truth and success (within the ground truth's
    /// `loc_h`/`ori_h` tolerances) to stdout, followed by the success
    /// count.
    pub fn model_to_scene_transformation(
        &self,
        ground_truth: Option<&PoseHypothesis>,
    ) -> Result<PoseHypothesis> {
        self.require_loaded()?;
        let n = self.effective_model_points();

        let results = parallel::run_chains(self.n_chains, self.config.n_threads, |chain_id| {
            mcmc::Chain::new(self, chain_id as u64, n).run()
        });
        let mut hypotheses = Vec::with_capacity(results.len());
        for r in results {
            hypotheses.push(r?);
        }

        if let Some(gt) = ground_truth {
            let mut sorted: Vec<&PoseHypothesis> = hypotheses.iter().collect();
            sorted.sort_by(|a, b| {
                b.weight
                    .partial_cmp(&a.weight)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let mut successes = 0;
            for h in &sorted {
                let (d_loc, d_ori) = h.pose.distance_to(&gt.pose);
                let success = d_loc < gt.loc_h && d_ori < gt.ori_h;
                if success {
                    successes += 1;
                }
                println!(
                    "Matching score: {}, distance to GT: {} {}, {}",
                    h.weight,
                    d_loc,
                    d_ori,
                    if success { "success" } else { "failure" }
                );
            }
            println!(
                "Number of successful chains: {successes} out of {}.",
                sorted.len()
            );
        }

        // Highest weight wins; ties keep the lowest chain id.
        let mut best: Option<PoseHypothesis> = None;
        for h in hypotheses {
            let better = match &best {
                None => true,
                Some(b) => h.weight > b.weight,
            };
            if better {
                best = Some(h);
            }
        }
        let mut best = best.ok_or(Error::EmptyInputCloud)?;
        best.weight = self.find_matching_score(&best.pose)?;
        Ok(best)
    }

    /// Matching score of a pose on the full model.
    ///
    /// Non-partial: mean scene density over all transformed object points.
    /// Partial-view: density summed over the visible points only, divided
    /// by `visible_count^0.7`; zero if the integrand factor rejects the
    /// pose or nothing is visible.
    pub fn find_matching_score(&self, pose: &SE3) -> Result<f64> {
        self.require_loaded()?;
        let factor = self.cif.as_ref().map(|c| c.factor(pose)).unwrap_or(1.0);

        if !self.partial_view {
            let mut w1 = 0.0;
            for k in self.object.iter() {
                w1 += self
                    .scene
                    .evaluation_at(&k.transformed_with(pose), self.strategy)?;
            }
            return Ok(w1 / self.object.len() as f64 * factor);
        }

        if let Some(cif) = &self.cif {
            if !cif.test(pose) {
                return Ok(0.0);
            }
        }
        let vp = self.viewpoint_in_frame(pose);
        let use_normals = self.object.manifold() == Some(Manifold::R3xS2P);
        let visible = self.object.partial_view(&vp, self.mesh_tol, use_normals)?;
        if visible.is_empty() {
            return Ok(0.0);
        }
        let mut sum = 0.0;
        for &i in &visible {
            sum += self
                .scene
                .evaluation_at(&self.object.at(i).transformed_with(pose), self.strategy)?;
        }
        Ok(sum / (visible.len() as f64).powf(PARTIAL_VIEW_SCORE_EXPONENT) * factor)
    }

    /// Two-direction variant of the matching score: geometric mean of the
    /// object-into-scene and scene-into-object mean densities. Falls back
    /// to [`find_matching_score`](Self::find_matching_score) in
    /// partial-view mode.
    pub fn find_matching_score_symmetric(&self, pose: &SE3) -> Result<f64> {
        self.require_loaded()?;
        if self.partial_view {
            return self.find_matching_score(pose);
        }
        let factor = self.cif.as_ref().map(|c| c.factor(pose)).unwrap_or(1.0);

        let mut w1 = 0.0;
        for k in self.object.iter() {
            w1 += self
                .scene
                .evaluation_at(&k.transformed_with(pose), self.strategy)?;
        }

        let mut transformed = self.object.clone();
        transformed.transform_with(pose);
        transformed.compute_kernel_statistics()?;
        transformed.build_kd_tree()?;
        let mut w2 = 0.0;
        for k in self.scene.iter() {
            w2 += transformed.evaluation_at(k, self.strategy)?;
        }

        let n = self.object.len() as f64;
        Ok(((w1 / n) * (w2 / n)).sqrt() * factor)
    }

    /// The object model transformed by `pose`. In partial-view mode the
    /// points visible from the viewpoint are tagged blue.
    pub fn aligned_model(&self, pose: &SE3) -> Result<KernelCollection> {
        self.require_loaded()?;
        let vp = self.viewpoint_in_frame(pose);
        let mut out = KernelCollection::with_config(self.config.clone());
        for k in self.object.iter() {
            let mut k = k.clone();
            if self.partial_view && self.object.is_visible_from(&k, &vp, self.mesh_tol)? {
                k.color = Some([0.0, 0.0, 1.0]);
            }
            out.add(k)?;
        }
        out.transform_with(pose);
        Ok(out)
    }

    /// Write the aligned model to `path` in the crate's record format.
    pub fn write_aligned_model(&self, path: &Path, pose: &SE3) -> Result<()> {
        let model = self.aligned_model(pose)?;
        crate::io::write_collection(path, &model)
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}
