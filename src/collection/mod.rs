//! Weighted kernel collections: the point-cloud container of the estimator.
//!
//! A [`KernelCollection`] is an ordered sequence of kernels on a single
//! manifold, plus lazily built accelerating structures: summary statistics,
//! a k-d tree over kernel locations, an optional triangle mesh and an
//! optional partial-view cache. Mutating the kernel set invalidates every
//! cache; the accessors return a contract error until the corresponding
//! `compute_*`/`build_*` call is repeated.

pub mod evaluate;
pub mod sample;
pub mod spatial;

use nalgebra::{Matrix3, Matrix4, Unit, Vector3};
use tracing::warn;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::geometry::{linalg, so3, SE3};
use crate::kernel::{Kernel, Manifold};
use crate::mesh::visibility::PartialViewCache;
use crate::mesh::TriangleMesh;
use crate::rng::RandomStream;

pub use evaluate::EvaluationStrategy;
pub use sample::SampleIter;
pub use spatial::LocationIndex;

/// Neighborhood size for surface-normal estimation.
const NORMAL_NEIGHBORHOOD: usize = 16;

/// Cached collection summary.
#[derive(Debug, Clone)]
pub struct Statistics {
    pub total_weight: f64,
    /// A single kernel summarizing the collection: mean point, positional
    /// spread in `loc_h`, angular spread in `ori_h`, total weight.
    pub moments: Kernel,
}

#[derive(Debug, Default)]
pub struct KernelCollection {
    kernels: Vec<Kernel>,
    config: Config,
    pub(crate) stats: Option<Statistics>,
    pub(crate) tree: Option<LocationIndex>,
    pub(crate) mesh: Option<TriangleMesh>,
    pub(crate) view_cache: Option<PartialViewCache>,
}

impl Clone for KernelCollection {
    /// Clones kernels, configuration, statistics, mesh and view cache. The
    /// k-d tree is not clonable; the clone starts without one.
    fn clone(&self) -> Self {
        Self {
            kernels: self.kernels.clone(),
            config: self.config.clone(),
            stats: self.stats.clone(),
            tree: None,
            mesh: self.mesh.clone(),
            view_cache: self.view_cache.clone(),
        }
    }
}

impl KernelCollection {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            kernels: Vec::new(),
            config,
            stats: None,
            tree: None,
            mesh: None,
            view_cache: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    pub fn at(&self, index: usize) -> &Kernel {
        &self.kernels[index]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Kernel> {
        self.kernels.iter()
    }

    pub(crate) fn kernels(&self) -> &[Kernel] {
        &self.kernels
    }

    /// Manifold of the collection, fixed by its first kernel.
    pub fn manifold(&self) -> Option<Manifold> {
        self.kernels.first().map(Kernel::manifold)
    }

    fn invalidate(&mut self) {
        self.stats = None;
        self.tree = None;
        self.view_cache = None;
    }

    /// Append a kernel. All kernels of a collection must live on the same
    /// manifold. Invalidates statistics and indices.
    pub fn add(&mut self, kernel: Kernel) -> Result<()> {
        if let Some(m) = self.manifold() {
            if m != kernel.manifold() {
                return Err(Error::DomainMismatch {
                    object: m,
                    scene: kernel.manifold(),
                });
            }
        }
        self.kernels.push(kernel);
        self.invalidate();
        Ok(())
    }

    /// Set the positional bandwidth of every kernel.
    pub fn set_kernel_loc_h(&mut self, loc_h: f64) {
        for k in &mut self.kernels {
            k.loc_h = loc_h;
        }
    }

    /// Set the angular bandwidth of every kernel.
    pub fn set_kernel_ori_h(&mut self, ori_h: f64) {
        for k in &mut self.kernels {
            k.ori_h = ori_h;
        }
    }

    /// Divide every weight by the total. Fails if the total is not positive.
    pub fn normalize_weights(&mut self) -> Result<()> {
        let total: f64 = self.kernels.iter().map(|k| k.weight).sum();
        if total <= 0.0 {
            return Err(Error::NonPositiveWeight { total });
        }
        for k in &mut self.kernels {
            k.weight /= total;
        }
        self.invalidate();
        Ok(())
    }

    /// Rigidly transform every kernel (and the attached mesh, if any).
    pub fn transform_with(&mut self, t: &SE3) {
        for k in &mut self.kernels {
            *k = k.transformed_with(t);
        }
        if let Some(mesh) = &mut self.mesh {
            mesh.transform_with(t);
        }
        self.invalidate();
    }

    // ────────────────────────────────────────────────────────────────────
    // Statistics
    // ────────────────────────────────────────────────────────────────────

    /// Compute the total weight and the moments kernel (mean point,
    /// positional and angular spread).
    pub fn compute_kernel_statistics(&mut self) -> Result<()> {
        if self.kernels.is_empty() {
            return Err(Error::EmptyInputCloud);
        }
        let total: f64 = self.kernels.iter().map(|k| k.weight).sum();
        if total <= 0.0 {
            return Err(Error::NonPositiveWeight { total });
        }

        let manifold = self.manifold().expect("non-empty collection");

        let mean_loc = self.weighted_mean_location(total);
        let loc_spread = mean_loc
            .map(|mu| {
                let var: f64 = self
                    .kernels
                    .iter()
                    .map(|k| k.weight * (k.location().expect("located manifold") - mu).norm_squared())
                    .sum::<f64>()
                    / total;
                var.sqrt()
            })
            .unwrap_or(0.0);

        let moments = match manifold {
            Manifold::R3 => Kernel::r3(mean_loc.expect("located manifold")),
            Manifold::R3xS2 | Manifold::R3xS2P => {
                let projective = manifold == Manifold::R3xS2P;
                let (dir, spread) = self.mean_direction(total, projective)?;
                let loc = mean_loc.expect("located manifold");
                let mut k = if projective {
                    Kernel::r3xs2p(loc, dir)
                } else {
                    Kernel::r3xs2(loc, dir)
                };
                k.ori_h = spread;
                k
            }
            Manifold::Se3 => {
                let (q, spread) = self.mean_orientation(total)?;
                let mut k = Kernel::se3(SE3::from_parts(q, mean_loc.expect("located manifold")));
                k.ori_h = spread;
                k
            }
            Manifold::So3 => {
                let (q, spread) = self.mean_orientation(total)?;
                let mut k = Kernel::so3(q);
                k.ori_h = spread;
                k
            }
        };

        let mut moments = moments.with_weight(total);
        moments.loc_h = loc_spread;

        self.stats = Some(Statistics {
            total_weight: total,
            moments,
        });
        Ok(())
    }

    fn weighted_mean_location(&self, total: f64) -> Option<Vector3<f64>> {
        let mut acc = Vector3::zeros();
        for k in &self.kernels {
            acc += k.weight * k.location()?;
        }
        Some(acc / total)
    }

    /// Weighted mean direction and RMS angular deviation. The projective
    /// mean is the dominant eigenvector of the weighted outer-product
    /// matrix, which is invariant to per-direction sign flips.
    fn mean_direction(&self, total: f64, projective: bool) -> Result<(Unit<Vector3<f64>>, f64)> {
        let dir_of = |k: &Kernel| k.direction().expect("directional manifold");

        let mean = if projective {
            let mut m = Matrix3::zeros();
            for k in &self.kernels {
                let d = dir_of(k).into_inner();
                m += k.weight * d * d.transpose();
            }
            let (vectors, _) = linalg::eigen_symmetric3(&(m / total));
            Unit::new_normalize(vectors.column(0).into_owned())
        } else {
            let mut acc = Vector3::zeros();
            for k in &self.kernels {
                acc += k.weight * dir_of(k).into_inner();
            }
            Unit::try_new(acc, 1e-12).ok_or(Error::DegenerateNeighborhood { index: 0 })?
        };

        let var: f64 = self
            .kernels
            .iter()
            .map(|k| {
                let a = so3::direction_angle(&dir_of(k), &mean, projective);
                k.weight * a * a
            })
            .sum::<f64>()
            / total;
        Ok((mean, var.sqrt()))
    }

    /// Weighted mean quaternion (dominant eigenvector of `Σ wᵢ qᵢqᵢᵀ`) and
    /// RMS geodesic deviation.
    fn mean_orientation(&self, total: f64) -> Result<(nalgebra::UnitQuaternion<f64>, f64)> {
        let mut m = Matrix4::zeros();
        for k in &self.kernels {
            let q = k.orientation().expect("oriented manifold").coords;
            m += k.weight * q * q.transpose();
        }
        let eig = nalgebra::SymmetricEigen::new(m / total);
        let mut best = 0;
        for i in 1..4 {
            if eig.eigenvalues[i] > eig.eigenvalues[best] {
                best = i;
            }
        }
        let v = eig.eigenvectors.column(best).into_owned();
        let mean = so3::canonical(&nalgebra::UnitQuaternion::from_quaternion(
            nalgebra::Quaternion::from_vector(v),
        ));

        let var: f64 = self
            .kernels
            .iter()
            .map(|k| {
                let a = so3::geodesic_distance(&k.orientation().expect("oriented manifold"), &mean);
                k.weight * a * a
            })
            .sum::<f64>()
            / total;
        Ok((mean, var.sqrt()))
    }

    pub fn statistics(&self) -> Result<&Statistics> {
        self.stats.as_ref().ok_or(Error::StatisticsRequired)
    }

    /// The moments kernel: mean point, `loc_h` = positional spread,
    /// `ori_h` = angular spread, weight = total weight.
    pub fn moments(&self) -> Result<&Kernel> {
        Ok(&self.statistics()?.moments)
    }

    pub fn total_weight(&self) -> Result<f64> {
        Ok(self.statistics()?.total_weight)
    }

    /// Weighted mean location; an invariant error on manifolds without one.
    pub fn mean_location(&self) -> Result<Vector3<f64>> {
        self.moments()?
            .location()
            .ok_or(Error::UnsupportedKernelOp {
                op: "mean_location",
                manifold: Manifold::So3,
            })
    }

    // ────────────────────────────────────────────────────────────────────
    // Spatial index
    // ────────────────────────────────────────────────────────────────────

    /// Build the k-d tree over kernel locations.
    pub fn build_kd_tree(&mut self) -> Result<()> {
        if self.kernels.is_empty() {
            return Err(Error::EmptyInputCloud);
        }
        let mut points = Vec::with_capacity(self.kernels.len());
        for k in &self.kernels {
            let loc = k.location().ok_or(Error::UnsupportedKernelOp {
                op: "build_kd_tree",
                manifold: Manifold::So3,
            })?;
            points.push([loc.x, loc.y, loc.z]);
        }
        self.tree = Some(LocationIndex::build(&points));
        Ok(())
    }

    pub fn kd_tree(&self) -> Result<&LocationIndex> {
        self.tree.as_ref().ok_or(Error::TreeRequired)
    }

    // ────────────────────────────────────────────────────────────────────
    // Sampling
    // ────────────────────────────────────────────────────────────────────

    /// Systematic residual resampling of `n` kernel indices, proportional to
    /// weight. Requires statistics. The iterator is clonable; a clone
    /// continues identically.
    pub fn sample_begin(&self, n: usize, rng: &mut RandomStream) -> Result<SampleIter<'_>> {
        let total = self.total_weight()?;
        Ok(SampleIter::new(self, n, total, rng.uniform()))
    }

    // ────────────────────────────────────────────────────────────────────
    // Surface normals
    // ────────────────────────────────────────────────────────────────────

    /// Estimate a surface normal per kernel from the principal directions of
    /// its neighborhood and convert the collection from r3 to r3xs2p.
    ///
    /// Points with degenerate neighborhoods are dropped and counted; the
    /// skip count is returned and logged. Requires the k-d tree.
    pub fn compute_surface_normals(&mut self) -> Result<usize> {
        match self.manifold() {
            Some(Manifold::R3) => {}
            Some(m) => {
                return Err(Error::UnsupportedKernelOp {
                    op: "compute_surface_normals",
                    manifold: m,
                })
            }
            None => return Err(Error::EmptyInputCloud),
        }
        let tree = self.tree.as_ref().ok_or(Error::TreeRequired)?;

        let k_neighbors = NORMAL_NEIGHBORHOOD.min(self.kernels.len());
        let mut converted = Vec::with_capacity(self.kernels.len());
        let mut skipped = 0usize;

        for kernel in &self.kernels {
            let loc = kernel.location().expect("r3 manifold");
            let neighbors = tree.k_nearest(&[loc.x, loc.y, loc.z], k_neighbors);
            if neighbors.len() < 3 {
                skipped += 1;
                continue;
            }

            let mut mu = Vector3::zeros();
            for &(idx, _) in &neighbors {
                mu += self.kernels[idx].location().expect("r3 manifold");
            }
            mu /= neighbors.len() as f64;

            let mut cov = Matrix3::zeros();
            for &(idx, _) in &neighbors {
                let d = self.kernels[idx].location().expect("r3 manifold") - mu;
                cov += d * d.transpose();
            }
            cov /= neighbors.len() as f64;

            let (vectors, values) = linalg::eigen_symmetric3(&cov);
            if values[0].abs() < 1e-18 {
                // All neighbors coincide; no surface direction.
                skipped += 1;
                continue;
            }

            let mut normal = vectors.column(2).into_owned();
            // Orient away from the local centroid so closed shapes get
            // outward normals.
            if normal.dot(&(loc - mu)) < 0.0 {
                normal = -normal;
            }

            let mut out = Kernel::r3xs2p(loc, Unit::new_normalize(normal));
            out.weight = kernel.weight;
            out.loc_h = kernel.loc_h;
            out.ori_h = kernel.ori_h;
            out.color = kernel.color;
            converted.push(out);
        }

        if converted.is_empty() {
            return Err(Error::EmptyInputCloud);
        }
        if skipped > 0 {
            warn!(
                skipped,
                kept = converted.len(),
                "surface normal estimation skipped degenerate points"
            );
        }

        self.kernels = converted;
        self.invalidate();
        self.tree = None;
        Ok(skipped)
    }

    // ────────────────────────────────────────────────────────────────────
    // Mesh attachment
    // ────────────────────────────────────────────────────────────────────

    pub fn attach_mesh(&mut self, mesh: TriangleMesh) {
        self.view_cache = None;
        self.mesh = Some(mesh);
    }

    pub fn mesh(&self) -> Result<&TriangleMesh> {
        self.mesh.as_ref().ok_or(Error::MeshRequired)
    }

    /// Read and attach a mesh from an OFF file.
    pub fn read_mesh_from_off(&mut self, path: &std::path::Path) -> Result<()> {
        let mesh = TriangleMesh::from_off_file(path)?;
        self.attach_mesh(mesh);
        Ok(())
    }

    /// Approximate and attach a closed surface around the kernel locations.
    pub fn build_mesh(&mut self) -> Result<()> {
        let mut points = Vec::with_capacity(self.kernels.len());
        for k in &self.kernels {
            points.push(k.location().ok_or(Error::UnsupportedKernelOp {
                op: "build_mesh",
                manifold: Manifold::So3,
            })?);
        }
        let mesh = crate::mesh::hull::approximate_hull(&points)?;
        self.attach_mesh(mesh);
        Ok(())
    }
}
