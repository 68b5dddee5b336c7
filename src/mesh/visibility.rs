//! Partial-view computation: which kernels of a collection are visible
//! from a viewpoint.
//!
//! A point is visible when the segment from the viewpoint to the point does
//! not cross the attached mesh farther than `tol` from the point. For
//! unsigned-normal kernels (r3xs2p) an extra check requires the normal to
//! face the viewpoint.
//!
//! [`PartialViewCache`] precomputes views for a fixed set of direction bins
//! (the 80 face centroids of a once-subdivided icosahedron) stored in a
//! flat array; lookup picks the bin with the largest dot product, so no
//! floating-point keys are involved.

use nalgebra::{Unit, Vector3};

use crate::collection::KernelCollection;
use crate::error::{Error, Result};
use crate::kernel::{Kernel, Manifold};

use super::icosphere_directions;

/// Icosphere refinement of the cache bins (1 → 80 directions).
const CACHE_SUBDIVISIONS: usize = 1;

/// Distance of the synthetic cache viewpoints from the cloud mean, in units
/// of the cloud's positional spread.
const FAR_VIEW_FACTOR: f64 = 100.0;

#[derive(Debug, Clone)]
pub struct PartialViewCache {
    directions: Vec<Unit<Vector3<f64>>>,
    views: Vec<Vec<usize>>,
    tol: f64,
    use_normals: bool,
}

impl PartialViewCache {
    pub fn tol(&self) -> f64 {
        self.tol
    }

    pub fn use_normals(&self) -> bool {
        self.use_normals
    }

    /// Bin index for a query direction: largest dot product, ties keep the
    /// lower bin.
    fn bin(&self, dir: &Unit<Vector3<f64>>) -> usize {
        let mut best = 0;
        let mut best_dot = f64::MIN;
        for (i, d) in self.directions.iter().enumerate() {
            let dot = d.dot(dir);
            if dot > best_dot {
                best_dot = dot;
                best = i;
            }
        }
        best
    }
}

impl KernelCollection {
    fn kernel_visible(
        &self,
        kernel: &Kernel,
        viewpoint: &Vector3<f64>,
        tol: f64,
        use_normals: bool,
    ) -> Result<bool> {
        let mesh = self.mesh()?;
        let loc = kernel.location().ok_or(Error::UnsupportedKernelOp {
            op: "is_visible_from",
            manifold: Manifold::So3,
        })?;
        if use_normals && kernel.manifold() == Manifold::R3xS2P {
            let normal = kernel.direction().expect("r3xs2p kernel");
            if normal.dot(&(viewpoint - loc)) <= 0.0 {
                return Ok(false);
            }
        }
        Ok(!mesh.segment_occluded(viewpoint, &loc, tol))
    }

    /// Whether `kernel` can be seen from `viewpoint`. r3xs2p kernels must
    /// additionally face the viewpoint.
    pub fn is_visible_from(
        &self,
        kernel: &Kernel,
        viewpoint: &Vector3<f64>,
        tol: f64,
    ) -> Result<bool> {
        self.kernel_visible(kernel, viewpoint, tol, true)
    }

    /// Indices of all kernels visible from `viewpoint`. `use_normals`
    /// enables the normal-facing test on r3xs2p kernels.
    pub fn partial_view(
        &self,
        viewpoint: &Vector3<f64>,
        tol: f64,
        use_normals: bool,
    ) -> Result<Vec<usize>> {
        let mut visible = Vec::new();
        for (i, k) in self.iter().enumerate() {
            if self.kernel_visible(k, viewpoint, tol, use_normals)? {
                visible.push(i);
            }
        }
        Ok(visible)
    }

    /// Partial view from a direction: the viewpoint is placed far along
    /// `dir` from the cloud mean, giving a near-orthographic view. This is
    /// the computation the cache stores per bin. Requires statistics.
    pub fn partial_view_from_direction(
        &self,
        dir: &Unit<Vector3<f64>>,
        tol: f64,
        use_normals: bool,
    ) -> Result<Vec<usize>> {
        let mean = self.mean_location()?;
        let spread = self.moments()?.loc_h.max(1e-6);
        let viewpoint = mean + dir.into_inner() * (FAR_VIEW_FACTOR * spread);
        self.partial_view(&viewpoint, tol, use_normals)
    }

    /// Precompute partial views for the fixed direction discretization.
    /// Requires a mesh and statistics.
    pub fn build_partial_view_cache(&mut self, tol: f64, use_normals: bool) -> Result<()> {
        let directions = icosphere_directions(CACHE_SUBDIVISIONS);
        let mut views = Vec::with_capacity(directions.len());
        for d in &directions {
            views.push(self.partial_view_from_direction(d, tol, use_normals)?);
        }
        self.view_cache = Some(PartialViewCache {
            directions,
            views,
            tol,
            use_normals,
        });
        Ok(())
    }

    /// Cached partial view for the bin nearest to `dir`.
    pub fn partial_view_cached(&self, dir: &Unit<Vector3<f64>>) -> Result<&[usize]> {
        let cache = self.view_cache.as_ref().ok_or(Error::ViewCacheRequired)?;
        Ok(&cache.views[cache.bin(dir)])
    }

    pub fn partial_view_cache(&self) -> Result<&PartialViewCache> {
        self.view_cache.as_ref().ok_or(Error::ViewCacheRequired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Kernel;

    fn sphere_collection(n: usize) -> KernelCollection {
        let golden = std::f64::consts::PI * (3.0 - 5.0f64.sqrt());
        let mut c = KernelCollection::new();
        for i in 0..n {
            let z = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
            let r = (1.0 - z * z).sqrt();
            let phi = golden * i as f64;
            let loc = Vector3::new(r * phi.cos(), r * phi.sin(), z);
            c.add(Kernel::r3(loc).with_weight(1.0 / n as f64)).unwrap();
        }
        c.compute_kernel_statistics().unwrap();
        c.build_mesh().unwrap();
        c
    }

    #[test]
    fn test_partial_view_selects_facing_hemisphere() {
        let c = sphere_collection(400);
        let viewpoint = Vector3::new(0.0, 0.0, 10.0);
        let visible = c.partial_view(&viewpoint, 0.1, false).unwrap();
        assert!(!visible.is_empty());
        for &i in &visible {
            // No strongly back-facing point may pass.
            assert!(c.at(i).location().unwrap().z > -0.2);
        }
        // All strongly front-facing points must pass.
        for (i, k) in c.iter().enumerate() {
            if k.location().unwrap().z > 0.2 {
                assert!(visible.contains(&i), "front point {i} culled");
            }
        }
    }

    #[test]
    fn test_cache_matches_direct_computation_on_bins() {
        let mut c = sphere_collection(200);
        c.build_partial_view_cache(0.1, false).unwrap();
        for dir in icosphere_directions(CACHE_SUBDIVISIONS).iter().take(8) {
            let direct = c.partial_view_from_direction(dir, 0.1, false).unwrap();
            let cached = c.partial_view_cached(dir).unwrap();
            assert_eq!(direct.as_slice(), cached);
        }
    }

    #[test]
    fn test_normal_facing_test() {
        let mut c = KernelCollection::new();
        let up = Unit::new_normalize(Vector3::new(0.0, 0.0, 1.0));
        let down = Unit::new_normalize(Vector3::new(0.0, 0.0, -1.0));
        c.add(Kernel::r3xs2p(Vector3::new(0.0, 0.0, 1.0), up)).unwrap();
        c.add(Kernel::r3xs2p(Vector3::new(0.3, 0.0, 1.0), down)).unwrap();
        // A far-away plane that occludes nothing.
        c.attach_mesh(
            crate::mesh::TriangleMesh::from_parts(
                vec![
                    Vector3::new(-100.0, -100.0, -50.0),
                    Vector3::new(100.0, -100.0, -50.0),
                    Vector3::new(0.0, 100.0, -50.0),
                ],
                vec![[0, 1, 2]],
            )
            .unwrap(),
        );
        let viewpoint = Vector3::new(0.0, 0.0, 10.0);
        assert!(c.is_visible_from(c.at(0), &viewpoint, 0.1).unwrap());
        assert!(!c.is_visible_from(c.at(1), &viewpoint, 0.1).unwrap());
        // Without the normal test both pass.
        let visible = c.partial_view(&viewpoint, 0.1, false).unwrap();
        assert_eq!(visible, vec![0, 1]);
    }

    #[test]
    fn test_cache_contract_error() {
        let c = sphere_collection(50);
        let dir = Unit::new_normalize(Vector3::new(1.0, 0.0, 0.0));
        assert!(matches!(
            c.partial_view_cached(&dir),
            Err(Error::ViewCacheRequired)
        ));
    }
}
