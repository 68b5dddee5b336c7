//! Kernels: weighted particles on R³, R³×S², R³×S²₊, SE(3) or SO(3).
//!
//! A [`Kernel`] pairs a point on one of the supported manifolds with a
//! weight, per-kernel bandwidths and an optional color payload. The manifold
//! is a tagged sum ([`Point`]); operations that only exist on some manifolds
//! (orientation access, SE(3) projection) return an invariant error on the
//! others instead of panicking.
//!
//! The density of a kernel is a product of a radially symmetric factor per
//! component: an isotropic Gaussian over the location and a von
//! Mises–Fisher factor over the orientation (antipodally symmetrized for
//! unsigned directions and quaternions).

pub mod directional;

use std::f64::consts::PI;
use std::fmt;

use nalgebra::{Unit, UnitQuaternion, Vector3};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::geometry::{so3, SE3};
use crate::rng::RandomStream;

/// The manifold a kernel lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Manifold {
    R3,
    R3xS2,
    R3xS2P,
    Se3,
    So3,
}

impl fmt::Display for Manifold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Manifold::R3 => "r3",
            Manifold::R3xS2 => "r3xs2",
            Manifold::R3xS2P => "r3xs2p",
            Manifold::Se3 => "se3",
            Manifold::So3 => "so3",
        };
        f.write_str(name)
    }
}

/// A point on one of the supported manifolds.
///
/// `R3xS2P` is the projective variant of `R3xS2`: the direction and its
/// negative are the same point, which is how surface normals with ambiguous
/// sign are represented.
#[derive(Debug, Clone)]
pub enum Point {
    R3(Vector3<f64>),
    R3xS2 {
        loc: Vector3<f64>,
        dir: Unit<Vector3<f64>>,
    },
    R3xS2P {
        loc: Vector3<f64>,
        dir: Unit<Vector3<f64>>,
    },
    Se3(SE3),
    So3(UnitQuaternion<f64>),
}

/// A weighted particle with per-kernel bandwidths.
#[derive(Debug, Clone)]
pub struct Kernel {
    pub point: Point,
    pub weight: f64,
    /// Positional bandwidth (standard deviation, coordinate units).
    pub loc_h: f64,
    /// Angular bandwidth (standard deviation, radians).
    pub ori_h: f64,
    /// Optional RGB payload in `[0, 1]³`.
    pub color: Option<[f64; 3]>,
}

impl Kernel {
    fn from_point(point: Point) -> Self {
        Self {
            point,
            weight: 1.0,
            loc_h: 0.0,
            ori_h: 0.0,
            color: None,
        }
    }

    pub fn r3(loc: Vector3<f64>) -> Self {
        Self::from_point(Point::R3(loc))
    }

    pub fn r3xs2(loc: Vector3<f64>, dir: Unit<Vector3<f64>>) -> Self {
        Self::from_point(Point::R3xS2 { loc, dir })
    }

    pub fn r3xs2p(loc: Vector3<f64>, dir: Unit<Vector3<f64>>) -> Self {
        Self::from_point(Point::R3xS2P { loc, dir })
    }

    pub fn se3(pose: SE3) -> Self {
        Self::from_point(Point::Se3(pose))
    }

    pub fn so3(ori: UnitQuaternion<f64>) -> Self {
        Self::from_point(Point::So3(ori))
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_bandwidths(mut self, loc_h: f64, ori_h: f64) -> Self {
        self.loc_h = loc_h;
        self.ori_h = ori_h;
        self
    }

    pub fn manifold(&self) -> Manifold {
        match &self.point {
            Point::R3(_) => Manifold::R3,
            Point::R3xS2 { .. } => Manifold::R3xS2,
            Point::R3xS2P { .. } => Manifold::R3xS2P,
            Point::Se3(_) => Manifold::Se3,
            Point::So3(_) => Manifold::So3,
        }
    }

    /// Location, if the manifold has one (`None` for so3).
    pub fn location(&self) -> Option<Vector3<f64>> {
        match &self.point {
            Point::R3(loc)
            | Point::R3xS2 { loc, .. }
            | Point::R3xS2P { loc, .. } => Some(*loc),
            Point::Se3(pose) => Some(pose.translation),
            Point::So3(_) => None,
        }
    }

    pub fn set_location(&mut self, new_loc: Vector3<f64>) -> Result<()> {
        match &mut self.point {
            Point::R3(loc) | Point::R3xS2 { loc, .. } | Point::R3xS2P { loc, .. } => {
                *loc = new_loc
            }
            Point::Se3(pose) => pose.translation = new_loc,
            Point::So3(_) => {
                return Err(Error::UnsupportedKernelOp {
                    op: "set_location",
                    manifold: Manifold::So3,
                })
            }
        }
        Ok(())
    }

    /// Direction, for the r3xs2 variants.
    pub fn direction(&self) -> Option<Unit<Vector3<f64>>> {
        match &self.point {
            Point::R3xS2 { dir, .. } | Point::R3xS2P { dir, .. } => Some(*dir),
            _ => None,
        }
    }

    /// Orientation quaternion, for se3 and so3.
    pub fn orientation(&self) -> Option<UnitQuaternion<f64>> {
        match &self.point {
            Point::Se3(pose) => Some(pose.rotation),
            Point::So3(q) => Some(*q),
            _ => None,
        }
    }

    /// Rigid transformation of the kernel. Directions and orientations
    /// rotate with the transform; bandwidths, weight and color carry over.
    pub fn transformed_with(&self, t: &SE3) -> Kernel {
        let point = match &self.point {
            Point::R3(loc) => Point::R3(t.transform_point(loc)),
            Point::R3xS2 { loc, dir } => Point::R3xS2 {
                loc: t.transform_point(loc),
                dir: t.rotation * *dir,
            },
            Point::R3xS2P { loc, dir } => Point::R3xS2P {
                loc: t.transform_point(loc),
                dir: t.rotation * *dir,
            },
            Point::Se3(pose) => Point::Se3(t.compose(pose)),
            Point::So3(q) => Point::So3(t.rotation * *q),
        };
        Kernel {
            point,
            ..self.clone()
        }
    }

    /// Lift the kernel to an SE(3) frame.
    ///
    /// For the r3xs2 variants the frame's Z axis is the direction, the yaw
    /// about it fixed deterministically. r3 and so3 kernels carry too little
    /// information to define a frame.
    pub fn se3_projection(&self) -> Result<SE3> {
        match &self.point {
            Point::Se3(pose) => Ok(*pose),
            Point::R3xS2 { loc, dir } | Point::R3xS2P { loc, dir } => Ok(SE3::from_parts(
                so3::frame_from_direction(dir),
                *loc,
            )),
            _ => Err(Error::UnsupportedKernelOp {
                op: "se3_projection",
                manifold: self.manifold(),
            }),
        }
    }

    /// Draw a particle from the kernel's own density: Gaussian location with
    /// stdev `loc_h`, von Mises–Fisher orientation with concentration
    /// derived from `ori_h`.
    pub fn sample(&self, rng: &mut RandomStream) -> Kernel {
        let kappa = directional::concentration(self.ori_h.max(1e-12));
        let point = match &self.point {
            Point::R3(loc) => Point::R3(self.sample_location(rng, loc)),
            Point::R3xS2 { loc, dir } => Point::R3xS2 {
                loc: self.sample_location(rng, loc),
                dir: directional::sample_vmf_s2(rng, dir, kappa),
            },
            Point::R3xS2P { loc, dir } => Point::R3xS2P {
                loc: self.sample_location(rng, loc),
                dir: directional::sample_vmf_s2(rng, dir, kappa),
            },
            Point::Se3(pose) => Point::Se3(SE3::from_parts(
                directional::sample_vmf_s3(rng, &pose.rotation, kappa),
                self.sample_location(rng, &pose.translation),
            )),
            Point::So3(q) => Point::So3(directional::sample_vmf_s3(rng, q, kappa)),
        };
        Kernel {
            point,
            ..self.clone()
        }
    }

    fn sample_location(&self, rng: &mut RandomStream, mean: &Vector3<f64>) -> Vector3<f64> {
        Vector3::new(
            rng.normal(mean.x, self.loc_h),
            rng.normal(mean.y, self.loc_h),
            rng.normal(mean.z, self.loc_h),
        )
    }

    /// Density of this kernel evaluated at `at`, using this kernel's
    /// bandwidths (clamped to the configured floors).
    pub fn density_at(&self, at: &Kernel, config: &Config) -> Result<f64> {
        let loc_h = self.loc_h.max(config.loc_stdev_min);
        let kappa = directional::concentration(self.ori_h.max(config.ori_stdev_min));
        let norm = config.normalize_densities;

        match (&self.point, &at.point) {
            (Point::R3(a), Point::R3(b)) => Ok(gaussian3((a - b).norm_squared(), loc_h, norm)),
            (
                Point::R3xS2 { loc: la, dir: da },
                Point::R3xS2 { loc: lb, dir: db },
            ) => Ok(gaussian3((la - lb).norm_squared(), loc_h, norm)
                * directional::vmf_s2(da.dot(db), kappa, norm)),
            (
                Point::R3xS2P { loc: la, dir: da },
                Point::R3xS2P { loc: lb, dir: db },
            ) => Ok(gaussian3((la - lb).norm_squared(), loc_h, norm)
                * directional::vmf_s2_sym(da.dot(db), kappa, norm)),
            (Point::Se3(a), Point::Se3(b)) => {
                let dot = a.rotation.coords.dot(&b.rotation.coords);
                Ok(
                    gaussian3((a.translation - b.translation).norm_squared(), loc_h, norm)
                        * directional::vmf_s3_sym(dot, kappa, norm),
                )
            }
            (Point::So3(a), Point::So3(b)) => {
                Ok(directional::vmf_s3_sym(a.coords.dot(&b.coords), kappa, norm))
            }
            _ => Err(Error::DomainMismatch {
                object: self.manifold(),
                scene: at.manifold(),
            }),
        }
    }
}

/// Isotropic Gaussian factor in R³ over the squared distance.
fn gaussian3(dist_sq: f64, h: f64, normalize: bool) -> f64 {
    let f = (-dist_sq / (2.0 * h * h)).exp();
    if normalize {
        f / ((2.0 * PI).powf(1.5) * h * h * h)
    } else {
        f
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    fn test_transform() -> SE3 {
        SE3::from_parts(
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2),
            Vector3::new(1.0, 2.0, 3.0),
        )
    }

    #[test]
    fn test_transform_moves_location_and_rotates_orientation() {
        let t = test_transform();
        let dir = Unit::new_normalize(Vector3::new(1.0, 0.0, 0.0));
        let k = Kernel::r3xs2(Vector3::new(1.0, 0.0, 0.0), dir);
        let moved = k.transformed_with(&t);

        let expected_loc = t.rotation * Vector3::new(1.0, 0.0, 0.0) + t.translation;
        assert_relative_eq!(moved.location().unwrap(), expected_loc, epsilon = 1e-12);
        assert_relative_eq!(
            moved.direction().unwrap().into_inner(),
            Vector3::new(0.0, 1.0, 0.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_transform_se3_kernel() {
        let t = test_transform();
        let pose = SE3::from_parts(
            UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.3),
            Vector3::new(0.5, 0.0, 0.0),
        );
        let k = Kernel::se3(pose);
        let moved = k.transformed_with(&t);
        let expected = t.compose(&pose);
        let got = match moved.point {
            Point::Se3(p) => p,
            _ => unreachable!(),
        };
        assert_relative_eq!(got.translation, expected.translation, epsilon = 1e-12);
        assert!(got.rotation.coords.dot(&expected.rotation.coords).abs() > 1.0 - 1e-12);
    }

    #[test]
    fn test_se3_projection_unsupported_on_r3() {
        let k = Kernel::r3(Vector3::zeros());
        assert!(matches!(
            k.se3_projection(),
            Err(Error::UnsupportedKernelOp { .. })
        ));
    }

    #[test]
    fn test_se3_projection_aligns_z_with_direction() {
        let dir = Unit::new_normalize(Vector3::new(0.2, -0.5, 0.8));
        let k = Kernel::r3xs2p(Vector3::new(1.0, 1.0, 1.0), dir);
        let frame = k.se3_projection().unwrap();
        assert_relative_eq!(
            frame.rotation * Vector3::z(),
            dir.into_inner(),
            epsilon = 1e-12
        );
        assert_relative_eq!(frame.translation, Vector3::new(1.0, 1.0, 1.0), epsilon = 1e-12);
    }

    #[test]
    fn test_density_peaks_at_center() {
        let cfg = Config::default();
        let k = Kernel::r3(Vector3::zeros()).with_bandwidths(0.5, 0.0);
        let at_center = k.density_at(&k, &cfg).unwrap();
        let off = Kernel::r3(Vector3::new(0.5, 0.0, 0.0));
        let at_off = k.density_at(&off, &cfg).unwrap();
        assert!(at_center > at_off);
        assert!(at_off > 0.0);
    }

    #[test]
    fn test_density_projective_direction_sign_invariant() {
        let cfg = Config::default();
        let dir = Unit::new_normalize(Vector3::new(0.0, 0.0, 1.0));
        let k = Kernel::r3xs2p(Vector3::zeros(), dir).with_bandwidths(0.5, 0.2);
        let flipped = Kernel::r3xs2p(Vector3::zeros(), Unit::new_normalize(-dir.into_inner()))
            .with_bandwidths(0.5, 0.2);
        let d1 = k.density_at(&k, &cfg).unwrap();
        let d2 = k.density_at(&flipped, &cfg).unwrap();
        assert_relative_eq!(d1, d2, epsilon = 1e-12);
    }

    #[test]
    fn test_density_domain_mismatch() {
        let cfg = Config::default();
        let a = Kernel::r3(Vector3::zeros());
        let b = Kernel::so3(UnitQuaternion::identity());
        assert!(matches!(
            a.density_at(&b, &cfg),
            Err(Error::DomainMismatch { .. })
        ));
    }

    #[test]
    fn test_sample_concentrates_on_small_bandwidths() {
        let mut rng = RandomStream::new(99);
        let pose = SE3::from_parts(
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.6),
            Vector3::new(1.0, 2.0, 3.0),
        );
        let k = Kernel::se3(pose).with_bandwidths(0.01, 0.01);
        for _ in 0..50 {
            let s = k.sample(&mut rng);
            let got = match s.point {
                Point::Se3(p) => p,
                _ => unreachable!(),
            };
            let (dl, da) = got.distance_to(&pose);
            assert!(dl < 0.2);
            assert!(da < 0.2);
        }
    }
}
