//! SO(3) helpers: quaternion sign canonicalization, geodesic distance, and
//! deterministic frames built from a single direction.
//!
//! Rotations are unit quaternions with `q` and `−q` identified. Every
//! function here treats the two signs as the same rotation.

use nalgebra::{Matrix3, Rotation3, Unit, UnitQuaternion, Vector3};

/// Canonicalize the quaternion sign: scalar part non-negative, ties broken
/// by the first non-zero vector component.
pub fn canonical(q: &UnitQuaternion<f64>) -> UnitQuaternion<f64> {
    let c = q.coords; // (i, j, k, w)
    let flip = if c.w != 0.0 {
        c.w < 0.0
    } else if c.x != 0.0 {
        c.x < 0.0
    } else if c.y != 0.0 {
        c.y < 0.0
    } else {
        c.z < 0.0
    };
    if flip {
        UnitQuaternion::new_unchecked(-q.into_inner())
    } else {
        *q
    }
}

/// Geodesic distance on SO(3): `2·acos(|⟨q₁, q₂⟩|)`, in `[0, π]`.
pub fn geodesic_distance(a: &UnitQuaternion<f64>, b: &UnitQuaternion<f64>) -> f64 {
    let dot = a.coords.dot(&b.coords).abs().min(1.0);
    2.0 * dot.acos()
}

/// Orthonormal basis of the tangent plane at `d` on the sphere.
///
/// The reference axis is the coordinate axis least aligned with `d`, so the
/// result is deterministic and never degenerate.
pub fn tangent_basis(d: &Unit<Vector3<f64>>) -> (Vector3<f64>, Vector3<f64>) {
    let a = if d.x.abs() > 0.9 {
        Vector3::y()
    } else {
        Vector3::x()
    };
    let e1 = d.cross(&a).normalize();
    let e2 = d.cross(&e1);
    (e1, e2)
}

/// Rotation whose Z axis is `d`, with the yaw about `d` fixed by
/// [`tangent_basis`]. Deterministic given `d`.
pub fn frame_from_direction(d: &Unit<Vector3<f64>>) -> UnitQuaternion<f64> {
    let (e1, e2) = tangent_basis(d);
    // Columns (e1, e2, d) with e2 = d × e1 form a right-handed frame.
    let m = Matrix3::from_columns(&[e1, e2, d.into_inner()]);
    UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(m))
}

/// Angle between two directions; with `projective`, `d` and `−d` are the
/// same direction and the result lies in `[0, π/2]`.
pub fn direction_angle(a: &Unit<Vector3<f64>>, b: &Unit<Vector3<f64>>, projective: bool) -> f64 {
    let mut dot = a.dot(b);
    if projective {
        dot = dot.abs();
    }
    dot.clamp(-1.0, 1.0).acos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn test_canonical_sign() {
        let q = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 3.0);
        let neg = UnitQuaternion::new_unchecked(-q.into_inner());
        let a = canonical(&q);
        let b = canonical(&neg);
        assert_relative_eq!(a.coords, b.coords, epsilon = 1e-12);
        assert!(a.coords.w >= 0.0);
    }

    #[test]
    fn test_geodesic_distance_sign_invariant() {
        let a = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.7);
        let b = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 1.1);
        let neg_b = UnitQuaternion::new_unchecked(-b.into_inner());
        assert_relative_eq!(
            geodesic_distance(&a, &b),
            geodesic_distance(&a, &neg_b),
            epsilon = 1e-12
        );
        assert_relative_eq!(geodesic_distance(&a, &b), 0.4, epsilon = 1e-9);
    }

    #[test]
    fn test_geodesic_distance_bounds() {
        let a = UnitQuaternion::identity();
        let half_turn = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), PI);
        assert_relative_eq!(geodesic_distance(&a, &a), 0.0, epsilon = 1e-12);
        // A half turn is the farthest rotation from the identity.
        assert_relative_eq!(geodesic_distance(&a, &half_turn), PI, epsilon = 1e-9);
    }

    #[test]
    fn test_frame_from_direction_maps_z() {
        for d in [
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(-0.3, 0.8, 0.5),
        ] {
            let d = Unit::new_normalize(d);
            let q = frame_from_direction(&d);
            assert_relative_eq!(q * Vector3::z(), d.into_inner(), epsilon = 1e-12);
            // Deterministic: same input, same frame.
            assert_relative_eq!(
                q.coords,
                frame_from_direction(&d).coords,
                epsilon = 1e-15
            );
        }
    }

    #[test]
    fn test_direction_angle_projective() {
        let a = Unit::new_normalize(Vector3::new(0.0, 0.0, 1.0));
        let b = Unit::new_normalize(Vector3::new(0.0, 0.0, -1.0));
        assert_relative_eq!(direction_angle(&a, &b, false), PI, epsilon = 1e-12);
        assert_relative_eq!(direction_angle(&a, &b, true), 0.0, epsilon = 1e-12);
        let c = Unit::new_normalize(Vector3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(direction_angle(&a, &c, true), FRAC_PI_2, epsilon = 1e-12);
    }
}
