//! SE3: 6-DOF rigid transformation (rotation + translation).
//!
//! Transforms points as `p' = R * p + t`, with the rotation stored as a unit
//! quaternion. This is the pose representation used throughout the
//! estimator: object-to-scene hypotheses, kernel frames, mesh transforms.

use nalgebra::{Matrix3, Matrix4, Rotation3, UnitQuaternion, Vector3};

use super::so3;

/// 6-DOF rigid transformation: rotation + translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    /// Identity transformation (no rotation, no translation).
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Construct from a rotation and a translation.
    pub fn from_parts(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Construct from quaternion components (w, x, y, z) and a translation.
    /// The quaternion is normalized.
    pub fn from_quaternion(
        qw: f64,
        qx: f64,
        qy: f64,
        qz: f64,
        translation: Vector3<f64>,
    ) -> Self {
        let rotation =
            UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(qw, qx, qy, qz));
        Self {
            rotation,
            translation,
        }
    }

    /// Construct from a rotation matrix and a translation.
    pub fn from_rt(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        let rot3 = Rotation3::from_matrix_unchecked(rotation);
        Self {
            rotation: UnitQuaternion::from_rotation_matrix(&rot3),
            translation,
        }
    }

    /// Inverse transformation: `T⁻¹ = (R^T, -R^T t)`.
    pub fn inverse(&self) -> Self {
        let rot_inv = self.rotation.inverse();
        Self {
            rotation: rot_inv,
            translation: -(rot_inv * self.translation),
        }
    }

    /// Compose two transforms: `self ∘ other`, i.e. apply `other` first.
    pub fn compose(&self, other: &SE3) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    /// The transform `T` such that `T ∘ other = self`.
    pub fn transformation_from(&self, other: &SE3) -> Self {
        self.compose(&other.inverse())
    }

    /// Transform a single point: `p' = R p + t`.
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    /// Rotate a direction (no translation).
    pub fn transform_direction(&self, d: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * d
    }

    /// Positional and angular distance to another transform:
    /// `(‖t₁ − t₂‖, geodesic(q₁, q₂))`.
    pub fn distance_to(&self, other: &SE3) -> (f64, f64) {
        (
            (self.translation - other.translation).norm(),
            so3::geodesic_distance(&self.rotation, &other.rotation),
        )
    }

    /// Homogeneous 4×4 matrix `[R | t; 0 0 0 1]`.
    pub fn to_matrix(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&self.rotation.to_rotation_matrix().into_inner());
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    fn quarter_turn_z() -> SE3 {
        SE3::from_parts(
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2),
            Vector3::new(1.0, 2.0, 3.0),
        )
    }

    #[test]
    fn test_identity() {
        let p = Vector3::new(1.0, 2.0, 3.0);
        assert_relative_eq!(SE3::identity().transform_point(&p), p, epsilon = 1e-12);
    }

    #[test]
    fn test_inverse_roundtrip() {
        let t = quarter_turn_z();
        let p = Vector3::new(0.3, -0.7, 1.1);
        let q = t.inverse().transform_point(&t.transform_point(&p));
        assert_relative_eq!(q, p, epsilon = 1e-12);
    }

    #[test]
    fn test_compose() {
        let a = quarter_turn_z();
        let b = SE3::from_parts(
            UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.4),
            Vector3::new(-1.0, 0.5, 0.0),
        );
        let p = Vector3::new(0.1, 0.2, 0.3);
        let via_compose = a.compose(&b).transform_point(&p);
        let via_steps = a.transform_point(&b.transform_point(&p));
        assert_relative_eq!(via_compose, via_steps, epsilon = 1e-12);
    }

    #[test]
    fn test_transformation_from_recovers_lhs() {
        // A.transformation_from(B) ∘ B must equal A.
        let a = quarter_turn_z();
        let b = SE3::from_parts(
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 1.2),
            Vector3::new(4.0, -2.0, 0.7),
        );
        let t = a.transformation_from(&b);
        let recovered = t.compose(&b);
        assert_relative_eq!(recovered.translation, a.translation, epsilon = 1e-9);
        let dot = recovered.rotation.coords.dot(&a.rotation.coords).abs();
        assert!(1.0 - dot < 1e-9);
    }

    #[test]
    fn test_distance_to() {
        let a = SE3::identity();
        let b = SE3::from_parts(
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.3),
            Vector3::new(3.0, 4.0, 0.0),
        );
        let (dl, da) = a.distance_to(&b);
        assert_relative_eq!(dl, 5.0, epsilon = 1e-12);
        assert_relative_eq!(da, 0.3, epsilon = 1e-9);
    }
}
