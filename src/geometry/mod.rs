//! Geometry utilities: SE(3) rigid transforms, SO(3) helpers, small linear
//! algebra.

pub mod linalg;
pub mod se3;
pub mod so3;

pub use se3::SE3;
