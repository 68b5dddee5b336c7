//! Closed-surface approximation of a point cloud.
//!
//! Builds a convex support mesh: for every vertex direction of a subdivided
//! icosphere, take the cloud point farthest along that direction, and
//! connect the support points with the icosphere's face topology. The
//! result is a closed, deterministic approximation of the cloud's convex
//! hull, which is what the visibility tests need.

use nalgebra::Vector3;

use crate::error::{Error, Result};

use super::{icosphere, TriangleMesh};

/// Icosphere refinement of the support mesh (2 → 162 directions).
const SUPPORT_SUBDIVISIONS: usize = 2;

/// Approximate the cloud by its convex support mesh.
pub fn approximate_hull(points: &[Vector3<f64>]) -> Result<TriangleMesh> {
    if points.is_empty() {
        return Err(Error::EmptyInputCloud);
    }

    let centroid = points.iter().sum::<Vector3<f64>>() / points.len() as f64;
    let (dirs, faces) = icosphere(SUPPORT_SUBDIVISIONS);

    // Support point per direction; ties keep the lower point index.
    let mut vertices = Vec::with_capacity(dirs.len());
    for d in &dirs {
        let mut best = 0usize;
        let mut best_dot = f64::MIN;
        for (i, p) in points.iter().enumerate() {
            let dot = (p - centroid).dot(d);
            if dot > best_dot {
                best_dot = dot;
                best = i;
            }
        }
        vertices.push(points[best]);
    }

    // Orient faces outward.
    let mut oriented = Vec::with_capacity(faces.len());
    for [a, b, c] in faces {
        let n = (vertices[b] - vertices[a]).cross(&(vertices[c] - vertices[a]));
        let outward = (vertices[a] + vertices[b] + vertices[c]) / 3.0 - centroid;
        if n.dot(&outward) < 0.0 {
            oriented.push([a, c, b]);
        } else {
            oriented.push([a, b, c]);
        }
    }

    TriangleMesh::from_parts(vertices, oriented)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sphere_cloud(n: usize) -> Vec<Vector3<f64>> {
        // Deterministic spiral covering of the unit sphere.
        let golden = std::f64::consts::PI * (3.0 - 5.0f64.sqrt());
        (0..n)
            .map(|i| {
                let z = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
                let r = (1.0 - z * z).sqrt();
                let phi = golden * i as f64;
                Vector3::new(r * phi.cos(), r * phi.sin(), z)
            })
            .collect()
    }

    #[test]
    fn test_hull_of_sphere_stays_near_unit_radius() {
        let mesh = approximate_hull(&sphere_cloud(500)).unwrap();
        for v in mesh.vertices() {
            assert_relative_eq!(v.norm(), 1.0, epsilon = 1e-9);
        }
        // Surface sits close to every sample.
        for p in sphere_cloud(50) {
            assert!(mesh.distance_to_point(&p) < 0.1);
        }
    }

    #[test]
    fn test_hull_occludes_far_side() {
        let mesh = approximate_hull(&sphere_cloud(500)).unwrap();
        let viewpoint = Vector3::new(0.0, 0.0, 10.0);
        let back = Vector3::new(0.0, 0.0, -1.0);
        let front = Vector3::new(0.0, 0.0, 1.0);
        assert!(mesh.segment_occluded(&viewpoint, &back, 0.1));
        assert!(!mesh.segment_occluded(&viewpoint, &front, 0.1));
    }

    #[test]
    fn test_hull_faces_point_outward() {
        let mesh = approximate_hull(&sphere_cloud(300)).unwrap();
        let mut checked = 0;
        for i in 0..mesh.faces().len() {
            if let Some(n) = mesh.face_normal(i) {
                let [a, b, c] = mesh.faces()[i];
                let centroid =
                    (mesh.vertices()[a] + mesh.vertices()[b] + mesh.vertices()[c]) / 3.0;
                assert!(n.dot(&centroid) > 0.0);
                checked += 1;
            }
        }
        assert!(checked > 100);
    }

    #[test]
    fn test_empty_cloud_fails() {
        assert!(approximate_hull(&[]).is_err());
    }
}
