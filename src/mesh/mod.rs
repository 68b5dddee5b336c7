//! Triangle meshes for visibility culling.
//!
//! A [`TriangleMesh`] is attached to a kernel collection to decide which
//! model points can be seen from a viewpoint. Meshes come from OFF files or
//! from the built-in surface approximation ([`hull`]).

pub mod hull;
pub mod visibility;

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use nalgebra::{Unit, Vector3};

use crate::error::{Error, Result};
use crate::geometry::SE3;

/// Tolerance below which a ray and a triangle are considered parallel.
const PARALLEL_EPS: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct TriangleMesh {
    vertices: Vec<Vector3<f64>>,
    faces: Vec<[usize; 3]>,
}

impl TriangleMesh {
    /// Build a mesh from vertices and triangle index triples. Fails on
    /// out-of-range indices.
    pub fn from_parts(vertices: Vec<Vector3<f64>>, faces: Vec<[usize; 3]>) -> Result<Self> {
        for f in &faces {
            for &i in f {
                if i >= vertices.len() {
                    return Err(Error::MeshFormat {
                        path: Default::default(),
                        reason: format!("face references vertex {i} of {}", vertices.len()),
                    });
                }
            }
        }
        Ok(Self { vertices, faces })
    }

    /// Parse an OFF file (vertex list + face list). Faces with more than
    /// three vertices are fan-triangulated.
    pub fn from_off_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::MeshFormat {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_off_str(&text).map_err(|e| match e {
            Error::MeshFormat { reason, .. } => Error::MeshFormat {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    pub(crate) fn from_off_str(text: &str) -> Result<Self> {
        let fail = |reason: &str| Error::MeshFormat {
            path: Default::default(),
            reason: reason.to_string(),
        };

        let mut lines = text
            .lines()
            .map(|l| l.split('#').next().unwrap_or("").trim())
            .filter(|l| !l.is_empty());

        let header = lines.next().ok_or_else(|| fail("empty file"))?;
        if header != "OFF" {
            return Err(fail("missing OFF header"));
        }
        let counts = lines.next().ok_or_else(|| fail("missing count line"))?;
        let mut it = counts.split_whitespace();
        let nv: usize = it
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| fail("bad vertex count"))?;
        let nf: usize = it
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| fail("bad face count"))?;

        let mut vertices = Vec::with_capacity(nv);
        for _ in 0..nv {
            let line = lines.next().ok_or_else(|| fail("truncated vertex list"))?;
            let mut t = line.split_whitespace();
            let mut coord = [0.0f64; 3];
            for c in &mut coord {
                *c = t
                    .next()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| fail("bad vertex line"))?;
            }
            vertices.push(Vector3::new(coord[0], coord[1], coord[2]));
        }

        let mut faces = Vec::with_capacity(nf);
        for _ in 0..nf {
            let line = lines.next().ok_or_else(|| fail("truncated face list"))?;
            let mut t = line.split_whitespace();
            let k: usize = t
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| fail("bad face line"))?;
            if k < 3 {
                return Err(fail("face with fewer than 3 vertices"));
            }
            let mut idx = Vec::with_capacity(k);
            for _ in 0..k {
                idx.push(
                    t.next()
                        .and_then(|s| s.parse::<usize>().ok())
                        .ok_or_else(|| fail("bad face index"))?,
                );
            }
            for i in 1..k - 1 {
                faces.push([idx[0], idx[i], idx[i + 1]]);
            }
        }

        Self::from_parts(vertices, faces)
    }

    pub fn vertices(&self) -> &[Vector3<f64>] {
        &self.vertices
    }

    pub fn faces(&self) -> &[[usize; 3]] {
        &self.faces
    }

    pub fn transform_with(&mut self, t: &SE3) {
        for v in &mut self.vertices {
            *v = t.transform_point(v);
        }
    }

    /// Unit normal of face `i` from its winding; `None` for degenerate
    /// triangles.
    pub fn face_normal(&self, i: usize) -> Option<Unit<Vector3<f64>>> {
        let [a, b, c] = self.faces[i];
        let n = (self.vertices[b] - self.vertices[a]).cross(&(self.vertices[c] - self.vertices[a]));
        Unit::try_new(n, 1e-12)
    }

    /// Whether the segment `start → end` crosses the mesh at a point
    /// farther than `tol` from `end`. `tol` absorbs the thickness of the
    /// sampled surface around the mesh.
    pub fn segment_occluded(
        &self,
        start: &Vector3<f64>,
        end: &Vector3<f64>,
        tol: f64,
    ) -> bool {
        let dir = end - start;
        let len = dir.norm();
        if len < PARALLEL_EPS {
            return false;
        }
        for face in &self.faces {
            if let Some(t) = self.segment_triangle_parameter(start, &dir, face) {
                if (1.0 - t) * len > tol {
                    return true;
                }
            }
        }
        false
    }

    /// Möller–Trumbore, double sided. Returns the segment parameter
    /// `t ∈ (0, 1]` of the intersection point, if any.
    fn segment_triangle_parameter(
        &self,
        start: &Vector3<f64>,
        dir: &Vector3<f64>,
        face: &[usize; 3],
    ) -> Option<f64> {
        let v0 = self.vertices[face[0]];
        let edge1 = self.vertices[face[1]] - v0;
        let edge2 = self.vertices[face[2]] - v0;
        let h = dir.cross(&edge2);
        let a = edge1.dot(&h);
        if a.abs() < PARALLEL_EPS {
            return None;
        }
        let f = 1.0 / a;
        let s = start - v0;
        let u = f * s.dot(&h);
        if !(0.0..=1.0).contains(&u) {
            return None;
        }
        let q = s.cross(&edge1);
        let v = f * dir.dot(&q);
        if v < 0.0 || u + v > 1.0 {
            return None;
        }
        let t = f * edge2.dot(&q);
        if t > PARALLEL_EPS && t <= 1.0 {
            Some(t)
        } else {
            None
        }
    }

    /// Smallest distance from `p` to the mesh surface.
    pub fn distance_to_point(&self, p: &Vector3<f64>) -> f64 {
        let mut best = f64::INFINITY;
        for face in &self.faces {
            let d = point_triangle_distance(
                p,
                &self.vertices[face[0]],
                &self.vertices[face[1]],
                &self.vertices[face[2]],
            );
            best = best.min(d);
        }
        best
    }
}

/// Distance from `p` to triangle `abc` (closest-point regions per Ericson,
/// Real-Time Collision Detection §5.1.5).
fn point_triangle_distance(
    p: &Vector3<f64>,
    a: &Vector3<f64>,
    b: &Vector3<f64>,
    c: &Vector3<f64>,
) -> f64 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;

    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return ap.norm();
    }

    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return bp.norm();
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return (ap - v * ab).norm();
    }

    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return cp.norm();
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return (ap - w * ac).norm();
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return (bp - w * (c - b)).norm();
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    (ap - v * ab - w * ac).norm()
}

// ────────────────────────────────────────────────────────────────────────
// Icosphere
// ────────────────────────────────────────────────────────────────────────

/// Unit icosphere: subdivided icosahedron with normalized vertices.
/// `subdivisions = 0` gives 12 vertices / 20 faces; each level quadruples
/// the face count.
pub(crate) fn icosphere(subdivisions: usize) -> (Vec<Vector3<f64>>, Vec<[usize; 3]>) {
    let t = (1.0 + 5.0f64.sqrt()) / 2.0;
    let mut vertices: Vec<Vector3<f64>> = [
        (-1.0, t, 0.0),
        (1.0, t, 0.0),
        (-1.0, -t, 0.0),
        (1.0, -t, 0.0),
        (0.0, -1.0, t),
        (0.0, 1.0, t),
        (0.0, -1.0, -t),
        (0.0, 1.0, -t),
        (t, 0.0, -1.0),
        (t, 0.0, 1.0),
        (-t, 0.0, -1.0),
        (-t, 0.0, 1.0),
    ]
    .iter()
    .map(|&(x, y, z)| Vector3::new(x, y, z).normalize())
    .collect();

    let mut faces: Vec<[usize; 3]> = vec![
        [0, 11, 5],
        [0, 5, 1],
        [0, 1, 7],
        [0, 7, 10],
        [0, 10, 11],
        [1, 5, 9],
        [5, 11, 4],
        [11, 10, 2],
        [10, 7, 6],
        [7, 1, 8],
        [3, 9, 4],
        [3, 4, 2],
        [3, 2, 6],
        [3, 6, 8],
        [3, 8, 9],
        [4, 9, 5],
        [2, 4, 11],
        [6, 2, 10],
        [8, 6, 7],
        [9, 8, 1],
    ];

    for _ in 0..subdivisions {
        let mut midpoints: HashMap<(usize, usize), usize> = HashMap::new();
        let mut midpoint = |a: usize, b: usize, vertices: &mut Vec<Vector3<f64>>| {
            let key = (a.min(b), a.max(b));
            *midpoints.entry(key).or_insert_with(|| {
                let m = (vertices[a] + vertices[b]).normalize();
                vertices.push(m);
                vertices.len() - 1
            })
        };
        let mut next = Vec::with_capacity(faces.len() * 4);
        for [a, b, c] in faces {
            let ab = midpoint(a, b, &mut vertices);
            let bc = midpoint(b, c, &mut vertices);
            let ca = midpoint(c, a, &mut vertices);
            next.push([a, ab, ca]);
            next.push([b, bc, ab]);
            next.push([c, ca, bc]);
            next.push([ab, bc, ca]);
        }
        faces = next;
    }

    (vertices, faces)
}

/// Face-centroid directions of the unit icosphere; the direction bins of
/// the partial-view cache.
pub(crate) fn icosphere_directions(subdivisions: usize) -> Vec<Unit<Vector3<f64>>> {
    let (vertices, faces) = icosphere(subdivisions);
    faces
        .iter()
        .map(|&[a, b, c]| Unit::new_normalize(vertices[a] + vertices[b] + vertices[c]))
        .collect()
}
