//! Small dense linear algebra: symmetric 3×3 eigendecomposition and
//! LU-backed determinant/inverse.
//!
//! The eigendecomposition is the workhorse behind surface-normal estimation
//! and directional statistics; it returns eigenpairs sorted by decreasing
//! `|λ|` with a right-handed eigenvector frame.

use nalgebra::{DMatrix, Matrix3, Vector3};

use crate::error::{Error, Result};

/// Eigendecomposition of a symmetric 3×3 matrix.
///
/// Returns `(eigenvectors, eigenvalues)` with eigenvalues sorted by
/// decreasing absolute value and eigenvectors as the matching columns. The
/// third column is flipped if needed so the columns form a right-handed
/// frame.
pub fn eigen_symmetric3(m: &Matrix3<f64>) -> (Matrix3<f64>, Vector3<f64>) {
    let eig = nalgebra::SymmetricEigen::new(*m);

    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| {
        eig.eigenvalues[b]
            .abs()
            .partial_cmp(&eig.eigenvalues[a].abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut vectors = Matrix3::zeros();
    let mut values = Vector3::zeros();
    for (slot, &src) in order.iter().enumerate() {
        values[slot] = eig.eigenvalues[src];
        vectors.set_column(slot, &eig.eigenvectors.column(src).into_owned());
    }

    let c0 = vectors.column(0).into_owned();
    let c1 = vectors.column(1).into_owned();
    let c2 = vectors.column(2).into_owned();
    if c0.cross(&c1).dot(&c2) < 0.0 {
        vectors.set_column(2, &(-c2));
    }

    (vectors, values)
}

/// Determinant of a square matrix via LU decomposition.
pub fn determinant(m: &DMatrix<f64>) -> Result<f64> {
    if !m.is_square() {
        return Err(Error::SingularMatrix {
            context: "determinant of non-square matrix",
        });
    }
    Ok(m.clone().lu().determinant())
}

/// Inverse of a square matrix via LU decomposition. Fails on singular input.
pub fn inverse(m: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    if !m.is_square() {
        return Err(Error::SingularMatrix {
            context: "inverse of non-square matrix",
        });
    }
    m.clone().lu().try_inverse().ok_or(Error::SingularMatrix {
        context: "matrix inverse",
    })
}
