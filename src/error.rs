//! Error types for kernel collections and pose estimation.
//!
//! Errors fall into four categories:
//!
//! - **Input** (`EmptyInputCloud`, `DomainMismatch`, `MissingViewpoint`,
//!   `MeshFormat`): the caller handed us something we cannot work with.
//!   These fail the top-level call.
//! - **Invariant** (`InvalidBandwidth`, `UnsupportedKernelOp`,
//!   `NonPositiveWeight`): a kernel or collection is in a state an operation
//!   cannot accept.
//! - **Numeric** (`SingularMatrix`, `DegenerateNeighborhood`): a local
//!   computation failed; callers typically skip the offending point and
//!   count it.
//! - **Contract** (`TreeRequired`, `StatisticsRequired`, `MeshRequired`,
//!   `ViewCacheRequired`): an accelerating structure was not built before an
//!   operation that needs it.

use std::path::PathBuf;

use thiserror::Error;

use crate::kernel::Manifold;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Empty input cloud.")]
    EmptyInputCloud,

    #[error("input clouds must be defined on the same domain (got {object} and {scene})")]
    DomainMismatch { object: Manifold, scene: Manifold },

    #[error("partial-view estimation requires a viewpoint")]
    MissingViewpoint,

    #[error("failed to read mesh {path:?}: {reason}")]
    MeshFormat { path: PathBuf, reason: String },

    #[error("total weight must be positive, got {total}")]
    NonPositiveWeight { total: f64 },

    #[error("bandwidth must be positive, got {value}")]
    InvalidBandwidth { value: f64 },

    #[error("`{op}` is not supported on {manifold} kernels")]
    UnsupportedKernelOp { op: &'static str, manifold: Manifold },

    #[error("evaluation requires a k-d tree; call build_kd_tree() first")]
    TreeRequired,

    #[error("operation requires statistics; call compute_kernel_statistics() first")]
    StatisticsRequired,

    #[error("operation requires a mesh; attach or build one first")]
    MeshRequired,

    #[error("operation requires a partial-view cache; call build_partial_view_cache() first")]
    ViewCacheRequired,

    #[error("{context}: matrix is singular")]
    SingularMatrix { context: &'static str },

    #[error("local differential undefined at point {index}")]
    DegenerateNeighborhood { index: usize },

    #[error("bad record: {0}")]
    Record(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
