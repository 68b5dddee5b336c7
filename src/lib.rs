pub mod collection;
pub mod config;
pub mod error;
pub mod estimator;
pub mod geometry;
pub mod io;
pub mod kernel;
pub mod mesh;
pub mod rng;

pub use collection::{EvaluationStrategy, KernelCollection, SampleIter};
pub use config::Config;
pub use error::{Error, Result};
pub use estimator::{CustomIntegrandFactor, PoseEstimator, PoseHypothesis};
pub use geometry::SE3;
pub use kernel::{Kernel, Manifold, Point};
pub use mesh::TriangleMesh;
pub use rng::RandomStream;
