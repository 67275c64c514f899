//! Derivative computation for NDT optimization.
//!
//! The score of a point cloud is the sum of the non-normalized bundle
//! Gaussians evaluated at every transformed point. Its gradient and exact
//! Hessian with respect to an incremental motion are accumulated per point
//! and reduced in parallel.

pub mod compute;
pub mod motion;
pub mod target;
pub mod types;

pub use compute::{compute_derivative_single, compute_derivatives, compute_score};
pub use motion::{Motion, Planar, Spatial};
pub use target::{BundleGaussian, TargetBundles};
pub use types::{AggregatedDerivatives, DerivativeResult, PointDerivatives};
