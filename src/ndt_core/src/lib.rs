//! Bundle-based Normal Distributions Transform (NDT) scan matching.
//!
//! The target is a sparse grid of Gaussian cells. Every point is inserted
//! into `2^D` overlapping sub-grids, so each half-resolution *bundle* is
//! covered by `2^D` cells whose distributions are merged at lookup time. A
//! source cloud is registered against the grid by Newton-Raphson on the sum
//! of the bundle Gaussians, optionally with ICP sub-iterations.
//!
//! # Architecture
//!
//! - [`distribution`]: online Gaussian accumulator
//! - [`grid`]: cell arena, bundles, occupancy fusion and ray insertion
//! - [`derivatives`]: motion models and the score, gradient and Hessian
//! - [`optimization`]: Newton step policy, NDT and ICP-hybrid matchers
//! - [`conversion`]: export to intensity points and packed records
//! - [`ndt`]: high-level [`NdtScanMatcher`]
//!
//! # Usage
//!
//! ```
//! use nalgebra::{Isometry2, Vector2};
//! use ndt_core::{GridConfig, Gridmap2d, MatchParameters, NdtMatcher2d, PointCloud};
//! use ndt_core::test_utils::make_default_corridor_scene;
//!
//! let map = make_default_corridor_scene();
//! let mut grid = Gridmap2d::new(GridConfig::uniform(1.0)).unwrap();
//! grid.insert_points(&map);
//!
//! let scan = PointCloud::from_points(map.iter().map(|p| p - Vector2::new(0.1, 0.0)).collect());
//! let matcher = NdtMatcher2d::new(MatchParameters::default()).unwrap();
//! let result = matcher.align(&scan, &grid, Isometry2::identity());
//! println!("{:?} after {} iterations", result.status, result.iterations);
//! ```

pub mod cloud;
pub mod conversion;
pub mod derivatives;
pub mod distribution;
pub mod error;
pub mod grid;
pub mod ndt;
pub mod optimization;
pub mod test_utils;

pub use cloud::{PointCloud, PointCloud2d, PointCloud3d};
pub use conversion::{IntensityPoint, PackedCloud, PointField, DEFAULT_OCCUPANCY_THRESHOLD};
pub use derivatives::{AggregatedDerivatives, Motion, Planar, Spatial, TargetBundles};
pub use distribution::Distribution;
pub use error::{CloudFormatError, ConfigError, NdtError};
pub use grid::{
    Bundle, BundleIndex, CellData, GridConfig, Gridmap, Gridmap2d, Gridmap3d, InverseModel,
    LogOddsInverseModel, NdtGrid, OccupancyCell, OccupancyData, OccupancyGridmap,
    OccupancyGridmap2d, OccupancyGridmap3d,
};
pub use optimization::{
    ConvergenceStatus, IcpMatchParameters, IcpNdtMatcher, IcpNdtMatcher2d, IcpNdtMatcher3d,
    LineSearchConfig, MatchParameters, MatchResult, MatchResult2d, MatchResult3d, NdtMatcher,
    NdtMatcher2d, NdtMatcher3d, StepOutcome,
};

// High-level API
pub use ndt::{
    NdtScanMatcher, NdtScanMatcher2d, NdtScanMatcher3d, NdtScanMatcherBuilder, NdtScanMatcherConfig,
};
