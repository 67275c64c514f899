//! High-level NDT scan matching API.
//!
//! [`NdtScanMatcher`] owns a target grid built from map points and aligns
//! source scans to it with either the plain or the ICP-hybrid matcher.
//!
//! # Example
//!
//! ```
//! use nalgebra::{Isometry2, Vector2};
//! use ndt_core::test_utils::make_default_corridor_scene;
//! use ndt_core::NdtScanMatcher2d;
//!
//! # fn main() -> anyhow::Result<()> {
//! let map = make_default_corridor_scene();
//! let scan: Vec<Vector2<f64>> = map.iter().map(|p| p - Vector2::new(0.1, 0.0)).collect();
//!
//! let mut matcher: NdtScanMatcher2d = NdtScanMatcher2d::builder().resolution(1.0).build()?;
//! matcher.set_target(&map)?;
//!
//! let result = matcher.align(&scan, Isometry2::identity())?;
//! println!("Converged: {}, Score: {}", result.converged, result.score);
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::AtomicBool;

use anyhow::{bail, Context, Result};
use nalgebra::SVector;
use tracing::debug;

use crate::cloud::PointCloud;
use crate::derivatives::{compute_score, Motion, Planar, Spatial, TargetBundles};
use crate::grid::{GridConfig, Gridmap};
use crate::optimization::{
    IcpMatchParameters, IcpNdtMatcher, MatchParameters, MatchResult, NdtMatcher,
};

/// Configuration for [`NdtScanMatcher`].
#[derive(Debug, Clone, PartialEq)]
pub struct NdtScanMatcherConfig {
    /// Cell edge length of the target grid.
    pub resolution: f64,

    /// Newton and ICP parameters. The ICP fields only matter with `use_icp`.
    pub params: IcpMatchParameters,

    /// Run ICP sub-iterations before every Newton step.
    pub use_icp: bool,
}

impl Default for NdtScanMatcherConfig {
    fn default() -> Self {
        Self {
            resolution: 1.0,
            params: IcpMatchParameters::default(),
            use_icp: false,
        }
    }
}

/// Builder for [`NdtScanMatcher`].
#[derive(Debug, Clone, Default)]
pub struct NdtScanMatcherBuilder {
    config: NdtScanMatcherConfig,
}

impl NdtScanMatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the grid resolution.
    pub fn resolution(mut self, resolution: f64) -> Self {
        self.config.resolution = resolution;
        self
    }

    /// Replace the Newton parameters, keeping the ICP ones.
    pub fn params(mut self, params: MatchParameters) -> Self {
        self.config.params.base = params;
        self
    }

    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.params.base.max_iterations = max_iterations;
        self
    }

    /// Set both convergence thresholds.
    pub fn epsilon(mut self, epsilon: f64) -> Self {
        self.config.params.base = self.config.params.base.with_eps(epsilon);
        self
    }

    pub fn alpha(mut self, alpha: f64) -> Self {
        self.config.params.base.alpha = alpha;
        self
    }

    pub fn use_icp(mut self, use_icp: bool) -> Self {
        self.config.use_icp = use_icp;
        self
    }

    /// Replace all parameters, including the ICP ones.
    pub fn icp_params(mut self, params: IcpMatchParameters) -> Self {
        self.config.params = params;
        self
    }

    pub fn build<M, const D: usize, const P: usize>(self) -> Result<NdtScanMatcher<M, D, P>>
    where
        M: Motion<D, P>,
    {
        NdtScanMatcher::with_config(self.config)
    }
}

enum Engine<M, const D: usize, const P: usize> {
    Ndt(NdtMatcher<M, D, P>),
    Icp(IcpNdtMatcher<M, D, P>),
}

/// NDT scan matcher.
///
/// Holds the target grid built by [`NdtScanMatcher::set_target`] and aligns
/// source scans to it.
pub struct NdtScanMatcher<M, const D: usize, const P: usize> {
    config: NdtScanMatcherConfig,
    target_grid: Option<Gridmap<D>>,
    engine: Engine<M, D, P>,
}

pub type NdtScanMatcher2d = NdtScanMatcher<Planar, 2, 3>;
pub type NdtScanMatcher3d = NdtScanMatcher<Spatial, 3, 6>;

impl<M: Motion<D, P>, const D: usize, const P: usize> NdtScanMatcher<M, D, P> {
    /// Matcher with default parameters and the given resolution.
    pub fn new(resolution: f64) -> Result<Self> {
        Self::with_config(NdtScanMatcherConfig {
            resolution,
            ..Default::default()
        })
    }

    pub fn with_config(config: NdtScanMatcherConfig) -> Result<Self> {
        GridConfig::<D>::uniform(config.resolution)
            .validate()
            .context("invalid target grid resolution")?;

        let engine = if config.use_icp {
            Engine::Icp(IcpNdtMatcher::new(config.params)?)
        } else {
            Engine::Ndt(NdtMatcher::new(config.params.base)?)
        };

        Ok(Self {
            config,
            target_grid: None,
            engine,
        })
    }

    pub fn builder() -> NdtScanMatcherBuilder {
        NdtScanMatcherBuilder::new()
    }

    pub fn config(&self) -> &NdtScanMatcherConfig {
        &self.config
    }

    pub fn has_target(&self) -> bool {
        self.target_grid.is_some()
    }

    pub fn target_grid(&self) -> Option<&Gridmap<D>> {
        self.target_grid.as_ref()
    }

    /// Build the target grid from map points, replacing any previous one.
    pub fn set_target(&mut self, points: &[SVector<f64, D>]) -> Result<()> {
        if points.is_empty() {
            bail!("Target point cloud is empty");
        }

        let mut grid = Gridmap::new(GridConfig::uniform(self.config.resolution))?;
        grid.insert_points(points);
        if grid.is_empty() {
            bail!("No bundles created from target points (all non-finite?)");
        }

        debug!(
            points = points.len(),
            bundles = grid.bundle_count(),
            cells = grid.cell_count(),
            "Target grid built"
        );
        self.target_grid = Some(grid);
        Ok(())
    }

    fn target(&self) -> Result<&Gridmap<D>> {
        self.target_grid
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No target set. Call set_target() first."))
    }

    fn source_cloud(points: &[SVector<f64, D>]) -> Result<PointCloud<D>> {
        if points.is_empty() {
            bail!("Source point cloud is empty");
        }
        Ok(PointCloud::from_points(points.to_vec()))
    }

    /// Align source points to the target, starting from `initial_guess`.
    pub fn align(
        &self,
        source_points: &[SVector<f64, D>],
        initial_guess: M::Transform,
    ) -> Result<MatchResult<M::Transform, P>> {
        let grid = self.target()?;
        let cloud = Self::source_cloud(source_points)?;
        Ok(match &self.engine {
            Engine::Ndt(matcher) => matcher.align(&cloud, grid, initial_guess),
            Engine::Icp(matcher) => matcher.align(&cloud, grid, initial_guess),
        })
    }

    /// Like [`NdtScanMatcher::align`], stopping between iterations once
    /// `cancel` is set.
    pub fn align_with_cancel(
        &self,
        source_points: &[SVector<f64, D>],
        initial_guess: M::Transform,
        cancel: &AtomicBool,
    ) -> Result<MatchResult<M::Transform, P>> {
        let grid = self.target()?;
        let cloud = Self::source_cloud(source_points)?;
        Ok(match &self.engine {
            Engine::Ndt(matcher) => {
                matcher.align_with_cancel(&cloud, grid, initial_guess, cancel)
            }
            Engine::Icp(matcher) => {
                matcher.align_with_cancel(&cloud, grid, initial_guess, cancel)
            }
        })
    }

    /// Total score of `source_points` under `transform`.
    pub fn score(
        &self,
        source_points: &[SVector<f64, D>],
        transform: &M::Transform,
    ) -> Result<f64> {
        let grid = self.target()?;
        let cloud = Self::source_cloud(source_points)?;
        let target = TargetBundles::new(grid);
        let (score, _) = compute_score::<M, _, D, P>(&cloud, &target, transform);
        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::ConvergenceStatus;
    use crate::test_utils::{make_blob_centers_2d, make_gaussian_blobs, transform_points};
    use nalgebra::{Isometry2, Vector2};

    fn scene() -> Vec<Vector2<f64>> {
        make_gaussian_blobs(&make_blob_centers_2d(4, 4, 2.0), 100, 0.2, 21)
    }

    #[test]
    fn test_builder() {
        let matcher: NdtScanMatcher2d = NdtScanMatcher2d::builder()
            .resolution(0.5)
            .max_iterations(50)
            .epsilon(1e-3)
            .use_icp(true)
            .build()
            .unwrap();

        assert_eq!(matcher.config().resolution, 0.5);
        assert_eq!(matcher.config().params.base.max_iterations, 50);
        assert_eq!(matcher.config().params.base.rot_eps, 1e-3);
        assert!(matcher.config().use_icp);
    }

    #[test]
    fn test_invalid_config() {
        assert!(NdtScanMatcher2d::new(0.0).is_err());
        assert!(NdtScanMatcher3d::builder()
            .max_iterations(0)
            .build::<Spatial, 3, 6>()
            .is_err());
    }

    #[test]
    fn test_set_target() {
        let mut matcher = NdtScanMatcher2d::new(1.0).unwrap();
        assert!(!matcher.has_target());

        matcher.set_target(&scene()).unwrap();
        assert!(matcher.has_target());
        assert!(matcher.target_grid().is_some_and(|g| !g.is_empty()));
    }

    #[test]
    fn test_set_target_empty() {
        let mut matcher = NdtScanMatcher2d::new(1.0).unwrap();
        assert!(matcher.set_target(&[]).is_err());
        assert!(matcher
            .set_target(&[Vector2::new(f64::NAN, 0.0)])
            .is_err());
        assert!(!matcher.has_target());
    }

    #[test]
    fn test_align_requires_target_and_source() {
        let mut matcher = NdtScanMatcher2d::new(1.0).unwrap();
        assert!(matcher.align(&scene(), Isometry2::identity()).is_err());

        matcher.set_target(&scene()).unwrap();
        assert!(matcher.align(&[], Isometry2::identity()).is_err());
    }

    #[test]
    fn test_align_and_score() {
        let map = scene();
        let truth = Isometry2::new(Vector2::new(0.1, -0.1), 0.02);
        let source = transform_points::<Planar, 2, 3>(&map, &truth.inverse());

        for use_icp in [false, true] {
            let mut matcher: NdtScanMatcher2d = NdtScanMatcher2d::builder()
                .max_iterations(100)
                .use_icp(use_icp)
                .build()
                .unwrap();
            matcher.set_target(&map).unwrap();

            let result = matcher.align(&source, Isometry2::identity()).unwrap();
            assert!(result.status.is_usable(), "use_icp = {use_icp}");
            let error = truth.inverse() * result.transform;
            assert!(error.translation.vector.norm() < 0.05, "use_icp = {use_icp}");

            let at_result = matcher.score(&source, &result.transform).unwrap();
            let at_start = matcher.score(&source, &Isometry2::identity()).unwrap();
            assert!(at_result > at_start);
        }
    }

    #[test]
    fn test_cancelled_align() {
        let mut matcher = NdtScanMatcher2d::new(1.0).unwrap();
        matcher.set_target(&scene()).unwrap();
        let cancel = AtomicBool::new(true);
        let result = matcher
            .align_with_cancel(&scene(), Isometry2::identity(), &cancel)
            .unwrap();
        assert_eq!(result.status, ConvergenceStatus::Cancelled);
    }
}
