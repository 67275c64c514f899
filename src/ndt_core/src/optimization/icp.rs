//! ICP pre-alignment in front of every Newton step.
//!
//! Correspondences pair each transformed source point with the nearest
//! combined bundle mean of the target. The best-fit rigid motion of those
//! pairs is the Kabsch solution from the SVD of their cross-covariance.

use std::sync::atomic::AtomicBool;

use nalgebra::{DMatrix, SMatrix, SVector};
use rayon::prelude::*;
use tracing::{debug, trace};

use super::solver::NdtMatcher;
use super::types::{IcpMatchParameters, MatchResult};
use crate::cloud::PointCloud;
use crate::derivatives::{Motion, Planar, Spatial, TargetBundles};
use crate::error::ConfigError;
use crate::grid::{BundleMeanIndex, CellData, NdtGrid};

/// Rigid transform mapping `pairs[i].0` onto `pairs[i].1` in the least
/// squares sense. `None` without pairs or if the SVD fails.
pub fn best_fit_transform<M, const D: usize, const P: usize>(
    pairs: &[(SVector<f64, D>, SVector<f64, D>)],
) -> Option<M::Transform>
where
    M: Motion<D, P>,
{
    if pairs.is_empty() {
        return None;
    }

    let n = pairs.len() as f64;
    let (src_sum, tgt_sum) = pairs.iter().fold(
        (SVector::<f64, D>::zeros(), SVector::<f64, D>::zeros()),
        |(s, t), (src, tgt)| (s + src, t + tgt),
    );
    let src_centroid = src_sum / n;
    let tgt_centroid = tgt_sum / n;

    let mut h = SMatrix::<f64, D, D>::zeros();
    for (src, tgt) in pairs {
        h += (src - src_centroid) * (tgt - tgt_centroid).transpose();
    }

    let svd = DMatrix::from_iterator(D, D, h.iter().copied()).svd(true, true);
    let u = svd.u?;
    let mut v_t = svd.v_t?;

    // Reflection: flip the axis of the smallest singular value.
    if (v_t.transpose() * u.transpose()).determinant() < 0.0 {
        let last = D - 1;
        for k in 0..D {
            v_t[(last, k)] = -v_t[(last, k)];
        }
    }

    let rotation = v_t.transpose() * u.transpose();
    let rotation = SMatrix::<f64, D, D>::from_iterator(rotation.iter().copied());
    let translation = tgt_centroid - rotation * src_centroid;
    Some(M::from_rotation_translation(&rotation, &translation))
}

/// NDT matcher with ICP sub-iterations before every Newton step.
#[derive(Debug, Clone)]
pub struct IcpNdtMatcher<M, const D: usize, const P: usize> {
    params: IcpMatchParameters,
    ndt: NdtMatcher<M, D, P>,
}

pub type IcpNdtMatcher2d = IcpNdtMatcher<Planar, 2, 3>;
pub type IcpNdtMatcher3d = IcpNdtMatcher<Spatial, 3, 6>;

impl<M: Motion<D, P>, const D: usize, const P: usize> IcpNdtMatcher<M, D, P> {
    pub fn new(params: IcpMatchParameters) -> Result<Self, ConfigError> {
        params.validate()?;
        Ok(Self {
            params,
            ndt: NdtMatcher::new(params.base)?,
        })
    }

    pub fn params(&self) -> &IcpMatchParameters {
        &self.params
    }

    pub fn align<C: CellData<D>>(
        &self,
        cloud: &PointCloud<D>,
        grid: &NdtGrid<C, D>,
        initial: M::Transform,
    ) -> MatchResult<M::Transform, P> {
        self.run(cloud, grid, initial, None)
    }

    pub fn align_with_cancel<C: CellData<D>>(
        &self,
        cloud: &PointCloud<D>,
        grid: &NdtGrid<C, D>,
        initial: M::Transform,
        cancel: &AtomicBool,
    ) -> MatchResult<M::Transform, P> {
        self.run(cloud, grid, initial, Some(cancel))
    }

    fn run<C: CellData<D>>(
        &self,
        cloud: &PointCloud<D>,
        grid: &NdtGrid<C, D>,
        initial: M::Transform,
        cancel: Option<&AtomicBool>,
    ) -> MatchResult<M::Transform, P> {
        let target = TargetBundles::new(grid);
        let Some(index) = BundleMeanIndex::from_grid(grid) else {
            debug!("Target has no bundle means, running plain NDT");
            return self.ndt.run(cloud, &target, initial, cancel, |transform| *transform);
        };
        self.ndt.run(cloud, &target, initial, cancel, |transform| {
            self.refine(cloud, &index, transform)
        })
    }

    /// Run the ICP sub-iterations from `transform`.
    ///
    /// Stops early when too few points find a mean within
    /// `icp_max_distance` or when the increment falls below the epsilons.
    pub fn refine(
        &self,
        cloud: &PointCloud<D>,
        index: &BundleMeanIndex<D>,
        transform: &M::Transform,
    ) -> M::Transform {
        let valid_count = cloud.valid_count();
        let mut current = *transform;
        if valid_count == 0 {
            return current;
        }

        let required = self.params.icp_min_assigned_points * valid_count as f64;
        for iteration in 0..self.params.icp_max_iterations {
            let pairs: Vec<_> = cloud
                .par_valid_points()
                .filter_map(|point| {
                    let y = M::transform_point(&current, point);
                    index
                        .nearest_within(&y, self.params.icp_max_distance)
                        .map(|mean| (y, mean))
                })
                .collect();

            if (pairs.len() as f64) < required {
                trace!(
                    iteration,
                    assigned = pairs.len(),
                    valid = valid_count,
                    "Too few ICP correspondences"
                );
                break;
            }

            let Some(increment) = best_fit_transform::<M, D, P>(&pairs) else {
                break;
            };
            current = M::compose(&increment, &current);

            let delta = M::parameters(&increment);
            if delta.rows(0, D).norm() < self.params.base.trans_eps
                && delta.rows(D, P - D).norm() < self.params.base.rot_eps
            {
                trace!(iteration, "ICP increment below thresholds");
                break;
            }
        }
        current
    }
}
