//! Score, gradient and Hessian of the NDT likelihood.
//!
//! For a transformed point `y` with bundle mean `μ` and inverse covariance
//! `Σ⁻¹`, let `q = y - μ` and `s = exp(-½ qᵀΣ⁻¹q)`. With `Jᵢ` and `Hᵢⱼ` the
//! first and second derivatives of `y` with respect to the motion parameters:
//!
//! - score: `s`
//! - gradient: `gᵢ = -s (qᵀΣ⁻¹Jᵢ)`
//! - Hessian: `Hᵢⱼ = s [(qᵀΣ⁻¹Jᵢ)(qᵀΣ⁻¹Jⱼ) - Jⱼᵀ Σ⁻¹ Jᵢ - qᵀΣ⁻¹Hᵢⱼ]`

use nalgebra::{SMatrix, SVector};
use rayon::prelude::*;

use super::motion::Motion;
use super::target::TargetBundles;
use super::types::{AggregatedDerivatives, DerivativeResult, PointDerivatives};
use crate::cloud::PointCloud;
use crate::grid::CellData;

/// Contribution of one point, or `None` if its score is zero or not finite.
pub fn compute_derivative_single<const D: usize, const P: usize>(
    q: &SVector<f64, D>,
    inverse_covariance: &SMatrix<f64, D, D>,
    point_derivatives: &PointDerivatives<D, P>,
) -> Option<DerivativeResult<P>> {
    let q_inv = inverse_covariance * q;
    let score = (-0.5 * q.dot(&q_inv)).exp();
    if !(score > 0.0 && score.is_finite()) {
        return None;
    }

    let jacobian = &point_derivatives.jacobian;
    // (qᵀΣ⁻¹Jᵢ) for every parameter.
    let q_inv_j: SVector<f64, P> = jacobian.transpose() * q_inv;
    let j_inv_j: SMatrix<f64, P, P> = jacobian.transpose() * inverse_covariance * jacobian;

    let mut hessian = q_inv_j * q_inv_j.transpose() - j_inv_j;
    for (i, row) in point_derivatives.second.iter().enumerate() {
        for (j, second) in row.iter().enumerate() {
            hessian[(i, j)] -= q_inv.dot(second);
        }
    }

    Some(DerivativeResult {
        score,
        gradient: -q_inv_j * score,
        hessian: hessian * score,
    })
}

/// Score and derivatives of `cloud` under `transform` against `target`.
///
/// Points outside the map or in empty or degenerate bundles contribute
/// nothing.
pub fn compute_derivatives<M, C, const D: usize, const P: usize>(
    cloud: &PointCloud<D>,
    target: &TargetBundles<'_, C, D>,
    transform: &M::Transform,
) -> AggregatedDerivatives<P>
where
    M: Motion<D, P>,
    C: CellData<D>,
{
    cloud
        .par_valid_points()
        .filter_map(|point| {
            let y = M::transform_point(transform, point);
            let gaussian = target.lookup(&y)?;
            let q = y - gaussian.mean;
            compute_derivative_single(&q, &gaussian.inverse_covariance, &M::point_derivatives(&y))
        })
        .fold(AggregatedDerivatives::zeros, |mut acc, result| {
            acc.add(&result);
            acc
        })
        .reduce(AggregatedDerivatives::zeros, |mut left, right| {
            left.merge(&right);
            left
        })
}

/// Total score and number of contributing points, without derivatives.
pub fn compute_score<M, C, const D: usize, const P: usize>(
    cloud: &PointCloud<D>,
    target: &TargetBundles<'_, C, D>,
    transform: &M::Transform,
) -> (f64, usize)
where
    M: Motion<D, P>,
    C: CellData<D>,
{
    cloud
        .par_valid_points()
        .filter_map(|point| {
            let y = M::transform_point(transform, point);
            let gaussian = target.lookup(&y)?;
            let q = y - gaussian.mean;
            let score = (-0.5 * q.dot(&(gaussian.inverse_covariance * q))).exp();
            (score > 0.0 && score.is_finite()).then_some(score)
        })
        .map(|score| (score, 1))
        .reduce(|| (0.0, 0), |(s1, n1), (s2, n2)| (s1 + s2, n1 + n2))
}
