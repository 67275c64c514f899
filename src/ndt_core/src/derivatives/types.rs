//! Type definitions for NDT derivative computation.

use nalgebra::{SMatrix, SVector};

/// Derivatives of a transformed point with respect to the motion parameters.
#[derive(Debug, Clone)]
pub struct PointDerivatives<const D: usize, const P: usize> {
    /// `∂y/∂x`, one column per parameter.
    pub jacobian: SMatrix<f64, D, P>,

    /// `∂²y/∂xᵢ∂xⱼ` stored as `second[i][j]`.
    pub second: [[SVector<f64, D>; P]; P],
}

impl<const D: usize, const P: usize> PointDerivatives<D, P> {
    pub fn zeros() -> Self {
        Self {
            jacobian: SMatrix::zeros(),
            second: [[SVector::zeros(); P]; P],
        }
    }
}

/// Contribution of a single point to the score and its derivatives.
#[derive(Debug, Clone)]
pub struct DerivativeResult<const P: usize> {
    /// `exp(-½ qᵀΣ⁻¹q)`.
    pub score: f64,

    pub gradient: SVector<f64, P>,

    pub hessian: SMatrix<f64, P, P>,
}

/// Derivatives summed over a whole point cloud.
#[derive(Debug, Clone)]
pub struct AggregatedDerivatives<const P: usize> {
    /// Total score.
    pub score: f64,

    pub gradient: SVector<f64, P>,

    pub hessian: SMatrix<f64, P, P>,

    /// Points that contributed a non-zero score.
    pub num_correspondences: usize,
}

impl<const P: usize> AggregatedDerivatives<P> {
    pub fn zeros() -> Self {
        Self {
            score: 0.0,
            gradient: SVector::zeros(),
            hessian: SMatrix::zeros(),
            num_correspondences: 0,
        }
    }

    /// Add a single point's contribution.
    pub fn add(&mut self, result: &DerivativeResult<P>) {
        self.score += result.score;
        self.gradient += result.gradient;
        self.hessian += result.hessian;
        self.num_correspondences += 1;
    }

    /// Add a partial sum.
    pub fn merge(&mut self, other: &AggregatedDerivatives<P>) {
        self.score += other.score;
        self.gradient += other.gradient;
        self.hessian += other.hessian;
        self.num_correspondences += other.num_correspondences;
    }
}

impl<const P: usize> Default for AggregatedDerivatives<P> {
    fn default() -> Self {
        Self::zeros()
    }
}
