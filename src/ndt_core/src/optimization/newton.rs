//! Newton step computation for NDT optimization.
//!
//! The score is maximized, so the Newton step `Δ = -H⁻¹g` is only an ascent
//! step when `H` is negative definite. That is checked with a Cholesky
//! factorization of `-H`. Otherwise Levenberg damping `H - λI` is tried with
//! growing `λ`, and as a last resort the damped gradient `g / λ` is used.

use nalgebra::{SMatrix, SVector};

/// Initial damping relative to the largest diagonal magnitude of `H`.
pub const INITIAL_DAMPING_RATIO: f64 = 1e-3;

/// Damping growth per retry.
pub const DAMPING_GROWTH: f64 = 10.0;

/// How a step was obtained.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepKind {
    /// Plain Newton step.
    Newton,

    /// Newton step on `H - λI`.
    Damped { lambda: f64 },

    /// `g / λ` after every damping retry failed.
    Gradient { lambda: f64 },

    /// Gradient or Hessian was not finite; no step taken.
    Invalid,
}

/// Solve `(-H) Δ = g` if `-H` is positive definite.
fn solve_negative_definite<const P: usize>(
    gradient: &SVector<f64, P>,
    hessian: &SMatrix<f64, P, P>,
) -> Option<SVector<f64, P>> {
    let negated = -hessian;
    negated.cholesky().map(|chol| chol.solve(gradient))
}

/// Check if a matrix is negative definite by attempting Cholesky on its negation.
pub fn is_negative_definite<const P: usize>(matrix: &SMatrix<f64, P, P>) -> bool {
    (-matrix).cholesky().is_some()
}

/// Compute the ascent step for gradient `g` and Hessian `H`.
///
/// The returned step is not scaled by `alpha`.
pub fn newton_step<const P: usize>(
    gradient: &SVector<f64, P>,
    hessian: &SMatrix<f64, P, P>,
    retries: usize,
) -> (SVector<f64, P>, StepKind) {
    if !(gradient.iter().all(|v| v.is_finite()) && hessian.iter().all(|v| v.is_finite())) {
        return (SVector::zeros(), StepKind::Invalid);
    }

    if let Some(delta) = solve_negative_definite(gradient, hessian) {
        return (delta, StepKind::Newton);
    }

    let max_diagonal = hessian.diagonal().iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    let mut lambda = INITIAL_DAMPING_RATIO * max_diagonal.max(1e-9);
    let identity = SMatrix::<f64, P, P>::identity();

    for attempt in 0..retries {
        if attempt > 0 {
            lambda *= DAMPING_GROWTH;
        }
        let damped = hessian - identity * lambda;
        if let Some(delta) = solve_negative_definite(gradient, &damped) {
            return (delta, StepKind::Damped { lambda });
        }
    }

    (gradient / lambda, StepKind::Gradient { lambda })
}
