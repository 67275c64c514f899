//! Type definitions for NDT optimization.

use nalgebra::{Isometry2, Isometry3, SMatrix};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn positive_finite(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidParameter {
            name,
            reason: format!("must be finite and positive, got {value}"),
        })
    }
}

/// Newton-Raphson matcher configuration.
///
/// Deserialization fills missing fields from [`Default`] and does not
/// validate; matchers call [`MatchParameters::validate`] when built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchParameters {
    /// Maximum number of Newton iterations.
    pub max_iterations: usize,

    /// Convergence threshold on the norm of the rotational step.
    pub rot_eps: f64,

    /// Convergence threshold on the norm of the translational step.
    pub trans_eps: f64,

    /// How many times Levenberg damping is increased before falling back to
    /// a damped gradient step.
    pub step_adjustment_retries: usize,

    /// Scale applied to every accepted step.
    pub alpha: f64,
}

impl Default for MatchParameters {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            rot_eps: 1e-4,
            trans_eps: 1e-4,
            step_adjustment_retries: 5,
            alpha: 1.0,
        }
    }
}

impl MatchParameters {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_rot_eps(mut self, rot_eps: f64) -> Self {
        self.rot_eps = rot_eps;
        self
    }

    pub fn with_trans_eps(mut self, trans_eps: f64) -> Self {
        self.trans_eps = trans_eps;
        self
    }

    /// Set both convergence thresholds.
    pub fn with_eps(self, eps: f64) -> Self {
        self.with_rot_eps(eps).with_trans_eps(eps)
    }

    pub fn with_step_adjustment_retries(mut self, retries: usize) -> Self {
        self.step_adjustment_retries = retries;
        self
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::ZeroIterations);
        }
        positive_finite("rot_eps", self.rot_eps)?;
        positive_finite("trans_eps", self.trans_eps)?;
        positive_finite("alpha", self.alpha)
    }
}

/// Matcher configuration with the ICP pre-alignment stage.
///
/// Serialized flat: the [`MatchParameters`] fields sit next to the ICP ones.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcpMatchParameters {
    #[serde(flatten)]
    pub base: MatchParameters,

    /// ICP sub-iterations before every Newton step.
    pub icp_max_iterations: usize,

    /// Minimum fraction of valid points that must find a correspondence.
    pub icp_min_assigned_points: f64,

    /// Correspondences at this distance or farther are rejected.
    pub icp_max_distance: f64,
}

impl Default for IcpMatchParameters {
    fn default() -> Self {
        Self {
            base: MatchParameters::default(),
            icp_max_iterations: 50,
            icp_min_assigned_points: 0.75,
            icp_max_distance: 0.5,
        }
    }
}

impl IcpMatchParameters {
    pub fn new(base: MatchParameters) -> Self {
        Self {
            base,
            ..Default::default()
        }
    }

    pub fn with_icp_max_iterations(mut self, iterations: usize) -> Self {
        self.icp_max_iterations = iterations;
        self
    }

    pub fn with_icp_min_assigned_points(mut self, fraction: f64) -> Self {
        self.icp_min_assigned_points = fraction;
        self
    }

    pub fn with_icp_max_distance(mut self, distance: f64) -> Self {
        self.icp_max_distance = distance;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base.validate()?;
        if !(0.0..=1.0).contains(&self.icp_min_assigned_points) {
            return Err(ConfigError::InvalidParameter {
                name: "icp_min_assigned_points",
                reason: format!("must be in [0, 1], got {}", self.icp_min_assigned_points),
            });
        }
        positive_finite("icp_max_distance", self.icp_max_distance)
    }
}

/// Why the optimization stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceStatus {
    /// Step norms fell below both thresholds.
    Converged,

    /// Reached `max_iterations`; the best estimate seen is returned.
    MaxIterations,

    /// No valid point scored against the target in the first iteration.
    NoCorrespondences,

    /// Stopped by the cancellation flag.
    Cancelled,

    /// Derivatives became non-finite; the best estimate seen is returned.
    Diverged,
}

impl ConvergenceStatus {
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceStatus::Converged)
    }

    /// Converged or ran out of iterations with a best estimate.
    pub fn is_usable(&self) -> bool {
        matches!(
            self,
            ConvergenceStatus::Converged | ConvergenceStatus::MaxIterations
        )
    }
}

/// Result of a scan match.
#[derive(Debug, Clone)]
pub struct MatchResult<T, const P: usize> {
    /// Final transform, mapping source points into the target frame.
    pub transform: T,

    /// Score at `transform`.
    pub score: f64,

    /// `score` divided by the number of valid source points.
    pub score_per_point: f64,

    pub converged: bool,

    pub status: ConvergenceStatus,

    /// Newton iterations performed.
    pub iterations: usize,

    /// Last Hessian computed.
    pub hessian: SMatrix<f64, P, P>,

    /// Points that contribute a non-zero score at `transform`.
    pub num_correspondences: usize,
}

pub type MatchResult2d = MatchResult<Isometry2<f64>, 3>;
pub type MatchResult3d = MatchResult<Isometry3<f64>, 6>;

impl<T, const P: usize> MatchResult<T, P> {
    /// Result returned when nothing in the source matched the target.
    pub fn no_correspondences(initial: T) -> Self {
        Self {
            transform: initial,
            score: 0.0,
            score_per_point: 0.0,
            converged: false,
            status: ConvergenceStatus::NoCorrespondences,
            iterations: 0,
            hessian: SMatrix::zeros(),
            num_correspondences: 0,
        }
    }
}
