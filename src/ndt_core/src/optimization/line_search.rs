//! Backtracking line search along a Newton direction.
//!
//! The score is maximized, so a step length `t` is accepted once the
//! Armijo condition `f(x + t·d) ≥ f(x) + c₁·t·gᵀd` holds. Otherwise `t` is
//! shrunk geometrically. Far from the optimum the bundle Gaussians are not
//! concave and a full Newton step overshoots; the search keeps every
//! accepted step from lowering the score.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Backtracking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineSearchConfig {
    /// Sufficient increase parameter `c₁`.
    pub c1: f64,

    /// Factor applied to `t` after every rejected trial, in (0, 1).
    pub shrink: f64,

    /// Trials before giving up.
    pub max_trials: usize,
}

impl Default for LineSearchConfig {
    fn default() -> Self {
        Self {
            c1: 1e-4,
            shrink: 0.5,
            max_trials: 20,
        }
    }
}

impl LineSearchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.c1.is_finite() && self.c1 > 0.0 && self.c1 < 1.0) {
            return Err(ConfigError::InvalidParameter {
                name: "c1",
                reason: format!("must be in (0, 1), got {}", self.c1),
            });
        }
        if !(self.shrink > 0.0 && self.shrink < 1.0) {
            return Err(ConfigError::InvalidParameter {
                name: "shrink",
                reason: format!("must be in (0, 1), got {}", self.shrink),
            });
        }
        if self.max_trials == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "max_trials",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Outcome of a line search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSearchResult {
    /// Accepted step length, 0 when no trial was accepted.
    pub step_length: f64,

    /// Score at the accepted step, or the initial score.
    pub score: f64,

    /// Number of score evaluations.
    pub evaluations: usize,
}

impl LineSearchResult {
    pub fn accepted(&self) -> bool {
        self.step_length > 0.0
    }

    fn rejected(initial_score: f64, evaluations: usize) -> Self {
        Self {
            step_length: 0.0,
            score: initial_score,
            evaluations,
        }
    }
}

/// Armijo condition for maximization.
pub fn armijo_condition(
    new_score: f64,
    initial_score: f64,
    step_length: f64,
    initial_derivative: f64,
    c1: f64,
) -> bool {
    new_score >= initial_score + c1 * step_length * initial_derivative
}

/// Search `t ∈ {t₀, t₀·shrink, t₀·shrink², …}` for the first step length
/// satisfying the Armijo condition.
///
/// `score_at(t)` evaluates the objective at `x + t·d` and
/// `initial_derivative` is `gᵀd`. A direction that is not an ascent
/// direction is rejected without evaluating anything.
pub fn backtracking_line_search<F>(
    mut score_at: F,
    initial_score: f64,
    initial_derivative: f64,
    initial_step: f64,
    config: &LineSearchConfig,
) -> LineSearchResult
where
    F: FnMut(f64) -> f64,
{
    if !(initial_derivative > 0.0 && initial_derivative.is_finite()) {
        return LineSearchResult::rejected(initial_score, 0);
    }

    let mut step_length = initial_step;
    for trial in 0..config.max_trials {
        let score = score_at(step_length);
        if score.is_finite()
            && armijo_condition(score, initial_score, step_length, initial_derivative, config.c1)
        {
            return LineSearchResult {
                step_length,
                score,
                evaluations: trial + 1,
            };
        }
        step_length *= config.shrink;
    }

    LineSearchResult::rejected(initial_score, config.max_trials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// `f(t) = exp(-(x0 + t·d - 1)² / 2σ²)` with the optimum at `x = 1`.
    fn gaussian(x0: f64, d: f64, sigma: f64) -> impl Fn(f64) -> f64 {
        move |t| {
            let q = x0 + t * d - 1.0;
            (-0.5 * q * q / (sigma * sigma)).exp()
        }
    }

    #[test]
    fn test_accepts_full_step_when_it_improves() {
        let f = gaussian(0.9, 0.1, 0.2);
        let result = backtracking_line_search(&f, f(0.0), 1.0, 1.0, &LineSearchConfig::default());
        assert!(result.accepted());
        assert_eq!(result.step_length, 1.0);
        assert_eq!(result.evaluations, 1);
        assert_relative_eq!(result.score, 1.0);
    }

    #[test]
    fn test_shrinks_overshooting_step() {
        // Starting one sigma away, a step of 2.15 lands beyond the optimum
        // at a lower score than the start.
        let f = gaussian(0.8, 2.15, 0.2);
        assert!(f(1.0) < f(0.0));

        let derivative = 2.15 * 0.2 / (0.2 * 0.2) * f(0.0);
        let result =
            backtracking_line_search(&f, f(0.0), derivative, 1.0, &LineSearchConfig::default());
        assert!(result.accepted());
        assert_eq!(result.step_length, 0.125);
        assert!(result.score > f(0.0));
    }

    #[test]
    fn test_initial_step_is_respected() {
        let f = gaussian(0.9, 0.1, 0.2);
        let result = backtracking_line_search(&f, f(0.0), 1.0, 0.5, &LineSearchConfig::default());
        assert_eq!(result.step_length, 0.5);
    }

    #[test]
    fn test_rejects_descent_direction() {
        let mut calls = 0;
        let result = backtracking_line_search(
            |_| {
                calls += 1;
                0.0
            },
            1.0,
            -1.0,
            1.0,
            &LineSearchConfig::default(),
        );
        assert!(!result.accepted());
        assert_eq!(result.score, 1.0);
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_gives_up_after_max_trials() {
        let config = LineSearchConfig {
            max_trials: 3,
            ..Default::default()
        };
        let result = backtracking_line_search(|_| 0.0, 1.0, 1.0, 1.0, &config);
        assert!(!result.accepted());
        assert_eq!(result.evaluations, 3);
    }

    #[test]
    fn test_config_validation() {
        assert!(LineSearchConfig::default().validate().is_ok());
        let bad = LineSearchConfig {
            shrink: 1.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = LineSearchConfig {
            max_trials: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
