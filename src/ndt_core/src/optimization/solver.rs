//! NDT optimization solver.
//!
//! Each iteration is a pure [`NdtMatcher::step`]:
//! 1. Transform source points with the current estimate
//! 2. Compute score, gradient and Hessian against the target bundles
//! 3. Solve the (possibly damped) Newton direction
//! 4. Backtrack along it, starting at `alpha`, until the score rises enough
//! 5. Compose the accepted step onto the estimate and check convergence
//!
//! The loop around it tracks the best estimate, honours cancellation and
//! assembles the [`MatchResult`].

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};

use nalgebra::{SMatrix, SVector};
use tracing::{debug, trace, warn};

use super::line_search::{backtracking_line_search, LineSearchConfig};
use super::newton::{newton_step, StepKind};
use super::types::{ConvergenceStatus, MatchParameters, MatchResult};
use crate::cloud::PointCloud;
use crate::derivatives::{
    compute_derivatives, compute_score, Motion, Planar, Spatial, TargetBundles,
};
use crate::error::ConfigError;
use crate::grid::{CellData, NdtGrid};

/// Everything one Newton iteration produced.
#[derive(Debug, Clone)]
pub struct StepOutcome<T, const P: usize> {
    /// Estimate after applying `delta`.
    pub transform: T,

    /// Score at the input estimate.
    pub score: f64,

    /// Score at `transform`. Never below `score`.
    pub next_score: f64,

    pub gradient: SVector<f64, P>,

    pub hessian: SMatrix<f64, P, P>,

    /// Unscaled Newton (or fallback) direction.
    pub direction: SVector<f64, P>,

    /// Accepted step length along `direction`, 0 if none was accepted.
    pub step_length: f64,

    /// Applied increment, `direction * step_length`.
    pub delta: SVector<f64, P>,

    pub kind: StepKind,

    pub num_correspondences: usize,

    /// The full step `direction * alpha` is below both thresholds, or no
    /// step along `direction` raises the score.
    pub converged: bool,
}

/// Newton-Raphson NDT scan matcher.
#[derive(Debug, Clone)]
pub struct NdtMatcher<M, const D: usize, const P: usize> {
    params: MatchParameters,
    line_search: LineSearchConfig,
    _motion: PhantomData<fn() -> M>,
}

pub type NdtMatcher2d = NdtMatcher<Planar, 2, 3>;
pub type NdtMatcher3d = NdtMatcher<Spatial, 3, 6>;

impl<M: Motion<D, P>, const D: usize, const P: usize> NdtMatcher<M, D, P> {
    pub fn new(params: MatchParameters) -> Result<Self, ConfigError> {
        params.validate()?;
        Ok(Self {
            params,
            line_search: LineSearchConfig::default(),
            _motion: PhantomData,
        })
    }

    /// Replace the backtracking parameters.
    pub fn with_line_search(mut self, config: LineSearchConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        self.line_search = config;
        Ok(self)
    }

    pub fn params(&self) -> &MatchParameters {
        &self.params
    }

    pub fn line_search(&self) -> &LineSearchConfig {
        &self.line_search
    }

    /// Align `cloud` to `grid`, starting from `initial`.
    ///
    /// The returned transform maps source points into the grid frame.
    pub fn align<C: CellData<D>>(
        &self,
        cloud: &PointCloud<D>,
        grid: &NdtGrid<C, D>,
        initial: M::Transform,
    ) -> MatchResult<M::Transform, P> {
        let target = TargetBundles::new(grid);
        self.run(cloud, &target, initial, None, |transform| *transform)
    }

    /// Like [`NdtMatcher::align`], but stops between iterations once `cancel`
    /// is set.
    pub fn align_with_cancel<C: CellData<D>>(
        &self,
        cloud: &PointCloud<D>,
        grid: &NdtGrid<C, D>,
        initial: M::Transform,
        cancel: &AtomicBool,
    ) -> MatchResult<M::Transform, P> {
        let target = TargetBundles::new(grid);
        self.run(cloud, &target, initial, Some(cancel), |transform| *transform)
    }

    fn below_thresholds(&self, step: &SVector<f64, P>) -> bool {
        step.rows(0, D).norm() < self.params.trans_eps
            && step.rows(D, P - D).norm() < self.params.rot_eps
    }

    /// One Newton iteration at `transform`.
    pub fn step<C: CellData<D>>(
        &self,
        cloud: &PointCloud<D>,
        target: &TargetBundles<'_, C, D>,
        transform: &M::Transform,
    ) -> StepOutcome<M::Transform, P> {
        let derivatives = compute_derivatives::<M, C, D, P>(cloud, target, transform);
        let (direction, kind) = newton_step(
            &derivatives.gradient,
            &derivatives.hessian,
            self.params.step_adjustment_retries,
        );

        let (step_length, next_score) = if kind == StepKind::Invalid {
            (0.0, derivatives.score)
        } else {
            let search = backtracking_line_search(
                |t| {
                    let candidate = M::compose(&M::increment(&(direction * t)), transform);
                    compute_score::<M, C, D, P>(cloud, target, &candidate).0
                },
                derivatives.score,
                derivatives.gradient.dot(&direction),
                self.params.alpha,
                &self.line_search,
            );
            (search.step_length, search.score)
        };

        let delta = direction * step_length;
        let converged = kind != StepKind::Invalid
            && (step_length == 0.0 || self.below_thresholds(&(direction * self.params.alpha)));

        StepOutcome {
            transform: M::compose(&M::increment(&delta), transform),
            score: derivatives.score,
            next_score,
            gradient: derivatives.gradient,
            hessian: derivatives.hessian,
            direction,
            step_length,
            delta,
            kind,
            num_correspondences: derivatives.num_correspondences,
            converged,
        }
    }

    /// Optimization loop shared by the plain and ICP-hybrid matchers.
    ///
    /// `before_step` may move the estimate before every Newton step.
    pub(crate) fn run<C, F>(
        &self,
        cloud: &PointCloud<D>,
        target: &TargetBundles<'_, C, D>,
        initial: M::Transform,
        cancel: Option<&AtomicBool>,
        mut before_step: F,
    ) -> MatchResult<M::Transform, P>
    where
        C: CellData<D>,
        F: FnMut(&M::Transform) -> M::Transform,
    {
        let valid_count = cloud.valid_count();
        debug!(
            valid_points = valid_count,
            bundles = target.grid().bundle_count(),
            max_iterations = self.params.max_iterations,
            "Starting NDT match"
        );

        let mut transform = initial;
        let mut best: Option<(f64, M::Transform)> = None;
        let mut last_hessian = SMatrix::<f64, P, P>::zeros();
        let mut status = ConvergenceStatus::MaxIterations;
        let mut iterations = 0;

        for iteration in 0..self.params.max_iterations {
            if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                debug!(iteration, "NDT match cancelled");
                status = ConvergenceStatus::Cancelled;
                break;
            }

            transform = before_step(&transform);
            let outcome = self.step(cloud, target, &transform);

            if outcome.num_correspondences == 0 {
                if iteration == 0 {
                    debug!("No source point matched the target");
                    return MatchResult::no_correspondences(initial);
                }
                warn!(iteration, "Lost all correspondences, keeping best estimate");
                status = ConvergenceStatus::NoCorrespondences;
                break;
            }

            iterations = iteration + 1;
            last_hessian = outcome.hessian;

            trace!(
                iteration,
                score = outcome.score,
                next_score = outcome.next_score,
                correspondences = outcome.num_correspondences,
                step_length = outcome.step_length,
                step_norm = outcome.delta.norm(),
                kind = ?outcome.kind,
                "NDT iteration"
            );

            match outcome.kind {
                StepKind::Gradient { lambda } => {
                    warn!(
                        iteration,
                        lambda, "Hessian not negative definite, using gradient step"
                    );
                }
                StepKind::Invalid => {
                    warn!(iteration, "Non-finite derivatives, stopping");
                    status = ConvergenceStatus::Diverged;
                    break;
                }
                StepKind::Newton | StepKind::Damped { .. } => {}
            }
            if outcome.step_length == 0.0 {
                debug!(iteration, "No ascent along the Newton direction");
            }

            transform = outcome.transform;
            if best.map_or(true, |(score, _)| outcome.next_score > score) {
                best = Some((outcome.next_score, transform));
            }
            if outcome.converged {
                status = ConvergenceStatus::Converged;
                break;
            }
        }

        let (mut score, mut num_correspondences) =
            compute_score::<M, C, D, P>(cloud, target, &transform);

        // `before_step` may lower the score, so the last estimate is not
        // necessarily the best one.
        if let Some((best_score, best_transform)) = best {
            if best_score > score {
                transform = best_transform;
                (score, num_correspondences) =
                    compute_score::<M, C, D, P>(cloud, target, &transform);
            }
        }

        let score_per_point = if valid_count > 0 {
            score / valid_count as f64
        } else {
            0.0
        };

        debug!(
            ?status,
            iterations,
            score,
            score_per_point,
            correspondences = num_correspondences,
            "NDT match finished"
        );

        MatchResult {
            transform,
            score,
            score_per_point,
            converged: status.is_converged(),
            status,
            iterations,
            hessian: last_hessian,
            num_correspondences,
        }
    }
}
