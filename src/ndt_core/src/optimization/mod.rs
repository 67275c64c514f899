//! Newton-based optimization for NDT scan matching.
//!
//! The score is maximized over a rigid motion:
//! 1. Transform source points using the current estimate
//! 2. Compute derivatives (gradient + Hessian) against the target bundles
//! 3. Solve the Newton step `Δx = -H⁻¹g`, damped when `H` is not negative definite
//! 4. Backtrack along `Δx` until the score rises
//! 5. Update the estimate and check convergence
//!
//! [`IcpNdtMatcher`] runs ICP sub-iterations against the bundle means before
//! every Newton step.

pub mod icp;
pub mod line_search;
pub mod newton;
pub mod solver;
pub mod types;

pub use icp::{best_fit_transform, IcpNdtMatcher, IcpNdtMatcher2d, IcpNdtMatcher3d};
pub use line_search::{backtracking_line_search, LineSearchConfig, LineSearchResult};
pub use newton::{is_negative_definite, newton_step, StepKind};
pub use solver::{NdtMatcher, NdtMatcher2d, NdtMatcher3d, StepOutcome};
pub use types::{
    ConvergenceStatus, IcpMatchParameters, MatchParameters, MatchResult, MatchResult2d,
    MatchResult3d,
};
