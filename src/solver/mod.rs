//! Krylov solver interface.

use crate::core::{LinearOperator, Scalar};
use crate::error::KError;
use crate::preconditioner::Preconditioner;
use crate::utils::convergence::SolveStats;

/// Common interface for iterative solvers over a [`LinearOperator`].
pub trait LinearSolver<T: Scalar> {
    /// Solve A·x = b, writing result into `x` (which also holds the initial guess).
    ///
    /// Non-convergence is reported through [`SolveStats::converged`], not as
    /// an error.
    fn solve(
        &mut self,
        a: &mut dyn LinearOperator<T>,
        pc: Option<&mut dyn Preconditioner<T>>,
        b: &[T],
        x: &mut [T],
    ) -> Result<SolveStats, KError>;
}

pub mod gmres;
pub use gmres::GmresSolver;
