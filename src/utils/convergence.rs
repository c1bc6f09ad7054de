//! Convergence tracking & tolerance checks for iterative solvers.

/// Stopping criteria: stop once `‖r‖ <= max(rtol·‖r₀‖, atol)` or after
/// `max_iters` iterations.
#[derive(Clone, Copy, Debug)]
pub struct Convergence {
    pub rtol: f64,
    pub atol: f64,
    pub max_iters: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SolveStats {
    pub iterations: usize,
    pub final_residual: f64,
    pub converged: bool,
}

impl Convergence {
    pub fn new(rtol: f64, atol: f64, max_iters: usize) -> Self {
        Self { rtol, atol, max_iters }
    }

    /// Residual norm that counts as converged.
    pub fn target(&self, res0_norm: f64) -> f64 {
        (self.rtol * res0_norm).max(self.atol)
    }

    /// Returns (should_stop, stats) given current `res_norm` and iteration `i`.
    pub fn check(&self, res_norm: f64, res0_norm: f64, i: usize) -> (bool, SolveStats) {
        let converged = res_norm <= self.target(res0_norm);
        (
            converged || i >= self.max_iters,
            SolveStats { iterations: i, final_residual: res_norm, converged },
        )
    }
}
