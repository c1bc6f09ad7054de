//! Flexible restarted GMRES (Saad §6.4, §9.4)
//!
//! This module implements restarted GMRES with right preconditioning in its
//! flexible form: the preconditioned directions `z_j = M_j⁻¹ v_j` are stored
//! and the solution is updated with them, so the preconditioner may change
//! between iterations (an inner Krylov solve, for instance). All inner
//! products are global: partial sums are reduced over the communicator, so
//! every rank takes identical decisions.
//!
//! # Features
//! - Optional right preconditioning
//! - Double (iterative) Gram-Schmidt orthogonalization for numerical stability
//! - Complex Givens rotations for the least-squares update
//! - Happy breakdown detection for early termination
//! - `rtol`/`atol` stopping test on the true residual at each restart
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems, 2nd Edition. SIAM.
//! - Saad, Y. (1993). A flexible inner-outer preconditioned GMRES algorithm. SISC 14(2).

use std::sync::Arc;

use tracing::{debug, trace};

use crate::core::{DistributedInnerProduct, InnerProduct, LinearOperator, Scalar};
use crate::error::KError;
use crate::parallel::Comm;
use crate::preconditioner::Preconditioner;
use crate::solver::LinearSolver;
use crate::utils::convergence::{Convergence, SolveStats};

/// Relative size of `h_{j+1,j}` below which the Krylov space is invariant.
const BREAKDOWN: f64 = 1e-14;

/// GMRES solver struct with restart length and tolerances.
pub struct GmresSolver {
    comm: Arc<dyn Comm>,
    /// Number of Arnoldi vectors before restart
    pub restart: usize,
    /// Convergence criteria (tolerances and max iterations)
    pub conv: Convergence,
}

/// Rotation zeroing `b` against `a`: returns (c, s, r) with
/// `c·a + s·b = r` and `-conj(s)·a + c·b = 0`.
fn givens<T: Scalar>(a: T, b: T) -> (f64, T, T) {
    let (am, bm) = (a.modulus(), b.modulus());
    if bm == 0.0 {
        return (1.0, T::zero(), a);
    }
    if am == 0.0 {
        return (0.0, T::one(), b);
    }
    let r = am.hypot(bm);
    let phase = a * T::from_real(1.0 / am);
    let s = phase * b.conj() * T::from_real(1.0 / r);
    (am / r, s, phase * T::from_real(r))
}

#[inline]
fn rotate<T: Scalar>(c: f64, s: T, x: &mut T, y: &mut T) {
    let c = T::from_real(c);
    let t = c * *x + s * *y;
    *y = -(s.conj() * *x) + c * *y;
    *x = t;
}

impl GmresSolver {
    /// Create a new GMRES solver with restart, tolerances, and max iterations.
    pub fn new(comm: Arc<dyn Comm>, restart: usize, max_iters: usize, rtol: f64, atol: f64) -> Self {
        Self {
            comm,
            restart: restart.max(1),
            conv: Convergence::new(rtol, atol, max_iters),
        }
    }

    /// Set the stopping tolerances.
    pub fn set_tolerances(&mut self, rtol: f64, atol: f64) {
        self.conv.rtol = rtol;
        self.conv.atol = atol;
    }

    // r = b - A x
    fn residual<T: Scalar>(
        a: &mut dyn LinearOperator<T>,
        b: &[T],
        x: &[T],
        r: &mut [T],
    ) -> Result<(), KError> {
        a.mult(x, r)?;
        r.iter_mut().zip(b).for_each(|(ri, &bi)| *ri = bi - *ri);
        Ok(())
    }

    /// Solve upper-triangular system Hy = g for y, with zero-pivot protection.
    fn back_substitution<T: Scalar>(h: &[Vec<T>], g: &[T], m: usize) -> Vec<T> {
        let mut y = vec![T::zero(); m];
        for i in (0..m).rev() {
            let mut s = g[i];
            for j in (i + 1)..m {
                s -= h[i][j] * y[j];
            }
            y[i] = if h[i][i].modulus() > 0.0 { s / h[i][i] } else { T::zero() };
        }
        y
    }
}

impl<T: Scalar> LinearSolver<T> for GmresSolver {
    fn solve(
        &mut self,
        a: &mut dyn LinearOperator<T>,
        mut pc: Option<&mut dyn Preconditioner<T>>,
        b: &[T],
        x: &mut [T],
    ) -> Result<SolveStats, KError> {
        let n = b.len();
        KError::check_len(n, x.len())?;
        KError::check_len(a.size().0, n)?;
        let ip = DistributedInnerProduct::new(self.comm.as_ref());
        let m = self.restart;

        let mut r = vec![T::zero(); n];
        Self::residual(a, b, x, &mut r)?;
        let mut beta = ip.norm(&r[..]);
        let res0 = beta;
        let target = self.conv.target(res0);
        let mut stats = SolveStats { iterations: 0, final_residual: beta, converged: beta <= target };
        if stats.converged {
            return Ok(stats);
        }

        let mut iteration = 0;
        while iteration < self.conv.max_iters {
            let mut v_basis: Vec<Vec<T>> = Vec::with_capacity(m + 1);
            let mut z_basis: Vec<Vec<T>> = Vec::with_capacity(m);
            let inv_beta = T::from_real(1.0 / beta);
            v_basis.push(r.iter().map(|&ri| ri * inv_beta).collect());

            let mut h = vec![vec![T::zero(); m]; m + 1];
            let mut g = vec![T::zero(); m + 1];
            g[0] = T::from_real(beta);
            let mut cs = vec![0.0f64; m];
            let mut sn = vec![T::zero(); m];
            let mut used = 0;

            for j in 0..m {
                iteration += 1;
                let mut z = vec![T::zero(); n];
                match pc.as_deref_mut() {
                    Some(pc) => pc.apply_factor(&v_basis[j], &mut z)?,
                    None => z.copy_from_slice(&v_basis[j]),
                }
                let mut w = vec![T::zero(); n];
                a.mult(&z, &mut w)?;
                z_basis.push(z);

                // Modified Gram-Schmidt, applied twice
                for _ in 0..2 {
                    for i in 0..=j {
                        let hij = ip.dot(&v_basis[i][..], &w[..]);
                        h[i][j] += hij;
                        for (wk, &vk) in w.iter_mut().zip(&v_basis[i]) {
                            *wk -= hij * vk;
                        }
                    }
                }
                let h_next = ip.norm(&w[..]);
                h[j + 1][j] = T::from_real(h_next);

                for i in 0..j {
                    let (mut p, mut q) = (h[i][j], h[i + 1][j]);
                    rotate(cs[i], sn[i], &mut p, &mut q);
                    h[i][j] = p;
                    h[i + 1][j] = q;
                }
                let (c, s, rr) = givens(h[j][j], h[j + 1][j]);
                cs[j] = c;
                sn[j] = s;
                h[j][j] = rr;
                h[j + 1][j] = T::zero();
                let (mut gj, mut gj1) = (g[j], g[j + 1]);
                rotate(c, s, &mut gj, &mut gj1);
                g[j] = gj;
                g[j + 1] = gj1;

                used = j + 1;
                let res = g[j + 1].modulus();
                trace!(iteration, residual = res, "gmres");
                let (stop, s) = self.conv.check(res, res0, iteration);
                stats = s;
                if stop || h_next <= BREAKDOWN * beta {
                    break;
                }
                let inv = T::from_real(1.0 / h_next);
                v_basis.push(w.iter().map(|&wi| wi * inv).collect());
            }

            let y = Self::back_substitution(&h, &g, used);
            for (yj, zj) in y.iter().zip(&z_basis) {
                for (xi, &zi) in x.iter_mut().zip(zj) {
                    *xi += *yj * zi;
                }
            }

            Self::residual(a, b, x, &mut r)?;
            beta = ip.norm(&r[..]);
            stats.final_residual = beta;
            stats.converged = beta <= target;
            if stats.converged || beta == 0.0 {
                break;
            }
        }
        stats.iterations = iteration;
        debug!(
            iterations = stats.iterations,
            residual = stats.final_residual,
            converged = stats.converged,
            "gmres finished"
        );
        Ok(stats)
    }
}
