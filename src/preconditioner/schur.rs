//! Approximate Schur complement preconditioner.
//!
//! With the on-rank block split into interior and interface unknowns,
//!
//! ```text
//! [ B  E ][ x_i ]   [ Σ_j 0       ]   [ f_i ]
//! [ F  C ][ y_i ] + [ Σ_j F_ij y_j ] = [ g_i ]
//! ```
//!
//! one application
//!
//! 1. forms `g_i' = U_s⁻¹ L_s⁻¹ (g_i − F B⁻¹ f_i)` from the local ILU,
//! 2. solves `y_i + U_s⁻¹ L_s⁻¹ Σ_j F_ij y_j = g_i'` with an inner GMRES on
//!    [`GlobalSchurMat`], and
//! 3. recovers `x_i = U_b⁻¹ (L_b⁻¹ f_i − L_b⁻¹ E y_i)`.
//!
//! On a single process there is no interface and the preconditioner is the
//! plain local ILU solve.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::Scalar;
use crate::error::KError;
use crate::matrix::distributed::write_nz_pattern;
use crate::matrix::{DistributedMatrix, GlobalSchurMat, Layout, SharedBlockMatrix};
use crate::parallel::{RowMap, VecDistribute};
use crate::preconditioner::asm::{factor_pattern, refactor};
use crate::preconditioner::Preconditioner;
use crate::solver::{GmresSolver, LinearSolver};
use crate::utils::SolveStats;

// interface solve state, only built when the communicator spans several ranks
struct SchurSolve<T: Scalar> {
    gsmat: GlobalSchurMat<T>,
    ksm: GmresSolver,
    r: Vec<T>,
    w: Vec<T>,
    var_offset: usize,
    start: usize,
    end: usize,
}

impl<T: Scalar> SchurSolve<T> {
    // y = L⁻¹x on every row, then U_s⁻¹ on the interface rows
    fn eliminate_interior(&self, apc: &SharedBlockMatrix<T>, x: &[T], y: &mut [T]) -> Result<(), KError> {
        let apc = apc.read();
        apc.apply_lower(x, y)?;
        apc.apply_partial_upper(&mut y[self.start..], self.var_offset)
    }
}

pub struct ApproximateSchur<T: Scalar> {
    rmap: Arc<RowMap>,
    aloc: SharedBlockMatrix<T>,
    bext: SharedBlockMatrix<T>,
    ext_dist: Arc<dyn VecDistribute<T>>,
    apc: SharedBlockMatrix<T>,
    layout: Layout,
    alpha: T,
    factored: bool,
    inner: Option<SchurSolve<T>>,
    last_inner: Option<SolveStats>,
}

impl<T: Scalar> ApproximateSchur<T> {
    /// Collective when the communicator has more than one rank.
    pub fn new(
        mat: &DistributedMatrix<T>,
        lev_fill: usize,
        fill_ratio: f64,
        inner_iters: usize,
        inner_rtol: f64,
        inner_atol: f64,
    ) -> Result<Self, KError> {
        let (aloc, bext) = mat.blocks();
        let apc = factor_pattern(aloc, lev_fill, fill_ratio)?;
        let layout = mat.layout();
        let rmap = Arc::clone(mat.row_map());
        let inner = if rmap.comm().size() > 1 {
            let gsmat = GlobalSchurMat::new(mat, Arc::clone(&apc))?;
            let ksm = GmresSolver::new(
                gsmat.row_map().comm_handle(),
                inner_iters,
                inner_iters,
                inner_rtol,
                inner_atol,
            );
            let nvars = layout.bsize * layout.nc;
            debug!(rank = rmap.rank(), nvars, inner_iters, "approximate Schur interface solve");
            Some(SchurSolve {
                gsmat,
                ksm,
                r: vec![T::zero(); nvars],
                w: vec![T::zero(); nvars],
                var_offset: layout.np,
                start: layout.ext_offset(),
                end: layout.bsize * layout.n,
            })
        } else {
            None
        };
        Ok(Self {
            rmap,
            aloc: aloc.clone(),
            bext: bext.clone(),
            ext_dist: Arc::clone(mat.ext_distribution()),
            apc,
            layout,
            alpha: T::zero(),
            factored: false,
            inner,
            last_inner: None,
        })
    }

    /// Diagonal shift added before every factorization.
    pub fn set_diag_shift(&mut self, alpha: T) {
        self.alpha = alpha;
    }

    pub fn factor_matrix(&self) -> &SharedBlockMatrix<T> {
        &self.apc
    }

    /// Statistics of the most recent interface solve.
    pub fn last_inner_stats(&self) -> Option<&SolveStats> {
        self.last_inner.as_ref()
    }

    /// Write the factor pattern and the off-diagonal pattern in global numbering.
    pub fn print_nz_pattern(&self, path: impl AsRef<Path>) -> Result<(), KError> {
        let mut out = BufWriter::new(File::create(path)?);
        write_nz_pattern(
            &mut out,
            self.rmap.rank(),
            self.rmap.range().start,
            &self.apc.read(),
            &self.bext.read(),
            self.layout.np,
            self.ext_dist.indices(),
        )?;
        out.flush()?;
        Ok(())
    }
}

impl<T: Scalar> Preconditioner<T> for ApproximateSchur<T> {
    fn factor(&mut self) -> Result<(), KError> {
        self.factored = false;
        refactor(&self.apc, &self.aloc, self.alpha)?;
        self.factored = true;
        Ok(())
    }

    /// Collective when the communicator has more than one rank. Every rank
    /// reports whether its local elimination succeeded before the interface
    /// solve starts, so a local failure surfaces as an error on all ranks.
    fn apply_factor(&mut self, x: &[T], y: &mut [T]) -> Result<(), KError> {
        let Some(s) = self.inner.as_mut() else {
            if !self.factored {
                return Err(KError::NotFactored("ApproximateSchur"));
            }
            return self.apc.read().apply_factor(x, y);
        };
        let local = if self.factored {
            s.eliminate_interior(&self.apc, x, y)
        } else {
            Err(KError::NotFactored("ApproximateSchur"))
        };
        let failed = s
            .gsmat
            .row_map()
            .comm()
            .all_reduce(if local.is_ok() { 0.0 } else { 1.0 });
        local?;
        if failed > 0.0 {
            return Err(KError::PeerFailure(failed as usize));
        }
        s.r.copy_from_slice(&y[s.start..s.end]);
        s.w.iter_mut().for_each(|v| *v = T::zero());
        let stats = s.ksm.solve(&mut s.gsmat, None, &s.r, &mut s.w)?;
        if !stats.converged {
            warn!(
                iterations = stats.iterations,
                residual = stats.final_residual,
                "interface solve did not converge; using the last iterate"
            );
        }
        self.last_inner = Some(stats);
        y[s.start..s.end].copy_from_slice(&s.w);
        self.apc.read().apply_factor_schur(y, s.var_offset)
    }
}
