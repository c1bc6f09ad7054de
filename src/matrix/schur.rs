//! Approximate global Schur complement on the interface unknowns.
//!
//! With the on-rank block factored as
//!
//! ```text
//! A_i = [ L_b          0   ][ U_b  L_b⁻¹ E ]
//!       [ F U_b⁻¹      L_s ][ 0    U_s     ]
//! ```
//!
//! the interface system solved by [`ApproximateSchur`] is
//!
//! ```text
//! y_i + U_s⁻¹ L_s⁻¹ Σ_j F_ij y_j = g_i'
//! ```
//!
//! and this operator applies its left-hand side. Vectors hold only the `Nc`
//! interface blocks of each rank.
//!
//! [`ApproximateSchur`]: crate::preconditioner::ApproximateSchur

use std::sync::Arc;

use crate::core::{LinearOperator, Scalar};
use crate::error::KError;
use crate::matrix::bcsr::SharedBlockMatrix;
use crate::matrix::distributed::DistributedMatrix;
use crate::parallel::{ExchangeContext, RowMap};

pub struct GlobalSchurMat<T: Scalar> {
    rmap: Arc<RowMap>,
    apc: SharedBlockMatrix<T>,
    bext: SharedBlockMatrix<T>,
    ctx: Box<dyn ExchangeContext<T>>,
    x_ext: Vec<T>,
    var_offset: usize,
    nvars: usize,
}

impl<T: Scalar> GlobalSchurMat<T> {
    /// Collective: builds the interface row map across all ranks.
    ///
    /// `apc` is the factor matrix shared with the owning preconditioner; it
    /// must be factored before the first product.
    pub fn new(mat: &DistributedMatrix<T>, apc: SharedBlockMatrix<T>) -> Result<Self, KError> {
        let layout = mat.layout();
        {
            let a = apc.read();
            if a.nrows() != layout.n || a.ncols() != layout.n || a.bsize() != layout.bsize {
                return Err(KError::Config(format!(
                    "factor matrix is {}×{} blocks of size {}, expected {}×{} of size {}",
                    a.nrows(),
                    a.ncols(),
                    a.bsize(),
                    layout.n,
                    layout.n,
                    layout.bsize
                )));
            }
        }
        let rmap = Arc::new(RowMap::from_local_size(mat.row_map().comm_handle(), layout.nc));
        let ctx = mat.ext_distribution().create_ctx(layout.bsize);
        Ok(Self {
            rmap,
            apc,
            bext: Arc::clone(mat.blocks().1),
            ctx,
            x_ext: vec![T::zero(); layout.bsize * layout.m],
            var_offset: layout.np,
            nvars: layout.bsize * layout.nc,
        })
    }

    /// Row map of the interface unknowns.
    pub fn row_map(&self) -> &Arc<RowMap> {
        &self.rmap
    }

    /// y = F·x_ext: the remote coupling alone.
    pub fn mult_off_diag(&mut self, x: &[T], y: &mut [T]) -> Result<(), KError> {
        KError::check_len(self.nvars, x.len())?;
        KError::check_len(self.nvars, y.len())?;
        let token = self.ctx.begin_forward(x, self.var_offset)?;
        self.ctx.end_forward(token, &mut self.x_ext)?;
        self.bext.read().mult(&self.x_ext, y)
    }
}

impl<T: Scalar> LinearOperator<T> for GlobalSchurMat<T> {
    fn size(&self) -> (usize, usize) {
        (self.nvars, self.nvars)
    }

    /// y = x + U_s⁻¹ L_s⁻¹ F·x_ext.
    fn mult(&mut self, x: &[T], y: &mut [T]) -> Result<(), KError> {
        self.mult_off_diag(x, y)?;
        let apc = self.apc.read();
        apc.apply_partial_lower(y, self.var_offset)?;
        apc.apply_partial_upper(y, self.var_offset)?;
        y.iter_mut().zip(x).for_each(|(yi, &xi)| *yi += xi);
        Ok(())
    }

    fn create_vec(&self) -> Vec<T> {
        vec![T::zero(); self.nvars]
    }
}
