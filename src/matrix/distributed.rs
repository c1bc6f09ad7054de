//! Row-distributed block matrix.
//!
//! Each rank owns `N` consecutive block rows of the global matrix, stored as
//! two blocked CSR pieces:
//!
//! ```text
//! A_i = [ B_i  E_i ]      u_i = [ x_i ]   interior blocks 0..Np
//!       [ F_i  C_i ]            [ y_i ]   interface blocks Np..N
//!
//! A_i u_i + P · Σ_j F_ij y_j = b_i,       P = [0, I]^T
//! ```
//!
//! `Aloc` is the square on-rank block `A_i`. `Bext` couples the last `Nc`
//! (interface) rows to the `M` remote blocks listed by the distribution
//! table. Interior rows never reference remote unknowns.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::core::{LinearOperator, Scalar};
use crate::error::KError;
use crate::matrix::bc_map::BcMap;
use crate::matrix::bcsr::{BlockSparseMatrix, SharedBlockMatrix};
use crate::parallel::{ExchangeContext, RowMap, VecDistribute};

/// Local dimensions of a distributed matrix, in blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    pub bsize: usize,
    /// Owned block rows.
    pub n: usize,
    /// Interface block rows (the trailing rows of the owned range).
    pub nc: usize,
    /// Interior block rows, `n - nc`.
    pub np: usize,
    /// Remote blocks referenced by the off-diagonal part.
    pub m: usize,
}

impl Layout {
    /// Scalar offset of the first interface row.
    pub fn ext_offset(&self) -> usize {
        self.bsize * self.np
    }
}

pub struct DistributedMatrix<T: Scalar> {
    rmap: Arc<RowMap>,
    aloc: SharedBlockMatrix<T>,
    bext: SharedBlockMatrix<T>,
    ext_dist: Arc<dyn VecDistribute<T>>,
    bcs: Option<Arc<BcMap<T>>>,
    ctx: Box<dyn ExchangeContext<T>>,
    x_ext: Vec<T>,
    layout: Layout,
}

impl<T: Scalar> DistributedMatrix<T> {
    /// Compose the distributed matrix, validating every dimension.
    pub fn new(
        rmap: Arc<RowMap>,
        aloc: SharedBlockMatrix<T>,
        bext: SharedBlockMatrix<T>,
        ext_dist: Arc<dyn VecDistribute<T>>,
        bcs: Option<Arc<BcMap<T>>>,
    ) -> Result<Self, KError> {
        let layout = {
            let (a, b) = (aloc.read(), bext.read());
            let n = a.nrows();
            if n != a.ncols() {
                return Err(KError::Config(format!(
                    "diagonal block must be square, got {}×{} blocks",
                    n,
                    a.ncols()
                )));
            }
            let nc = b.nrows();
            if nc > n {
                return Err(KError::Config(format!(
                    "off-diagonal block has {nc} rows but only {n} rows are owned"
                )));
            }
            if b.ncols() != ext_dist.dimension() {
                return Err(KError::Config(format!(
                    "off-diagonal block has {} columns but the distribution lists {} remote blocks",
                    b.ncols(),
                    ext_dist.dimension()
                )));
            }
            if a.bsize() != b.bsize() {
                return Err(KError::Config(format!(
                    "block sizes do not match: diagonal {}, off-diagonal {}",
                    a.bsize(),
                    b.bsize()
                )));
            }
            if rmap.local_size() != n {
                return Err(KError::Config(format!(
                    "row map owns {} blocks but the diagonal block has {n} rows",
                    rmap.local_size()
                )));
            }
            Layout { bsize: a.bsize(), n, nc, np: n - nc, m: ext_dist.dimension() }
        };
        debug!(
            rank = rmap.rank(),
            n = layout.n,
            nc = layout.nc,
            m = layout.m,
            bsize = layout.bsize,
            "distributed matrix layout"
        );
        let ctx = ext_dist.create_ctx(layout.bsize);
        if ctx.dimension() != layout.m || ctx.block_size() != layout.bsize {
            return Err(KError::Config(format!(
                "exchange context serves {} blocks of size {}, expected {} of size {}",
                ctx.dimension(),
                ctx.block_size(),
                layout.m,
                layout.bsize
            )));
        }
        let x_ext = vec![T::zero(); layout.bsize * layout.m];
        Ok(Self { rmap, aloc, bext, ext_dist, bcs, ctx, x_ext, layout })
    }

    /// Wrap owned blocks in fresh shared handles.
    pub fn from_blocks(
        rmap: Arc<RowMap>,
        aloc: BlockSparseMatrix<T>,
        bext: BlockSparseMatrix<T>,
        ext_dist: Arc<dyn VecDistribute<T>>,
        bcs: Option<Arc<BcMap<T>>>,
    ) -> Result<Self, KError> {
        Self::new(
            rmap,
            Arc::new(RwLock::new(aloc)),
            Arc::new(RwLock::new(bext)),
            ext_dist,
            bcs,
        )
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn row_map(&self) -> &Arc<RowMap> {
        &self.rmap
    }

    /// The diagonal and off-diagonal blocks.
    pub fn blocks(&self) -> (&SharedBlockMatrix<T>, &SharedBlockMatrix<T>) {
        (&self.aloc, &self.bext)
    }

    pub fn ext_distribution(&self) -> &Arc<dyn VecDistribute<T>> {
        &self.ext_dist
    }

    pub fn bcs(&self) -> Option<&Arc<BcMap<T>>> {
        self.bcs.as_ref()
    }

    fn check_operand(&self, other: &Self) -> Result<(), KError> {
        if self.layout != other.layout {
            return Err(KError::IncompatibleOperand(format!(
                "operand layout {:?} differs from {:?}",
                other.layout, self.layout
            )));
        }
        for (dst, src) in [(&self.aloc, &other.aloc), (&self.bext, &other.bext)] {
            if !Arc::ptr_eq(dst, src) {
                dst.read().check_operand(&src.read())?;
            }
        }
        Ok(())
    }

    pub fn zero_entries(&mut self) {
        self.aloc.write().zero_entries();
        self.bext.write().zero_entries();
    }

    pub fn scale(&mut self, alpha: T) {
        self.aloc.write().scale(alpha);
        self.bext.write().scale(alpha);
    }

    /// Copy values from `other`; nothing changes if it does not fit.
    pub fn copy_values(&mut self, other: &Self) -> Result<(), KError> {
        self.check_operand(other)?;
        for (dst, src) in [(&self.aloc, &other.aloc), (&self.bext, &other.bext)] {
            if !Arc::ptr_eq(dst, src) {
                dst.write().copy_values(&src.read())?;
            }
        }
        Ok(())
    }

    /// self += alpha·other.
    pub fn axpy(&mut self, alpha: T, other: &Self) -> Result<(), KError> {
        self.axpby(alpha, T::one(), other)
    }

    /// self = alpha·other + beta·self.
    pub fn axpby(&mut self, alpha: T, beta: T, other: &Self) -> Result<(), KError> {
        self.check_operand(other)?;
        for (dst, src) in [(&self.aloc, &other.aloc), (&self.bext, &other.bext)] {
            if Arc::ptr_eq(dst, src) {
                dst.write().scale(alpha + beta);
            } else {
                dst.write().axpby(alpha, beta, &src.read())?;
            }
        }
        Ok(())
    }

    /// Shift the diagonal of the on-rank block only.
    pub fn add_diag(&mut self, alpha: T) -> Result<(), KError> {
        self.aloc.write().add_diag(alpha)
    }

    /// Impose the boundary conditions on the owned rows.
    ///
    /// Constrained rows of `Aloc` become identity rows; interface rows are
    /// also zeroed in `Bext`. An entry whose local index disagrees with the
    /// row map is rejected before anything is modified.
    pub fn apply_bcs(&mut self) -> Result<(), KError> {
        let Some(bcs) = &self.bcs else {
            return Ok(());
        };
        if let Some((row, entry)) = bcs.owned(&self.rmap).find(|(row, e)| e.local != *row) {
            return Err(KError::Config(format!(
                "boundary condition on block {} names local block {} but the row map places it at {row}",
                entry.global, entry.local
            )));
        }
        let b = self.layout.bsize;
        if let Some((_, entry)) = bcs.owned(&self.rmap).find(|(_, e)| e.vars.iter().any(|&v| v >= b)) {
            return Err(KError::Config(format!(
                "boundary condition on block {} constrains a variable outside block size {b}",
                entry.global
            )));
        }
        let (mut aloc, mut bext) = (self.aloc.write(), self.bext.write());
        for (row, entry) in bcs.owned(&self.rmap) {
            aloc.zero_row(row, &entry.vars, true)?;
            if let Some(ext_row) = row.checked_sub(self.layout.np) {
                bext.zero_row(ext_row, &entry.vars, false)?;
            }
        }
        Ok(())
    }

    /// Write the block nonzero pattern in global numbering.
    pub fn print_nz_pattern(&self, path: impl AsRef<Path>) -> Result<(), KError> {
        let mut out = BufWriter::new(File::create(path)?);
        write_nz_pattern(
            &mut out,
            self.rmap.rank(),
            self.rmap.range().start,
            &self.aloc.read(),
            &self.bext.read(),
            self.layout.np,
            self.ext_dist.indices(),
        )?;
        out.flush()?;
        Ok(())
    }
}

impl<T: Scalar> LinearOperator<T> for DistributedMatrix<T> {
    fn size(&self) -> (usize, usize) {
        let n = self.layout.bsize * self.layout.n;
        (n, n)
    }

    /// y = A·x, overlapping the exchange of interface values with the
    /// on-rank product.
    fn mult(&mut self, x: &[T], y: &mut [T]) -> Result<(), KError> {
        let n = self.layout.bsize * self.layout.n;
        KError::check_len(n, x.len())?;
        KError::check_len(n, y.len())?;
        let token = self.ctx.begin_forward(x, 0)?;
        let local = self.aloc.read().mult(x, y);
        // complete the exchange even when the local product failed
        let exchanged = self.ctx.end_forward(token, &mut self.x_ext);
        local?;
        exchanged?;
        let offset = self.layout.ext_offset();
        self.bext.read().mult_add_in_place(&self.x_ext, &mut y[offset..])
    }

    fn create_vec(&self) -> Vec<T> {
        vec![T::zero(); self.layout.bsize * self.layout.n]
    }
}

/// Tecplot-style dump: one zone for the diagonal part, one for the
/// off-diagonal part when it holds any entry.
pub(crate) fn write_nz_pattern<T: Scalar>(
    out: &mut impl Write,
    rank: usize,
    first_row: usize,
    diag: &BlockSparseMatrix<T>,
    off_diag: &BlockSparseMatrix<T>,
    interface_offset: usize,
    col_vars: &[usize],
) -> std::io::Result<()> {
    write!(out, "VARIABLES = \"i\", \"j\" \nZONE T = \"Diagonal block {rank}\"\n")?;
    let (rowp, cols) = (diag.rowp(), diag.cols());
    for i in 0..diag.nrows() {
        for &c in &cols[rowp[i]..rowp[i + 1]] {
            writeln!(out, "{} {}", i + first_row, c + first_row)?;
        }
    }
    if off_diag.nnz() > 0 {
        writeln!(out, "ZONE T = \"Off-diagonal block {rank}\"")?;
        let (rowp, cols) = (off_diag.rowp(), off_diag.cols());
        for i in 0..off_diag.nrows() {
            for &c in &cols[rowp[i]..rowp[i + 1]] {
                writeln!(out, "{} {}", i + interface_offset + first_row, col_vars[c])?;
            }
        }
    }
    Ok(())
}
