//! Process-local block compressed-row matrix.
//!
//! [`BlockSparseMatrix`] owns a fixed sparsity pattern (`rowp`, sorted `cols`)
//! and the `b×b` blocks attached to it. Values change in place during
//! assembly, value operations and factorization; the pattern never changes
//! after construction. New patterns come from the symbolic phase
//! ([`BlockSparseMatrix::ilu_pattern`]) or from the caller.
//!
//! # Factorization
//!
//! [`factor`](BlockSparseMatrix::factor) overwrites the values with a block
//! ILU restricted to the stored pattern: entries left of the diagonal hold
//! `L` (unit diagonal implied), entries right of it hold `U`, and the
//! diagonal position holds the *inverse* of each pivot block. The triangular
//! solves in [`block_ops`](crate::matrix::block_ops) rely on that layout.

use std::collections::BTreeMap;
use std::sync::Arc;

use faer::Mat;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::core::Scalar;
use crate::error::KError;
use crate::matrix::block_ops::{self, BlockCsr, BlockCsrMut, Scale};

/// Block matrix shared between a distributed matrix and the preconditioners
/// built on it.
pub type SharedBlockMatrix<T> = Arc<RwLock<BlockSparseMatrix<T>>>;

#[derive(Clone, Debug)]
pub struct BlockSparseMatrix<T> {
    bsize: usize,
    nrows: usize,
    ncols: usize,
    rowp: Vec<usize>,
    cols: Vec<usize>,
    values: Vec<T>,
    // position of (i, i) in each row; empty if the pattern lacks one
    diag: Vec<usize>,
    // inverted diagonal blocks for the relaxation sweeps
    diag_inv: Vec<T>,
}

impl<T: Scalar> BlockSparseMatrix<T> {
    /// Allocate a zero-valued matrix on the given pattern.
    pub fn new(
        bsize: usize,
        nrows: usize,
        ncols: usize,
        rowp: Vec<usize>,
        cols: Vec<usize>,
    ) -> Result<Self, KError> {
        let nnz = cols.len();
        Self::from_values(bsize, nrows, ncols, rowp, cols, vec![T::zero(); nnz * bsize * bsize])
    }

    /// Wrap existing arrays after validating them.
    pub fn from_values(
        bsize: usize,
        nrows: usize,
        ncols: usize,
        rowp: Vec<usize>,
        cols: Vec<usize>,
        values: Vec<T>,
    ) -> Result<Self, KError> {
        if bsize == 0 {
            return Err(KError::Config("block size must be at least 1".into()));
        }
        if rowp.len() != nrows + 1 || rowp[0] != 0 || rowp[nrows] != cols.len() {
            return Err(KError::Config(format!(
                "row pointer of length {} does not describe {nrows} rows over {} entries",
                rowp.len(),
                cols.len()
            )));
        }
        if let Some(i) = rowp.windows(2).position(|w| w[0] > w[1] || w[1] > cols.len()) {
            return Err(KError::Config(format!(
                "row pointer is not non-decreasing within 0..={} at row {i}",
                cols.len()
            )));
        }
        for i in 0..nrows {
            let row = &cols[rowp[i]..rowp[i + 1]];
            if row.windows(2).any(|w| w[0] >= w[1]) {
                return Err(KError::Config(format!(
                    "columns of row {i} are not strictly ascending"
                )));
            }
            if row.last().is_some_and(|&c| c >= ncols) {
                return Err(KError::Config(format!("row {i} references a column >= {ncols}")));
            }
        }
        KError::check_len(cols.len() * bsize * bsize, values.len())?;
        let diag = if nrows == ncols {
            (0..nrows)
                .map(|i| {
                    cols[rowp[i]..rowp[i + 1]]
                        .binary_search(&i)
                        .ok()
                        .map(|p| rowp[i] + p)
                })
                .collect::<Option<Vec<_>>>()
                .unwrap_or_default()
        } else {
            Vec::new()
        };
        Ok(Self { bsize, nrows, ncols, rowp, cols, values, diag, diag_inv: Vec::new() })
    }

    /// Build from `(row, col, block)` triplets; duplicate positions are summed.
    pub fn from_blocks<I>(bsize: usize, nrows: usize, ncols: usize, blocks: I) -> Result<Self, KError>
    where
        I: IntoIterator<Item = (usize, usize, Vec<T>)>,
    {
        let bb = bsize * bsize;
        let mut rows: Vec<BTreeMap<usize, Vec<T>>> = vec![BTreeMap::new(); nrows];
        for (i, j, block) in blocks {
            KError::check_len(bb, block.len())?;
            if i >= nrows || j >= ncols {
                return Err(KError::Config(format!(
                    "block ({i}, {j}) is outside a {nrows}×{ncols} block matrix"
                )));
            }
            let slot = rows[i].entry(j).or_insert_with(|| vec![T::zero(); bb]);
            slot.iter_mut().zip(block).for_each(|(s, v)| *s += v);
        }
        let mut rowp = Vec::with_capacity(nrows + 1);
        let mut cols = Vec::new();
        let mut values = Vec::new();
        rowp.push(0);
        for row in rows {
            for (j, block) in row {
                cols.push(j);
                values.extend(block);
            }
            rowp.push(cols.len());
        }
        Self::from_values(bsize, nrows, ncols, rowp, cols, values)
    }

    pub fn bsize(&self) -> usize {
        self.bsize
    }

    /// Number of block rows.
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Number of block columns.
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Number of stored blocks.
    pub fn nnz(&self) -> usize {
        self.cols.len()
    }

    pub fn rowp(&self) -> &[usize] {
        &self.rowp
    }

    pub fn cols(&self) -> &[usize] {
        &self.cols
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Diagonal positions, if every row stores its diagonal block.
    pub fn diag(&self) -> Option<&[usize]> {
        if self.diag.len() == self.nrows && self.nrows == self.ncols {
            Some(&self.diag)
        } else {
            None
        }
    }

    pub fn view(&self) -> BlockCsr<'_, T> {
        BlockCsr {
            bsize: self.bsize,
            nrows: self.nrows,
            rowp: &self.rowp,
            cols: &self.cols,
            diag: &self.diag,
            values: &self.values,
        }
    }

    fn position(&self, i: usize, j: usize) -> Option<usize> {
        let (start, end) = (*self.rowp.get(i)?, *self.rowp.get(i + 1)?);
        self.cols[start..end].binary_search(&j).ok().map(|p| start + p)
    }

    /// Stored block at block position `(i, j)`.
    pub fn block(&self, i: usize, j: usize) -> Option<&[T]> {
        let bb = self.bsize * self.bsize;
        self.position(i, j).map(|k| &self.values[k * bb..(k + 1) * bb])
    }

    pub fn block_mut(&mut self, i: usize, j: usize) -> Option<&mut [T]> {
        let bb = self.bsize * self.bsize;
        self.position(i, j).map(move |k| &mut self.values[k * bb..(k + 1) * bb])
    }

    /// Scalar dense copy, `(b·nrows) × (b·ncols)`.
    pub fn to_dense(&self) -> Mat<T> {
        let b = self.bsize;
        let mut dense = vec![T::zero(); self.nrows * b * self.ncols * b];
        let width = self.ncols * b;
        for i in 0..self.nrows {
            for k in self.rowp[i]..self.rowp[i + 1] {
                let j = self.cols[k];
                for r in 0..b {
                    for c in 0..b {
                        dense[(i * b + r) * width + j * b + c] = self.values[(k * b + r) * b + c];
                    }
                }
            }
        }
        Mat::from_fn(self.nrows * b, width, |r, c| dense[r * width + c])
    }

    fn require_diag(&self) -> Result<&[usize], KError> {
        self.diag().ok_or_else(|| {
            KError::Config("operation needs a square pattern with every diagonal block stored".into())
        })
    }

    // ---------------------------------------------------------------------
    // value operations
    // ---------------------------------------------------------------------

    pub fn zero_entries(&mut self) {
        self.values.iter_mut().for_each(|v| *v = T::zero());
    }

    pub fn scale(&mut self, alpha: T) {
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            self.values.par_iter_mut().for_each(|v| *v *= alpha);
        }
        #[cfg(not(feature = "rayon"))]
        {
            self.values.iter_mut().for_each(|v| *v *= alpha);
        }
    }

    /// Positions in `self` of every entry of `other`.
    ///
    /// Fails unless `other` has the same shape and a pattern contained in
    /// this one.
    fn pattern_map(&self, other: &Self) -> Result<Vec<usize>, KError> {
        if (self.bsize, self.nrows, self.ncols) != (other.bsize, other.nrows, other.ncols) {
            return Err(KError::IncompatibleOperand(format!(
                "operand is {}×{} blocks of size {}, receiver is {}×{} blocks of size {}",
                other.nrows, other.ncols, other.bsize, self.nrows, self.ncols, self.bsize
            )));
        }
        let mut map = Vec::with_capacity(other.nnz());
        for i in 0..self.nrows {
            let mine = &self.cols[self.rowp[i]..self.rowp[i + 1]];
            let mut p = 0;
            for &c in &other.cols[other.rowp[i]..other.rowp[i + 1]] {
                while p < mine.len() && mine[p] < c {
                    p += 1;
                }
                if p == mine.len() || mine[p] != c {
                    return Err(KError::IncompatibleOperand(format!(
                        "operand entry ({i}, {c}) is not in the receiver's pattern"
                    )));
                }
                map.push(self.rowp[i] + p);
            }
        }
        Ok(map)
    }

    /// Check that `other` could be copied or added into this matrix.
    pub fn check_operand(&self, other: &Self) -> Result<(), KError> {
        self.pattern_map(other).map(|_| ())
    }

    fn add_mapped(&mut self, alpha: T, other: &Self, map: &[usize]) {
        let bb = self.bsize * self.bsize;
        for (k, &dst) in map.iter().enumerate() {
            let src = &other.values[k * bb..(k + 1) * bb];
            for (d, &s) in self.values[dst * bb..(dst + 1) * bb].iter_mut().zip(src) {
                *d += alpha * s;
            }
        }
    }

    /// Copy the values of `other` into this pattern, zeroing entries it lacks.
    pub fn copy_values(&mut self, other: &Self) -> Result<(), KError> {
        let map = self.pattern_map(other)?;
        self.zero_entries();
        self.add_mapped(T::one(), other, &map);
        Ok(())
    }

    /// self += alpha·x.
    pub fn axpy(&mut self, alpha: T, x: &Self) -> Result<(), KError> {
        let map = self.pattern_map(x)?;
        self.add_mapped(alpha, x, &map);
        Ok(())
    }

    /// self = alpha·x + beta·self.
    pub fn axpby(&mut self, alpha: T, beta: T, x: &Self) -> Result<(), KError> {
        let map = self.pattern_map(x)?;
        self.scale(beta);
        self.add_mapped(alpha, x, &map);
        Ok(())
    }

    /// Add `alpha` to every scalar on the diagonal.
    pub fn add_diag(&mut self, alpha: T) -> Result<(), KError> {
        let b = self.bsize;
        let diag = self.require_diag()?.to_vec();
        for k in diag {
            for v in 0..b {
                self.values[(k * b + v) * b + v] += alpha;
            }
        }
        Ok(())
    }

    /// Zero scalar row `v` of block-row `row` for every `v` in `vars`.
    ///
    /// With `ident`, the diagonal block (when stored) gets a one at `(v, v)`,
    /// leaving an identity row.
    pub fn zero_row(&mut self, row: usize, vars: &[usize], ident: bool) -> Result<(), KError> {
        let b = self.bsize;
        if row >= self.nrows {
            return Err(KError::Config(format!("row {row} is outside {} block rows", self.nrows)));
        }
        if let Some(&v) = vars.iter().find(|&&v| v >= b) {
            return Err(KError::Config(format!("variable {v} is outside block size {b}")));
        }
        let diag_pos = if ident { self.position(row, row) } else { None };
        for k in self.rowp[row]..self.rowp[row + 1] {
            for &v in vars {
                let start = (k * b + v) * b;
                self.values[start..start + b].iter_mut().for_each(|x| *x = T::zero());
                if diag_pos == Some(k) {
                    self.values[start + v] = T::one();
                }
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // products and solves
    // ---------------------------------------------------------------------

    fn check_vec(&self, x: &[T], y: &[T]) -> Result<(), KError> {
        KError::check_len(self.ncols * self.bsize, x.len())?;
        KError::check_len(self.nrows * self.bsize, y.len())
    }

    /// y = A·x.
    pub fn mult(&self, x: &[T], y: &mut [T]) -> Result<(), KError> {
        self.check_vec(x, y)?;
        block_ops::mult(&self.view(), x, y);
        Ok(())
    }

    /// z = A·x + y.
    pub fn mult_add(&self, x: &[T], y: &[T], z: &mut [T]) -> Result<(), KError> {
        self.check_vec(x, y)?;
        KError::check_len(y.len(), z.len())?;
        block_ops::mult_add(&self.view(), x, y, z);
        Ok(())
    }

    /// y += A·x.
    pub fn mult_add_in_place(&self, x: &[T], y: &mut [T]) -> Result<(), KError> {
        self.check_vec(x, y)?;
        block_ops::mult_add_in_place(&self.view(), x, y);
        Ok(())
    }

    /// y = L⁻¹·x.
    pub fn apply_lower(&self, x: &[T], y: &mut [T]) -> Result<(), KError> {
        self.require_diag()?;
        self.check_vec(x, y)?;
        y.copy_from_slice(x);
        block_ops::apply_lower(&self.view(), y);
        Ok(())
    }

    /// y = U⁻¹·x.
    pub fn apply_upper(&self, x: &[T], y: &mut [T]) -> Result<(), KError> {
        self.require_diag()?;
        self.check_vec(x, y)?;
        y.copy_from_slice(x);
        block_ops::apply_upper(&self.view(), y);
        Ok(())
    }

    /// y = U⁻¹·L⁻¹·x with the factors stored in place.
    pub fn apply_factor(&self, x: &[T], y: &mut [T]) -> Result<(), KError> {
        self.require_diag()?;
        self.check_vec(x, y)?;
        y.copy_from_slice(x);
        let view = self.view();
        block_ops::apply_lower(&view, y);
        block_ops::apply_upper(&view, y);
        Ok(())
    }

    fn check_partial(&self, x: &[T], var_offset: usize) -> Result<(), KError> {
        self.require_diag()?;
        if var_offset > self.nrows {
            return Err(KError::Config(format!(
                "variable offset {var_offset} exceeds {} block rows",
                self.nrows
            )));
        }
        KError::check_len((self.nrows - var_offset) * self.bsize, x.len())
    }

    /// In-place lower solve of the trailing rows; `x` holds rows `var_offset..`.
    pub fn apply_partial_lower(&self, x: &mut [T], var_offset: usize) -> Result<(), KError> {
        self.check_partial(x, var_offset)?;
        block_ops::apply_partial_lower(&self.view(), x, var_offset);
        Ok(())
    }

    /// In-place upper solve of the trailing rows; `x` holds rows `var_offset..`.
    pub fn apply_partial_upper(&self, x: &mut [T], var_offset: usize) -> Result<(), KError> {
        self.check_partial(x, var_offset)?;
        block_ops::apply_partial_upper(&self.view(), x, var_offset);
        Ok(())
    }

    /// Back-substitute rows `[0, var_offset)` of the full vector `x`.
    pub fn apply_factor_schur(&self, x: &mut [T], var_offset: usize) -> Result<(), KError> {
        self.require_diag()?;
        KError::check_len(self.nrows * self.bsize, x.len())?;
        block_ops::apply_factor_schur(&self.view(), x, var_offset);
        Ok(())
    }

    /// self += alpha·A·B within the existing pattern of `self`.
    pub fn mat_mult_add(&mut self, alpha: T, a: &Self, b: &Self) -> Result<(), KError> {
        if a.bsize != self.bsize || b.bsize != self.bsize {
            return Err(KError::IncompatibleOperand("block sizes differ".into()));
        }
        if a.nrows != self.nrows || a.ncols != b.nrows || b.ncols != self.ncols {
            return Err(KError::IncompatibleOperand(format!(
                "cannot add a {}×{} times {}×{} product into {}×{}",
                a.nrows, a.ncols, b.nrows, b.ncols, self.nrows, self.ncols
            )));
        }
        let mut c = BlockCsrMut {
            bsize: self.bsize,
            nrows: self.nrows,
            rowp: &self.rowp,
            cols: &self.cols,
            values: &mut self.values,
        };
        block_ops::mat_mult_add(alpha, &a.view(), &b.view(), &mut c);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // factorization
    // ---------------------------------------------------------------------

    /// In-place block ILU on the stored pattern.
    ///
    /// On success the diagonal positions hold inverted pivots. A singular
    /// pivot aborts with [`KError::SingularPivot`] and leaves the values
    /// partially factored.
    pub fn factor(&mut self) -> Result<(), KError> {
        let diag = self.require_diag()?.to_vec();
        let b = self.bsize;
        let bb = b * b;
        let mut tmp = vec![T::zero(); bb];
        for i in 0..self.nrows {
            let (start, end) = (self.rowp[i], self.rowp[i + 1]);
            let (prev, cur) = self.values.split_at_mut(start * bb);
            let cur = &mut cur[..(end - start) * bb];
            for jp in start..diag[i] {
                let j = self.cols[jp];
                let lp = (jp - start) * bb;
                // L_ij = A_ij · D_j⁻¹
                tmp.copy_from_slice(&cur[lp..lp + bb]);
                block_ops::gemm(b, &tmp, &prev[diag[j] * bb..(diag[j] + 1) * bb], &mut cur[lp..lp + bb]);
                tmp.copy_from_slice(&cur[lp..lp + bb]);
                let (u_start, u_end) = (diag[j] + 1, self.rowp[j + 1]);
                block_ops::merge_row_update(
                    b,
                    Scale::Minus,
                    &tmp,
                    &self.cols[u_start..u_end],
                    &prev[u_start * bb..u_end * bb],
                    &self.cols[jp + 1..end],
                    &mut cur[lp + bb..],
                );
            }
            let dp = (diag[i] - start) * bb;
            block_ops::invert_block(b, &mut cur[dp..dp + bb], i)?;
        }
        Ok(())
    }

    /// Invert the diagonal blocks into the relaxation cache.
    pub fn factor_diag(&mut self) -> Result<(), KError> {
        let diag = self.require_diag()?;
        let bb = self.bsize * self.bsize;
        let mut inv = Vec::with_capacity(self.nrows * bb);
        for (i, &k) in diag.iter().enumerate() {
            let start = inv.len();
            inv.extend_from_slice(&self.values[k * bb..(k + 1) * bb]);
            block_ops::invert_block(self.bsize, &mut inv[start..], i)?;
        }
        self.diag_inv = inv;
        Ok(())
    }

    fn relax_row(&self, i: usize, rhs: &[T], y: &mut [T], omega: T, tmp: &mut [T], upd: &mut [T]) {
        let b = self.bsize;
        let bb = b * b;
        tmp.copy_from_slice(&rhs[i * b..(i + 1) * b]);
        for k in self.rowp[i]..self.rowp[i + 1] {
            let j = self.cols[k];
            if j != i {
                block_ops::gemv_sub(b, &self.values[k * bb..(k + 1) * bb], &y[j * b..(j + 1) * b], tmp);
            }
        }
        block_ops::gemv(b, &self.diag_inv[i * bb..(i + 1) * bb], tmp, upd);
        let one_minus = T::one() - omega;
        for (yv, &u) in y[i * b..(i + 1) * b].iter_mut().zip(upd.iter()) {
            *yv = one_minus * *yv + omega * u;
        }
    }

    fn check_sor(&self, rhs: &[T], y: &[T]) -> Result<(), KError> {
        if self.diag_inv.len() != self.nrows * self.bsize * self.bsize {
            return Err(KError::NotFactored("relaxation sweep"));
        }
        KError::check_len(self.nrows * self.bsize, rhs.len())?;
        KError::check_len(self.nrows * self.bsize, y.len())
    }

    /// `iters` forward SOR sweeps on A·y = rhs, starting from the current `y`.
    pub fn apply_sor(&self, rhs: &[T], y: &mut [T], omega: f64, iters: usize) -> Result<(), KError> {
        self.check_sor(rhs, y)?;
        let omega = T::from_real(omega);
        let mut tmp = vec![T::zero(); self.bsize];
        let mut upd = vec![T::zero(); self.bsize];
        for _ in 0..iters {
            for i in 0..self.nrows {
                self.relax_row(i, rhs, y, omega, &mut tmp, &mut upd);
            }
        }
        Ok(())
    }

    /// `iters` symmetric (forward then backward) sweeps.
    pub fn apply_ssor(&self, rhs: &[T], y: &mut [T], omega: f64, iters: usize) -> Result<(), KError> {
        self.check_sor(rhs, y)?;
        let omega = T::from_real(omega);
        let mut tmp = vec![T::zero(); self.bsize];
        let mut upd = vec![T::zero(); self.bsize];
        for _ in 0..iters {
            for i in 0..self.nrows {
                self.relax_row(i, rhs, y, omega, &mut tmp, &mut upd);
            }
            for i in (0..self.nrows).rev() {
                self.relax_row(i, rhs, y, omega, &mut tmp, &mut upd);
            }
        }
        Ok(())
    }

    /// Symbolic ILU(k): the level-of-fill pattern of `a`, zero-valued.
    ///
    /// Fill entries of level `<= lev_fill` are kept and the diagonal is always
    /// present. `fill_ratio` is the expected growth of the stored block count
    /// and only sizes the allocation.
    pub fn ilu_pattern(a: &Self, lev_fill: usize, fill_ratio: f64) -> Result<Self, KError> {
        if a.nrows != a.ncols {
            return Err(KError::Config(format!(
                "incomplete factorization needs a square matrix, got {}×{} blocks",
                a.nrows, a.ncols
            )));
        }
        let n = a.nrows;
        let expected = ((a.nnz().max(n) as f64) * fill_ratio.max(1.0)).ceil() as usize;
        let mut rowp = Vec::with_capacity(n + 1);
        let mut cols: Vec<usize> = Vec::with_capacity(expected);
        // levels of the strictly upper entries, per finished row
        let mut upper: Vec<Vec<(usize, usize)>> = Vec::with_capacity(n);
        rowp.push(0);
        for i in 0..n {
            let mut row: BTreeMap<usize, usize> =
                a.cols[a.rowp[i]..a.rowp[i + 1]].iter().map(|&c| (c, 0)).collect();
            row.entry(i).or_insert(0);
            let mut next = 0;
            loop {
                let Some((j, lev_ij)) = row.range(next..i).next().map(|(&j, &l)| (j, l)) else {
                    break;
                };
                next = j + 1;
                for &(k, lev_jk) in &upper[j] {
                    let lev = lev_ij + lev_jk + 1;
                    if lev <= lev_fill {
                        row.entry(k).and_modify(|l| *l = (*l).min(lev)).or_insert(lev);
                    }
                }
            }
            upper.push(row.range(i + 1..).map(|(&k, &l)| (k, l)).collect());
            cols.extend(row.keys());
            rowp.push(cols.len());
        }
        if cols.len() > expected {
            warn!(
                nnz = cols.len(),
                expected,
                fill_ratio,
                "ILU({lev_fill}) pattern exceeds the expected fill ratio"
            );
        }
        debug!(
            lev_fill,
            rows = n,
            nnz_a = a.nnz(),
            nnz_factor = cols.len(),
            "symbolic ILU({lev_fill}) pattern built"
        );
        Self::new(a.bsize, n, n, rowp, cols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(d: f64, o: f64) -> Vec<f64> {
        vec![d, o, -o, d]
    }

    // block-tridiagonal, diagonally dominant, 4 block rows of size 2
    fn tridiag(n: usize) -> BlockSparseMatrix<f64> {
        let mut blocks = Vec::new();
        for i in 0..n {
            blocks.push((i, i, block(6.0 + i as f64, 1.0)));
            if i > 0 {
                blocks.push((i, i - 1, block(-1.0, 0.5)));
            }
            if i + 1 < n {
                blocks.push((i, i + 1, block(-1.5, 0.25)));
            }
        }
        BlockSparseMatrix::from_blocks(2, n, n, blocks).unwrap()
    }

    #[test]
    fn rejects_unsorted_columns() {
        let err = BlockSparseMatrix::<f64>::new(1, 1, 2, vec![0, 2], vec![1, 0]);
        assert!(matches!(err, Err(KError::Config(_))));
    }

    #[test]
    fn rejects_row_pointer_past_columns() {
        let err = BlockSparseMatrix::<f64>::new(1, 2, 3, vec![0, 5, 3], vec![0, 1, 2]);
        assert!(matches!(err, Err(KError::Config(_))));
        let err = BlockSparseMatrix::<f64>::new(1, 2, 3, vec![0, 2, 1], vec![0]);
        assert!(matches!(err, Err(KError::Config(_))));
    }

    #[test]
    fn exact_factor_inverts_tridiagonal() {
        // tridiagonal has no fill, so ILU(0) is the exact LU
        let a = tridiag(4);
        let mut lu = BlockSparseMatrix::ilu_pattern(&a, 0, 1.0).unwrap();
        assert_eq!(lu.nnz(), a.nnz());
        lu.copy_values(&a).unwrap();
        lu.factor().unwrap();
        let x: Vec<f64> = (0..8).map(|v| v as f64 - 3.5).collect();
        let mut ax = vec![0.0; 8];
        a.mult(&x, &mut ax).unwrap();
        let mut back = vec![0.0; 8];
        lu.apply_factor(&ax, &mut back).unwrap();
        for (u, v) in back.iter().zip(&x) {
            assert!((u - v).abs() < 1e-12);
        }
    }

    #[test]
    fn ilu_pattern_adds_fill_by_level() {
        // arrow matrix: row 0 and column 0 dense
        let n = 4;
        let mut blocks = vec![];
        for i in 0..n {
            blocks.push((i, i, vec![4.0]));
            if i > 0 {
                blocks.push((0, i, vec![1.0]));
                blocks.push((i, 0, vec![1.0]));
            }
        }
        let a = BlockSparseMatrix::from_blocks(1, n, n, blocks).unwrap();
        let p0 = BlockSparseMatrix::ilu_pattern(&a, 0, 1.0).unwrap();
        let p1 = BlockSparseMatrix::ilu_pattern(&a, 1, 3.0).unwrap();
        assert_eq!(p0.nnz(), a.nnz());
        assert_eq!(p1.nnz(), n * n);
    }

    #[test]
    fn copy_values_zeroes_fill_entries() {
        let a = tridiag(3);
        let mut full = BlockSparseMatrix::from_blocks(
            2,
            3,
            3,
            (0..3).flat_map(|i| (0..3).map(move |j| (i, j, vec![9.0; 4]))),
        )
        .unwrap();
        full.copy_values(&a).unwrap();
        assert_eq!(full.block(0, 2), Some(&[0.0; 4][..]));
        assert_eq!(full.block(1, 1), a.block(1, 1));
    }

    #[test]
    fn incompatible_axpy_is_a_no_op() {
        let mut small = tridiag(3);
        let before = small.values().to_vec();
        let dense = BlockSparseMatrix::from_blocks(2, 3, 3, vec![(0, 2, vec![1.0; 4])]).unwrap();
        assert!(matches!(small.axpy(1.0, &dense), Err(KError::IncompatibleOperand(_))));
        assert!(small.axpby(2.0, 3.0, &tridiag(4)).is_err());
        assert_eq!(small.values(), &before[..]);
    }

    #[test]
    fn axpby_combines_values() {
        let mut y = tridiag(3);
        let x = tridiag(3);
        y.axpby(2.0, -1.0, &x).unwrap();
        assert_eq!(y.values(), x.values());
    }

    #[test]
    fn zero_row_leaves_identity() {
        let mut a = tridiag(3);
        a.zero_row(1, &[1], true).unwrap();
        let dense = a.to_dense();
        for c in 0..6 {
            assert_eq!(dense[(3, c)], if c == 3 { 1.0 } else { 0.0 });
        }
        assert_eq!(dense[(2, 2)], 7.0);
        assert!(a.zero_row(1, &[2], true).is_err());
    }

    #[test]
    fn add_diag_shifts_scalar_diagonal() {
        let mut a = tridiag(2);
        a.add_diag(0.5).unwrap();
        assert_eq!(a.block(1, 1), Some(&[7.5, 1.0, -1.0, 7.5][..]));
    }

    #[test]
    fn sor_converges_on_dominant_matrix() {
        let mut a = tridiag(5);
        let x: Vec<f64> = (0..10).map(|v| 1.0 + v as f64).collect();
        let mut rhs = vec![0.0; 10];
        a.mult(&x, &mut rhs).unwrap();
        let mut y = vec![0.0; 10];
        assert!(matches!(a.apply_sor(&rhs, &mut y, 1.0, 1), Err(KError::NotFactored(_))));
        a.factor_diag().unwrap();
        a.apply_ssor(&rhs, &mut y, 1.0, 40).unwrap();
        for (u, v) in y.iter().zip(&x) {
            assert!((u - v).abs() < 1e-10);
        }
    }
}
