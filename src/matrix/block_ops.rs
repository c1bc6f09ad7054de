//! Fixed-block-size kernels over blocked compressed-row storage.
//!
//! Every kernel works on a borrowed [`BlockCsr`] view: `nrows` block-rows,
//! `rowp[nrows+1]` row offsets, `cols` sorted ascending within each row and
//! `values` holding `b×b` row-major blocks, one per entry. The triangular
//! solves additionally read `diag`, the position of each row's diagonal
//! entry, and expect the block stored there to already hold the inverse of
//! the pivot (the post-condition of [`BlockSparseMatrix::factor`]).
//!
//! Vector arguments are laid out block by block: entry `v` of block `i` is at
//! `x[b*i + v]`. Lengths are the caller's responsibility; the kernels panic on
//! out-of-range slices like any slice indexing.
//!
//! [`BlockSparseMatrix::factor`]: crate::matrix::BlockSparseMatrix::factor

use crate::core::Scalar;
use crate::error::KError;

/// Borrowed view of one blocked CSR matrix.
#[derive(Clone, Copy, Debug)]
pub struct BlockCsr<'a, T> {
    pub bsize: usize,
    pub nrows: usize,
    pub rowp: &'a [usize],
    pub cols: &'a [usize],
    /// Diagonal positions; empty when the pattern lacks a diagonal entry.
    pub diag: &'a [usize],
    pub values: &'a [T],
}

/// Mutable view used as the target of [`mat_mult_add`].
#[derive(Debug)]
pub struct BlockCsrMut<'a, T> {
    pub bsize: usize,
    pub nrows: usize,
    pub rowp: &'a [usize],
    pub cols: &'a [usize],
    pub values: &'a mut [T],
}

impl<'a, T: Scalar> BlockCsr<'a, T> {
    #[inline]
    fn block(&self, k: usize) -> &'a [T] {
        let bb = self.bsize * self.bsize;
        &self.values[k * bb..(k + 1) * bb]
    }
}

/// Multiplier applied by the block-block update.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Scale<T> {
    Plus,
    Minus,
    By(T),
}

impl<T: Scalar> Scale<T> {
    pub(crate) fn of(alpha: T) -> Self {
        if alpha == T::one() {
            Scale::Plus
        } else if alpha == -T::one() {
            Scale::Minus
        } else {
            Scale::By(alpha)
        }
    }
}

/// y = A·x for a single block.
#[inline]
pub fn gemv<T: Scalar>(b: usize, a: &[T], x: &[T], y: &mut [T]) {
    for r in 0..b {
        let row = &a[r * b..(r + 1) * b];
        y[r] = row.iter().zip(x).fold(T::zero(), |acc, (&av, &xv)| acc + av * xv);
    }
}

/// y += A·x for a single block.
#[inline]
pub fn gemv_add<T: Scalar>(b: usize, a: &[T], x: &[T], y: &mut [T]) {
    for r in 0..b {
        let row = &a[r * b..(r + 1) * b];
        y[r] += row.iter().zip(x).fold(T::zero(), |acc, (&av, &xv)| acc + av * xv);
    }
}

/// y -= A·x for a single block.
#[inline]
pub fn gemv_sub<T: Scalar>(b: usize, a: &[T], x: &[T], y: &mut [T]) {
    for r in 0..b {
        let row = &a[r * b..(r + 1) * b];
        y[r] -= row.iter().zip(x).fold(T::zero(), |acc, (&av, &xv)| acc + av * xv);
    }
}

/// C = A·B for single blocks.
#[inline]
pub fn gemm<T: Scalar>(b: usize, a: &[T], bm: &[T], c: &mut [T]) {
    for r in 0..b {
        for col in 0..b {
            let mut s = T::zero();
            for l in 0..b {
                s += a[r * b + l] * bm[l * b + col];
            }
            c[r * b + col] = s;
        }
    }
}

#[inline]
pub(crate) fn gemm_acc<T: Scalar>(b: usize, scale: Scale<T>, a: &[T], bm: &[T], c: &mut [T]) {
    for r in 0..b {
        for col in 0..b {
            let mut s = T::zero();
            for l in 0..b {
                s += a[r * b + l] * bm[l * b + col];
            }
            match scale {
                Scale::Plus => c[r * b + col] += s,
                Scale::Minus => c[r * b + col] -= s,
                Scale::By(alpha) => c[r * b + col] += alpha * s,
            }
        }
    }
}

/// Invert one `b×b` block in place (Gauss-Jordan, partial pivoting).
///
/// `row` only labels the error. A block with a non-finite entry, or a pivot
/// whose modulus is zero or below `b·ε·max|a|`, is reported as
/// [`KError::SingularPivot`], leaving `a` unspecified.
pub fn invert_block<T: Scalar>(b: usize, a: &mut [T], row: usize) -> Result<(), KError> {
    if !a.iter().all(|&v| v.is_finite()) {
        return Err(KError::SingularPivot { row });
    }
    let scale = a.iter().fold(0.0f64, |m, v| m.max(v.modulus()));
    let tol = scale * f64::EPSILON * b as f64;
    let mut m = a.to_vec();
    let inv = a;
    inv.iter_mut().for_each(|v| *v = T::zero());
    for d in 0..b {
        inv[d * b + d] = T::one();
    }
    for c in 0..b {
        let (p, pmod) = (c..b)
            .map(|r| (r, m[r * b + c].modulus()))
            .fold((c, -1.0), |best, cur| if cur.1 > best.1 { cur } else { best });
        if pmod == 0.0 || pmod <= tol {
            return Err(KError::SingularPivot { row });
        }
        if p != c {
            for k in 0..b {
                m.swap(p * b + k, c * b + k);
                inv.swap(p * b + k, c * b + k);
            }
        }
        let piv = T::one() / m[c * b + c];
        for k in 0..b {
            m[c * b + k] *= piv;
            inv[c * b + k] *= piv;
        }
        for r in (0..b).filter(|&r| r != c) {
            let f = m[r * b + c];
            if f == T::zero() {
                continue;
            }
            for k in 0..b {
                let (mk, ik) = (m[c * b + k], inv[c * b + k]);
                m[r * b + k] -= f * mk;
                inv[r * b + k] -= f * ik;
            }
        }
    }
    Ok(())
}

/// dst_row += scale · lhs · src_row over matching columns.
///
/// Both column lists are sorted; entries of `src` without a partner in `dst`
/// are skipped.
pub(crate) fn merge_row_update<T: Scalar>(
    b: usize,
    scale: Scale<T>,
    lhs: &[T],
    src_cols: &[usize],
    src_vals: &[T],
    dst_cols: &[usize],
    dst_vals: &mut [T],
) {
    let bb = b * b;
    let mut cp = 0;
    for (kp, &k) in src_cols.iter().enumerate() {
        while cp < dst_cols.len() && dst_cols[cp] < k {
            cp += 1;
        }
        if cp >= dst_cols.len() {
            break;
        }
        if dst_cols[cp] == k {
            gemm_acc(
                b,
                scale,
                lhs,
                &src_vals[kp * bb..(kp + 1) * bb],
                &mut dst_vals[cp * bb..(cp + 1) * bb],
            );
        }
    }
}

/// y = A·x.
pub fn mult<T: Scalar>(a: &BlockCsr<'_, T>, x: &[T], y: &mut [T]) {
    let b = a.bsize;
    for i in 0..a.nrows {
        let yi = &mut y[i * b..(i + 1) * b];
        yi.iter_mut().for_each(|v| *v = T::zero());
        for k in a.rowp[i]..a.rowp[i + 1] {
            let j = a.cols[k];
            gemv_add(b, a.block(k), &x[j * b..(j + 1) * b], yi);
        }
    }
}

/// z = A·x + y.
pub fn mult_add<T: Scalar>(a: &BlockCsr<'_, T>, x: &[T], y: &[T], z: &mut [T]) {
    let n = a.nrows * a.bsize;
    z[..n].copy_from_slice(&y[..n]);
    mult_add_in_place(a, x, z);
}

/// y += A·x.
pub fn mult_add_in_place<T: Scalar>(a: &BlockCsr<'_, T>, x: &[T], y: &mut [T]) {
    let b = a.bsize;
    for i in 0..a.nrows {
        let yi = &mut y[i * b..(i + 1) * b];
        for k in a.rowp[i]..a.rowp[i + 1] {
            let j = a.cols[k];
            gemv_add(b, a.block(k), &x[j * b..(j + 1) * b], yi);
        }
    }
}

/// y = L⁻¹·y with the unit lower factor (entries left of the diagonal).
pub fn apply_lower<T: Scalar>(a: &BlockCsr<'_, T>, y: &mut [T]) {
    let b = a.bsize;
    for i in 1..a.nrows {
        let (done, rest) = y.split_at_mut(i * b);
        let yi = &mut rest[..b];
        for k in a.rowp[i]..a.diag[i] {
            let j = a.cols[k];
            gemv_sub(b, a.block(k), &done[j * b..(j + 1) * b], yi);
        }
    }
}

/// y = U⁻¹·y, using the inverted pivots stored at `diag`.
pub fn apply_upper<T: Scalar>(a: &BlockCsr<'_, T>, y: &mut [T]) {
    let b = a.bsize;
    let mut tmp = vec![T::zero(); b];
    for i in (0..a.nrows).rev() {
        let (head, tail) = y.split_at_mut((i + 1) * b);
        tmp.copy_from_slice(&head[i * b..]);
        for k in a.diag[i] + 1..a.rowp[i + 1] {
            let j = a.cols[k] - i - 1;
            gemv_sub(b, a.block(k), &tail[j * b..(j + 1) * b], &mut tmp);
        }
        gemv(b, a.block(a.diag[i]), &tmp, &mut head[i * b..]);
    }
}

/// Lower solve restricted to rows `>= var_offset`.
///
/// `x` holds only the trailing rows: block `i` is at `x[b*(i - var_offset)..]`.
/// Columns below `var_offset` are ignored.
pub fn apply_partial_lower<T: Scalar>(a: &BlockCsr<'_, T>, x: &mut [T], var_offset: usize) {
    let b = a.bsize;
    for i in var_offset + 1..a.nrows {
        let (done, rest) = x.split_at_mut((i - var_offset) * b);
        let xi = &mut rest[..b];
        let row = &a.cols[a.rowp[i]..a.diag[i]];
        let first = a.rowp[i] + row.partition_point(|&c| c < var_offset);
        for k in first..a.diag[i] {
            let j = a.cols[k] - var_offset;
            gemv_sub(b, a.block(k), &done[j * b..(j + 1) * b], xi);
        }
    }
}

/// Upper solve restricted to rows `>= var_offset`, same layout as
/// [`apply_partial_lower`].
pub fn apply_partial_upper<T: Scalar>(a: &BlockCsr<'_, T>, x: &mut [T], var_offset: usize) {
    let b = a.bsize;
    let mut tmp = vec![T::zero(); b];
    for i in (var_offset..a.nrows).rev() {
        let li = i - var_offset;
        let (head, tail) = x.split_at_mut((li + 1) * b);
        tmp.copy_from_slice(&head[li * b..]);
        for k in a.diag[i] + 1..a.rowp[i + 1] {
            let j = a.cols[k] - i - 1;
            gemv_sub(b, a.block(k), &tail[j * b..(j + 1) * b], &mut tmp);
        }
        gemv(b, a.block(a.diag[i]), &tmp, &mut head[li * b..]);
    }
}

/// Back-substitute the leading rows `[0, var_offset)` of a full vector whose
/// trailing rows are already solved.
pub fn apply_factor_schur<T: Scalar>(a: &BlockCsr<'_, T>, x: &mut [T], var_offset: usize) {
    let b = a.bsize;
    let mut tmp = vec![T::zero(); b];
    for i in (0..var_offset.min(a.nrows)).rev() {
        let (head, tail) = x.split_at_mut((i + 1) * b);
        tmp.copy_from_slice(&head[i * b..]);
        for k in a.diag[i] + 1..a.rowp[i + 1] {
            let j = a.cols[k] - i - 1;
            gemv_sub(b, a.block(k), &tail[j * b..(j + 1) * b], &mut tmp);
        }
        gemv(b, a.block(a.diag[i]), &tmp, &mut head[i * b..]);
    }
}

/// C += alpha·A·B into the existing pattern of `C`.
///
/// Products landing on a column absent from `C` are dropped.
pub fn mat_mult_add<T: Scalar>(
    alpha: T,
    a: &BlockCsr<'_, T>,
    bm: &BlockCsr<'_, T>,
    c: &mut BlockCsrMut<'_, T>,
) {
    let b = a.bsize;
    let scale = Scale::of(alpha);
    for i in 0..a.nrows.min(c.nrows) {
        let (c_start, c_end) = (c.rowp[i], c.rowp[i + 1]);
        let bb = b * b;
        for jp in a.rowp[i]..a.rowp[i + 1] {
            let j = a.cols[jp];
            let (k_start, k_end) = (bm.rowp[j], bm.rowp[j + 1]);
            merge_row_update(
                b,
                scale,
                a.block(jp),
                &bm.cols[k_start..k_end],
                &bm.values[k_start * bb..k_end * bb],
                &c.cols[c_start..c_end],
                &mut c.values[c_start * bb..c_end * bb],
            );
        }
    }
}
