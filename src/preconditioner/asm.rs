//! Additive Schwarz preconditioner (ASM)
//!
//! Each rank factors its own diagonal block with a level-of-fill ILU and
//! applies `y = U⁻¹ L⁻¹ x`; the remote coupling is ignored. Optionally a
//! scalar shift is added to the diagonal before factoring.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::Scalar;
use crate::error::KError;
use crate::matrix::{BlockSparseMatrix, DistributedMatrix, SharedBlockMatrix};
use crate::preconditioner::Preconditioner;

/// Allocate the ILU(k) factor pattern of `aloc`.
pub(crate) fn factor_pattern<T: Scalar>(
    aloc: &SharedBlockMatrix<T>,
    lev_fill: usize,
    fill_ratio: f64,
) -> Result<SharedBlockMatrix<T>, KError> {
    let apc = BlockSparseMatrix::ilu_pattern(&aloc.read(), lev_fill, fill_ratio)?;
    Ok(Arc::new(RwLock::new(apc)))
}

/// Apc ← Aloc (+ alpha·I), then factor in place.
pub(crate) fn refactor<T: Scalar>(
    apc: &SharedBlockMatrix<T>,
    aloc: &SharedBlockMatrix<T>,
    alpha: T,
) -> Result<(), KError> {
    let mut apc = apc.write();
    apc.copy_values(&aloc.read())?;
    if alpha != T::zero() {
        apc.add_diag(alpha)?;
    }
    apc.factor()
}

pub struct AdditiveSchwarz<T: Scalar> {
    aloc: SharedBlockMatrix<T>,
    apc: SharedBlockMatrix<T>,
    alpha: T,
    factored: bool,
}

impl<T: Scalar> AdditiveSchwarz<T> {
    /// Build the symbolic factor of the diagonal block with fill level `lev_fill`.
    pub fn new(mat: &DistributedMatrix<T>, lev_fill: usize, fill_ratio: f64) -> Result<Self, KError> {
        let aloc = mat.blocks().0.clone();
        let apc = factor_pattern(&aloc, lev_fill, fill_ratio)?;
        Ok(Self { aloc, apc, alpha: T::zero(), factored: false })
    }

    /// Diagonal shift added before every factorization.
    pub fn set_diag_shift(&mut self, alpha: T) {
        self.alpha = alpha;
    }

    /// The factor matrix.
    pub fn factor_matrix(&self) -> &SharedBlockMatrix<T> {
        &self.apc
    }
}

impl<T: Scalar> Preconditioner<T> for AdditiveSchwarz<T> {
    fn factor(&mut self) -> Result<(), KError> {
        self.factored = false;
        refactor(&self.apc, &self.aloc, self.alpha)?;
        self.factored = true;
        Ok(())
    }

    /// y = U⁻¹ L⁻¹ x.
    fn apply_factor(&mut self, x: &[T], y: &mut [T]) -> Result<(), KError> {
        if !self.factored {
            return Err(KError::NotFactored("AdditiveSchwarz"));
        }
        self.apc.read().apply_factor(x, y)
    }
}
