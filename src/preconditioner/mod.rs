//! Preconditioners for the distributed block matrix.
//!
//! This module defines the Preconditioner trait and its three implementations:
//! point relaxation (SOR/SSOR), additive Schwarz with a local ILU(k), and the
//! approximate Schur complement method with an inner interface solve.

use crate::core::Scalar;
use crate::error::KError;

/// A preconditioner M ≈ A⁻¹.
///
/// `factor` must run before the first `apply_factor`, and again whenever the
/// matrix values change.
pub trait Preconditioner<T: Scalar> {
    /// Setup/factorize from the current matrix values.
    fn factor(&mut self) -> Result<(), KError>;
    /// Apply M⁻¹ to x, writing y = M⁻¹ x
    fn apply_factor(&mut self, x: &[T], y: &mut [T]) -> Result<(), KError>;
}

pub mod asm;
pub mod schur;
pub mod sor;

// Re-exports for convenience
pub use asm::AdditiveSchwarz;
pub use schur::ApproximateSchur;
pub use sor::{PointRelaxation, RelaxFlags};

/// Unified preconditioner enum for all supported types.
pub use crate::context::pc_context::Pc;
