//! Preconditioner context and factory.
//!
//! This module defines the `Pc` enum, a unified handle over the block
//! preconditioners of this crate, and `build_pc`, which constructs one from a
//! [`DistributedMatrix`] and a set of [`PcOptions`].
//!
//! # Example
//!
//! ```rust,ignore
//! use parblock::{build_pc, PcOptions, PcType, Preconditioner};
//! let opts = PcOptions { pc_type: PcType::ApproximateSchur, lev_fill: 2, ..Default::default() };
//! let mut pc = build_pc(&mat, &opts)?;
//! pc.factor()?;
//! pc.apply_factor(&r, &mut z)?;
//! ```

use std::fmt;

use crate::config::options::{PcOptions, PcType};
use crate::core::Scalar;
use crate::error::KError;
use crate::matrix::DistributedMatrix;
use crate::preconditioner::{
    AdditiveSchwarz, ApproximateSchur, PointRelaxation, Preconditioner, RelaxFlags,
};

/// Unified preconditioner enum for all supported types.
pub enum Pc<T: Scalar> {
    Sor(PointRelaxation<T>),
    AdditiveSchwarz(AdditiveSchwarz<T>),
    ApproximateSchur(ApproximateSchur<T>),
}

impl<T: Scalar> Pc<T> {
    pub fn pc_type(&self) -> PcType {
        match self {
            Pc::Sor(_) => PcType::Sor,
            Pc::AdditiveSchwarz(_) => PcType::AdditiveSchwarz,
            Pc::ApproximateSchur(_) => PcType::ApproximateSchur,
        }
    }
}

impl<T: Scalar> fmt::Debug for Pc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pc::Sor(p) => write!(f, "{p}"),
            other => write!(f, "{:?}", other.pc_type()),
        }
    }
}

impl<T: Scalar> Preconditioner<T> for Pc<T> {
    fn factor(&mut self) -> Result<(), KError> {
        match self {
            Pc::Sor(p) => p.factor(),
            Pc::AdditiveSchwarz(p) => p.factor(),
            Pc::ApproximateSchur(p) => p.factor(),
        }
    }

    fn apply_factor(&mut self, x: &[T], y: &mut [T]) -> Result<(), KError> {
        match self {
            Pc::Sor(p) => p.apply_factor(x, y),
            Pc::AdditiveSchwarz(p) => p.apply_factor(x, y),
            Pc::ApproximateSchur(p) => p.apply_factor(x, y),
        }
    }
}

/// Build the preconditioner selected by `opts`. Not yet factored.
///
/// Collective for [`PcType::ApproximateSchur`] on more than one rank.
pub fn build_pc<T: Scalar>(mat: &DistributedMatrix<T>, opts: &PcOptions) -> Result<Pc<T>, KError> {
    let shift = T::from_real(opts.diag_shift);
    Ok(match opts.pc_type {
        PcType::Sor => {
            let mut flags = RelaxFlags::empty();
            flags.set(RelaxFlags::ZERO_GUESS, opts.zero_guess);
            flags.set(RelaxFlags::SYMMETRIC, opts.symmetric);
            Pc::Sor(PointRelaxation::new(mat, opts.omega, opts.iters, flags))
        }
        PcType::AdditiveSchwarz => {
            let mut pc = AdditiveSchwarz::new(mat, opts.lev_fill, opts.fill_ratio)?;
            pc.set_diag_shift(shift);
            Pc::AdditiveSchwarz(pc)
        }
        PcType::ApproximateSchur => {
            let mut pc = ApproximateSchur::new(
                mat,
                opts.lev_fill,
                opts.fill_ratio,
                opts.inner_iters,
                opts.inner_rtol,
                opts.inner_atol,
            )?;
            pc.set_diag_shift(shift);
            Pc::ApproximateSchur(pc)
        }
    })
}
