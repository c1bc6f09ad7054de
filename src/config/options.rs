//! API options for the preconditioners.
//!
//! This module provides the `PcOptions` struct, which selects one of the
//! block preconditioners and carries its tuning parameters: the relaxation
//! factor and sweep count for SOR, the fill level of the local ILU(k), a
//! diagonal shift, and the inner Krylov settings of the Schur method.

use std::str::FromStr;

use crate::error::KError;

/// Preconditioner types.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PcType {
    /// Block SOR/SSOR with frozen remote coupling.
    Sor,
    /// Local ILU(k) of the diagonal block.
    #[default]
    AdditiveSchwarz,
    /// Local ILU(k) with an inner GMRES on the interface unknowns.
    ApproximateSchur,
}

impl FromStr for PcType {
    type Err = KError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sor" | "ssor" => Ok(PcType::Sor),
            "asm" | "additive_schwarz" => Ok(PcType::AdditiveSchwarz),
            "schur" | "approximate_schur" => Ok(PcType::ApproximateSchur),
            other => Err(KError::Config(format!("unknown preconditioner type '{other}'"))),
        }
    }
}

/// Preconditioner types & parameters.
#[derive(Clone, Debug)]
pub struct PcOptions {
    pub pc_type: PcType,

    /// Relaxation factor ω for SOR
    pub omega: f64,
    /// Sweeps per application for SOR
    pub iters: usize,
    /// Forward then backward sweep
    pub symmetric: bool,
    /// Start SOR from y = 0
    pub zero_guess: bool,

    /// Level of fill for the ILU(k) factor
    pub lev_fill: usize,
    /// Expected nnz growth of the factor over the diagonal block
    pub fill_ratio: f64,
    /// Added to the diagonal before factoring
    pub diag_shift: f64,

    /// Krylov subspace size (and iteration cap) of the interface solve
    pub inner_iters: usize,
    pub inner_rtol: f64,
    pub inner_atol: f64,
}

impl Default for PcOptions {
    fn default() -> Self {
        Self {
            pc_type: PcType::default(),
            omega: 1.0,
            iters: 1,
            symmetric: false,
            zero_guess: true,
            lev_fill: 1,
            fill_ratio: 3.0,
            diag_shift: 0.0,
            inner_iters: 10,
            inner_rtol: 1e-3,
            inner_atol: 1e-30,
        }
    }
}
