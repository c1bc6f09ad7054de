//! parblock: distributed block-CSR matrices and domain-decomposition preconditioners
//!
//! Each process owns a contiguous range of block rows of a sparse matrix whose
//! entries are small dense `b×b` blocks. The owned rows are split into an
//! on-process square block (`Aloc`) and an off-process coupling block (`Bext`)
//! that touches only the trailing *interface* rows. On top of this layout the
//! crate provides the distributed product, boundary-condition rows, and three
//! preconditioners: block SOR/SSOR, additive Schwarz with a local ILU(k), and an
//! approximate Schur complement method with an inner flexible GMRES on the
//! interface unknowns.
//!
//! Communication goes through the [`parallel::Comm`] and
//! [`parallel::VecDistribute`] contracts, with serial, threaded, and MPI
//! (feature `mpi`) backends.

pub mod parallel;

pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod matrix;
pub mod preconditioner;
pub mod solver;
pub mod utils;

// Re-exports for convenience
pub use config::{PcOptions, PcType};
pub use context::{build_pc, Pc};
pub use core::{DistributedInnerProduct, InnerProduct, LinearOperator, Scalar};
pub use error::KError;
pub use matrix::{
    BcEntry, BcMap, BlockSparseMatrix, DistributedMatrix, GlobalSchurMat, Layout,
    SharedBlockMatrix,
};
pub use parallel::{Comm, RowMap, SerialComm, SerialDistribute, ThreadComm, ThreadDistribute, VecDistribute};
pub use preconditioner::{
    AdditiveSchwarz, ApproximateSchur, PointRelaxation, Preconditioner, RelaxFlags,
};
pub use solver::{GmresSolver, LinearSolver};

// Re-export SolveStats at the crate root for convenience
pub use utils::convergence::{Convergence, SolveStats};
