//! Process-level communication.
//!
//! `Comm` covers the collectives the solvers need (reductions for inner
//! products, an all-gather for ownership ranges). Point-to-point traffic goes
//! exclusively through the exchange contract in [`exchange`].
//!
//! Backends:
//! - [`SerialComm`]: a single process.
//! - [`ThreadComm`]: ranks as threads of one process, sharing memory.
//! - `MpiComm` (feature `mpi`): MPI world communicator.

pub trait Comm {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn barrier(&self);
    /// Sum `x` over all ranks.
    fn all_reduce(&self, x: f64) -> f64 {
        let mut buf = [x];
        self.all_reduce_slice(&mut buf);
        buf[0]
    }
    /// Element-wise sum over all ranks, in place.
    fn all_reduce_slice(&self, x: &mut [f64]);
    /// Collect one value from every rank, ordered by rank.
    fn all_gather(&self, x: usize) -> Vec<usize>;
}

pub mod row_map;
pub use row_map::RowMap;

pub mod exchange;
pub use exchange::{ExchangeContext, ExchangeToken, SerialDistribute, VecDistribute};

pub mod thread_comm;
pub use thread_comm::{ThreadComm, ThreadDistribute};

#[cfg(feature = "mpi")]
pub mod mpi_comm;
#[cfg(feature = "mpi")]
pub use mpi_comm::{MpiComm, MpiDistribute};

/// Single-process communicator.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialComm;

impl Comm for SerialComm {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn barrier(&self) {}
    fn all_reduce(&self, x: f64) -> f64 {
        x
    }
    fn all_reduce_slice(&self, _x: &mut [f64]) {}
    fn all_gather(&self, x: usize) -> Vec<usize> {
        vec![x]
    }
}
