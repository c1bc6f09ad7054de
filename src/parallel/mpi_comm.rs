//! MPI-based parallel communication module.
//!
//! This module provides an implementation of the `Comm` trait and of the
//! forward-exchange contract using the MPI (Message Passing Interface)
//! backend for distributed-memory parallelism. It is only available when the
//! `mpi` feature is enabled.
//!
//! # Usage
//!
//! - `MpiComm` wraps the world communicator and keeps MPI initialized for as
//!   long as it is alive.
//! - `MpiDistribute` turns the list of remote blocks referenced by an
//!   off-diagonal block into per-neighbour send/receive plans. The plans are
//!   negotiated once, collectively, at construction.
//!
//! # Example
//! ```no_run
//! # #[cfg(feature = "mpi")] {
//! use std::sync::Arc;
//! use parblock::parallel::{Comm, MpiComm};
//! let comm = Arc::new(MpiComm::new().unwrap());
//! println!("Rank: {} / {}", comm.rank(), comm.size());
//! comm.barrier();
//! # }
//! ```
//!
//! # References
//! - [MPI Standard](https://www.mpi-forum.org/)

use std::sync::Arc;

use mpi::collective::SystemOperation;
use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;

use crate::core::Scalar;
use crate::error::KError;
use crate::parallel::exchange::{read_block, InFlight};
use crate::parallel::{Comm, ExchangeContext, ExchangeToken, RowMap, VecDistribute};

/// MPI communicator wrapper for distributed parallelism.
pub struct MpiComm {
    /// The MPI world communicator (all processes in the job).
    world: SimpleCommunicator,
    rank: usize,
    size: usize,
    // Dropping the universe finalizes MPI.
    _universe: Option<Universe>,
}

impl MpiComm {
    /// Initializes MPI and constructs a new `MpiComm` instance.
    ///
    /// Fails if MPI was already initialized in this process.
    pub fn new() -> Result<Self, KError> {
        let universe = mpi::initialize()
            .ok_or_else(|| KError::Config("MPI is already initialized".into()))?;
        let world = universe.world();
        let rank = world.rank() as usize;
        let size = world.size() as usize;
        Ok(MpiComm { world, rank, size, _universe: Some(universe) })
    }

    /// Wraps a communicator whose MPI environment is managed elsewhere.
    pub fn from_world(world: SimpleCommunicator) -> Self {
        let rank = world.rank() as usize;
        let size = world.size() as usize;
        MpiComm { world, rank, size, _universe: None }
    }

    pub fn world(&self) -> &SimpleCommunicator {
        &self.world
    }
}

impl Comm for MpiComm {
    /// Returns the rank (ID) of this process.
    fn rank(&self) -> usize {
        self.rank
    }
    /// Returns the total number of processes in the communicator.
    fn size(&self) -> usize {
        self.size
    }
    /// Synchronizes all processes at a barrier.
    fn barrier(&self) {
        self.world.barrier();
    }

    /// Performs an element-wise all-reduce sum across all processes.
    fn all_reduce_slice(&self, x: &mut [f64]) {
        let send = x.to_vec();
        self.world.all_reduce_into(&send[..], x, SystemOperation::sum());
    }

    fn all_gather(&self, x: usize) -> Vec<usize> {
        let mut out = vec![0u64; self.size];
        self.world.all_gather_into(&(x as u64), &mut out[..]);
        out.into_iter().map(|v| v as usize).collect()
    }
}

/// Exchange plans negotiated over MPI.
pub struct MpiDistribute {
    comm: Arc<MpiComm>,
    indices: Vec<usize>,
    /// (owner rank, receive slots filled by that rank)
    recv_plan: Vec<(usize, Vec<usize>)>,
    /// (requesting rank, local blocks sent to it)
    send_plan: Vec<(usize, Vec<usize>)>,
}

impl MpiDistribute {
    /// Collective: every rank must call it with its own index list.
    pub fn new(comm: Arc<MpiComm>, rmap: &RowMap, indices: Vec<usize>) -> Result<Self, KError> {
        let size = comm.size();
        let mut recv_plan: Vec<(usize, Vec<usize>)> = Vec::new();
        let mut requests: Vec<Vec<u64>> = vec![Vec::new(); size];
        for (slot, &g) in indices.iter().enumerate() {
            let owner = rmap.owner_of(g).ok_or_else(|| {
                KError::Config(format!(
                    "external block {g} is outside the global range 0..{}",
                    rmap.global_size()
                ))
            })?;
            requests[owner].push((g - rmap.owner_range()[owner]) as u64);
            match recv_plan.iter_mut().find(|(p, _)| *p == owner) {
                Some((_, slots)) => slots.push(slot),
                None => recv_plan.push((owner, vec![slot])),
            }
        }
        recv_plan.sort_by_key(|(p, _)| *p);

        let counts: Vec<u64> = requests.iter().map(|r| r.len() as u64).collect();
        let mut incoming_counts = vec![0u64; size];
        comm.world.all_to_all_into(&counts[..], &mut incoming_counts[..]);

        let mut incoming: Vec<(usize, Vec<u64>)> = incoming_counts
            .iter()
            .enumerate()
            .filter(|(_, c)| **c > 0)
            .map(|(q, &c)| (q, vec![0u64; c as usize]))
            .collect();
        let world = &comm.world;
        mpi::request::scope(|scope| {
            let mut recvs = Vec::new();
            for (q, buf) in incoming.iter_mut() {
                recvs.push(world.process_at_rank(*q as i32).immediate_receive_into(scope, &mut buf[..]));
            }
            let mut sends = Vec::new();
            for (p, req) in requests.iter().enumerate().filter(|(_, r)| !r.is_empty()) {
                sends.push(world.process_at_rank(p as i32).immediate_send(scope, &req[..]));
            }
            for r in recvs {
                r.wait();
            }
            for s in sends {
                s.wait();
            }
        });
        let send_plan = incoming
            .into_iter()
            .map(|(q, blocks)| (q, blocks.into_iter().map(|b| b as usize).collect()))
            .collect();
        Ok(Self { comm, indices, recv_plan, send_plan })
    }
}

struct MpiContext {
    comm: Arc<MpiComm>,
    bsize: usize,
    dim: usize,
    recv_plan: Vec<(usize, Vec<usize>)>,
    send_plan: Vec<(usize, Vec<usize>)>,
    send_bufs: Vec<Vec<f64>>,
    recv_bufs: Vec<Vec<f64>>,
    flight: InFlight,
}

fn width<T: Scalar>() -> usize {
    if T::IS_COMPLEX { 2 } else { 1 }
}

impl<T: Scalar> ExchangeContext<T> for MpiContext {
    fn block_size(&self) -> usize {
        self.bsize
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn begin_forward(&mut self, local: &[T], var_offset: usize) -> Result<ExchangeToken, KError> {
        let token = self.flight.begin()?;
        let b = self.bsize;
        let mut block = vec![T::zero(); b];
        for ((_, blocks), buf) in self.send_plan.iter().zip(self.send_bufs.iter_mut()) {
            buf.clear();
            for &lb in blocks {
                if let Err(e) = read_block(local, b, lb, var_offset, &mut block) {
                    self.flight.abort();
                    return Err(e);
                }
                for v in &block {
                    buf.push(v.re());
                    if T::IS_COMPLEX {
                        buf.push(v.im());
                    }
                }
            }
        }
        Ok(token)
    }

    fn end_forward(&mut self, token: ExchangeToken, ext: &mut [T]) -> Result<(), KError> {
        let b = self.bsize;
        self.flight.end(token)?;
        let w = width::<T>();
        for ((_, slots), buf) in self.recv_plan.iter().zip(self.recv_bufs.iter_mut()) {
            buf.resize(slots.len() * b * w, 0.0);
        }
        let world = &self.comm.world;
        let recv_plan = &self.recv_plan;
        let send_plan = &self.send_plan;
        let recv_bufs = &mut self.recv_bufs;
        let send_bufs = &self.send_bufs;
        mpi::request::scope(|scope| {
            let mut recvs = Vec::new();
            for ((p, _), buf) in recv_plan.iter().zip(recv_bufs.iter_mut()) {
                recvs.push(world.process_at_rank(*p as i32).immediate_receive_into(scope, &mut buf[..]));
            }
            let mut sends = Vec::new();
            for ((q, _), buf) in send_plan.iter().zip(send_bufs.iter()) {
                sends.push(world.process_at_rank(*q as i32).immediate_send(scope, &buf[..]));
            }
            for r in recvs {
                r.wait();
            }
            for s in sends {
                s.wait();
            }
        });
        // peers are served even when the receive buffer is wrong
        KError::check_len(b * self.dim, ext.len())?;
        for ((_, slots), buf) in self.recv_plan.iter().zip(self.recv_bufs.iter()) {
            for (k, &slot) in slots.iter().enumerate() {
                for j in 0..b {
                    let at = (k * b + j) * w;
                    let im = if w == 2 { buf[at + 1] } else { 0.0 };
                    ext[slot * b + j] = T::from_parts(buf[at], im);
                }
            }
        }
        Ok(())
    }
}

impl<T: Scalar> VecDistribute<T> for MpiDistribute {
    fn dimension(&self) -> usize {
        self.indices.len()
    }

    fn indices(&self) -> &[usize] {
        &self.indices
    }

    fn create_ctx(&self, bsize: usize) -> Box<dyn ExchangeContext<T>> {
        Box::new(MpiContext {
            comm: Arc::clone(&self.comm),
            bsize,
            dim: self.indices.len(),
            recv_plan: self.recv_plan.clone(),
            send_plan: self.send_plan.clone(),
            send_bufs: vec![Vec::new(); self.send_plan.len()],
            recv_bufs: vec![Vec::new(); self.recv_plan.len()],
            flight: InFlight::default(),
        })
    }
}
