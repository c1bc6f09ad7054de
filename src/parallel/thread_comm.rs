//! Ranks as threads of a single process.
//!
//! `ThreadComm::world(n)` hands out one communicator per rank; each is moved
//! into its own thread and used exactly like an MPI rank. Collectives are
//! built from a shared barrier and per-rank contribution slots, and every rank
//! sums contributions in rank order, so reductions are bitwise identical
//! everywhere.
//!
//! Exchanges publish the owner's vector into its slot in `begin_forward` and
//! read remote slots in `end_forward` between two barriers, so local work
//! placed between the calls overlaps with the other ranks.

use std::any::Any;
use std::sync::{Arc, Barrier};

use parking_lot::{Mutex, RwLock};

use crate::core::Scalar;
use crate::error::KError;
use crate::parallel::exchange::{read_block, InFlight};
use crate::parallel::{Comm, ExchangeContext, ExchangeToken, RowMap, VecDistribute};

type Published = Arc<dyn Any + Send + Sync>;

struct PublishedVec<T> {
    data: Vec<T>,
    var_offset: usize,
}

struct Shared {
    size: usize,
    barrier: Barrier,
    reduce: Vec<Mutex<Vec<f64>>>,
    gather: Vec<Mutex<usize>>,
    slots: Vec<RwLock<Option<Published>>>,
}

/// Communicator for one rank of an in-process world.
#[derive(Clone)]
pub struct ThreadComm {
    rank: usize,
    shared: Arc<Shared>,
}

impl ThreadComm {
    /// Create communicators for `size` ranks sharing one world.
    pub fn world(size: usize) -> Vec<ThreadComm> {
        let size = size.max(1);
        let shared = Arc::new(Shared {
            size,
            barrier: Barrier::new(size),
            reduce: (0..size).map(|_| Mutex::new(Vec::new())).collect(),
            gather: (0..size).map(|_| Mutex::new(0)).collect(),
            slots: (0..size).map(|_| RwLock::new(None)).collect(),
        });
        (0..size)
            .map(|rank| ThreadComm { rank, shared: Arc::clone(&shared) })
            .collect()
    }

    fn publish(&self, item: Published) {
        *self.shared.slots[self.rank].write() = Some(item);
    }

    fn published(&self, rank: usize) -> Option<Published> {
        self.shared.slots[rank].read().clone()
    }
}

impl Comm for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }

    fn all_reduce_slice(&self, x: &mut [f64]) {
        {
            let mut mine = self.shared.reduce[self.rank].lock();
            mine.clear();
            mine.extend_from_slice(x);
        }
        self.barrier();
        x.iter_mut().for_each(|v| *v = 0.0);
        for slot in &self.shared.reduce {
            let contrib = slot.lock();
            for (v, c) in x.iter_mut().zip(contrib.iter()) {
                *v += *c;
            }
        }
        self.barrier();
    }

    fn all_gather(&self, x: usize) -> Vec<usize> {
        *self.shared.gather[self.rank].lock() = x;
        self.barrier();
        let out = self.shared.gather.iter().map(|g| *g.lock()).collect();
        self.barrier();
        out
    }
}

/// Index table for a [`ThreadComm`] world.
#[derive(Clone)]
pub struct ThreadDistribute {
    comm: ThreadComm,
    owner_range: Vec<usize>,
    indices: Vec<usize>,
}

impl ThreadDistribute {
    /// `indices` are the global block indices feeding each receive slot.
    pub fn new(comm: &ThreadComm, rmap: &RowMap, indices: Vec<usize>) -> Result<Self, KError> {
        if let Some(&bad) = indices.iter().find(|&&g| rmap.owner_of(g).is_none()) {
            return Err(KError::Config(format!(
                "external block {bad} is outside the global range 0..{}",
                rmap.global_size()
            )));
        }
        Ok(Self {
            comm: comm.clone(),
            owner_range: rmap.owner_range().to_vec(),
            indices,
        })
    }
}

struct ThreadContext {
    comm: ThreadComm,
    bsize: usize,
    // (owner rank, owner-local block index) per receive slot
    sources: Vec<(usize, usize)>,
    flight: InFlight,
}

impl<T: Scalar> ExchangeContext<T> for ThreadContext {
    fn block_size(&self) -> usize {
        self.bsize
    }

    fn dimension(&self) -> usize {
        self.sources.len()
    }

    fn begin_forward(&mut self, local: &[T], var_offset: usize) -> Result<ExchangeToken, KError> {
        let token = self.flight.begin()?;
        self.comm.publish(Arc::new(PublishedVec { data: local.to_vec(), var_offset }));
        Ok(token)
    }

    fn end_forward(&mut self, token: ExchangeToken, ext: &mut [T]) -> Result<(), KError> {
        let b = self.bsize;
        let mut result = self
            .flight
            .end(token)
            .and_then(|_| KError::check_len(b * self.sources.len(), ext.len()));
        // every rank has published once everyone reaches this point
        self.comm.barrier();
        if result.is_ok() {
            result = self.sources.iter().enumerate().try_for_each(|(slot, &(owner, block))| {
                let item = self.comm.published(owner).ok_or_else(|| {
                    KError::Exchange(format!("rank {owner} has not published a vector"))
                })?;
                let vec = item.downcast_ref::<PublishedVec<T>>().ok_or_else(|| {
                    KError::Exchange(format!("rank {owner} published a different scalar type"))
                })?;
                read_block(&vec.data, b, block, vec.var_offset, &mut ext[slot * b..(slot + 1) * b])
            });
        }
        // nobody republishes before all reads are done
        self.comm.barrier();
        result
    }
}

impl<T: Scalar> VecDistribute<T> for ThreadDistribute {
    fn dimension(&self) -> usize {
        self.indices.len()
    }

    fn indices(&self) -> &[usize] {
        &self.indices
    }

    fn create_ctx(&self, bsize: usize) -> Box<dyn ExchangeContext<T>> {
        let sources = self
            .indices
            .iter()
            .map(|&g| {
                let owner = self.owner_range.partition_point(|&start| start <= g) - 1;
                (owner, g - self.owner_range[owner])
            })
            .collect();
        Box::new(ThreadContext {
            comm: self.comm.clone(),
            bsize,
            sources,
            flight: InFlight::default(),
        })
    }
}
