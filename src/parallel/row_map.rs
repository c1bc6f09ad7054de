//! Contiguous row ownership across ranks.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::error::KError;
use crate::parallel::Comm;

/// Block-row ownership map: rank `p` owns global blocks
/// `owner_range[p]..owner_range[p+1]`. Replicated on every rank.
pub struct RowMap {
    comm: Arc<dyn Comm>,
    owner_range: Vec<usize>,
}

impl RowMap {
    /// Build from explicit ownership ranges (`size + 1` non-decreasing offsets starting at 0).
    pub fn new(comm: Arc<dyn Comm>, owner_range: Vec<usize>) -> Result<Self, KError> {
        if owner_range.len() != comm.size() + 1 {
            return Err(KError::Config(format!(
                "ownership range has {} entries for {} ranks",
                owner_range.len(),
                comm.size()
            )));
        }
        if owner_range[0] != 0 || owner_range.windows(2).any(|w| w[0] > w[1]) {
            return Err(KError::Config(
                "ownership range must start at 0 and be non-decreasing".into(),
            ));
        }
        Ok(Self { comm, owner_range })
    }

    /// Build collectively from the number of blocks each rank owns.
    pub fn from_local_size(comm: Arc<dyn Comm>, n: usize) -> Self {
        let sizes = comm.all_gather(n);
        let mut owner_range = Vec::with_capacity(sizes.len() + 1);
        owner_range.push(0);
        let mut acc = 0;
        for s in sizes {
            acc += s;
            owner_range.push(acc);
        }
        Self { comm, owner_range }
    }

    pub fn comm(&self) -> &dyn Comm {
        self.comm.as_ref()
    }

    /// Shared handle to the communicator.
    pub fn comm_handle(&self) -> Arc<dyn Comm> {
        Arc::clone(&self.comm)
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn owner_range(&self) -> &[usize] {
        &self.owner_range
    }

    /// Global blocks owned by this rank.
    pub fn range(&self) -> Range<usize> {
        let r = self.rank();
        self.owner_range[r]..self.owner_range[r + 1]
    }

    pub fn local_size(&self) -> usize {
        self.range().len()
    }

    pub fn global_size(&self) -> usize {
        *self.owner_range.last().unwrap_or(&0)
    }

    /// Rank owning global block `g`.
    pub fn owner_of(&self, g: usize) -> Option<usize> {
        if g >= self.global_size() {
            return None;
        }
        Some(self.owner_range.partition_point(|&start| start <= g) - 1)
    }

    pub fn is_owned(&self, g: usize) -> bool {
        self.range().contains(&g)
    }
}

impl fmt::Debug for RowMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowMap")
            .field("rank", &self.rank())
            .field("owner_range", &self.owner_range)
            .finish()
    }
}
