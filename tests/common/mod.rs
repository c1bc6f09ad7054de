//! Shared fixtures for the integration tests.
//!
//! The two-rank problem has four blocks of size 2; rank `r` owns global
//! blocks `2r` and `2r + 1`. The last owned block of each rank is its
//! interface block, and the two interface blocks (1 and 3) couple.
#![allow(dead_code)]

use std::sync::Arc;

use faer::Mat;
use parblock::{
    BcMap, BlockSparseMatrix, Comm, DistributedMatrix, RowMap, SerialComm, SerialDistribute,
    ThreadComm, ThreadDistribute,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const BSIZE: usize = 2;
pub const NBLOCKS: usize = 4;

/// Block (i, j) of the global two-rank matrix, if stored.
pub fn coupling(i: usize, j: usize) -> Option<Vec<f64>> {
    let (fi, fj) = (i as f64, j as f64);
    if i == j {
        return Some(vec![10.0 + fi, 1.0, -1.0, 9.0 + fi]);
    }
    let stored = matches!((i, j), (0, 1) | (1, 0) | (2, 3) | (3, 2) | (1, 3) | (3, 1));
    stored.then(|| vec![0.5 + 0.1 * fi, -0.3, 0.2, 0.4 - 0.1 * fj])
}

pub fn dense_global() -> Mat<f64> {
    let n = BSIZE * NBLOCKS;
    Mat::from_fn(n, n, |r, c| {
        coupling(r / BSIZE, c / BSIZE).map_or(0.0, |blk| blk[(r % BSIZE) * BSIZE + c % BSIZE])
    })
}

pub fn dense_mult(a: &Mat<f64>, x: &[f64]) -> Vec<f64> {
    (0..a.nrows())
        .map(|i| (0..a.ncols()).map(|j| a[(i, j)] * x[j]).sum())
        .collect()
}

pub fn global_vec() -> Vec<f64> {
    (0..BSIZE * NBLOCKS).map(|k| 1.0 + 0.25 * k as f64 - 0.1 * (k % 3) as f64).collect()
}

/// This rank's slice of a global vector.
pub fn owned(global: &[f64], rank: usize) -> Vec<f64> {
    global[BSIZE * 2 * rank..BSIZE * 2 * (rank + 1)].to_vec()
}

/// The two-rank matrix as seen by `comm.rank()`.
pub fn rank_matrix(comm: &ThreadComm, bcs: Option<Arc<BcMap<f64>>>) -> DistributedMatrix<f64> {
    let rank = comm.rank();
    let rmap = Arc::new(RowMap::new(Arc::new(comm.clone()), vec![0, 2, 4]).unwrap());
    let first = 2 * rank;
    let local = (0..2).flat_map(move |li| {
        (0..2).filter_map(move |lj| coupling(first + li, first + lj).map(|v| (li, lj, v)))
    });
    let aloc = BlockSparseMatrix::from_blocks(BSIZE, 2, 2, local).unwrap();
    let (iface, remote) = if rank == 0 { (1, 3) } else { (3, 1) };
    let bext =
        BlockSparseMatrix::from_blocks(BSIZE, 1, 1, coupling(iface, remote).map(|v| (0, 0, v)))
            .unwrap();
    let dist = ThreadDistribute::new(comm, &rmap, vec![remote]).unwrap();
    DistributedMatrix::from_blocks(rmap, aloc, bext, Arc::new(dist), bcs).unwrap()
}

/// Run `f` on every rank of an in-process world, collecting results by rank.
pub fn run_ranks<R, F>(size: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(ThreadComm) -> R + Sync,
{
    let comms = ThreadComm::world(size);
    std::thread::scope(|s| {
        let f = &f;
        let handles: Vec<_> = comms.into_iter().map(|c| s.spawn(move || f(c))).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// Random diagonally dominant block matrix with a full diagonal.
pub fn random_block_matrix(
    rng: &mut StdRng,
    bsize: usize,
    n: usize,
    density: f64,
) -> BlockSparseMatrix<f64> {
    let bb = bsize * bsize;
    let mut blocks = Vec::new();
    for i in 0..n {
        let mut diag: Vec<f64> = (0..bb).map(|_| rng.gen_range(-0.5..0.5)).collect();
        for v in 0..bsize {
            diag[v * bsize + v] += 4.0 * (n * bsize) as f64;
        }
        blocks.push((i, i, diag));
        for j in 0..n {
            if j != i && rng.gen_bool(density) {
                blocks.push((i, j, (0..bb).map(|_| rng.gen_range(-1.0..1.0)).collect()));
            }
        }
    }
    BlockSparseMatrix::from_blocks(bsize, n, n, blocks).unwrap()
}

pub fn seeded(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Single-process distributed matrix around `aloc` with no remote coupling.
pub fn serial_matrix(aloc: BlockSparseMatrix<f64>, bcs: Option<Arc<BcMap<f64>>>) -> DistributedMatrix<f64> {
    let comm: Arc<dyn Comm> = Arc::new(SerialComm);
    let rmap = Arc::new(RowMap::new(comm, vec![0, aloc.nrows()]).unwrap());
    let bext = BlockSparseMatrix::new(aloc.bsize(), 0, 0, vec![0], vec![]).unwrap();
    DistributedMatrix::from_blocks(rmap, aloc, bext, Arc::new(SerialDistribute::empty()), bcs)
        .unwrap()
}
