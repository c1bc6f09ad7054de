//! Distributed product, boundary conditions and the interface operator.
//!
//! Multi-rank cases run each rank on its own thread over `ThreadComm`.

mod common;

use std::sync::Arc;

use approx::assert_abs_diff_eq;
use common::*;
use parblock::preconditioner::AdditiveSchwarz;
use parblock::{BcMap, BlockSparseMatrix, Comm, GlobalSchurMat, LinearOperator, Preconditioner};

#[test]
fn serial_product_equals_local_product() {
    let mut rng = seeded(1);
    let aloc = random_block_matrix(&mut rng, 3, 5, 0.3);
    let x: Vec<f64> = (0..15).map(|k| 0.5 * k as f64 - 2.0).collect();
    let mut expected = vec![0.0; 15];
    aloc.mult(&x, &mut expected).unwrap();

    let mut mat = serial_matrix(aloc, None);
    assert_eq!(mat.size(), (15, 15));
    let mut y = mat.create_vec();
    mat.mult(&x, &mut y).unwrap();
    assert_eq!(y, expected);
}

#[test]
fn two_rank_product_matches_dense() {
    let a = dense_global();
    let x = global_vec();
    let y_global = dense_mult(&a, &x);
    let results = run_ranks(2, |comm| {
        let rank = comm.rank();
        let mut mat = rank_matrix(&comm, None);
        let layout = mat.layout();
        assert_eq!((layout.n, layout.nc, layout.np, layout.m), (2, 1, 1, 1));
        let xl = owned(&x, rank);
        let mut y = vec![0.0; xl.len()];
        mat.mult(&xl, &mut y).unwrap();
        // a second product reuses the exchange context
        let mut y2 = vec![0.0; xl.len()];
        mat.mult(&xl, &mut y2).unwrap();
        assert_eq!(y, y2);
        y
    });
    for (rank, y) in results.iter().enumerate() {
        assert_abs_diff_eq!(y.as_slice(), owned(&y_global, rank).as_slice(), epsilon = 1e-12);
    }
}

#[test]
fn boundary_rows_become_identity_on_every_rank() {
    // block 3 is rank 1's interface block, so its off-diagonal row is cleared too
    let mut bcs = BcMap::new();
    bcs.add_bc(3, 1, vec![1], vec![]).unwrap();
    bcs.add_bc(0, 0, vec![0], vec![2.5]).unwrap();
    let bcs = Arc::new(bcs);

    let mut a = dense_global();
    for k in [0, 3 * BSIZE + 1] {
        for j in 0..a.ncols() {
            a[(k, j)] = if j == k { 1.0 } else { 0.0 };
        }
    }
    let x = global_vec();
    let y_global = dense_mult(&a, &x);

    let results = run_ranks(2, |comm| {
        let rank = comm.rank();
        let mut mat = rank_matrix(&comm, Some(bcs.clone()));
        mat.apply_bcs().unwrap();
        let xl = owned(&x, rank);
        let mut y = vec![0.0; xl.len()];
        mat.mult(&xl, &mut y).unwrap();

        let mut v = xl.clone();
        bcs.apply_to_vec(mat.row_map(), BSIZE, &mut v).unwrap();
        (y, v)
    });
    for (rank, (y, v)) in results.iter().enumerate() {
        assert_abs_diff_eq!(y.as_slice(), owned(&y_global, rank).as_slice(), epsilon = 1e-12);
        let zeroed: Vec<usize> = (0..v.len()).filter(|&k| v[k] == 0.0).collect();
        let expected_zero = if rank == 0 { vec![0] } else { vec![3] };
        assert_eq!(zeroed, expected_zero);
    }
}

#[test]
fn value_operations_reach_both_blocks() {
    let results = run_ranks(2, |comm| {
        let mut mat = rank_matrix(&comm, None);
        let other = rank_matrix(&comm, None);
        mat.axpby(2.0, -1.0, &other).unwrap();
        mat.scale(0.5);
        let (aloc, bext) = mat.blocks();
        let (a, b) = (aloc.read().values().to_vec(), bext.read().values().to_vec());
        let (oa, ob) = other.blocks();
        let (oa, ob) = (oa.read().values().to_vec(), ob.read().values().to_vec());
        (a, b, oa, ob)
    });
    for (a, b, oa, ob) in results {
        // 0.5·(2·A − A) = 0.5·A
        for (u, v) in a.iter().zip(&oa).chain(b.iter().zip(&ob)) {
            assert_abs_diff_eq!(*u, 0.5 * v, epsilon = 1e-14);
        }
    }
}

#[test]
fn incompatible_operand_leaves_matrix_untouched() {
    let mut rng = seeded(8);
    let a = random_block_matrix(&mut rng, 2, 4, 0.2);
    let before = a.values().to_vec();
    let mut mat = serial_matrix(a, None);

    let full = (0..4).flat_map(|i| (0..4).map(move |j| (i, j, vec![1.0; 4])));
    let wider = serial_matrix(BlockSparseMatrix::from_blocks(2, 4, 4, full).unwrap(), None);
    assert!(mat.axpy(1.0, &wider).is_err());
    assert_eq!(mat.blocks().0.read().values(), &before[..]);

    // a diagonal-only operand fits inside any pattern with a full diagonal
    let diag = (0..4).map(|i| (i, i, vec![1.0; 4]));
    let narrower = serial_matrix(BlockSparseMatrix::from_blocks(2, 4, 4, diag).unwrap(), None);
    mat.copy_values(&narrower).unwrap();
    let aloc = mat.blocks().0.read();
    assert_eq!(aloc.block(0, 0).unwrap(), &[1.0; 4][..]);
    assert!(aloc.values().iter().filter(|&&v| v == 1.0).count() == 16);
}

#[test]
fn interface_off_diagonal_product_uses_remote_values() {
    let results = run_ranks(2, |comm| {
        let rank = comm.rank();
        let mat = rank_matrix(&comm, None);
        let mut asm = AdditiveSchwarz::new(&mat, 1, 2.0).unwrap();
        asm.factor().unwrap();
        let mut schur = GlobalSchurMat::new(&mat, asm.factor_matrix().clone()).unwrap();
        assert_eq!(schur.size(), (BSIZE, BSIZE));
        assert_eq!(schur.row_map().global_size(), 2);
        let x = vec![rank as f64 + 1.0, rank as f64 + 2.0];
        let mut y = vec![0.0; BSIZE];
        schur.mult_off_diag(&x, &mut y).unwrap();
        y
    });
    // rank r's interface couples to the other rank's interface values
    let remote = [vec![2.0, 3.0], vec![1.0, 2.0]];
    for (rank, y) in results.iter().enumerate() {
        let (iface, other) = if rank == 0 { (1, 3) } else { (3, 1) };
        let blk = coupling(iface, other).unwrap();
        let x = &remote[rank];
        let expected = [blk[0] * x[0] + blk[1] * x[1], blk[2] * x[0] + blk[3] * x[1]];
        assert_abs_diff_eq!(y.as_slice(), &expected[..], epsilon = 1e-14);
    }
}
