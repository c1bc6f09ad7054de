//! Preconditioner behavior on one and two ranks.
//!
//! - On a single rank the approximate Schur method reduces to the local ILU.
//! - With exact local factors and a converged interface solve it is an exact
//!   inverse, so the outer GMRES converges in one iteration.
//! - Point relaxation used as a stationary iteration converges on a
//!   diagonally dominant system across ranks.

mod common;

use std::sync::Arc;

use approx::assert_abs_diff_eq;
use common::*;
use parblock::{
    build_pc, AdditiveSchwarz, ApproximateSchur, Comm, GmresSolver, KError, LinearOperator,
    LinearSolver, PcOptions, PcType, PointRelaxation, Preconditioner, RelaxFlags, SerialComm,
};

#[test]
fn apply_before_factor_is_rejected() {
    let mut rng = seeded(4);
    let mat = serial_matrix(random_block_matrix(&mut rng, 2, 4, 0.3), None);
    let x = vec![1.0; 8];
    let mut y = vec![0.0; 8];
    for pc_type in [PcType::Sor, PcType::AdditiveSchwarz, PcType::ApproximateSchur] {
        let opts = PcOptions { pc_type, ..Default::default() };
        let mut pc = build_pc(&mat, &opts).unwrap();
        assert_eq!(pc.pc_type(), pc_type);
        assert!(matches!(pc.apply_factor(&x, &mut y), Err(KError::NotFactored(_))));
        pc.factor().unwrap();
        pc.apply_factor(&x, &mut y).unwrap();
    }
}

#[test]
fn serial_schur_equals_additive_schwarz() {
    let mut rng = seeded(31);
    for lev_fill in 0..3 {
        let mat = serial_matrix(random_block_matrix(&mut rng, 3, 6, 0.3), None);
        let mut asm = AdditiveSchwarz::new(&mat, lev_fill, 2.0).unwrap();
        let mut schur = ApproximateSchur::new(&mat, lev_fill, 2.0, 10, 1e-8, 1e-30).unwrap();
        asm.set_diag_shift(0.25);
        schur.set_diag_shift(0.25);
        asm.factor().unwrap();
        schur.factor().unwrap();
        assert!(schur.last_inner_stats().is_none());

        let x: Vec<f64> = (0..18).map(|k| (0.3 * k as f64).cos()).collect();
        let (mut ya, mut ys) = (vec![0.0; 18], vec![0.0; 18]);
        asm.apply_factor(&x, &mut ya).unwrap();
        schur.apply_factor(&x, &mut ys).unwrap();
        assert_eq!(ya, ys);
    }
}

#[test]
fn factor_follows_matrix_values() {
    let mut rng = seeded(12);
    let mut mat = serial_matrix(random_block_matrix(&mut rng, 2, 5, 0.4), None);
    let opts = PcOptions { lev_fill: 5, ..Default::default() };
    let mut pc = build_pc(&mat, &opts).unwrap();
    let x: Vec<f64> = (0..10).map(|k| 1.0 + k as f64).collect();

    mat.scale(2.0);
    pc.factor().unwrap();
    let mut b = vec![0.0; 10];
    mat.mult(&x, &mut b).unwrap();
    let mut y = vec![0.0; 10];
    pc.apply_factor(&b, &mut y).unwrap();
    assert_abs_diff_eq!(y.as_slice(), x.as_slice(), epsilon = 1e-10);
}

#[test]
fn gmres_with_local_preconditioners_converges_serially() {
    let mut rng = seeded(99);
    for pc_type in [PcType::Sor, PcType::AdditiveSchwarz, PcType::ApproximateSchur] {
        let mut mat = serial_matrix(random_block_matrix(&mut rng, 2, 10, 0.2), None);
        let opts = PcOptions { pc_type, symmetric: true, ..Default::default() };
        let mut pc = build_pc(&mat, &opts).unwrap();
        pc.factor().unwrap();

        let x_true: Vec<f64> = (0..20).map(|k| (k as f64).sin()).collect();
        let mut b = vec![0.0; 20];
        mat.mult(&x_true, &mut b).unwrap();
        let mut x = vec![0.0; 20];
        let mut solver = GmresSolver::new(Arc::new(SerialComm), 20, 100, 1e-12, 0.0);
        let stats = solver
            .solve(&mut mat, Some(&mut pc as &mut dyn Preconditioner<f64>), &b, &mut x)
            .unwrap();
        assert!(stats.converged, "{pc_type:?}: {stats:?}");
        assert_abs_diff_eq!(x.as_slice(), x_true.as_slice(), epsilon = 1e-9);
    }
}

#[test]
fn zero_guess_matches_explicit_zero_start() {
    let mut rng = seeded(6);
    let mat = serial_matrix(random_block_matrix(&mut rng, 3, 5, 0.3), None);
    let mut with_guess = PointRelaxation::new(&mat, 1.2, 3, RelaxFlags::SYMMETRIC);
    let mut zero = PointRelaxation::new(&mat, 1.2, 3, RelaxFlags::SYMMETRIC | RelaxFlags::ZERO_GUESS);
    with_guess.factor().unwrap();
    zero.factor().unwrap();
    let x: Vec<f64> = (0..15).map(|k| k as f64 - 7.0).collect();
    let mut y1 = vec![0.0; 15];
    let mut y2 = vec![5.0; 15];
    with_guess.apply_factor(&x, &mut y1).unwrap();
    zero.apply_factor(&x, &mut y2).unwrap();
    assert_eq!(y1, y2);
}

#[test]
fn two_rank_schur_preconditioner_is_exact() {
    let a = dense_global();
    let x_true = global_vec();
    let b_global = dense_mult(&a, &x_true);
    let results = run_ranks(2, |comm| {
        let rank = comm.rank();
        let mut mat = rank_matrix(&comm, None);
        let opts = PcOptions {
            pc_type: PcType::ApproximateSchur,
            lev_fill: 2,
            inner_iters: 10,
            inner_rtol: 1e-13,
            inner_atol: 1e-30,
            ..Default::default()
        };
        let mut pc = build_pc(&mat, &opts).unwrap();
        pc.factor().unwrap();

        let b = owned(&b_global, rank);
        let mut x = vec![0.0; b.len()];
        let comm: Arc<dyn Comm> = Arc::new(comm);
        let mut solver = GmresSolver::new(comm, 10, 20, 1e-10, 0.0);
        let stats = solver
            .solve(&mut mat, Some(&mut pc as &mut dyn Preconditioner<f64>), &b, &mut x)
            .unwrap();
        (stats, x)
    });
    for (rank, (stats, x)) in results.iter().enumerate() {
        assert!(stats.converged);
        assert!(stats.iterations <= 2, "took {} iterations", stats.iterations);
        assert_abs_diff_eq!(x.as_slice(), owned(&x_true, rank).as_slice(), epsilon = 1e-8);
    }
    // global reductions give every rank the same history
    assert_eq!(results[0].0.iterations, results[1].0.iterations);
}

#[test]
fn local_failure_on_one_rank_reaches_every_rank() {
    let results = run_ranks(2, |comm| {
        let rank = comm.rank();
        let mat = rank_matrix(&comm, None);
        let mut pc = ApproximateSchur::new(&mat, 1, 2.0, 5, 1e-6, 1e-30).unwrap();
        let x = vec![1.0; 4];
        let mut y = vec![0.0; 4];
        // rank 1 is left unfactored
        if rank == 0 {
            pc.factor().unwrap();
        }
        let unfactored = pc.apply_factor(&x, &mut y);
        pc.factor().unwrap();
        // rank 0 hands in a short output vector
        let mut short = vec![0.0; 3];
        let target: &mut [f64] = if rank == 0 { &mut short[..] } else { &mut y[..] };
        let short_vec = pc.apply_factor(&x, target);
        // both ranks recover for the next application
        let mut z = vec![0.0; 4];
        pc.apply_factor(&x, &mut z).unwrap();
        (unfactored, short_vec)
    });
    assert!(matches!(results[0].0, Err(KError::PeerFailure(1))));
    assert!(matches!(results[1].0, Err(KError::NotFactored(_))));
    assert!(matches!(results[0].1, Err(KError::DimensionMismatch { .. })));
    assert!(matches!(results[1].1, Err(KError::PeerFailure(1))));
}

#[test]
fn two_rank_additive_schwarz_with_gmres() {
    let a = dense_global();
    let x_true = global_vec();
    let b_global = dense_mult(&a, &x_true);
    let results = run_ranks(2, |comm| {
        let rank = comm.rank();
        let mut mat = rank_matrix(&comm, None);
        let mut pc = AdditiveSchwarz::new(&mat, 0, 1.0).unwrap();
        pc.factor().unwrap();
        let b = owned(&b_global, rank);
        let mut x = vec![0.0; b.len()];
        let mut solver = GmresSolver::new(Arc::new(comm), 8, 40, 1e-12, 0.0);
        let stats = solver
            .solve(&mut mat, Some(&mut pc as &mut dyn Preconditioner<f64>), &b, &mut x)
            .unwrap();
        (stats, x)
    });
    for (rank, (stats, x)) in results.iter().enumerate() {
        assert!(stats.converged);
        assert_abs_diff_eq!(x.as_slice(), owned(&x_true, rank).as_slice(), epsilon = 1e-9);
    }
}

#[test]
fn two_rank_relaxation_as_stationary_iteration() {
    let a = dense_global();
    let x_true = global_vec();
    let b_global = dense_mult(&a, &x_true);
    let results = run_ranks(2, |comm| {
        let rank = comm.rank();
        let mut mat = rank_matrix(&comm, None);
        let mut pc = PointRelaxation::new(&mat, 1.0, 2, RelaxFlags::empty());
        pc.factor().unwrap();
        let b = owned(&b_global, rank);
        let mut y = vec![0.0; b.len()];
        for _ in 0..60 {
            pc.apply_factor(&b, &mut y).unwrap();
        }
        let mut r = vec![0.0; b.len()];
        mat.mult(&y, &mut r).unwrap();
        (y, r)
    });
    for (rank, (y, r)) in results.iter().enumerate() {
        assert_abs_diff_eq!(y.as_slice(), owned(&x_true, rank).as_slice(), epsilon = 1e-10);
        assert_abs_diff_eq!(r.as_slice(), owned(&b_global, rank).as_slice(), epsilon = 1e-9);
    }
}

#[test]
fn schur_pattern_dump_has_both_zones() {
    let path = std::env::temp_dir().join(format!("parblock_schur_nz_{}.dat", std::process::id()));
    let texts = run_ranks(2, |comm| {
        let rank = comm.rank();
        let mat = rank_matrix(&comm, None);
        let pc = ApproximateSchur::new(&mat, 1, 2.0, 5, 1e-6, 1e-30).unwrap();
        let file = path.with_extension(format!("{rank}.dat"));
        pc.print_nz_pattern(&file).unwrap();
        let text = std::fs::read_to_string(&file).unwrap();
        std::fs::remove_file(&file).unwrap();
        text
    });
    assert!(texts[0].contains("ZONE T = \"Diagonal block 0\""));
    assert!(texts[0].contains("ZONE T = \"Off-diagonal block 0\"\n1 3\n"));
    assert!(texts[1].contains("2 2\n2 3\n3 2\n3 3\n"));
    assert!(texts[1].ends_with("ZONE T = \"Off-diagonal block 1\"\n3 1\n"));
}
