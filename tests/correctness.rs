//! Integration test suite for the mathematical correctness of the Davidson engine.
//!
//! # Test Methodology
//!
//! Every end-to-end scenario compares the engine against a spectrum that is known
//! independently of it:
//! 1.  **Construct a Test Problem `(A, B)`:** either a pencil whose eigenvalues can be read
//!     off directly (upper triangular `A` and `B`, so `λ_i = a_ii / b_ii`), or a Hermitian
//!     problem small enough for faer's dense self-adjoint eigensolver to act as the
//!     ground truth.
//! 2.  **Select the Reference Eigenvalues:** the full reference spectrum is sorted by the
//!     same criterion the solver is configured with, and the first `nev` values kept.
//! 3.  **Run the Solver:** the generalized Davidson engine runs with a Jacobi correction
//!     until every requested pair is locked.
//! 4.  **Verify Accuracy:** each computed eigenvalue must match one reference value to a
//!     relative tolerance, and each returned eigenvector must satisfy `A x ≈ λ B x`.
//!
//! The remaining tests drive the pipeline one step at a time through the public
//! [`Dashboard`] and check the structural properties the reuse of projected quantities
//! relies on: idempotent projection, incremental vs. from-scratch projection, the thick
//! restart transform, deflation of residuals, batching of reductions and the breakdown
//! terminal state.

use anyhow::{Result, anyhow, ensure};
use davidson_engine::{
    ConvergedReason, EigenProblem, ProblemType, SolverConfig, Which,
    algorithms::{
        dashboard::{Dashboard, Operators, Pipeline},
        reduction::{Collective, SingleProcess},
    },
    config::{ExpansionPolicy, Extraction, ResolvedConfig},
    correction::{CorrectionSolver, IdentityPreconditioner, JacobiPreconditioner},
    matrix::LinearOperator,
    solve,
};
use faer::{Mat, MatRef, Side, c64};
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::cell::Cell;

/// Tolerance for comparing projected matrices that went through different but
/// mathematically equivalent computations (incremental growth, restart transforms).
const PROJECTION_TOLERANCE: f64 = 1e-10;

/// Tolerance for quantities that are orthogonal by construction.
const ORTHOGONALITY_TOLERANCE: f64 = 1e-12;

/// A test eigenproblem together with its complete spectrum.
struct Scenario {
    a: Mat<c64>,
    b: Option<Mat<c64>>,
    hermitian: bool,
    spectrum: Vec<c64>,
}

fn c(x: f64) -> c64 {
    c64::new(x, 0.0)
}

fn random_entry(rng: &mut StdRng, scale: f64) -> c64 {
    c64::new(
        scale * (rng.random::<f64>() - 0.5),
        scale * (rng.random::<f64>() - 0.5),
    )
}

fn max_abs_diff(x: MatRef<'_, c64>, y: MatRef<'_, c64>) -> f64 {
    let mut max = 0.0f64;
    for j in 0..x.ncols() {
        for i in 0..x.nrows() {
            max = max.max((x[(i, j)] - y[(i, j)]).norm());
        }
    }
    max
}

/// A dense random matrix with entries in the unit square around zero.
fn random_matrix(n: usize, seed: u64) -> Mat<c64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut m = Mat::zeros(n, n);
    for j in 0..n {
        for i in 0..n {
            m[(i, j)] = random_entry(&mut rng, 1.0);
        }
    }
    m
}

/// The Hermitian part of a random matrix.
fn random_hermitian(n: usize, seed: u64) -> Mat<c64> {
    let m = random_matrix(n, seed);
    Mat::from_fn(n, n, |i, j| (m[(i, j)] + m[(j, i)].conj()) * 0.5)
}

/// Eigenvalues of a Hermitian matrix, in nondecreasing order.
fn hermitian_spectrum(a: MatRef<'_, c64>) -> Result<Vec<c64>> {
    let evd = a
        .self_adjoint_eigen(Side::Lower)
        .map_err(|e| anyhow!("EVD failed: {:?}", e))?;
    let values = evd.S().column_vector();
    Ok((0..a.nrows()).map(|i| c(values[i].re)).collect())
}

/// `diag(1..=n)` with a weak random Hermitian coupling; symmetric positive definite.
///
/// The coupling keeps the problem diagonally dominant, the regime Davidson with a
/// Jacobi correction is designed for, without making the preconditioner exact.
fn spd_scenario(n: usize, seed: u64) -> Result<Scenario> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut a = Mat::zeros(n, n);
    for j in 0..n {
        a[(j, j)] = c((j + 1) as f64);
        for i in 0..j {
            let z = random_entry(&mut rng, 0.01);
            a[(i, j)] = z;
            a[(j, i)] = z.conj();
        }
    }
    let spectrum = hermitian_spectrum(a.as_ref())?;
    Ok(Scenario {
        a,
        b: None,
        hermitian: true,
        spectrum,
    })
}

/// `tridiag(0.1, i + 1, 0.1)`.
fn tridiagonal(n: usize) -> Mat<c64> {
    Mat::from_fn(n, n, |i, j| {
        if i == j {
            c((i + 1) as f64)
        } else if i.abs_diff(j) == 1 {
            c(0.1)
        } else {
            c(0.0)
        }
    })
}

/// A banded upper triangular matrix with the given diagonal and random couplings.
fn banded_upper(diagonal: &[c64], scale: f64, rng: &mut StdRng) -> Mat<c64> {
    let n = diagonal.len();
    let mut m = Mat::zeros(n, n);
    for j in 0..n {
        m[(j, j)] = diagonal[j];
        for i in j.saturating_sub(3)..j {
            m[(i, j)] = random_entry(rng, scale);
        }
    }
    m
}

fn non_hermitian_scenario(n: usize, seed: u64) -> Scenario {
    let mut rng = StdRng::seed_from_u64(seed);
    let diagonal: Vec<c64> = (0..n).map(|i| c((i + 1) as f64)).collect();
    let a = banded_upper(&diagonal, 0.2, &mut rng);
    Scenario {
        a,
        b: None,
        hermitian: false,
        spectrum: diagonal,
    }
}

fn generalized_hermitian_scenario(n: usize) -> Result<Scenario> {
    let a = tridiagonal(n);
    let b_diag: Vec<f64> = (0..n).map(|i| 1.0 + 0.01 * i as f64).collect();
    let b = Mat::from_fn(n, n, |i, j| if i == j { c(b_diag[i]) } else { c(0.0) });
    // With a diagonal B the pencil is similar to B^{-1/2} A B^{-1/2}.
    let scaled = Mat::from_fn(n, n, |i, j| a[(i, j)] / (b_diag[i] * b_diag[j]).sqrt());
    let spectrum = hermitian_spectrum(scaled.as_ref())?;
    Ok(Scenario {
        a,
        b: Some(b),
        hermitian: true,
        spectrum,
    })
}

fn generalized_non_hermitian_scenario(n: usize, seed: u64) -> Scenario {
    let mut rng = StdRng::seed_from_u64(seed);
    let a_diag: Vec<c64> = (0..n).map(|i| c((i + 1) as f64)).collect();
    let b_diag: Vec<c64> = (0..n).map(|i| c(1.0 + 0.01 * i as f64)).collect();
    let a = banded_upper(&a_diag, 0.2, &mut rng);
    let b = banded_upper(&b_diag, 0.02, &mut rng);
    let spectrum = a_diag.iter().zip(&b_diag).map(|(x, y)| *x / *y).collect();
    Scenario {
        a,
        b: Some(b),
        hermitian: false,
        spectrum,
    }
}

/// `A = L D Lᴴ` and `B = L Lᴴ` with a dense unit lower triangular `L`.
///
/// `A x = λ B x` reduces to `D y = λ y` with `y = Lᴴ x`, so the spectrum is `D`
/// while `B` couples every pair of coordinates.
fn generalized_dense_b_scenario(n: usize, seed: u64) -> Scenario {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut l = Mat::<c64>::zeros(n, n);
    for j in 0..n {
        l[(j, j)] = c(1.0);
        for i in j + 1..n {
            l[(i, j)] = random_entry(&mut rng, 0.02);
        }
    }
    let d: Vec<c64> = (0..n).map(|i| c((i + 1) as f64)).collect();
    let ld = Mat::from_fn(n, n, |i, j| l[(i, j)] * d[j]);
    let a = ld.as_ref() * l.as_ref().adjoint();
    let b = l.as_ref() * l.as_ref().adjoint();
    Scenario {
        a,
        b: Some(b),
        hermitian: true,
        spectrum: d,
    }
}

/// Block upper triangular with 2x2 diagonal blocks `[[k, 1/2], [-1/2, k]]`.
///
/// Each block contributes the conjugate pair `k ± i/2`.
fn complex_pairs_scenario(n: usize, seed: u64) -> Scenario {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut a = Mat::<c64>::zeros(n, n);
    let mut spectrum = Vec::with_capacity(n);
    for k in 0..n / 2 {
        let (p, q) = (2 * k, 2 * k + 1);
        let re = (k + 1) as f64;
        a[(p, p)] = c(re);
        a[(q, q)] = c(re);
        a[(p, q)] = c(0.5);
        a[(q, p)] = c(-0.5);
        spectrum.push(c64::new(re, 0.5));
        spectrum.push(c64::new(re, -0.5));
        for col in [p, q] {
            for i in p.saturating_sub(3)..p {
                a[(i, col)] = random_entry(&mut rng, 0.2);
            }
        }
    }
    Scenario {
        a,
        b: None,
        hermitian: false,
        spectrum,
    }
}

fn harmonic_scenario(n: usize) -> Result<Scenario> {
    let a = tridiagonal(n);
    let spectrum = hermitian_spectrum(a.as_ref())?;
    Ok(Scenario {
        a,
        b: None,
        hermitian: true,
        spectrum,
    })
}

/// The first `k` values of `spectrum` in the order the criterion prefers them.
fn select(mut spectrum: Vec<c64>, which: Which, target: c64, k: usize) -> Vec<c64> {
    let key = |z: &c64| -> f64 {
        match which {
            Which::LargestMagnitude => -z.norm(),
            Which::SmallestMagnitude => z.norm(),
            Which::LargestReal => -z.re,
            Which::SmallestReal => z.re,
            Which::LargestImaginary => -z.im,
            Which::SmallestImaginary => z.im,
            Which::TargetMagnitude => (*z - target).norm(),
            Which::TargetReal => (z.re - target.re).abs(),
            Which::TargetImaginary => (z.im - target.im).abs(),
        }
    };
    spectrum.sort_by(|x, y| key(x).total_cmp(&key(y)));
    spectrum.truncate(k);
    spectrum
}

/// `‖A x - λ B x‖` for one column `x`.
fn residual_norm(a: MatRef<'_, c64>, b: Option<MatRef<'_, c64>>, lambda: c64, x: MatRef<'_, c64>) -> f64 {
    let ax = a * x;
    let bx = match b {
        Some(b) => b * x,
        None => x.to_owned(),
    };
    Mat::from_fn(x.nrows(), 1, |i, _| ax[(i, 0)] - lambda * bx[(i, 0)]).norm_l2()
}

/// Single-process collective that counts how often it was called.
#[derive(Default)]
struct CountingCollective {
    calls: Cell<usize>,
}

impl Collective for CountingCollective {
    fn all_reduce_sum(&self, input: &[c64], output: &mut [c64]) {
        self.calls.set(self.calls.get() + 1);
        output.copy_from_slice(input);
    }
}

/// Builds a dashboard with the default pipeline for `cfg`.
fn dashboard<'a>(
    cfg: ResolvedConfig,
    a: &'a Mat<c64>,
    b: Option<&'a Mat<c64>>,
    collective: &'a dyn Collective,
    correction: &'a mut dyn CorrectionSolver,
    initial: Option<MatRef<'a, c64>>,
) -> Result<Dashboard<'a>> {
    let pipeline = Pipeline::for_config(&cfg, initial, correction);
    let ops = Operators {
        a,
        b: b.map(|b| b as &dyn LinearOperator<c64>),
    };
    Ok(Dashboard::new(cfg, ops, collective, pipeline)?)
}

/// A macro to generate an end-to-end scenario test.
///
/// The scenario is solved with a Jacobi correction built from the operator diagonals.
/// Every computed eigenvalue must match a reference value of the selected part of the
/// spectrum to `$eig_tol` (relative), and every eigenvector must have a residual below
/// `$res_tol · max(1, |λ|)`.
macro_rules! generate_scenario_test {
    ($test_name:ident, $scenario:expr, $config:expr, $eig_tol:expr, $res_tol:expr, $label:expr) => {
        #[test]
        fn $test_name() -> Result<()> {
            let scenario: Scenario = $scenario;
            let config: SolverConfig = $config;
            let nev = config.nev;
            let target = c64::new(config.target[0], config.target[1]);

            let problem = match &scenario.b {
                Some(b) => EigenProblem::generalized(&scenario.a, b, scenario.hermitian),
                None => EigenProblem::standard(&scenario.a, scenario.hermitian),
            };
            let mut jacobi = match &scenario.b {
                Some(b) => JacobiPreconditioner::from_operators(&scenario.a, b)?,
                None => JacobiPreconditioner::from_operator(&scenario.a)?,
            };
            let solution = solve(&problem, &config, &mut jacobi, &SingleProcess)?;

            ensure!(
                solution.converged(),
                "{}: stopped with {:?} after {} iterations ({} of {} pairs)",
                $label,
                solution.reason,
                solution.iterations,
                solution.nconv(),
                nev
            );
            ensure!(solution.nconv() == nev, "{}: {} pairs locked", $label, solution.nconv());
            ensure!(
                solution.error_estimates.iter().all(|&e| e < config.tol),
                "{}: error estimates above tolerance: {:?}",
                $label,
                solution.error_estimates
            );

            let expected = select(scenario.spectrum.clone(), config.which, target, nev);
            let b = scenario.b.as_ref().map(|b| b.as_ref());
            for (j, &lambda) in solution.eigenvalues.iter().enumerate() {
                let rel_err = expected
                    .iter()
                    .map(|&e| (lambda - e).norm() / e.norm().max(1.0))
                    .fold(f64::INFINITY, f64::min);
                ensure!(
                    rel_err < $eig_tol,
                    "{}: eigenvalue {} = {} is off by {:e} (expected one of {:?})",
                    $label,
                    j,
                    lambda,
                    rel_err,
                    expected
                );
                let x = solution.eigenvectors.as_ref().subcols(j, 1);
                let res = residual_norm(scenario.a.as_ref(), b, lambda, x) / x.norm_l2();
                ensure!(
                    res < $res_tol * lambda.norm().max(1.0),
                    "{}: residual of pair {} too high: {:e}",
                    $label,
                    j,
                    res
                );
            }
            Ok(())
        }
    };
}

// --- Test Suite ---
// End-to-end scenarios, one per problem shape and extraction.

// A 100x100 symmetric positive-definite operator, the 5 largest-magnitude eigenpairs,
// a subspace of at most 20 vectors and tolerance 1e-8.
generate_scenario_test!(
    test_spd_largest_magnitude,
    spd_scenario(100, 7)?,
    SolverConfig::new(5).with_ncv(20).with_tol(1e-8),
    1e-8,
    1e-6,
    "Hermitian SPD"
);

generate_scenario_test!(
    test_non_hermitian_largest_real,
    non_hermitian_scenario(60, 3),
    SolverConfig::new(3)
        .with_ncv(15)
        .with_tol(1e-10)
        .with_max_it(300)
        .with_which(Which::LargestReal),
    1e-7,
    1e-5,
    "Non-Hermitian"
);

generate_scenario_test!(
    test_generalized_hermitian_largest_magnitude,
    generalized_hermitian_scenario(50)?,
    SolverConfig::new(3).with_ncv(15).with_tol(1e-10).with_max_it(300),
    1e-8,
    1e-6,
    "Generalized Hermitian"
);

generate_scenario_test!(
    test_generalized_non_hermitian_largest_real,
    generalized_non_hermitian_scenario(50, 5),
    SolverConfig::new(2)
        .with_ncv(15)
        .with_tol(1e-10)
        .with_max_it(300)
        .with_which(Which::LargestReal),
    1e-7,
    1e-5,
    "Generalized non-Hermitian"
);

generate_scenario_test!(
    test_harmonic_interior_target,
    harmonic_scenario(60)?,
    SolverConfig::new(2)
        .with_ncv(16)
        .with_tol(1e-10)
        .with_max_it(300)
        .with_which(Which::TargetMagnitude)
        .with_target(c(20.3))
        .with_extraction(Extraction::Harmonic),
    1e-8,
    1e-6,
    "Harmonic"
);

generate_scenario_test!(
    test_block_expansion_two_directions,
    spd_scenario(100, 11)?,
    SolverConfig::new(4)
        .with_ncv(20)
        .with_block_size(2)
        .with_tol(1e-8)
        .with_max_it(300),
    1e-8,
    1e-6,
    "Block size 2"
);

generate_scenario_test!(
    test_restart_keeps_previous_directions,
    spd_scenario(100, 8)?,
    SolverConfig::new(4)
        .with_ncv(20)
        .with_restart(8, 2)
        .with_tol(1e-8)
        .with_max_it(300),
    1e-8,
    1e-6,
    "Thick restart with plusk"
);

generate_scenario_test!(
    test_generalized_hermitian_dense_b,
    generalized_dense_b_scenario(40, 19),
    SolverConfig::new(3).with_ncv(15).with_tol(1e-10).with_max_it(500),
    1e-8,
    1e-6,
    "Generalized Hermitian with dense B"
);

generate_scenario_test!(
    test_non_hermitian_complex_conjugate_pairs,
    complex_pairs_scenario(60, 23),
    SolverConfig::new(4)
        .with_ncv(20)
        .with_tol(1e-10)
        .with_max_it(300)
        .with_which(Which::LargestReal),
    1e-7,
    1e-5,
    "Complex conjugate pairs"
);

generate_scenario_test!(
    test_krylov_expansion_converges,
    spd_scenario(80, 4)?,
    SolverConfig::new(2)
        .with_ncv(20)
        .with_initial_size(5)
        .with_expansion(ExpansionPolicy::Krylov)
        .with_tol(1e-8)
        .with_max_it(400),
    1e-8,
    1e-6,
    "Krylov expansion"
);

// --- Structural properties of one iteration ---

/// Projecting twice without new columns changes nothing, not even in the last bit.
fn check_projection_is_idempotent(scenario: &Scenario, problem: ProblemType) -> Result<()> {
    let n = scenario.a.nrows();
    let cfg = SolverConfig::new(2)
        .with_ncv(10)
        .with_initial_size(4)
        .resolve(n, problem)?;
    let mut correction = IdentityPreconditioner;
    let b = scenario.b.as_ref();
    let mut dash = dashboard(cfg, &scenario.a, b, &SingleProcess, &mut correction, None)?;
    dash.init_subspace()?;
    dash.calc_pairs()?;
    dash.update_subspace()?;
    dash.calc_pairs()?;

    let h = dash.projected_h();
    let g = dash.projected_g();
    let eigenvalues = dash.eigenvalues().to_vec();
    let norms = dash.residual_norms().to_vec();
    let residuals = dash.residuals().to_owned();
    let applications = dash.operator_applications();

    dash.calc_pairs()?;
    ensure!(dash.projected_h() == h, "{problem:?}: H changed on a repeated projection");
    ensure!(dash.projected_g() == g, "{problem:?}: G changed on a repeated projection");
    ensure!(dash.eigenvalues() == eigenvalues.as_slice(), "{problem:?}: eigenvalues changed");
    ensure!(dash.residual_norms() == norms.as_slice(), "{problem:?}: residual norms changed");
    ensure!(dash.residuals() == residuals.as_ref(), "{problem:?}: residual vectors changed");
    ensure!(
        dash.operator_applications() == applications,
        "{problem:?}: the operators were applied again"
    );
    Ok(())
}

#[test]
fn test_projection_is_idempotent() -> Result<()> {
    let scenario = generalized_non_hermitian_scenario(30, 9);
    check_projection_is_idempotent(&scenario, ProblemType::GeneralizedNonHermitian)
}

/// The mirrored (Hermitian) extension of `H` and `G` is just as stable.
#[test]
fn test_hermitian_projection_is_idempotent() -> Result<()> {
    let scenario = generalized_hermitian_scenario(30)?;
    check_projection_is_idempotent(&scenario, ProblemType::GeneralizedHermitian)?;
    let scenario = harmonic_scenario(30)?;
    check_projection_is_idempotent(&scenario, ProblemType::Hermitian)
}

/// The incrementally grown `H` and `G` equal `Vᴴ A V` and `Vᴴ B V`, across restarts.
#[test]
fn test_incremental_projection_matches_full_projection() -> Result<()> {
    let scenario = generalized_non_hermitian_scenario(40, 13);
    let cfg = SolverConfig::new(1)
        .with_ncv(8)
        .with_initial_size(2)
        .with_restart(3, 1)
        .with_tol(1e-14)
        .resolve(40, ProblemType::GeneralizedNonHermitian)?;
    let mut correction = IdentityPreconditioner;
    let b = scenario.b.as_ref();
    let mut dash = dashboard(cfg, &scenario.a, b, &SingleProcess, &mut correction, None)?;
    for _ in 0..10 {
        dash.step()?;
    }
    ensure!(dash.reason().is_none(), "run ended early: {:?}", dash.reason());
    dash.init_subspace()?;
    dash.calc_pairs()?;

    let v = dash.basis();
    let h = v.adjoint() * (scenario.a.as_ref() * v);
    let diff_h = max_abs_diff(dash.projected_h().as_ref(), h.as_ref());
    ensure!(diff_h < PROJECTION_TOLERANCE, "H differs from Vᴴ A V by {diff_h:e}");

    let b = scenario.b.as_ref().ok_or_else(|| anyhow!("pencil without B"))?;
    let g = v.adjoint() * (b.as_ref() * v);
    let projected_g = dash.projected_g().ok_or_else(|| anyhow!("no G for a pencil"))?;
    let diff_g = max_abs_diff(projected_g.as_ref(), g.as_ref());
    ensure!(diff_g < PROJECTION_TOLERANCE, "G differs from Vᴴ B V by {diff_g:e}");
    Ok(())
}

/// After a thick restart, `H` is the old `H` transformed by the retained coefficients.
#[test]
fn test_restart_transforms_projected_matrix() -> Result<()> {
    let a = random_hermitian(40, 21);
    let ncv = 8;
    let cfg = SolverConfig::new(1)
        .with_ncv(ncv)
        .with_initial_size(2)
        .with_restart(3, 1)
        .with_tol(1e-14)
        .resolve(40, ProblemType::Hermitian)?;
    let mut correction = IdentityPreconditioner;
    let mut dash = dashboard(cfg, &a, None, &SingleProcess, &mut correction, None)?;
    loop {
        dash.init_subspace()?;
        dash.calc_pairs()?;
        if dash.basis().ncols() + 1 > ncv {
            break;
        }
        dash.update_subspace()?;
    }
    ensure!(dash.converged().nconv() == 0, "a pair was locked before the restart");

    let h_old = dash.projected_h();
    dash.update_subspace()?;
    let mt = dash
        .pending_transform()
        .ok_or_else(|| anyhow!("restart left no pending transform"))?
        .to_owned();
    ensure!(mt.ncols() == 4, "restart kept {} columns instead of 3 + 1", mt.ncols());

    let applications = dash.operator_applications();
    dash.calc_pairs()?;
    ensure!(
        dash.operator_applications() == applications,
        "retained directions were applied to the operator again"
    );
    let expected = mt.as_ref().adjoint() * (h_old.as_ref() * mt.as_ref());
    let diff = max_abs_diff(dash.projected_h().as_ref(), expected.as_ref());
    ensure!(diff < ORTHOGONALITY_TOLERANCE, "H differs from MTᴴ H MT by {diff:e}");
    Ok(())
}

/// Residuals computed after a lock are orthogonal to the locked basis, and so is `V`.
#[test]
fn test_residuals_are_deflated_against_locked_vectors() -> Result<()> {
    let scenario = non_hermitian_scenario(40, 17);
    let cfg = SolverConfig::new(3)
        .with_ncv(12)
        .with_which(Which::LargestReal)
        .resolve(40, ProblemType::NonHermitian)?;
    let mut jacobi = JacobiPreconditioner::from_operator(&scenario.a)?;
    let mut dash = dashboard(cfg, &scenario.a, None, &SingleProcess, &mut jacobi, None)?;
    while dash.converged().nconv() == 0 {
        ensure!(dash.step()?.is_none(), "run ended before the first lock");
    }
    dash.init_subspace()?;
    dash.calc_pairs()?;

    let cx = dash.converged().vectors();
    let overlap = (cx.adjoint() * dash.residuals()).norm_l2();
    ensure!(
        overlap < ORTHOGONALITY_TOLERANCE,
        "residuals overlap the locked vectors: {overlap:e}"
    );
    let basis_overlap = (cx.adjoint() * dash.basis()).norm_l2();
    ensure!(
        basis_overlap < ORTHOGONALITY_TOLERANCE,
        "basis overlaps the locked vectors: {basis_overlap:e}"
    );
    Ok(())
}

/// One collective per iteration when batched, one per matrix otherwise, same matrices.
#[test]
fn test_batched_and_separate_reductions_agree() -> Result<()> {
    let n = 30;
    let a = random_matrix(n, 1);
    let b = Mat::from_fn(n, n, |i, j| {
        if i == j { c(2.0 + 0.1 * i as f64) } else { c(0.0) }
    });

    let mut runs = Vec::new();
    for batch in [true, false] {
        let cfg = SolverConfig::new(1)
            .with_ncv(10)
            .with_initial_size(2)
            .with_batch_reductions(batch)
            .with_seed(5)
            .resolve(n, ProblemType::GeneralizedNonHermitian)?;
        let counter = CountingCollective::default();
        let mut correction = IdentityPreconditioner;
        let mut dash = dashboard(cfg, &a, Some(&b), &counter, &mut correction, None)?;
        for _ in 0..4 {
            dash.step()?;
        }
        dash.init_subspace()?;
        dash.calc_pairs()?;
        let g = dash.projected_g().ok_or_else(|| anyhow!("no G for a pencil"))?;
        runs.push((dash.projected_h(), g, dash.eigenvalues().to_vec(), counter.calls.get()));
    }

    let (h_batched, g_batched, eig_batched, calls_batched) = &runs[0];
    let (h_separate, g_separate, eig_separate, calls_separate) = &runs[1];
    ensure!(h_batched == h_separate, "H depends on batching");
    ensure!(g_batched == g_separate, "G depends on batching");
    ensure!(eig_batched == eig_separate, "eigenvalues depend on batching");
    ensure!(
        *calls_separate == 2 * *calls_batched,
        "{calls_batched} batched vs {calls_separate} separate collectives"
    );
    Ok(())
}

/// An expansion that only reproduces a locked direction leaves nothing after
/// orthogonalization on the third iteration; the locked pair survives untouched.
#[test]
fn test_breakdown_keeps_converged_pairs() -> Result<()> {
    let n = 50;
    let a = Mat::from_fn(n, n, |i, j| if i == j { c((i + 1) as f64) } else { c(0.0) });
    let e_last = Mat::from_fn(n, 1, |i, _| c(if i == n - 1 { 1.0 } else { 0.0 }));
    let cfg = SolverConfig::new(2)
        .with_ncv(10)
        .with_initial_size(2)
        .resolve(n, ProblemType::Hermitian)?;
    let mut locked_direction = |_shift: c64, _r: MatRef<'_, c64>| -> Result<Mat<c64>> {
        Ok(Mat::from_fn(n, 1, |i, _| c(if i == n - 1 { 1.0 } else { 0.0 })))
    };
    let mut dash = dashboard(
        cfg,
        &a,
        None,
        &SingleProcess,
        &mut locked_direction,
        Some(e_last.as_ref()),
    )?;

    ensure!(dash.step()?.is_none(), "first iteration ended the run");
    ensure!(dash.converged().nconv() == 1, "the exact start vector was not locked");
    let locked_values = dash.converged().eigenvalues().to_vec();
    let locked_vectors = dash.converged().vectors().to_owned();
    ensure!((locked_values[0] - c(50.0)).norm() < 1e-12, "locked {}", locked_values[0]);

    let reason = dash.run()?;
    ensure!(
        reason == ConvergedReason::DivergedBreakdown,
        "expected a breakdown, got {reason:?}"
    );
    ensure!(dash.iteration() == 3, "breakdown at iteration {}", dash.iteration());
    ensure!(dash.converged().nconv() == 1, "converged set changed size");
    ensure!(
        dash.converged().eigenvalues() == locked_values.as_slice(),
        "locked eigenvalue was modified"
    );
    ensure!(
        dash.converged().vectors() == locked_vectors.as_ref(),
        "locked vector was modified"
    );
    Ok(())
}

/// A rank-3 diagonal operator with `nev` above its rank.
///
/// The start block `[e1, e5, e2 + e3]` holds the exact pairs `5` and `0`, and a mix of the
/// eigenvalues `2` and `1`. Iteration 1 locks `5`, but the null vector is not locked
/// because the unconverged mix is ranked ahead of it. In iteration 2 the diagonal
/// correction of the mix is parallel to the mix itself. Iteration 3 then finds nothing
/// left after orthogonalization.
#[test]
fn test_rank_deficient_operator_breaks_down() -> Result<()> {
    let n = 12;
    let diagonal = [5.0, 2.0, 1.0];
    let a = Mat::from_fn(n, n, |i, j| {
        if i == j && i < diagonal.len() { c(diagonal[i]) } else { c(0.0) }
    });
    let start = Mat::from_fn(n, 3, |i, j| match (i, j) {
        (0, 0) | (4, 1) | (1, 2) | (2, 2) => c(1.0),
        _ => c(0.0),
    });
    let cfg = SolverConfig::new(4)
        .with_ncv(8)
        .with_initial_size(3)
        .resolve(n, ProblemType::Hermitian)?;
    let mut jacobi = JacobiPreconditioner::from_operator(&a)?;
    let mut dash = dashboard(
        cfg,
        &a,
        None,
        &SingleProcess,
        &mut jacobi,
        Some(start.as_ref()),
    )?;

    ensure!(dash.step()?.is_none(), "first iteration ended the run");
    ensure!(dash.converged().nconv() == 1, "{} pairs locked", dash.converged().nconv());
    let locked_values = dash.converged().eigenvalues().to_vec();
    let locked_vectors = dash.converged().vectors().to_owned();
    ensure!((locked_values[0] - c(5.0)).norm() < 1e-12, "locked {}", locked_values[0]);

    ensure!(dash.step()?.is_none(), "second iteration ended the run");
    ensure!(dash.basis().ncols() == 3, "the correction was not appended");

    let reason = dash.run()?;
    ensure!(
        reason == ConvergedReason::DivergedBreakdown,
        "expected a breakdown, got {reason:?}"
    );
    ensure!(dash.iteration() == 3, "breakdown at iteration {}", dash.iteration());
    ensure!(dash.basis().ncols() == 2, "a dependent direction was kept");
    ensure!(
        dash.converged().eigenvalues() == locked_values.as_slice(),
        "locked eigenvalue was modified"
    );
    ensure!(
        dash.converged().vectors() == locked_vectors.as_ref(),
        "locked vector was modified"
    );
    Ok(())
}
