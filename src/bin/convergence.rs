//! Experiment Runner for Convergence Histories.
//!
//! This executable solves one synthetic eigenproblem with the Davidson engine and writes
//! the per-iteration history (basis size, number of locked pairs, leading error estimate,
//! operator applications) to a CSV file. Comparing the Jacobi correction with the plain
//! residual expansion on the same problem shows how much the correction equation buys.

use anyhow::{Result, anyhow};
use clap::{Parser, ValueEnum};
use davidson_engine::{
    EigenProblem, Extraction, SolverConfig, Which,
    algorithms::reduction::SingleProcess,
    correction::{CorrectionSolver, IdentityPreconditioner, JacobiPreconditioner},
    solve,
};
use faer::{Mat, c64};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::Serialize;
use std::path::PathBuf;

/// The shape of the synthetic test problem.
#[derive(ValueEnum, Clone, Debug, Copy, Serialize)]
#[serde(rename_all = "kebab-case")]
enum ProblemKind {
    /// Diagonally dominant Hermitian matrix with a weak random coupling.
    Hermitian,
    /// Banded upper triangular matrix; its eigenvalues are its diagonal.
    NonHermitian,
    /// Hermitian tridiagonal `A` with a diagonal positive definite `B`.
    GeneralizedHermitian,
    /// Pair of banded upper triangular matrices.
    GeneralizedNonHermitian,
}

/// How the search subspace is expanded.
#[derive(ValueEnum, Clone, Debug, Copy, Serialize)]
#[serde(rename_all = "kebab-case")]
enum Correction {
    /// Append the residual itself.
    Identity,
    /// Diagonal approximation of `(A - θ B)⁻¹`.
    Jacobi,
}

/// Part of the spectrum to compute.
#[derive(ValueEnum, Clone, Debug, Copy)]
enum Selection {
    LargestMagnitude,
    LargestReal,
    SmallestReal,
    /// Closest to `--target`, with harmonic extraction.
    Interior,
}

/// Command-line arguments for the convergence history runner.
#[derive(Parser, Debug)]
#[clap(
    name = "convergence-runner",
    about = "Records the convergence history of one Davidson solve."
)]
struct ConvergenceArgs {
    #[clap(long, value_enum)]
    problem: ProblemKind,
    #[clap(long, value_enum, default_value = "jacobi")]
    correction: Correction,
    #[clap(long, value_enum, default_value = "largest-magnitude")]
    which: Selection,
    /// Target for `--which interior`.
    #[clap(long, default_value_t = 0.0)]
    target: f64,
    /// Dimension of the test matrix.
    #[clap(long, default_value_t = 1000)]
    n: usize,
    /// Number of requested eigenpairs.
    #[clap(long, default_value_t = 5)]
    nev: usize,
    /// Maximum dimension of the search subspace.
    #[clap(long, default_value_t = 30)]
    ncv: usize,
    #[clap(long, default_value_t = 1e-8)]
    tol: f64,
    #[clap(long, default_value_t = 1000)]
    max_it: usize,
    #[clap(long, default_value_t = 42)]
    seed: u64,
    /// Path to the output CSV file where results will be written.
    #[clap(long, value_name = "PATH")]
    output: PathBuf,
}

/// One row of the output CSV: the engine's iteration record plus the run parameters.
#[derive(Debug, Serialize)]
struct HistoryRow {
    problem: ProblemKind,
    correction: Correction,
    iteration: usize,
    nconv: usize,
    size_v: usize,
    eigenvalue_re: f64,
    eigenvalue_im: f64,
    error_estimate: f64,
    operator_applications: usize,
}

/// A synthetic pencil; `b` is absent for standard problems.
struct TestProblem {
    a: Mat<c64>,
    b: Option<Mat<c64>>,
    hermitian: bool,
}

fn random_entry(rng: &mut StdRng, scale: f64) -> c64 {
    c64::new(
        scale * (rng.random::<f64>() - 0.5),
        scale * (rng.random::<f64>() - 0.5),
    )
}

fn banded_upper(diagonal: &[f64], scale: f64, rng: &mut StdRng) -> Mat<c64> {
    let n = diagonal.len();
    let mut m = Mat::zeros(n, n);
    for j in 0..n {
        m[(j, j)] = c64::new(diagonal[j], 0.0);
        for i in j.saturating_sub(3)..j {
            m[(i, j)] = random_entry(rng, scale);
        }
    }
    m
}

fn build_problem(kind: ProblemKind, n: usize, seed: u64) -> TestProblem {
    let mut rng = StdRng::seed_from_u64(seed);
    let diagonal: Vec<f64> = (1..=n).map(|i| i as f64).collect();
    match kind {
        ProblemKind::Hermitian => {
            let mut a = Mat::zeros(n, n);
            for j in 0..n {
                a[(j, j)] = c64::new(diagonal[j], 0.0);
                for i in j.saturating_sub(5)..j {
                    let z = random_entry(&mut rng, 0.1);
                    a[(i, j)] = z;
                    a[(j, i)] = z.conj();
                }
            }
            TestProblem {
                a,
                b: None,
                hermitian: true,
            }
        }
        ProblemKind::NonHermitian => TestProblem {
            a: banded_upper(&diagonal, 0.2, &mut rng),
            b: None,
            hermitian: false,
        },
        ProblemKind::GeneralizedHermitian => {
            let a = Mat::from_fn(n, n, |i, j| match i.abs_diff(j) {
                0 => c64::new(diagonal[i], 0.0),
                1 => c64::new(0.1, 0.0),
                _ => c64::new(0.0, 0.0),
            });
            let b = Mat::from_fn(n, n, |i, j| {
                if i == j { c64::new(1.0 + 1.0 / (i + 1) as f64, 0.0) } else { c64::new(0.0, 0.0) }
            });
            TestProblem {
                a,
                b: Some(b),
                hermitian: true,
            }
        }
        ProblemKind::GeneralizedNonHermitian => {
            let b_diag: Vec<f64> = (0..n).map(|i| 1.0 + 1.0 / (i + 1) as f64).collect();
            TestProblem {
                a: banded_upper(&diagonal, 0.2, &mut rng),
                b: Some(banded_upper(&b_diag, 0.02, &mut rng)),
                hermitian: false,
            }
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logger: {}", e))?;

    let args = ConvergenceArgs::parse();
    log::info!("Building {:?} problem of size {}...", args.problem, args.n);
    let problem = build_problem(args.problem, args.n, args.seed);

    let mut config = SolverConfig::new(args.nev)
        .with_ncv(args.ncv)
        .with_tol(args.tol)
        .with_max_it(args.max_it)
        .with_seed(args.seed);
    config = match args.which {
        Selection::LargestMagnitude => config.with_which(Which::LargestMagnitude),
        Selection::LargestReal => config.with_which(Which::LargestReal),
        Selection::SmallestReal => config.with_which(Which::SmallestReal),
        Selection::Interior => config
            .with_which(Which::TargetMagnitude)
            .with_target(c64::new(args.target, 0.0))
            .with_extraction(Extraction::Harmonic),
    };

    let eigenproblem = match &problem.b {
        Some(b) => EigenProblem::generalized(&problem.a, b, problem.hermitian),
        None => EigenProblem::standard(&problem.a, problem.hermitian),
    };
    let mut correction: Box<dyn CorrectionSolver> = match args.correction {
        Correction::Identity => Box::new(IdentityPreconditioner),
        Correction::Jacobi => match &problem.b {
            Some(b) => Box::new(JacobiPreconditioner::from_operators(&problem.a, b)?),
            None => Box::new(JacobiPreconditioner::from_operator(&problem.a)?),
        },
    };

    let solution = solve(&eigenproblem, &config, correction.as_mut(), &SingleProcess)?;
    log::info!(
        "Solve finished with {:?}: {} pairs in {} iterations, {} operator applications.",
        solution.reason,
        solution.nconv(),
        solution.iterations,
        solution.operator_applications
    );
    for (lambda, errest) in solution.eigenvalues.iter().zip(&solution.error_estimates) {
        log::info!("  λ = {lambda:.10} (error estimate {errest:.2e})");
    }

    let mut writer = csv::Writer::from_path(&args.output)?;
    for record in &solution.history {
        writer.serialize(HistoryRow {
            problem: args.problem,
            correction: args.correction,
            iteration: record.iteration,
            nconv: record.nconv,
            size_v: record.size_v,
            eigenvalue_re: record.eigenvalue_re,
            eigenvalue_im: record.eigenvalue_im,
            error_estimate: record.error_estimate,
            operator_applications: record.operator_applications,
        })?;
    }
    writer.flush()?;
    log::info!("History written to {:?}.", args.output);
    Ok(())
}
