//! Experiment Runner for the Subspace Size and Restart Trade-off.
//!
//! A larger search subspace (`ncv`) and a larger thick restart (`minv`, `plusk`) cut
//! the number of outer iterations, but every iteration then orthogonalizes against and
//! projects onto more vectors. This executable sweeps `ncv` for a fixed Hermitian test
//! problem, runs each restart policy, and records iterations, operator applications,
//! wall-clock time and the blackboard storage into a CSV file.

use anyhow::{Result, anyhow};
use clap::{Parser, ValueEnum};
use davidson_engine::{
    ConvergedReason, ProblemType, SolverConfig,
    algorithms::{
        dashboard::{Dashboard, Operators, Pipeline},
        reduction::SingleProcess,
    },
    correction::JacobiPreconditioner,
};
use faer::{Mat, c64};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::Serialize;
use std::{path::PathBuf, time::Instant};

/// Which vectors survive a thick restart.
#[derive(ValueEnum, Clone, Debug, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
enum RestartPolicy {
    /// Keep only `nev + 1` Ritz vectors.
    Minimal,
    /// Keep half of the subspace.
    Half,
    /// Keep half of the subspace, plus two Ritz vectors of the previous iteration.
    HalfPlusPrevious,
}

impl RestartPolicy {
    /// `(minv, plusk)` for a subspace of `ncv` vectors.
    fn sizes(self, nev: usize, ncv: usize) -> (usize, usize) {
        match self {
            RestartPolicy::Minimal => (nev + 1, 0),
            RestartPolicy::Half => ((ncv / 2).max(nev + 1), 0),
            RestartPolicy::HalfPlusPrevious => ((ncv / 2).max(nev + 1), 2),
        }
    }
}

/// Command-line arguments for the restart trade-off runner.
#[derive(Parser, Debug)]
#[clap(
    name = "restart-tradeoff-runner",
    about = "Sweeps the subspace size and restart policy of the Davidson solver."
)]
struct TradeoffArgs {
    /// Dimension of the test matrix.
    #[clap(long, default_value_t = 2000)]
    n: usize,
    /// Number of requested eigenpairs.
    #[clap(long, default_value_t = 8)]
    nev: usize,
    #[clap(long, default_value_t = 12)]
    ncv_start: usize,
    #[clap(long, default_value_t = 60)]
    ncv_end: usize,
    #[clap(long, default_value_t = 8)]
    ncv_step: usize,
    /// Restart policies to run; all of them by default.
    #[clap(long, value_enum, num_args = 1..)]
    policies: Vec<RestartPolicy>,
    #[clap(long, default_value_t = 1e-8)]
    tol: f64,
    #[clap(long, default_value_t = 42)]
    seed: u64,
    /// Path to the output CSV file where results will be written.
    #[clap(long, value_name = "PATH")]
    output: PathBuf,
}

/// Represents a single row of data in the output CSV file.
#[derive(Debug, Serialize)]
struct TradeoffResult {
    policy: RestartPolicy,
    ncv: usize,
    minv: usize,
    plusk: usize,
    reason: ConvergedReason,
    nconv: usize,
    iterations: usize,
    operator_applications: usize,
    time_s: f64,
    /// Column vectors held by the blackboard.
    pool_vectors: usize,
    /// Scalars held by the blackboard.
    pool_scalars: usize,
}

/// Banded Hermitian matrix with diagonal `1..=n` and a weak random coupling.
fn build_matrix(n: usize, seed: u64) -> Mat<c64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut a = Mat::zeros(n, n);
    for j in 0..n {
        a[(j, j)] = c64::new((j + 1) as f64, 0.0);
        for i in j.saturating_sub(5)..j {
            let z = c64::new(
                0.1 * (rng.random::<f64>() - 0.5),
                0.1 * (rng.random::<f64>() - 0.5),
            );
            a[(i, j)] = z;
            a[(j, i)] = z.conj();
        }
    }
    a
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logger: {}", e))?;

    let args = TradeoffArgs::parse();
    let policies = if args.policies.is_empty() {
        vec![
            RestartPolicy::Minimal,
            RestartPolicy::Half,
            RestartPolicy::HalfPlusPrevious,
        ]
    } else {
        args.policies.clone()
    };

    log::info!("Building Hermitian test matrix of size {}...", args.n);
    let a = build_matrix(args.n, args.seed);

    let mut writer = csv::Writer::from_path(&args.output)?;
    for ncv in (args.ncv_start..=args.ncv_end).step_by(args.ncv_step) {
        for &policy in &policies {
            let (minv, plusk) = policy.sizes(args.nev, ncv);
            let resolved = SolverConfig::new(args.nev)
                .with_ncv(ncv)
                .with_tol(args.tol)
                .with_restart(minv, plusk)
                .with_seed(args.seed)
                .resolve(args.n, ProblemType::Hermitian);
            let cfg = match resolved {
                Ok(cfg) => cfg,
                Err(err) => {
                    log::warn!("Skipping ncv = {ncv} with {policy:?}: {err}");
                    continue;
                }
            };
            log::info!("Running ncv = {ncv}, restart = ({minv}, {plusk})...");

            let mut jacobi = JacobiPreconditioner::from_operator(&a)?;
            let pipeline = Pipeline::for_config(&cfg, None, &mut jacobi);
            let mut dashboard = Dashboard::new(cfg, Operators { a: &a, b: None }, &SingleProcess, pipeline)?;

            let start_time = Instant::now();
            let reason = dashboard.run()?;
            let time_s = start_time.elapsed().as_secs_f64();
            let (pool_vectors, pool_scalars) = dashboard.storage();

            writer.serialize(TradeoffResult {
                policy,
                ncv,
                minv,
                plusk,
                reason,
                nconv: dashboard.converged().nconv(),
                iterations: dashboard.iteration(),
                operator_applications: dashboard.operator_applications(),
                time_s,
                pool_vectors,
                pool_scalars,
            })?;
        }
    }
    writer.flush()?;

    log::info!("Experiment complete.");
    Ok(())
}
