//! This module provides a high-level, user-friendly API for computing a few eigenpairs
//! of `A x = λ x` or `A x = λ B x` with the Davidson-family engine in [`crate::algorithms`].
//!
//! A solve always returns an [`EigenSolution`] once setup succeeded: running out of
//! iterations and numerical breakdown are terminal states reported through
//! [`EigenSolution::reason`], and the pairs converged up to that point are returned.

use crate::{
    algorithms::{
        dashboard::{ConvergedReason, ConvergedSubspace, Dashboard, IterationRecord, Operators, Pipeline},
        reduction::{Collective, SingleProcess},
    },
    config::{ProblemType, SolverConfig},
    correction::CorrectionSolver,
    dense::{ProjectedSolution, fix_real_diagonal, triangular_eigenvectors},
    error::{DavidsonError, DavidsonErrorKind},
    matrix::LinearOperator,
};
use faer::{Mat, MatRef, c64};

/// The operators of an eigenproblem and what is known about them.
#[derive(Clone, Copy)]
pub struct EigenProblem<'a> {
    a: &'a dyn LinearOperator<c64>,
    b: Option<&'a dyn LinearOperator<c64>>,
    kind: ProblemType,
    initial: Option<MatRef<'a, c64>>,
}

impl<'a> EigenProblem<'a> {
    /// `A x = λ x`, with `hermitian` telling whether `A = Aᴴ`.
    pub fn standard(a: &'a dyn LinearOperator<c64>, hermitian: bool) -> Self {
        Self {
            a,
            b: None,
            kind: if hermitian {
                ProblemType::Hermitian
            } else {
                ProblemType::NonHermitian
            },
            initial: None,
        }
    }

    /// `A x = λ B x`. A Hermitian pencil needs `A` Hermitian and `B` Hermitian positive definite.
    pub fn generalized(
        a: &'a dyn LinearOperator<c64>,
        b: &'a dyn LinearOperator<c64>,
        hermitian: bool,
    ) -> Self {
        Self {
            a,
            b: Some(b),
            kind: if hermitian {
                ProblemType::GeneralizedHermitian
            } else {
                ProblemType::GeneralizedNonHermitian
            },
            initial: None,
        }
    }

    /// Columns used (once) as the start of the search subspace.
    pub fn with_initial_vectors(mut self, initial: MatRef<'a, c64>) -> Self {
        self.initial = Some(initial);
        self
    }

    pub fn kind(&self) -> ProblemType {
        self.kind
    }

    pub fn dim(&self) -> usize {
        self.a.nrows()
    }

    /// Checks that the operators and the initial vectors fit together.
    fn validate(&self) -> Result<(), DavidsonError> {
        let n = self.a.nrows();
        if self.a.ncols() != n {
            return Err(DavidsonErrorKind::DimensionMismatch {
                context: "operator A (not square)",
                expected: n,
                actual: self.a.ncols(),
            }
            .into());
        }
        if let Some(b) = self.b {
            if b.nrows() != n || b.ncols() != n {
                return Err(DavidsonErrorKind::DimensionMismatch {
                    context: "operator B",
                    expected: n,
                    actual: if b.nrows() != n { b.nrows() } else { b.ncols() },
                }
                .into());
            }
        }
        if let Some(initial) = self.initial {
            if initial.nrows() != n {
                return Err(DavidsonErrorKind::DimensionMismatch {
                    context: "initial vectors",
                    expected: n,
                    actual: initial.nrows(),
                }
                .into());
            }
        }
        Ok(())
    }
}

/// Outcome of a solve.
#[derive(Debug, Clone)]
pub struct EigenSolution {
    /// Converged eigenvalues in the order they were locked.
    pub eigenvalues: Vec<c64>,
    /// Unit eigenvectors, one column per eigenvalue.
    pub eigenvectors: Mat<c64>,
    /// Error estimate of each eigenvalue when it was locked.
    pub error_estimates: Vec<f64>,
    pub reason: ConvergedReason,
    pub iterations: usize,
    pub operator_applications: usize,
    pub history: Vec<IterationRecord>,
}

impl EigenSolution {
    pub fn nconv(&self) -> usize {
        self.eigenvalues.len()
    }

    pub fn converged(&self) -> bool {
        self.reason == ConvergedReason::Converged
    }
}

/// Computes eigenpairs of the Hermitian operator `a`.
///
/// # Arguments
/// * `a`: The Hermitian operator.
/// * `config`: Solver parameters; see [`SolverConfig`].
/// * `correction`: Approximate solver of the correction equation, e.g. a
///   [`crate::correction::JacobiPreconditioner`].
///
/// # Returns
/// The converged pairs and the bookkeeping of the run, or a configuration error.
pub fn davidson(
    a: &dyn LinearOperator<c64>,
    config: &SolverConfig,
    correction: &mut dyn CorrectionSolver,
) -> Result<EigenSolution, DavidsonError> {
    solve(&EigenProblem::standard(a, true), config, correction, &SingleProcess)
}

/// Computes eigenpairs of the Hermitian pencil `(a, b)`, with `b` positive definite.
pub fn davidson_generalized(
    a: &dyn LinearOperator<c64>,
    b: &dyn LinearOperator<c64>,
    config: &SolverConfig,
    correction: &mut dyn CorrectionSolver,
) -> Result<EigenSolution, DavidsonError> {
    solve(
        &EigenProblem::generalized(a, b, true),
        config,
        correction,
        &SingleProcess,
    )
}

/// Runs a full solve of `problem` over the process group `collective`.
///
/// # Errors
/// Configuration errors (including dimension mismatches) are reported before any
/// operator is applied. Consistency errors abort the solve.
pub fn solve(
    problem: &EigenProblem<'_>,
    config: &SolverConfig,
    correction: &mut dyn CorrectionSolver,
    collective: &dyn Collective,
) -> Result<EigenSolution, DavidsonError> {
    problem.validate()?;
    let cfg = config.resolve(problem.dim(), problem.kind)?;
    let ops = Operators {
        a: problem.a,
        b: problem.b,
    };
    let pipeline = Pipeline::for_config(&cfg, problem.initial, correction);
    let mut dashboard = Dashboard::new(cfg, ops, collective, pipeline)?;
    dashboard.run()?;
    Ok(finish(dashboard))
}

/// Turns a finished dashboard into an [`EigenSolution`].
pub fn finish(dashboard: Dashboard<'_>) -> EigenSolution {
    let (converged, summary) = dashboard.into_parts();
    EigenSolution {
        eigenvalues: converged.eigenvalues().to_vec(),
        eigenvectors: compute_eigenvectors(&converged),
        error_estimates: converged.error_estimates().to_vec(),
        reason: summary.reason,
        iterations: summary.iterations,
        operator_applications: summary.operator_applications,
        history: summary.history,
    }
}

/// Eigenvectors of the locked pairs.
///
/// Locked eigenvectors are returned as they are. A locked partial Schur form
/// `(cS, cT)` first gets a real diagonal in `cT`, then the eigenvectors `Z` of the
/// triangular pencil are mapped back as `cX Z`.
pub fn compute_eigenvectors(converged: &ConvergedSubspace) -> Mat<c64> {
    let x = converged.vectors();
    let Some(s) = converged.schur_s() else {
        return x.to_owned();
    };
    let mut reduced = ProjectedSolution {
        eigenvalues: converged.eigenvalues().to_vec(),
        s: s.to_owned(),
        t: converged.schur_t().map(|t| t.to_owned()),
        px: x.to_owned(),
        py: None,
    };
    fix_real_diagonal(&mut reduced);
    let z = triangular_eigenvectors(reduced.s.as_ref(), reduced.t.as_ref().map(|t| t.as_ref()));
    reduced.px.as_ref() * z.as_ref()
}
