//! Correction-equation solvers used to expand the search subspace.
//!
//! Generalized Davidson expands the basis by an approximate solution `d` of the
//! correction equation `(A - θ B) d = r` for a residual `r`. How well that system is
//! solved only affects the convergence speed, never the correctness of the computed
//! pairs, so the engine delegates it entirely to a [`CorrectionSolver`].
//!
//! A solver failure is not fatal: the engine logs it and falls back to the residual
//! itself as the new direction.

use crate::{
    error::{DavidsonError, DavidsonErrorKind},
    matrix::LinearOperator,
};
use anyhow::{Result, ensure};
use faer::{Mat, MatRef, c64};

/// Approximate solver of `(A - shift B) d = r`.
pub trait CorrectionSolver {
    /// Returns the correction for one residual column.
    fn solve(&mut self, shift: c64, residual: MatRef<'_, c64>) -> Result<Mat<c64>>;
}

impl<F> CorrectionSolver for F
where
    F: FnMut(c64, MatRef<'_, c64>) -> Result<Mat<c64>>,
{
    fn solve(&mut self, shift: c64, residual: MatRef<'_, c64>) -> Result<Mat<c64>> {
        self(shift, residual)
    }
}

/// `d = r`: the subspace grows by the residual, as in a block Lanczos/Arnoldi process.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityPreconditioner;

impl CorrectionSolver for IdentityPreconditioner {
    fn solve(&mut self, _shift: c64, residual: MatRef<'_, c64>) -> Result<Mat<c64>> {
        Ok(residual.to_owned())
    }
}

/// Diagonal (Jacobi) preconditioner: `d_i = r_i / (a_ii - shift b_ii)`.
///
/// Denominators smaller than `1e-8` in magnitude are replaced by `1e-8`.
#[derive(Debug, Clone)]
pub struct JacobiPreconditioner {
    a_diag: Vec<c64>,
    b_diag: Option<Vec<c64>>,
}

const MIN_DENOMINATOR: f64 = 1e-8;

impl JacobiPreconditioner {
    pub fn new(a_diag: Vec<c64>) -> Self {
        Self {
            a_diag,
            b_diag: None,
        }
    }

    /// For a pencil: the shift is scaled by the diagonal of `B`.
    pub fn generalized(a_diag: Vec<c64>, b_diag: Vec<c64>) -> Result<Self, DavidsonError> {
        if a_diag.len() != b_diag.len() {
            return Err(DavidsonErrorKind::DimensionMismatch {
                context: "Jacobi preconditioner diagonals",
                expected: a_diag.len(),
                actual: b_diag.len(),
            }
            .into());
        }
        Ok(Self {
            a_diag,
            b_diag: Some(b_diag),
        })
    }

    /// Builds the preconditioner from the diagonal exposed by `op`.
    ///
    /// # Errors
    /// Returns an input error when the operator does not expose its diagonal.
    pub fn from_operator(op: &dyn LinearOperator<c64>) -> Result<Self, DavidsonError> {
        Ok(Self::new(diagonal_of(op, "A")?))
    }

    /// Builds the preconditioner from the diagonals exposed by `a` and `b`.
    pub fn from_operators(
        a: &dyn LinearOperator<c64>,
        b: &dyn LinearOperator<c64>,
    ) -> Result<Self, DavidsonError> {
        Self::generalized(diagonal_of(a, "A")?, diagonal_of(b, "B")?)
    }
}

fn diagonal_of(op: &dyn LinearOperator<c64>, name: &str) -> Result<Vec<c64>, DavidsonError> {
    op.diagonal().ok_or_else(|| {
        DavidsonErrorKind::InputError(format!(
            "operator {name} does not expose its diagonal, which the Jacobi preconditioner needs"
        ))
        .into()
    })
}

impl CorrectionSolver for JacobiPreconditioner {
    fn solve(&mut self, shift: c64, residual: MatRef<'_, c64>) -> Result<Mat<c64>> {
        ensure!(
            residual.nrows() == self.a_diag.len(),
            "residual of length {} for a preconditioner of size {}",
            residual.nrows(),
            self.a_diag.len()
        );
        let one = c64::new(1.0, 0.0);
        Ok(Mat::from_fn(residual.nrows(), residual.ncols(), |i, j| {
            let b = self.b_diag.as_ref().map_or(one, |d| d[i]);
            let mut den = self.a_diag[i] - shift * b;
            if den.norm() < MIN_DENOMINATOR {
                den = c64::new(MIN_DENOMINATOR, 0.0);
            }
            residual[(i, j)] / den
        }))
    }
}
