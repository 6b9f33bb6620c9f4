//! Hermitian projected problems, solved with faer's self-adjoint eigensolver.

use super::{ProjectedSolution, ZERO};
use crate::error::{DavidsonError, DavidsonErrorKind};
use faer::{Mat, MatRef, Side, c64};

/// Eigendecomposition `H = pX diag(θ) pXᴴ` of a Hermitian projected matrix.
///
/// Only the lower triangle of `h` is read. Eigenvalues come back in nondecreasing
/// order; the caller reorders them by the selection criterion.
pub fn hermitian_eigen(h: MatRef<'_, c64>) -> Result<ProjectedSolution, DavidsonError> {
    let n = h.nrows();
    if n == 0 {
        return Ok(ProjectedSolution {
            eigenvalues: Vec::new(),
            s: Mat::zeros(0, 0),
            t: None,
            px: Mat::zeros(0, 0),
            py: None,
        });
    }

    let evd = h
        .self_adjoint_eigen(Side::Lower)
        .map_err(|e| DavidsonError::from(DavidsonErrorKind::EvdError(e)))?;
    let values = evd.S().column_vector();
    let eigenvalues: Vec<c64> = (0..n).map(|i| c64::new(values[i].re, 0.0)).collect();

    let s = Mat::from_fn(n, n, |i, j| if i == j { eigenvalues[i] } else { ZERO });
    Ok(ProjectedSolution {
        eigenvalues,
        s,
        t: None,
        px: evd.U().to_owned(),
        py: None,
    })
}
