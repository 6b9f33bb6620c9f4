//! Core iterative machinery of the Davidson-family eigensolver.
//!
//! ** NOTE: We recommend using the high-level entry points in [`crate::solvers`]. The
//! modules here are public for callers that need to drive the pipeline one step at a
//! time, inspect the projected matrices, or plug in their own collective.
//!
//! One outer iteration is executed by the [`dashboard::Dashboard`], which owns all the
//! state of a solve and calls an ordered set of pluggable steps:
//!
//! - [`initv`]: fills an empty search subspace,
//! - [`calcpairs`]: projects the operators onto the subspace and extracts approximate
//!   eigenpairs and residuals,
//! - [`updatev`]: locks converged pairs, restarts an overflowing subspace, or expands it.
//!
//! Storage is negotiated up front through the two-phase [`blackboard`] planner, and the
//! inner products that build the projected matrices go through the [`reduction`] batcher
//! so that one outer iteration needs a single collective. [`harmonic`] provides the
//! extraction strategies (Rayleigh-Ritz and harmonic variants).

pub mod blackboard;
pub mod calcpairs;
pub mod dashboard;
pub mod harmonic;
pub mod initv;
pub mod reduction;
pub mod updatev;

use crate::dense::ONE;
use faer::{Accum, Mat, MatRef, Par, c64, linalg::matmul::matmul};

/// Norms of a vector before and after it was orthogonalized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Orthogonalization {
    pub before: f64,
    pub after: f64,
}

impl Orthogonalization {
    /// The vector lost (almost) everything to the reference directions.
    ///
    /// Whatever is left below `sqrt(ε)` of the incoming norm is rounding noise, and
    /// normalizing it would inject that noise into the basis.
    pub fn is_dependent(&self) -> bool {
        self.after <= f64::EPSILON.sqrt() * self.before || self.after < f64::MIN_POSITIVE
    }
}

/// Two passes of classical Gram-Schmidt of the column block `v` against each of `refs`.
///
/// The reference blocks must have orthonormal columns.
pub(crate) fn orthogonalize(v: &mut Mat<c64>, refs: &[MatRef<'_, c64>]) -> Orthogonalization {
    let before = v.norm_l2();
    for _ in 0..2 {
        for r in refs {
            if r.ncols() == 0 {
                continue;
            }
            let coeffs = r.adjoint() * v.as_ref();
            matmul(v.as_mut(), Accum::Add, *r, coeffs.as_ref(), -ONE, Par::Seq);
        }
    }
    Orthogonalization {
        before,
        after: v.norm_l2(),
    }
}

/// Scales a single column to unit length.
pub(crate) fn normalize(v: &mut Mat<c64>) {
    let norm = v.norm_l2();
    if norm > 0.0 {
        let inv = 1.0 / norm;
        for i in 0..v.nrows() {
            for j in 0..v.ncols() {
                v[(i, j)] *= inv;
            }
        }
    }
}

/// Error estimate of an approximate eigenvalue: relative when `|λ|` dominates the residual.
pub(crate) fn error_estimate(lambda: c64, residual_norm: f64) -> f64 {
    let magnitude = lambda.norm();
    if magnitude > residual_norm {
        residual_norm / magnitude
    } else {
        residual_norm
    }
}

/// `Q` with orthonormal columns spanning the columns of `m`; dependent columns are dropped.
pub(crate) fn orthonormal_columns(m: MatRef<'_, c64>) -> Mat<c64> {
    let mut kept: Vec<Mat<c64>> = Vec::with_capacity(m.ncols());
    for j in 0..m.ncols() {
        let mut col = m.subcols(j, 1).to_owned();
        let refs: Vec<MatRef<'_, c64>> = kept.iter().map(|q| q.as_ref()).collect();
        let outcome = orthogonalize(&mut col, &refs);
        if outcome.is_dependent() {
            continue;
        }
        normalize(&mut col);
        kept.push(col);
    }
    Mat::from_fn(m.nrows(), kept.len(), |i, j| kept[j][(i, 0)])
}

/// Copies `m` into `buf` in column-major order.
pub(crate) fn write_col_major(m: MatRef<'_, c64>, buf: &mut [c64]) {
    let rows = m.nrows();
    for j in 0..m.ncols() {
        for i in 0..rows {
            buf[i + j * rows] = m[(i, j)];
        }
    }
}

/// Reads a `rows x cols` column-major block out of `buf`.
pub(crate) fn read_col_major(buf: &[c64], rows: usize, cols: usize) -> Mat<c64> {
    Mat::from_fn(rows, cols, |i, j| buf[i + j * rows])
}
