//! Dense Projected-Problem Solver.
//!
//! Every outer iteration projects the operators onto the search subspace and ends up
//! with a small dense problem: `H y = θ y` or the pencil `H y = θ G y`. This module
//! solves it in the flavor dictated by [`ProjectedShape`]:
//!
//! - Hermitian standard: [`hermitian::hermitian_eigen`], backed by faer's self-adjoint
//!   eigensolver.
//! - Non-Hermitian standard: [`schur::complex_schur`], a Givens-based Hessenberg
//!   reduction followed by shifted QR sweeps.
//! - Generalized: [`qz::generalized_schur`], a Hessenberg-triangular reduction followed
//!   by single-shift QZ sweeps.
//!
//! The result is then reordered so that the pairs wanted by the selection criterion
//! come first ([`sort`]), and for pencils the diagonal of the triangular factor `T` is
//! made real by a per-column phase ([`fix_real_diagonal`]).
//!
//! faer keeps its complex Schur and QZ kernels private, so the rotation-based versions
//! here are written against plain `Mat<c64>` indexing. The projected problems never
//! exceed the subspace cap, which keeps these O(k³) kernels cheap.

pub mod hermitian;
pub mod qz;
pub mod schur;
pub mod sort;

use crate::{config::ProjectedShape, error::DavidsonError};
use faer::{Mat, MatRef, c64};
use std::ops::Range;

pub use sort::Selection;

pub(crate) const ZERO: c64 = c64 { re: 0.0, im: 0.0 };
pub(crate) const ONE: c64 = c64 { re: 1.0, im: 0.0 };

/// Outcome of one dense solve, already sorted by the selection criterion.
#[derive(Debug, Clone)]
pub struct ProjectedSolution {
    /// Eigenvalues `θ` of the projected problem in selection order.
    pub eigenvalues: Vec<c64>,
    /// Schur form of `H` (diagonal for Hermitian problems).
    pub s: Mat<c64>,
    /// Triangular factor of `G`, for pencils.
    pub t: Option<Mat<c64>>,
    /// Right Schur vectors (eigenvectors for Hermitian problems).
    pub px: Mat<c64>,
    /// Left Schur vectors, for pencils.
    pub py: Option<Mat<c64>>,
}

impl ProjectedSolution {
    pub fn dim(&self) -> usize {
        self.eigenvalues.len()
    }
}

/// Solves the projected problem `(H, G)` and orders the result by `selection`.
///
/// `g` must be `Some` exactly when `shape.standard` is false.
pub fn solve_projected(
    h: MatRef<'_, c64>,
    g: Option<MatRef<'_, c64>>,
    shape: ProjectedShape,
    selection: &Selection<'_>,
) -> Result<ProjectedSolution, DavidsonError> {
    match (shape.standard, g) {
        (true, _) if shape.hermitian => {
            let mut sol = hermitian::hermitian_eigen(h)?;
            sort::sort_diagonal(&mut sol, selection);
            Ok(sol)
        }
        (true, _) => {
            let mut sol = schur::complex_schur(h)?;
            sort::sort_schur(&mut sol, selection);
            Ok(sol)
        }
        (false, Some(g)) => {
            let mut sol = qz::generalized_schur(h, g)?;
            sort::sort_generalized(&mut sol, selection);
            fix_real_diagonal(&mut sol);
            Ok(sol)
        }
        (false, None) => Err(crate::error::consistency_error(
            "a generalized projected problem was solved without G",
        )),
    }
}

/// Makes the diagonal of `T` real by scaling each column of `S`, `T` and `pX` by a phase.
///
/// Column `i` is multiplied by `conj(t_ii)/|t_ii|`, which leaves `s_ii/t_ii` and the
/// relation `S = pYᴴ H pX` intact.
pub fn fix_real_diagonal(sol: &mut ProjectedSolution) {
    let Some(t) = sol.t.as_mut() else {
        return;
    };
    let n = t.nrows();
    for i in 0..n {
        let d = t[(i, i)];
        if d.im == 0.0 || d.norm() == 0.0 {
            continue;
        }
        let phase = d.conj() / d.norm();
        for j in 0..i {
            t[(j, i)] *= phase;
        }
        for j in 0..=i {
            sol.s[(j, i)] *= phase;
        }
        t[(i, i)] = c64::new(d.norm(), 0.0);
        for j in 0..sol.px.nrows() {
            sol.px[(j, i)] *= phase;
        }
    }
}

/// Eigenvectors of an upper-triangular matrix `S` (or pencil `(S, T)`) by back-substitution.
///
/// Column `k` solves `(t_kk S - s_kk T) z = 0` with `z_k = 1`, normalized to unit length.
pub fn triangular_eigenvectors(s: MatRef<'_, c64>, t: Option<MatRef<'_, c64>>) -> Mat<c64> {
    let n = s.nrows();
    let t_at = |i: usize, j: usize| match t {
        Some(t) => t[(i, j)],
        None if i == j => ONE,
        None => ZERO,
    };
    let scale = (0..n)
        .map(|i| s[(i, i)].norm() + t_at(i, i).norm())
        .fold(0.0_f64, f64::max)
        .max(f64::MIN_POSITIVE);
    let small = f64::EPSILON * scale;

    let mut z = Mat::<c64>::zeros(n, n);
    for k in 0..n {
        let alpha = s[(k, k)];
        let beta = t_at(k, k);
        z[(k, k)] = ONE;
        for i in (0..k).rev() {
            let mut acc = ZERO;
            for j in i + 1..=k {
                acc += (beta * s[(i, j)] - alpha * t_at(i, j)) * z[(j, k)];
            }
            let mut d = beta * s[(i, i)] - alpha * t_at(i, i);
            if d.norm() < small {
                d = c64::new(small, 0.0);
            }
            z[(i, k)] = -acc / d;
        }
        let norm = z.col(k).norm_l2();
        if norm > 0.0 {
            for i in 0..=k {
                z[(i, k)] /= norm;
            }
        }
    }
    z
}

/// A complex plane rotation `[c s; -conj(s) c]` with real `c`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Givens {
    c: f64,
    s: c64,
}

impl Givens {
    /// Rotation `G` with `G [f; g] = [r; 0]`. Returns `(G, r)`.
    pub(crate) fn zeroing(f: c64, g: c64) -> (Self, c64) {
        let g_norm = g.norm();
        let f_norm = f.norm();
        if g_norm == 0.0 {
            return (Self { c: 1.0, s: ZERO }, f);
        }
        if f_norm == 0.0 {
            return (
                Self {
                    c: 0.0,
                    s: g.conj() / g_norm,
                },
                c64::new(g_norm, 0.0),
            );
        }
        let nu = f_norm.hypot(g_norm);
        let phase = f / f_norm;
        (
            Self {
                c: f_norm / nu,
                s: phase * g.conj() / nu,
            },
            phase * nu,
        )
    }

    /// Rows `i`, `j` of `m` over `cols` are replaced by `G [row_i; row_j]`.
    pub(crate) fn rotate_rows(&self, m: &mut Mat<c64>, i: usize, j: usize, cols: Range<usize>) {
        for k in cols {
            let x = m[(i, k)];
            let y = m[(j, k)];
            m[(i, k)] = x * self.c + self.s * y;
            m[(j, k)] = y * self.c - self.s.conj() * x;
        }
    }

    /// Columns `i`, `j` of `m` over `rows` are replaced by `[col_i col_j] Gᴴ`.
    pub(crate) fn rotate_cols_adjoint(
        &self,
        m: &mut Mat<c64>,
        i: usize,
        j: usize,
        rows: Range<usize>,
    ) {
        for k in rows {
            let x = m[(k, i)];
            let y = m[(k, j)];
            m[(k, i)] = x * self.c + y * self.s.conj();
            m[(k, j)] = y * self.c - x * self.s;
        }
    }

    /// Columns `i`, `j` of `m` over `rows` are replaced by `[col_i col_j] G`.
    pub(crate) fn rotate_cols(&self, m: &mut Mat<c64>, i: usize, j: usize, rows: Range<usize>) {
        for k in rows {
            let x = m[(k, i)];
            let y = m[(k, j)];
            m[(k, i)] = x * self.c - y * self.s.conj();
            m[(k, j)] = x * self.s + y * self.c;
        }
    }
}

/// Frobenius norm, used for scale-aware thresholds.
pub(crate) fn frobenius(m: &Mat<c64>) -> f64 {
    m.norm_l2()
}

/// Unit-diagonal identity of size `n`.
pub(crate) fn identity(n: usize) -> Mat<c64> {
    Mat::from_fn(n, n, |i, j| if i == j { ONE } else { ZERO })
}
