//! Generalized Schur (QZ) decomposition of a projected pencil `(H, G)`.
//!
//! Produces `H = pY S pXᴴ`, `G = pY T pXᴴ` with `S`, `T` upper triangular and `pX`, `pY`
//! unitary. `G` is first triangularized, then the pair is brought to
//! Hessenberg-triangular form and single-shift QZ sweeps finish the job.

use super::{Givens, ProjectedSolution, ZERO, frobenius, identity};
use crate::dense::schur::wilkinson_shift;
use crate::error::{DavidsonError, DavidsonErrorKind};
use faer::{Mat, MatRef, c64};

const SWEEPS_PER_EIGENVALUE: usize = 30;

/// Computes the generalized Schur form of the pencil `(h, g)`.
///
/// Eigenvalues are `s_ii / t_ii`; a vanishing `t_ii` yields an infinite eigenvalue.
pub fn generalized_schur(
    h: MatRef<'_, c64>,
    g: MatRef<'_, c64>,
) -> Result<ProjectedSolution, DavidsonError> {
    let n = h.nrows();
    if g.nrows() != n || g.ncols() != n || h.ncols() != n {
        return Err(DavidsonErrorKind::DimensionMismatch {
            context: "generalized Schur",
            expected: n,
            actual: g.nrows(),
        }
        .into());
    }

    let mut s = h.to_owned();
    let mut t = g.to_owned();
    let mut q = identity(n);
    let mut z = identity(n);

    hessenberg_triangular(&mut s, &mut t, &mut q, &mut z);
    qz_iteration(&mut s, &mut t, &mut q, &mut z)?;

    let eigenvalues = (0..n).map(|i| ratio(s[(i, i)], t[(i, i)])).collect();
    Ok(ProjectedSolution {
        eigenvalues,
        s,
        t: Some(t),
        px: z,
        py: Some(q),
    })
}

/// `alpha / beta`, infinite when `beta` vanishes.
pub(crate) fn ratio(alpha: c64, beta: c64) -> c64 {
    if beta == ZERO {
        c64::new(f64::INFINITY, 0.0)
    } else {
        alpha / beta
    }
}

/// Reduces `(s, t)` to Hessenberg-triangular form.
///
/// Left rotations are accumulated as `q <- q Gᴴ`, right rotations as `z <- z R`.
pub(crate) fn hessenberg_triangular(
    s: &mut Mat<c64>,
    t: &mut Mat<c64>,
    q: &mut Mat<c64>,
    z: &mut Mat<c64>,
) {
    let n = s.nrows();

    for j in 0..n {
        for i in (j + 1..n).rev() {
            if t[(i, j)] == ZERO {
                continue;
            }
            let (rot, _) = Givens::zeroing(t[(i - 1, j)], t[(i, j)]);
            rot.rotate_rows(t, i - 1, i, j..n);
            rot.rotate_rows(s, i - 1, i, 0..n);
            rot.rotate_cols_adjoint(q, i - 1, i, 0..q.nrows());
            t[(i, j)] = ZERO;
        }
    }

    for j in 0..n.saturating_sub(2) {
        for i in (j + 2..n).rev() {
            if s[(i, j)] == ZERO {
                continue;
            }
            let (left, _) = Givens::zeroing(s[(i - 1, j)], s[(i, j)]);
            left.rotate_rows(s, i - 1, i, j..n);
            left.rotate_rows(t, i - 1, i, i - 1..n);
            left.rotate_cols_adjoint(q, i - 1, i, 0..q.nrows());
            s[(i, j)] = ZERO;

            let (right, _) = Givens::zeroing(t[(i, i)], t[(i, i - 1)]);
            right.rotate_cols(s, i - 1, i, 0..n);
            right.rotate_cols(t, i - 1, i, 0..i + 1);
            right.rotate_cols(z, i - 1, i, 0..z.nrows());
            t[(i, i - 1)] = ZERO;
        }
    }
}

fn qz_iteration(
    s: &mut Mat<c64>,
    t: &mut Mat<c64>,
    q: &mut Mat<c64>,
    z: &mut Mat<c64>,
) -> Result<(), DavidsonError> {
    let n = s.nrows();
    if n < 2 {
        return Ok(());
    }
    let eps = f64::EPSILON;
    let s_norm = frobenius(s);
    let t_norm = frobenius(t).max(f64::MIN_POSITIVE);
    let floor = f64::MIN_POSITIVE * (n as f64 / eps) + eps * s_norm * 1e-3;
    let max_sweeps = SWEEPS_PER_EIGENVALUE * n;

    let mut hi = n - 1;
    let mut its = 0usize;
    let mut total = 0usize;
    while hi > 0 {
        let mut l = hi;
        while l > 0 {
            let sub = s[(l, l - 1)].norm();
            let diag = s[(l - 1, l - 1)].norm() + s[(l, l)].norm();
            if sub <= (eps * diag).max(floor) {
                s[(l, l - 1)] = ZERO;
                break;
            }
            l -= 1;
        }
        if l == hi {
            hi -= 1;
            its = 0;
            continue;
        }

        its += 1;
        total += 1;
        if total > max_sweeps {
            return Err(DavidsonErrorKind::NoConvergence {
                routine: "QZ",
                iterations: total,
            }
            .into());
        }

        // Singular T in the active block would stall the shift.
        for i in l..=hi {
            if t[(i, i)].norm() < eps * t_norm {
                t[(i, i)] = c64::new(eps * t_norm, 0.0);
            }
        }

        let mu = if its % 10 == 0 {
            ratio(s[(hi, hi)], t[(hi, hi)])
                + c64::new(1.5 * (s[(hi, hi - 1)] / t[(hi - 1, hi - 1)]).norm(), 0.0)
        } else {
            trailing_shift(s, t, hi)
        };

        let mut x = s[(l, l)] / t[(l, l)] - mu;
        let mut y = s[(l + 1, l)] / t[(l, l)];
        for k in l..hi {
            if k > l {
                x = s[(k, k - 1)];
                y = s[(k + 1, k - 1)];
            }
            let (left, _) = Givens::zeroing(x, y);
            let first_col = if k > l { k - 1 } else { l };
            left.rotate_rows(s, k, k + 1, first_col..n);
            left.rotate_rows(t, k, k + 1, k..n);
            left.rotate_cols_adjoint(q, k, k + 1, 0..q.nrows());
            if k > l {
                s[(k + 1, k - 1)] = ZERO;
            }

            let (right, _) = Givens::zeroing(t[(k + 1, k + 1)], t[(k + 1, k)]);
            right.rotate_cols(s, k, k + 1, 0..(k + 2).min(hi) + 1);
            right.rotate_cols(t, k, k + 1, 0..k + 2);
            right.rotate_cols(z, k, k + 1, 0..z.nrows());
            t[(k + 1, k)] = ZERO;
        }
    }

    for j in 0..n {
        for i in j + 1..n {
            s[(i, j)] = ZERO;
            t[(i, j)] = ZERO;
        }
    }
    Ok(())
}

/// Shift from the trailing 2x2 block of `S T⁻¹`.
fn trailing_shift(s: &Mat<c64>, t: &Mat<c64>, hi: usize) -> c64 {
    let k = hi - 1;
    let (t11, t12, t22) = (t[(k, k)], t[(k, hi)], t[(hi, hi)]);
    let (s11, s12, s21, s22) = (s[(k, k)], s[(k, hi)], s[(hi, k)], s[(hi, hi)]);
    let t11t22 = t11 * t22;
    let m11 = s11 / t11;
    let m12 = s12 / t22 - s11 * t12 / t11t22;
    let m21 = s21 / t11;
    let m22 = s22 / t22 - s21 * t12 / t11t22;
    wilkinson_shift(m11, m12, m21, m22)
}

/// Swaps the adjacent generalized eigenvalues at positions `k` and `k + 1`.
pub(crate) fn swap_adjacent(
    s: &mut Mat<c64>,
    t: &mut Mat<c64>,
    q: &mut Mat<c64>,
    z: &mut Mat<c64>,
    k: usize,
) {
    let n = s.nrows();
    let (s11, s12, s22) = (s[(k, k)], s[(k, k + 1)], s[(k + 1, k + 1)]);
    let (t11, t12, t22) = (t[(k, k)], t[(k, k + 1)], t[(k + 1, k + 1)]);

    // Right eigenvector of the lower eigenvalue, rotated onto the first column.
    let x1 = s22 * t12 - t22 * s12;
    let x2 = t22 * s11 - s22 * t11;
    let (right, _) = Givens::zeroing(x1, x2);
    right.rotate_cols_adjoint(s, k, k + 1, 0..k + 2);
    right.rotate_cols_adjoint(t, k, k + 1, 0..k + 2);
    right.rotate_cols_adjoint(z, k, k + 1, 0..z.nrows());

    let (left, _) = if s22.norm() >= t22.norm() {
        Givens::zeroing(s[(k, k)], s[(k + 1, k)])
    } else {
        Givens::zeroing(t[(k, k)], t[(k + 1, k)])
    };
    left.rotate_rows(s, k, k + 1, k..n);
    left.rotate_rows(t, k, k + 1, k..n);
    left.rotate_cols_adjoint(q, k, k + 1, 0..q.nrows());
    s[(k + 1, k)] = ZERO;
    t[(k + 1, k)] = ZERO;
}
