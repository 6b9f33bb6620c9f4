//! Complex Schur decomposition of a standard (non-Hermitian) projected matrix.
//!
//! `H = pX S pXᴴ` with `S` upper triangular and `pX` unitary. The reduction runs in two
//! stages: Givens rotations bring `H` to upper Hessenberg form, then implicit
//! single-shift QR sweeps with Wilkinson shifts drive the subdiagonal to zero. Every
//! rotation is accumulated into `pX`.

use super::{Givens, ProjectedSolution, ZERO, frobenius, identity};
use crate::error::{DavidsonError, DavidsonErrorKind};
use faer::{Mat, MatRef, c64};

/// Sweeps allowed per eigenvalue before giving up.
const SWEEPS_PER_EIGENVALUE: usize = 30;

/// Computes the complex Schur form of `h`.
pub fn complex_schur(h: MatRef<'_, c64>) -> Result<ProjectedSolution, DavidsonError> {
    let n = h.nrows();
    let mut s = h.to_owned();
    let mut q = identity(n);

    hessenberg(&mut s, &mut q);
    schur_from_hessenberg(&mut s, &mut q)?;

    let eigenvalues = (0..n).map(|i| s[(i, i)]).collect();
    Ok(ProjectedSolution {
        eigenvalues,
        s,
        t: None,
        px: q,
        py: None,
    })
}

/// Reduces `a` to upper Hessenberg form in place; rotations are accumulated into `q`.
pub(crate) fn hessenberg(a: &mut Mat<c64>, q: &mut Mat<c64>) {
    let n = a.nrows();
    for j in 0..n.saturating_sub(2) {
        for i in (j + 2..n).rev() {
            if a[(i, j)] == ZERO {
                continue;
            }
            let (rot, _) = Givens::zeroing(a[(i - 1, j)], a[(i, j)]);
            rot.rotate_rows(a, i - 1, i, j..n);
            rot.rotate_cols_adjoint(a, i - 1, i, 0..n);
            rot.rotate_cols_adjoint(q, i - 1, i, 0..q.nrows());
            a[(i, j)] = ZERO;
        }
    }
}

/// Eigenvalue of the 2x2 block `[a b; c d]` closest to `d`.
pub(crate) fn wilkinson_shift(a: c64, b: c64, c: c64, d: c64) -> c64 {
    let mean = (a + d) * 0.5;
    let half_gap = (a - d) * 0.5;
    let disc = (half_gap * half_gap + b * c).sqrt();
    let mu1 = mean + disc;
    let mu2 = mean - disc;
    if (mu1 - d).norm() <= (mu2 - d).norm() {
        mu1
    } else {
        mu2
    }
}

/// Drives an upper Hessenberg `h` to upper triangular form with shifted QR sweeps.
pub(crate) fn schur_from_hessenberg(h: &mut Mat<c64>, q: &mut Mat<c64>) -> Result<(), DavidsonError> {
    let n = h.nrows();
    if n < 2 {
        return Ok(());
    }
    let eps = f64::EPSILON;
    let floor = f64::MIN_POSITIVE * (n as f64 / eps) + eps * frobenius(h) * 1e-3;
    let max_sweeps = SWEEPS_PER_EIGENVALUE * n;

    let mut hi = n - 1;
    let mut its = 0usize;
    let mut total = 0usize;
    while hi > 0 {
        // Find the top of the active unreduced block.
        let mut l = hi;
        while l > 0 {
            let sub = h[(l, l - 1)].norm();
            let diag = h[(l - 1, l - 1)].norm() + h[(l, l)].norm();
            if sub <= (eps * diag).max(floor) {
                h[(l, l - 1)] = ZERO;
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
                routine: "complex Schur",
                iterations: total,
            }
            .into());
        }

        let mu = if its % 10 == 0 {
            // Exceptional shift to break cycles.
            h[(hi, hi)] + c64::new(1.5 * h[(hi, hi - 1)].norm(), 0.0)
        } else {
            wilkinson_shift(
                h[(hi - 1, hi - 1)],
                h[(hi - 1, hi)],
                h[(hi, hi - 1)],
                h[(hi, hi)],
            )
        };

        let mut x = h[(l, l)] - mu;
        let mut y = h[(l + 1, l)];
        for k in l..hi {
            if k > l {
                x = h[(k, k - 1)];
                y = h[(k + 1, k - 1)];
            }
            let (rot, _) = Givens::zeroing(x, y);
            let first_col = if k > l { k - 1 } else { l };
            rot.rotate_rows(h, k, k + 1, first_col..n);
            let last_row = (k + 2).min(hi);
            rot.rotate_cols_adjoint(h, k, k + 1, 0..last_row + 1);
            rot.rotate_cols_adjoint(q, k, k + 1, 0..q.nrows());
            if k > l {
                h[(k + 1, k - 1)] = ZERO;
            }
        }
    }

    // Clean the strictly lower part.
    for j in 0..n {
        for i in j + 1..n {
            h[(i, j)] = ZERO;
        }
    }
    Ok(())
}

/// Swaps the adjacent diagonal entries `k` and `k + 1` of an upper triangular `t`.
///
/// `t <- G t Gᴴ` and `q <- q Gᴴ`, where `G` maps the eigenvector of `t[k+1, k+1]` onto
/// the first position of the 2x2 block.
pub(crate) fn swap_adjacent(t: &mut Mat<c64>, q: &mut Mat<c64>, k: usize) {
    let n = t.nrows();
    let a = t[(k, k)];
    let b = t[(k + 1, k + 1)];
    let (rot, _) = Givens::zeroing(t[(k, k + 1)], b - a);
    rot.rotate_rows(t, k, k + 1, k..n);
    rot.rotate_cols_adjoint(t, k, k + 1, 0..k + 2);
    rot.rotate_cols_adjoint(q, k, k + 1, 0..q.nrows());
    t[(k + 1, k)] = ZERO;
}
