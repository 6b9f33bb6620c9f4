//! Extraction strategies: how approximate eigenpairs are pulled out of the subspace.
//!
//! Every strategy defines a left basis `W` (the test space), so that the projected
//! matrices are `H = Wᴴ A V` and `G = Wᴴ B V` (`B = I` for standard problems). Plain
//! Rayleigh-Ritz uses `W = V`. The harmonic variants use `W = Wa·AV − Wb·BV`, which is
//! never orthonormalized: it is rebuilt from `AV`/`BV` whenever a block of `H` or `G`
//! is formed, and it transforms linearly with `V` under restarts.
//!
//! The dense solver then works on the pencil
//!
//! ```text
//! H' = Pa·H − Pb·G,    G' = Wa·H − Wb·G,
//! ```
//!
//! and a projected eigenvalue `θ` of `(H', G')` maps back to `λ = (Pb − θ·Wb)/(Pa − θ·Wa)`,
//! the Petrov value satisfying `Wᴴ(A − λB)V y = 0`. The back-transform is also installed
//! as the sort key, so candidates are ranked by their approximations to `λ`.

use crate::config::Extraction;
use faer::{Mat, MatRef, c64};

/// A strategy for the test space and the projected pencil.
pub trait Extractor {
    /// Left basis columns corresponding to the basis columns `v` with images `av`, `bv`.
    ///
    /// `bv` is `V` itself for standard problems.
    fn left_basis(&self, v: MatRef<'_, c64>, av: MatRef<'_, c64>, bv: MatRef<'_, c64>) -> Mat<c64>;

    /// The pencil handed to the dense solver.
    fn pencil(&self, h: MatRef<'_, c64>, g: Option<MatRef<'_, c64>>) -> (Mat<c64>, Option<Mat<c64>>);

    /// Maps a projected eigenvalue back to an approximation of an eigenvalue of `(A, B)`.
    fn eigenvalue(&self, theta: c64) -> c64;

    /// Whether [`Extractor::eigenvalue`] is anything but the identity.
    fn transforms_eigenvalues(&self) -> bool;
}

/// Rayleigh-Ritz: the test space is the search space.
#[derive(Debug, Clone, Copy, Default)]
pub struct RayleighRitz;

impl Extractor for RayleighRitz {
    fn left_basis(&self, v: MatRef<'_, c64>, _av: MatRef<'_, c64>, _bv: MatRef<'_, c64>) -> Mat<c64> {
        v.to_owned()
    }

    fn pencil(&self, h: MatRef<'_, c64>, g: Option<MatRef<'_, c64>>) -> (Mat<c64>, Option<Mat<c64>>) {
        (h.to_owned(), g.map(|g| g.to_owned()))
    }

    fn eigenvalue(&self, theta: c64) -> c64 {
        theta
    }

    fn transforms_eigenvalues(&self) -> bool {
        false
    }
}

/// Coefficients of a harmonic extraction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Harmonic {
    pub wa: c64,
    pub wb: c64,
    pub pa: c64,
    pub pb: c64,
}

impl Harmonic {
    /// Coefficients for `extraction` around the finite `target`.
    ///
    /// Returns `None` for the non-harmonic modes, and for the targeted modes when no
    /// target is available.
    pub fn new(extraction: Extraction, target: Option<c64>) -> Option<Self> {
        let one = c64::new(1.0, 0.0);
        let zero = c64::new(0.0, 0.0);
        match (extraction, target) {
            (Extraction::Harmonic, Some(tau)) => Some(Self {
                wa: one,
                wb: tau,
                pa: zero,
                pb: -one,
            }),
            (Extraction::HarmonicRelative, Some(tau)) => Some(Self {
                wa: one,
                wb: tau,
                pa: one,
                pb: zero,
            }),
            (Extraction::HarmonicRight, Some(tau)) => Some(Self {
                wa: one,
                wb: tau,
                pa: one,
                pb: -tau.conj(),
            }),
            (Extraction::HarmonicLargest, _) => Some(Self {
                wa: zero,
                wb: one,
                pa: one,
                pb: zero,
            }),
            _ => None,
        }
    }
}

impl Extractor for Harmonic {
    fn left_basis(&self, _v: MatRef<'_, c64>, av: MatRef<'_, c64>, bv: MatRef<'_, c64>) -> Mat<c64> {
        Mat::from_fn(av.nrows(), av.ncols(), |i, j| {
            self.wa * av[(i, j)] - self.wb * bv[(i, j)]
        })
    }

    fn pencil(&self, h: MatRef<'_, c64>, g: Option<MatRef<'_, c64>>) -> (Mat<c64>, Option<Mat<c64>>) {
        let n = h.nrows();
        let g_at = |i: usize, j: usize| match g {
            Some(g) => g[(i, j)],
            None if i == j => c64::new(1.0, 0.0),
            None => c64::new(0.0, 0.0),
        };
        let hp = Mat::from_fn(n, n, |i, j| self.pa * h[(i, j)] - self.pb * g_at(i, j));
        let gp = Mat::from_fn(n, n, |i, j| self.wa * h[(i, j)] - self.wb * g_at(i, j));
        (hp, Some(gp))
    }

    fn eigenvalue(&self, theta: c64) -> c64 {
        let den = self.pa - theta * self.wa;
        if den == c64::new(0.0, 0.0) {
            return c64::new(f64::INFINITY, 0.0);
        }
        (self.pb - theta * self.wb) / den
    }

    fn transforms_eigenvalues(&self) -> bool {
        true
    }
}
