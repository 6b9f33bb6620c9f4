//! Ordering of projected eigenpairs by the selection criterion.
//!
//! Diagonal (Hermitian) solutions are permuted directly. Triangular solutions are
//! reordered by adjacent unitary swaps so that the Schur vectors stay consistent with
//! the new diagonal.

use super::{ProjectedSolution, qz, schur};
use crate::config::Which;
use faer::c64;
use std::cmp::Ordering;

/// A selection criterion together with its target and an optional value transform.
///
/// When a transform is installed (harmonic extraction installs its back-transform),
/// candidates are compared by their transformed values.
#[derive(Clone, Copy)]
pub struct Selection<'a> {
    pub which: Which,
    pub target: c64,
    pub transform: Option<&'a dyn Fn(c64) -> c64>,
}

impl std::fmt::Debug for Selection<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selection")
            .field("which", &self.which)
            .field("target", &self.target)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

impl<'a> Selection<'a> {
    pub fn new(which: Which, target: c64) -> Self {
        Self {
            which,
            target,
            transform: None,
        }
    }

    pub fn with_transform(mut self, transform: &'a dyn Fn(c64) -> c64) -> Self {
        self.transform = Some(transform);
        self
    }

    fn key(&self, value: c64) -> c64 {
        match self.transform {
            Some(f) => f(value),
            None => value,
        }
    }

    /// `Less` when `a` is preferred over `b`.
    pub fn compare(&self, a: c64, b: c64) -> Ordering {
        compare_eigenvalues(self.which, self.target, self.key(a), self.key(b))
    }
}

/// Criterion ordering on raw values: `Less` when `a` should come before `b`.
pub fn compare_eigenvalues(which: Which, target: c64, a: c64, b: c64) -> Ordering {
    match which {
        Which::LargestMagnitude => b.norm().total_cmp(&a.norm()),
        Which::SmallestMagnitude => a.norm().total_cmp(&b.norm()),
        Which::LargestReal => b.re.total_cmp(&a.re),
        Which::SmallestReal => a.re.total_cmp(&b.re),
        Which::LargestImaginary => b.im.total_cmp(&a.im),
        Which::SmallestImaginary => a.im.total_cmp(&b.im),
        Which::TargetMagnitude => (a - target).norm().total_cmp(&(b - target).norm()),
        Which::TargetReal => (a.re - target.re).abs().total_cmp(&(b.re - target.re).abs()),
        Which::TargetImaginary => (a.im - target.im).abs().total_cmp(&(b.im - target.im).abs()),
    }
}

/// Index of the preferred value among `values[from..]`; ties keep the lowest index.
fn best_from(values: &[c64], from: usize, selection: &Selection<'_>) -> usize {
    let mut best = from;
    for i in from + 1..values.len() {
        if selection.compare(values[i], values[best]) == Ordering::Less {
            best = i;
        }
    }
    best
}

/// Stable permutation of a diagonal solution.
pub fn sort_diagonal(sol: &mut ProjectedSolution, selection: &Selection<'_>) {
    let n = sol.dim();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| selection.compare(sol.eigenvalues[i], sol.eigenvalues[j]));

    let eigenvalues: Vec<c64> = order.iter().map(|&i| sol.eigenvalues[i]).collect();
    let px = faer::Mat::from_fn(sol.px.nrows(), n, |r, c| sol.px[(r, order[c])]);
    for (i, &value) in eigenvalues.iter().enumerate() {
        sol.s[(i, i)] = value;
    }
    sol.eigenvalues = eigenvalues;
    sol.px = px;
}

/// Reorders a standard Schur form so that preferred eigenvalues lead the diagonal.
pub fn sort_schur(sol: &mut ProjectedSolution, selection: &Selection<'_>) {
    let n = sol.dim();
    for pos in 0..n {
        let best = best_from(&sol.eigenvalues, pos, selection);
        for k in (pos..best).rev() {
            schur::swap_adjacent(&mut sol.s, &mut sol.px, k);
            sol.eigenvalues.swap(k, k + 1);
        }
    }
    for i in 0..n {
        sol.eigenvalues[i] = sol.s[(i, i)];
    }
}

/// Reorders a generalized Schur form so that preferred eigenvalues lead the diagonal.
pub fn sort_generalized(sol: &mut ProjectedSolution, selection: &Selection<'_>) {
    let n = sol.dim();
    if sol.t.is_none() || sol.py.is_none() {
        sort_schur(sol, selection);
        return;
    }
    let (Some(t), Some(py)) = (sol.t.as_mut(), sol.py.as_mut()) else {
        return;
    };
    for pos in 0..n {
        let best = best_from(&sol.eigenvalues, pos, selection);
        for k in (pos..best).rev() {
            qz::swap_adjacent(&mut sol.s, t, py, &mut sol.px, k);
            sol.eigenvalues.swap(k, k + 1);
        }
    }
    for i in 0..n {
        sol.eigenvalues[i] = qz::ratio(sol.s[(i, i)], t[(i, i)]);
    }
}
