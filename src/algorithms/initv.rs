//! Starting subspaces (`initV`).
//!
//! Both variants write their vectors at the front of `V` and mark all of them as new,
//! so orthonormalization and projection happen in the next `calcPairs`. They run
//! whenever the basis is empty, which includes the case where every basis vector was
//! just locked.

use super::dashboard::{DashboardState, InitV, Step};
use crate::error::{DavidsonError, DavidsonErrorKind};
use faer::{Mat, MatRef, c64};
use rand::Rng;

/// Caller-provided columns first, then random vectors up to `initial_size`.
pub struct ClassicInit<'a> {
    initial: Option<MatRef<'a, c64>>,
}

impl<'a> ClassicInit<'a> {
    pub fn new(initial: Option<MatRef<'a, c64>>) -> Self {
        Self { initial }
    }
}

impl Step for ClassicInit<'_> {}

impl InitV for ClassicInit<'_> {
    fn init(&mut self, state: &mut DashboardState<'_>) -> Result<(), DavidsonError> {
        let n = state.dim();
        let k = state.cfg.initial_size;
        let mut start = Mat::<c64>::zeros(n, k);

        // User vectors are only used by the first initialization.
        let provided = match self.initial.take() {
            Some(initial) => {
                check_rows(initial, n)?;
                let used = initial.ncols().min(k);
                start
                    .as_mut()
                    .subcols_mut(0, used)
                    .copy_from(initial.subcols(0, used));
                used
            }
            None => 0,
        };
        for j in provided..k {
            for i in 0..n {
                start[(i, j)] = c64::new(state.rng.random::<f64>() - 0.5, 0.0);
            }
        }
        log::debug!("initV: {provided} provided and {} random vectors", k - provided);
        install(state, start);
        Ok(())
    }
}

/// A Krylov sequence `v, Av, A²v, …` of length `initial_size`, each vector normalized.
pub struct KrylovInit<'a> {
    initial: Option<MatRef<'a, c64>>,
}

impl<'a> KrylovInit<'a> {
    pub fn new(initial: Option<MatRef<'a, c64>>) -> Self {
        Self { initial }
    }
}

impl Step for KrylovInit<'_> {}

impl InitV for KrylovInit<'_> {
    fn init(&mut self, state: &mut DashboardState<'_>) -> Result<(), DavidsonError> {
        let n = state.dim();
        let k = state.cfg.initial_size;
        let mut v = match self.initial.take() {
            Some(initial) if initial.ncols() > 0 => {
                check_rows(initial, n)?;
                initial.subcols(0, 1).to_owned()
            }
            _ => {
                let mut v = Mat::<c64>::zeros(n, 1);
                for i in 0..n {
                    v[(i, 0)] = c64::new(state.rng.random::<f64>() - 0.5, 0.0);
                }
                v
            }
        };

        let mut start = Mat::<c64>::zeros(n, k);
        for j in 0..k {
            let norm = v.norm_l2();
            if norm == 0.0 {
                // An invariant subspace was hit: the remaining columns stay zero and are
                // dropped by the next orthonormalization.
                break;
            }
            for i in 0..n {
                start[(i, j)] = v[(i, 0)] / norm;
            }
            if j + 1 < k {
                v = state.apply_a(start.as_ref().subcols(j, 1))?;
            }
        }
        log::debug!("initV: Krylov sequence of {k} vectors");
        install(state, start);
        Ok(())
    }
}

fn check_rows(initial: MatRef<'_, c64>, n: usize) -> Result<(), DavidsonError> {
    if initial.nrows() != n {
        return Err(DavidsonErrorKind::DimensionMismatch {
            context: "initial vectors",
            expected: n,
            actual: initial.nrows(),
        }
        .into());
    }
    Ok(())
}

/// Writes `start` at the front of `V` and marks every column as new.
fn install(state: &mut DashboardState<'_>, start: Mat<c64>) {
    let k = start.ncols();
    state.board.set_cols(state.layout.v, 0, start.as_ref());
    state.size_v = k;
    state.new_start = 0;
    state.prev_px = None;
    if state.size_av != 0 || state.size_h != 0 {
        log::debug!("initV discards stale images of {} columns", state.size_av);
    }
    state.size_av = 0;
    state.size_bv = 0;
    state.size_h = 0;
    state.mt = None;
    state.reproject = false;
}
