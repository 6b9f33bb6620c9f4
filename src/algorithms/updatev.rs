//! Subspace update (`updateV`): locking, thick restart and expansion.
//!
//! After a projection, exactly one of three things happens to the basis:
//!
//! - **Lock.** The leading run of pairs whose error estimate is below `tol` (at most
//!   the number still missing) leaves the basis and enters the
//!   [`ConvergedSubspace`](super::dashboard::ConvergedSubspace). The basis is rotated
//!   onto the remaining Ritz (or Schur) vectors.
//! - **Restart.** If one more block would overflow `ncv`, the basis is compressed to
//!   the first `minv` Ritz vectors plus up to `plusk` Ritz vectors of the previous
//!   iteration.
//! - **Expansion.** Otherwise up to `block_size` new directions are appended, produced
//!   by an [`Expansion`] policy.
//!
//! Lock and restart only rotate `V`; the same rotation is left pending for `AV`, `BV`,
//! `H` and `G`, so no operator is applied to retained directions.

use super::{
    dashboard::{DashboardState, ResidualDeflation, Step, UpdateV},
    orthonormal_columns,
};
use crate::{
    config::ResolvedConfig,
    correction::CorrectionSolver,
    dense::{ProjectedSolution, ZERO},
    error::{DavidsonError, consistency_error},
};
use faer::{Mat, c64};

/// Produces new basis directions from the current pairs.
pub trait Expansion {
    /// Up to `count` directions as the columns of an `n x k` matrix, `k <= count`.
    fn directions(
        &mut self,
        state: &mut DashboardState<'_>,
        count: usize,
    ) -> Result<Mat<c64>, DavidsonError>;
}

/// Generalized Davidson: approximate solutions of the correction equation.
pub struct CorrectionExpansion<'a> {
    solver: &'a mut dyn CorrectionSolver,
}

impl<'a> CorrectionExpansion<'a> {
    pub fn new(solver: &'a mut dyn CorrectionSolver) -> Self {
        Self { solver }
    }

    /// The target while a pair is still far from converged, its own value afterwards.
    fn shift(state: &DashboardState<'_>, j: usize) -> c64 {
        let cfg = &state.cfg;
        if state.errest[j] < cfg.fix || !cfg.which.uses_target() {
            state.eigenvalues[j]
        } else {
            cfg.target
        }
    }
}

impl Expansion for CorrectionExpansion<'_> {
    fn directions(
        &mut self,
        state: &mut DashboardState<'_>,
        count: usize,
    ) -> Result<Mat<c64>, DavidsonError> {
        let nr = state.residual_count;
        let tol = state.cfg.tol;
        let unconverged = (0..nr).filter(|&j| state.errest[j] >= tol);
        let converged = (0..nr).filter(|&j| state.errest[j] < tol);
        let picks: Vec<usize> = unconverged.chain(converged).take(count).collect();

        let residuals = state.residuals().to_owned();
        let n = residuals.nrows();
        let mut out = Mat::<c64>::zeros(n, picks.len());
        for (col, &j) in picks.iter().enumerate() {
            let r = residuals.as_ref().subcols(j, 1);
            let shift = Self::shift(state, j);
            let d = match self.solver.solve(shift, r) {
                Ok(d) if d.nrows() == n && d.ncols() == 1 => d,
                Ok(d) => {
                    log::warn!(
                        "Correction solver returned a {}x{} block for pair {j}, expanding with the residual",
                        d.nrows(),
                        d.ncols()
                    );
                    r.to_owned()
                }
                Err(err) => {
                    log::warn!(
                        "Correction solver failed for pair {j} (shift {shift}): {err:#}, expanding with the residual"
                    );
                    r.to_owned()
                }
            };
            out.as_mut().subcols_mut(col, 1).copy_from(d.as_ref());
        }
        Ok(out)
    }
}

/// Appends `A` applied to the newest basis vectors.
#[derive(Debug, Default)]
pub struct KrylovExpansion;

impl Expansion for KrylovExpansion {
    fn directions(
        &mut self,
        state: &mut DashboardState<'_>,
        count: usize,
    ) -> Result<Mat<c64>, DavidsonError> {
        let size_v = state.size_v;
        let k = count.min(size_v);
        let last = state.board.cols(state.layout.v, size_v - k..size_v).to_owned();
        state.apply_a(last.as_ref())
    }
}

/// Lock, restart or expand, in that order of priority.
pub struct UpdateStep<'a> {
    expansion: Box<dyn Expansion + 'a>,
}

impl<'a> UpdateStep<'a> {
    pub fn new(expansion: Box<dyn Expansion + 'a>) -> Self {
        Self { expansion }
    }

    fn lock(state: &mut DashboardState<'_>, solution: &ProjectedSolution) -> Result<bool, DavidsonError> {
        let missing = state.cfg.nev.saturating_sub(state.converged.nconv());
        let np = state
            .errest
            .iter()
            .take_while(|&&e| e < state.cfg.tol)
            .count()
            .min(missing);
        if np == 0 {
            return Ok(false);
        }

        let e = solution.dim();
        let layout = state.layout;
        let leading = solution.px.as_ref().subcols(0, np);
        let x = state.board.cols(layout.v, 0..e) * leading;
        let ax = state.board.cols(layout.av, 0..e) * leading;
        let bx = layout.bv.map(|slot| state.board.cols(slot, 0..e) * leading);
        for j in 0..np {
            state.converged.push(
                state.errest[j],
                x.as_ref().subcols(j, 1),
                ax.as_ref().subcols(j, 1),
                bx.as_ref().map(|bx| bx.as_ref().subcols(j, 1)),
            )?;
        }

        let rest = solution.px.as_ref().subcols(np, e - np).to_owned();
        state.board.transform_cols(layout.v, rest.as_ref())?;
        state.size_v = e - np;
        state.new_start = e - np;
        state.mt = Some(rest);
        state.reproject = state.deflation != ResidualDeflation::None;
        state.prev_px = None;
        state.residual_count = 0;

        let locked = &state.converged.eigenvalues()[state.converged.nconv() - np..];
        log::info!(
            "Locked {np} pair(s) at iteration {}: {locked:?}, {}/{} converged",
            state.iteration,
            state.converged.nconv(),
            state.cfg.nev
        );
        Ok(true)
    }

    fn restart(state: &mut DashboardState<'_>, solution: &ProjectedSolution) -> Result<(), DavidsonError> {
        let e = solution.dim();
        let minv = state.cfg.restart_min.min(e);
        let prev = state.prev_px.take().filter(|p| p.nrows() <= e);
        let plusk = prev
            .as_ref()
            .map_or(0, |p| state.cfg.restart_plusk.min(p.ncols()));

        let px = &solution.px;
        let coeffs = Mat::from_fn(e, minv + plusk, |i, j| match &prev {
            _ if j < minv => px[(i, j)],
            Some(p) if i < p.nrows() => p[(i, j - minv)],
            _ => ZERO,
        });
        let mt = orthonormal_columns(coeffs.as_ref());
        let k = mt.ncols();
        state.board.transform_cols(state.layout.v, mt.as_ref())?;
        state.size_v = k;
        state.new_start = k;
        state.mt = Some(mt);
        state.residual_count = 0;
        log::info!(
            "Restart at iteration {}: basis {e} -> {k} ({minv} current, {} previous)",
            state.iteration,
            k - minv.min(k)
        );
        Ok(())
    }

    fn expand(
        &mut self,
        state: &mut DashboardState<'_>,
        solution: &ProjectedSolution,
    ) -> Result<(), DavidsonError> {
        let count = state.cfg.block_size.min(state.cfg.ncv - state.size_v);
        let directions = self.expansion.directions(state, count)?;
        let m = directions.ncols().min(count);
        if directions.nrows() != state.dim() {
            return Err(consistency_error(format!(
                "expansion produced vectors of length {} for a problem of dimension {}",
                directions.nrows(),
                state.dim()
            )));
        }
        let size_v = state.size_v;
        state
            .board
            .set_cols(state.layout.v, size_v, directions.as_ref().subcols(0, m));
        state.new_start = size_v;
        state.size_v = size_v + m;

        let e = solution.dim();
        let keep = state.cfg.restart_plusk.min(e);
        state.prev_px = (keep > 0).then(|| solution.px.as_ref().subcols(0, keep).to_owned());
        Ok(())
    }
}

impl Step for UpdateStep<'_> {
    fn declare(&self, cfg: &ResolvedConfig, planner: &mut super::blackboard::Planner) {
        planner.declare_aux_vecs(cfg.ncv);
    }
}

impl UpdateV for UpdateStep<'_> {
    fn update(&mut self, state: &mut DashboardState<'_>) -> Result<(), DavidsonError> {
        let Some(solution) = state.solution.take() else {
            return Err(consistency_error("the subspace was updated before any projection"));
        };
        if solution.dim() != state.size_v {
            return Err(consistency_error(format!(
                "projected solution of order {} for a basis of {} columns",
                solution.dim(),
                state.size_v
            )));
        }
        let outcome = if Self::lock(state, &solution)? {
            Ok(())
        } else if state.size_v + state.cfg.block_size > state.cfg.ncv {
            Self::restart(state, &solution)
        } else {
            self.expand(state, &solution)
        };
        state.solution = Some(solution);
        outcome
    }
}
