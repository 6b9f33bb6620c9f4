//! The projection step (`calcPairs`).
//!
//! Every call works on the basis columns added since the previous call, the "new"
//! range `[new_start, size_v)`:
//!
//! 1. the new columns are orthonormalized against the locked vectors and the retained
//!    basis; dependent columns are dropped, and an expansion that leaves nothing is a
//!    breakdown;
//! 2. a transform left pending by a restart or a lock is applied to `AV`/`BV` and to
//!    the projected matrices, so retained directions never see the operators again;
//! 3. the operators are applied to the new columns only;
//! 4. `H` (and `G`) grow by the blocks involving the new columns, computed through one
//!    batched reduction;
//! 5. the dense problem is solved and sorted, then the residuals of the leading pairs
//!    are formed and deflated.
//!
//! The step ends by checking that `V`, `AV`, `BV` and `H` agree in size.

use super::{
    dashboard::{CalcPairs, DashboardState, Step},
    error_estimate,
    harmonic::Extractor,
    normalize, orthogonalize, read_col_major,
    reduction::{Chunk, ReductionBatch},
    write_col_major,
};
use crate::{
    config::ResolvedConfig,
    dense::{ProjectedSolution, Selection, solve_projected},
    error::{DavidsonError, consistency_error},
};
use faer::{Mat, MatRef, c64};

/// `Rayleigh-Ritz` or harmonic projection, depending on the extractor.
pub struct ProjectionStep {
    extractor: Box<dyn Extractor>,
}

/// One inner-product block `lhsᴴ · rhs` of a projected matrix.
#[derive(Clone, Copy)]
struct Block<'m> {
    lhs: MatRef<'m, c64>,
    rhs: MatRef<'m, c64>,
}

impl Block<'_> {
    fn len(&self) -> usize {
        self.lhs.ncols() * self.rhs.ncols()
    }
}

/// The new blocks of one projected matrix.
struct Extension<'m> {
    /// Rows `0..e` of the new columns.
    col: Block<'m>,
    /// New rows of the old columns; absent when mirrored or when nothing was kept.
    row: Option<Block<'m>>,
}

impl<'m> Extension<'m> {
    /// Blocks of `Wᴴ X` involving the columns from `s` on, for `X` of `e` columns.
    fn new(w: MatRef<'m, c64>, x: MatRef<'m, c64>, s: usize, mirror: bool) -> Self {
        let e = x.ncols();
        Self {
            col: Block {
                lhs: w,
                rhs: x.subcols(s, e - s),
            },
            row: (!mirror && s > 0).then(|| Block {
                lhs: w.subcols(s, e - s),
                rhs: x.subcols(0, s),
            }),
        }
    }

    fn blocks(&self) -> impl Iterator<Item = Block<'m>> + '_ {
        std::iter::once(self.col).chain(self.row)
    }
}

/// Reduced blocks of one projected matrix.
struct Reduced {
    col: Mat<c64>,
    row: Option<Mat<c64>>,
}

impl ProjectionStep {
    pub fn new(extractor: Box<dyn Extractor>) -> Self {
        Self { extractor }
    }

    /// Scalars one extension may need in the batch buffers.
    fn batch_capacity(cfg: &ResolvedConfig) -> usize {
        2 * cfg.ncv * cfg.ncv
    }

    fn orthogonalize_new_columns(state: &mut DashboardState<'_>) {
        let (start, end) = (state.new_start, state.size_v);
        let slot = state.layout.v;
        let mut kept = start;
        for j in start..end {
            let mut col = state.board.cols(slot, j..j + 1).to_owned();
            let outcome = orthogonalize(
                &mut col,
                &[state.converged.vectors(), state.board.cols(slot, 0..kept)],
            );
            if outcome.is_dependent() {
                log::warn!(
                    "Dropping basis column {j}: norm fell from {:.3e} to {:.3e} during orthogonalization",
                    outcome.before,
                    outcome.after
                );
                continue;
            }
            normalize(&mut col);
            state.board.set_cols(slot, kept, col.as_ref());
            kept += 1;
        }
        state.size_v = kept;
        state.new_start = kept;
        if end > start && kept == start {
            log::info!(
                "No direction survived orthogonalization at iteration {}",
                state.iteration
            );
            state.breakdown = true;
        }
    }

    fn apply_pending_transform(state: &mut DashboardState<'_>) -> Result<(), DavidsonError> {
        let Some(mt) = state.mt.take() else {
            return Ok(());
        };
        let (rows, k) = (mt.nrows(), mt.ncols());
        if rows != state.size_av || rows != state.size_h {
            return Err(consistency_error(format!(
                "pending transform has {rows} rows but AV holds {} columns and H has order {}",
                state.size_av, state.size_h
            )));
        }
        state.board.transform_cols(state.layout.av, mt.as_ref())?;
        state.size_av = k;
        if let Some(bv) = state.layout.bv {
            if rows != state.size_bv {
                return Err(consistency_error(format!(
                    "pending transform has {rows} rows but BV holds {} columns",
                    state.size_bv
                )));
            }
            state.board.transform_cols(bv, mt.as_ref())?;
            state.size_bv = k;
        }

        let ld = state.layout.ld;
        for slot in std::iter::once(state.layout.h).chain(state.layout.g) {
            let x = state.board.load(slot, ld, rows, rows);
            let xm = x.as_ref() * mt.as_ref();
            let reduced = mt.as_ref().adjoint() * xm.as_ref();
            state.board.store(slot, ld, reduced.as_ref());
        }
        state.size_h = k;
        Ok(())
    }

    fn extend_images(state: &mut DashboardState<'_>) -> Result<(), DavidsonError> {
        let (from, to) = (state.size_av, state.size_v);
        if from > to {
            return Err(consistency_error(format!(
                "AV holds {from} columns for a basis of {to}"
            )));
        }
        if from == to {
            return Ok(());
        }
        let fresh = state.board.cols(state.layout.v, from..to).to_owned();
        let av = state.apply_a(fresh.as_ref())?;
        state.board.set_cols(state.layout.av, from, av.as_ref());
        state.size_av = to;
        if let Some(slot) = state.layout.bv {
            if let Some(bv) = state.apply_b(fresh.as_ref())? {
                state.board.set_cols(slot, from, bv.as_ref());
                state.size_bv = to;
            }
        }
        Ok(())
    }

    /// Grows `H` (and `G`) from order `size_h` to `size_v`.
    fn extend_projection(&self, state: &mut DashboardState<'_>) -> Result<(), DavidsonError> {
        let (s, e) = (state.size_h, state.size_v);
        if s == e {
            return Ok(());
        }
        let layout = state.layout;
        let collective = state.collective;
        let batched = state.cfg.batch_reductions;
        let reference = state.converged.residual_reference(state.deflation);
        let deflated = reference.is_some_and(|r| r.ncols() > 0);
        let mirror = state.cfg.shape.hermitian && !deflated;
        let capacity = Self::batch_capacity(&state.cfg);

        let (h_new, g_new) = {
            let (pool, input, output) = state.board.split_scratch(capacity)?;
            let v = layout.v.view(pool, 0..e);
            let av = layout.av.view(pool, 0..e);
            let bv = layout.bv.map_or(v, |slot| slot.view(pool, 0..e));

            let mut w = self.extractor.left_basis(v, av, bv);
            if let Some(reference) = reference.filter(|_| deflated) {
                orthogonalize(&mut w, &[reference]);
            }
            let w = w.as_ref();

            let h_ext = Extension::new(w, av, s, mirror);
            let g_ext = layout.g.map(|_| Extension::new(w, bv, s, mirror));

            if batched {
                let extensions: Vec<&Extension<'_>> =
                    std::iter::once(&h_ext).chain(g_ext.as_ref()).collect();
                let mut reduced = reduce(collective, &extensions, input, output)?.into_iter();
                let h_new = reduced.next();
                let g_new = reduced.next();
                (h_new, g_new)
            } else {
                let h_new = reduce(collective, &[&h_ext], &mut *input, &mut *output)?.pop();
                let g_new = match &g_ext {
                    Some(g_ext) => reduce(collective, &[g_ext], input, output)?.pop(),
                    None => None,
                };
                (h_new, g_new)
            }
        };

        let Some(h_new) = h_new else {
            return Err(consistency_error("the H extension produced no reduction"));
        };
        let ld = layout.ld;
        let h = assemble(state.board.load(layout.h, ld, s, s), &h_new, s, e);
        state.board.store(layout.h, ld, h.as_ref());
        if let Some(slot) = layout.g {
            let Some(g_new) = g_new else {
                return Err(consistency_error("the G extension produced no reduction"));
            };
            let g = assemble(state.board.load(slot, ld, s, s), &g_new, s, e);
            state.board.store(slot, ld, g.as_ref());
        }
        state.size_h = e;
        Ok(())
    }

    fn extract(&self, state: &mut DashboardState<'_>) -> Result<ProjectedSolution, DavidsonError> {
        let e = state.size_h;
        let ld = state.layout.ld;
        let h = state.board.load(state.layout.h, ld, e, e);
        let g = state.layout.g.map(|slot| state.board.load(slot, ld, e, e));
        let (hp, gp) = self.extractor.pencil(h.as_ref(), g.as_ref().map(|g| g.as_ref()));

        let back = |theta: c64| self.extractor.eigenvalue(theta);
        let mut selection = Selection::new(state.cfg.which, state.cfg.target);
        if self.extractor.transforms_eigenvalues() {
            selection = selection.with_transform(&back);
        }
        let solution = solve_projected(
            hp.as_ref(),
            gp.as_ref().map(|g| g.as_ref()),
            state.cfg.shape,
            &selection,
        )?;

        let hermitian = state.cfg.problem.is_hermitian();
        state.eigenvalues = solution
            .eigenvalues
            .iter()
            .map(|&theta| {
                let lambda = self.extractor.eigenvalue(theta);
                if hermitian { c64::new(lambda.re, 0.0) } else { lambda }
            })
            .collect();
        Ok(solution)
    }

    /// `R = AV pX - λ BV pX` for the leading pairs, deflated against the reference set.
    fn compute_residuals(
        state: &mut DashboardState<'_>,
        solution: &ProjectedSolution,
    ) -> Result<(), DavidsonError> {
        let e = solution.dim();
        let missing = state.cfg.nev.saturating_sub(state.converged.nconv());
        let nr = e.min(state.cfg.block_size.max(missing));
        let px = solution.px.as_ref().subcols(0, nr);

        let av = state.board.cols(state.layout.av, 0..e);
        let bv = match state.layout.bv {
            Some(slot) => state.board.cols(slot, 0..e),
            None => state.board.cols(state.layout.v, 0..e),
        };
        let mut r = av * px;
        let bx = bv * px;
        for j in 0..nr {
            let lambda = state.eigenvalues[j];
            for i in 0..r.nrows() {
                r[(i, j)] -= lambda * bx[(i, j)];
            }
        }

        let reference = state.converged.residual_reference(state.deflation);
        let mut norms = Vec::with_capacity(nr);
        let mut residuals = Mat::<c64>::zeros(r.nrows(), nr);
        for j in 0..nr {
            let mut col = r.as_ref().subcols(j, 1).to_owned();
            let (norm, dependent) = match reference {
                Some(q) if q.ncols() > 0 => {
                    let outcome = orthogonalize(&mut col, &[q]);
                    (outcome.after, outcome.is_dependent())
                }
                _ => (col.norm_l2(), false),
            };
            if norm < f64::EPSILON || dependent {
                log::info!(
                    "Residual too low for pair {j} at iteration {}: {norm:.3e}",
                    state.iteration
                );
            }
            residuals.as_mut().subcols_mut(j, 1).copy_from(col.as_ref());
            norms.push(norm);
        }

        let slot = state.board.aux_vecs(nr)?;
        state.board.set_cols(slot, 0, residuals.as_ref());
        state.residual_count = nr;
        state.errest = norms
            .iter()
            .zip(&state.eigenvalues)
            .map(|(&rho, &lambda)| error_estimate(lambda, rho))
            .collect();
        state.residual_norms = norms;
        Ok(())
    }

    fn check_consistency(state: &DashboardState<'_>) -> Result<(), DavidsonError> {
        let generalized = state.layout.bv.is_some();
        if state.size_h != state.size_v
            || state.size_av != state.size_v
            || (generalized && state.size_bv != state.size_v)
        {
            return Err(consistency_error(format!(
                "sizes out of sync after projection: V {}, AV {}, BV {}, H {}",
                state.size_v, state.size_av, state.size_bv, state.size_h
            )));
        }
        Ok(())
    }
}

impl Step for ProjectionStep {
    fn declare(&self, cfg: &ResolvedConfig, planner: &mut super::blackboard::Planner) {
        planner.declare_aux_vecs(cfg.ncv.max(cfg.block_size).max(cfg.max_nev));
        planner.declare_aux_scalars(2 * Self::batch_capacity(cfg));
    }
}

impl CalcPairs for ProjectionStep {
    fn calc_pairs(&mut self, state: &mut DashboardState<'_>) -> Result<(), DavidsonError> {
        Self::orthogonalize_new_columns(state);
        if state.breakdown {
            return Ok(());
        }
        Self::apply_pending_transform(state)?;
        if state.reproject {
            state.size_h = 0;
            state.reproject = false;
        }
        Self::extend_images(state)?;
        self.extend_projection(state)?;
        let solution = self.extract(state)?;
        Self::compute_residuals(state, &solution)?;
        state.solution = Some(solution);
        Self::check_consistency(state)
    }
}

/// Reduces the blocks of `extensions` in one batch and reads them back per extension.
fn reduce(
    collective: &dyn super::reduction::Collective,
    extensions: &[&Extension<'_>],
    input: &mut [c64],
    output: &mut [c64],
) -> Result<Vec<Reduced>, DavidsonError> {
    let count = extensions.iter().map(|x| x.blocks().count()).sum();
    let mut batch = ReductionBatch::begin(collective, count, input, output);
    let mut chunks: Vec<(Chunk, Option<Chunk>)> = Vec::with_capacity(extensions.len());
    for ext in extensions {
        let col = ext.col;
        let col_chunk = batch.register(col.len(), move |buf| {
            write_col_major((col.lhs.adjoint() * col.rhs).as_ref(), buf)
        })?;
        let row_chunk = match ext.row {
            Some(row) => Some(batch.register(row.len(), move |buf| {
                write_col_major((row.lhs.adjoint() * row.rhs).as_ref(), buf)
            })?),
            None => None,
        };
        chunks.push((col_chunk, row_chunk));
    }
    let reduced = batch.end();
    Ok(extensions
        .iter()
        .zip(chunks)
        .map(|(ext, (col_chunk, row_chunk))| Reduced {
            col: read_col_major(reduced.chunk(col_chunk), ext.col.lhs.ncols(), ext.col.rhs.ncols()),
            row: ext.row.zip(row_chunk).map(|(row, chunk)| {
                read_col_major(reduced.chunk(chunk), row.lhs.ncols(), row.rhs.ncols())
            }),
        })
        .collect())
}

/// The order-`e` projected matrix from the kept leading block and the reduced extension.
///
/// Without a row block, the new rows of the old columns mirror the new column block.
fn assemble(old: Mat<c64>, new: &Reduced, s: usize, e: usize) -> Mat<c64> {
    Mat::from_fn(e, e, |i, j| match (i < s, j < s) {
        (true, true) => old[(i, j)],
        (_, false) => new.col[(i, j - s)],
        (false, true) => match &new.row {
            Some(row) => row[(i - s, j)],
            None => new.col[(j, i - s)].conj(),
        },
    })
}
