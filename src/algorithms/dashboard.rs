//! The Dashboard: state of one solve and the pipeline that advances it.
//!
//! The state ([`DashboardState`]) owns everything that lives for the duration of a
//! solve: the storage handed out by the [`Blackboard`], the sizes of the basis `V`, of
//! the operator-applied bases `AV`/`BV` and of the projected matrices `H`/`G`, the last
//! projected solution, and the [`ConvergedSubspace`] of locked pairs.
//!
//! The behavior lives in the [`Pipeline`]: one [`InitV`], one [`CalcPairs`] and one
//! [`UpdateV`] implementation plus start/end hooks, all chosen once by
//! [`Pipeline::for_config`]. The driver calls them in a fixed order and never looks at
//! the problem type itself:
//!
//! 1. start hooks;
//! 2. `initV` when the basis is empty;
//! 3. `calcPairs`; a basis expansion that left no usable direction ends the solve in
//!    [`ConvergedReason::DivergedBreakdown`];
//! 4. `updateV`: lock, restart or expand;
//! 5. end hooks, then the terminal checks (`Converged`, `DivergedIts`).

use super::{
    blackboard::{Blackboard, Planner, ScalarSlot, VecSlot},
    calcpairs::ProjectionStep,
    harmonic::{Extractor, Harmonic, RayleighRitz},
    initv::{ClassicInit, KrylovInit},
    normalize, orthogonalize,
    reduction::Collective,
    updatev::{CorrectionExpansion, Expansion, KrylovExpansion, UpdateStep},
};
use crate::{
    config::{ExpansionPolicy, ProblemType, ResolvedConfig},
    correction::CorrectionSolver,
    dense::ProjectedSolution,
    error::{DavidsonError, DavidsonErrorKind},
    matrix::LinearOperator,
};
use faer::{Mat, MatRef, c64};
use rand::{SeedableRng, rngs::StdRng};
use serde::Serialize;

/// Terminal state of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConvergedReason {
    /// All requested pairs are locked.
    Converged,
    /// The outer iteration cap was reached.
    DivergedIts,
    /// No usable direction was left to expand the subspace.
    DivergedBreakdown,
}

/// One row of the convergence history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub nconv: usize,
    pub size_v: usize,
    pub eigenvalue_re: f64,
    pub eigenvalue_im: f64,
    pub error_estimate: f64,
    pub operator_applications: usize,
}

/// The problem operators.
#[derive(Clone, Copy)]
pub struct Operators<'a> {
    pub a: &'a dyn LinearOperator<c64>,
    pub b: Option<&'a dyn LinearOperator<c64>>,
}

/// Which locked vectors the residuals (and the harmonic test space) are deflated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResidualDeflation {
    /// Hermitian standard Rayleigh-Ritz: residuals are already orthogonal.
    None,
    /// The locked right vectors `cX`.
    Right,
    /// The orthonormalized images `cY` of the locked vectors under `B`.
    Left,
}

impl ResidualDeflation {
    pub fn for_config(cfg: &ResolvedConfig) -> Self {
        if cfg.problem.is_generalized() {
            ResidualDeflation::Left
        } else if cfg.shape.hermitian {
            ResidualDeflation::None
        } else {
            ResidualDeflation::Right
        }
    }
}

/// Locked eigenpairs and the reduced form of the operators on their span.
///
/// For standard Hermitian problems the locked vectors are eigenvectors. Every other
/// problem keeps a partial (generalized) Schur form: `cYᴴ A cX = cS` and, for pencils,
/// `cYᴴ B cX = cT`, with `cY = cX` for standard problems.
#[derive(Debug, Clone)]
pub struct ConvergedSubspace {
    eigenvalues: Vec<c64>,
    errest: Vec<f64>,
    x: Mat<c64>,
    y: Option<Mat<c64>>,
    s: Option<Mat<c64>>,
    t: Option<Mat<c64>>,
    hermitian: bool,
    nconv: usize,
}

impl ConvergedSubspace {
    pub fn new(n: usize, max_nev: usize, problem: ProblemType) -> Self {
        let schur = problem != ProblemType::Hermitian;
        let generalized = problem.is_generalized();
        Self {
            eigenvalues: Vec::with_capacity(max_nev),
            errest: Vec::with_capacity(max_nev),
            x: Mat::zeros(n, max_nev),
            y: generalized.then(|| Mat::zeros(n, max_nev)),
            s: schur.then(|| Mat::zeros(max_nev, max_nev)),
            t: (schur && generalized).then(|| Mat::zeros(max_nev, max_nev)),
            hermitian: problem.is_hermitian(),
            nconv: 0,
        }
    }

    pub fn nconv(&self) -> usize {
        self.nconv
    }

    pub fn eigenvalues(&self) -> &[c64] {
        &self.eigenvalues
    }

    pub fn error_estimates(&self) -> &[f64] {
        &self.errest
    }

    /// Locked right vectors `cX`.
    pub fn vectors(&self) -> MatRef<'_, c64> {
        self.x.as_ref().subcols(0, self.nconv)
    }

    /// Orthonormalized `B cX`, for generalized problems.
    pub fn left_vectors(&self) -> Option<MatRef<'_, c64>> {
        self.y.as_ref().map(|y| y.as_ref().subcols(0, self.nconv))
    }

    pub fn schur_s(&self) -> Option<MatRef<'_, c64>> {
        self.s
            .as_ref()
            .map(|s| s.as_ref().submatrix(0, 0, self.nconv, self.nconv))
    }

    pub fn schur_t(&self) -> Option<MatRef<'_, c64>> {
        self.t
            .as_ref()
            .map(|t| t.as_ref().submatrix(0, 0, self.nconv, self.nconv))
    }

    /// Whether locked vectors are eigenvectors or Schur vectors.
    pub fn keeps_schur_form(&self) -> bool {
        self.s.is_some()
    }

    pub(crate) fn residual_reference(&self, deflation: ResidualDeflation) -> Option<MatRef<'_, c64>> {
        match deflation {
            ResidualDeflation::None => None,
            ResidualDeflation::Right => Some(self.vectors()),
            ResidualDeflation::Left => self.left_vectors(),
        }
    }

    /// Appends one locked vector `x` with images `ax = A x` and `bx = B x` (pencils only).
    ///
    /// The recorded eigenvalue is read off the reduced form: `s_cc / t_cc` for Schur
    /// form, the Rayleigh quotient `xᴴ A x` otherwise. Hermitian problems keep its real part.
    pub(crate) fn push(
        &mut self,
        errest: f64,
        x: MatRef<'_, c64>,
        ax: MatRef<'_, c64>,
        bx: Option<MatRef<'_, c64>>,
    ) -> Result<(), DavidsonError> {
        let c = self.nconv;
        if c == self.x.ncols() {
            return Err(crate::error::consistency_error(
                "locking beyond the capacity of the converged subspace",
            ));
        }
        self.x.as_mut().subcols_mut(c, 1).copy_from(x);

        if let Some(y) = self.y.as_mut() {
            let Some(bx) = bx else {
                return Err(crate::error::consistency_error(
                    "a generalized lock is missing B x",
                ));
            };
            let mut col = bx.to_owned();
            let outcome = orthogonalize(&mut col, &[y.as_ref().subcols(0, c)]);
            if outcome.is_dependent() {
                log::warn!("B x of locked pair {c} is dependent on the previous ones");
            }
            normalize(&mut col);
            y.as_mut().subcols_mut(c, 1).copy_from(col.as_ref());
        }

        let left = match &self.y {
            Some(y) => y.as_ref().subcols(0, c + 1),
            None => self.x.as_ref().subcols(0, c + 1),
        };
        if let Some(s) = &mut self.s {
            let coeffs = left.adjoint() * ax;
            for i in 0..=c {
                s[(i, c)] = coeffs[(i, 0)];
            }
        }
        if let (Some(t), Some(bx)) = (&mut self.t, bx) {
            let coeffs = left.adjoint() * bx;
            for i in 0..=c {
                t[(i, c)] = coeffs[(i, 0)];
            }
        }

        let mut eigenvalue = match (&self.s, &self.t) {
            (Some(s), Some(t)) => crate::dense::qz::ratio(s[(c, c)], t[(c, c)]),
            (Some(s), None) => s[(c, c)],
            _ => (x.adjoint() * ax)[(0, 0)],
        };
        if self.hermitian {
            eigenvalue = c64::new(eigenvalue.re, 0.0);
        }
        self.eigenvalues.push(eigenvalue);
        self.errest.push(errest);
        self.nconv += 1;
        Ok(())
    }
}

/// Storage of the search space inside the blackboard.
#[derive(Debug, Clone, Copy, Default)]
pub struct Layout {
    pub v: VecSlot,
    pub av: VecSlot,
    pub bv: Option<VecSlot>,
    pub h: ScalarSlot,
    pub g: Option<ScalarSlot>,
    /// Leading dimension of `H` and `G`.
    pub ld: usize,
}

/// Everything a solve mutates.
pub struct DashboardState<'a> {
    pub(crate) cfg: ResolvedConfig,
    pub(crate) ops: Operators<'a>,
    pub(crate) collective: &'a dyn Collective,
    pub(crate) board: Blackboard,
    pub(crate) layout: Layout,

    pub(crate) size_v: usize,
    /// First column of `V` not yet projected.
    pub(crate) new_start: usize,
    pub(crate) size_h: usize,
    pub(crate) size_av: usize,
    pub(crate) size_bv: usize,
    /// Pending right transform of `AV`, `BV`, `H` and `G` (already applied to `V`).
    pub(crate) mt: Option<Mat<c64>>,
    /// The test space changed, so `H`/`G` are rebuilt from `AV`/`BV` on the next projection.
    pub(crate) reproject: bool,

    pub(crate) solution: Option<ProjectedSolution>,
    pub(crate) prev_px: Option<Mat<c64>>,
    pub(crate) eigenvalues: Vec<c64>,
    pub(crate) residual_norms: Vec<f64>,
    pub(crate) errest: Vec<f64>,
    pub(crate) residual_count: usize,

    pub(crate) converged: ConvergedSubspace,
    pub(crate) deflation: ResidualDeflation,
    pub(crate) rng: StdRng,
    pub(crate) iteration: usize,
    pub(crate) breakdown: bool,
    pub(crate) reason: Option<ConvergedReason>,
    pub(crate) matvecs: usize,
    pub(crate) history: Vec<IterationRecord>,
}

impl<'a> DashboardState<'a> {
    pub(crate) fn dim(&self) -> usize {
        self.cfg.n
    }

    /// `A X`, counted as `X.ncols()` operator applications.
    pub(crate) fn apply_a(&mut self, x: MatRef<'_, c64>) -> Result<Mat<c64>, DavidsonError> {
        let ax = self.ops.a.apply(x);
        self.matvecs += x.ncols();
        check_image("A", &ax, x)?;
        Ok(ax)
    }

    /// `B X` for pencils, `None` otherwise.
    pub(crate) fn apply_b(&mut self, x: MatRef<'_, c64>) -> Result<Option<Mat<c64>>, DavidsonError> {
        let Some(b) = self.ops.b else {
            return Ok(None);
        };
        let bx = b.apply(x);
        self.matvecs += x.ncols();
        check_image("B", &bx, x)?;
        Ok(Some(bx))
    }

    pub(crate) fn basis(&self) -> MatRef<'_, c64> {
        self.board.cols(self.layout.v, 0..self.size_v)
    }

    pub(crate) fn residuals(&self) -> MatRef<'_, c64> {
        match self.board.aux_vecs(self.residual_count) {
            Ok(slot) => self.board.cols(slot, 0..self.residual_count),
            Err(_) => self.board.cols(self.layout.v, 0..0),
        }
    }
}

fn check_image(name: &'static str, image: &Mat<c64>, x: MatRef<'_, c64>) -> Result<(), DavidsonError> {
    if image.nrows() != x.nrows() || image.ncols() != x.ncols() {
        return Err(DavidsonErrorKind::DimensionMismatch {
            context: if name == "A" { "operator A image" } else { "operator B image" },
            expected: x.nrows(),
            actual: image.nrows(),
        }
        .into());
    }
    Ok(())
}

/// Shared behavior of pipeline steps: declaring their storage to the planner.
pub trait Step {
    fn declare(&self, _cfg: &ResolvedConfig, _planner: &mut Planner) {}
}

/// Fills an empty basis.
pub trait InitV: Step {
    fn init(&mut self, state: &mut DashboardState<'_>) -> Result<(), DavidsonError>;
}

/// Projects the problem and extracts approximate eigenpairs and residuals.
pub trait CalcPairs: Step {
    fn calc_pairs(&mut self, state: &mut DashboardState<'_>) -> Result<(), DavidsonError>;
}

/// Locks, restarts or expands the basis.
pub trait UpdateV: Step {
    fn update(&mut self, state: &mut DashboardState<'_>) -> Result<(), DavidsonError>;
}

/// Runs at the start or at the end of every outer iteration.
pub trait IterationHook {
    fn on_iteration(&mut self, state: &mut DashboardState<'_>);
}

/// Logs the progress of each iteration.
#[derive(Debug, Default)]
pub struct ProgressLog;

impl IterationHook for ProgressLog {
    fn on_iteration(&mut self, state: &mut DashboardState<'_>) {
        log::debug!(
            "Iteration {}: basis {}, projected {}, converged {}/{}",
            state.iteration,
            state.size_v,
            state.size_h,
            state.converged.nconv(),
            state.cfg.nev
        );
    }
}

/// Appends an [`IterationRecord`] to the state history.
#[derive(Debug, Default)]
pub struct HistoryRecorder;

impl IterationHook for HistoryRecorder {
    fn on_iteration(&mut self, state: &mut DashboardState<'_>) {
        let leading = state.eigenvalues.first().copied();
        state.history.push(IterationRecord {
            iteration: state.iteration,
            nconv: state.converged.nconv(),
            size_v: state.size_v,
            eigenvalue_re: leading.map_or(f64::NAN, |l| l.re),
            eigenvalue_im: leading.map_or(f64::NAN, |l| l.im),
            error_estimate: state.errest.first().copied().unwrap_or(f64::NAN),
            operator_applications: state.matvecs,
        });
    }
}

/// The ordered steps of one outer iteration.
pub struct Pipeline<'a> {
    pub init_v: Box<dyn InitV + 'a>,
    pub calc_pairs: Box<dyn CalcPairs + 'a>,
    pub update_v: Box<dyn UpdateV + 'a>,
    pub start_hooks: Vec<Box<dyn IterationHook + 'a>>,
    pub end_hooks: Vec<Box<dyn IterationHook + 'a>>,
}

impl<'a> Pipeline<'a> {
    /// Chooses the step implementations for a configuration.
    pub fn for_config(
        cfg: &ResolvedConfig,
        initial: Option<MatRef<'a, c64>>,
        correction: &'a mut dyn CorrectionSolver,
    ) -> Self {
        let init_v: Box<dyn InitV + 'a> = if cfg.krylov_start {
            Box::new(KrylovInit::new(initial))
        } else {
            Box::new(ClassicInit::new(initial))
        };
        let extractor: Box<dyn Extractor> = match Harmonic::new(cfg.extraction, cfg.harmonic_target) {
            Some(harmonic) => Box::new(harmonic),
            None => Box::new(RayleighRitz),
        };
        let expansion: Box<dyn Expansion + 'a> = match cfg.expansion {
            ExpansionPolicy::Correction => Box::new(CorrectionExpansion::new(correction)),
            ExpansionPolicy::Krylov => Box::new(KrylovExpansion),
        };
        Self {
            init_v,
            calc_pairs: Box::new(ProjectionStep::new(extractor)),
            update_v: Box::new(UpdateStep::new(expansion)),
            start_hooks: vec![Box::new(ProgressLog)],
            end_hooks: vec![Box::new(HistoryRecorder)],
        }
    }
}

/// The state of a solve together with the pipeline that drives it.
pub struct Dashboard<'a> {
    state: DashboardState<'a>,
    pipeline: Pipeline<'a>,
}

impl<'a> Dashboard<'a> {
    /// Plans and allocates all storage, then returns a dashboard ready to iterate.
    ///
    /// # Errors
    /// Dimension mismatches between the configuration and the operators, and any
    /// planner inconsistency.
    pub fn new(
        cfg: ResolvedConfig,
        ops: Operators<'a>,
        collective: &'a dyn Collective,
        pipeline: Pipeline<'a>,
    ) -> Result<Self, DavidsonError> {
        let n = cfg.n;
        if ops.a.nrows() != n || ops.a.ncols() != n {
            return Err(DavidsonErrorKind::DimensionMismatch {
                context: "operator A",
                expected: n,
                actual: ops.a.ncols(),
            }
            .into());
        }
        if let Some(b) = ops.b {
            if b.nrows() != n || b.ncols() != n {
                return Err(DavidsonErrorKind::DimensionMismatch {
                    context: "operator B",
                    expected: n,
                    actual: b.ncols(),
                }
                .into());
            }
        }
        if ops.b.is_some() != cfg.problem.is_generalized() {
            return Err(crate::error::config_error(format!(
                "{:?} does not match the operators supplied",
                cfg.problem
            )));
        }

        let ncv = cfg.ncv;
        let generalized = cfg.problem.is_generalized();
        let mut planner = Planner::new();
        let v_token = planner.declare_vecs(ncv);
        let av_token = planner.declare_vecs(ncv);
        let bv_token = generalized.then(|| planner.declare_vecs(ncv));
        let h_token = planner.declare_scalars(ncv * ncv);
        let g_token = (!cfg.shape.standard).then(|| planner.declare_scalars(ncv * ncv));
        pipeline.init_v.declare(&cfg, &mut planner);
        pipeline.calc_pairs.declare(&cfg, &mut planner);
        pipeline.update_v.declare(&cfg, &mut planner);

        let mut board = planner.allocate(n);
        let layout = Layout {
            v: board.claim_vecs(v_token, ncv)?,
            av: board.claim_vecs(av_token, ncv)?,
            bv: bv_token.map(|t| board.claim_vecs(t, ncv)).transpose()?,
            h: board.claim_scalars(h_token, ncv * ncv)?,
            g: g_token.map(|t| board.claim_scalars(t, ncv * ncv)).transpose()?,
            ld: ncv,
        };
        board.finish()?;

        log::info!(
            "Davidson setup: n = {n}, nev = {}, ncv = {ncv}, block = {}, restart = ({}, {}), {:?} with {:?}, target {:?}",
            cfg.nev,
            cfg.block_size,
            cfg.restart_min,
            cfg.restart_plusk,
            cfg.problem,
            cfg.extraction,
            cfg.which
        );

        let state = DashboardState {
            converged: ConvergedSubspace::new(n, cfg.max_nev, cfg.problem),
            deflation: ResidualDeflation::for_config(&cfg),
            rng: StdRng::seed_from_u64(cfg.seed),
            cfg,
            ops,
            collective,
            board,
            layout,
            size_v: 0,
            new_start: 0,
            size_h: 0,
            size_av: 0,
            size_bv: 0,
            mt: None,
            reproject: false,
            solution: None,
            prev_px: None,
            eigenvalues: Vec::new(),
            residual_norms: Vec::new(),
            errest: Vec::new(),
            residual_count: 0,
            iteration: 0,
            breakdown: false,
            reason: None,
            matvecs: 0,
            history: Vec::new(),
        };
        Ok(Self { state, pipeline })
    }

    /// Runs `initV` if the basis is empty.
    pub fn init_subspace(&mut self) -> Result<(), DavidsonError> {
        if self.state.size_v == 0 {
            self.pipeline.init_v.init(&mut self.state)?;
        }
        Ok(())
    }

    /// Runs `calcPairs` once.
    pub fn calc_pairs(&mut self) -> Result<(), DavidsonError> {
        self.pipeline.calc_pairs.calc_pairs(&mut self.state)
    }

    /// Runs `updateV` once.
    pub fn update_subspace(&mut self) -> Result<(), DavidsonError> {
        self.pipeline.update_v.update(&mut self.state)
    }

    /// One outer iteration. Returns the terminal state once one is reached.
    pub fn step(&mut self) -> Result<Option<ConvergedReason>, DavidsonError> {
        if let Some(reason) = self.state.reason {
            return Ok(Some(reason));
        }
        self.state.iteration += 1;
        for hook in self.pipeline.start_hooks.iter_mut() {
            hook.on_iteration(&mut self.state);
        }

        self.init_subspace()?;
        self.calc_pairs()?;
        if !self.state.breakdown {
            self.update_subspace()?;
        }

        for hook in self.pipeline.end_hooks.iter_mut() {
            hook.on_iteration(&mut self.state);
        }

        let reason = if self.state.breakdown {
            Some(ConvergedReason::DivergedBreakdown)
        } else if self.state.converged.nconv() >= self.state.cfg.nev {
            Some(ConvergedReason::Converged)
        } else if self.state.iteration >= self.state.cfg.max_it {
            Some(ConvergedReason::DivergedIts)
        } else {
            None
        };
        if let Some(reason) = reason {
            log::info!(
                "Davidson finished after {} iterations: {reason:?}, {} of {} pairs converged, {} operator applications",
                self.state.iteration,
                self.state.converged.nconv(),
                self.state.cfg.nev,
                self.state.matvecs
            );
            self.state.reason = Some(reason);
        }
        Ok(reason)
    }

    /// Iterates until a terminal state.
    pub fn run(&mut self) -> Result<ConvergedReason, DavidsonError> {
        loop {
            if let Some(reason) = self.step()? {
                return Ok(reason);
            }
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.state.cfg
    }

    pub fn iteration(&self) -> usize {
        self.state.iteration
    }

    pub fn reason(&self) -> Option<ConvergedReason> {
        self.state.reason
    }

    pub fn operator_applications(&self) -> usize {
        self.state.matvecs
    }

    pub fn history(&self) -> &[IterationRecord] {
        &self.state.history
    }

    /// The current basis `V`.
    pub fn basis(&self) -> MatRef<'_, c64> {
        self.state.basis()
    }

    /// `AV`, in sync with the projected part of `V`.
    pub fn applied_basis(&self) -> MatRef<'_, c64> {
        self.state.board.cols(self.state.layout.av, 0..self.state.size_av)
    }

    /// `BV`, for generalized problems.
    pub fn applied_basis_b(&self) -> Option<MatRef<'_, c64>> {
        self.state
            .layout
            .bv
            .map(|bv| self.state.board.cols(bv, 0..self.state.size_bv))
    }

    /// The projected matrix `H`.
    pub fn projected_h(&self) -> Mat<c64> {
        let s = &self.state;
        s.board.load(s.layout.h, s.layout.ld, s.size_h, s.size_h)
    }

    /// The projected matrix `G`, when the projected problem is a pencil.
    pub fn projected_g(&self) -> Option<Mat<c64>> {
        let s = &self.state;
        s.layout
            .g
            .map(|g| s.board.load(g, s.layout.ld, s.size_h, s.size_h))
    }

    /// Approximate eigenvalues of the last projection, in selection order.
    pub fn eigenvalues(&self) -> &[c64] {
        &self.state.eigenvalues
    }

    pub fn residual_norms(&self) -> &[f64] {
        &self.state.residual_norms
    }

    pub fn error_estimates(&self) -> &[f64] {
        &self.state.errest
    }

    /// Residual vectors of the leading pairs of the last projection.
    pub fn residuals(&self) -> MatRef<'_, c64> {
        self.state.residuals()
    }

    /// The last projected solution.
    pub fn projected_solution(&self) -> Option<&ProjectedSolution> {
        self.state.solution.as_ref()
    }

    /// Transform of the retained basis still to be applied to `AV`, `BV`, `H` and `G`.
    pub fn pending_transform(&self) -> Option<MatRef<'_, c64>> {
        self.state.mt.as_ref().map(|mt| mt.as_ref())
    }

    pub fn converged(&self) -> &ConvergedSubspace {
        &self.state.converged
    }

    /// Pool sizes `(vectors, scalars)` of the blackboard.
    pub fn storage(&self) -> (usize, usize) {
        self.state.board.capacity()
    }

    /// Consumes the dashboard, returning the locked pairs and the run bookkeeping.
    pub fn into_parts(self) -> (ConvergedSubspace, RunSummary) {
        let state = self.state;
        (
            state.converged,
            RunSummary {
                reason: state.reason.unwrap_or(ConvergedReason::DivergedIts),
                iterations: state.iteration,
                operator_applications: state.matvecs,
                history: state.history,
            },
        )
    }
}

/// Bookkeeping of a finished run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub reason: ConvergedReason,
    pub iterations: usize,
    pub operator_applications: usize,
    pub history: Vec<IterationRecord>,
}
