//! Solver configuration: user-facing parameters, their defaults and their validation.
//!
//! A [`SolverConfig`] is what callers fill in. It is resolved exactly once per solve,
//! against the problem dimension and [`ProblemType`], into an immutable
//! [`ResolvedConfig`] in which every default has been decided. All configuration
//! errors surface from [`SolverConfig::resolve`], before any storage is planned.

use crate::error::{DavidsonError, DavidsonErrorKind, config_error};
use faer::c64;
use serde::{Deserialize, Serialize};

/// Which part of the spectrum the solver should converge to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Which {
    #[default]
    LargestMagnitude,
    SmallestMagnitude,
    LargestReal,
    SmallestReal,
    LargestImaginary,
    SmallestImaginary,
    /// Closest to the target in absolute value.
    TargetMagnitude,
    /// Closest to the target measured along the real axis.
    TargetReal,
    /// Closest to the target measured along the imaginary axis.
    TargetImaginary,
}

impl Which {
    pub fn is_imaginary(self) -> bool {
        matches!(self, Which::LargestImaginary | Which::SmallestImaginary)
    }

    pub fn uses_target(self) -> bool {
        matches!(
            self,
            Which::TargetMagnitude | Which::TargetReal | Which::TargetImaginary
        )
    }

    pub fn is_largest(self) -> bool {
        matches!(
            self,
            Which::LargestMagnitude | Which::LargestReal | Which::LargestImaginary
        )
    }
}

/// How approximate eigenpairs are extracted from the search subspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Extraction {
    /// Plain Rayleigh-Ritz.
    #[default]
    Ritz,
    /// Harmonic Rayleigh-Ritz around the target.
    Harmonic,
    /// Relative harmonic Rayleigh-Ritz.
    HarmonicRelative,
    /// Harmonic extraction for rightmost eigenvalues.
    HarmonicRight,
    /// Harmonic extraction for largest eigenvalues (no target needed).
    HarmonicLargest,
    /// Refined extraction. Recognized, but rejected at setup.
    Refined,
}

impl Extraction {
    pub fn is_harmonic(self) -> bool {
        !matches!(self, Extraction::Ritz | Extraction::Refined)
    }
}

/// Structural properties of the eigenproblem `A x = λ B x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProblemType {
    /// Standard problem with Hermitian `A`.
    #[default]
    Hermitian,
    /// Standard problem with general `A`.
    NonHermitian,
    /// Generalized problem with Hermitian `A` and Hermitian positive-definite `B`.
    GeneralizedHermitian,
    /// Generalized problem with general `A` and `B`.
    GeneralizedNonHermitian,
}

impl ProblemType {
    pub fn is_hermitian(self) -> bool {
        matches!(self, ProblemType::Hermitian | ProblemType::GeneralizedHermitian)
    }

    pub fn is_generalized(self) -> bool {
        matches!(
            self,
            ProblemType::GeneralizedHermitian | ProblemType::GeneralizedNonHermitian
        )
    }
}

/// How the search subspace is expanded once the current pairs are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExpansionPolicy {
    /// Generalized Davidson: ask the correction solver for `K⁻¹ r`.
    #[default]
    Correction,
    /// Append the primary operator applied to the newest basis vector.
    Krylov,
}

/// User-facing solver parameters.
///
/// Every `Option` field means "let the solver decide"; see [`SolverConfig::resolve`]
/// for the rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Number of requested eigenpairs.
    pub nev: usize,
    /// Maximum dimension of the search subspace.
    pub ncv: Option<usize>,
    /// Maximum number of outer iterations.
    pub max_it: Option<usize>,
    pub tol: f64,
    pub which: Which,
    /// Target as `[re, im]`.
    pub target: [f64; 2],
    pub extraction: Extraction,
    pub block_size: usize,
    /// Number of Ritz vectors kept at a thick restart.
    pub restart_min: Option<usize>,
    /// Number of vectors of the previous iteration kept at a thick restart.
    pub restart_plusk: usize,
    pub initial_size: usize,
    pub krylov_start: bool,
    /// Error-estimate threshold below which the correction shift tracks the Ritz value.
    pub fix: f64,
    pub expansion: ExpansionPolicy,
    /// Issue the `H` and `G` reductions as one collective call.
    pub batch_reductions: bool,
    pub seed: u64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            nev: 1,
            ncv: None,
            max_it: None,
            tol: 1e-8,
            which: Which::LargestMagnitude,
            target: [0.0, 0.0],
            extraction: Extraction::Ritz,
            block_size: 1,
            restart_min: None,
            restart_plusk: 0,
            initial_size: 5,
            krylov_start: false,
            fix: 0.01,
            expansion: ExpansionPolicy::Correction,
            batch_reductions: true,
            seed: 42,
        }
    }
}

impl SolverConfig {
    pub fn new(nev: usize) -> Self {
        Self {
            nev,
            ..Self::default()
        }
    }

    pub fn with_ncv(mut self, ncv: usize) -> Self {
        self.ncv = Some(ncv);
        self
    }

    pub fn with_max_it(mut self, max_it: usize) -> Self {
        self.max_it = Some(max_it);
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_which(mut self, which: Which) -> Self {
        self.which = which;
        self
    }

    pub fn with_target(mut self, target: c64) -> Self {
        self.target = [target.re, target.im];
        self
    }

    pub fn with_extraction(mut self, extraction: Extraction) -> Self {
        self.extraction = extraction;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_restart(mut self, minv: usize, plusk: usize) -> Self {
        self.restart_min = Some(minv);
        self.restart_plusk = plusk;
        self
    }

    pub fn with_initial_size(mut self, initial_size: usize) -> Self {
        self.initial_size = initial_size;
        self
    }

    pub fn with_krylov_start(mut self, krylov_start: bool) -> Self {
        self.krylov_start = krylov_start;
        self
    }

    pub fn with_fix(mut self, fix: f64) -> Self {
        self.fix = fix;
        self
    }

    /// [`ExpansionPolicy::Krylov`] always starts from a Krylov sequence, whatever
    /// [`SolverConfig::with_krylov_start`] says.
    pub fn with_expansion(mut self, expansion: ExpansionPolicy) -> Self {
        self.expansion = expansion;
        self
    }

    pub fn with_batch_reductions(mut self, batch: bool) -> Self {
        self.batch_reductions = batch;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Validates the parameters against a problem of dimension `n` and fills in defaults.
    ///
    /// # Errors
    /// Returns a configuration error when the subspace sizes cannot accommodate the
    /// request, when the criterion does not make sense for the problem, or when the
    /// extraction mode is not supported.
    pub fn resolve(&self, n: usize, problem: ProblemType) -> Result<ResolvedConfig, DavidsonError> {
        if n == 0 {
            return Err(DavidsonErrorKind::InputError("the problem dimension is zero".into()).into());
        }
        if self.nev == 0 {
            return Err(config_error("nev must be at least 1"));
        }
        if self.nev > n {
            return Err(config_error(format!(
                "nev ({}) cannot exceed the problem dimension ({n})",
                self.nev
            )));
        }

        let ncv = match self.ncv {
            Some(ncv) if ncv < self.nev => {
                return Err(config_error(format!(
                    "ncv ({ncv}) must be at least nev ({})",
                    self.nev
                )));
            }
            Some(ncv) if ncv > n => {
                return Err(config_error(format!(
                    "ncv ({ncv}) cannot exceed the problem dimension ({n})"
                )));
            }
            Some(ncv) => ncv,
            None if self.nev < 500 => n.min((2 * self.nev).max(self.nev + 15)),
            None => n.min(self.nev + 500),
        };
        let max_it = self.max_it.unwrap_or_else(|| 100.max(2 * n / ncv));

        if problem.is_hermitian() && self.which.is_imaginary() {
            return Err(config_error(format!(
                "{:?} is meaningless for a Hermitian problem",
                self.which
            )));
        }

        if self.block_size == 0 {
            return Err(config_error("block_size must be at least 1"));
        }
        let block_size = self.block_size;
        if self.nev + block_size >= ncv {
            return Err(config_error(format!(
                "ncv ({ncv}) has to be greater than nev ({}) plus block_size ({block_size})",
                self.nev
            )));
        }

        let restart_min = match self.restart_min {
            Some(0) => return Err(config_error("the restart size minv must be at least 1")),
            Some(minv) if minv > ncv => {
                return Err(config_error(format!(
                    "the restart size minv ({minv}) must not exceed ncv ({ncv})"
                )));
            }
            Some(minv) => minv,
            None => 6.min(ncv - block_size).max(1),
        };
        if restart_min + self.restart_plusk + block_size > ncv {
            return Err(config_error(format!(
                "minv ({restart_min}) + plusk ({}) leaves no room for block_size ({block_size}) new vectors within ncv ({ncv})",
                self.restart_plusk
            )));
        }

        if self.initial_size == 0 {
            return Err(config_error("initial_size must be at least 1"));
        }
        if !(self.fix >= 0.0) {
            return Err(config_error(format!("fix ({}) must be non-negative", self.fix)));
        }
        if !(self.tol > 0.0) {
            return Err(config_error(format!("tol ({}) must be positive", self.tol)));
        }

        let target = c64::new(self.target[0], self.target[1]);
        let target_pair = target_pair(self.which, target);

        let harmonic_target = match self.extraction {
            Extraction::Refined => {
                return Err(DavidsonErrorKind::Unsupported(
                    "refined extraction is not available in this solver".into(),
                )
                .into());
            }
            Extraction::Harmonic | Extraction::HarmonicRelative | Extraction::HarmonicRight => {
                if target_pair.1.norm() == 0.0 {
                    return Err(config_error(format!(
                        "{:?} extraction needs a finite target, which {:?} does not provide",
                        self.extraction, self.which
                    )));
                }
                Some(target_pair.0 / target_pair.1)
            }
            Extraction::HarmonicLargest | Extraction::Ritz => None,
        };

        let shape = ProjectedShape {
            standard: !problem.is_generalized() && self.extraction == Extraction::Ritz,
            hermitian: problem.is_hermitian() && self.extraction == Extraction::Ritz,
        };

        Ok(ResolvedConfig {
            n,
            nev: self.nev,
            ncv,
            max_it,
            tol: self.tol,
            which: self.which,
            target,
            target_pair,
            harmonic_target,
            extraction: self.extraction,
            problem,
            shape,
            block_size,
            restart_min,
            restart_plusk: self.restart_plusk,
            initial_size: self.initial_size.min(ncv),
            // Expanding with A v only stays a Krylov space when the start was one.
            krylov_start: self.krylov_start || self.expansion == ExpansionPolicy::Krylov,
            fix: self.fix,
            expansion: self.expansion,
            batch_reductions: self.batch_reductions,
            seed: self.seed,
            max_nev: self.nev,
        })
    }
}

/// Homogeneous target `(t0, t1)` for a selection criterion; the scalar target is `t0/t1`.
fn target_pair(which: Which, target: c64) -> (c64, c64) {
    let one = c64::new(1.0, 0.0);
    let zero = c64::new(0.0, 0.0);
    match which {
        Which::TargetMagnitude | Which::TargetReal | Which::TargetImaginary => (target, one),
        Which::LargestMagnitude | Which::LargestReal | Which::LargestImaginary => (one, zero),
        Which::SmallestMagnitude | Which::SmallestReal | Which::SmallestImaginary => (zero, one),
    }
}

/// Shape of the projected dense problem, which decides the dense solver variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectedShape {
    /// The projected problem is `H y = θ y` (no `G`).
    pub standard: bool,
    /// The projected matrices are Hermitian.
    pub hermitian: bool,
}

/// Fully resolved, immutable solver parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub n: usize,
    pub nev: usize,
    /// Maximum size of the search subspace (`max_size_V`).
    pub ncv: usize,
    pub max_it: usize,
    pub tol: f64,
    pub which: Which,
    pub target: c64,
    pub target_pair: (c64, c64),
    /// Finite target used by the harmonic transforms, when one applies.
    pub harmonic_target: Option<c64>,
    pub extraction: Extraction,
    pub problem: ProblemType,
    pub shape: ProjectedShape,
    pub block_size: usize,
    pub restart_min: usize,
    pub restart_plusk: usize,
    pub initial_size: usize,
    pub krylov_start: bool,
    pub fix: f64,
    pub expansion: ExpansionPolicy,
    pub batch_reductions: bool,
    pub seed: u64,
    /// Capacity of the deflation (locked) space.
    pub max_nev: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_problem_size() {
        let cfg = SolverConfig::new(5).resolve(100, ProblemType::Hermitian).unwrap();
        assert_eq!(cfg.ncv, 20);
        assert_eq!(cfg.max_it, 100);
        assert_eq!(cfg.restart_min, 6);
        assert_eq!(cfg.initial_size, 5);
        assert!(cfg.shape.standard && cfg.shape.hermitian);

        let cfg = SolverConfig::new(600).resolve(5000, ProblemType::Hermitian).unwrap();
        assert_eq!(cfg.ncv, 1100);

        let cfg = SolverConfig::new(2).with_ncv(10).resolve(10_000, ProblemType::NonHermitian).unwrap();
        assert_eq!(cfg.max_it, 2000);
    }

    #[test]
    fn test_ncv_relations_are_enforced() {
        let err = SolverConfig::new(6).with_ncv(4).resolve(50, ProblemType::Hermitian);
        assert!(err.unwrap_err().is_configuration());

        let err = SolverConfig::new(4)
            .with_ncv(5)
            .resolve(50, ProblemType::Hermitian)
            .unwrap_err();
        assert!(err.to_string().contains("greater than nev"));

        let err = SolverConfig::new(2)
            .with_ncv(10)
            .with_restart(11, 0)
            .resolve(50, ProblemType::Hermitian)
            .unwrap_err();
        assert!(err.to_string().contains("must not exceed ncv"));

        let err = SolverConfig::new(2)
            .with_ncv(10)
            .with_restart(0, 0)
            .resolve(50, ProblemType::Hermitian)
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_imaginary_criterion_rejected_for_hermitian() {
        let err = SolverConfig::new(2)
            .with_which(Which::LargestImaginary)
            .resolve(40, ProblemType::GeneralizedHermitian)
            .unwrap_err();
        assert!(err.is_configuration());

        assert!(
            SolverConfig::new(2)
                .with_which(Which::LargestImaginary)
                .resolve(40, ProblemType::NonHermitian)
                .is_ok()
        );
    }

    #[test]
    fn test_extraction_support() {
        let err = SolverConfig::new(2)
            .with_extraction(Extraction::Refined)
            .resolve(40, ProblemType::Hermitian)
            .unwrap_err();
        assert!(err.to_string().starts_with("Unsupported configuration"));

        let err = SolverConfig::new(2)
            .with_extraction(Extraction::Harmonic)
            .resolve(40, ProblemType::Hermitian)
            .unwrap_err();
        assert!(err.to_string().contains("finite target"));

        let cfg = SolverConfig::new(2)
            .with_which(Which::TargetMagnitude)
            .with_target(c64::new(3.5, 0.0))
            .with_extraction(Extraction::Harmonic)
            .resolve(40, ProblemType::Hermitian)
            .unwrap();
        assert_eq!(cfg.harmonic_target, Some(c64::new(3.5, 0.0)));
        assert!(!cfg.shape.standard && !cfg.shape.hermitian);
    }

    #[test]
    fn test_target_pair_per_criterion() {
        let t = c64::new(2.0, 1.0);
        assert_eq!(target_pair(Which::TargetReal, t), (t, c64::new(1.0, 0.0)));
        assert_eq!(
            target_pair(Which::LargestImaginary, t),
            (c64::new(1.0, 0.0), c64::new(0.0, 0.0))
        );
        assert_eq!(
            target_pair(Which::SmallestMagnitude, t),
            (c64::new(0.0, 0.0), c64::new(1.0, 0.0))
        );
    }

    #[test]
    fn test_scalar_parameters_validated() {
        let base = SolverConfig::new(2).with_ncv(10);
        assert!(base.clone().with_fix(-1.0).resolve(40, ProblemType::Hermitian).is_err());
        assert!(base.clone().with_tol(0.0).resolve(40, ProblemType::Hermitian).is_err());
        assert!(base.clone().with_block_size(0).resolve(40, ProblemType::Hermitian).is_err());
        assert!(base.clone().with_initial_size(0).resolve(40, ProblemType::Hermitian).is_err());
        let cfg = base.with_initial_size(50).resolve(40, ProblemType::Hermitian).unwrap();
        assert_eq!(cfg.initial_size, 10);
    }

    #[test]
    fn test_krylov_expansion_implies_krylov_start() {
        let cfg = SolverConfig::new(2)
            .with_ncv(10)
            .with_expansion(ExpansionPolicy::Krylov)
            .resolve(40, ProblemType::Hermitian)
            .unwrap();
        assert!(cfg.krylov_start);

        let cfg = SolverConfig::new(2).with_ncv(10).resolve(40, ProblemType::Hermitian).unwrap();
        assert!(!cfg.krylov_start);
    }
}
