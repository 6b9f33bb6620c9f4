//! This module defines the custom error types for the library.
//!
//! Every condition that must stop a solve is funnelled into [`DavidsonError`]. The
//! engine distinguishes three families:
//!
//! - configuration errors, detected while resolving a [`crate::config::SolverConfig`]
//!   before any memory is planned or any operator is applied;
//! - internal-consistency failures, raised when the pipeline wiring breaks one of its
//!   own bookkeeping rules (projected sizes out of sync, planner over-claims);
//! - failures reported by the dense kernels that solve the projected problem.
//!
//! Numerical breakdown and exhaustion of the iteration budget are deliberately absent:
//! those are terminal solver states carried by [`crate::solvers::EigenSolution`].
//!
//! As in the rest of the crate, [`faer::linalg::evd::EvdError`] does not implement
//! [`std::error::Error`], so it is stored verbatim and formatted with `Debug`.
use thiserror::Error;

/// Represents all possible errors that can occur while setting up or running the solver.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct DavidsonError(#[from] DavidsonErrorKind);

/// Private enum containing the distinct kinds of errors.
#[derive(Error, Debug, PartialEq)]
pub(crate) enum DavidsonErrorKind {
    /// A combination of solver parameters that can never be satisfied.
    #[error("Invalid solver configuration: {0}")]
    Configuration(String),

    /// A problem/extraction combination the engine does not implement.
    #[error("Unsupported configuration: {0}")]
    Unsupported(String),

    /// Operator or vector dimensions that do not fit together.
    #[error("Dimension mismatch in {context}: expected {expected}, found {actual}.")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The basis, the operator-applied bases and the projected matrices disagree in size.
    #[error("Consistency broken: {0}")]
    Consistency(String),

    /// A pipeline step claimed more storage than it declared while planning.
    #[error(
        "Resource planner over-claim: {resource} requested {requested} but only {available} were declared."
    )]
    PlannerOverclaim {
        resource: &'static str,
        requested: usize,
        available: usize,
    },

    /// Indicates that an invalid input parameter was provided to a function.
    #[error("Invalid input parameter: {0}")]
    InputError(String),

    /// Wraps an error originating from [`faer`]'s eigendecomposition module.
    #[error("A numerical error occurred during the eigendecomposition of the projected matrix: {0:?}")]
    EvdError(faer::linalg::evd::EvdError),

    /// An in-crate dense iteration (Schur or QZ) ran out of sweeps.
    #[error("The {routine} iteration did not converge after {iterations} sweeps.")]
    NoConvergence {
        routine: &'static str,
        iterations: usize,
    },
}

impl DavidsonError {
    /// Returns `true` if the error was raised while validating the configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.0,
            DavidsonErrorKind::Configuration(_)
                | DavidsonErrorKind::Unsupported(_)
                | DavidsonErrorKind::DimensionMismatch { .. }
        )
    }

    /// Returns `true` if the error signals a defect in the pipeline bookkeeping.
    pub fn is_consistency(&self) -> bool {
        matches!(
            self.0,
            DavidsonErrorKind::Consistency(_) | DavidsonErrorKind::PlannerOverclaim { .. }
        )
    }
}

// Compare through the private kind.
impl PartialEq for DavidsonError {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

pub(crate) fn config_error(message: impl Into<String>) -> DavidsonError {
    DavidsonErrorKind::Configuration(message.into()).into()
}

pub(crate) fn consistency_error(message: impl Into<String>) -> DavidsonError {
    DavidsonErrorKind::Consistency(message.into()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_message() {
        let error = config_error("ncv (4) must be at least nev (6)");
        assert_eq!(
            error.to_string(),
            "Invalid solver configuration: ncv (4) must be at least nev (6)"
        );
        assert!(error.is_configuration());
        assert!(!error.is_consistency());
    }

    #[test]
    fn test_dimension_mismatch_error_message() {
        let error = DavidsonError(DavidsonErrorKind::DimensionMismatch {
            context: "operator B",
            expected: 100,
            actual: 99,
        });
        assert_eq!(
            error.to_string(),
            "Dimension mismatch in operator B: expected 100, found 99."
        );
        assert!(error.is_configuration());
    }

    #[test]
    fn test_consistency_error_message() {
        let error = consistency_error("size_V = 4 but size_H = 3");
        assert_eq!(error.to_string(), "Consistency broken: size_V = 4 but size_H = 3");
        assert!(error.is_consistency());
    }

    #[test]
    fn test_overclaim_error_message() {
        let error = DavidsonError(DavidsonErrorKind::PlannerOverclaim {
            resource: "vectors",
            requested: 12,
            available: 10,
        });
        assert_eq!(
            error.to_string(),
            "Resource planner over-claim: vectors requested 12 but only 10 were declared."
        );
        assert!(error.is_consistency());
    }

    #[test]
    fn test_evd_error_message() {
        let evd_error = faer::linalg::evd::EvdError::NoConvergence;
        let error = DavidsonError(DavidsonErrorKind::EvdError(evd_error));
        let expected_message = "A numerical error occurred during the eigendecomposition of the projected matrix: NoConvergence";
        assert_eq!(error.to_string(), expected_message);
    }

    #[test]
    fn test_errors_compare_by_kind() {
        assert_eq!(config_error("a"), config_error("a"));
        assert_ne!(config_error("a"), consistency_error("a"));
    }
}
