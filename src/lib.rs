//! Generalized Davidson subspace eigensolver built on faer.
//!
//! This crate computes a few eigenpairs of large standard (`A x = λ x`) and generalized
//! (`A x = λ B x`) eigenproblems, Hermitian or not, by expanding a low-dimensional search
//! subspace, projecting the operators onto it, solving the small dense problem, and then
//! locking converged pairs, restarting or expanding with a correction.
//!
//! The operators are only accessed through block products ([`matrix::LinearOperator`]),
//! so explicit matrices, diagonals or matrix-free closures all work.
//!
//! ## Architecture
//!
//! **Dashboard** ([`algorithms::dashboard`]): owns the state of one solve and runs a
//! pipeline of steps chosen once at setup from the problem shape:
//! - `initV` fills an empty subspace with user vectors, random vectors or a Krylov sequence;
//! - `calcPairs` projects incrementally: retained directions are never re-applied to the
//!   operators, only rotated, and the new blocks of `H` and `G` go through a single
//!   batched reduction;
//! - `updateV` locks converged pairs, performs thick restarts and expands the basis.
//!
//! **Resource planner** ([`algorithms::blackboard`]): every step declares its storage
//! first; one vector pool and one scalar pool are then allocated for the whole solve.
//!
//! **Dense projected-problem solver** ([`dense`]): Hermitian eigensolver, complex Schur
//! and QZ decompositions with reordering by the selection criterion.
//!
//! **Correction equation** ([`correction`]): the expansion directions come from a
//! pluggable [`correction::CorrectionSolver`], e.g. the Jacobi preconditioner of
//! generalized Davidson.
//!
//! ## Example Usage
//!
//! The following example computes the three largest eigenvalues of the 1D Laplacian
//! `tridiag(-1, 2, -1)` of order 40, whose spectrum is `2 - 2 cos(kπ/41)`.
//!
//! ```rust
//! use davidson_engine::{SolverConfig, davidson, correction::JacobiPreconditioner};
//! use faer::{Mat, c64};
//!
//! let n = 40;
//! let a = Mat::from_fn(n, n, |i, j| {
//!     if i == j { c64::new(2.0, 0.0) }
//!     else if i.abs_diff(j) == 1 { c64::new(-1.0, 0.0) }
//!     else { c64::new(0.0, 0.0) }
//! });
//!
//! let mut jacobi = JacobiPreconditioner::from_operator(&a).unwrap();
//! let config = SolverConfig::new(3).with_ncv(16).with_tol(1e-10).with_max_it(500);
//! let solution = davidson(&a, &config, &mut jacobi).unwrap();
//! assert!(solution.converged());
//!
//! let mut computed: Vec<f64> = solution.eigenvalues.iter().map(|l| l.re).collect();
//! computed.sort_by(|x, y| y.total_cmp(x));
//! for (k, value) in computed.iter().enumerate() {
//!     let m = (n - k) as f64;
//!     let exact = 2.0 - 2.0 * (m * std::f64::consts::PI / (n as f64 + 1.0)).cos();
//!     assert!((value - exact).abs() < 1e-8);
//! }
//! ```
//!
//! ## Distributed Reductions
//!
//! All inner products that build the projected matrices go through the
//! [`algorithms::reduction::Collective`] trait. The single-process implementation is a
//! copy; a message-passing implementation only has to provide the sum-reduction.

pub mod algorithms;
pub mod config;
pub mod correction;
pub mod dense;
pub mod error;
pub mod matrix;
pub mod solvers;

// Re-export the main API for convenient access.
pub use algorithms::dashboard::ConvergedReason;
pub use config::{Extraction, ProblemType, SolverConfig, Which};
pub use error::DavidsonError;
pub use solvers::{EigenProblem, EigenSolution, davidson, davidson_generalized, solve};
