//! This module defines the abstraction the eigensolver uses for the problem operators.
//!
//! A Davidson-type method never reads individual entries of `A` or `B`. Every access
//! goes through a block matrix-vector product that maps the newest basis columns onto
//! the operator-applied bases `AV` and `BV`. Anything that can perform that product
//! (a dense matrix, a diagonal, a user closure around a simulation) can therefore be
//! handed to the engine.
//!
//! Besides the product, an operator may expose its diagonal. The Jacobi correction
//! solver in [`crate::correction`] uses it to build a shifted diagonal preconditioner.

use faer::{Mat, MatMut, MatRef, prelude::Reborrow, traits::ComplexField};

/// Represents a linear operator that can be applied to a block of vectors.
///
/// # Type Parameters
///
/// *   `T`: The scalar type, which must implement `ComplexField`. The engine itself
///     works with [`faer::c64`]; real operators are supplied with zero imaginary parts.
///
/// # Example
///
/// ```
/// use davidson_engine::matrix::LinearOperator;
/// use faer::{Mat, c64};
///
/// let a = Mat::from_fn(3, 3, |i, j| if i == j { c64::new(i as f64 + 1.0, 0.0) } else { c64::new(0.0, 0.0) });
/// let x = Mat::from_fn(3, 1, |_, _| c64::new(1.0, 0.0));
/// let y = a.apply(x.as_ref());
/// assert_eq!(y[(2, 0)], c64::new(3.0, 0.0));
/// ```
pub trait LinearOperator<T: ComplexField> {
    /// Returns the number of rows of the operator.
    fn nrows(&self) -> usize;

    /// Returns the number of columns of the operator.
    fn ncols(&self) -> usize;

    /// Applies the operator to every column of `rhs` and returns the owned result `A * rhs`.
    ///
    /// # Panics
    ///
    /// Implementations are expected to panic if the inner dimensions do not match.
    fn apply(&self, rhs: MatRef<'_, T>) -> Mat<T>;

    /// Returns the main diagonal of the operator, if it is cheaply available.
    fn diagonal(&self) -> Option<Vec<T>> {
        None
    }
}

impl<'a, T: ComplexField> LinearOperator<T> for MatRef<'a, T> {
    #[inline]
    fn nrows(&self) -> usize {
        self.nrows()
    }

    #[inline]
    fn ncols(&self) -> usize {
        self.ncols()
    }

    #[inline]
    fn apply(&self, rhs: MatRef<'_, T>) -> Mat<T> {
        assert_eq!(
            self.ncols(),
            rhs.nrows(),
            "Dimension mismatch: operator columns ({}) do not match vector rows ({}).",
            self.ncols(),
            rhs.nrows(),
        );
        self * rhs
    }

    fn diagonal(&self) -> Option<Vec<T>> {
        let n = self.nrows().min(self.ncols());
        Some((0..n).map(|i| T::copy_impl(&self[(i, i)])).collect())
    }
}

impl<'a, T: ComplexField> LinearOperator<T> for MatMut<'a, T> {
    #[inline]
    fn nrows(&self) -> usize {
        self.rb().nrows()
    }

    #[inline]
    fn ncols(&self) -> usize {
        self.rb().ncols()
    }

    #[inline]
    fn apply(&self, rhs: MatRef<'_, T>) -> Mat<T> {
        self.rb().apply(rhs)
    }

    fn diagonal(&self) -> Option<Vec<T>> {
        LinearOperator::diagonal(&self.rb())
    }
}

impl<T: ComplexField> LinearOperator<T> for Mat<T> {
    #[inline]
    fn nrows(&self) -> usize {
        self.as_ref().nrows()
    }

    #[inline]
    fn ncols(&self) -> usize {
        self.as_ref().ncols()
    }

    #[inline]
    fn apply(&self, rhs: MatRef<'_, T>) -> Mat<T> {
        self.as_ref().apply(rhs)
    }

    fn diagonal(&self) -> Option<Vec<T>> {
        LinearOperator::diagonal(&self.as_ref())
    }
}

/// A diagonal operator `diag(d_0, ..., d_{n-1})` stored as its entries only.
///
/// Diagonal operators have a trivially known spectrum, which makes them the
/// workhorse of the convergence experiments and of the integration tests.
#[derive(Debug, Clone)]
pub struct DiagonalOperator<T> {
    entries: Vec<T>,
}

impl<T: ComplexField> DiagonalOperator<T> {
    pub fn new(entries: Vec<T>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[T] {
        &self.entries
    }
}

impl<T: ComplexField> LinearOperator<T> for DiagonalOperator<T> {
    fn nrows(&self) -> usize {
        self.entries.len()
    }

    fn ncols(&self) -> usize {
        self.entries.len()
    }

    fn apply(&self, rhs: MatRef<'_, T>) -> Mat<T> {
        assert_eq!(
            self.entries.len(),
            rhs.nrows(),
            "Dimension mismatch: operator columns ({}) do not match vector rows ({}).",
            self.entries.len(),
            rhs.nrows(),
        );
        Mat::from_fn(rhs.nrows(), rhs.ncols(), |i, j| {
            faer::traits::math_utils::mul(&self.entries[i], &rhs[(i, j)])
        })
    }

    fn diagonal(&self) -> Option<Vec<T>> {
        Some(self.entries.iter().map(T::copy_impl).collect())
    }
}
