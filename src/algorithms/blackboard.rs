//! Two-phase storage planner for one solve.
//!
//! The storage a solve needs depends on the problem shape (standard or generalized,
//! Hermitian or not, extraction mode), and every pipeline step knows only its own
//! share. Planning therefore runs in two phases:
//!
//! 1. **Declaration.** Each step receives the [`Planner`] and declares how many basis
//!    vectors and how many dense scalars it owns, plus the largest transient scratch it
//!    may need. Owned declarations return opaque tokens; nothing is allocated yet.
//! 2. **Allocation.** [`Planner::allocate`] consumes the planner and produces the
//!    [`Blackboard`]: one vector pool (an `n x total` matrix) and one scalar pool. Each
//!    step then exchanges its tokens for disjoint [`VecSlot`]/[`ScalarSlot`] ranges.
//!
//! Scratch space is shared: its size is the maximum over all declarations, since steps
//! never run at the same time. Claiming more than was declared, claiming a token twice,
//! or leaving a declaration unclaimed is a consistency error.

use crate::{
    dense::ZERO,
    error::{DavidsonError, DavidsonErrorKind, consistency_error},
};
use faer::{
    Accum, Mat, MatMut, MatRef, Par, c64,
    linalg::matmul::matmul,
    prelude::{Reborrow, ReborrowMut},
};
use std::ops::Range;

/// Token returned by [`Planner::declare_vecs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VecToken(usize);

/// Token returned by [`Planner::declare_scalars`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalarToken(usize);

/// A range of columns of the vector pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VecSlot {
    pub start: usize,
    pub len: usize,
}

impl VecSlot {
    /// Columns `range` of this slot inside a read-only view of the whole pool.
    pub fn view<'m>(&self, pool: MatRef<'m, c64>, range: Range<usize>) -> MatRef<'m, c64> {
        debug_assert!(range.end <= self.len);
        pool.subcols(self.start + range.start, range.len())
    }
}

/// A range of the scalar pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScalarSlot {
    pub start: usize,
    pub len: usize,
}

/// Totals gathered during the declaration phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Requirements {
    pub own_vecs: usize,
    pub own_scalars: usize,
    pub max_aux_vecs: usize,
    pub max_aux_scalars: usize,
}

/// Declaration phase of the planner.
#[derive(Debug, Default)]
pub struct Planner {
    vec_requests: Vec<usize>,
    scalar_requests: Vec<usize>,
    max_aux_vecs: usize,
    max_aux_scalars: usize,
}

impl Planner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_vecs(&mut self, len: usize) -> VecToken {
        self.vec_requests.push(len);
        VecToken(self.vec_requests.len() - 1)
    }

    pub fn declare_scalars(&mut self, len: usize) -> ScalarToken {
        self.scalar_requests.push(len);
        ScalarToken(self.scalar_requests.len() - 1)
    }

    pub fn declare_aux_vecs(&mut self, len: usize) {
        self.max_aux_vecs = self.max_aux_vecs.max(len);
    }

    pub fn declare_aux_scalars(&mut self, len: usize) {
        self.max_aux_scalars = self.max_aux_scalars.max(len);
    }

    pub fn requirements(&self) -> Requirements {
        Requirements {
            own_vecs: self.vec_requests.iter().sum(),
            own_scalars: self.scalar_requests.iter().sum(),
            max_aux_vecs: self.max_aux_vecs,
            max_aux_scalars: self.max_aux_scalars,
        }
    }

    /// Allocates both pools for vectors of length `n`. This is the only allocation.
    pub fn allocate(self, n: usize) -> Blackboard {
        let req = self.requirements();
        let offsets = |requests: &[usize]| {
            requests
                .iter()
                .scan(0usize, |acc, &len| {
                    let start = *acc;
                    *acc += len;
                    Some(start)
                })
                .collect::<Vec<_>>()
        };
        log::debug!(
            "Blackboard: {} + {} scratch vectors, {} + {} scratch scalars",
            req.own_vecs,
            req.max_aux_vecs,
            req.own_scalars,
            req.max_aux_scalars
        );
        Blackboard {
            vecs: Mat::zeros(n, req.own_vecs + req.max_aux_vecs),
            scalars: vec![ZERO; req.own_scalars + req.max_aux_scalars],
            vec_offsets: offsets(&self.vec_requests),
            scalar_offsets: offsets(&self.scalar_requests),
            vec_claimed: vec![false; self.vec_requests.len()],
            scalar_claimed: vec![false; self.scalar_requests.len()],
            vec_requests: self.vec_requests,
            scalar_requests: self.scalar_requests,
            req,
        }
    }
}

/// Allocation phase: the shared pools and the bookkeeping of who claimed what.
#[derive(Debug)]
pub struct Blackboard {
    vecs: Mat<c64>,
    scalars: Vec<c64>,
    vec_requests: Vec<usize>,
    scalar_requests: Vec<usize>,
    vec_offsets: Vec<usize>,
    scalar_offsets: Vec<usize>,
    vec_claimed: Vec<bool>,
    scalar_claimed: Vec<bool>,
    req: Requirements,
}

impl Blackboard {
    pub fn requirements(&self) -> Requirements {
        self.req
    }

    /// Vector length `n`.
    pub fn dim(&self) -> usize {
        self.vecs.nrows()
    }

    /// Exchanges a vector token for `len` columns of the pool.
    pub fn claim_vecs(&mut self, token: VecToken, len: usize) -> Result<VecSlot, DavidsonError> {
        let declared = self.vec_requests[token.0];
        if len > declared {
            return Err(DavidsonErrorKind::PlannerOverclaim {
                resource: "vectors",
                requested: len,
                available: declared,
            }
            .into());
        }
        if std::mem::replace(&mut self.vec_claimed[token.0], true) {
            return Err(consistency_error("a vector slot was claimed twice"));
        }
        Ok(VecSlot {
            start: self.vec_offsets[token.0],
            len,
        })
    }

    /// Exchanges a scalar token for `len` entries of the pool.
    pub fn claim_scalars(
        &mut self,
        token: ScalarToken,
        len: usize,
    ) -> Result<ScalarSlot, DavidsonError> {
        let declared = self.scalar_requests[token.0];
        if len > declared {
            return Err(DavidsonErrorKind::PlannerOverclaim {
                resource: "scalars",
                requested: len,
                available: declared,
            }
            .into());
        }
        if std::mem::replace(&mut self.scalar_claimed[token.0], true) {
            return Err(consistency_error("a scalar slot was claimed twice"));
        }
        Ok(ScalarSlot {
            start: self.scalar_offsets[token.0],
            len,
        })
    }

    /// Shared vector scratch of `len` columns.
    pub fn aux_vecs(&self, len: usize) -> Result<VecSlot, DavidsonError> {
        if len > self.req.max_aux_vecs {
            return Err(DavidsonErrorKind::PlannerOverclaim {
                resource: "scratch vectors",
                requested: len,
                available: self.req.max_aux_vecs,
            }
            .into());
        }
        Ok(VecSlot {
            start: self.req.own_vecs,
            len,
        })
    }

    /// Two disjoint scalar scratch buffers of `len` entries each.
    pub fn aux_scalar_pair(&mut self, len: usize) -> Result<(&mut [c64], &mut [c64]), DavidsonError> {
        let (_, input, output) = self.split_scratch(len)?;
        Ok((input, output))
    }

    /// Read-only view of the vector pool alongside the scalar scratch pair.
    ///
    /// Reductions read basis blocks while writing their local contributions.
    pub fn split_scratch(
        &mut self,
        len: usize,
    ) -> Result<(MatRef<'_, c64>, &mut [c64], &mut [c64]), DavidsonError> {
        if 2 * len > self.req.max_aux_scalars {
            return Err(DavidsonErrorKind::PlannerOverclaim {
                resource: "scratch scalars",
                requested: 2 * len,
                available: self.req.max_aux_scalars,
            }
            .into());
        }
        let aux = &mut self.scalars[self.req.own_scalars..];
        let (input, rest) = aux.split_at_mut(len);
        Ok((self.vecs.as_ref(), input, &mut rest[..len]))
    }

    /// Checks that every declaration was claimed.
    pub fn finish(&self) -> Result<(), DavidsonError> {
        let unclaimed_vecs = self.vec_claimed.iter().filter(|c| !**c).count();
        let unclaimed_scalars = self.scalar_claimed.iter().filter(|c| !**c).count();
        if unclaimed_vecs + unclaimed_scalars > 0 {
            return Err(consistency_error(format!(
                "{unclaimed_vecs} vector and {unclaimed_scalars} scalar declarations were never claimed"
            )));
        }
        Ok(())
    }

    pub fn cols(&self, slot: VecSlot, range: Range<usize>) -> MatRef<'_, c64> {
        debug_assert!(range.end <= slot.len);
        self.vecs.as_ref().subcols(slot.start + range.start, range.len())
    }

    pub fn cols_mut(&mut self, slot: VecSlot, range: Range<usize>) -> MatMut<'_, c64> {
        debug_assert!(range.end <= slot.len);
        self.vecs
            .as_mut()
            .subcols_mut(slot.start + range.start, range.len())
    }

    /// Writes `src` into the columns of `slot` starting at `first`.
    pub fn set_cols(&mut self, slot: VecSlot, first: usize, src: MatRef<'_, c64>) {
        self.cols_mut(slot, first..first + src.ncols()).copy_from(src);
    }

    /// Replaces the first `mt.nrows()` columns of `slot` by their combination `X * mt`.
    ///
    /// The product goes through the vector scratch, which must hold `mt.ncols()` columns.
    pub fn transform_cols(&mut self, slot: VecSlot, mt: MatRef<'_, c64>) -> Result<(), DavidsonError> {
        let k = mt.ncols();
        let aux = self.aux_vecs(k)?;
        let (mut own, scratch) = self.vecs.as_mut().split_at_col_mut(aux.start);
        let mut scratch = scratch.subcols_mut(0, k);
        matmul(
            scratch.rb_mut(),
            Accum::Replace,
            own.rb().subcols(slot.start, mt.nrows()),
            mt,
            crate::dense::ONE,
            Par::Seq,
        );
        own.rb_mut().subcols_mut(slot.start, k).copy_from(scratch.rb());
        Ok(())
    }

    /// Loads a `rows x cols` block stored column-major with leading dimension `ld`.
    pub fn load(&self, slot: ScalarSlot, ld: usize, rows: usize, cols: usize) -> Mat<c64> {
        debug_assert!(rows <= ld && cols * ld <= slot.len);
        let data = &self.scalars[slot.start..slot.start + slot.len];
        Mat::from_fn(rows, cols, |i, j| data[i + j * ld])
    }

    /// Stores `m` column-major with leading dimension `ld`.
    pub fn store(&mut self, slot: ScalarSlot, ld: usize, m: MatRef<'_, c64>) {
        debug_assert!(m.nrows() <= ld && m.ncols() * ld <= slot.len);
        let data = &mut self.scalars[slot.start..slot.start + slot.len];
        for j in 0..m.ncols() {
            for i in 0..m.nrows() {
                data[i + j * ld] = m[(i, j)];
            }
        }
    }

    /// Total pool sizes `(vectors, scalars)`.
    pub fn capacity(&self) -> (usize, usize) {
        (self.vecs.ncols(), self.scalars.len())
    }
}
