//! Batching of collective sum-reductions.
//!
//! Building the projected matrices needs inner products between basis blocks. In a
//! distributed setting each process computes its local contribution and the results
//! are summed across processes. When one iteration extends both `H` and `G`, issuing
//! one collective per matrix doubles the synchronization latency.
//!
//! A [`ReductionBatch`] is a small transaction: operations are registered with a
//! copy-in callback that writes their local contribution into a sub-range of one
//! shared input buffer, [`ReductionBatch::end`] runs every callback, issues exactly one
//! [`Collective::all_reduce_sum`] over the concatenated buffer, and hands the reduced
//! sub-ranges back through [`Reduced::chunk`]. All operations of a batch therefore
//! observe the same basis snapshot.

use crate::error::{DavidsonError, consistency_error};
use faer::c64;

/// A process group able to sum a buffer of scalars across all its members.
pub trait Collective {
    /// Element-wise sum of `input` over all processes, written to `output`.
    ///
    /// Both slices have the same length. The call is a barrier.
    fn all_reduce_sum(&self, input: &[c64], output: &mut [c64]);
}

/// The trivial group of one process: the reduction is a copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl Collective for SingleProcess {
    fn all_reduce_sum(&self, input: &[c64], output: &mut [c64]) {
        output.copy_from_slice(input);
    }
}

/// Handle of a registered operation inside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    start: usize,
    len: usize,
}

type CopyIn<'b> = Box<dyn FnOnce(&mut [c64]) + 'b>;

/// An open batch of reductions sharing one input and one output buffer.
pub struct ReductionBatch<'b> {
    collective: &'b dyn Collective,
    input: &'b mut [c64],
    output: &'b mut [c64],
    max_ops: usize,
    used: usize,
    ops: Vec<(Chunk, CopyIn<'b>)>,
}

impl<'b> ReductionBatch<'b> {
    /// Opens a batch of at most `max_ops` operations over the given buffers.
    pub fn begin(
        collective: &'b dyn Collective,
        max_ops: usize,
        input: &'b mut [c64],
        output: &'b mut [c64],
    ) -> Self {
        Self {
            collective,
            input,
            output,
            max_ops,
            used: 0,
            ops: Vec::with_capacity(max_ops),
        }
    }

    /// Registers an operation of `len` scalars whose local values are written by `copy_in`.
    pub fn register(
        &mut self,
        len: usize,
        copy_in: impl FnOnce(&mut [c64]) + 'b,
    ) -> Result<Chunk, DavidsonError> {
        if self.ops.len() == self.max_ops {
            return Err(consistency_error(format!(
                "reduction batch opened for {} operations received one more",
                self.max_ops
            )));
        }
        if self.used + len > self.input.len().min(self.output.len()) {
            return Err(consistency_error(format!(
                "reduction batch buffer of {} scalars cannot hold {} more",
                self.input.len(),
                len
            )));
        }
        let chunk = Chunk {
            start: self.used,
            len,
        };
        self.used += len;
        self.ops.push((chunk, Box::new(copy_in)));
        Ok(chunk)
    }

    /// Runs the copy-ins, performs the single collective and returns the reduced values.
    pub fn end(self) -> Reduced<'b> {
        let total = self.used;
        for (chunk, copy_in) in self.ops {
            copy_in(&mut self.input[chunk.start..chunk.start + chunk.len]);
        }
        if total > 0 {
            self.collective
                .all_reduce_sum(&self.input[..total], &mut self.output[..total]);
        }
        let output: &'b [c64] = self.output;
        Reduced {
            output: &output[..total],
        }
    }
}

/// Reduced values of a finished batch.
#[derive(Debug)]
pub struct Reduced<'b> {
    output: &'b [c64],
}

impl Reduced<'_> {
    pub fn chunk(&self, chunk: Chunk) -> &[c64] {
        &self.output[chunk.start..chunk.start + chunk.len]
    }
}


#[cfg(test)]
mod tests {
    use super::test_utils::CountingCollective;
    use super::*;

    fn c(x: f64) -> c64 {
        c64::new(x, 0.0)
    }

    /// Pretends to be one of `size` processes holding identical local values.
    struct Replicated {
        size: f64,
    }

    impl Collective for Replicated {
        fn all_reduce_sum(&self, input: &[c64], output: &mut [c64]) {
            for (o, i) in output.iter_mut().zip(input) {
                *o = *i * self.size;
            }
        }
    }

    #[test]
    fn test_one_collective_for_many_operations() {
        let counter = CountingCollective::default();
        let mut input = vec![c(0.0); 8];
        let mut output = vec![c(0.0); 8];
        let mut batch = ReductionBatch::begin(&counter, 3, &mut input, &mut output);
        let a = batch
            .register(2, |buf| buf.copy_from_slice(&[c(1.0), c(2.0)]))
            .unwrap();
        let b = batch.register(3, |buf| buf.fill(c(7.0))).unwrap();
        let reduced = batch.end();
        assert_eq!(counter.calls.get(), 1);
        assert_eq!(reduced.chunk(a), &[c(1.0), c(2.0)]);
        assert_eq!(reduced.chunk(b), &[c(7.0); 3]);
    }

    #[test]
    fn test_reduced_values_are_fanned_out() {
        let group = Replicated { size: 4.0 };
        let mut input = vec![c(0.0); 4];
        let mut output = vec![c(0.0); 4];
        let mut batch = ReductionBatch::begin(&group, 2, &mut input, &mut output);
        let a = batch.register(1, |buf| buf[0] = c(0.5)).unwrap();
        let b = batch.register(3, |buf| buf.fill(c(1.0))).unwrap();
        let reduced = batch.end();
        assert_eq!(reduced.chunk(a), &[c(2.0)]);
        assert_eq!(reduced.chunk(b), &[c(4.0); 3]);
    }

    #[test]
    fn test_capacity_is_enforced() {
        let group = SingleProcess;
        let mut input = vec![c(0.0); 2];
        let mut output = vec![c(0.0); 2];
        let mut batch = ReductionBatch::begin(&group, 1, &mut input, &mut output);
        assert!(batch.register(3, |_| {}).unwrap_err().is_consistency());
        batch.register(2, |_| {}).unwrap();
        assert!(batch.register(0, |_| {}).unwrap_err().is_consistency());
    }

    #[test]
    fn test_empty_batch_skips_the_collective() {
        let counter = CountingCollective::default();
        let mut input: Vec<c64> = Vec::new();
        let mut output: Vec<c64> = Vec::new();
        let batch = ReductionBatch::begin(&counter, 2, &mut input, &mut output);
        let _ = batch.end();
        assert_eq!(counter.calls.get(), 0);
    }
}
