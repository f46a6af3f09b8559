//! Epoch-end output retention
//!
//! Per-batch outputs are only kept when something will consume them at the
//! end of the epoch: either the step result asks for automatic reduction, or
//! the model registered an epoch-end hook. Otherwise they are dropped right
//! away so long epochs stay bounded in memory.

use super::hooks::ModelHooks;
use super::output::{BatchEntry, OutputTree, StepResult};

/// Per-optimizer buckets of retained batch entries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpochOutput {
    buckets: Vec<Vec<BatchEntry>>,
}

impl EpochOutput {
    /// Empty accumulator with one bucket per optimizer
    pub fn new(num_optimizers: usize) -> Self {
        Self {
            buckets: vec![Vec::new(); num_optimizers],
        }
    }

    /// Append an entry to an optimizer's bucket, growing the bucket list if needed
    pub fn push(&mut self, opt_idx: usize, entry: BatchEntry) {
        if self.buckets.len() <= opt_idx {
            self.buckets.resize_with(opt_idx + 1, Vec::new);
        }
        self.buckets[opt_idx].push(entry);
    }

    /// Merge another accumulator bucket by bucket, keeping batch order
    pub fn extend(&mut self, other: EpochOutput) {
        for (opt_idx, entries) in other.buckets.into_iter().enumerate() {
            for entry in entries {
                self.push(opt_idx, entry);
            }
        }
    }

    pub fn bucket(&self, opt_idx: usize) -> &[BatchEntry] {
        self.buckets.get(opt_idx).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Total retained entries across all optimizers
    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_tree(self) -> OutputTree {
        OutputTree::new(self.buckets)
    }
}

/// Decides which batch outputs are kept for epoch-end reduction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochEndAggregator {
    manual_reduction: bool,
}

impl EpochEndAggregator {
    /// `manual_reduction` is true when the model consumes epoch outputs itself
    pub fn new(manual_reduction: bool) -> Self {
        Self { manual_reduction }
    }

    pub fn for_model<B>(hooks: &ModelHooks<B>) -> Self {
        Self::new(hooks.has_training_epoch_end() || hooks.has_on_train_epoch_end())
    }

    pub fn manual_reduction(&self) -> bool {
        self.manual_reduction
    }

    /// Track one batch of `[optimizer][tbptt split]` outputs
    ///
    /// Returns the number of optimizer entries retained.
    pub fn track(&self, epoch_output: &mut EpochOutput, batch_outputs: &[Vec<StepResult>]) -> usize {
        let mut retained = 0;

        for (opt_idx, opt_outputs) in batch_outputs.iter().enumerate() {
            let Some(sample) = opt_outputs.last() else {
                continue;
            };

            if !(self.manual_reduction || sample.reduces_on_epoch_end()) {
                continue;
            }

            // no tbptt: keep the bare step instead of a one-element sequence
            let entry = match opt_outputs.as_slice() {
                [only] if !only.is_reducible() => BatchEntry::Single(only.clone()),
                steps => BatchEntry::Steps(steps.to_vec()),
            };
            epoch_output.push(opt_idx, entry);
            retained += 1;
        }

        retained
    }
}
