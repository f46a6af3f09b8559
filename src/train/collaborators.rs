//! Collaborators driven by the epoch loop
//!
//! The epoch loop does not compute gradients, talk to devices or evaluate.
//! It delegates those to the traits below.

use super::logging::Metrics;
use super::output::{BatchOutput, ProcessedOutput};
use crate::error::{Error, Result};

/// Runs the optimization work for one batch
pub trait BatchLoop<B> {
    /// Train on `batch`, returning per-optimizer, per-split step results
    fn run(&mut self, batch: &B, batch_idx: usize, dataloader_idx: usize) -> Result<BatchOutput>;

    /// True when the last batch closed a gradient accumulation window
    fn accumulated_batches_reached(&self) -> bool;

    /// Receive the trainer's `accumulate_grad_batches` before the first epoch
    ///
    /// Loops that step the optimizer on every batch keep the default, which
    /// rejects any window wider than one batch.
    fn set_accumulate_grad_batches(&mut self, batches: usize) -> Result<()> {
        if batches > 1 {
            return Err(Error::Misconfiguration(format!(
                "accumulate_grad_batches is {batches}, but the batch loop steps on every batch"
            )));
        }
        Ok(())
    }
}

/// Backend that owns devices and provides hook defaults
///
/// Every method has a default, so a plain CPU run needs no implementation
/// beyond [`DefaultAccelerator`].
pub trait Accelerator<B>: Send {
    /// Wrap the epoch's dataloader (device transfer, sharding)
    fn process_dataloader(
        &mut self,
        dataloader: Box<dyn Iterator<Item = B>>,
    ) -> Box<dyn Iterator<Item = B>> {
        dataloader
    }

    /// New global step after an optimizer boundary
    fn update_global_step(&mut self, _total_batch_idx: usize, current_global_step: usize) -> usize {
        current_global_step + 1
    }

    fn is_global_zero(&self) -> bool {
        true
    }

    fn on_train_epoch_start(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_train_batch_end(
        &mut self,
        _outputs: &ProcessedOutput,
        _batch_idx: usize,
        _dataloader_idx: usize,
    ) -> Result<()> {
        Ok(())
    }

    fn on_batch_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_train_epoch_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_epoch_end(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Single-process accelerator with no-op hooks
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAccelerator;

impl<B> Accelerator<B> for DefaultAccelerator {}

/// Runs validation and reports its metrics
pub trait EvaluationLoop: Send {
    fn run(&mut self, current_epoch: usize, global_step: usize) -> Result<Metrics>;
}
