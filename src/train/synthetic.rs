//! Synthetic collaborators for simulated runs and benchmarks
//!
//! [`SyntheticBatchLoop`] produces a noisy, exponentially decaying loss per
//! optimizer and tbptt split, so loop behaviour (accumulation, early epoch
//! exit, multi-optimizer outputs) can be exercised without a model.

use super::collaborators::{BatchLoop, EvaluationLoop};
use super::logging::Metrics;
use super::output::{BatchOutput, StepResult};
use crate::error::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Shape and dynamics of a simulated model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyntheticConfig {
    pub batches_per_epoch: usize,
    pub num_optimizers: usize,
    pub tbptt_splits: usize,
    pub initial_loss: f32,
    /// Multiplicative loss decay per optimizer step
    pub decay: f32,
    /// Amplitude of uniform noise added to each loss
    pub noise: f32,
    /// Emit reducible results with this epoch-end flag instead of plain ones
    pub reduce_on_epoch_end: Option<bool>,
    /// Signal an early epoch end at this batch index
    pub stop_epoch_at: Option<usize>,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            batches_per_epoch: 20,
            num_optimizers: 1,
            tbptt_splits: 1,
            initial_loss: 2.0,
            decay: 0.98,
            noise: 0.05,
            reduce_on_epoch_end: None,
            stop_epoch_at: None,
            seed: 42,
        }
    }
}

impl SyntheticConfig {
    pub fn check(&self) -> Result<()> {
        if self.num_optimizers == 0 || self.tbptt_splits == 0 {
            return Err(Error::InvalidParameter(
                "num_optimizers and tbptt_splits must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.decay) {
            return Err(Error::InvalidParameter(format!(
                "decay must be within [0.0, 1.0], got {}",
                self.decay
            )));
        }
        Ok(())
    }
}

/// Batch loop producing synthetic step results
#[derive(Debug)]
pub struct SyntheticBatchLoop {
    config: SyntheticConfig,
    rng: StdRng,
    accumulate_grad_batches: usize,
    optimizer_steps: usize,
    batches_trained: usize,
    /// Index within the epoch of the last trained batch
    last_batch_idx: Option<usize>,
}

impl SyntheticBatchLoop {
    pub fn new(config: SyntheticConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            accumulate_grad_batches: 1,
            optimizer_steps: 0,
            batches_trained: 0,
            last_batch_idx: None,
        }
    }

    pub fn batches_trained(&self) -> usize {
        self.batches_trained
    }

    fn loss(&mut self, opt_idx: usize) -> f32 {
        let base = self.config.initial_loss
            * self.config.decay.powi(self.optimizer_steps as i32)
            * (1.0 + opt_idx as f32 * 0.1);
        base + self.config.noise * self.rng.random::<f32>()
    }

    fn step_result(&mut self, opt_idx: usize) -> StepResult {
        let loss = self.loss(opt_idx);
        let result = match self.config.reduce_on_epoch_end {
            Some(flag) => StepResult::reducible(loss, flag),
            None => StepResult::new(loss),
        };
        result.with_extra("acc", 1.0 / (1.0 + loss))
    }
}

impl BatchLoop<usize> for SyntheticBatchLoop {
    fn run(&mut self, _batch: &usize, batch_idx: usize, _dataloader_idx: usize) -> Result<BatchOutput> {
        if self.config.stop_epoch_at == Some(batch_idx) {
            return Ok(BatchOutput::stop_epoch());
        }

        let splits = self.config.tbptt_splits;
        let outputs: Vec<Vec<StepResult>> = (0..self.config.num_optimizers)
            .map(|opt_idx| (0..splits).map(|_| self.step_result(opt_idx)).collect())
            .collect();

        self.batches_trained += 1;
        self.last_batch_idx = Some(batch_idx);
        if self.accumulated_batches_reached() {
            self.optimizer_steps += 1;
        }
        Ok(BatchOutput::new(outputs))
    }

    /// Windows restart with every epoch, so they follow `batch_idx`
    fn accumulated_batches_reached(&self) -> bool {
        self.last_batch_idx
            .is_some_and(|idx| (idx + 1) % self.accumulate_grad_batches == 0)
    }

    fn set_accumulate_grad_batches(&mut self, batches: usize) -> Result<()> {
        self.accumulate_grad_batches = batches.max(1);
        Ok(())
    }
}

/// Evaluation loop reporting a decaying `val_loss`
#[derive(Debug)]
pub struct SyntheticEvaluator {
    initial_loss: f32,
    decay: f32,
    noise: f32,
    rng: StdRng,
}

impl SyntheticEvaluator {
    pub fn new(config: &SyntheticConfig) -> Self {
        Self {
            initial_loss: config.initial_loss,
            decay: config.decay,
            noise: config.noise,
            rng: StdRng::seed_from_u64(config.seed.wrapping_add(1)),
        }
    }
}

impl EvaluationLoop for SyntheticEvaluator {
    fn run(&mut self, _current_epoch: usize, global_step: usize) -> Result<Metrics> {
        let val_loss = self.initial_loss * self.decay.powi(global_step as i32) * 1.05
            + self.noise * self.rng.random::<f32>();
        Ok(Metrics::from([("val_loss".to_string(), val_loss)]))
    }
}
