//! The outer fit loop
//!
//! Repeats training epochs until `max_epochs` or `max_steps` is reached, or a
//! stop request is honoured. A stop request only takes effect once both
//! `min_epochs` and `min_steps` are satisfied; before that it is cleared and
//! training continues.

use super::collaborators::BatchLoop;
use super::data::known_len;
use super::epoch_loop::TrainingEpochLoop;
use super::output::ProcessedOutput;
use super::state::Progress;
use super::trainer::Trainer;
use crate::error::Result;
use crate::optim::Interval;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Why the fit loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxEpochs,
    MaxSteps,
    /// A stop request was honoured
    Requested,
}

/// Result of a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub epochs_completed: usize,
    pub progress: Progress,
    pub stop_reason: StopReason,
    /// Processed outputs of the last completed epoch
    pub last_epoch_outputs: ProcessedOutput,
    /// Best epoch-averaged loss, if any epoch logged one
    pub best_loss: Option<f32>,
    /// Total training time in seconds
    pub elapsed_secs: f64,
}

impl FitResult {
    pub fn stopped_early(&self) -> bool {
        self.stop_reason == StopReason::Requested
    }
}

/// Runs epochs back to back
pub struct FitLoop<B> {
    batch_loop: Box<dyn BatchLoop<B>>,
    progress: Progress,
    current_epoch: usize,
}

impl<B: 'static> FitLoop<B> {
    pub fn new(batch_loop: Box<dyn BatchLoop<B>>) -> Self {
        Self {
            batch_loop,
            progress: Progress::default(),
            current_epoch: 0,
        }
    }

    /// Resume from saved counters
    pub fn with_progress(mut self, progress: Progress, current_epoch: usize) -> Self {
        self.progress = progress;
        self.current_epoch = current_epoch;
        self
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    pub fn current_epoch(&self) -> usize {
        self.current_epoch
    }

    /// Check the stop conditions before starting `epoch`
    fn stop_reason(&self, trainer: &mut Trainer<B>) -> Option<StopReason> {
        let config = trainer.config();
        if self.current_epoch >= config.max_epochs {
            return Some(StopReason::MaxEpochs);
        }
        if config
            .max_steps
            .is_some_and(|max| self.progress.global_step >= max)
        {
            return Some(StopReason::MaxSteps);
        }
        if trainer.state.should_stop {
            let met_min_epochs = self.current_epoch >= config.min_epochs;
            let met_min_steps = config
                .min_steps
                .map_or(true, |min| self.progress.global_step >= min);
            if met_min_epochs && met_min_steps {
                return Some(StopReason::Requested);
            }
            info!(
                min_epochs = config.min_epochs,
                min_steps = ?config.min_steps,
                "stop requested before the minimum epochs or steps were met; training continues"
            );
            trainer.state.should_stop = false;
        }
        None
    }

    /// Train until a stop condition holds
    ///
    /// `train_dataloader` is called once per epoch with the epoch index. Its
    /// size hint decides whether the epoch length is known.
    pub fn fit<F, I>(&mut self, trainer: &mut Trainer<B>, mut train_dataloader: F) -> Result<FitResult>
    where
        F: FnMut(usize) -> I,
        I: IntoIterator<Item = B>,
        I::IntoIter: 'static,
    {
        trainer.config().check()?;
        self.batch_loop
            .set_accumulate_grad_batches(trainer.config().accumulate_grad_batches)?;
        trainer.mark_started();

        let ctx = trainer.build_context(&self.progress, 0, None);
        trainer.call_on_train_start(&ctx);

        let mut epochs_completed = 0;
        let mut last_epoch_outputs = ProcessedOutput::default();

        let stop_reason = loop {
            if let Some(reason) = self.stop_reason(trainer) {
                break reason;
            }
            let epoch = self.current_epoch;
            trainer.state.current_epoch = epoch;

            let batches = train_dataloader(epoch).into_iter();
            trainer.reset_train_dataloader(known_len(&batches))?;

            let ctx = trainer.build_context(&self.progress, 0, None);
            trainer.call_on_train_epoch_start(&ctx)?;

            let config = trainer.config();
            let (min_steps, max_steps) = (config.min_steps, config.max_steps);
            let mut epoch_loop =
                TrainingEpochLoop::new(self.batch_loop.as_mut(), self.progress, min_steps, max_steps);
            let outputs = epoch_loop.run(trainer, Box::new(batches))?;

            self.progress = epoch_loop.progress();
            let epoch_state = epoch_loop.state().clone();

            if epoch_state.batches_seen > 0 {
                let should_check_val = trainer.validation_schedule().should_check(
                    epoch,
                    trainer.state.should_stop,
                    epoch_state.batch_idx,
                    epoch_state.is_last_batch,
                    true,
                );
                if should_check_val {
                    trainer.run_evaluation(&self.progress)?;
                }
            }

            let metrics = trainer.logger().callback_metrics().clone();
            trainer
                .schedulers_mut()
                .update_learning_rates(Interval::Epoch, &metrics)?;

            debug!(
                epoch,
                global_step = self.progress.global_step,
                min_steps_reached = epoch_state.min_steps_reached(self.progress.global_step),
                "epoch complete"
            );

            epochs_completed += 1;
            last_epoch_outputs = outputs;
            self.current_epoch = epoch + 1;
        };

        let ctx = trainer.build_context(&self.progress, 0, None);
        trainer.call_on_train_end(&ctx);

        info!(
            epochs = epochs_completed,
            global_step = self.progress.global_step,
            reason = ?stop_reason,
            "training finished"
        );

        Ok(FitResult {
            epochs_completed,
            progress: self.progress,
            stop_reason,
            last_epoch_outputs,
            best_loss: trainer.logger().best("loss_epoch"),
            elapsed_secs: trainer.elapsed_secs(),
        })
    }
}
