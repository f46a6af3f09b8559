//! The training epoch loop
//!
//! Drives one pass over the training dataloader:
//!
//! ```text
//! start ─► while !is_done { advance ─► on_advance_end } ─► finish
//! ```
//!
//! `advance` pulls a batch, hands it to the [`BatchLoop`] and, unless the
//! batch loop asked to end the epoch, dispatches the batch-end hooks and
//! tracks outputs for the epoch end. `on_advance_end` runs mid-epoch
//! validation, flushes logs and advances the schedulers and the global step
//! on optimizer boundaries. `finish` collapses the retained outputs and runs
//! the epoch-end hook sequence.

use super::aggregate::{EpochEndAggregator, EpochOutput};
use super::collaborators::BatchLoop;
use super::data::TrainDataloader;
use super::output::{CollapseMode, OutputTree, ProcessedOutput, StepResult};
use super::profiler::profile;
use super::state::{EpochState, LoopState, Progress};
use super::trainer::{Trainer, RUN_TRAINING_BATCH};
use crate::error::{Error, Result};
use crate::optim::Interval;
use tracing::{debug, info};

/// What one `advance` call did
#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    /// A batch completed; carries the outputs retained for the epoch end
    Batch(EpochOutput),
    /// The batch loop signalled to end the epoch; nothing from this batch is kept
    Skipped,
    /// The dataloader had no more batches
    Exhausted,
}

/// Runs the batches of a single epoch
pub struct TrainingEpochLoop<'a, B> {
    batch_loop: &'a mut dyn BatchLoop<B>,
    progress: Progress,
    state: EpochState,
    loop_state: LoopState,
    dataloader: Option<TrainDataloader<B>>,
    aggregator: EpochEndAggregator,
}

impl<'a, B: 'static> TrainingEpochLoop<'a, B> {
    pub fn new(
        batch_loop: &'a mut dyn BatchLoop<B>,
        progress: Progress,
        min_steps: Option<usize>,
        max_steps: Option<usize>,
    ) -> Self {
        Self {
            batch_loop,
            progress,
            state: EpochState::new(min_steps, max_steps),
            loop_state: LoopState::NotStarted,
            dataloader: None,
            aggregator: EpochEndAggregator::new(false),
        }
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    pub fn state(&self) -> &EpochState {
        &self.state
    }

    pub fn loop_state(&self) -> LoopState {
        self.loop_state
    }

    /// Prepare for a new epoch over `dataloader`
    pub fn start(&mut self, trainer: &mut Trainer<B>, dataloader: Box<dyn Iterator<Item = B>>) {
        let dataloader = trainer.accelerator_mut().process_dataloader(dataloader);
        self.dataloader = Some(TrainDataloader::new(dataloader));
        self.state.reset();
        self.aggregator = EpochEndAggregator::for_model(trainer.model());
        self.loop_state = LoopState::Running;
        debug!(
            epoch = trainer.state.current_epoch,
            manual_reduction = self.aggregator.manual_reduction(),
            "epoch loop started"
        );
    }

    /// True when the epoch must end before pulling another batch
    ///
    /// Pure: reading the done state never changes a counter.
    pub fn is_done(&self, trainer: &Trainer<B>) -> bool {
        if self.loop_state == LoopState::Done || self.state.skip_remaining {
            return true;
        }
        let max_steps_reached = self.state.max_steps_reached(self.progress.global_step)
            && self.batch_loop.accumulated_batches_reached();
        max_steps_reached || trainer.state.should_stop || self.num_training_batches_reached(trainer)
    }

    fn num_training_batches_reached(&self, trainer: &Trainer<B>) -> bool {
        trainer
            .state
            .num_training_batches
            .reached_by(self.state.batches_seen)
            || self.state.is_last_batch
    }

    /// Run one batch
    pub fn advance(&mut self, trainer: &mut Trainer<B>) -> Result<Advance> {
        if self.loop_state != LoopState::Running {
            return Err(Error::InvalidParameter(
                "epoch loop advanced before start".into(),
            ));
        }
        let Some(dataloader) = self.dataloader.as_mut() else {
            return Ok(Advance::Exhausted);
        };
        let Some((batch_idx, (batch, is_last))) = dataloader.next() else {
            self.loop_state = LoopState::Done;
            return Ok(Advance::Exhausted);
        };

        self.state.batch_idx = batch_idx;
        self.state.is_last_batch = is_last;
        self.state.batches_seen += 1;
        self.progress.total_batch_idx += 1;

        let batch_output = {
            let _region = profile(trainer.profiler(), RUN_TRAINING_BATCH);
            self.batch_loop
                .run(&batch, batch_idx, self.state.dataloader_idx)
                .map_err(|e| match e {
                    Error::BatchLoop(_) | Error::Hook { .. } | Error::Misconfiguration(_) => e,
                    other => Error::BatchLoop(other.to_string()),
                })?
        };

        if batch_output.is_stop_epoch() {
            info!(
                epoch = trainer.state.current_epoch,
                batch_idx, "batch loop requested end of epoch"
            );
            self.state.skip_remaining = true;
            return Ok(Advance::Skipped);
        }

        let outputs = &batch_output.training_step_output_for_epoch_end;
        let mut epoch_output = EpochOutput::new(outputs.len());
        let processed =
            self.on_train_batch_end(trainer, &mut epoch_output, outputs, &batch, batch_idx)?;

        let should_stop = trainer.state.should_stop;
        trainer
            .logger_mut()
            .log_train_step_metrics(&processed, self.progress.global_step, should_stop)?;

        debug!(
            batch_idx,
            total_batch_idx = self.progress.total_batch_idx,
            retained = epoch_output.len(),
            "batch complete"
        );
        Ok(Advance::Batch(epoch_output))
    }

    /// Batch-end hook sequence, then output tracking
    fn on_train_batch_end(
        &mut self,
        trainer: &mut Trainer<B>,
        epoch_output: &mut EpochOutput,
        batch_end_outputs: &[Vec<StepResult>],
        batch: &B,
        batch_idx: usize,
    ) -> Result<ProcessedOutput> {
        let processed = OutputTree::from_batch(batch_end_outputs).collapse(CollapseMode::Batch);

        let losses = processed.losses();
        let loss = (!losses.is_empty()).then(|| losses.iter().sum::<f32>() / losses.len() as f32);
        let ctx = trainer.build_context(&self.progress, batch_idx, loss);

        trainer.call_on_train_batch_end(
            &ctx,
            &processed,
            batch,
            batch_idx,
            self.state.dataloader_idx,
        )?;
        trainer.call_on_batch_end(&ctx)?;

        self.aggregator.track(epoch_output, batch_end_outputs);
        Ok(processed)
    }

    /// Post-batch bookkeeping
    pub fn on_advance_end(&mut self, trainer: &mut Trainer<B>) -> Result<()> {
        let should_check_val = trainer.validation_schedule().should_check(
            trainer.state.current_epoch,
            trainer.state.should_stop,
            self.state.batch_idx,
            self.state.is_last_batch,
            false,
        );
        if should_check_val {
            trainer.run_evaluation(&self.progress)?;
        }

        trainer.flush_logs_if_needed(self.progress.global_step)?;

        let optimizer_boundary = self.batch_loop.accumulated_batches_reached()
            || self.num_training_batches_reached(trainer);

        if optimizer_boundary {
            let metrics = trainer.logger().callback_metrics().clone();
            trainer
                .schedulers_mut()
                .update_learning_rates(Interval::Step, &metrics)?;
        }

        trainer.state.has_trained = true;

        if optimizer_boundary {
            self.progress.global_step = trainer
                .accelerator_mut()
                .update_global_step(self.progress.total_batch_idx, self.progress.global_step);
        }
        Ok(())
    }

    /// Epoch-end collapse and hook sequence
    pub fn finish(
        &mut self,
        trainer: &mut Trainer<B>,
        outputs: EpochOutput,
    ) -> Result<ProcessedOutput> {
        self.loop_state = LoopState::Done;
        trainer.logger_mut().on_train_epoch_end();

        let processed = outputs.into_tree().collapse(CollapseMode::Epoch);

        trainer.call_training_epoch_end(&processed)?;

        let ctx = trainer.build_context(&self.progress, self.state.batch_idx, None);
        trainer.call_on_train_epoch_end(&ctx, &processed)?;
        trainer.call_on_epoch_end(&ctx)?;

        debug!(
            epoch = trainer.state.current_epoch,
            batches = self.state.batches_seen,
            retained = processed.len(),
            "epoch loop finished"
        );
        Ok(processed)
    }

    /// Run the whole epoch and return the processed epoch outputs
    pub fn run(
        &mut self,
        trainer: &mut Trainer<B>,
        dataloader: Box<dyn Iterator<Item = B>>,
    ) -> Result<ProcessedOutput> {
        self.start(trainer, dataloader);
        let mut outputs = EpochOutput::default();

        while !self.is_done(trainer) {
            match self.advance(trainer)? {
                Advance::Batch(batch_output) => {
                    outputs.extend(batch_output);
                    self.on_advance_end(trainer)?;
                }
                Advance::Skipped | Advance::Exhausted => break,
            }
        }

        self.finish(trainer, outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::train::config::TrainerConfig;
    use crate::train::hooks::ModelHooks;
    use crate::train::output::BatchOutput;
    use crate::train::validation::BatchCount;

    /// Returns the batch value as the loss; accumulates every `accumulate` batches
    struct EchoLoop {
        accumulate: usize,
        seen: usize,
    }

    impl EchoLoop {
        fn new(accumulate: usize) -> Self {
            Self { accumulate, seen: 0 }
        }
    }

    impl BatchLoop<f32> for EchoLoop {
        fn run(&mut self, batch: &f32, _batch_idx: usize, _dl: usize) -> Result<BatchOutput> {
            self.seen += 1;
            Ok(BatchOutput::new(vec![vec![StepResult::new(*batch)]]))
        }

        fn accumulated_batches_reached(&self) -> bool {
            self.seen % self.accumulate == 0
        }
    }

    fn trainer(model: ModelHooks<f32>, len: usize) -> Trainer<f32> {
        let mut trainer = Trainer::new(TrainerConfig::default(), model);
        trainer.reset_train_dataloader(Some(len)).unwrap();
        trainer
    }

    fn batches(n: usize) -> Box<dyn Iterator<Item = f32>> {
        Box::new((0..n).map(|i| i as f32))
    }

    #[test]
    fn test_is_done_is_pure() {
        let mut batch_loop = EchoLoop::new(1);
        let mut trainer = trainer(ModelHooks::new(), 3);
        let mut epoch = TrainingEpochLoop::new(&mut batch_loop, Progress::default(), None, None);
        epoch.start(&mut trainer, batches(3));

        for _ in 0..5 {
            assert!(!epoch.is_done(&trainer));
        }
        assert_eq!(epoch.progress().total_batch_idx, 0);
    }

    #[test]
    fn test_advance_counts_batches() {
        let mut batch_loop = EchoLoop::new(1);
        let mut trainer = trainer(ModelHooks::new(), 3);
        let mut epoch = TrainingEpochLoop::new(&mut batch_loop, Progress::default(), None, None);
        epoch.start(&mut trainer, batches(3));

        assert!(matches!(epoch.advance(&mut trainer).unwrap(), Advance::Batch(_)));
        assert_eq!(epoch.progress().total_batch_idx, 1);
        assert_eq!(epoch.state().batch_idx, 0);
        epoch.on_advance_end(&mut trainer).unwrap();
        assert_eq!(epoch.progress().global_step, 1);
    }

    struct FailingLoop;

    impl BatchLoop<f32> for FailingLoop {
        fn run(&mut self, _batch: &f32, batch_idx: usize, _dl: usize) -> Result<BatchOutput> {
            Err(Error::InvalidParameter(format!("bad batch {batch_idx}")))
        }

        fn accumulated_batches_reached(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_batch_loop_failure_is_wrapped() {
        let mut batch_loop = FailingLoop;
        let mut trainer = trainer(ModelHooks::new(), 3);
        let mut epoch = TrainingEpochLoop::new(&mut batch_loop, Progress::default(), None, None);
        let err = epoch.run(&mut trainer, batches(3)).unwrap_err();
        assert!(matches!(err, Error::BatchLoop(ref msg) if msg.contains("bad batch 0")));
        assert_eq!(epoch.progress().total_batch_idx, 1);
    }

    #[test]
    fn test_advance_before_start_fails() {
        let mut batch_loop = EchoLoop::new(1);
        let mut trainer = trainer(ModelHooks::new(), 3);
        let mut epoch = TrainingEpochLoop::new(&mut batch_loop, Progress::default(), None, None);
        assert!(epoch.advance(&mut trainer).is_err());
    }

    #[test]
    fn test_accumulation_gates_global_step() {
        let mut batch_loop = EchoLoop::new(2);
        let mut trainer = trainer(ModelHooks::new(), 5);
        let mut epoch = TrainingEpochLoop::new(&mut batch_loop, Progress::default(), None, None);
        epoch.run(&mut trainer, batches(5)).unwrap();

        // boundaries after batches 2 and 4, plus the last batch
        assert_eq!(epoch.progress().global_step, 3);
        assert_eq!(epoch.progress().total_batch_idx, 5);
        assert!(trainer.state.has_trained);
        assert_eq!(epoch.loop_state(), LoopState::Done);
    }

    #[test]
    fn test_stops_at_num_training_batches() {
        let mut batch_loop = EchoLoop::new(1);
        let mut trainer = trainer(ModelHooks::new(), 10);
        trainer.state.num_training_batches = BatchCount::Finite(4);
        let mut epoch = TrainingEpochLoop::new(&mut batch_loop, Progress::default(), None, None);
        epoch.run(&mut trainer, batches(10)).unwrap();
        assert_eq!(epoch.state().batches_seen, 4);
        assert_eq!(epoch.progress().total_batch_idx, 4);
    }

    #[test]
    fn test_stops_at_max_steps() {
        let mut batch_loop = EchoLoop::new(1);
        let mut trainer = trainer(ModelHooks::new(), 10);
        let progress = Progress {
            global_step: 5,
            total_batch_idx: 5,
        };
        let mut epoch = TrainingEpochLoop::new(&mut batch_loop, progress, None, Some(8));
        epoch.run(&mut trainer, batches(10)).unwrap();
        assert_eq!(epoch.progress().global_step, 8);
        assert_eq!(epoch.state().batches_seen, 3);
    }

    #[test]
    fn test_should_stop_ends_epoch() {
        let mut batch_loop = EchoLoop::new(1);
        let mut trainer = trainer(
            ModelHooks::new().with_on_batch_end(|| Ok(())),
            10,
        );
        let mut epoch = TrainingEpochLoop::new(&mut batch_loop, Progress::default(), None, None);
        epoch.start(&mut trainer, batches(10));
        epoch.advance(&mut trainer).unwrap();
        epoch.on_advance_end(&mut trainer).unwrap();
        trainer.request_stop();
        assert!(epoch.is_done(&trainer));
    }

    #[test]
    fn test_empty_dataloader_still_finishes() {
        let mut batch_loop = EchoLoop::new(1);
        let mut trainer = trainer(
            ModelHooks::new().with_training_epoch_end(|outputs| {
                assert!(outputs.is_empty());
                Ok(None)
            }),
            0,
        );
        let mut epoch = TrainingEpochLoop::new(&mut batch_loop, Progress::default(), None, None);
        let out = epoch.run(&mut trainer, batches(0)).unwrap();
        assert!(out.is_empty());
        assert_eq!(epoch.progress().total_batch_idx, 0);
    }

    #[test]
    fn test_outputs_discarded_without_consumer() {
        let mut batch_loop = EchoLoop::new(1);
        let mut trainer = trainer(ModelHooks::new(), 4);
        let mut epoch = TrainingEpochLoop::new(&mut batch_loop, Progress::default(), None, None);
        let out = epoch.run(&mut trainer, batches(4)).unwrap();
        assert!(out.is_empty());
        // step metrics are still logged
        assert_eq!(trainer.logger().callback_metrics()["loss_epoch"], 1.5);
    }
}
