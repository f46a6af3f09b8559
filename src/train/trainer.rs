//! Trainer: shared state and hook dispatch for the training loops
//!
//! The loops own the control flow; the trainer owns everything they share
//! (configuration, run state, callbacks, the model's hooks, the accelerator,
//! logging, schedulers, evaluation and profiling).
//!
//! Hooks fire in a fixed order: trainer callbacks first, then the model's
//! override, falling back to the accelerator when the model has none. Every
//! dispatch runs inside a profiling region named after the hook.

use super::callback::{CallbackAction, CallbackContext, CallbackManager, TrainerCallback};
use super::collaborators::{Accelerator, DefaultAccelerator, EvaluationLoop};
use super::config::TrainerConfig;
use super::hooks::{
    ModelHooks, WarningCache, ON_BATCH_END, ON_EPOCH_END, ON_TRAIN_BATCH_END, ON_TRAIN_EPOCH_END,
    ON_TRAIN_EPOCH_START, TRAINING_EPOCH_END,
};
use super::logging::{LoggerConnector, MetricsLogger};
use super::output::ProcessedOutput;
use super::profiler::{profile, PassThroughProfiler, Profiler};
use super::state::{Progress, TrainerStage, TrainerState};
use super::validation::ValCheckSchedule;
use crate::error::{Error, Result};
use crate::optim::{ScheduledLr, SchedulerConnector};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Profiling region around one batch loop run
pub const RUN_TRAINING_BATCH: &str = "run_training_batch";
/// Profiling region around one evaluation run
pub const RUN_EVALUATION: &str = "run_evaluation";

/// Shared state of a training run
///
/// # Example
///
/// ```
/// use vuelta::train::{EarlyStopping, ModelHooks, Trainer, TrainerConfig};
///
/// let config = TrainerConfig::new().with_max_epochs(10);
/// let mut trainer: Trainer<Vec<f32>> = Trainer::new(config, ModelHooks::new());
/// trainer.add_callback(EarlyStopping::new("loss_epoch", 3, 0.0));
/// assert_eq!(trainer.callbacks().len(), 1);
/// ```
pub struct Trainer<B> {
    config: TrainerConfig,

    /// Run state shared with the loops
    pub state: TrainerState,

    callbacks: CallbackManager,
    model: ModelHooks<B>,
    accelerator: Box<dyn Accelerator<B>>,
    logger: LoggerConnector,
    schedulers: SchedulerConnector,
    evaluator: Option<Box<dyn EvaluationLoop>>,
    profiler: Arc<dyn Profiler>,
    warnings: WarningCache,
    start_time: Option<Instant>,
}

impl<B: 'static> Trainer<B> {
    pub fn new(config: TrainerConfig, model: ModelHooks<B>) -> Self {
        let logger = LoggerConnector::new(config.log_every_n_steps, config.flush_logs_every_n_steps);
        Self {
            config,
            state: TrainerState::default(),
            callbacks: CallbackManager::new(),
            model,
            accelerator: Box::new(DefaultAccelerator),
            logger,
            schedulers: SchedulerConnector::new(),
            evaluator: None,
            profiler: Arc::new(PassThroughProfiler),
            warnings: WarningCache::new(),
            start_time: None,
        }
    }

    pub fn with_accelerator<A: Accelerator<B> + 'static>(mut self, accelerator: A) -> Self {
        self.state.is_global_zero = accelerator.is_global_zero();
        self.accelerator = Box::new(accelerator);
        self
    }

    pub fn with_evaluator<E: EvaluationLoop + 'static>(mut self, evaluator: E) -> Self {
        self.evaluator = Some(Box::new(evaluator));
        self
    }

    pub fn with_profiler(mut self, profiler: Arc<dyn Profiler>) -> Self {
        self.profiler = profiler;
        self
    }

    pub fn with_logger<L: MetricsLogger + 'static>(mut self, logger: L) -> Self {
        self.logger.set_logger(Box::new(logger));
        self
    }

    pub fn add_callback<C: TrainerCallback + 'static>(&mut self, callback: C) {
        self.callbacks.add(callback);
    }

    pub fn add_scheduler(&mut self, scheduler: ScheduledLr) {
        self.schedulers.add(scheduler);
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn callbacks(&self) -> &CallbackManager {
        &self.callbacks
    }

    pub fn model(&self) -> &ModelHooks<B> {
        &self.model
    }

    pub fn logger(&self) -> &LoggerConnector {
        &self.logger
    }

    pub(crate) fn logger_mut(&mut self) -> &mut LoggerConnector {
        &mut self.logger
    }

    pub fn schedulers(&self) -> &SchedulerConnector {
        &self.schedulers
    }

    pub(crate) fn schedulers_mut(&mut self) -> &mut SchedulerConnector {
        &mut self.schedulers
    }

    pub(crate) fn accelerator_mut(&mut self) -> &mut dyn Accelerator<B> {
        self.accelerator.as_mut()
    }

    pub fn profiler(&self) -> &Arc<dyn Profiler> {
        &self.profiler
    }

    pub fn warnings(&self) -> &WarningCache {
        &self.warnings
    }

    /// Ask the loops to stop at the next done check
    pub fn request_stop(&mut self) {
        self.state.should_stop = true;
    }

    pub(crate) fn mark_started(&mut self) {
        self.start_time = Some(Instant::now());
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Resolve batch counts for a new epoch's dataloader
    pub fn reset_train_dataloader(&mut self, dataloader_len: Option<usize>) -> Result<()> {
        let num_batches = self
            .config
            .limit_train_batches
            .resolve_train_batches(dataloader_len)?;
        let val_check_batch = self
            .config
            .val_check_interval
            .resolve_val_check_batch(num_batches)?;
        self.state.num_training_batches = num_batches;
        self.state.val_check_batch = val_check_batch;
        debug!(
            num_training_batches = %num_batches,
            val_check_batch = %val_check_batch,
            "train dataloader reset"
        );
        Ok(())
    }

    pub fn validation_schedule(&self) -> ValCheckSchedule {
        ValCheckSchedule {
            val_check_batch: self.state.val_check_batch,
            check_val_every_n_epoch: self.config.check_val_every_n_epoch,
            num_training_batches: self.state.num_training_batches,
            enable_validation: self.config.enable_validation && self.evaluator.is_some(),
        }
    }

    /// Build callback context from current state
    pub(crate) fn build_context(
        &self,
        progress: &Progress,
        batch_idx: usize,
        loss: Option<f32>,
    ) -> CallbackContext {
        CallbackContext {
            epoch: self.state.current_epoch,
            max_epochs: self.config.max_epochs,
            batch_idx,
            num_training_batches: self.state.num_training_batches,
            global_step: progress.global_step,
            total_batch_idx: progress.total_batch_idx,
            loss,
            lr: self.schedulers.lrs().first().copied(),
            metrics: self.logger.callback_metrics().clone(),
            stage: self.state.stage,
            elapsed_secs: self.elapsed_secs(),
        }
    }

    pub(crate) fn apply_action(&mut self, action: CallbackAction, hook: &str) {
        if action.is_stop() && !self.state.should_stop {
            info!(hook, "callback requested stop");
            self.state.should_stop = true;
        }
    }

    /// Run the evaluation loop and publish its metrics
    pub fn run_evaluation(&mut self, progress: &Progress) -> Result<()> {
        let Some(evaluator) = self.evaluator.as_mut() else {
            return Ok(());
        };

        self.state.stage = TrainerStage::Validating;
        let metrics = {
            let _region = profile(&self.profiler, RUN_EVALUATION);
            evaluator.run(self.state.current_epoch, progress.global_step)
        };
        self.state.stage = TrainerStage::Training;
        let metrics = metrics.map_err(|e| match e {
            Error::Evaluation(_) => e,
            other => Error::Evaluation(other.to_string()),
        })?;

        debug!(epoch = self.state.current_epoch, ?metrics, "validation finished");
        self.logger.update_callback_metrics(&metrics);

        let ctx = self.build_context(progress, 0, None);
        let action = self.callbacks.on_validation_end(&ctx);
        self.apply_action(action, "on_validation_end");
        Ok(())
    }

    /// Save the logger on flush steps; only the global-zero process writes
    pub(crate) fn flush_logs_if_needed(&mut self, global_step: usize) -> Result<()> {
        let should_flush = self
            .logger
            .should_flush_logs(global_step, self.state.should_stop);
        if should_flush && self.state.is_global_zero && self.logger.has_logger() {
            self.logger.save()?;
        }
        Ok(())
    }

    // =========================================================================
    // Hook dispatch
    // =========================================================================

    pub(crate) fn call_on_train_start(&mut self, ctx: &CallbackContext) {
        let action = self.callbacks.on_train_start(ctx);
        self.apply_action(action, "on_train_start");
    }

    pub(crate) fn call_on_train_end(&mut self, ctx: &CallbackContext) {
        self.callbacks.on_train_end(ctx);
    }

    pub(crate) fn call_on_train_epoch_start(&mut self, ctx: &CallbackContext) -> Result<()> {
        let _region = profile(&self.profiler, ON_TRAIN_EPOCH_START);
        let action = self.callbacks.on_train_epoch_start(ctx);
        self.apply_action(action, ON_TRAIN_EPOCH_START);
        match self.model.call_on_train_epoch_start() {
            Some(result) => result,
            None => self.accelerator.on_train_epoch_start(),
        }
    }

    pub(crate) fn call_on_train_batch_end(
        &mut self,
        ctx: &CallbackContext,
        outputs: &ProcessedOutput,
        batch: &B,
        batch_idx: usize,
        dataloader_idx: usize,
    ) -> Result<()> {
        let _region = profile(&self.profiler, ON_TRAIN_BATCH_END);
        let action = self.callbacks.on_train_batch_end(ctx, outputs);
        self.apply_action(action, ON_TRAIN_BATCH_END);
        match self
            .model
            .call_on_train_batch_end(outputs, batch, batch_idx, dataloader_idx)
        {
            Some(result) => result,
            None => self
                .accelerator
                .on_train_batch_end(outputs, batch_idx, dataloader_idx),
        }
    }

    pub(crate) fn call_on_batch_end(&mut self, ctx: &CallbackContext) -> Result<()> {
        let _region = profile(&self.profiler, ON_BATCH_END);
        let action = self.callbacks.on_batch_end(ctx);
        self.apply_action(action, ON_BATCH_END);
        match self.model.call_on_batch_end() {
            Some(result) => result,
            None => self.accelerator.on_batch_end(),
        }
    }

    /// User epoch-end reduction; any returned value is a misconfiguration
    pub(crate) fn call_training_epoch_end(&mut self, outputs: &ProcessedOutput) -> Result<()> {
        let _region = profile(&self.profiler, TRAINING_EPOCH_END);
        match self.model.call_training_epoch_end(outputs) {
            Some(Ok(Some(_))) => Err(Error::Misconfiguration(
                "training_epoch_end expects a return of None. \
                 HINT: remove the return statement in training_epoch_end"
                    .into(),
            )),
            Some(Ok(None)) | None => Ok(()),
            Some(Err(e)) => Err(e),
        }
    }

    pub(crate) fn call_on_train_epoch_end(
        &mut self,
        ctx: &CallbackContext,
        outputs: &ProcessedOutput,
    ) -> Result<()> {
        let _region = profile(&self.profiler, ON_TRAIN_EPOCH_END);
        let action = self.callbacks.on_train_epoch_end(ctx, outputs);
        self.apply_action(action, ON_TRAIN_EPOCH_END);
        match self
            .model
            .call_on_train_epoch_end(outputs, &mut self.warnings)
        {
            Some(result) => result,
            None => self.accelerator.on_train_epoch_end(),
        }
    }

    pub(crate) fn call_on_epoch_end(&mut self, ctx: &CallbackContext) -> Result<()> {
        let _region = profile(&self.profiler, ON_EPOCH_END);
        let action = self.callbacks.on_epoch_end(ctx);
        self.apply_action(action, ON_EPOCH_END);
        match self.model.call_on_epoch_end() {
            Some(result) => result,
            None => self.accelerator.on_epoch_end(),
        }
    }
}

impl<B> std::fmt::Debug for Trainer<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trainer")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("callbacks", &self.callbacks)
            .field("model", &self.model)
            .field("logger", &self.logger)
            .field("schedulers", &self.schedulers)
            .finish_non_exhaustive()
    }
}
