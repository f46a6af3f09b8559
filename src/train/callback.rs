//! Callback system for training loop events
//!
//! Callbacks are the trainer-level listeners of the hook sequence. For each
//! event they run before the model's own hook:
//! - `on_train_start` / `on_train_end`
//! - `on_train_epoch_start` / `on_train_epoch_end` / `on_epoch_end`
//! - `on_train_batch_end` / `on_batch_end`
//! - `on_validation_end`
//!
//! Returning [`CallbackAction::Stop`] sets the trainer's stop flag. The loop
//! honours it at the next done check.
//!
//! # Example
//!
//! ```rust
//! use vuelta::train::callback::{TrainerCallback, CallbackContext, CallbackAction};
//!
//! struct PrintCallback;
//!
//! impl TrainerCallback for PrintCallback {
//!     fn on_epoch_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
//!         println!("epoch {} finished at step {}", ctx.epoch, ctx.global_step);
//!         CallbackAction::Continue
//!     }
//! }
//! ```

use super::logging::Metrics;
use super::output::ProcessedOutput;
use super::state::TrainerStage;
use super::validation::BatchCount;

/// Snapshot of trainer state passed to callbacks
#[derive(Clone, Debug)]
pub struct CallbackContext {
    /// Current epoch (0-indexed)
    pub epoch: usize,
    pub max_epochs: usize,
    /// Batch index within the epoch
    pub batch_idx: usize,
    pub num_training_batches: BatchCount,
    pub global_step: usize,
    pub total_batch_idx: usize,
    /// Mean loss of the current batch, if any
    pub loss: Option<f32>,
    /// Learning rate of the first scheduler, if any
    pub lr: Option<f32>,
    /// Current callback metrics
    pub metrics: Metrics,
    pub stage: TrainerStage,
    pub elapsed_secs: f64,
}

impl CallbackContext {
    pub fn metric(&self, key: &str) -> Option<f32> {
        self.metrics.get(key).copied()
    }
}

impl Default for CallbackContext {
    fn default() -> Self {
        Self {
            epoch: 0,
            max_epochs: 0,
            batch_idx: 0,
            num_training_batches: BatchCount::Finite(0),
            global_step: 0,
            total_batch_idx: 0,
            loss: None,
            lr: None,
            metrics: Metrics::new(),
            stage: TrainerStage::Training,
            elapsed_secs: 0.0,
        }
    }
}

/// Action to take after a callback
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CallbackAction {
    /// Continue training normally
    #[default]
    Continue,
    /// Request a stop; honoured once minimum epochs and steps are met
    Stop,
}

impl CallbackAction {
    pub fn is_stop(self) -> bool {
        self == Self::Stop
    }

    /// `Stop` if either action is `Stop`
    pub fn merge(self, other: Self) -> Self {
        if self.is_stop() || other.is_stop() {
            Self::Stop
        } else {
            Self::Continue
        }
    }
}

/// Trait for training callbacks
///
/// All methods have no-op defaults, so only the events of interest need an
/// implementation.
pub trait TrainerCallback: Send {
    fn on_train_start(&mut self, _ctx: &CallbackContext) -> CallbackAction {
        CallbackAction::Continue
    }

    fn on_train_end(&mut self, _ctx: &CallbackContext) {}

    fn on_train_epoch_start(&mut self, _ctx: &CallbackContext) -> CallbackAction {
        CallbackAction::Continue
    }

    /// Called with the processed outputs of each completed batch
    fn on_train_batch_end(
        &mut self,
        _ctx: &CallbackContext,
        _outputs: &ProcessedOutput,
    ) -> CallbackAction {
        CallbackAction::Continue
    }

    fn on_batch_end(&mut self, _ctx: &CallbackContext) -> CallbackAction {
        CallbackAction::Continue
    }

    fn on_validation_end(&mut self, _ctx: &CallbackContext) -> CallbackAction {
        CallbackAction::Continue
    }

    /// Called with the processed outputs retained over the epoch
    fn on_train_epoch_end(
        &mut self,
        _ctx: &CallbackContext,
        _outputs: &ProcessedOutput,
    ) -> CallbackAction {
        CallbackAction::Continue
    }

    fn on_epoch_end(&mut self, _ctx: &CallbackContext) -> CallbackAction {
        CallbackAction::Continue
    }

    /// Get callback name for logging
    fn name(&self) -> &str {
        "TrainerCallback"
    }
}

// =============================================================================
// Early Stopping Callback
// =============================================================================

/// Stops training when a monitored metric stops improving
///
/// Checks at the end of each training epoch, or after each validation run
/// when [`EarlyStopping::on_validation`] is set.
///
/// # Example
///
/// ```rust
/// use vuelta::train::callback::EarlyStopping;
///
/// // Stop if `val_loss` has not improved by 0.001 for 5 checks
/// let early_stop = EarlyStopping::new("val_loss", 5, 0.001).on_validation();
/// ```
#[derive(Clone, Debug)]
pub struct EarlyStopping {
    monitor: String,
    patience: usize,
    min_delta: f32,
    best: f32,
    wait: usize,
    check_on_validation: bool,
}

impl EarlyStopping {
    pub fn new(monitor: impl Into<String>, patience: usize, min_delta: f32) -> Self {
        Self {
            monitor: monitor.into(),
            patience,
            min_delta,
            best: f32::INFINITY,
            wait: 0,
            check_on_validation: false,
        }
    }

    /// Check after validation runs instead of at training epoch end
    pub fn on_validation(mut self) -> Self {
        self.check_on_validation = true;
        self
    }

    pub fn monitor(&self) -> &str {
        &self.monitor
    }

    pub fn best(&self) -> Option<f32> {
        self.best.is_finite().then_some(self.best)
    }

    pub fn reset(&mut self) {
        self.best = f32::INFINITY;
        self.wait = 0;
    }

    fn check(&mut self, ctx: &CallbackContext) -> CallbackAction {
        let Some(current) = ctx.metric(&self.monitor) else {
            tracing::debug!(monitor = %self.monitor, "early stopping metric not available yet");
            return CallbackAction::Continue;
        };

        if current < self.best - self.min_delta {
            self.best = current;
            self.wait = 0;
            return CallbackAction::Continue;
        }

        self.wait += 1;
        if self.wait >= self.patience {
            tracing::info!(
                monitor = %self.monitor,
                best = self.best,
                patience = self.patience,
                "early stopping: no improvement"
            );
            CallbackAction::Stop
        } else {
            CallbackAction::Continue
        }
    }
}

impl TrainerCallback for EarlyStopping {
    fn on_validation_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
        if self.check_on_validation {
            self.check(ctx)
        } else {
            CallbackAction::Continue
        }
    }

    fn on_train_epoch_end(
        &mut self,
        ctx: &CallbackContext,
        _outputs: &ProcessedOutput,
    ) -> CallbackAction {
        if self.check_on_validation {
            CallbackAction::Continue
        } else {
            self.check(ctx)
        }
    }

    fn name(&self) -> &str {
        "EarlyStopping"
    }
}

// =============================================================================
// Progress Callback
// =============================================================================

/// Logs training progress through `tracing`
#[derive(Clone, Debug)]
pub struct ProgressCallback {
    /// Log every N batches
    log_interval: usize,
}

impl ProgressCallback {
    pub fn new(log_interval: usize) -> Self {
        Self { log_interval }
    }
}

impl Default for ProgressCallback {
    fn default() -> Self {
        Self { log_interval: 10 }
    }
}

impl TrainerCallback for ProgressCallback {
    fn on_train_epoch_start(&mut self, ctx: &CallbackContext) -> CallbackAction {
        tracing::info!(
            epoch = ctx.epoch + 1,
            max_epochs = ctx.max_epochs,
            batches = %ctx.num_training_batches,
            "epoch starting"
        );
        CallbackAction::Continue
    }

    fn on_train_batch_end(
        &mut self,
        ctx: &CallbackContext,
        _outputs: &ProcessedOutput,
    ) -> CallbackAction {
        let batch = ctx.batch_idx + 1;
        if self.log_interval > 0 && batch % self.log_interval == 0 {
            tracing::info!(
                batch,
                batches = %ctx.num_training_batches,
                global_step = ctx.global_step,
                loss = ctx.loss.unwrap_or(f32::NAN),
                "training"
            );
        }
        CallbackAction::Continue
    }

    fn on_validation_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
        tracing::info!(epoch = ctx.epoch + 1, metrics = ?ctx.metrics, "validation finished");
        CallbackAction::Continue
    }

    fn on_epoch_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
        tracing::info!(
            epoch = ctx.epoch + 1,
            max_epochs = ctx.max_epochs,
            loss = ctx.metric("loss_epoch").unwrap_or(f32::NAN),
            elapsed_secs = ctx.elapsed_secs,
            "epoch finished"
        );
        CallbackAction::Continue
    }

    fn name(&self) -> &str {
        "ProgressCallback"
    }
}

// =============================================================================
// Callback Manager
// =============================================================================

/// Dispatches events to registered callbacks in registration order
///
/// Every callback sees every event, even after one of them asked to stop.
pub struct CallbackManager {
    callbacks: Vec<Box<dyn TrainerCallback>>,
}

impl CallbackManager {
    pub fn new() -> Self {
        Self {
            callbacks: Vec::new(),
        }
    }

    pub fn add<C: TrainerCallback + 'static>(&mut self, callback: C) {
        self.callbacks.push(Box::new(callback));
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.callbacks.iter().map(|cb| cb.name()).collect()
    }

    fn dispatch(
        &mut self,
        mut event: impl FnMut(&mut dyn TrainerCallback) -> CallbackAction,
    ) -> CallbackAction {
        self.callbacks
            .iter_mut()
            .fold(CallbackAction::Continue, |action, cb| {
                action.merge(event(cb.as_mut()))
            })
    }

    pub fn on_train_start(&mut self, ctx: &CallbackContext) -> CallbackAction {
        self.dispatch(|cb| cb.on_train_start(ctx))
    }

    pub fn on_train_end(&mut self, ctx: &CallbackContext) {
        for cb in &mut self.callbacks {
            cb.on_train_end(ctx);
        }
    }

    pub fn on_train_epoch_start(&mut self, ctx: &CallbackContext) -> CallbackAction {
        self.dispatch(|cb| cb.on_train_epoch_start(ctx))
    }

    pub fn on_train_batch_end(
        &mut self,
        ctx: &CallbackContext,
        outputs: &ProcessedOutput,
    ) -> CallbackAction {
        self.dispatch(|cb| cb.on_train_batch_end(ctx, outputs))
    }

    pub fn on_batch_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
        self.dispatch(|cb| cb.on_batch_end(ctx))
    }

    pub fn on_validation_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
        self.dispatch(|cb| cb.on_validation_end(ctx))
    }

    pub fn on_train_epoch_end(
        &mut self,
        ctx: &CallbackContext,
        outputs: &ProcessedOutput,
    ) -> CallbackAction {
        self.dispatch(|cb| cb.on_train_epoch_end(ctx, outputs))
    }

    pub fn on_epoch_end(&mut self, ctx: &CallbackContext) -> CallbackAction {
        self.dispatch(|cb| cb.on_epoch_end(ctx))
    }
}

impl Default for CallbackManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CallbackManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
