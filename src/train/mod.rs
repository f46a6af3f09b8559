//! Epoch-level training loop orchestration
//!
//! This module provides:
//! - [`TrainingEpochLoop`]: one pass over the training dataloader
//! - [`FitLoop`]: epochs back to back until a stop condition holds
//! - Output collapse ([`OutputTree`]) and epoch-end retention ([`EpochEndAggregator`])
//! - The validation predicate ([`ValCheckSchedule`])
//! - Hook dispatch through [`Trainer`], [`ModelHooks`] and callbacks
//!
//! # Example
//!
//! ```
//! use vuelta::train::{
//!     FitLoop, ModelHooks, SyntheticBatchLoop, SyntheticConfig, Trainer, TrainerConfig,
//! };
//!
//! let synthetic = SyntheticConfig { batches_per_epoch: 8, ..SyntheticConfig::default() };
//! let model = ModelHooks::new().with_training_epoch_end(|outputs| {
//!     assert_eq!(outputs.len(), 8);
//!     Ok(None)
//! });
//! let mut trainer: Trainer<usize> = Trainer::new(TrainerConfig::new().with_max_epochs(2), model);
//! let mut fit_loop: FitLoop<usize> = FitLoop::new(Box::new(SyntheticBatchLoop::new(synthetic)));
//!
//! let result = fit_loop.fit(&mut trainer, |_| 0..8usize).unwrap();
//! assert_eq!(result.epochs_completed, 2);
//! assert_eq!(result.progress.global_step, 16);
//! ```

mod aggregate;
pub mod callback;
mod collaborators;
mod config;
mod data;
mod epoch_loop;
mod fit_loop;
pub mod hooks;
mod logging;
mod output;
pub mod profiler;
mod state;
mod synthetic;
mod trainer;
mod validation;

pub use aggregate::{EpochEndAggregator, EpochOutput};
pub use callback::{
    CallbackAction, CallbackContext, CallbackManager, EarlyStopping, ProgressCallback,
    TrainerCallback,
};
pub use collaborators::{Accelerator, BatchLoop, DefaultAccelerator, EvaluationLoop};
pub use config::TrainerConfig;
pub use data::{known_len, TrainDataloader};
pub use epoch_loop::{Advance, TrainingEpochLoop};
pub use fit_loop::{FitLoop, FitResult, StopReason};
pub use hooks::{ModelHooks, WarningCache};
pub use logging::{
    InMemoryLogger, JsonLinesLogger, LogRecord, LoggerConnector, Metrics, MetricsLogger,
    EPOCH_SUFFIX,
};
pub use output::{
    BatchEntry, BatchOutput, BatchSignal, CollapseMode, OutputTree, ProcessedOutput, ResultKind,
    StepMap, StepResult, LOSS_KEY,
};
pub use profiler::{profile, PassThroughProfiler, ProfileRegion, Profiler, SimpleProfiler};
pub use state::{EpochState, LoopState, Progress, TrainerStage, TrainerState};
pub use synthetic::{SyntheticBatchLoop, SyntheticConfig, SyntheticEvaluator};
pub use trainer::{Trainer, RUN_EVALUATION, RUN_TRAINING_BATCH};
pub use validation::{BatchCount, BatchLimit, ValCheckSchedule};
