//! Declarative YAML configuration
//!
//! A loop specification describes the trainer limits, the learning-rate
//! schedulers and the simulated model driven by `vuelta simulate`.
//!
//! # Example
//!
//! ```yaml
//! trainer:
//!   max_epochs: 5
//!   val_check_interval: 0.5
//!   accumulate_grad_batches: 2
//!
//! schedulers:
//!   - name: cosine
//!     lr: 0.1
//!     interval: step
//!     t_max: 200
//!
//! simulation:
//!   model:
//!     batches_per_epoch: 40
//!     num_optimizers: 2
//!
//! early_stopping:
//!   monitor: val_loss
//!   patience: 2
//! ```

mod builder;
mod cli;
mod schema;
mod train;
mod validate;

pub use builder::{build_early_stopping, build_scheduler, build_trainer_config};
pub use cli::{
    apply_overrides, parse_args, Cli, Command, InfoArgs, OutputFormat, SimulateArgs, ValidateArgs,
};
pub use schema::{EarlyStoppingSpec, LoggingSpec, LoopSpec, SchedulerSpec, SimulationSpec};
pub use train::{load_config, simulate, simulate_from_yaml, SimulationReport};
pub use validate::{validate_config, ValidationError};
