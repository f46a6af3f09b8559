//! # Vuelta: epoch-level training loop orchestration
//!
//! Vuelta runs one training epoch at a time over a dataloader. It delegates
//! each batch to a batch loop, decides when to validate mid-epoch, steps
//! learning-rate schedulers, and collects step outputs for epoch-end hooks.
//!
//! ## Architecture
//!
//! - **train**: Epoch and fit loops, hook dispatch, output collapse
//! - **optim**: Learning-rate schedulers and their step/epoch connector
//! - **config**: Declarative YAML configuration and CLI arguments
//! - **error**: Crate-wide error type

pub mod config;
pub mod optim;
pub mod train;

pub mod error;

// Re-export commonly used types
pub use error::{Error, Result};
pub use train::{FitLoop, FitResult, Trainer, TrainerConfig, TrainingEpochLoop};
