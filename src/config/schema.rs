//! Configuration schema definitions

use crate::optim::Interval;
use crate::train::{SyntheticConfig, TrainerConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Complete loop specification (top-level config)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LoopSpec {
    /// Loop limits and cadences
    #[serde(default)]
    pub trainer: TrainerConfig,

    /// Learning-rate schedulers, stepped in declaration order
    #[serde(default)]
    pub schedulers: Vec<SchedulerSpec>,

    /// Simulated model driven by `vuelta simulate`
    #[serde(default)]
    pub simulation: SimulationSpec,

    /// Early stopping callback
    #[serde(default)]
    pub early_stopping: Option<EarlyStoppingSpec>,

    #[serde(default)]
    pub logging: LoggingSpec,
}

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSpec {
    /// One of `cosine`, `warmup`, `step_decay`, `plateau`
    pub name: String,

    /// Initial (or target) learning rate
    pub lr: f32,

    #[serde(default)]
    pub interval: Interval,

    #[serde(default = "default_frequency")]
    pub frequency: usize,

    /// Metric fed to the scheduler on each step
    #[serde(default)]
    pub monitor: Option<String>,

    /// Scheduler-specific parameters
    #[serde(flatten)]
    pub params: HashMap<String, serde_json::Value>,
}

/// Simulated run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSpec {
    #[serde(default)]
    pub model: SyntheticConfig,

    /// Attach a synthetic evaluation loop reporting `val_loss`
    #[serde(default = "default_true")]
    pub evaluate: bool,

    /// Override `training_epoch_end` on the simulated model
    #[serde(default)]
    pub training_epoch_end: bool,
}

impl Default for SimulationSpec {
    fn default() -> Self {
        Self {
            model: SyntheticConfig::default(),
            evaluate: true,
            training_epoch_end: false,
        }
    }
}

/// Early stopping configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarlyStoppingSpec {
    pub monitor: String,

    #[serde(default = "default_patience")]
    pub patience: usize,

    #[serde(default)]
    pub min_delta: f32,

    /// Check after each validation run instead of each epoch end
    #[serde(default)]
    pub on_validation: bool,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LoggingSpec {
    /// Append logged metrics to this file as JSON lines
    #[serde(default)]
    pub metrics_path: Option<PathBuf>,

    /// Emit a progress line every N batches (0 disables)
    #[serde(default)]
    pub progress_every: usize,
}

fn default_true() -> bool {
    true
}

fn default_frequency() -> usize {
    1
}

fn default_patience() -> usize {
    3
}
