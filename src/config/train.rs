//! Single-command simulated runs from YAML configuration

use super::builder::{build_early_stopping, build_scheduler, build_trainer_config};
use super::schema::LoopSpec;
use super::validate::validate_config;
use crate::error::{Error, Result};
use crate::train::{
    FitLoop, FitResult, JsonLinesLogger, Metrics, ModelHooks, ProgressCallback,
    SyntheticBatchLoop, SyntheticEvaluator, Trainer,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Load and parse a loop specification
pub fn load_config<P: AsRef<Path>>(config_path: P) -> Result<LoopSpec> {
    let yaml_content = fs::read_to_string(config_path.as_ref()).map_err(|e| {
        Error::ConfigError(format!(
            "Failed to read config file {}: {}",
            config_path.as_ref().display(),
            e
        ))
    })?;

    serde_yaml::from_str(&yaml_content)
        .map_err(|e| Error::ConfigError(format!("Failed to parse YAML config: {}", e)))
}

/// Summary of a simulated run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub fit: FitResult,
    /// Learning rates after the run, in scheduler declaration order
    pub learning_rates: Vec<f32>,
    /// Metrics visible to callbacks when training ended
    pub callback_metrics: Metrics,
    /// Epoch-averaged metrics, one entry per completed epoch
    pub epoch_history: Vec<Metrics>,
    /// How many times `training_epoch_end` ran
    pub epoch_end_calls: usize,
}

/// Run a validated specification against the synthetic model
pub fn simulate(spec: &LoopSpec) -> Result<SimulationReport> {
    validate_config(spec).map_err(|e| Error::ConfigError(format!("Invalid config: {}", e)))?;
    let config = build_trainer_config(spec)?;

    let model_config = spec.simulation.model.clone();
    let batches_per_epoch = model_config.batches_per_epoch;

    let epoch_end_calls = Arc::new(AtomicUsize::new(0));
    let mut model = ModelHooks::new();
    if spec.simulation.training_epoch_end {
        let calls = Arc::clone(&epoch_end_calls);
        model = model.with_training_epoch_end(move |outputs| {
            calls.fetch_add(1, Ordering::Relaxed);
            debug!(outputs = outputs.len(), "training_epoch_end");
            Ok(None)
        });
    }

    let mut trainer: Trainer<usize> = Trainer::new(config, model);
    if spec.simulation.evaluate {
        trainer = trainer.with_evaluator(SyntheticEvaluator::new(&model_config));
    }
    if let Some(path) = &spec.logging.metrics_path {
        trainer = trainer.with_logger(JsonLinesLogger::new(path));
    }
    if spec.logging.progress_every > 0 {
        trainer.add_callback(ProgressCallback::new(spec.logging.progress_every));
    }
    if let Some(early_stopping) = build_early_stopping(spec) {
        trainer.add_callback(early_stopping);
    }
    for scheduler in &spec.schedulers {
        trainer.add_scheduler(build_scheduler(scheduler)?);
    }

    info!(
        max_epochs = trainer.config().max_epochs,
        batches_per_epoch,
        schedulers = spec.schedulers.len(),
        "starting simulation"
    );

    let mut fit_loop: FitLoop<usize> = FitLoop::new(Box::new(SyntheticBatchLoop::new(model_config)));
    let fit = fit_loop.fit(&mut trainer, |_| 0..batches_per_epoch)?;

    Ok(SimulationReport {
        fit,
        learning_rates: trainer.schedulers().lrs(),
        callback_metrics: trainer.logger().callback_metrics().clone(),
        epoch_history: trainer.logger().epoch_history().to_vec(),
        epoch_end_calls: epoch_end_calls.load(Ordering::Relaxed),
    })
}

/// Load, validate and simulate a YAML configuration file
///
/// # Example
///
/// ```no_run
/// use vuelta::config::simulate_from_yaml;
///
/// let report = simulate_from_yaml("loop.yaml")?;
/// println!("global step {}", report.fit.progress.global_step);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn simulate_from_yaml<P: AsRef<Path>>(config_path: P) -> Result<SimulationReport> {
    let spec = load_config(config_path)?;
    simulate(&spec)
}
