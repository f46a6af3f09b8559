//! Configuration validation

use super::schema::{LoopSpec, SchedulerSpec};
use crate::optim::Interval;
use crate::train::BatchLimit;

/// Validation error type
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("Invalid epochs: {0} (must be > 0)")]
    InvalidEpochs(usize),

    #[error("min_epochs ({min}) exceeds max_epochs ({max})")]
    EpochRange { min: usize, max: usize },

    #[error("min_steps ({min}) exceeds max_steps ({max})")]
    StepRange { min: usize, max: usize },

    #[error("Invalid {field}: {value} (fraction must be within [0.0, 1.0])")]
    InvalidFraction { field: &'static str, value: f32 },

    #[error("Invalid {field}: 0 (must be > 0)")]
    ZeroCount { field: &'static str },

    #[error("Invalid learning rate: {0} (must be > 0.0)")]
    InvalidLearningRate(f32),

    #[error("Invalid scheduler: {0} (must be one of: cosine, warmup, step_decay, plateau)")]
    InvalidScheduler(String),

    #[error("Scheduler '{0}' has no parameter '{1}'")]
    UnknownSchedulerParam(String, String),

    #[error("Scheduler '{0}' needs a monitor metric")]
    MissingMonitor(String),

    #[error("Scheduler '{0}' runs per step and cannot monitor '{1}'")]
    StepMonitor(String, String),

    #[error("Invalid simulation: {0}")]
    InvalidSimulation(String),
}

pub(crate) const SCHEDULERS: &[&str] = &["cosine", "warmup", "step_decay", "plateau"];

/// Parameters each scheduler reads from its flattened keys
fn scheduler_params(name: &str) -> &'static [&'static str] {
    match name {
        "cosine" => &["t_max", "lr_min"],
        "warmup" => &["warmup_steps"],
        "step_decay" => &["step_size", "gamma"],
        "plateau" => &["factor", "patience", "lr_min", "min_delta"],
        _ => &[],
    }
}

/// Validate a loop specification
///
/// Checks:
/// - Epoch and step ranges are ordered
/// - Batch fractions lie within [0.0, 1.0]
/// - Counts used as divisors are non-zero
/// - Scheduler names and monitors are usable
pub fn validate_config(spec: &LoopSpec) -> Result<(), ValidationError> {
    let trainer = &spec.trainer;

    if trainer.max_epochs == 0 {
        return Err(ValidationError::InvalidEpochs(trainer.max_epochs));
    }
    if trainer.min_epochs > trainer.max_epochs {
        return Err(ValidationError::EpochRange {
            min: trainer.min_epochs,
            max: trainer.max_epochs,
        });
    }
    if let (Some(min), Some(max)) = (trainer.min_steps, trainer.max_steps) {
        if min > max {
            return Err(ValidationError::StepRange { min, max });
        }
    }

    check_limit("limit_train_batches", trainer.limit_train_batches)?;
    check_limit("val_check_interval", trainer.val_check_interval)?;

    for (field, value) in [
        ("accumulate_grad_batches", trainer.accumulate_grad_batches),
        ("log_every_n_steps", trainer.log_every_n_steps),
        ("flush_logs_every_n_steps", trainer.flush_logs_every_n_steps),
    ] {
        if value == 0 {
            return Err(ValidationError::ZeroCount { field });
        }
    }

    for scheduler in &spec.schedulers {
        check_scheduler(scheduler)?;
    }

    spec.simulation
        .model
        .check()
        .map_err(|e| ValidationError::InvalidSimulation(e.to_string()))?;

    Ok(())
}

fn check_limit(field: &'static str, limit: BatchLimit) -> Result<(), ValidationError> {
    match limit {
        BatchLimit::Fraction(value) if !(0.0..=1.0).contains(&value) => {
            Err(ValidationError::InvalidFraction { field, value })
        }
        BatchLimit::Batches(0) if field == "val_check_interval" => {
            Err(ValidationError::ZeroCount { field })
        }
        _ => Ok(()),
    }
}

fn check_scheduler(spec: &SchedulerSpec) -> Result<(), ValidationError> {
    let name = spec.name.to_lowercase();
    if !SCHEDULERS.contains(&name.as_str()) {
        return Err(ValidationError::InvalidScheduler(spec.name.clone()));
    }
    let known = scheduler_params(&name);
    let mut keys: Vec<&String> = spec.params.keys().collect();
    keys.sort();
    if let Some(key) = keys.into_iter().find(|key| !known.contains(&key.as_str())) {
        return Err(ValidationError::UnknownSchedulerParam(spec.name.clone(), key.clone()));
    }
    if spec.lr <= 0.0 {
        return Err(ValidationError::InvalidLearningRate(spec.lr));
    }
    if spec.frequency == 0 {
        return Err(ValidationError::ZeroCount { field: "frequency" });
    }
    if name == "plateau" && spec.monitor.is_none() {
        return Err(ValidationError::MissingMonitor(spec.name.clone()));
    }
    // epoch-level metrics only exist once an epoch ended
    if let (Interval::Step, Some(monitor)) = (spec.interval, &spec.monitor) {
        if monitor.ends_with(crate::train::EPOCH_SUFFIX) {
            return Err(ValidationError::StepMonitor(spec.name.clone(), monitor.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LoopSpec;

    fn spec(yaml: &str) -> LoopSpec {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_default_spec_is_valid() {
        assert_eq!(validate_config(&spec("{}")), Ok(()));
    }

    #[test]
    fn test_zero_epochs() {
        let s = spec("trainer: { max_epochs: 0, min_epochs: 0 }");
        assert_eq!(validate_config(&s), Err(ValidationError::InvalidEpochs(0)));
    }

    #[test]
    fn test_epoch_range() {
        let s = spec("trainer: { max_epochs: 2, min_epochs: 4 }");
        assert_eq!(
            validate_config(&s),
            Err(ValidationError::EpochRange { min: 4, max: 2 })
        );
    }

    #[test]
    fn test_step_range() {
        let s = spec("trainer: { max_steps: 10, min_steps: 20 }");
        assert!(matches!(
            validate_config(&s),
            Err(ValidationError::StepRange { .. })
        ));
    }

    #[test]
    fn test_fraction_out_of_range() {
        let s = spec("trainer: { val_check_interval: 1.5 }");
        assert!(matches!(
            validate_config(&s),
            Err(ValidationError::InvalidFraction { field: "val_check_interval", .. })
        ));
    }

    #[test]
    fn test_zero_accumulation() {
        let s = spec("trainer: { accumulate_grad_batches: 0 }");
        assert_eq!(
            validate_config(&s),
            Err(ValidationError::ZeroCount { field: "accumulate_grad_batches" })
        );
    }

    #[test]
    fn test_unknown_scheduler() {
        let s = spec("schedulers: [{ name: onecycle, lr: 0.1 }]");
        assert_eq!(
            validate_config(&s),
            Err(ValidationError::InvalidScheduler("onecycle".into()))
        );
    }

    #[test]
    fn test_misspelled_scheduler_param() {
        let s = spec("schedulers: [{ name: warmup, lr: 0.1, warmup_step: 5 }]");
        assert_eq!(
            validate_config(&s),
            Err(ValidationError::UnknownSchedulerParam("warmup".into(), "warmup_step".into()))
        );

        // lr_min belongs to cosine, not step_decay
        let s = spec("schedulers: [{ name: step_decay, lr: 0.1, stepsize: 2, lr_min: 0.0 }]");
        assert_eq!(
            validate_config(&s),
            Err(ValidationError::UnknownSchedulerParam("step_decay".into(), "lr_min".into()))
        );

        let s = spec("schedulers: [{ name: cosine, lr: 0.1, t_max: 50, lr_min: 0.001 }]");
        assert_eq!(validate_config(&s), Ok(()));
    }

    #[test]
    fn test_plateau_needs_monitor() {
        let s = spec("schedulers: [{ name: plateau, lr: 0.1 }]");
        assert!(matches!(
            validate_config(&s),
            Err(ValidationError::MissingMonitor(_))
        ));
    }

    #[test]
    fn test_step_scheduler_cannot_monitor_epoch_metric() {
        let s = spec("schedulers: [{ name: plateau, lr: 0.1, interval: step, monitor: loss_epoch }]");
        assert!(matches!(
            validate_config(&s),
            Err(ValidationError::StepMonitor(_, _))
        ));
    }

    #[test]
    fn test_bad_simulation() {
        let s = spec("simulation: { model: { num_optimizers: 0 } }");
        assert!(matches!(
            validate_config(&s),
            Err(ValidationError::InvalidSimulation(_))
        ));
    }
}
