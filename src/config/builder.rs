//! Build loop components from configuration

use super::schema::{LoopSpec, SchedulerSpec};
use crate::error::{Error, Result};
use crate::optim::{
    CosineAnnealingLR, LinearWarmupLR, ReduceLROnPlateau, ScheduledLr, StepDecayLR,
};
use crate::train::{EarlyStopping, TrainerConfig};

/// Build the trainer configuration
pub fn build_trainer_config(spec: &LoopSpec) -> Result<TrainerConfig> {
    let config = spec.trainer.clone();
    config.check()?;
    Ok(config)
}

fn param_f32(spec: &SchedulerSpec, key: &str, default: f32) -> f32 {
    spec.params
        .get(key)
        .and_then(|v| v.as_f64())
        .map_or(default, |v| v as f32)
}

fn param_usize(spec: &SchedulerSpec, key: &str, default: usize) -> usize {
    spec.params
        .get(key)
        .and_then(|v| v.as_u64())
        .map_or(default, |v| v as usize)
}

/// Build a scheduler from configuration
pub fn build_scheduler(spec: &SchedulerSpec) -> Result<ScheduledLr> {
    let scheduled = match spec.name.to_lowercase().as_str() {
        "cosine" => {
            let t_max = param_usize(spec, "t_max", 100);
            let lr_min = param_f32(spec, "lr_min", 0.0);
            ScheduledLr::new(CosineAnnealingLR::new(spec.lr, t_max, lr_min), spec.interval)
        }
        "warmup" => {
            let warmup_steps = param_usize(spec, "warmup_steps", 10);
            ScheduledLr::new(LinearWarmupLR::new(spec.lr, warmup_steps), spec.interval)
        }
        "step_decay" => {
            let step_size = param_usize(spec, "step_size", 10);
            let gamma = param_f32(spec, "gamma", 0.1);
            ScheduledLr::new(StepDecayLR::new(spec.lr, step_size, gamma), spec.interval)
        }
        "plateau" => {
            let factor = param_f32(spec, "factor", 0.1);
            let patience = param_usize(spec, "patience", 10);
            let scheduler = ReduceLROnPlateau::new(spec.lr, factor, patience)
                .with_min_lr(param_f32(spec, "lr_min", 0.0))
                .with_min_delta(param_f32(spec, "min_delta", 0.0));
            ScheduledLr::new(scheduler, spec.interval)
        }
        name => {
            return Err(Error::ConfigError(format!(
                "Unknown scheduler: {}. Supported: cosine, warmup, step_decay, plateau",
                name
            )))
        }
    };

    let scheduled = scheduled.with_frequency(spec.frequency);
    Ok(match &spec.monitor {
        Some(key) => scheduled.with_monitor(key.clone()),
        None => scheduled,
    })
}

/// Build the early stopping callback, if configured
pub fn build_early_stopping(spec: &LoopSpec) -> Option<EarlyStopping> {
    spec.early_stopping.as_ref().map(|es| {
        let callback = EarlyStopping::new(es.monitor.clone(), es.patience, es.min_delta);
        if es.on_validation {
            callback.on_validation()
        } else {
            callback
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::Interval;
    use approx::assert_relative_eq;

    fn scheduler(yaml: &str) -> SchedulerSpec {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_build_cosine() {
        let s = build_scheduler(&scheduler("{ name: cosine, lr: 0.1, interval: step, t_max: 10 }"))
            .unwrap();
        assert_eq!(s.interval(), Interval::Step);
        assert_relative_eq!(s.lr(), 0.1);
    }

    #[test]
    fn test_build_warmup_starts_low() {
        let s = build_scheduler(&scheduler("{ name: warmup, lr: 0.1, warmup_steps: 5 }")).unwrap();
        assert!(s.lr() < 0.1);
    }

    #[test]
    fn test_build_step_decay_case_insensitive() {
        let s = build_scheduler(&scheduler("{ name: Step_Decay, lr: 0.5, step_size: 2 }")).unwrap();
        assert_relative_eq!(s.lr(), 0.5);
    }

    #[test]
    fn test_build_plateau() {
        let s = build_scheduler(&scheduler(
            "{ name: plateau, lr: 0.1, monitor: val_loss, factor: 0.5, patience: 1 }",
        ))
        .unwrap();
        assert_eq!(s.interval(), Interval::Epoch);
    }

    #[test]
    fn test_build_unknown_scheduler() {
        let result = build_scheduler(&scheduler("{ name: onecycle, lr: 0.1 }"));
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_build_trainer_config_checks_ranges() {
        let spec: LoopSpec = serde_yaml::from_str("trainer: { max_epochs: 1, min_epochs: 2 }").unwrap();
        assert!(matches!(
            build_trainer_config(&spec),
            Err(Error::Misconfiguration(_))
        ));
    }

    #[test]
    fn test_build_early_stopping() {
        let spec: LoopSpec =
            serde_yaml::from_str("early_stopping: { monitor: val_loss, patience: 2 }").unwrap();
        let callback = build_early_stopping(&spec).unwrap();
        assert_eq!(callback.monitor(), "val_loss");
        assert!(build_early_stopping(&LoopSpec::default()).is_none());
    }
}
