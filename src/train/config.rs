//! Trainer configuration

use super::validation::BatchLimit;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Loop limits and cadences for a training run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainerConfig {
    /// Stop after this many epochs
    pub max_epochs: usize,

    /// Stop requests are ignored until this many epochs completed
    pub min_epochs: usize,

    /// Stop once the global step reaches this value
    pub max_steps: Option<usize>,

    /// Stop requests are ignored until the global step reaches this value
    pub min_steps: Option<usize>,

    /// Batches per epoch: an absolute count or a fraction of the dataloader
    pub limit_train_batches: BatchLimit,

    /// Mid-epoch validation interval: batches, or a fraction of the epoch
    pub val_check_interval: BatchLimit,

    /// Validate only on every n-th epoch (0 disables validation)
    pub check_val_every_n_epoch: usize,

    pub enable_validation: bool,

    /// Batches per optimizer step
    pub accumulate_grad_batches: usize,

    /// Send step metrics to the logger every N global steps
    pub log_every_n_steps: usize,

    /// Flush the logger every N global steps
    pub flush_logs_every_n_steps: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            max_epochs: 1000,
            min_epochs: 1,
            max_steps: None,
            min_steps: None,
            limit_train_batches: BatchLimit::default(),
            val_check_interval: BatchLimit::default(),
            check_val_every_n_epoch: 1,
            enable_validation: true,
            accumulate_grad_batches: 1,
            log_every_n_steps: 50,
            flush_logs_every_n_steps: 100,
        }
    }
}

impl TrainerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_epochs(mut self, epochs: usize) -> Self {
        self.max_epochs = epochs;
        self
    }

    pub fn with_min_epochs(mut self, epochs: usize) -> Self {
        self.min_epochs = epochs;
        self
    }

    pub fn with_max_steps(mut self, steps: usize) -> Self {
        self.max_steps = Some(steps);
        self
    }

    pub fn with_min_steps(mut self, steps: usize) -> Self {
        self.min_steps = Some(steps);
        self
    }

    pub fn with_limit_train_batches(mut self, limit: BatchLimit) -> Self {
        self.limit_train_batches = limit;
        self
    }

    pub fn with_val_check_interval(mut self, interval: BatchLimit) -> Self {
        self.val_check_interval = interval;
        self
    }

    pub fn with_check_val_every_n_epoch(mut self, n: usize) -> Self {
        self.check_val_every_n_epoch = n;
        self
    }

    pub fn without_validation(mut self) -> Self {
        self.enable_validation = false;
        self
    }

    /// Set gradient accumulation
    ///
    /// Effective batch size = batch_size * accumulate_grad_batches
    pub fn with_gradient_accumulation(mut self, batches: usize) -> Self {
        self.accumulate_grad_batches = batches.max(1);
        self
    }

    pub fn with_log_every_n_steps(mut self, n: usize) -> Self {
        self.log_every_n_steps = n;
        self
    }

    pub fn with_flush_logs_every_n_steps(mut self, n: usize) -> Self {
        self.flush_logs_every_n_steps = n;
        self
    }

    /// Reject combinations the loops cannot run
    pub fn check(&self) -> Result<()> {
        if self.accumulate_grad_batches == 0 {
            return Err(Error::InvalidParameter(
                "accumulate_grad_batches must be at least 1".into(),
            ));
        }
        if self.min_epochs > self.max_epochs {
            return Err(Error::Misconfiguration(format!(
                "min_epochs ({}) exceeds max_epochs ({})",
                self.min_epochs, self.max_epochs
            )));
        }
        if let (Some(min), Some(max)) = (self.min_steps, self.max_steps) {
            if min > max {
                return Err(Error::Misconfiguration(format!(
                    "min_steps ({min}) exceeds max_steps ({max})"
                )));
            }
        }
        for (name, limit) in [
            ("limit_train_batches", self.limit_train_batches),
            ("val_check_interval", self.val_check_interval),
        ] {
            if let BatchLimit::Fraction(f) = limit {
                if !(0.0..=1.0).contains(&f) {
                    return Err(Error::Misconfiguration(format!(
                        "{name} fraction must be within [0.0, 1.0], got {f}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_pass_check() {
        let config = TrainerConfig::default();
        assert!(config.check().is_ok());
        assert_eq!(config.accumulate_grad_batches, 1);
        assert!(config.enable_validation);
    }

    #[test]
    fn test_builders() {
        let config = TrainerConfig::new()
            .with_max_epochs(3)
            .with_min_epochs(2)
            .with_max_steps(100)
            .with_gradient_accumulation(0)
            .with_val_check_interval(BatchLimit::Batches(5))
            .without_validation();
        assert_eq!(config.max_epochs, 3);
        assert_eq!(config.max_steps, Some(100));
        assert_eq!(config.accumulate_grad_batches, 1);
        assert_eq!(config.val_check_interval, BatchLimit::Batches(5));
        assert!(!config.enable_validation);
    }

    #[test]
    fn test_check_rejects_bad_bounds() {
        assert!(TrainerConfig::new().with_max_epochs(1).with_min_epochs(2).check().is_err());
        assert!(TrainerConfig::new()
            .with_min_steps(10)
            .with_max_steps(5)
            .check()
            .is_err());
        assert!(TrainerConfig::new()
            .with_limit_train_batches(BatchLimit::Fraction(1.5))
            .check()
            .is_err());
    }

    #[test]
    fn test_yaml_partial() {
        let config: TrainerConfig =
            serde_yaml::from_str("max_epochs: 4\nval_check_interval: 0.5\n").unwrap();
        assert_eq!(config.max_epochs, 4);
        assert_eq!(config.val_check_interval, BatchLimit::Fraction(0.5));
        assert_eq!(config.log_every_n_steps, 50);
        assert!(serde_yaml::from_str::<TrainerConfig>("bogus: 1\n").is_err());
    }
}
