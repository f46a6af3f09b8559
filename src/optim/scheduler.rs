//! Learning rate schedulers

use std::f32::consts::PI;

/// Learning rate scheduler trait
pub trait LRScheduler {
    /// Get the current learning rate
    fn get_lr(&self) -> f32;

    /// Step the scheduler (typically called after each epoch or batch)
    fn step(&mut self);

    /// Step with the value of a monitored metric
    ///
    /// Schedulers that do not react to metrics ignore the value.
    fn step_with_metric(&mut self, _metric: f32) {
        self.step();
    }
}

/// Cosine Annealing Learning Rate Scheduler
///
/// Decreases the learning rate following a cosine curve from lr_max to lr_min.
///
/// Formula: lr_t = lr_min + 0.5 * (lr_max - lr_min) * (1 + cos(π * t / T))
#[derive(Debug, Clone)]
pub struct CosineAnnealingLR {
    lr_max: f32,
    lr_min: f32,
    t_max: usize,
    current_step: usize,
}

impl CosineAnnealingLR {
    /// # Arguments
    /// * `lr_max` - Initial (maximum) learning rate
    /// * `t_max` - Total number of steps for the schedule
    /// * `lr_min` - Minimum learning rate
    pub fn new(lr_max: f32, t_max: usize, lr_min: f32) -> Self {
        Self {
            lr_max,
            lr_min,
            t_max,
            current_step: 0,
        }
    }

    /// Create scheduler with lr_min = 0
    pub fn default_min(lr_max: f32, t_max: usize) -> Self {
        Self::new(lr_max, t_max, 0.0)
    }
}

impl LRScheduler for CosineAnnealingLR {
    fn get_lr(&self) -> f32 {
        if self.current_step >= self.t_max {
            return self.lr_min;
        }

        let progress = self.current_step as f32 / self.t_max as f32;
        let cosine_decay = 0.5 * (1.0 + (PI * progress).cos());
        self.lr_min + (self.lr_max - self.lr_min) * cosine_decay
    }

    fn step(&mut self) {
        self.current_step += 1;
    }
}

/// Linear warmup from 0 to `lr_target` over `warmup_steps`, then constant
#[derive(Debug, Clone)]
pub struct LinearWarmupLR {
    lr_target: f32,
    warmup_steps: usize,
    current_step: usize,
}

impl LinearWarmupLR {
    pub fn new(lr_target: f32, warmup_steps: usize) -> Self {
        Self {
            lr_target,
            warmup_steps,
            current_step: 0,
        }
    }
}

impl LRScheduler for LinearWarmupLR {
    fn get_lr(&self) -> f32 {
        if self.warmup_steps == 0 {
            return self.lr_target;
        }
        let progress = (self.current_step as f32 / self.warmup_steps as f32).min(1.0);
        self.lr_target * progress
    }

    fn step(&mut self) {
        self.current_step += 1;
    }
}

/// Multiplies the learning rate by `gamma` every `step_size` steps
///
/// Formula: lr_t = lr_initial * gamma^(floor(t / step_size))
#[derive(Debug, Clone)]
pub struct StepDecayLR {
    lr_initial: f32,
    gamma: f32,
    step_size: usize,
    current_step: usize,
}

impl StepDecayLR {
    pub fn new(lr_initial: f32, step_size: usize, gamma: f32) -> Self {
        Self {
            lr_initial,
            gamma,
            step_size,
            current_step: 0,
        }
    }
}

impl LRScheduler for StepDecayLR {
    fn get_lr(&self) -> f32 {
        if self.step_size == 0 {
            return self.lr_initial;
        }
        let num_decays = self.current_step / self.step_size;
        self.lr_initial * self.gamma.powi(num_decays as i32)
    }

    fn step(&mut self) {
        self.current_step += 1;
    }
}

/// Cuts the learning rate when a monitored metric stops improving
///
/// After `patience` steps without the metric dropping below its best value by
/// more than `min_delta`, the rate is multiplied by `factor` (never below
/// `lr_min`) and the wait counter restarts.
#[derive(Debug, Clone)]
pub struct ReduceLROnPlateau {
    lr: f32,
    lr_min: f32,
    factor: f32,
    patience: usize,
    min_delta: f32,
    best: f32,
    wait: usize,
}

impl ReduceLROnPlateau {
    pub fn new(lr: f32, factor: f32, patience: usize) -> Self {
        Self {
            lr,
            lr_min: 0.0,
            factor,
            patience,
            min_delta: 0.0,
            best: f32::INFINITY,
            wait: 0,
        }
    }

    pub fn with_min_lr(mut self, lr_min: f32) -> Self {
        self.lr_min = lr_min;
        self
    }

    pub fn with_min_delta(mut self, min_delta: f32) -> Self {
        self.min_delta = min_delta;
        self
    }
}

impl LRScheduler for ReduceLROnPlateau {
    fn get_lr(&self) -> f32 {
        self.lr
    }

    /// Without a metric there is nothing to compare against
    fn step(&mut self) {}

    fn step_with_metric(&mut self, metric: f32) {
        if metric < self.best - self.min_delta {
            self.best = metric;
            self.wait = 0;
            return;
        }
        self.wait += 1;
        if self.wait > self.patience {
            let reduced = (self.lr * self.factor).max(self.lr_min);
            if reduced < self.lr {
                tracing::info!(from = self.lr, to = reduced, "reducing learning rate");
            }
            self.lr = reduced;
            self.wait = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_cosine_annealing_endpoints() {
        let mut scheduler = CosineAnnealingLR::new(1.0, 100, 0.1);
        assert_abs_diff_eq!(scheduler.get_lr(), 1.0, epsilon = 1e-6);

        for _ in 0..50 {
            scheduler.step();
        }
        assert_abs_diff_eq!(scheduler.get_lr(), 0.55, epsilon = 1e-4);

        for _ in 0..100 {
            scheduler.step();
        }
        // stays at lr_min past t_max
        assert_abs_diff_eq!(scheduler.get_lr(), 0.1, epsilon = 1e-6);
    }

    #[test]
    fn test_cosine_annealing_decreases_monotonically() {
        let mut scheduler = CosineAnnealingLR::default_min(1.0, 100);
        let mut prev_lr = scheduler.get_lr();

        for _ in 0..100 {
            scheduler.step();
            let current_lr = scheduler.get_lr();
            assert!(
                current_lr <= prev_lr,
                "Learning rate should decrease monotonically: prev={}, current={}",
                prev_lr,
                current_lr
            );
            prev_lr = current_lr;
        }
    }

    #[test]
    fn test_linear_warmup() {
        let mut scheduler = LinearWarmupLR::new(1.0, 4);
        assert_abs_diff_eq!(scheduler.get_lr(), 0.0);
        scheduler.step();
        scheduler.step();
        assert_abs_diff_eq!(scheduler.get_lr(), 0.5);
        for _ in 0..10 {
            scheduler.step();
        }
        assert_abs_diff_eq!(scheduler.get_lr(), 1.0);
        assert_abs_diff_eq!(LinearWarmupLR::new(0.3, 0).get_lr(), 0.3);
    }

    #[test]
    fn test_step_decay() {
        let mut scheduler = StepDecayLR::new(1.0, 2, 0.5);
        let lrs: Vec<f32> = (0..5)
            .map(|_| {
                let lr = scheduler.get_lr();
                scheduler.step();
                lr
            })
            .collect();
        assert_eq!(lrs, vec![1.0, 1.0, 0.5, 0.5, 0.25]);
    }

    #[test]
    fn test_metric_step_defaults_to_plain_step() {
        let mut scheduler = StepDecayLR::new(1.0, 1, 0.1);
        scheduler.step_with_metric(123.0);
        assert_abs_diff_eq!(scheduler.get_lr(), 0.1, epsilon = 1e-6);
    }

    #[test]
    fn test_reduce_on_plateau() {
        let mut scheduler = ReduceLROnPlateau::new(1.0, 0.5, 1).with_min_lr(0.3);
        scheduler.step_with_metric(1.0);
        scheduler.step_with_metric(1.0);
        assert_abs_diff_eq!(scheduler.get_lr(), 1.0);
        scheduler.step_with_metric(1.0);
        assert_abs_diff_eq!(scheduler.get_lr(), 0.5);

        // improvement resets the wait
        scheduler.step_with_metric(0.5);
        scheduler.step_with_metric(0.5);
        assert_abs_diff_eq!(scheduler.get_lr(), 0.5);
        scheduler.step_with_metric(0.5);
        assert_abs_diff_eq!(scheduler.get_lr(), 0.3);

        scheduler.step();
        assert_abs_diff_eq!(scheduler.get_lr(), 0.3);
    }
}
