//! Learning-rate scheduler stepping for the training loop
//!
//! Each scheduler is registered with an [`Interval`]. Step-interval
//! schedulers advance at every optimizer boundary inside the epoch;
//! epoch-interval schedulers advance once after each epoch.

use super::scheduler::LRScheduler;
use crate::error::{Error, Result};
use crate::train::Metrics;
use serde::{Deserialize, Serialize};
use std::fmt;

/// When a scheduler advances
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Step,
    #[default]
    Epoch,
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step => write!(f, "step"),
            Self::Epoch => write!(f, "epoch"),
        }
    }
}

/// A scheduler with its stepping configuration
pub struct ScheduledLr {
    scheduler: Box<dyn LRScheduler + Send>,
    interval: Interval,
    frequency: usize,
    monitor: Option<String>,
    ticks: usize,
}

impl ScheduledLr {
    pub fn new<S: LRScheduler + Send + 'static>(scheduler: S, interval: Interval) -> Self {
        Self {
            scheduler: Box::new(scheduler),
            interval,
            frequency: 1,
            monitor: None,
            ticks: 0,
        }
    }

    /// Advance only on every `frequency`-th tick of the interval
    pub fn with_frequency(mut self, frequency: usize) -> Self {
        self.frequency = frequency.max(1);
        self
    }

    /// Feed the named callback metric to the scheduler on each step
    pub fn with_monitor(mut self, key: impl Into<String>) -> Self {
        self.monitor = Some(key.into());
        self
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn lr(&self) -> f32 {
        self.scheduler.get_lr()
    }
}

impl fmt::Debug for ScheduledLr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledLr")
            .field("interval", &self.interval)
            .field("frequency", &self.frequency)
            .field("monitor", &self.monitor)
            .field("lr", &self.lr())
            .finish()
    }
}

/// Owns the run's schedulers
#[derive(Debug, Default)]
pub struct SchedulerConnector {
    schedulers: Vec<ScheduledLr>,
}

impl SchedulerConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, scheduler: ScheduledLr) {
        self.schedulers.push(scheduler);
    }

    pub fn len(&self) -> usize {
        self.schedulers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedulers.is_empty()
    }

    /// Current learning rate of every scheduler, in registration order
    pub fn lrs(&self) -> Vec<f32> {
        self.schedulers.iter().map(ScheduledLr::lr).collect()
    }

    /// Tick every scheduler registered for `interval`
    ///
    /// Returns how many schedulers actually advanced. A monitored metric
    /// missing from `metrics` is a misconfiguration.
    pub fn update_learning_rates(&mut self, interval: Interval, metrics: &Metrics) -> Result<usize> {
        let mut stepped = 0;

        for sched in self
            .schedulers
            .iter_mut()
            .filter(|s| s.interval == interval)
        {
            sched.ticks += 1;
            if sched.ticks % sched.frequency != 0 {
                continue;
            }

            match sched.monitor.as_deref() {
                Some(key) => {
                    let value = metrics.get(key).copied().ok_or_else(|| {
                        let available: Vec<&str> = metrics.keys().map(String::as_str).collect();
                        Error::Misconfiguration(format!(
                            "scheduler conditioned on metric `{key}` which is not available; available metrics are: {available:?}"
                        ))
                    })?;
                    sched.scheduler.step_with_metric(value);
                }
                None => sched.scheduler.step(),
            }
            stepped += 1;
        }

        if stepped > 0 {
            tracing::trace!(%interval, lrs = ?self.lrs(), "learning rates updated");
        }
        Ok(stepped)
    }
}
