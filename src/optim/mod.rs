//! Learning-rate scheduling

mod connector;
mod scheduler;

pub use connector::{Interval, ScheduledLr, SchedulerConnector};
pub use scheduler::{
    CosineAnnealingLR, LRScheduler, LinearWarmupLR, ReduceLROnPlateau, StepDecayLR,
};
