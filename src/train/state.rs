//! Loop counters and trainer run state

use super::validation::BatchCount;
use serde::{Deserialize, Serialize};

/// Counters that survive across epochs
///
/// Owned by the fit loop and handed to each epoch loop, which returns the
/// advanced values when the epoch finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Optimizer steps taken so far
    pub global_step: usize,
    /// Batches pulled from the dataloader across all epochs
    pub total_batch_idx: usize,
}

/// Lifecycle of a single epoch loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoopState {
    #[default]
    NotStarted,
    Running,
    Done,
}

/// Per-epoch counters of the epoch loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpochState {
    /// Index of the most recently pulled batch within the epoch
    pub batch_idx: usize,
    /// Batches pulled this epoch
    pub batches_seen: usize,
    pub dataloader_idx: usize,
    pub is_last_batch: bool,
    /// Set when the batch loop asked to end the epoch early
    pub skip_remaining: bool,
    pub min_steps: Option<usize>,
    pub max_steps: Option<usize>,
}

impl EpochState {
    pub fn new(min_steps: Option<usize>, max_steps: Option<usize>) -> Self {
        Self {
            min_steps,
            max_steps,
            ..Self::default()
        }
    }

    /// Clear the per-epoch counters, keeping the step bounds
    pub fn reset(&mut self) {
        *self = Self::new(self.min_steps, self.max_steps);
    }

    pub fn min_steps_reached(&self, global_step: usize) -> bool {
        self.min_steps.map_or(true, |min| global_step >= min)
    }

    pub fn max_steps_reached(&self, global_step: usize) -> bool {
        self.max_steps.is_some_and(|max| global_step >= max)
    }
}

/// What the trainer is currently running
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainerStage {
    #[default]
    Training,
    Validating,
}

/// Mutable run state visible to the loops and callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainerState {
    pub current_epoch: usize,
    /// External stop request (callbacks, user code)
    pub should_stop: bool,
    pub num_training_batches: BatchCount,
    pub val_check_batch: BatchCount,
    pub stage: TrainerStage,
    /// True on the process that owns logger flushing
    pub is_global_zero: bool,
    /// Set once any batch has completed
    pub has_trained: bool,
}

impl Default for TrainerState {
    fn default() -> Self {
        Self {
            current_epoch: 0,
            should_stop: false,
            num_training_batches: BatchCount::Infinite,
            val_check_batch: BatchCount::Infinite,
            stage: TrainerStage::Training,
            is_global_zero: true,
            has_trained: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_keeps_bounds() {
        let mut state = EpochState::new(Some(2), Some(10));
        state.batch_idx = 7;
        state.batches_seen = 8;
        state.skip_remaining = true;
        state.reset();
        assert_eq!(state, EpochState::new(Some(2), Some(10)));
    }

    #[test]
    fn test_step_bounds() {
        let state = EpochState::new(Some(5), Some(10));
        assert!(!state.min_steps_reached(4));
        assert!(state.min_steps_reached(5));
        assert!(!state.max_steps_reached(9));
        assert!(state.max_steps_reached(10));

        let unbounded = EpochState::default();
        assert!(unbounded.min_steps_reached(0));
        assert!(!unbounded.max_steps_reached(usize::MAX));
    }
}
