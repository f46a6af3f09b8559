//! Validation scheduling
//!
//! Decides after which training batches the evaluation loop runs. The
//! predicate has two call sites: a mid-epoch check after every batch
//! (`on_epoch = false`) and a single end-of-epoch check (`on_epoch = true`).
//! For a finite check interval and no stop request the two never both fire
//! for the same batch.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A batch count that may be unbounded (iterable datasets without a length)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchCount {
    Finite(usize),
    Infinite,
}

impl BatchCount {
    pub fn is_infinite(self) -> bool {
        matches!(self, Self::Infinite)
    }

    pub fn finite(self) -> Option<usize> {
        match self {
            Self::Finite(n) => Some(n),
            Self::Infinite => None,
        }
    }

    /// `n mod self == 0`, where `n mod inf == n`
    pub fn divides(self, n: usize) -> bool {
        match self {
            Self::Finite(0) => false,
            Self::Finite(k) => n % k == 0,
            Self::Infinite => n == 0,
        }
    }

    /// True once `consumed` batches cover the whole count
    pub fn reached_by(self, consumed: usize) -> bool {
        match self {
            Self::Finite(k) => consumed >= k,
            Self::Infinite => false,
        }
    }
}

impl From<usize> for BatchCount {
    fn from(n: usize) -> Self {
        Self::Finite(n)
    }
}

impl fmt::Display for BatchCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finite(n) => write!(f, "{n}"),
            Self::Infinite => write!(f, "inf"),
        }
    }
}

/// An absolute number of batches or a fraction of the epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchLimit {
    Batches(usize),
    Fraction(f32),
}

impl Default for BatchLimit {
    fn default() -> Self {
        Self::Fraction(1.0)
    }
}

impl BatchLimit {
    /// Number of training batches per epoch given the dataloader length
    pub fn resolve_train_batches(self, dataloader_len: Option<usize>) -> Result<BatchCount> {
        match (self, dataloader_len) {
            (Self::Batches(k), Some(n)) => Ok(BatchCount::Finite(k.min(n))),
            (Self::Batches(k), None) => Ok(BatchCount::Finite(k)),
            (Self::Fraction(f), Some(n)) => Ok(BatchCount::Finite((n as f32 * f) as usize)),
            (Self::Fraction(f), None) if f == 1.0 => Ok(BatchCount::Infinite),
            (Self::Fraction(f), None) => Err(Error::Misconfiguration(format!(
                "limit_train_batches must be 1.0 or an integer for a dataloader without length, got {f}"
            ))),
        }
    }

    /// Batches between mid-epoch validation runs
    pub fn resolve_val_check_batch(self, num_training_batches: BatchCount) -> Result<BatchCount> {
        match (self, num_training_batches) {
            (Self::Batches(k), BatchCount::Finite(n)) if k > n => Err(Error::Misconfiguration(
                format!(
                    "val_check_interval ({k}) must be less than or equal to the number of training batches ({n})"
                ),
            )),
            (Self::Batches(k), _) => Ok(BatchCount::Finite(k)),
            (Self::Fraction(f), BatchCount::Finite(n)) => {
                Ok(BatchCount::Finite(((n as f32 * f) as usize).max(1)))
            }
            (Self::Fraction(f), BatchCount::Infinite) if f == 1.0 => Ok(BatchCount::Infinite),
            (Self::Fraction(f), BatchCount::Infinite) => Err(Error::Misconfiguration(format!(
                "val_check_interval must be 1.0 or an integer for a dataloader without length, got {f}"
            ))),
        }
    }
}

/// Inputs of the validation predicate that stay fixed for an epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValCheckSchedule {
    pub val_check_batch: BatchCount,
    pub check_val_every_n_epoch: usize,
    pub num_training_batches: BatchCount,
    pub enable_validation: bool,
}

impl ValCheckSchedule {
    /// Should validation run after batch `batch_idx`?
    pub fn should_check(
        &self,
        current_epoch: usize,
        should_stop: bool,
        batch_idx: usize,
        is_last_batch: bool,
        on_epoch: bool,
    ) -> bool {
        let batch_number = batch_idx + 1;

        let is_val_check_batch = self.val_check_batch.divides(batch_number);
        let is_val_check_epoch = self.check_val_every_n_epoch > 0
            && (current_epoch + 1) % self.check_val_every_n_epoch == 0;
        let can_check_val = self.enable_validation && is_val_check_epoch;
        let is_last_batch_for_infinite_dataset =
            is_last_batch && self.val_check_batch.is_infinite();
        let epoch_end_val_check = self.num_training_batches.divides(batch_number);

        let should_check_val = if on_epoch {
            (is_val_check_batch && epoch_end_val_check)
                || should_stop
                || is_last_batch_for_infinite_dataset
        } else {
            is_val_check_batch && !epoch_end_val_check
        };

        should_check_val && can_check_val
    }
}
