//! Model hook capabilities
//!
//! A model declares which hooks it implements by populating [`ModelHooks`]
//! when it is constructed. An absent hook is `None`; the loop then falls back
//! to the accelerator for hooks that have a backend default.
//!
//! # Example
//!
//! ```
//! use vuelta::train::ModelHooks;
//!
//! let hooks: ModelHooks<Vec<f32>> = ModelHooks::new()
//!     .with_training_epoch_end(|outputs| {
//!         println!("epoch produced {} batch outputs", outputs.len());
//!         Ok(None)
//!     })
//!     .with_on_train_epoch_end(|| Ok(()));
//!
//! assert!(hooks.has_training_epoch_end());
//! ```

use super::output::ProcessedOutput;
use crate::error::Result;
use std::collections::HashSet;
use std::fmt;

pub const ON_TRAIN_EPOCH_START: &str = "on_train_epoch_start";
pub const ON_TRAIN_BATCH_END: &str = "on_train_batch_end";
pub const ON_BATCH_END: &str = "on_batch_end";
pub const TRAINING_EPOCH_END: &str = "training_epoch_end";
pub const ON_TRAIN_EPOCH_END: &str = "on_train_epoch_end";
pub const ON_EPOCH_END: &str = "on_epoch_end";

pub(crate) const LEGACY_EPOCH_END_WARNING: &str =
    "`on_train_epoch_end(outputs)` is deprecated; register the hook without the `outputs` argument";

/// Hook taking no arguments
pub type UnitHook = Box<dyn FnMut() -> Result<()> + Send>;

/// `on_train_batch_end(outputs, batch, batch_idx, dataloader_idx)`
pub type BatchEndHook<B> = Box<dyn FnMut(&ProcessedOutput, &B, usize, usize) -> Result<()> + Send>;

/// `training_epoch_end(outputs)`; must return `None`
pub type TrainingEpochEndHook =
    Box<dyn FnMut(&ProcessedOutput) -> Result<Option<serde_json::Value>> + Send>;

/// The two registered forms of `on_train_epoch_end`
pub enum EpochEndHook {
    Current(UnitHook),
    /// Deprecated form receiving the processed epoch outputs
    Legacy(Box<dyn FnMut(&ProcessedOutput) -> Result<()> + Send>),
}

impl EpochEndHook {
    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy(_))
    }
}

/// Optional hook overrides of a model
pub struct ModelHooks<B> {
    on_train_epoch_start: Option<UnitHook>,
    on_train_batch_end: Option<BatchEndHook<B>>,
    on_batch_end: Option<UnitHook>,
    training_epoch_end: Option<TrainingEpochEndHook>,
    on_train_epoch_end: Option<EpochEndHook>,
    on_epoch_end: Option<UnitHook>,
}

impl<B> ModelHooks<B> {
    /// Model without any overrides
    pub fn new() -> Self {
        Self {
            on_train_epoch_start: None,
            on_train_batch_end: None,
            on_batch_end: None,
            training_epoch_end: None,
            on_train_epoch_end: None,
            on_epoch_end: None,
        }
    }

    pub fn with_on_train_epoch_start<F>(mut self, f: F) -> Self
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        self.on_train_epoch_start = Some(Box::new(f));
        self
    }

    pub fn with_on_train_batch_end<F>(mut self, f: F) -> Self
    where
        F: FnMut(&ProcessedOutput, &B, usize, usize) -> Result<()> + Send + 'static,
    {
        self.on_train_batch_end = Some(Box::new(f));
        self
    }

    pub fn with_on_batch_end<F>(mut self, f: F) -> Self
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        self.on_batch_end = Some(Box::new(f));
        self
    }

    /// Custom epoch-end aggregation. Returning `Some` is a misconfiguration.
    pub fn with_training_epoch_end<F>(mut self, f: F) -> Self
    where
        F: FnMut(&ProcessedOutput) -> Result<Option<serde_json::Value>> + Send + 'static,
    {
        self.training_epoch_end = Some(Box::new(f));
        self
    }

    pub fn with_on_train_epoch_end<F>(mut self, f: F) -> Self
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        self.on_train_epoch_end = Some(EpochEndHook::Current(Box::new(f)));
        self
    }

    /// Register the deprecated `on_train_epoch_end(outputs)` form
    pub fn with_legacy_on_train_epoch_end<F>(mut self, f: F) -> Self
    where
        F: FnMut(&ProcessedOutput) -> Result<()> + Send + 'static,
    {
        self.on_train_epoch_end = Some(EpochEndHook::Legacy(Box::new(f)));
        self
    }

    pub fn with_on_epoch_end<F>(mut self, f: F) -> Self
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        self.on_epoch_end = Some(Box::new(f));
        self
    }

    pub fn has_on_train_batch_end(&self) -> bool {
        self.on_train_batch_end.is_some()
    }

    pub fn has_training_epoch_end(&self) -> bool {
        self.training_epoch_end.is_some()
    }

    pub fn has_on_train_epoch_end(&self) -> bool {
        self.on_train_epoch_end.is_some()
    }

    // Each `call_*` returns `None` when the model has no override, so the
    // caller can fall back to the accelerator.

    pub(crate) fn call_on_train_epoch_start(&mut self) -> Option<Result<()>> {
        self.on_train_epoch_start.as_mut().map(|f| f())
    }

    pub(crate) fn call_on_train_batch_end(
        &mut self,
        outputs: &ProcessedOutput,
        batch: &B,
        batch_idx: usize,
        dataloader_idx: usize,
    ) -> Option<Result<()>> {
        self.on_train_batch_end
            .as_mut()
            .map(|f| f(outputs, batch, batch_idx, dataloader_idx))
    }

    pub(crate) fn call_on_batch_end(&mut self) -> Option<Result<()>> {
        self.on_batch_end.as_mut().map(|f| f())
    }

    pub(crate) fn call_training_epoch_end(
        &mut self,
        outputs: &ProcessedOutput,
    ) -> Option<Result<Option<serde_json::Value>>> {
        self.training_epoch_end.as_mut().map(|f| f(outputs))
    }

    pub(crate) fn call_on_train_epoch_end(
        &mut self,
        outputs: &ProcessedOutput,
        warnings: &mut WarningCache,
    ) -> Option<Result<()>> {
        match self.on_train_epoch_end.as_mut()? {
            EpochEndHook::Current(f) => Some(f()),
            EpochEndHook::Legacy(f) => {
                warnings.warn(LEGACY_EPOCH_END_WARNING);
                Some(f(outputs))
            }
        }
    }

    pub(crate) fn call_on_epoch_end(&mut self) -> Option<Result<()>> {
        self.on_epoch_end.as_mut().map(|f| f())
    }
}

impl<B> Default for ModelHooks<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> fmt::Debug for ModelHooks<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHooks")
            .field("on_train_epoch_start", &self.on_train_epoch_start.is_some())
            .field("on_train_batch_end", &self.on_train_batch_end.is_some())
            .field("on_batch_end", &self.on_batch_end.is_some())
            .field("training_epoch_end", &self.training_epoch_end.is_some())
            .field(
                "on_train_epoch_end",
                &self.on_train_epoch_end.as_ref().map(EpochEndHook::is_legacy),
            )
            .field("on_epoch_end", &self.on_epoch_end.is_some())
            .finish()
    }
}

/// Emits each distinct warning once
#[derive(Debug, Default, Clone)]
pub struct WarningCache {
    seen: HashSet<String>,
}

impl WarningCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log `message` unless it was already logged. Returns true when emitted.
    pub fn warn(&mut self, message: &str) -> bool {
        if self.seen.insert(message.to_owned()) {
            tracing::warn!("{message}");
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_absent_hooks_return_none() {
        let mut hooks: ModelHooks<u32> = ModelHooks::new();
        let out = ProcessedOutput::default();
        let mut warnings = WarningCache::new();

        assert!(hooks.call_on_batch_end().is_none());
        assert!(hooks.call_on_train_batch_end(&out, &7, 0, 0).is_none());
        assert!(hooks.call_training_epoch_end(&out).is_none());
        assert!(hooks.call_on_train_epoch_end(&out, &mut warnings).is_none());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_batch_end_hook_receives_batch() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_hook = seen.clone();
        let mut hooks: ModelHooks<usize> =
            ModelHooks::new().with_on_train_batch_end(move |_, batch, idx, _| {
                seen_in_hook.store(*batch + idx, Ordering::SeqCst);
                Ok(())
            });

        hooks
            .call_on_train_batch_end(&ProcessedOutput::default(), &40, 2, 0)
            .unwrap()
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn test_legacy_epoch_end_warns_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_hook = calls.clone();
        let mut hooks: ModelHooks<()> =
            ModelHooks::new().with_legacy_on_train_epoch_end(move |outputs| {
                calls_in_hook.fetch_add(outputs.len(), Ordering::SeqCst);
                Ok(())
            });
        let mut warnings = WarningCache::new();
        let out = ProcessedOutput::List(vec![ProcessedOutput::default(); 3]);

        for _ in 0..2 {
            hooks.call_on_train_epoch_end(&out, &mut warnings).unwrap().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_warning_cache_dedupes() {
        let mut cache = WarningCache::new();
        assert!(cache.warn("a"));
        assert!(!cache.warn("a"));
        assert!(cache.warn("b"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_debug_shows_capabilities() {
        let hooks: ModelHooks<()> = ModelHooks::new().with_legacy_on_train_epoch_end(|_| Ok(()));
        let dbg = format!("{hooks:?}");
        assert!(dbg.contains("on_train_epoch_end: Some(true)"));
        assert!(dbg.contains("training_epoch_end: false"));
    }
}
