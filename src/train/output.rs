//! Step results and the output collapse used for hook consumption
//!
//! A batch loop reports its work as a three-level structure:
//! `[optimizer][batch][tbptt split]` of [`StepResult`]. Hooks never see that
//! raw shape. [`OutputTree::collapse`] turns it into a [`ProcessedOutput`]:
//!
//! 1. optimizers with no batch outputs are dropped
//! 2. in [`CollapseMode::Batch`] the batch level (always one element) is removed
//! 3. a tbptt level holding a single split collapses to that split
//! 4. a single surviving optimizer collapses the optimizer level
//!
//! Every step becomes a plain mapping of its extra values plus `loss`.
//!
//! # Example
//!
//! ```
//! use vuelta::train::{OutputTree, CollapseMode, StepResult};
//!
//! let step = StepResult::new(0.25).with_extra("acc", 0.9);
//! let tree = OutputTree::from_batch(&[vec![step]]);
//!
//! let processed = tree.collapse(CollapseMode::Batch);
//! let map = processed.as_step().unwrap();
//! assert_eq!(map["loss"], 0.25);
//! assert_eq!(map["acc"], 0.9);
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key injected into every processed step mapping
pub const LOSS_KEY: &str = "loss";

/// Hook-facing mapping of one step: extra logged values plus `loss`
pub type StepMap = BTreeMap<String, f32>;

/// Whether a step result takes part in automatic epoch-end reduction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultKind {
    /// Plain step output (a bare loss plus extras)
    Plain,
    /// Reducible result carrying its epoch-end reduction flag
    Reducible { reduce_on_epoch_end: bool },
}

/// The atomic result of one optimization step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    minimize: f32,
    extra: StepMap,
    kind: ResultKind,
}

impl StepResult {
    /// Plain step result with the given minimization target
    pub fn new(minimize: f32) -> Self {
        Self {
            minimize,
            extra: StepMap::new(),
            kind: ResultKind::Plain,
        }
    }

    /// Reducible step result
    pub fn reducible(minimize: f32, reduce_on_epoch_end: bool) -> Self {
        Self {
            minimize,
            extra: StepMap::new(),
            kind: ResultKind::Reducible {
                reduce_on_epoch_end,
            },
        }
    }

    /// Attach an extra logged value
    pub fn with_extra(mut self, key: impl Into<String>, value: f32) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn minimize(&self) -> f32 {
        self.minimize
    }

    pub fn extra(&self) -> &StepMap {
        &self.extra
    }

    pub fn kind(&self) -> ResultKind {
        self.kind
    }

    pub fn is_reducible(&self) -> bool {
        matches!(self.kind, ResultKind::Reducible { .. })
    }

    /// True for reducible results flagged for automatic epoch-end reduction
    pub fn reduces_on_epoch_end(&self) -> bool {
        matches!(
            self.kind,
            ResultKind::Reducible {
                reduce_on_epoch_end: true
            }
        )
    }

    /// Hook-facing mapping. A `loss` extra is shadowed by the minimization target.
    pub fn to_map(&self) -> StepMap {
        let mut out = self.extra.clone();
        out.insert(LOSS_KEY.to_string(), self.minimize);
        out
    }
}

impl TryFrom<StepMap> for StepResult {
    type Error = Error;

    fn try_from(mut map: StepMap) -> Result<Self> {
        let minimize = map.remove(LOSS_KEY).ok_or_else(|| {
            Error::InvalidOutput(format!("step mapping has no `{LOSS_KEY}` key"))
        })?;
        Ok(Self {
            minimize,
            extra: map,
            kind: ResultKind::Plain,
        })
    }
}

/// Termination signal returned by the batch loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BatchSignal {
    #[default]
    Continue,
    /// Skip the rest of the epoch
    StopEpoch,
}

impl BatchSignal {
    /// Integer code a training step returns to end the epoch early
    pub const STOP_EPOCH_CODE: i32 = -1;

    pub fn from_code(code: i32) -> Self {
        if code == Self::STOP_EPOCH_CODE {
            Self::StopEpoch
        } else {
            Self::Continue
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Continue => 0,
            Self::StopEpoch => Self::STOP_EPOCH_CODE,
        }
    }
}

/// Everything one batch-loop run produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutput {
    pub signal: BatchSignal,
    /// `[optimizer][tbptt split]`
    pub training_step_output_for_epoch_end: Vec<Vec<StepResult>>,
}

impl BatchOutput {
    pub fn new(outputs: Vec<Vec<StepResult>>) -> Self {
        Self {
            signal: BatchSignal::Continue,
            training_step_output_for_epoch_end: outputs,
        }
    }

    /// Output of a batch whose training step asked to end the epoch
    pub fn stop_epoch() -> Self {
        Self {
            signal: BatchSignal::StopEpoch,
            training_step_output_for_epoch_end: Vec::new(),
        }
    }

    pub fn is_stop_epoch(&self) -> bool {
        self.signal == BatchSignal::StopEpoch
    }
}

/// One batch worth of results for a single optimizer
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEntry {
    /// Unwrapped single step
    Single(StepResult),
    /// One result per tbptt split
    Steps(Vec<StepResult>),
}

impl BatchEntry {
    pub fn steps(&self) -> &[StepResult] {
        match self {
            Self::Single(step) => std::slice::from_ref(step),
            Self::Steps(steps) => steps,
        }
    }
}

/// Which outer dimension the tree carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollapseMode {
    /// Single batch: the batch level always holds exactly one entry
    Batch,
    /// Whole epoch: the batch level holds every retained batch
    Epoch,
}

/// `[optimizer][batch][tbptt split]` tree of step results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputTree {
    optimizers: Vec<Vec<BatchEntry>>,
}

impl OutputTree {
    pub fn new(optimizers: Vec<Vec<BatchEntry>>) -> Self {
        Self { optimizers }
    }

    /// Tree for a single batch given `[optimizer][tbptt split]` results.
    /// Optimizers that produced nothing keep an empty batch level.
    pub fn from_batch(outputs: &[Vec<StepResult>]) -> Self {
        let optimizers = outputs
            .iter()
            .map(|steps| {
                if steps.is_empty() {
                    Vec::new()
                } else {
                    vec![BatchEntry::Steps(steps.clone())]
                }
            })
            .collect();
        Self { optimizers }
    }

    pub fn num_optimizers(&self) -> usize {
        self.optimizers.len()
    }

    pub fn optimizers(&self) -> &[Vec<BatchEntry>] {
        &self.optimizers
    }

    /// Collapse into the hook-facing shape (see module docs)
    pub fn collapse(&self, mode: CollapseMode) -> ProcessedOutput {
        let mut processed = Vec::with_capacity(self.optimizers.len());

        for batches in &self.optimizers {
            if batches.is_empty() {
                continue;
            }

            let mut per_batch: Vec<ProcessedOutput> = batches
                .iter()
                .map(|entry| collapse_splits(entry.steps()))
                .collect();

            match mode {
                CollapseMode::Batch => {
                    debug_assert_eq!(per_batch.len(), 1, "batch mode carries one batch");
                    processed.push(per_batch.swap_remove(0));
                }
                CollapseMode::Epoch => processed.push(ProcessedOutput::List(per_batch)),
            }
        }

        if processed.len() == 1 {
            processed.swap_remove(0)
        } else {
            ProcessedOutput::List(processed)
        }
    }
}

fn collapse_splits(steps: &[StepResult]) -> ProcessedOutput {
    match steps {
        [single] => ProcessedOutput::Step(single.to_map()),
        _ => ProcessedOutput::List(
            steps
                .iter()
                .map(|s| ProcessedOutput::Step(s.to_map()))
                .collect(),
        ),
    }
}

/// Collapsed, hook-ready output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProcessedOutput {
    Step(StepMap),
    List(Vec<ProcessedOutput>),
}

impl Default for ProcessedOutput {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl ProcessedOutput {
    pub fn as_step(&self) -> Option<&StepMap> {
        match self {
            Self::Step(map) => Some(map),
            Self::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ProcessedOutput]> {
        match self {
            Self::Step(_) => None,
            Self::List(items) => Some(items),
        }
    }

    /// Number of top-level entries (a bare step counts as one)
    pub fn len(&self) -> usize {
        match self {
            Self::Step(_) => 1,
            Self::List(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::List(items) if items.is_empty())
    }

    /// Nesting depth: 0 for a bare step
    pub fn depth(&self) -> usize {
        match self {
            Self::Step(_) => 0,
            Self::List(items) => 1 + items.iter().map(Self::depth).max().unwrap_or(0),
        }
    }

    /// All step mappings in depth-first order
    pub fn steps(&self) -> Vec<&StepMap> {
        let mut out = Vec::new();
        self.collect_steps(&mut out);
        out
    }

    fn collect_steps<'a>(&'a self, out: &mut Vec<&'a StepMap>) {
        match self {
            Self::Step(map) => out.push(map),
            Self::List(items) => items.iter().for_each(|item| item.collect_steps(out)),
        }
    }

    /// All `loss` values in depth-first order
    pub fn losses(&self) -> Vec<f32> {
        self.steps()
            .into_iter()
            .filter_map(|map| map.get(LOSS_KEY).copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(loss: f32) -> StepResult {
        StepResult::new(loss).with_extra("acc", loss / 2.0)
    }

    #[test]
    fn test_to_map_injects_loss() {
        let map = StepResult::new(1.5).with_extra("lr", 0.1).to_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map[LOSS_KEY], 1.5);
        assert_eq!(map["lr"], 0.1);
    }

    #[test]
    fn test_to_map_loss_shadows_extra() {
        let map = StepResult::new(2.0).with_extra("loss", 9.0).to_map();
        assert_eq!(map[LOSS_KEY], 2.0);
    }

    #[test]
    fn test_try_from_map_requires_loss() {
        let mut map = StepMap::new();
        map.insert("acc".into(), 0.5);
        assert!(matches!(
            StepResult::try_from(map),
            Err(Error::InvalidOutput(_))
        ));
    }

    #[test]
    fn test_signal_codes() {
        assert_eq!(BatchSignal::from_code(-1), BatchSignal::StopEpoch);
        assert_eq!(BatchSignal::from_code(0), BatchSignal::Continue);
        assert_eq!(BatchSignal::from_code(7), BatchSignal::Continue);
        assert_eq!(BatchSignal::StopEpoch.code(), -1);
        assert!(BatchOutput::stop_epoch().is_stop_epoch());
    }

    #[test]
    fn test_batch_mode_single_optimizer_single_split() {
        let tree = OutputTree::from_batch(&[vec![step(0.5)]]);
        let out = tree.collapse(CollapseMode::Batch);
        assert_eq!(out.depth(), 0);
        assert_eq!(out.as_step().unwrap()[LOSS_KEY], 0.5);
    }

    #[test]
    fn test_batch_mode_tbptt_keeps_split_level() {
        let tree = OutputTree::from_batch(&[vec![step(0.1), step(0.2), step(0.3)]]);
        let out = tree.collapse(CollapseMode::Batch);
        assert_eq!(out.len(), 3);
        assert_eq!(out.depth(), 1);
        assert_eq!(out.losses(), vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_batch_mode_two_optimizers() {
        let tree = OutputTree::from_batch(&[vec![step(0.1)], vec![step(0.2)]]);
        let out = tree.collapse(CollapseMode::Batch);
        let items = out.as_list().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_step().unwrap()[LOSS_KEY], 0.1);
        assert_eq!(items[1].as_step().unwrap()[LOSS_KEY], 0.2);
    }

    #[test]
    fn test_empty_optimizer_pruned_in_order() {
        let tree = OutputTree::new(vec![
            vec![BatchEntry::Single(step(1.0)), BatchEntry::Single(step(1.1))],
            vec![],
            vec![BatchEntry::Single(step(3.0))],
        ]);
        let out = tree.collapse(CollapseMode::Epoch);
        let items = out.as_list().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].losses(), vec![1.0, 1.1]);
        assert_eq!(items[1].losses(), vec![3.0]);
    }

    #[test]
    fn test_pruning_down_to_one_optimizer_collapses_outer_level() {
        let tree = OutputTree::from_batch(&[vec![], vec![step(0.7)]]);
        let out = tree.collapse(CollapseMode::Batch);
        assert_eq!(out.as_step().unwrap()[LOSS_KEY], 0.7);
    }

    #[test]
    fn test_epoch_mode_flat_sequence() {
        let entries = (0..5).map(|i| BatchEntry::Single(step(i as f32))).collect();
        let out = OutputTree::new(vec![entries]).collapse(CollapseMode::Epoch);
        assert_eq!(out.len(), 5);
        assert_eq!(out.depth(), 1);
        assert!(out.steps().iter().all(|m| m.contains_key(LOSS_KEY) && m.contains_key("acc")));
    }

    #[test]
    fn test_epoch_mode_tbptt_nested() {
        let entries = vec![
            BatchEntry::Steps(vec![step(0.1), step(0.2)]),
            BatchEntry::Steps(vec![step(0.3), step(0.4)]),
        ];
        let out = OutputTree::new(vec![entries]).collapse(CollapseMode::Epoch);
        assert_eq!(out.len(), 2);
        assert_eq!(out.depth(), 2);
        assert_eq!(out.losses(), vec![0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn test_empty_tree_is_empty_list() {
        let out = OutputTree::default().collapse(CollapseMode::Epoch);
        assert!(out.is_empty());
        let out = OutputTree::from_batch(&[vec![], vec![]]).collapse(CollapseMode::Batch);
        assert!(out.is_empty());
    }

    #[test]
    fn test_collapsed_output_round_trips() {
        let entries = (0..3).map(|i| BatchEntry::Single(step(i as f32 + 0.5))).collect();
        let first = OutputTree::new(vec![entries]).collapse(CollapseMode::Epoch);

        let rebuilt: Vec<BatchEntry> = first
            .steps()
            .into_iter()
            .map(|map| StepResult::try_from(map.clone()).map(BatchEntry::Single))
            .collect::<Result<_>>()
            .unwrap();
        let second = OutputTree::new(vec![rebuilt]).collapse(CollapseMode::Epoch);

        assert_eq!(first, second);
    }

    #[test]
    fn test_processed_output_serializes_untagged() {
        let out = OutputTree::from_batch(&[vec![StepResult::new(1.0)]]).collapse(CollapseMode::Batch);
        let json = serde_json::to_string(&out).unwrap();
        assert_eq!(json, r#"{"loss":1.0}"#);
    }
}
