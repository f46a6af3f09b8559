//! Metric logging for the training loop
//!
//! [`LoggerConnector`] sits between the loops and an optional
//! [`MetricsLogger`]. It keeps the `callback_metrics` that callbacks and
//! learning-rate schedulers read, averages step values into `<key>_epoch`
//! entries at epoch end, and decides when the logger writes and flushes.

use super::output::ProcessedOutput;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Named scalar metrics
pub type Metrics = BTreeMap<String, f32>;

/// Suffix of epoch-averaged metric names
pub const EPOCH_SUFFIX: &str = "_epoch";

/// Destination for logged metrics
pub trait MetricsLogger: Send {
    fn log_metrics(&mut self, metrics: &Metrics, step: usize) -> Result<()>;

    /// Persist anything buffered
    fn save(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "MetricsLogger"
    }
}

/// One logged row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub step: usize,
    pub metrics: Metrics,
}

/// Logger that keeps records in memory. Clones share the same storage.
#[derive(Debug, Default, Clone)]
pub struct InMemoryLogger {
    records: Arc<Mutex<Vec<LogRecord>>>,
    saves: Arc<Mutex<usize>>,
}

impl InMemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn saves(&self) -> usize {
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MetricsLogger for InMemoryLogger {
    fn log_metrics(&mut self, metrics: &Metrics, step: usize) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(LogRecord {
                step,
                metrics: metrics.clone(),
            });
        Ok(())
    }

    fn save(&mut self) -> Result<()> {
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "InMemoryLogger"
    }
}

/// Buffers records and appends them to a JSON-lines file on save
#[derive(Debug)]
pub struct JsonLinesLogger {
    path: PathBuf,
    pending: Vec<LogRecord>,
}

impl JsonLinesLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            pending: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl MetricsLogger for JsonLinesLogger {
    fn log_metrics(&mut self, metrics: &Metrics, step: usize) -> Result<()> {
        self.pending.push(LogRecord {
            step,
            metrics: metrics.clone(),
        });
        Ok(())
    }

    fn save(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for record in self.pending.drain(..) {
            let line =
                serde_json::to_string(&record).map_err(|e| Error::Serialization(e.to_string()))?;
            writeln!(file, "{line}")?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "JsonLinesLogger"
    }
}

/// Routes training metrics to callbacks and the logger
pub struct LoggerConnector {
    log_every_n_steps: usize,
    flush_logs_every_n_steps: usize,
    callback_metrics: Metrics,
    epoch_values: BTreeMap<String, Vec<f32>>,
    epoch_history: Vec<Metrics>,
    logger: Option<Box<dyn MetricsLogger>>,
}

impl LoggerConnector {
    pub fn new(log_every_n_steps: usize, flush_logs_every_n_steps: usize) -> Self {
        Self {
            log_every_n_steps,
            flush_logs_every_n_steps,
            callback_metrics: Metrics::new(),
            epoch_values: BTreeMap::new(),
            epoch_history: Vec::new(),
            logger: None,
        }
    }

    pub fn set_logger(&mut self, logger: Box<dyn MetricsLogger>) {
        self.logger = Some(logger);
    }

    pub fn has_logger(&self) -> bool {
        self.logger.is_some()
    }

    /// Latest value of every metric, as seen by callbacks and schedulers
    pub fn callback_metrics(&self) -> &Metrics {
        &self.callback_metrics
    }

    /// Epoch-averaged metrics, one entry per finished epoch
    pub fn epoch_history(&self) -> &[Metrics] {
        &self.epoch_history
    }

    /// Lowest recorded value of an epoch metric
    pub fn best(&self, key: &str) -> Option<f32> {
        self.epoch_history
            .iter()
            .filter_map(|m| m.get(key).copied())
            .min_by(f32::total_cmp)
    }

    /// Merge metrics produced outside the training step (validation)
    pub fn update_callback_metrics(&mut self, metrics: &Metrics) {
        self.callback_metrics
            .extend(metrics.iter().map(|(k, v)| (k.clone(), *v)));
    }

    /// Record the batch's step metrics and log them on logging steps
    pub fn log_train_step_metrics(
        &mut self,
        outputs: &ProcessedOutput,
        global_step: usize,
        should_stop: bool,
    ) -> Result<()> {
        let step_metrics = mean_by_key(outputs);
        if step_metrics.is_empty() {
            return Ok(());
        }

        for (key, value) in &step_metrics {
            self.epoch_values.entry(key.clone()).or_default().push(*value);
        }
        self.update_callback_metrics(&step_metrics);

        let should_log = every(self.log_every_n_steps, global_step) || should_stop;
        if should_log {
            if let Some(logger) = self.logger.as_mut() {
                logger.log_metrics(&step_metrics, global_step)?;
            }
        }
        Ok(())
    }

    pub fn should_flush_logs(&self, global_step: usize, should_stop: bool) -> bool {
        every(self.flush_logs_every_n_steps, global_step) || should_stop
    }

    pub fn save(&mut self) -> Result<()> {
        match self.logger.as_mut() {
            Some(logger) => logger.save(),
            None => Ok(()),
        }
    }

    /// Publish `<key>_epoch` averages and start a fresh epoch
    pub fn on_train_epoch_end(&mut self) {
        let epoch_metrics: Metrics = std::mem::take(&mut self.epoch_values)
            .into_iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(key, values)| {
                let mean = values.iter().sum::<f32>() / values.len() as f32;
                (format!("{key}{EPOCH_SUFFIX}"), mean)
            })
            .collect();

        if epoch_metrics.is_empty() {
            return;
        }
        tracing::debug!(metrics = ?epoch_metrics, "epoch metrics");
        self.update_callback_metrics(&epoch_metrics);
        self.epoch_history.push(epoch_metrics);
    }
}

impl std::fmt::Debug for LoggerConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerConnector")
            .field("log_every_n_steps", &self.log_every_n_steps)
            .field("flush_logs_every_n_steps", &self.flush_logs_every_n_steps)
            .field("callback_metrics", &self.callback_metrics)
            .field("logger", &self.logger.as_ref().map(|l| l.name().to_owned()))
            .finish()
    }
}

fn every(n: usize, global_step: usize) -> bool {
    n > 0 && (global_step + 1) % n == 0
}

/// Average each key over all steps of a processed batch output
fn mean_by_key(outputs: &ProcessedOutput) -> Metrics {
    let mut sums: BTreeMap<String, (f32, usize)> = BTreeMap::new();
    for step in outputs.steps() {
        for (key, value) in step {
            let entry = sums.entry(key.clone()).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
    }
    sums.into_iter()
        .map(|(key, (sum, n))| (key, sum / n as f32))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::train::output::{CollapseMode, OutputTree, StepResult};
    use approx::assert_abs_diff_eq;

    fn batch(loss: f32) -> ProcessedOutput {
        OutputTree::from_batch(&[vec![StepResult::new(loss).with_extra("acc", 0.5)]])
            .collapse(CollapseMode::Batch)
    }

    #[test]
    fn test_logs_on_interval() {
        let logger = InMemoryLogger::new();
        let mut connector = LoggerConnector::new(2, 100);
        connector.set_logger(Box::new(logger.clone()));

        for step in 0..4 {
            connector
                .log_train_step_metrics(&batch(step as f32), step, false)
                .unwrap();
        }

        let steps: Vec<usize> = logger.records().iter().map(|r| r.step).collect();
        assert_eq!(steps, vec![1, 3]);
        assert_eq!(connector.callback_metrics()["loss"], 3.0);
    }

    #[test]
    fn test_stop_forces_log_and_flush() {
        let logger = InMemoryLogger::new();
        let mut connector = LoggerConnector::new(50, 100);
        connector.set_logger(Box::new(logger.clone()));
        connector.log_train_step_metrics(&batch(1.0), 0, true).unwrap();
        assert_eq!(logger.records().len(), 1);
        assert!(connector.should_flush_logs(0, true));
        assert!(!connector.should_flush_logs(0, false));
        assert!(connector.should_flush_logs(99, false));
    }

    #[test]
    fn test_epoch_means() {
        let mut connector = LoggerConnector::new(50, 100);
        for loss in [1.0, 2.0, 3.0] {
            connector.log_train_step_metrics(&batch(loss), 0, false).unwrap();
        }
        connector.on_train_epoch_end();

        assert_abs_diff_eq!(connector.callback_metrics()["loss_epoch"], 2.0);
        assert_abs_diff_eq!(connector.callback_metrics()["acc_epoch"], 0.5);
        assert_eq!(connector.epoch_history().len(), 1);

        connector.log_train_step_metrics(&batch(0.5), 3, false).unwrap();
        connector.on_train_epoch_end();
        assert_eq!(connector.best("loss_epoch"), Some(0.5));
    }

    #[test]
    fn test_empty_epoch_adds_no_history() {
        let mut connector = LoggerConnector::new(1, 1);
        connector.on_train_epoch_end();
        assert!(connector.epoch_history().is_empty());
        assert!(connector.save().is_ok());
    }

    #[test]
    fn test_multi_step_batch_is_averaged() {
        let out = OutputTree::from_batch(&[
            vec![StepResult::new(1.0)],
            vec![StepResult::new(3.0)],
        ])
        .collapse(CollapseMode::Batch);
        let mut connector = LoggerConnector::new(1, 1);
        connector.log_train_step_metrics(&out, 0, false).unwrap();
        assert_abs_diff_eq!(connector.callback_metrics()["loss"], 2.0);
    }

    #[test]
    fn test_json_lines_logger_appends_on_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.jsonl");
        let mut logger = JsonLinesLogger::new(&path);

        let mut metrics = Metrics::new();
        metrics.insert("loss".into(), 0.25);
        logger.log_metrics(&metrics, 4).unwrap();
        assert_eq!(logger.pending(), 1);
        assert!(!path.exists());

        logger.save().unwrap();
        logger.save().unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        let record: LogRecord = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(record.step, 4);
        assert_eq!(record.metrics["loss"], 0.25);
    }
}
