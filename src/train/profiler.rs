//! Hook profiling
//!
//! Every hook dispatch runs inside a [`ProfileRegion`]. The region stops its
//! timer when dropped, so the timing state unwinds on every exit path: normal
//! return, `?` propagation and panics alike. Errors are never swallowed here.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Records named timing regions
pub trait Profiler: Send + Sync {
    fn start(&self, action: &str);

    fn stop(&self, action: &str);

    /// Human-readable report of recorded regions
    fn summary(&self) -> String {
        String::new()
    }
}

/// Open a region that is closed when the returned guard drops
pub fn profile(profiler: &Arc<dyn Profiler>, action: &str) -> ProfileRegion {
    profiler.start(action);
    ProfileRegion {
        profiler: Arc::clone(profiler),
        action: action.to_owned(),
    }
}

/// Guard for an open profiling region
#[must_use = "the region closes as soon as the guard is dropped"]
pub struct ProfileRegion {
    profiler: Arc<dyn Profiler>,
    action: String,
}

impl ProfileRegion {
    pub fn action(&self) -> &str {
        &self.action
    }
}

impl Drop for ProfileRegion {
    fn drop(&mut self) {
        self.profiler.stop(&self.action);
    }
}

impl fmt::Debug for ProfileRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfileRegion")
            .field("action", &self.action)
            .finish()
    }
}

/// Profiler that records nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughProfiler;

impl Profiler for PassThroughProfiler {
    fn start(&self, _action: &str) {}

    fn stop(&self, _action: &str) {}
}

/// Collects wall-clock durations per action
#[derive(Debug, Default)]
pub struct SimpleProfiler {
    active: Mutex<HashMap<String, Instant>>,
    recorded: Mutex<HashMap<String, Vec<Duration>>>,
}

impl SimpleProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completed measurements for `action`
    pub fn durations(&self, action: &str) -> Vec<Duration> {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(action)
            .cloned()
            .unwrap_or_default()
    }

    pub fn count(&self, action: &str) -> usize {
        self.durations(action).len()
    }

    /// True if `action` was started and not yet stopped
    pub fn is_active(&self, action: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(action)
    }
}

impl Profiler for SimpleProfiler {
    fn start(&self, action: &str) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.insert(action.to_owned(), Instant::now());
    }

    fn stop(&self, action: &str) {
        let started = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(action);

        match started {
            Some(start) => {
                let mut recorded = self.recorded.lock().unwrap_or_else(PoisonError::into_inner);
                recorded
                    .entry(action.to_owned())
                    .or_default()
                    .push(start.elapsed());
            }
            None => tracing::debug!(action, "profiler stop without matching start"),
        }
    }

    fn summary(&self) -> String {
        let recorded = self.recorded.lock().unwrap_or_else(PoisonError::into_inner);
        let mut rows: Vec<(&String, Duration, usize)> = recorded
            .iter()
            .map(|(action, durations)| (action, durations.iter().sum(), durations.len()))
            .collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1));

        let mut out = format!("{:<24} | {:>8} | {:>14}\n", "Action", "Calls", "Total");
        for (action, total, calls) in rows {
            out.push_str(&format!("{action:<24} | {calls:>8} | {total:>14.2?}\n"));
        }
        out
    }
}
