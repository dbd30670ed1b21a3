//! Registry of processes started on behalf of tasks.
//!
//! Shared by every concurrently running step. Entries are added when a
//! process starts and removed when it exits; whatever remains is what a
//! task still has running on the host.

use agentry_core::TaskId;
use agentry_core::log::{LogLevel, LogRecord, LogSink};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedProcess {
    pub task_id: TaskId,
    pub pid: u32,
    pub tracked_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ProcessRegistry {
    processes: Mutex<BTreeMap<u32, TrackedProcess>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u32, TrackedProcess>> {
        // Entries are plain data, so a poisoned map is still consistent.
        self.processes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record that `pid` belongs to `task_id`.
    pub fn track(&self, task_id: &TaskId, pid: u32, sink: &dyn LogSink) {
        let entry = TrackedProcess {
            task_id: task_id.clone(),
            pid,
            tracked_at: Utc::now(),
        };
        if let Some(previous) = self.lock().insert(pid, entry) {
            warn!(pid, previous_task = %previous.task_id, "Replaced stale process entry");
        }

        sink.send(
            LogRecord::new(LogLevel::Info, "tracking process")
                .with_field("task", task_id.as_str())
                .with_field("pid", pid),
        );
    }

    /// Forget `pid`, returning its entry if it was tracked.
    pub fn untrack(&self, pid: u32) -> Option<TrackedProcess> {
        self.lock().remove(&pid)
    }

    /// Processes still running for `task_id`.
    pub fn tracked(&self, task_id: &TaskId) -> Vec<TrackedProcess> {
        self.lock()
            .values()
            .filter(|p| &p.task_id == task_id)
            .cloned()
            .collect()
    }

    /// Consistent copy of every entry, ordered by pid.
    pub fn snapshot(&self) -> Vec<TrackedProcess> {
        self.lock().values().cloned().collect()
    }

    /// Structured listing of every tracked process for diagnostics.
    pub fn dump_all(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
