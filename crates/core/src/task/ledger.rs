//! Shared task status ledger.
//!
//! One coarse mutex guards the whole map. Every critical section is O(1)
//! or a short copy, and the lock is never held across a call into the
//! resolver or the engine.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use super::types::{TaskState, TaskStatus};

/// Errors from plain ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("task already exists: {0}")]
    AlreadyExists(String),
}

/// Error returned by a stop request.
#[derive(Debug, Error)]
pub enum StopError {
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("cannot stop task {id}: current state is {state}")]
    InvalidState { id: String, state: &'static str },
}

/// Task counts by state, for the status overview.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StateCounts {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub stopped: usize,
}

/// Mapping from task id to its mutable status record.
///
/// Records are created at submission time, mutated in place by the task
/// runner and the stop endpoint, read by any number of concurrent
/// viewers, and never deleted.
#[derive(Debug, Default)]
pub struct StatusLedger {
    inner: Mutex<HashMap<String, TaskStatus>>,
}

impl StatusLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<String, TaskStatus>> {
        // Mutations are plain field stores; a poisoned lock is safe to
        // recover.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new record. The caller must do this before the matching
    /// job becomes visible to the queue.
    pub fn create(&self, id: &str, status: TaskStatus) -> Result<(), LedgerError> {
        let mut map = self.guard();
        if map.contains_key(id) {
            return Err(LedgerError::AlreadyExists(id.to_string()));
        }
        map.insert(id.to_string(), status);
        Ok(())
    }

    /// Snapshot of one record.
    pub fn get(&self, id: &str) -> Option<TaskStatus> {
        self.guard().get(id).cloned()
    }

    /// Current state of one record.
    pub fn state(&self, id: &str) -> Option<TaskState> {
        self.guard().get(id).map(|status| status.state)
    }

    /// Apply an in-place update under the lock.
    pub fn mutate<F>(&self, id: &str, update: F) -> Result<(), LedgerError>
    where
        F: FnOnce(&mut TaskStatus),
    {
        let mut map = self.guard();
        match map.get_mut(id) {
            Some(status) => {
                update(status);
                Ok(())
            }
            None => Err(LedgerError::NotFound(id.to_string())),
        }
    }

    /// Snapshots of every record, most recently submitted first.
    pub fn list(&self) -> Vec<(String, TaskStatus)> {
        let map = self.guard();
        let mut entries: Vec<(String, TaskStatus)> = map
            .iter()
            .map(|(id, status)| (id.clone(), status.clone()))
            .collect();
        entries.sort_by(|a, b| b.1.start_time.cmp(&a.1.start_time).then(b.0.cmp(&a.0)));
        entries
    }

    /// Task counts by state.
    pub fn counts(&self) -> StateCounts {
        let map = self.guard();
        let mut counts = StateCounts::default();
        for status in map.values() {
            match status.state {
                TaskState::Queued => counts.queued += 1,
                TaskState::Running => counts.running += 1,
                TaskState::Completed => counts.completed += 1,
                TaskState::Failed => counts.failed += 1,
                TaskState::Stopped => counts.stopped += 1,
            }
        }
        counts
    }

    /// `Queued -> Running`, checked and set under the lock.
    ///
    /// Returns false when the task was stopped while still queued; the
    /// runner must then skip the job without any further work.
    pub fn begin_running(&self, id: &str) -> bool {
        let mut map = self.guard();
        match map.get_mut(id) {
            Some(status) if status.state == TaskState::Queued => {
                status.state = TaskState::Running;
                true
            }
            _ => false,
        }
    }

    /// Cooperative stop request from outside the runner.
    ///
    /// Only `Queued` and `Running` tasks can be stopped; the transition is
    /// terminal, so `end_time` is stamped here. Returns the state the task
    /// was in before the request.
    pub fn request_stop(&self, id: &str) -> Result<TaskState, StopError> {
        let mut map = self.guard();
        match map.get_mut(id) {
            None => Err(StopError::NotFound(id.to_string())),
            Some(status) if status.state.is_terminal() => Err(StopError::InvalidState {
                id: id.to_string(),
                state: status.state.as_str(),
            }),
            Some(status) => {
                let previous = status.state;
                status.state = TaskState::Stopped;
                status.end_time = Some(Utc::now());
                Ok(previous)
            }
        }
    }

    /// Terminal transition at the end of a run.
    ///
    /// An externally-set `Stopped` wins and is never overwritten, even
    /// when the run finishes naturally around the same time. `end_time`
    /// is stamped only when the transition actually happens here.
    pub fn finalize(&self, id: &str, outcome: TaskState) {
        debug_assert!(matches!(
            outcome,
            TaskState::Completed | TaskState::Failed
        ));
        let mut map = self.guard();
        match map.get_mut(id) {
            Some(status) => {
                if !status.state.is_terminal() {
                    status.state = outcome;
                    status.end_time = Some(Utc::now());
                }
            }
            None => warn!(task_id = %id, "finalize for unknown task"),
        }
    }

    /// Record an unexpected runner fault: one final error append, then a
    /// `Failed` transition unless the task is already terminal.
    pub fn record_fault(&self, id: &str, message: &str) {
        let mut map = self.guard();
        match map.get_mut(id) {
            Some(status) => {
                status.errors.push(message.to_string());
                if !status.state.is_terminal() {
                    status.state = TaskState::Failed;
                    status.end_time = Some(Utc::now());
                }
            }
            None => warn!(task_id = %id, "fault for unknown task"),
        }
    }
}
