//! Types for the task orchestrator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when submitting a job.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// A task with the same id already exists in the ledger.
    #[error("a task with id {0} already exists")]
    DuplicateId(String),
}

/// Snapshot of the orchestrator for the status overview endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    /// Whether a live worker is currently draining the queue.
    pub worker_alive: bool,
    /// Jobs enqueued but not yet picked up.
    pub queue_depth: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub stopped: usize,
}
