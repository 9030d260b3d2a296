//! Submission façade and the supervised single-worker lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::engine::DownloadEngine;
use crate::metrics;
use crate::resolver::SearchResolver;
use crate::task::{Job, StatusLedger, StopError, TaskQueue, TaskState, TaskStatus};

use super::config::WorkerConfig;
use super::runner;
use super::types::{OrchestratorStatus, SubmitError};

/// Everything the runner loop needs, shared with the orchestrator.
pub(crate) struct WorkerShared {
    pub(crate) config: WorkerConfig,
    pub(crate) queue: TaskQueue,
    pub(crate) ledger: StatusLedger,
    pub(crate) resolver: Arc<dyn SearchResolver>,
    pub(crate) engine: Arc<dyn DownloadEngine>,
    /// Cleared on shutdown; the loop observes it on its next wake.
    pub(crate) running: AtomicBool,
}

/// The task orchestrator.
///
/// Owns the queue and the status ledger, and guarantees that at most one
/// runner is draining the queue at any time. Throughput across jobs is
/// strictly serial; concurrency exists only inside one identifier's
/// engine call.
pub struct TaskOrchestrator {
    shared: Arc<WorkerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TaskOrchestrator {
    pub fn new(
        config: WorkerConfig,
        resolver: Arc<dyn SearchResolver>,
        engine: Arc<dyn DownloadEngine>,
    ) -> Self {
        Self {
            shared: Arc::new(WorkerShared {
                config,
                queue: TaskQueue::new(),
                ledger: StatusLedger::new(),
                resolver,
                engine,
                running: AtomicBool::new(true),
            }),
            worker: Mutex::new(None),
        }
    }

    fn worker_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Submit a job.
    ///
    /// The ledger entry is created first, under the ledger lock, so the
    /// record exists before the job becomes visible to the queue; then a
    /// live worker is guaranteed before the call returns.
    pub fn submit(&self, job: Job) -> Result<(), SubmitError> {
        let status = TaskStatus::queued(&job, Utc::now());
        self.shared
            .ledger
            .create(&job.id, status)
            .map_err(|_| SubmitError::DuplicateId(job.id.clone()))?;

        info!(
            task_id = %job.id,
            identifiers = job.identifiers.len(),
            search_terms = job.search_terms.len(),
            "task submitted"
        );
        metrics::TASKS_SUBMITTED.inc();

        self.shared.queue.enqueue(job);
        self.ensure_worker();
        Ok(())
    }

    /// Snapshot of one task's status.
    pub fn status(&self, task_id: &str) -> Option<TaskStatus> {
        self.shared.ledger.get(task_id)
    }

    /// Snapshots of every task, most recently submitted first.
    pub fn list(&self) -> Vec<(String, TaskStatus)> {
        self.shared.ledger.list()
    }

    /// Request a cooperative stop.
    ///
    /// Takes effect immediately for queued tasks; a running task finishes
    /// the identifier currently in flight before the runner notices.
    pub fn stop(&self, task_id: &str) -> Result<TaskState, StopError> {
        let previous = self.shared.ledger.request_stop(task_id)?;
        info!(task_id, previous_state = previous.as_str(), "stop requested");
        Ok(previous)
    }

    /// Overview for the status endpoint.
    pub fn overview(&self) -> OrchestratorStatus {
        let counts = self.shared.ledger.counts();
        OrchestratorStatus {
            worker_alive: self.worker_alive(),
            queue_depth: self.shared.queue.len(),
            queued: counts.queued,
            running: counts.running,
            completed: counts.completed,
            failed: counts.failed,
            stopped: counts.stopped,
        }
    }

    /// Whether a live runner currently holds the queue.
    pub fn worker_alive(&self) -> bool {
        self.worker_slot()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Guarantee exactly one live runner.
    ///
    /// Called on every submit: a finished (or never started) runner is
    /// replaced before the submit returns, so the enqueue that triggered
    /// the check is always observed by somebody.
    fn ensure_worker(&self) {
        if !self.shared.running.load(Ordering::SeqCst) {
            return;
        }
        let mut slot = self.worker_slot();
        let alive = slot
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false);
        if alive {
            return;
        }
        if slot.is_some() {
            warn!("task runner is no longer alive, starting a replacement");
        }
        *slot = Some(tokio::spawn(runner::run_loop(Arc::clone(&self.shared))));
    }

    /// Stop the worker loop.
    ///
    /// The loop exits after the job currently in flight, if any; callers
    /// that need a hard bound should stop the task first.
    pub async fn shutdown(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.queue.wake();

        let handle = self.worker_slot().take();
        if let Some(handle) = handle {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(_) => info!("task runner stopped"),
                Err(_) => warn!("task runner still busy at shutdown, leaving it to the runtime"),
            }
        }
    }
}
