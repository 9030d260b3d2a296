//! In-memory FIFO job queue.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;

use super::types::Job;

/// Unbounded FIFO of submitted jobs.
///
/// `enqueue` never blocks the caller. `dequeue_timeout` parks the single
/// consumer until a job arrives or the timeout elapses, which lets the
/// runner loop wake periodically to notice shutdown without a dedicated
/// signal channel.
#[derive(Debug, Default)]
pub struct TaskQueue {
    items: Mutex<VecDeque<Job>>,
    notify: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, VecDeque<Job>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a job and wake a parked consumer.
    pub fn enqueue(&self, job: Job) {
        self.guard().push_back(job);
        self.notify.notify_one();
    }

    /// Pop the oldest job, waiting up to `timeout` for one to arrive.
    pub async fn dequeue_timeout(&self, timeout: Duration) -> Option<Job> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before checking, so an enqueue landing
            // between the check and the await cannot be missed.
            let notified = self.notify.notified();
            if let Some(job) = self.guard().pop_front() {
                return Some(job);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.guard().pop_front();
            }
        }
    }

    /// Wake a parked consumer without enqueuing anything (shutdown path).
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}
