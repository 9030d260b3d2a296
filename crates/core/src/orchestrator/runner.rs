//! The task runner: drains the queue and drives each job through its
//! state machine.
//!
//! States: `queued -> running -> {completed, failed, stopped}`. Stop is
//! cooperative; the runner re-checks the ledger before each search term
//! and before each identifier, so an identifier already in flight runs to
//! completion before a stop takes effect.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{error, info, warn};

use crate::engine::{FetchRequest, ProgressSink};
use crate::metrics;
use crate::task::{Job, TaskState};

use super::supervisor::WorkerShared;

/// The worker loop body. Exactly one instance runs at a time, enforced by
/// the supervisor.
pub(crate) async fn run_loop(shared: Arc<WorkerShared>) {
    info!("task runner started");
    let poll = Duration::from_secs(shared.config.dequeue_timeout_secs.max(1));

    while shared.running.load(Ordering::SeqCst) {
        let Some(job) = shared.queue.dequeue_timeout(poll).await else {
            continue;
        };
        let task_id = job.id.clone();

        // A fault inside one job must never take the loop down with it.
        let outcome = AssertUnwindSafe(run_task(Arc::clone(&shared), job))
            .catch_unwind()
            .await;
        if outcome.is_err() {
            error!(task_id = %task_id, "task processing panicked");
            shared
                .ledger
                .record_fault(&task_id, "internal error: task processing panicked");
        }

        if let Some(state) = shared.ledger.state(&task_id) {
            metrics::TASKS_FINISHED
                .with_label_values(&[state.as_str()])
                .inc();
            info!(task_id = %task_id, state = state.as_str(), "task finished");
        }
    }
    info!("task runner stopped");
}

/// Run one job to a terminal state. Never returns an error: every outcome
/// is recorded in the ledger for asynchronous observation.
async fn run_task(shared: Arc<WorkerShared>, job: Job) {
    let task_id = job.id.clone();

    if !shared.ledger.begin_running(&task_id) {
        // Stopped while still queued: skip without touching the engine.
        info!(task_id = %task_id, "task was stopped before it started");
        return;
    }
    info!(task_id = %task_id, "task running");

    // The manifest sink is the one resource the runner itself owns; not
    // being able to open it leaves nothing worth running.
    let hash_sink = match crate::engine::HashSink::create(&job.hash_file_path) {
        Ok(sink) => sink,
        Err(e) => {
            error!(task_id = %task_id, error = %e, "failed to open hash manifest");
            shared.ledger.record_fault(
                &task_id,
                &format!(
                    "failed to open hash manifest '{}': {}",
                    job.hash_file_path.display(),
                    e
                ),
            );
            return;
        }
    };

    let mut identifiers = job.identifiers.clone();

    // Expand search terms, in order. A stop observed here halts
    // resolution; identifiers resolved so far stay in the list but are
    // never processed. A failed term is recorded and skipped.
    for term in &job.search_terms {
        if shared.ledger.state(&task_id) == Some(TaskState::Stopped) {
            info!(task_id = %task_id, "stop requested, halting search resolution");
            break;
        }
        match shared.resolver.resolve(term, job.options.refresh_cache).await {
            Ok(resolved) => {
                info!(
                    task_id = %task_id,
                    term = %term,
                    identifiers = resolved.len(),
                    "search term resolved"
                );
                metrics::SEARCH_RESOLUTIONS.with_label_values(&["ok"]).inc();
                identifiers.extend(resolved);
            }
            Err(e) => {
                warn!(task_id = %task_id, term = %term, error = %e, "search term failed, skipping");
                metrics::SEARCH_RESOLUTIONS
                    .with_label_values(&["error"])
                    .inc();
                let _ = shared.ledger.mutate(&task_id, |status| {
                    status.errors.push(format!("search '{}' failed: {}", term, e));
                });
            }
        }
    }

    // Credentials are validated once up front; a rejection is recorded
    // but the job proceeds anonymously.
    if let Some(credentials) = &job.credentials {
        if shared.ledger.state(&task_id) != Some(TaskState::Stopped) {
            if let Err(e) = shared.engine.validate_credentials(credentials).await {
                warn!(task_id = %task_id, error = %e, "credential validation failed");
                let _ = shared.ledger.mutate(&task_id, |status| {
                    status.errors.push(format!("authentication error: {}", e));
                });
            }
        }
    }

    for identifier in &identifiers {
        if shared.ledger.state(&task_id) == Some(TaskState::Stopped) {
            info!(task_id = %task_id, identifier = %identifier, "stop requested, halting before next identifier");
            break;
        }

        let _ = shared.ledger.mutate(&task_id, |status| {
            status.current_item = Some(identifier.clone());
            status.progress = None;
        });

        let timer = metrics::FETCH_DURATION.start_timer();
        let request = FetchRequest {
            identifier,
            output_folder: &job.output_folder,
            hash_sink: &hash_sink,
            options: &job.options,
            credentials: job.credentials.as_ref(),
            progress: progress_sink(&shared, &task_id),
        };

        match shared.engine.fetch(request).await {
            Ok(report) => {
                info!(
                    task_id = %task_id,
                    identifier = %identifier,
                    downloaded = report.files_downloaded,
                    skipped = report.files_skipped,
                    failed = report.files_failed,
                    "identifier complete"
                );
                metrics::IDENTIFIERS_PROCESSED
                    .with_label_values(&["ok"])
                    .inc();
                let _ = shared.ledger.mutate(&task_id, |status| {
                    if report.files_failed > 0 {
                        status.errors.push(format!(
                            "{} of {} files failed for '{}'",
                            report.files_failed, report.files_selected, identifier
                        ));
                    }
                    for file in &report.hash_mismatches {
                        status
                            .errors
                            .push(format!("hash mismatch for '{}/{}'", identifier, file));
                    }
                });
            }
            Err(e) => {
                // Partial failure is not fatal: record it and move on to
                // the next identifier.
                warn!(task_id = %task_id, identifier = %identifier, error = %e, "identifier failed");
                metrics::IDENTIFIERS_PROCESSED
                    .with_label_values(&["error"])
                    .inc();
                let _ = shared.ledger.mutate(&task_id, |status| {
                    status
                        .errors
                        .push(format!("download of '{}' failed: {}", identifier, e));
                });
            }
        }
        timer.observe_duration();
    }

    // Closed exactly once whichever way the loop exited.
    if let Err(e) = hash_sink.finish() {
        warn!(task_id = %task_id, error = %e, "failed to finalize hash manifest");
        let _ = shared.ledger.mutate(&task_id, |status| {
            status
                .errors
                .push(format!("failed to finalize hash manifest: {}", e));
        });
    }

    // External stop wins: if the state is already Stopped this is a no-op.
    shared.ledger.finalize(&task_id, TaskState::Completed);
}

/// Binding the engine uses to publish progress for one task. Routed
/// through the ledger's locked mutate, so it is safe from any of the
/// engine's threads.
fn progress_sink(shared: &Arc<WorkerShared>, task_id: &str) -> ProgressSink {
    let shared = Arc::clone(shared);
    let task_id = task_id.to_string();
    Arc::new(move |progress| {
        let _ = shared.ledger.mutate(&task_id, |status| {
            status.progress = Some(progress);
        });
    })
}
