//! Prometheus metrics for the task orchestrator.

use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts};

/// Tasks submitted total.
pub static TASKS_SUBMITTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("archivedl_tasks_submitted_total", "Total tasks submitted").unwrap()
});

/// Tasks finished total, by terminal state.
pub static TASKS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("archivedl_tasks_finished_total", "Total tasks finished"),
        &["state"], // "completed", "failed", "stopped"
    )
    .unwrap()
});

/// Identifiers processed total, by result.
pub static IDENTIFIERS_PROCESSED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "archivedl_identifiers_processed_total",
            "Total identifiers processed",
        ),
        &["result"], // "ok", "error"
    )
    .unwrap()
});

/// Search term resolutions total, by result.
pub static SEARCH_RESOLUTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "archivedl_search_resolutions_total",
            "Total search term resolutions",
        ),
        &["result"], // "ok", "error"
    )
    .unwrap()
});

/// Duration of one identifier's fetch, in seconds.
pub static FETCH_DURATION: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "archivedl_fetch_duration_seconds",
            "Duration of one identifier's fetch",
        )
        .buckets(vec![1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0, 7200.0]),
    )
    .unwrap()
});

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(TASKS_SUBMITTED.clone()),
        Box::new(TASKS_FINISHED.clone()),
        Box::new(IDENTIFIERS_PROCESSED.clone()),
        Box::new(SEARCH_RESOLUTIONS.clone()),
        Box::new(FETCH_DURATION.clone()),
    ]
}
