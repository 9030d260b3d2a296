//! Core task data types.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identifier grammar accepted by the archive backend.
static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("identifier regex"));

/// Returns true when `identifier` is a syntactically valid item identifier.
pub fn is_valid_identifier(identifier: &str) -> bool {
    IDENTIFIER_RE.is_match(identifier)
}

/// Generate a new task id.
///
/// The timestamp prefix keeps ids sortable by submission time; the random
/// suffix guards against two submissions landing in the same second.
pub fn new_task_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", now.format("%Y%m%d_%H%M%S"), &suffix[..8])
}

/// Options forwarded to the download engine for every identifier of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchOptions {
    /// Number of files fetched concurrently within one identifier.
    #[serde(default = "default_thread_count")]
    pub thread_count: usize,
    /// Ranged chunks per large file (1 = no splitting).
    #[serde(default = "default_split_count")]
    pub split_count: usize,
    /// MD5-check each file after download.
    #[serde(default = "default_flag_on")]
    pub verify: bool,
    /// Resume partially-downloaded files instead of redownloading.
    #[serde(default = "default_flag_on")]
    pub resume: bool,
    /// Case-insensitive substring filters; empty selects every file.
    #[serde(default)]
    pub file_filters: Vec<String>,
    /// Keep files matching no filter instead of files matching one.
    #[serde(default)]
    pub invert_file_filtering: bool,
    /// Bypass the on-disk search-result cache.
    #[serde(default)]
    pub refresh_cache: bool,
}

fn default_thread_count() -> usize {
    3
}

fn default_split_count() -> usize {
    1
}

fn default_flag_on() -> bool {
    true
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            thread_count: default_thread_count(),
            split_count: default_split_count(),
            verify: true,
            resume: true,
            file_filters: Vec::new(),
            invert_file_filtering: false,
            refresh_cache: false,
        }
    }
}

/// Archive account credentials.
///
/// Threaded through every engine call for the job they belong to, never
/// applied to any process-wide session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Account identifier (S3-style access key).
    pub principal: String,
    /// Matching secret.
    pub secret: String,
}

/// A user-submitted unit of work.
///
/// Immutable once enqueued; consumed exactly once by the task runner.
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique, time-derived id; the join key into the status ledger.
    pub id: String,
    /// Explicit item identifiers, in submission order.
    pub identifiers: Vec<String>,
    /// Search terms to expand into identifiers, in submission order.
    pub search_terms: Vec<String>,
    /// Folder item subfolders are created under.
    pub output_folder: PathBuf,
    /// Where the per-job hash manifest is written.
    pub hash_file_path: PathBuf,
    pub options: FetchOptions,
    pub credentials: Option<Credentials>,
}

/// Lifecycle state of a task.
///
/// Transitions only move forward: `Queued -> Running` and then exactly one
/// of the terminal states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl TaskState {
    /// Terminal states are never left again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Stopped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Stopped => "stopped",
        }
    }
}

/// Progress of the identifier currently being fetched.
///
/// Written by the engine's progress callback, conceptually reset whenever
/// the runner moves to the next identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgress {
    /// Files selected for this identifier.
    pub total_files: usize,
    /// Files finished (downloaded or skipped) so far.
    pub completed_files: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    /// Bytes transferred for the current file.
    pub bytes_done: u64,
    /// Size of the current file, when the archive metadata knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_total: Option<u64>,
}

/// Runtime record tracking one job's execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    pub start_time: DateTime<Utc>,
    /// Stamped exactly once, on the terminal transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Echo of the job's explicit identifiers, for display.
    pub identifiers: Vec<String>,
    /// Echo of the job's search terms, for display.
    pub search_terms: Vec<String>,
    /// Identifier currently being processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_item: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<TaskProgress>,
    /// Append-only; accumulates across the whole job and is never cleared.
    pub errors: Vec<String>,
}

impl TaskStatus {
    /// Initial record for a freshly submitted job.
    pub fn queued(job: &Job, now: DateTime<Utc>) -> Self {
        Self {
            state: TaskState::Queued,
            start_time: now,
            end_time: None,
            identifiers: job.identifiers.clone(),
            search_terms: job.search_terms.clone(),
            current_item: None,
            progress: None,
            errors: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn job(id: &str) -> Job {
        Job {
            id: id.to_string(),
            identifiers: vec!["itemA".to_string()],
            search_terms: vec!["topic".to_string()],
            output_folder: PathBuf::from("/tmp/out"),
            hash_file_path: PathBuf::from("/tmp/hashes.txt"),
            options: FetchOptions::default(),
            credentials: None,
        }
    }

    #[test]
    fn test_task_state_serialization() {
        assert_eq!(
            serde_json::to_string(&TaskState::Queued).unwrap(),
            "\"queued\""
        );
        assert_eq!(
            serde_json::to_string(&TaskState::Running).unwrap(),
            "\"running\""
        );
        assert_eq!(
            serde_json::to_string(&TaskState::Stopped).unwrap(),
            "\"stopped\""
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskState::Queued.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Stopped.is_terminal());
    }

    #[test]
    fn test_new_task_id_shape() {
        let now = Utc::now();
        let id = new_task_id(now);
        // YYYYMMDD_HHMMSS_xxxxxxxx
        assert_eq!(id.len(), 24);
        assert!(id.starts_with(&now.format("%Y%m%d_").to_string()));
    }

    #[test]
    fn test_new_task_id_unique() {
        let now = Utc::now();
        assert_ne!(new_task_id(now), new_task_id(now));
    }

    #[test]
    fn test_is_valid_identifier() {
        assert!(is_valid_identifier("gov.archives.arc.1155023"));
        assert!(is_valid_identifier("some-item_v2"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier(".hidden"));
        assert!(!is_valid_identifier("has space"));
        assert!(!is_valid_identifier("dir/../traversal"));
    }

    #[test]
    fn test_queued_status_echoes_job() {
        let now = Utc::now();
        let status = TaskStatus::queued(&job("t1"), now);
        assert_eq!(status.state, TaskState::Queued);
        assert_eq!(status.start_time, now);
        assert!(status.end_time.is_none());
        assert_eq!(status.identifiers, vec!["itemA".to_string()]);
        assert_eq!(status.search_terms, vec!["topic".to_string()]);
        assert!(status.current_item.is_none());
        assert!(status.errors.is_empty());
    }

    #[test]
    fn test_fetch_options_deserialize_defaults() {
        let options: FetchOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options.thread_count, 3);
        assert_eq!(options.split_count, 1);
        assert!(options.verify);
        assert!(options.resume);
        assert!(options.file_filters.is_empty());
        assert!(!options.invert_file_filtering);
        assert!(!options.refresh_cache);
    }

    #[test]
    fn test_task_status_serialization_skips_unset() {
        let status = TaskStatus::queued(&job("t2"), Utc::now());
        let json = serde_json::to_string(&status).unwrap();
        assert!(!json.contains("end_time"));
        assert!(!json.contains("current_item"));
        assert!(!json.contains("progress"));
    }
}
