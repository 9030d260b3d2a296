//! Types for the download engine boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::task::{Credentials, FetchOptions, TaskProgress};

use super::hash_sink::HashSink;

/// Callback the engine drives while fetching.
///
/// Invoked from the engine's internal concurrency; implementations must be
/// safe to call from any thread. The orchestrator routes it through the
/// status ledger's locked mutate.
pub type ProgressSink = Arc<dyn Fn(TaskProgress) + Send + Sync>;

/// Everything the engine needs to fetch one identifier.
pub struct FetchRequest<'a> {
    pub identifier: &'a str,
    /// Folder the identifier's own subfolder is created under.
    pub output_folder: &'a Path,
    /// Per-job manifest; the engine appends one line per selected file.
    pub hash_sink: &'a HashSink,
    pub options: &'a FetchOptions,
    /// Per-job credentials; sent with every archive request when present.
    pub credentials: Option<&'a Credentials>,
    pub progress: ProgressSink,
}

/// Outcome of a successful fetch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchReport {
    /// Files listed in the item metadata.
    pub files_total: usize,
    /// Files left after filtering.
    pub files_selected: usize,
    pub files_downloaded: usize,
    /// Files already present on disk with the expected size.
    pub files_skipped: usize,
    /// Files that failed after retries; never fatal for the identifier.
    pub files_failed: usize,
    pub bytes_downloaded: u64,
    /// Files whose post-download MD5 did not match the metadata.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hash_mismatches: Vec<String>,
}

/// Errors that fail an entire identifier.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("connection to archive failed: {0}")]
    ConnectionFailed(String),

    #[error("archive API error: {0}")]
    ApiError(String),

    #[error("no file metadata for identifier: {0}")]
    NoFiles(String),

    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("request timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for download backends.
#[async_trait]
pub trait DownloadEngine: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// One-time credential check, performed before the first identifier
    /// of a job that carries credentials.
    async fn validate_credentials(&self, credentials: &Credentials) -> Result<(), EngineError>;

    /// Fetch every selected file of one identifier.
    ///
    /// Blocking from the caller's point of view; any internal parallelism
    /// (concurrent files, split ranges) is the engine's own business.
    async fn fetch(&self, request: FetchRequest<'_>) -> Result<FetchReport, EngineError>;
}
