//! Mock download engine for testing.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};

use crate::engine::{DownloadEngine, EngineError, FetchReport, FetchRequest};
use crate::task::{Credentials, TaskProgress};

/// Mock implementation of the `DownloadEngine` trait.
///
/// Provides controllable behavior for testing:
/// - Track which identifiers were fetched, in order
/// - Simulate per-identifier failures and panics
/// - Hold fetches on a gate until the test releases them, for exact
///   cancellation timing
/// - Inject credential rejections
#[derive(Debug)]
pub struct MockDownloadEngine {
    /// Identifiers whose fetch has begun, in order.
    started: Arc<RwLock<Vec<String>>>,
    /// Identifiers whose fetch finished successfully, in order.
    completed: Arc<RwLock<Vec<String>>>,
    /// Identifiers that fail with an injected error.
    failing: Arc<RwLock<HashSet<String>>>,
    /// Identifiers that panic mid-fetch.
    panicking: Arc<RwLock<HashSet<String>>>,
    /// When true, every fetch blocks on the gate after recording its
    /// start; `release_one` lets exactly one proceed.
    hold: Arc<RwLock<bool>>,
    gate: Arc<Semaphore>,
    /// Credential sets passed to validate_credentials, in order.
    validated: Arc<RwLock<Vec<Credentials>>>,
    /// Error message for the next credential validations, if set.
    credential_error: Arc<RwLock<Option<String>>>,
}

impl Default for MockDownloadEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDownloadEngine {
    pub fn new() -> Self {
        Self {
            started: Arc::new(RwLock::new(Vec::new())),
            completed: Arc::new(RwLock::new(Vec::new())),
            failing: Arc::new(RwLock::new(HashSet::new())),
            panicking: Arc::new(RwLock::new(HashSet::new())),
            hold: Arc::new(RwLock::new(false)),
            gate: Arc::new(Semaphore::new(0)),
            validated: Arc::new(RwLock::new(Vec::new())),
            credential_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Make fetches block on the gate until released.
    pub async fn set_hold(&self, hold: bool) {
        *self.hold.write().await = hold;
    }

    /// Let one held fetch proceed.
    pub fn release_one(&self) {
        self.gate.add_permits(1);
    }

    /// Make one identifier's fetch fail.
    pub async fn fail_identifier(&self, identifier: &str) {
        self.failing.write().await.insert(identifier.to_string());
    }

    /// Make one identifier's fetch panic.
    pub async fn panic_identifier(&self, identifier: &str) {
        self.panicking.write().await.insert(identifier.to_string());
    }

    /// Reject credential validation with the given message.
    pub async fn set_credential_error(&self, message: &str) {
        *self.credential_error.write().await = Some(message.to_string());
    }

    /// Identifiers whose fetch has begun, in order.
    pub async fn started(&self) -> Vec<String> {
        self.started.read().await.clone()
    }

    /// Identifiers whose fetch finished successfully, in order.
    pub async fn completed(&self) -> Vec<String> {
        self.completed.read().await.clone()
    }

    /// Number of fetches begun.
    pub async fn fetch_count(&self) -> usize {
        self.started.read().await.len()
    }

    /// Credential sets seen by validate_credentials.
    pub async fn validated_credentials(&self) -> Vec<Credentials> {
        self.validated.read().await.clone()
    }

    /// Wait until a fetch for `identifier` has begun.
    pub async fn wait_for_start(&self, identifier: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self
                .started
                .read()
                .await
                .iter()
                .any(|started| started == identifier)
            {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl DownloadEngine for MockDownloadEngine {
    fn name(&self) -> &str {
        "mock"
    }

    async fn validate_credentials(&self, credentials: &Credentials) -> Result<(), EngineError> {
        self.validated.write().await.push(credentials.clone());
        match self.credential_error.read().await.as_ref() {
            Some(message) => Err(EngineError::AuthRejected(message.clone())),
            None => Ok(()),
        }
    }

    async fn fetch(&self, request: FetchRequest<'_>) -> Result<FetchReport, EngineError> {
        let identifier = request.identifier.to_string();
        self.started.write().await.push(identifier.clone());

        if *self.hold.read().await {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| EngineError::ApiError("gate closed".to_string()))?;
            permit.forget();
        }

        if self.panicking.read().await.contains(&identifier) {
            panic!("injected panic for '{}'", identifier);
        }

        if self.failing.read().await.contains(&identifier) {
            return Err(EngineError::ApiError(format!(
                "injected failure for '{}'",
                identifier
            )));
        }

        // Emit one progress sample and a manifest line, so tests can
        // observe both pipelines end to end.
        (request.progress)(TaskProgress {
            total_files: 2,
            completed_files: 1,
            current_file: Some(format!("{}_meta.xml", identifier)),
            bytes_done: 512,
            bytes_total: Some(1024),
        });
        request.hash_sink.append(
            &identifier,
            &format!("{}_meta.xml", identifier),
            "d41d8cd98f00b204e9800998ecf8427e",
        )?;

        self.completed.write().await.push(identifier);

        Ok(FetchReport {
            files_total: 2,
            files_selected: 2,
            files_downloaded: 2,
            files_skipped: 0,
            files_failed: 0,
            bytes_downloaded: 1024,
            hash_mismatches: vec![],
        })
    }
}
