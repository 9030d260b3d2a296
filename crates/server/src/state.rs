use std::path::PathBuf;
use std::sync::Arc;

use archivedl_core::{Config, TaskOrchestrator};

/// Shared application state
pub struct AppState {
    config: Config,
    orchestrator: Arc<TaskOrchestrator>,
}

impl AppState {
    pub fn new(config: Config, orchestrator: Arc<TaskOrchestrator>) -> Self {
        Self {
            config,
            orchestrator,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn orchestrator(&self) -> &TaskOrchestrator {
        self.orchestrator.as_ref()
    }

    /// Where a task's hash manifest lives.
    pub fn hash_manifest_path(&self, task_id: &str) -> PathBuf {
        self.config
            .storage
            .data_dir
            .join(format!("{}_hashes.txt", task_id))
    }
}
