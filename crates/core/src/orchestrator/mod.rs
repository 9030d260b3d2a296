//! Task orchestration.
//!
//! Submission façade, the in-memory queue/ledger wiring, the supervised
//! single-worker lifecycle, and the task runner itself.

mod config;
mod runner;
mod supervisor;
mod types;

pub use config::WorkerConfig;
pub use supervisor::TaskOrchestrator;
pub use types::{OrchestratorStatus, SubmitError};
