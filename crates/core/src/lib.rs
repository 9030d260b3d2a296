pub mod config;
pub mod engine;
pub mod metrics;
pub mod orchestrator;
pub mod resolver;
pub mod task;
pub mod testing;
pub mod verify;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, EngineConfig,
    ResolverConfig, ServerConfig, StorageConfig,
};
pub use engine::{
    ArchiveEngine, DownloadEngine, EngineError, FetchReport, FetchRequest, HashSink, ProgressSink,
};
pub use orchestrator::{OrchestratorStatus, SubmitError, TaskOrchestrator, WorkerConfig};
pub use resolver::{ArchiveSearchResolver, ResolveError, SearchResolver};
pub use task::{
    is_valid_identifier, new_task_id, Credentials, FetchOptions, Job, LedgerError, StateCounts,
    StatusLedger, StopError, TaskProgress, TaskQueue, TaskState, TaskStatus,
};
pub use verify::{
    load_manifest, md5_file, verify_folder, ManifestEntry, VerifyError, VerifyOptions,
    VerifyReport,
};
