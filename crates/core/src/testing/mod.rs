//! Testing utilities and mock implementations of the collaborator traits.
//!
//! The mocks record every call, support error injection, and expose a
//! hold/release gate so cancellation timing can be tested exactly.
//!
//! # Example
//!
//! ```rust,ignore
//! use archivedl_core::testing::{MockDownloadEngine, MockSearchResolver};
//!
//! let engine = MockDownloadEngine::new();
//! let resolver = MockSearchResolver::new();
//!
//! resolver.set_results("topic", vec!["x1".into(), "x2".into()]).await;
//! engine.fail_identifier("x2").await;
//!
//! // Use in a TaskOrchestrator...
//! ```

mod mock_engine;
mod mock_resolver;

pub use mock_engine::MockDownloadEngine;
pub use mock_resolver::MockSearchResolver;

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::Path;

    use crate::task::{Credentials, FetchOptions, Job};

    /// Create a test job with reasonable defaults, rooted in `dir`.
    pub fn job(id: &str, identifiers: &[&str], search_terms: &[&str], dir: &Path) -> Job {
        Job {
            id: id.to_string(),
            identifiers: identifiers.iter().map(|s| s.to_string()).collect(),
            search_terms: search_terms.iter().map(|s| s.to_string()).collect(),
            output_folder: dir.join("downloads"),
            hash_file_path: dir.join(format!("{}_hashes.txt", id)),
            options: FetchOptions::default(),
            credentials: None,
        }
    }

    /// Test credentials.
    pub fn credentials() -> Credentials {
        Credentials {
            principal: "tester@example.org".to_string(),
            secret: "hunter2".to_string(),
        }
    }
}
