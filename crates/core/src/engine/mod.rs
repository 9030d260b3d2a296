//! Download engine abstraction.
//!
//! This module provides a `DownloadEngine` trait for fetching one item's
//! files, plus the archive.org HTTP backend.

mod archive;
mod hash_sink;
mod types;

pub use archive::ArchiveEngine;
pub use hash_sink::HashSink;
pub use types::*;
