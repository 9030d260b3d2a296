//! Search resolution abstraction.
//!
//! This module provides a `SearchResolver` trait for expanding a search
//! term into item identifiers, plus the archive.org scrape-API backend.

mod archive;
mod types;

pub use archive::ArchiveSearchResolver;
pub use types::*;
