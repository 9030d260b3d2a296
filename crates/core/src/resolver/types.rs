//! Types for the search resolution boundary.

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur while resolving a search term.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("search backend connection failed: {0}")]
    ConnectionFailed(String),

    #[error("search backend API error: {0}")]
    ApiError(String),

    #[error("search cache error: {0}")]
    Cache(String),

    #[error("request timeout")]
    Timeout,
}

/// Trait for search backends.
#[async_trait]
pub trait SearchResolver: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Expand one search term into an ordered list of item identifiers.
    ///
    /// `refresh_cache` bypasses any local result cache the backend keeps.
    async fn resolve(&self, term: &str, refresh_cache: bool)
        -> Result<Vec<String>, ResolveError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ResolveError::ApiError("bad response".to_string());
        assert_eq!(err.to_string(), "search backend API error: bad response");

        let err = ResolveError::Timeout;
        assert_eq!(err.to_string(), "request timeout");
    }
}
