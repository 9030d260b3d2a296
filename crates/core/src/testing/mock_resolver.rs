//! Mock search resolver for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::resolver::{ResolveError, SearchResolver};

/// Mock implementation of the `SearchResolver` trait.
///
/// Provides controllable behavior for testing:
/// - Return configurable identifier lists per term
/// - Track resolved terms for assertions
/// - Simulate failures for chosen terms
#[derive(Debug, Default)]
pub struct MockSearchResolver {
    /// Configured results per term.
    results: Arc<RwLock<HashMap<String, Vec<String>>>>,
    /// Terms whose resolution fails.
    failing_terms: Arc<RwLock<HashSet<String>>>,
    /// Recorded (term, refresh_cache) calls, in order.
    recorded: Arc<RwLock<Vec<(String, bool)>>>,
}

impl MockSearchResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the identifiers returned for a term.
    pub async fn set_results(&self, term: &str, identifiers: Vec<String>) {
        self.results
            .write()
            .await
            .insert(term.to_string(), identifiers);
    }

    /// Make resolution of a term fail.
    pub async fn fail_term(&self, term: &str) {
        self.failing_terms.write().await.insert(term.to_string());
    }

    /// Recorded calls, in order.
    pub async fn recorded(&self) -> Vec<(String, bool)> {
        self.recorded.read().await.clone()
    }

    /// Terms resolved so far, in order.
    pub async fn resolved_terms(&self) -> Vec<String> {
        self.recorded
            .read()
            .await
            .iter()
            .map(|(term, _)| term.clone())
            .collect()
    }

    /// Number of resolutions performed.
    pub async fn resolve_count(&self) -> usize {
        self.recorded.read().await.len()
    }
}

#[async_trait]
impl SearchResolver for MockSearchResolver {
    fn name(&self) -> &str {
        "mock"
    }

    async fn resolve(
        &self,
        term: &str,
        refresh_cache: bool,
    ) -> Result<Vec<String>, ResolveError> {
        self.recorded
            .write()
            .await
            .push((term.to_string(), refresh_cache));

        if self.failing_terms.read().await.contains(term) {
            return Err(ResolveError::ApiError(format!(
                "injected failure for '{}'",
                term
            )));
        }

        Ok(self
            .results
            .read()
            .await
            .get(term)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_configured_results() {
        let resolver = MockSearchResolver::new();
        resolver
            .set_results("topic", vec!["x1".to_string(), "x2".to_string()])
            .await;

        let resolved = resolver.resolve("topic", false).await.unwrap();
        assert_eq!(resolved, vec!["x1".to_string(), "x2".to_string()]);

        // Unconfigured terms resolve to nothing.
        assert!(resolver.resolve("other", false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let resolver = MockSearchResolver::new();
        resolver.fail_term("broken").await;

        assert!(resolver.resolve("broken", false).await.is_err());
        assert_eq!(resolver.resolve_count().await, 1);
    }

    #[tokio::test]
    async fn test_recorded_calls() {
        let resolver = MockSearchResolver::new();
        resolver.resolve("first", false).await.unwrap();
        resolver.resolve("second", true).await.unwrap();

        let recorded = resolver.recorded().await;
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0], ("first".to_string(), false));
        assert_eq!(recorded[1], ("second".to_string(), true));
    }
}
