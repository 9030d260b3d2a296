//! archive.org search backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ResolverConfig;

use super::types::{ResolveError, SearchResolver};

/// archive.org search backend using the scrape API with cursor
/// pagination and an on-disk JSON result cache.
pub struct ArchiveSearchResolver {
    client: Client,
    config: ResolverConfig,
    cache_dir: PathBuf,
}

/// One cached search result file.
#[derive(Debug, Serialize, Deserialize)]
struct CachedSearch {
    term: String,
    fetched_at: DateTime<Utc>,
    identifiers: Vec<String>,
}

impl ArchiveSearchResolver {
    /// Create a new resolver caching results under `cache_dir`.
    pub fn new(config: ResolverConfig, cache_dir: PathBuf) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            config,
            cache_dir,
        }
    }

    /// Build the scrape API URL for one page.
    fn scrape_url(&self, term: &str, cursor: Option<&str>) -> String {
        let mut url = format!(
            "{}/services/search/v1/scrape?q={}&fields=identifier&count={}",
            self.config.url.trim_end_matches('/'),
            urlencoding::encode(term),
            self.config.page_size
        );
        if let Some(cursor) = cursor {
            url.push_str(&format!("&cursor={}", urlencoding::encode(cursor)));
        }
        url
    }

    /// Cache file for a term; hashed so any term is a safe file name.
    fn cache_path(&self, term: &str) -> PathBuf {
        let digest = format!("{:x}", Sha256::digest(term.as_bytes()));
        self.cache_dir.join(format!("{}.json", digest))
    }

    fn read_cache(&self, term: &str) -> Option<Vec<String>> {
        let path = self.cache_path(term);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<CachedSearch>(&content) {
            Ok(cached) => {
                debug!(
                    term,
                    identifiers = cached.identifiers.len(),
                    fetched_at = %cached.fetched_at,
                    "search cache hit"
                );
                Some(cached.identifiers)
            }
            Err(e) => {
                warn!(term, path = %path.display(), error = %e, "discarding unreadable cache entry");
                None
            }
        }
    }

    /// Best effort: a failed cache write only costs the next lookup.
    fn write_cache(&self, term: &str, identifiers: &[String]) {
        let cached = CachedSearch {
            term: term.to_string(),
            fetched_at: Utc::now(),
            identifiers: identifiers.to_vec(),
        };
        let path = self.cache_path(term);
        let result = std::fs::create_dir_all(&self.cache_dir)
            .and_then(|_| std::fs::write(&path, serde_json::to_vec(&cached).unwrap_or_default()));
        if let Err(e) = result {
            warn!(term, path = %path.display(), error = %e, "failed to write search cache");
        }
    }

    async fn scrape_page(&self, url: &str) -> Result<ScrapePage, ResolveError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ResolveError::Timeout
            } else if e.is_connect() {
                ResolveError::ConnectionFailed(e.to_string())
            } else {
                ResolveError::ApiError(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ResolveError::ApiError(format!(
                "HTTP {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ResolveError::ApiError(format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl SearchResolver for ArchiveSearchResolver {
    fn name(&self) -> &str {
        "archive.org"
    }

    async fn resolve(
        &self,
        term: &str,
        refresh_cache: bool,
    ) -> Result<Vec<String>, ResolveError> {
        if !refresh_cache {
            if let Some(cached) = self.read_cache(term) {
                return Ok(cached);
            }
        }

        debug!(term, "scraping search results");
        let mut identifiers = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let url = self.scrape_url(term, cursor.as_deref());
            let page = self.scrape_page(&url).await?;
            identifiers.extend(page.items.into_iter().map(|item| item.identifier));

            if identifiers.len() >= self.config.max_results {
                warn!(
                    term,
                    max_results = self.config.max_results,
                    "search hit the result cap, truncating"
                );
                identifiers.truncate(self.config.max_results);
                break;
            }

            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        debug!(term, identifiers = identifiers.len(), "search complete");
        self.write_cache(term, &identifiers);
        Ok(identifiers)
    }
}

// scrape API response types
#[derive(Debug, Deserialize)]
struct ScrapePage {
    #[serde(default)]
    items: Vec<ScrapeItem>,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScrapeItem {
    identifier: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn resolver(cache_dir: PathBuf) -> ArchiveSearchResolver {
        ArchiveSearchResolver::new(ResolverConfig::default(), cache_dir)
    }

    #[test]
    fn test_scrape_url() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(dir.path().to_path_buf());

        let url = resolver.scrape_url("night of the living dead", None);
        assert!(url.starts_with("https://archive.org/services/search/v1/scrape"));
        assert!(url.contains("q=night%20of%20the%20living%20dead"));
        assert!(url.contains("fields=identifier"));
        assert!(!url.contains("cursor"));

        let url = resolver.scrape_url("zombies", Some("abc+def"));
        assert!(url.contains("cursor=abc%2Bdef"));
    }

    #[test]
    fn test_cache_path_is_stable_and_safe() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(dir.path().to_path_buf());

        let a = resolver.cache_path("weird / term * with : stuff");
        let b = resolver.cache_path("weird / term * with : stuff");
        assert_eq!(a, b);
        assert!(a.file_name().unwrap().to_string_lossy().ends_with(".json"));
        assert_eq!(a.parent().unwrap(), dir.path());
    }

    #[test]
    fn test_cache_roundtrip() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(dir.path().to_path_buf());

        assert!(resolver.read_cache("topic").is_none());

        let identifiers = vec!["x1".to_string(), "x2".to_string()];
        resolver.write_cache("topic", &identifiers);

        assert_eq!(resolver.read_cache("topic"), Some(identifiers));
        assert!(resolver.read_cache("other topic").is_none());
    }

    #[test]
    fn test_unreadable_cache_is_discarded() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(dir.path().to_path_buf());

        std::fs::write(resolver.cache_path("topic"), "not json").unwrap();
        assert!(resolver.read_cache("topic").is_none());
    }

    #[test]
    fn test_scrape_page_parsing() {
        let json = r#"{
            "items": [{"identifier": "x1"}, {"identifier": "x2"}],
            "count": 2,
            "cursor": "next-page",
            "total": 40000
        }"#;
        let page: ScrapePage = serde_json::from_str(json).unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.cursor.as_deref(), Some("next-page"));

        let page: ScrapePage = serde_json::from_str(r#"{"items": [], "total": 0}"#).unwrap();
        assert!(page.items.is_empty());
        assert!(page.cursor.is_none());
    }
}
