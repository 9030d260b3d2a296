use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::orchestrator::WorkerConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    "0.0.0.0".parse().unwrap()
}

fn default_port() -> u16 {
    9124
}

/// Storage layout configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Folder task output folders are created under.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// Folder for hash manifests and the search cache.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl StorageConfig {
    /// Where the search resolver keeps its result cache.
    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("archivedl_data")
}

/// Search resolver configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverConfig {
    /// Search backend base URL.
    #[serde(default = "default_archive_url")]
    pub url: String,
    /// Request timeout in seconds.
    #[serde(default = "default_resolver_timeout")]
    pub timeout_secs: u32,
    /// Identifiers fetched per scrape page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Hard cap on identifiers resolved from a single term.
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            url: default_archive_url(),
            timeout_secs: default_resolver_timeout(),
            page_size: default_page_size(),
            max_results: default_max_results(),
        }
    }
}

fn default_archive_url() -> String {
    "https://archive.org".to_string()
}

fn default_resolver_timeout() -> u32 {
    60
}

fn default_page_size() -> u32 {
    1000
}

fn default_max_results() -> usize {
    10_000
}

/// Download engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Download backend base URL.
    #[serde(default = "default_archive_url")]
    pub url: String,
    /// Connect timeout in seconds; payload transfers have no overall cap.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Timeout for metadata and auth requests, in seconds.
    #[serde(default = "default_engine_timeout")]
    pub timeout_secs: u64,
    /// Files above this size are eligible for ranged splitting.
    #[serde(default = "default_split_threshold")]
    pub split_threshold_bytes: u64,
    /// Retries for transient per-file failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    /// Upper bound on per-job thread/split counts accepted from callers.
    #[serde(default = "default_max_thread_count")]
    pub max_thread_count: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: default_archive_url(),
            connect_timeout_secs: default_connect_timeout(),
            timeout_secs: default_engine_timeout(),
            split_threshold_bytes: default_split_threshold(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
            max_thread_count: default_max_thread_count(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_engine_timeout() -> u64 {
    60
}

fn default_split_threshold() -> u64 {
    10 * 1024 * 1024 // 10 MiB
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    5
}

fn default_max_thread_count() -> usize {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 9124);
        assert_eq!(config.storage.download_dir, PathBuf::from("downloads"));
        assert_eq!(
            config.storage.cache_dir(),
            PathBuf::from("archivedl_data/cache")
        );
        assert_eq!(config.resolver.url, "https://archive.org");
        assert_eq!(config.engine.split_threshold_bytes, 10 * 1024 * 1024);
        assert_eq!(config.engine.max_thread_count, 5);
        assert_eq!(config.worker.dequeue_timeout_secs, 60);
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let toml = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.server.port, config.server.port);
        assert_eq!(parsed.engine.url, config.engine.url);
    }
}
