//! Worker configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the background worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// How long one dequeue blocks before the runner loop wakes to
    /// re-check for shutdown (seconds). Work arriving while parked is
    /// picked up immediately; this only bounds the idle wake interval.
    #[serde(default = "default_dequeue_timeout")]
    pub dequeue_timeout_secs: u64,
}

fn default_dequeue_timeout() -> u64 {
    60
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            dequeue_timeout_secs: default_dequeue_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.dequeue_timeout_secs, 60);
    }

    #[test]
    fn test_deserialize_minimal() {
        let config: WorkerConfig = toml::from_str("").unwrap();
        assert_eq!(config.dequeue_timeout_secs, 60);
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
            dequeue_timeout_secs = 5
        "#;
        let config: WorkerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.dequeue_timeout_secs, 5);
    }
}
