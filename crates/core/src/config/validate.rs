use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Backend URLs are plausible
/// - Counts and timeouts are positive
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    for (section, url) in [
        ("resolver.url", &config.resolver.url),
        ("engine.url", &config.engine.url),
    ] {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::ValidationError(format!(
                "{} must be an http(s) URL, got '{}'",
                section, url
            )));
        }
    }

    if config.resolver.page_size == 0 {
        return Err(ConfigError::ValidationError(
            "resolver.page_size must be at least 1".to_string(),
        ));
    }

    if config.resolver.max_results == 0 {
        return Err(ConfigError::ValidationError(
            "resolver.max_results must be at least 1".to_string(),
        ));
    }

    if config.engine.max_thread_count == 0 {
        return Err(ConfigError::ValidationError(
            "engine.max_thread_count must be at least 1".to_string(),
        ));
    }

    if config.worker.dequeue_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "worker.dequeue_timeout_secs must be at least 1".to_string(),
        ));
    }

    Ok(())
}
