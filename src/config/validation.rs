use crate::config::types::{Config, EngineConfig, ProxyProviderConfig, StorageConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_engine_config(&config.engine)?;
    validate_storage_config(&config.storage)?;

    if config.export.stream_threshold == 0 {
        return Err(ConfigError::Validation(
            "stream_threshold must be >= 1".to_string(),
        ));
    }

    if let Some(provider) = &config.proxy_provider {
        validate_provider_config(provider)?;
    }

    Ok(())
}

/// Validates engine tuning
fn validate_engine_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.min_rate <= 0.0 || !config.min_rate.is_finite() {
        return Err(ConfigError::Validation(format!(
            "min_rate must be a positive number, got {}",
            config.min_rate
        )));
    }

    if config.max_rate < config.min_rate || !config.max_rate.is_finite() {
        return Err(ConfigError::Validation(format!(
            "max_rate ({}) must be >= min_rate ({})",
            config.max_rate, config.min_rate
        )));
    }

    if config.initial_rate < config.min_rate || config.initial_rate > config.max_rate {
        return Err(ConfigError::Validation(format!(
            "initial_rate must be between {} and {}, got {}",
            config.min_rate, config.max_rate, config.initial_rate
        )));
    }

    for (name, value) in [
        ("page_timeout_secs", config.page_timeout_secs),
        ("retry_timeout_secs", config.retry_timeout_secs),
        ("retry_sweep_secs", config.retry_sweep_secs),
        ("idle_poll_millis", config.idle_poll_millis),
    ] {
        if value == 0 {
            return Err(ConfigError::Validation(format!("{} must be >= 1", name)));
        }
    }

    if config.max_attempts < 3 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be >= 3, got {}",
            config.max_attempts
        )));
    }

    Ok(())
}

/// Validates storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates the proxy provider section
fn validate_provider_config(config: &ProxyProviderConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.api_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid api_url: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "api_url must use http or https, got '{}'",
            url.scheme()
        )));
    }

    if config.api_key.trim().is_empty() {
        return Err(ConfigError::Validation(
            "api_key is required (or set SUMI_RELAY_API_KEY)".to_string(),
        ));
    }

    if config.page_size == 0 {
        return Err(ConfigError::Validation("page_size must be >= 1".to_string()));
    }

    Ok(())
}
