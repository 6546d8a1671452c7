use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Environment variable that supplies the proxy provider token
pub const API_KEY_ENV: &str = "SUMI_RELAY_API_KEY";

/// Loads, overrides and validates the configuration at `path`
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use sumi_relay::config::load_config;
///
/// let config = load_config(Path::new("relay.toml")).unwrap();
/// println!("Database: {}", config.storage.database_path);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content, |key| std::env::var(key).ok())
}

/// Loads a configuration together with the SHA-256 of the bytes it was parsed from
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content, |key| std::env::var(key).ok())?;
    Ok((config, hash_content(&content)))
}

/// Hex SHA-256 of a configuration file, logged at startup to tell runs apart
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Ok(hash_content(&content))
}

/// Parses TOML text, applies environment overrides looked up through `env`, then validates
pub fn parse_config<F>(content: &str, env: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: Config = toml::from_str(content)?;

    if let Some(provider) = config.proxy_provider.as_mut() {
        if let Some(key) = env(API_KEY_ENV).filter(|k| !k.trim().is_empty()) {
            provider.api_key = key;
        }
    }

    validate(&config)?;
    Ok(config)
}

fn hash_content(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}
