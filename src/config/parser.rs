use crate::config::types::Config;
use crate::config::validation::validate;
use crate::config::{AUTH_TOKEN_ENV, BUCKET_ENV, PREFIX_ENV, QUEUE_URL_ENV};
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// Environment overrides (`SQS_QUEUE_URL`, `S3_BUCKET_NAME`, `S3_PREFIX`,
/// `LISTING_AUTH_TOKEN`) are applied after parsing and before validation, so the
/// returned configuration is the one every stage sees for the whole process.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content, |name| std::env::var(name).ok())
}

/// Parses configuration text, applying overrides from `lookup`
///
/// `lookup` maps an environment variable name to its value; tests pass a closure over a
/// fixed map instead of touching the process environment.
pub fn parse_config<F>(content: &str, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: Config = toml::from_str(content)?;
    apply_env_overrides(&mut config, lookup);
    validate(&config)?;
    Ok(config)
}

/// Overrides file settings with non-empty environment values
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let value = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(url) = value(QUEUE_URL_ENV) {
        config.queue.url = Some(url);
    }
    if let Some(bucket) = value(BUCKET_ENV) {
        config.storage.bucket = Some(bucket);
    }
    if let Some(prefix) = value(PREFIX_ENV) {
        config.storage.prefix = prefix;
    }
    if let Some(token) = value(AUTH_TOKEN_ENV) {
        config.http.auth_token = Some(token);
    }
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Every ledger run records this hash so that runs made with different settings can be
/// told apart.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}
