use crate::config::types::{
    ChunksConfig, Config, DetailsConfig, HttpConfig, OutputConfig, PagesConfig, QueueConfig,
    RunnerConfig, StorageConfig,
};
use crate::queue::MAX_BATCH_ENTRIES;
use crate::store::Location;
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_http_config(&config.http)?;
    validate_pages_config(&config.pages)?;
    validate_details_config(&config.details)?;
    validate_runner_config(&config.runner)?;
    validate_storage_config(&config.storage)?;
    validate_queue_config(&config.queue)?;
    validate_chunks_config(&config.chunks)?;
    validate_output_config(&config.output)?;
    Ok(())
}

fn validate_http_config(config: &HttpConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url must use http or https, got '{}'",
            url.scheme()
        )));
    }

    if config.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "http timeout-secs must be >= 1".to_string(),
        ));
    }

    if let Some(token) = &config.auth_token {
        if !token.chars().all(|c| c.is_ascii_graphic()) {
            return Err(ConfigError::Validation(
                "auth-token must be printable ASCII without spaces".to_string(),
            ));
        }
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_pages_config(config: &PagesConfig) -> Result<(), ConfigError> {
    if !config.path_template.contains("{page}") {
        return Err(ConfigError::Validation(format!(
            "pages path-template must contain {{page}}, got '{}'",
            config.path_template
        )));
    }

    if config.first > config.last {
        return Err(ConfigError::Validation(format!(
            "page range is empty: first {} > last {}",
            config.first, config.last
        )));
    }

    Ok(())
}

fn validate_details_config(config: &DetailsConfig) -> Result<(), ConfigError> {
    if !config.path_template.contains("{id}") {
        return Err(ConfigError::Validation(format!(
            "details path-template must contain {{id}}, got '{}'",
            config.path_template
        )));
    }

    if config.timeout_secs < 1 || config.timeout_secs > 120 {
        return Err(ConfigError::Validation(format!(
            "details timeout-secs must be between 1 and 120, got {}",
            config.timeout_secs
        )));
    }

    Ok(())
}

fn validate_runner_config(config: &RunnerConfig) -> Result<(), ConfigError> {
    if config.max_concurrency < 1 || config.max_concurrency > 256 {
        return Err(ConfigError::Validation(format!(
            "max-concurrency must be between 1 and 256, got {}",
            config.max_concurrency
        )));
    }

    if config.queue_depth < 1 {
        return Err(ConfigError::Validation(format!(
            "queue-depth must be >= 1, got {}",
            config.queue_depth
        )));
    }

    if config.progress_every < 1 {
        return Err(ConfigError::Validation(
            "progress-every must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.root.is_empty() {
        return Err(ConfigError::Validation("storage root cannot be empty".to_string()));
    }

    // The bucket may still arrive later from the environment; only check what is set
    if let Some(bucket) = config.bucket.as_deref().filter(|b| !b.is_empty()) {
        for stage_prefix in [
            &config.pages_prefix,
            &config.chunks_prefix,
            &config.details_prefix,
        ] {
            Location::new(bucket, &config.stage_prefix(stage_prefix))?;
        }
    }

    Ok(())
}

fn validate_queue_config(config: &QueueConfig) -> Result<(), ConfigError> {
    if config.batch_size < 1 || config.batch_size > MAX_BATCH_ENTRIES {
        return Err(ConfigError::Validation(format!(
            "queue batch-size must be between 1 and {}, got {}",
            MAX_BATCH_ENTRIES, config.batch_size
        )));
    }
    Ok(())
}

fn validate_chunks_config(config: &ChunksConfig) -> Result<(), ConfigError> {
    if config.size < 1 {
        return Err(ConfigError::Validation(
            "chunk size must be >= 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.csv_path.is_empty() {
        return Err(ConfigError::Validation("csv-path cannot be empty".to_string()));
    }

    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    Ok(())
}
