//! Configuration module for the pipeline
//!
//! This module handles loading, parsing, and validating TOML configuration files, and
//! resolving the environment-provided settings (queue, bucket, prefix, token) once at
//! start-up.
//!
//! # Example
//!
//! ```no_run
//! use listing_etl::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("listing-etl.toml")).unwrap();
//! println!("Listing pages {}..={}", config.pages.first, config.pages.last);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    ChunksConfig, Config, DetailsConfig, HttpConfig, OutputConfig, PagesConfig, QueueConfig,
    RunnerConfig, StorageConfig,
};

// Re-export parser functions
pub use parser::{
    apply_env_overrides, compute_config_hash, load_config, load_config_with_hash,
    parse_config,
};

/// Queue destination override
pub const QUEUE_URL_ENV: &str = "SQS_QUEUE_URL";

/// Storage bucket override
pub const BUCKET_ENV: &str = "S3_BUCKET_NAME";

/// Storage key prefix override
pub const PREFIX_ENV: &str = "S3_PREFIX";

/// Listing API token override
pub const AUTH_TOKEN_ENV: &str = "LISTING_AUTH_TOKEN";

/// A complete configuration for unit tests
#[cfg(test)]
pub(crate) fn test_config(base_url: &str) -> Config {
    Config {
        http: HttpConfig {
            base_url: base_url.to_string(),
            auth_token: Some("test-token".to_string()),
            timeout_secs: 5,
            user_agent: "TestAgent/1.0".to_string(),
            accept_language: "en-US".to_string(),
        },
        pages: PagesConfig {
            path_template: "/search/car?page={page}".to_string(),
            first: 1,
            last: 3,
        },
        details: DetailsConfig {
            path_template: "/content/{id}?include=extras".to_string(),
            timeout_secs: 2,
        },
        runner: RunnerConfig {
            max_concurrency: 4,
            queue_depth: 8,
            progress_every: 50,
        },
        storage: StorageConfig {
            root: "./data".to_string(),
            bucket: Some("listings".to_string()),
            prefix: String::new(),
            pages_prefix: "pages/".to_string(),
            chunks_prefix: "chunks/".to_string(),
            details_prefix: "details/".to_string(),
        },
        queue: QueueConfig {
            url: Some("./queue.db".to_string()),
            batch_size: 10,
        },
        chunks: ChunksConfig { size: 100 },
        output: OutputConfig {
            csv_path: "./car_features.csv".to_string(),
            database_path: "./listings.db".to_string(),
        },
    }
}
