//! Listing-ETL: a resumable scrape-and-flatten pipeline for classified car listings
//!
//! This crate lists search-result pages, extracts detail links, fans them out into
//! bounded chunks (files or queue batches), fetches every listing detail under a bounded
//! worker pool, flattens the stored details into fixed-schema rows and loads the table
//! into SQLite.

pub mod config;
pub mod fetch;
pub mod invoke;
pub mod output;
pub mod pipeline;
pub mod queue;
pub mod runner;
pub mod storage;
pub mod store;

use std::fmt;
use thiserror::Error;

pub use fetch::FetchError;

/// Main error type for pipeline operations
#[derive(Debug, Error)]
pub enum EtlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Object store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] queue::QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Malformed document {key}: {reason}")]
    Malformed { key: String, reason: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Worker failed: {0}")]
    Worker(String),
}

impl EtlError {
    /// Classifies this error into the pipeline's failure taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Configuration,
            Self::Fetch(e) => e.kind(),
            Self::Malformed { .. } | Self::Json(_) => ErrorKind::Decode,
            Self::Store(_) | Self::Queue(_) | Self::Storage(_) | Self::Csv(_) | Self::Io(_) => {
                ErrorKind::Persistence
            }
            Self::Client(_) | Self::Worker(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand for a document that lacks the structure a stage needs
    pub fn malformed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Failure categories reported per work unit and per stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    /// A required setting is missing or invalid; fatal to the invocation
    Configuration,
    /// The request did not complete within its timeout
    Timeout,
    /// DNS, connection or other network-level failure
    Transport,
    /// The server answered with a status other than 200
    Http,
    /// The payload was not the JSON (or CSV) the stage expected
    Decode,
    /// Writing to or reading from the object store, queue or ledger failed
    Persistence,
    /// Anything else, including panics inside a worker
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::Http => "http",
            Self::Decode => "decode",
            Self::Persistence => "persistence",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Required setting {0} is not set")]
    Missing(&'static str),

    #[error("Invalid storage location: {0}")]
    InvalidLocation(String),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, EtlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use pipeline::{FlatRecord, ListingLink, Pipeline};
pub use runner::{BatchReport, BatchRunner, WorkUnit};
