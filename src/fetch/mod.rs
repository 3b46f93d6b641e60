//! HTTP Fetch Client
//!
//! This module owns every outbound request the pipeline makes:
//! - Building one shared client with the injected headers (token, language, agent)
//! - GET requests with an optional per-request timeout
//! - Treating exactly HTTP 200 as success
//! - Classifying failures into timeout, transport, HTTP status and decode errors

mod client;

pub use client::{build_http_client, fetch_bytes, fetch_json, JsonPayload};

use crate::ErrorKind;
use thiserror::Error;

/// Why a single fetch failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("Request to {url} returned HTTP {status}")]
    Http { url: String, status: u16 },

    #[error("Response from {url} is not valid JSON: {message}")]
    Decode { url: String, message: String },
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Http { .. } => ErrorKind::Http,
            Self::Decode { .. } => ErrorKind::Decode,
        }
    }

    /// The URL the failed request was sent to
    pub fn url(&self) -> &str {
        match self {
            Self::Timeout { url }
            | Self::Transport { url, .. }
            | Self::Http { url, .. }
            | Self::Decode { url, .. } => url,
        }
    }
}
