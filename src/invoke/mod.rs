//! Triggered-compute handlers
//!
//! Each handler takes an event (a list of queue records) or no input at all, processes
//! every record independently, and answers with a status code plus a JSON summary:
//! - `handle_page_requests` - enqueue one page request per page index
//! - `handle_page_event` - fetch and store the pages named by page requests
//! - `handle_link_scan` - scan stored pages and enqueue one link message per listing
//! - `handle_detail_event` - fetch and store the details named by link messages
//!
//! `drain` feeds the local queue into the page or detail handler batch by batch.

mod drain;
mod handlers;

pub use drain::{drain, DrainReport, DrainTarget};
pub use handlers::{handle_detail_event, handle_link_scan, handle_page_event, handle_page_requests};

use crate::queue::ReceivedMessage;
use crate::EtlError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A batch of queue records delivered to a handler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<EventRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "messageId", default)]
    pub message_id: String,
    /// JSON text of the message
    pub body: String,
}

impl QueueEvent {
    pub fn from_messages(messages: &[ReceivedMessage]) -> Self {
        Self {
            records: messages
                .iter()
                .map(|m| EventRecord {
                    message_id: m.message_id.clone(),
                    body: m.body.clone(),
                })
                .collect(),
        }
    }
}

/// Status code and summary body returned by every handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: Value,
}

impl InvocationResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status_code: 200,
            body,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status_code: 500,
            body: json!({ "error": message.into() }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }
}

/// Turns a handler result into a response
///
/// Per-record failures live inside a successful summary; an `Err` here means the
/// invocation could not run at all (missing setting, unlistable store) and becomes a 500.
pub fn respond(result: Result<Value, EtlError>) -> InvocationResponse {
    match result {
        Ok(body) => InvocationResponse::ok(body),
        Err(e) => {
            tracing::error!("Invocation failed ({}): {}", e.kind(), e);
            InvocationResponse::error(e.to_string())
        }
    }
}

/// Body of a page request message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Page index; a number or a string
    #[serde(default)]
    pub page: Option<Value>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Body of a detail message: one `{"link": url}` object or a list of URLs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LinkMessage {
    Single { link: String },
    Many(Vec<String>),
}

impl LinkMessage {
    pub fn into_links(self) -> Vec<String> {
        match self {
            Self::Single { link } => vec![link],
            Self::Many(links) => links,
        }
    }
}
