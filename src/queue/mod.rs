//! Queue Gateway
//!
//! Work is distributed between stages as JSON message bodies:
//! - `MessageQueue` is the async interface (batched send, receive, delete, depth)
//! - `SqliteQueue` is a durable local queue in a single SQLite file
//! - `MemoryQueue` is an in-process queue for tests
//!
//! A batched send reports success or failure per entry. A whole-call failure (an
//! oversized batch, an unreachable backend) is an `Err` and means nothing was sent.

mod memory;
mod sqlite;

pub use memory::MemoryQueue;
pub use sqlite::SqliteQueue;

use async_trait::async_trait;
use std::collections::HashSet;
use thiserror::Error;

/// Most entries accepted by one `send_batch` call
pub const MAX_BATCH_ENTRIES: usize = 10;

/// Largest accepted message body, in bytes
pub const MAX_MESSAGE_BYTES: usize = 256 * 1024;

/// Errors that fail a whole queue call
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Batch of {0} entries exceeds the limit of {MAX_BATCH_ENTRIES}")]
    BatchTooLarge(usize),

    #[error("Batch is empty")]
    EmptyBatch,

    #[error("Queue database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// One entry of a batched send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Batch-local identifier used to report this entry's outcome
    pub id: String,
    pub body: String,
}

impl OutgoingMessage {
    pub fn new(id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
        }
    }
}

/// An entry the queue refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntry {
    pub id: String,
    pub reason: String,
}

/// Per-entry outcome of a batched send
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSendResult {
    /// Ids of the entries that were enqueued
    pub successful: Vec<String>,
    pub failed: Vec<FailedEntry>,
}

/// A message handed out by `receive`, hidden from other receivers until deleted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: String,
    /// Handle passed back to `delete`
    pub receipt: String,
    pub body: String,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Sends up to `MAX_BATCH_ENTRIES` messages, reporting the outcome of each
    async fn send_batch(&self, entries: Vec<OutgoingMessage>) -> QueueResult<BatchSendResult>;

    /// Takes up to `max` visible messages, oldest first
    async fn receive(&self, max: usize) -> QueueResult<Vec<ReceivedMessage>>;

    /// Removes a received message; unknown receipts are ignored
    async fn delete(&self, receipt: &str) -> QueueResult<()>;

    /// Number of messages waiting to be received
    async fn depth(&self) -> QueueResult<usize>;
}

/// Splits a batch into accepted entries and per-entry failures
///
/// Oversized bodies and repeated ids are refused individually; an empty or oversized
/// batch fails the whole call.
pub(crate) fn check_batch(
    entries: Vec<OutgoingMessage>,
) -> QueueResult<(Vec<OutgoingMessage>, Vec<FailedEntry>)> {
    if entries.is_empty() {
        return Err(QueueError::EmptyBatch);
    }
    if entries.len() > MAX_BATCH_ENTRIES {
        return Err(QueueError::BatchTooLarge(entries.len()));
    }

    let mut seen = HashSet::new();
    let mut accepted = Vec::with_capacity(entries.len());
    let mut failed = Vec::new();

    for entry in entries {
        if !seen.insert(entry.id.clone()) {
            failed.push(FailedEntry {
                id: entry.id,
                reason: "duplicate entry id".to_string(),
            });
        } else if entry.body.len() > MAX_MESSAGE_BYTES {
            failed.push(FailedEntry {
                reason: format!(
                    "body of {} bytes exceeds {} bytes",
                    entry.body.len(),
                    MAX_MESSAGE_BYTES
                ),
                id: entry.id,
            });
        } else {
            accepted.push(entry);
        }
    }

    Ok((accepted, failed))
}
