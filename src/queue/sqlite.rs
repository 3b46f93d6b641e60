use super::{
    check_batch, BatchSendResult, MessageQueue, OutgoingMessage, QueueError, QueueResult,
    ReceivedMessage,
};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const QUEUE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    body TEXT NOT NULL,
    enqueued_at TEXT NOT NULL,
    receipt TEXT UNIQUE,
    received_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_messages_receipt ON messages(receipt);
"#;

/// Durable local queue stored in one SQLite file
///
/// Received messages stay in the table with a receipt until deleted, so a consumer
/// that dies before deleting can hand them back with `release_in_flight`.
pub struct SqliteQueue {
    conn: Mutex<Connection>,
}

impl SqliteQueue {
    /// Opens (or creates) the queue named by a configured queue URL
    ///
    /// # Arguments
    ///
    /// * `url` - A file path, optionally written as `sqlite://<path>`
    pub fn open(url: &str) -> QueueResult<Self> {
        let path = Path::new(url.strip_prefix("sqlite://").unwrap_or(url));
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                QueueError::Unavailable(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
        ",
        )?;
        conn.execute_batch(QUEUE_SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> QueueResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(QUEUE_SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Makes every received-but-undeleted message visible again
    ///
    /// # Returns
    ///
    /// The number of messages returned to the queue
    pub fn release_in_flight(&self) -> QueueResult<usize> {
        let conn = self.conn()?;
        let released = conn.execute(
            "UPDATE messages SET receipt = NULL, received_at = NULL WHERE receipt IS NOT NULL",
            [],
        )?;
        Ok(released)
    }

    fn conn(&self) -> QueueResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| QueueError::Unavailable("queue connection lock poisoned".to_string()))
    }
}

#[async_trait]
impl MessageQueue for SqliteQueue {
    async fn send_batch(&self, entries: Vec<OutgoingMessage>) -> QueueResult<BatchSendResult> {
        let (accepted, failed) = check_batch(entries)?;
        let mut conn = self.conn()?;
        let now = Utc::now().to_rfc3339();

        let tx = conn.transaction()?;
        let mut successful = Vec::with_capacity(accepted.len());
        {
            let mut stmt =
                tx.prepare("INSERT INTO messages (body, enqueued_at) VALUES (?1, ?2)")?;
            for entry in accepted {
                stmt.execute(params![entry.body, now])?;
                successful.push(entry.id);
            }
        }
        tx.commit()?;

        Ok(BatchSendResult { successful, failed })
    }

    async fn receive(&self, max: usize) -> QueueResult<Vec<ReceivedMessage>> {
        let mut conn = self.conn()?;
        let now = Utc::now().to_rfc3339();

        let tx = conn.transaction()?;
        let pending: Vec<(i64, String)> = {
            let mut stmt = tx.prepare(
                "SELECT id, body FROM messages WHERE receipt IS NULL ORDER BY id LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![max as i64], |row| Ok((row.get(0)?, row.get(1)?)))?;
            let pending = rows.collect::<Result<Vec<_>, _>>()?;
            pending
        };

        let mut received = Vec::with_capacity(pending.len());
        for (id, body) in pending {
            let receipt = format!("rcpt-{}-{}", id, Utc::now().timestamp_nanos_opt().unwrap_or(0));
            tx.execute(
                "UPDATE messages SET receipt = ?1, received_at = ?2 WHERE id = ?3",
                params![receipt, now, id],
            )?;
            received.push(ReceivedMessage {
                message_id: format!("msg-{}", id),
                receipt,
                body,
            });
        }
        tx.commit()?;

        Ok(received)
    }

    async fn delete(&self, receipt: &str) -> QueueResult<()> {
        self.conn()?
            .execute("DELETE FROM messages WHERE receipt = ?1", params![receipt])?;
        Ok(())
    }

    async fn depth(&self) -> QueueResult<usize> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM messages WHERE receipt IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
