use super::{
    check_batch, BatchSendResult, MessageQueue, OutgoingMessage, QueueError, QueueResult,
    ReceivedMessage,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    visible: VecDeque<(u64, String)>,
    in_flight: HashMap<String, (u64, String)>,
}

/// In-process queue
///
/// `set_available(false)` makes every call fail as a whole, like an unreachable backend.
#[derive(Debug)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
    available: AtomicBool,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Bodies of all visible messages, oldest first
    pub fn bodies(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|inner| inner.visible.iter().map(|(_, b)| b.clone()).collect())
            .unwrap_or_default()
    }

    fn guard(&self) -> QueueResult<std::sync::MutexGuard<'_, Inner>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("queue is offline".to_string()));
        }
        self.inner
            .lock()
            .map_err(|_| QueueError::Unavailable("queue lock poisoned".to_string()))
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn send_batch(&self, entries: Vec<OutgoingMessage>) -> QueueResult<BatchSendResult> {
        let mut inner = self.guard()?;
        let (accepted, failed) = check_batch(entries)?;

        let mut successful = Vec::with_capacity(accepted.len());
        for entry in accepted {
            inner.next_id += 1;
            let id = inner.next_id;
            inner.visible.push_back((id, entry.body));
            successful.push(entry.id);
        }

        Ok(BatchSendResult { successful, failed })
    }

    async fn receive(&self, max: usize) -> QueueResult<Vec<ReceivedMessage>> {
        let mut inner = self.guard()?;
        let mut received = Vec::new();

        while received.len() < max {
            let Some((id, body)) = inner.visible.pop_front() else {
                break;
            };
            let receipt = format!("rcpt-{}", id);
            inner.in_flight.insert(receipt.clone(), (id, body.clone()));
            received.push(ReceivedMessage {
                message_id: format!("msg-{}", id),
                receipt,
                body,
            });
        }

        Ok(received)
    }

    async fn delete(&self, receipt: &str) -> QueueResult<()> {
        self.guard()?.in_flight.remove(receipt);
        Ok(())
    }

    async fn depth(&self) -> QueueResult<usize> {
        Ok(self.guard()?.visible.len())
    }
}
