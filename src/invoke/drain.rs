use super::{handle_detail_event, handle_page_event, respond, InvocationResponse, QueueEvent};
use crate::pipeline::Pipeline;
use crate::runner::BatchRunner;
use crate::EtlError;
use std::fmt;

/// Handler the drained messages are fed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainTarget {
    Page,
    Detail,
}

impl fmt::Display for DrainTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Page => write!(f, "page"),
            Self::Detail => write!(f, "detail"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Handler invocations made
    pub batches: usize,
    /// Messages received across every batch
    pub messages: usize,
    /// Invocations answered with a non-200 status; their messages stay in flight
    pub failed_invocations: usize,
    pub cancelled: bool,
}

/// Feeds the attached queue into a handler, one received batch per invocation
///
/// Messages of a successful invocation are deleted; those of a failed invocation are
/// left in flight and become visible again the next time the pipeline opens the queue
/// (see `Pipeline::from_config`). Stops when the
/// queue is empty or the runner is cancelled.
pub async fn drain(
    pipeline: &Pipeline,
    runner: &BatchRunner,
    target: DrainTarget,
) -> Result<DrainReport, EtlError> {
    let queue = pipeline.queue()?;
    let batch_size = pipeline.config.queue.batch_size;
    let mut report = DrainReport::default();

    loop {
        if runner.is_cancelled() {
            report.cancelled = true;
            break;
        }

        let messages = queue.receive(batch_size).await?;
        if messages.is_empty() {
            break;
        }

        let event = QueueEvent::from_messages(&messages);
        let response: InvocationResponse = match target {
            DrainTarget::Page => respond(handle_page_event(pipeline, runner, &event).await),
            DrainTarget::Detail => respond(handle_detail_event(pipeline, runner, &event).await),
        };

        report.batches += 1;
        report.messages += messages.len();
        tracing::info!(
            "{} batch {} ({} messages): {} {}",
            target,
            report.batches,
            messages.len(),
            response.status_code,
            response.body
        );

        if response.is_success() {
            for message in &messages {
                queue.delete(&message.receipt).await?;
            }
        } else {
            report.failed_invocations += 1;
        }
    }

    tracing::info!(
        "Drained {} messages in {} batches ({} failed invocations)",
        report.messages,
        report.batches,
        report.failed_invocations
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::queue::{MemoryQueue, MessageQueue, OutgoingMessage};
    use crate::store::{MemoryObjectStore, ObjectStore};
    use std::sync::Arc;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn enqueue_links(queue: &MemoryQueue, ids: std::ops::RangeInclusive<u32>) {
        let entries: Vec<_> = ids
            .map(|id| {
                OutgoingMessage::new(
                    id.to_string(),
                    format!(r#"{{"link":"https://x/annons/{}"}}"#, id),
                )
            })
            .collect();
        for batch in entries.chunks(10) {
            queue.send_batch(batch.to_vec()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_drains_detail_messages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"data":{}}"#))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryObjectStore::new());
        let queue = Arc::new(MemoryQueue::new());
        enqueue_links(&queue, 1..=23).await;

        let pipeline = Pipeline::new(test_config(&server.uri()), store.clone())
            .unwrap()
            .with_queue(queue.clone());
        let runner = BatchRunner::new(&pipeline.config.runner);

        let report = drain(&pipeline, &runner, DrainTarget::Detail).await.unwrap();
        assert_eq!(report.batches, 3);
        assert_eq!(report.messages, 23);
        assert_eq!(report.failed_invocations, 0);
        assert_eq!(queue.depth().await.unwrap(), 0);
        assert!(store.exists("listings", "details/23.json").await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_invocation_keeps_messages() {
        let mut config = test_config("https://api.example.com");
        config.storage.bucket = None;

        let queue = Arc::new(MemoryQueue::new());
        enqueue_links(&queue, 1..=3).await;

        let pipeline = Pipeline::new(config, Arc::new(MemoryObjectStore::new()))
            .unwrap()
            .with_queue(queue.clone());
        let runner = BatchRunner::new(&pipeline.config.runner);

        let report = drain(&pipeline, &runner, DrainTarget::Detail).await.unwrap();
        assert_eq!(report.batches, 1);
        assert_eq!(report.failed_invocations, 1);
    }

    #[tokio::test]
    async fn test_cancelled_drain_receives_nothing() {
        let queue = Arc::new(MemoryQueue::new());
        enqueue_links(&queue, 1..=3).await;

        let pipeline = Pipeline::new(
            test_config("https://api.example.com"),
            Arc::new(MemoryObjectStore::new()),
        )
        .unwrap()
        .with_queue(queue.clone());
        let runner = BatchRunner::new(&pipeline.config.runner);
        runner.cancellation_token().cancel();

        let report = drain(&pipeline, &runner, DrainTarget::Page).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(queue.depth().await.unwrap(), 3);
    }
}
