use super::links::ListingLink;
use crate::queue::{MessageQueue, OutgoingMessage};
use crate::store::{Location, ObjectStore};
use crate::{ConfigError, EtlError};
use async_trait::async_trait;
use serde_json::json;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Header of every chunk file
pub const CHUNK_HEADER: &str = "link";

/// Splits `items` into contiguous chunks of at most `size`, preserving order
pub fn split_chunks<T>(items: &[T], size: NonZeroUsize) -> impl Iterator<Item = &[T]> {
    items.chunks(size.get())
}

/// Object name of the `number`-th chunk file (1-based)
pub fn chunk_key(number: usize) -> String {
    format!("car_links_{}.csv", number)
}

/// Chunk number embedded in a `car_links_{n}.csv` name
pub fn chunk_number(name: &str) -> Option<usize> {
    name.rsplit('/')
        .next()?
        .strip_prefix("car_links_")?
        .strip_suffix(".csv")?
        .parse()
        .ok()
}

/// Reads the links of a chunk file, skipping blank rows
pub fn parse_chunk(body: &[u8]) -> Result<Vec<ListingLink>, EtlError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(body);

    let column = reader
        .headers()?
        .iter()
        .position(|h| h.trim() == CHUNK_HEADER)
        .unwrap_or(0);

    let mut links = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(link) = record.get(column).map(str::trim).filter(|l| !l.is_empty()) {
            links.push(ListingLink::from(link));
        }
    }
    Ok(links)
}

/// Renders a chunk file: a `link` header followed by one link per row
pub fn render_chunk(links: &[ListingLink]) -> Result<Vec<u8>, EtlError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([CHUNK_HEADER])?;
    for link in links {
        writer.write_record([link.as_str()])?;
    }
    writer
        .into_inner()
        .map_err(|e| EtlError::Io(e.into_error()))
}

/// Chunk file names in `location`, ordered by chunk number
pub async fn list_chunks(
    store: &dyn ObjectStore,
    location: &Location,
) -> Result<Vec<String>, EtlError> {
    let mut names: Vec<String> = location
        .list_names(store)
        .await?
        .into_iter()
        .filter(|name| chunk_number(name).is_some())
        .collect();
    names.sort_by_key(|name| chunk_number(name));
    Ok(names)
}

/// Per-item outcome of delivering one chunk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkDelivery {
    pub sent: u64,
    pub failed: u64,
}

/// Destination for link chunks
#[async_trait]
pub trait ChunkSink: Send + Sync {
    /// Delivers chunk `number` (1-based)
    ///
    /// An `Err` means the whole call failed and none of the chunk's items were delivered.
    async fn deliver(&self, number: usize, chunk: &[ListingLink]) -> Result<ChunkDelivery, EtlError>;
}

/// Sends each chunk as one batched queue call of `{"link": url}` messages
pub struct QueueSink {
    queue: Arc<dyn MessageQueue>,
}

impl QueueSink {
    pub fn new(queue: Arc<dyn MessageQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl ChunkSink for QueueSink {
    async fn deliver(&self, number: usize, chunk: &[ListingLink]) -> Result<ChunkDelivery, EtlError> {
        let entries = chunk
            .iter()
            .enumerate()
            .map(|(i, link)| OutgoingMessage::new(i.to_string(), json!({ "link": link }).to_string()))
            .collect();

        let result = self.queue.send_batch(entries).await?;
        for failed in &result.failed {
            tracing::warn!(
                "Chunk {} entry {} rejected by queue: {}",
                number,
                failed.id,
                failed.reason
            );
        }

        Ok(ChunkDelivery {
            sent: result.successful.len() as u64,
            failed: result.failed.len() as u64,
        })
    }
}

/// Writes each chunk as `car_links_{n}.csv` in a store location
pub struct CsvChunkSink {
    store: Arc<dyn ObjectStore>,
    location: Location,
}

impl CsvChunkSink {
    pub fn new(store: Arc<dyn ObjectStore>, location: Location) -> Self {
        Self { store, location }
    }
}

#[async_trait]
impl ChunkSink for CsvChunkSink {
    async fn deliver(&self, number: usize, chunk: &[ListingLink]) -> Result<ChunkDelivery, EtlError> {
        let name = chunk_key(number);
        let body = render_chunk(chunk)?;
        self.location.put(self.store.as_ref(), &name, body).await?;
        tracing::info!("Created {} with {} links", self.location.key(&name), chunk.len());

        Ok(ChunkDelivery {
            sent: chunk.len() as u64,
            failed: 0,
        })
    }
}

/// Totals across every delivered chunk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub chunks: usize,
    pub sent: u64,
    pub failed: u64,
    /// `(chunk number, error)` for every chunk whose whole delivery failed
    pub failed_chunks: Vec<(usize, String)>,
}

impl FanOutReport {
    pub fn success_rate(&self) -> f64 {
        crate::output::success_rate(self.sent, self.failed)
    }
}

/// Chunked Producer: splits `links` into chunks of `chunk_size` and delivers each to `sink`
///
/// A failed delivery counts every item of that chunk as failed and never stops the
/// chunks after it.
pub async fn fan_out(
    links: &[ListingLink],
    chunk_size: usize,
    sink: &dyn ChunkSink,
) -> Result<FanOutReport, EtlError> {
    let size = NonZeroUsize::new(chunk_size)
        .ok_or_else(|| ConfigError::Validation("chunk size must be >= 1".to_string()))?;

    let mut report = FanOutReport::default();
    for (index, chunk) in split_chunks(links, size).enumerate() {
        let number = index + 1;
        report.chunks += 1;

        match sink.deliver(number, chunk).await {
            Ok(delivery) => {
                report.sent += delivery.sent;
                report.failed += delivery.failed;
            }
            Err(e) => {
                tracing::error!("Chunk {} ({} links) failed: {}", number, chunk.len(), e);
                report.failed += chunk.len() as u64;
                report.failed_chunks.push((number, e.to_string()));
            }
        }
    }

    tracing::info!(
        "Fanned {} links into {} chunks: {} sent, {} failed",
        links.len(),
        report.chunks,
        report.sent,
        report.failed
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use crate::store::MemoryObjectStore;

    fn links(n: usize) -> Vec<ListingLink> {
        (1..=n)
            .map(|i| ListingLink::new(format!("https://x/annons/{}", i)))
            .collect()
    }

    #[test]
    fn test_split_chunks_sizes() {
        let items: Vec<u32> = (0..25).collect();
        let sizes: Vec<usize> = split_chunks(&items, NonZeroUsize::new(10).unwrap())
            .map(<[u32]>::len)
            .collect();
        assert_eq!(sizes, vec![10, 10, 5]);

        let empty: Vec<u32> = Vec::new();
        assert_eq!(split_chunks(&empty, NonZeroUsize::new(10).unwrap()).count(), 0);
    }

    #[test]
    fn test_chunk_names() {
        assert_eq!(chunk_key(3), "car_links_3.csv");
        assert_eq!(chunk_number("chunks/car_links_12.csv"), Some(12));
        assert_eq!(chunk_number("car_links_x.csv"), None);
        assert_eq!(chunk_number("page_1.json"), None);
    }

    #[test]
    fn test_chunk_file_format() {
        let body = render_chunk(&links(2)).unwrap();
        assert_eq!(
            String::from_utf8(body.clone()).unwrap(),
            "link\nhttps://x/annons/1\nhttps://x/annons/2\n"
        );
        assert_eq!(parse_chunk(&body).unwrap(), links(2));
        assert!(parse_chunk(b"link\n").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_chunk_size_is_config_error() {
        let queue = Arc::new(MemoryQueue::new());
        let err = fan_out(&links(3), 0, &QueueSink::new(queue)).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_csv_sink_writes_numbered_files() {
        let store = Arc::new(MemoryObjectStore::new());
        let location = Location::new("listings", "chunks/").unwrap();
        let sink = CsvChunkSink::new(store.clone(), location.clone());

        let report = fan_out(&links(250), 100, &sink).await.unwrap();
        assert_eq!(report.chunks, 3);
        assert_eq!(report.sent, 250);

        let names = list_chunks(store.as_ref(), &location).await.unwrap();
        assert_eq!(names, vec!["car_links_1.csv", "car_links_2.csv", "car_links_3.csv"]);

        let last = location.get(store.as_ref(), "car_links_3.csv").await.unwrap();
        assert_eq!(parse_chunk(&last).unwrap().len(), 50);
    }

    #[tokio::test]
    async fn test_chunks_rejoin_to_original_links() {
        let store = Arc::new(MemoryObjectStore::new());
        let location = Location::new("listings", "chunks/").unwrap();
        let sink = CsvChunkSink::new(store.clone(), location.clone());

        let report = fan_out(&links(7), 3, &sink).await.unwrap();
        assert_eq!(report.chunks, 3);

        let mut rejoined = Vec::new();
        for name in list_chunks(store.as_ref(), &location).await.unwrap() {
            let body = location.get(store.as_ref(), &name).await.unwrap();
            rejoined.extend(parse_chunk(&body).unwrap());
        }
        assert_eq!(rejoined, links(7));
    }

    #[tokio::test]
    async fn test_queue_sink_sends_link_messages() {
        let queue = Arc::new(MemoryQueue::new());
        let report = fan_out(&links(15), 10, &QueueSink::new(queue.clone()))
            .await
            .unwrap();

        assert_eq!(report.chunks, 2);
        assert_eq!(report.sent, 15);
        assert_eq!(report.success_rate(), 100.0);
        assert_eq!(queue.bodies()[0], r#"{"link":"https://x/annons/1"}"#);
    }

    #[tokio::test]
    async fn test_whole_call_failure_counts_chunk_and_continues() {
        struct FlakySink;

        #[async_trait]
        impl ChunkSink for FlakySink {
            async fn deliver(
                &self,
                number: usize,
                chunk: &[ListingLink],
            ) -> Result<ChunkDelivery, EtlError> {
                if number == 1 {
                    Err(EtlError::Worker("queue offline".to_string()))
                } else {
                    Ok(ChunkDelivery {
                        sent: chunk.len() as u64,
                        failed: 0,
                    })
                }
            }
        }

        let report = fan_out(&links(25), 10, &FlakySink).await.unwrap();
        assert_eq!(report.chunks, 3);
        assert_eq!(report.failed, 10);
        assert_eq!(report.sent, 15);
        assert_eq!(report.failed_chunks.len(), 1);
        assert_eq!(report.failed_chunks[0].0, 1);
    }

    #[tokio::test]
    async fn test_partial_batch_failure_is_per_item() {
        let queue = Arc::new(MemoryQueue::new());
        let mut batch = links(3);
        batch.push(ListingLink::new(format!("https://x/annons/{}", "9".repeat(300 * 1024))));

        let report = fan_out(&batch, 10, &QueueSink::new(queue.clone())).await.unwrap();
        assert_eq!(report.sent, 3);
        assert_eq!(report.failed, 1);
        assert!(report.failed_chunks.is_empty());
    }
}
