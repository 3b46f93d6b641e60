//! Pipeline stages
//!
//! Each stage reads from and writes to the object store through a typed `Location`:
//! - `pages` - Page Lister: search-result pages to `page_{n}.json`
//! - `links` - Link Extractor: pages in numeric order to an ordered link list
//! - `chunks` - Chunked Producer: link list to `car_links_{n}.csv` files or queue batches
//! - `details` - Detail Fetcher: one listing id to `{id}.json`, stored verbatim
//! - `flatten` - Row Flattener: one stored detail to one `FlatRecord`
//! - `table` - The flattened CSV table
//! - `resume` - The resumable pick-a-chunk loop over the ProcessedSet

pub mod chunks;
pub mod details;
pub mod flatten;
pub mod links;
pub mod pages;
pub mod resume;
pub mod table;

pub use chunks::{fan_out, split_chunks, ChunkDelivery, ChunkSink, CsvChunkSink, FanOutReport, QueueSink};
pub use details::{fetch_chunk_details, fetch_detail, fetch_details};
pub use flatten::{flatten, flatten_details, FlatRecord};
pub use links::{extract_links, LinkExtraction, ListingLink};
pub use pages::{fetch_page, list_pages};
pub use resume::{run_resumable, PickOrder, ResumeSummary};
pub use table::{read_table, write_table};

use crate::config::Config;
use crate::fetch::build_http_client;
use crate::queue::{MessageQueue, SqliteQueue};
use crate::store::{FsObjectStore, ObjectStore};
use crate::{ConfigError, EtlError};
use reqwest::Client;
use std::sync::Arc;

/// Shared handles every stage works with
///
/// Cloning is cheap; workers each hold a clone.
#[derive(Clone)]
pub struct Pipeline {
    pub config: Arc<Config>,
    pub client: Client,
    pub store: Arc<dyn ObjectStore>,
    queue: Option<Arc<dyn MessageQueue>>,
}

impl Pipeline {
    /// Builds a pipeline over an explicit object store, with no queue attached
    pub fn new(config: Config, store: Arc<dyn ObjectStore>) -> Result<Self, EtlError> {
        let client = build_http_client(&config.http)?;
        Ok(Self {
            config: Arc::new(config),
            client,
            store,
            queue: None,
        })
    }

    /// Builds a pipeline over the configured filesystem store and, if set, the local queue
    pub fn from_config(config: Config) -> Result<Self, EtlError> {
        let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(&config.storage.root));
        let queue_url = config.require_queue_url().ok().map(str::to_string);
        let mut pipeline = Self::new(config, store)?;

        if let Some(url) = queue_url {
            let queue = SqliteQueue::open(&url)?;
            let released = queue.release_in_flight()?;
            if released > 0 {
                tracing::info!("Returned {} undeleted messages to {}", released, url);
            }
            pipeline.queue = Some(Arc::new(queue));
        }
        Ok(pipeline)
    }

    pub fn with_queue(mut self, queue: Arc<dyn MessageQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// The attached queue, or a configuration error naming the missing setting
    pub fn queue(&self) -> Result<Arc<dyn MessageQueue>, ConfigError> {
        self.queue
            .clone()
            .ok_or(ConfigError::Missing(crate::config::QUEUE_URL_ENV))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_from_config_opens_queue_only_when_url_set() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config("https://api.example.com");
        config.storage.root = dir.path().join("data").display().to_string();

        config.queue.url = Some(String::new());
        let pipeline = Pipeline::from_config(config.clone()).unwrap();
        assert!(matches!(
            pipeline.queue(),
            Err(ConfigError::Missing(crate::config::QUEUE_URL_ENV))
        ));

        config.queue.url = Some(dir.path().join("queue.db").display().to_string());
        let pipeline = Pipeline::from_config(config).unwrap();
        assert_eq!(pipeline.queue().unwrap().depth().await.unwrap(), 0);
    }
}
