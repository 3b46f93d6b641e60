use crate::config::{BUCKET_ENV, QUEUE_URL_ENV};
use crate::store::Location;
use crate::ConfigError;
use serde::Deserialize;

/// Main configuration structure for the pipeline
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub http: HttpConfig,
    pub pages: PagesConfig,
    pub details: DetailsConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub chunks: ChunksConfig,
    pub output: OutputConfig,
}

/// Settings injected into every fetch call
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Scheme and host of the listing API, e.g. `https://api.example.se`
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Bearer token sent as the `authorization` header
    #[serde(rename = "auth-token", default)]
    pub auth_token: Option<String>,

    /// Default request timeout in seconds
    #[serde(rename = "timeout-secs", default = "default_http_timeout")]
    pub timeout_secs: u64,

    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    #[serde(rename = "accept-language", default = "default_accept_language")]
    pub accept_language: String,
}

/// Search-result page listing
#[derive(Debug, Clone, Deserialize)]
pub struct PagesConfig {
    /// Path (or absolute URL) with a `{page}` placeholder
    #[serde(rename = "path-template")]
    pub path_template: String,

    /// First page index (inclusive)
    #[serde(default = "default_first_page")]
    pub first: u32,

    /// Last page index (inclusive)
    pub last: u32,
}

/// Per-listing detail fetching
#[derive(Debug, Clone, Deserialize)]
pub struct DetailsConfig {
    /// Path (or absolute URL) with an `{id}` placeholder
    #[serde(rename = "path-template")]
    pub path_template: String,

    /// Short per-request timeout, since details are fetched at high fan-out
    #[serde(rename = "timeout-secs", default = "default_detail_timeout")]
    pub timeout_secs: u64,
}

/// Batch runner sizing
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    /// Hard cap on concurrent workers; the pool never exceeds host parallelism either
    #[serde(rename = "max-concurrency", default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Number of units buffered ahead of the workers
    #[serde(rename = "queue-depth", default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Log a progress line every N completed units
    #[serde(rename = "progress-every", default = "default_progress_every")]
    pub progress_every: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            queue_depth: default_queue_depth(),
            progress_every: default_progress_every(),
        }
    }
}

impl RunnerConfig {
    /// Pool size: `min(max_concurrency, available_parallelism)`, computed once
    pub fn worker_count(&self) -> usize {
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.max_concurrency.min(available).max(1)
    }
}

/// Object store layout
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory that holds one sub-directory per bucket
    pub root: String,

    /// Bucket name; may also come from `S3_BUCKET_NAME`
    #[serde(default)]
    pub bucket: Option<String>,

    /// Key prefix shared by every stage; may also come from `S3_PREFIX`
    #[serde(default)]
    pub prefix: String,

    #[serde(rename = "pages-prefix", default = "default_pages_prefix")]
    pub pages_prefix: String,

    #[serde(rename = "chunks-prefix", default = "default_chunks_prefix")]
    pub chunks_prefix: String,

    #[serde(rename = "details-prefix", default = "default_details_prefix")]
    pub details_prefix: String,
}

/// Queue destination
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Local queue database path (or `sqlite://` URL); may also come from `SQS_QUEUE_URL`
    #[serde(default)]
    pub url: Option<String>,

    /// Entries per batched send
    #[serde(rename = "batch-size", default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: None,
            batch_size: default_batch_size(),
        }
    }
}

/// Link chunk files
#[derive(Debug, Clone, Deserialize)]
pub struct ChunksConfig {
    #[serde(default = "default_chunk_size")]
    pub size: usize,
}

impl Default for ChunksConfig {
    fn default() -> Self {
        Self {
            size: default_chunk_size(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path of the flattened CSV table
    #[serde(rename = "csv-path")]
    pub csv_path: String,

    /// Path to the SQLite ledger (runs, processed chunks, loaded rows)
    #[serde(rename = "database-path")]
    pub database_path: String,
}

impl Config {
    /// Builds the search-result URL for one page index
    pub fn page_url(&self, page: u32) -> String {
        let path = self.pages.path_template.replace("{page}", &page.to_string());
        join_url(&self.http.base_url, &path)
    }

    /// Builds the detail URL for one listing identifier
    pub fn detail_url(&self, id: &str) -> String {
        let path = self.details.path_template.replace("{id}", id);
        join_url(&self.http.base_url, &path)
    }

    /// Returns the bucket or a configuration error naming the missing variable
    pub fn require_bucket(&self) -> Result<&str, ConfigError> {
        self.storage
            .bucket
            .as_deref()
            .filter(|b| !b.is_empty())
            .ok_or(ConfigError::Missing(BUCKET_ENV))
    }

    /// Returns the queue URL or a configuration error naming the missing variable
    pub fn require_queue_url(&self) -> Result<&str, ConfigError> {
        self.queue
            .url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or(ConfigError::Missing(QUEUE_URL_ENV))
    }

    /// Where the Page Lister writes `page_{n}.json`
    pub fn pages_location(&self) -> Result<Location, ConfigError> {
        self.stage_location(&self.storage.pages_prefix)
    }

    /// Where the Chunked Producer writes `car_links_{n}.csv`
    pub fn chunks_location(&self) -> Result<Location, ConfigError> {
        self.stage_location(&self.storage.chunks_prefix)
    }

    /// Where the Detail Fetcher writes `{listing_id}.json`
    pub fn details_location(&self) -> Result<Location, ConfigError> {
        self.stage_location(&self.storage.details_prefix)
    }

    fn stage_location(&self, stage_prefix: &str) -> Result<Location, ConfigError> {
        let bucket = self.require_bucket()?;
        Location::new(bucket, &self.storage.stage_prefix(stage_prefix))
    }
}

impl StorageConfig {
    /// Shared prefix joined with one stage prefix; a shared prefix lacking a trailing `/`
    /// still gets one, so `run-1` and `run-1/` name the same folder
    pub fn stage_prefix(&self, stage_prefix: &str) -> String {
        let shared = self.prefix.trim_end_matches('/');
        if shared.is_empty() {
            stage_prefix.to_string()
        } else {
            format!("{}/{}", shared, stage_prefix)
        }
    }
}

fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

fn default_http_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
}

fn default_accept_language() -> String {
    "en-US,en;q=0.9".to_string()
}

fn default_first_page() -> u32 {
    1
}

fn default_detail_timeout() -> u64 {
    5
}

fn default_max_concurrency() -> usize {
    32
}

fn default_queue_depth() -> usize {
    64
}

fn default_progress_every() -> u64 {
    50
}

fn default_pages_prefix() -> String {
    "pages/".to_string()
}

fn default_chunks_prefix() -> String {
    "chunks/".to_string()
}

fn default_details_prefix() -> String {
    "details/".to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_chunk_size() -> usize {
    100
}
