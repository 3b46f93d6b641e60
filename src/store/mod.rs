//! Object Store Gateway
//!
//! Every stage hands off its output through a bucket/key store:
//! - `ObjectStore` is the async interface the stages program against
//! - `FsObjectStore` keeps one directory per bucket under a root
//! - `MemoryObjectStore` keeps everything in a map, for tests and dry runs
//! - `Location` is the typed `(bucket, prefix)` handle a stage reads from or writes to

mod fs;
mod location;
mod memory;

pub use fs::FsObjectStore;
pub use location::Location;
pub use memory::MemoryObjectStore;

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during object store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for object store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Bucket/key object storage
///
/// Writes of the same key are last-writer-wins and readers never observe a partially
/// written object.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Writes `body` under `bucket/key`, replacing any previous object
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> StoreResult<()>;

    /// Reads the object stored under `bucket/key`
    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>>;

    /// Lists every key in `bucket` starting with `prefix`, in lexicographic order
    async fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<String>>;

    async fn exists(&self, bucket: &str, key: &str) -> StoreResult<bool>;
}

/// Rejects keys that could escape the bucket or name a directory
pub(crate) fn check_key(key: &str) -> StoreResult<()> {
    if key.is_empty()
        || key.starts_with('/')
        || key.ends_with('/')
        || key.contains('\\')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..")
    {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_key() {
        assert!(check_key("pages/page_1.json").is_ok());
        assert!(check_key("1234.json").is_ok());

        assert!(check_key("").is_err());
        assert!(check_key("/abs.json").is_err());
        assert!(check_key("pages/").is_err());
        assert!(check_key("pages//x.json").is_err());
        assert!(check_key("../escape.json").is_err());
    }
}
