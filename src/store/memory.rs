use super::{check_key, ObjectStore, StoreError, StoreResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// In-process object store keyed by `(bucket, key)`
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects across all buckets
    pub fn len(&self) -> usize {
        self.objects.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, BTreeMap<(String, String), Vec<u8>>>> {
        self.objects
            .lock()
            .map_err(|_| StoreError::Io(std::io::Error::other("object map lock poisoned")))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> StoreResult<()> {
        check_key(key)?;
        self.lock()?
            .insert((bucket.to_string(), key.to_string()), body);
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>> {
        self.lock()?
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .lock()?
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }

    async fn exists(&self, bucket: &str, key: &str) -> StoreResult<bool> {
        Ok(self
            .lock()?
            .contains_key(&(bucket.to_string(), key.to_string())))
    }
}
