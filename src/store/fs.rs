use super::{check_key, ObjectStore, StoreError, StoreResult};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;

/// Object store backed by a directory tree: `root/<bucket>/<key>`
///
/// Objects are written to a temporary sibling file and renamed into place, so concurrent
/// writers of one key leave exactly one complete body behind.
#[derive(Debug)]
pub struct FsObjectStore {
    root: PathBuf,
    counter: AtomicU64,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> StoreResult<PathBuf> {
        if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket == "." || bucket == ".." {
            return Err(StoreError::InvalidKey(format!("bucket '{}'", bucket)));
        }
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> StoreResult<PathBuf> {
        check_key(key)?;
        Ok(self.bucket_dir(bucket)?.join(key))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> StoreResult<()> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_file_name(format!(".{}.{}.{}.tmp", file_name, std::process::id(), n));

        fs::write(&tmp, &body).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        match fs::read(&path).await {
            Ok(body) => Ok(body),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<String>> {
        let bucket_dir = self.bucket_dir(bucket)?;
        let mut keys = Vec::new();
        let mut pending = vec![(bucket_dir, String::new())];

        while let Some((dir, rel)) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                // Temporary files from in-progress writes
                if name.starts_with('.') {
                    continue;
                }
                let key = format!("{}{}", rel, name);
                if entry.file_type().await?.is_dir() {
                    let dir_key = format!("{}/", key);
                    if dir_key.starts_with(prefix) || prefix.starts_with(&dir_key) {
                        pending.push((entry.path(), dir_key));
                    }
                } else if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, bucket: &str, key: &str) -> StoreResult<bool> {
        let path = self.object_path(bucket, key)?;
        Ok(fs::try_exists(&path).await? && path.is_file())
    }
}
