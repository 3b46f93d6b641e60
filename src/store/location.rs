use super::{ObjectStore, StoreResult};
use crate::ConfigError;
use std::fmt;

const SCHEME: &str = "store://";

/// A bucket plus a key prefix: where one stage reads or writes its objects
///
/// The prefix is either empty or ends with `/`, so `key(name)` is always `prefix + name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    bucket: String,
    prefix: String,
}

impl Location {
    /// Builds a validated location
    ///
    /// # Arguments
    ///
    /// * `bucket` - Name made of lowercase letters, digits, `.` and `-`, other than `.` or `..`
    /// * `prefix` - Key prefix without a leading `/`; a trailing `/` is added if missing
    ///
    /// # Returns
    ///
    /// * `Ok(Location)` - The normalized location
    /// * `Err(ConfigError::InvalidLocation)` - The bucket or prefix is malformed
    pub fn new(bucket: &str, prefix: &str) -> Result<Self, ConfigError> {
        if bucket.is_empty()
            || bucket == "."
            || bucket == ".."
            || !bucket
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-')
        {
            return Err(ConfigError::InvalidLocation(format!(
                "bucket '{}' must be a name using only [a-z0-9.-]",
                bucket
            )));
        }

        if prefix.starts_with('/') || prefix.contains("//") || prefix.contains('\\') {
            return Err(ConfigError::InvalidLocation(format!(
                "prefix '{}' must be a relative key prefix",
                prefix
            )));
        }

        if prefix.split('/').any(|part| part == "..") {
            return Err(ConfigError::InvalidLocation(format!(
                "prefix '{}' must not contain '..'",
                prefix
            )));
        }

        let prefix = if prefix.is_empty() || prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{}/", prefix)
        };

        Ok(Self {
            bucket: bucket.to_string(),
            prefix,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Full key of `name` inside this location
    pub fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// The part of `key` after this location's prefix, if it lies inside it
    pub fn name_of<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.prefix.as_str())
    }

    pub async fn put(&self, store: &dyn ObjectStore, name: &str, body: Vec<u8>) -> StoreResult<()> {
        store.put(&self.bucket, &self.key(name), body).await
    }

    pub async fn get(&self, store: &dyn ObjectStore, name: &str) -> StoreResult<Vec<u8>> {
        store.get(&self.bucket, &self.key(name)).await
    }

    pub async fn exists(&self, store: &dyn ObjectStore, name: &str) -> StoreResult<bool> {
        store.exists(&self.bucket, &self.key(name)).await
    }

    /// Names (keys relative to the prefix) of every object in this location, sorted
    pub async fn list_names(&self, store: &dyn ObjectStore) -> StoreResult<Vec<String>> {
        let keys = store.list(&self.bucket, &self.prefix).await?;
        Ok(keys
            .iter()
            .filter_map(|key| self.name_of(key))
            .map(str::to_string)
            .collect())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", SCHEME, self.bucket, self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryObjectStore;

    #[test]
    fn test_new_normalizes_prefix() {
        let loc = Location::new("listings", "pages").unwrap();
        assert_eq!(loc.prefix(), "pages/");
        assert_eq!(loc.key("page_1.json"), "pages/page_1.json");

        let loc = Location::new("listings", "").unwrap();
        assert_eq!(loc.key("1.json"), "1.json");
    }

    #[test]
    fn test_new_rejects_bad_input() {
        assert!(Location::new("", "pages/").is_err());
        assert!(Location::new("Listings", "pages/").is_err());
        assert!(Location::new("my bucket", "pages/").is_err());
        assert!(Location::new("listings", "/pages/").is_err());
        assert!(Location::new("listings", "a//b/").is_err());
        assert!(Location::new("listings", "../pages/").is_err());
    }

    #[test]
    fn test_new_rejects_dot_buckets() {
        for bucket in [".", ".."] {
            let err = Location::new(bucket, "pages/").unwrap_err();
            assert!(matches!(err, ConfigError::InvalidLocation(_)));
        }
        assert!(Location::new("my.bucket", "pages/").is_ok());
    }

    #[test]
    fn test_display_names_bucket_and_prefix() {
        let loc = Location::new("listings", "run-1/details").unwrap();
        assert_eq!(loc.to_string(), "store://listings/run-1/details/");
    }

    #[test]
    fn test_name_of() {
        let loc = Location::new("listings", "pages/").unwrap();
        assert_eq!(loc.name_of("pages/page_3.json"), Some("page_3.json"));
        assert_eq!(loc.name_of("details/3.json"), None);
    }

    #[tokio::test]
    async fn test_list_names_strips_prefix() {
        let store = MemoryObjectStore::new();
        let pages = Location::new("listings", "pages/").unwrap();
        let details = Location::new("listings", "details/").unwrap();

        pages.put(&store, "page_2.json", b"{}".to_vec()).await.unwrap();
        pages.put(&store, "page_1.json", b"{}".to_vec()).await.unwrap();
        details.put(&store, "9.json", b"{}".to_vec()).await.unwrap();

        let names = pages.list_names(&store).await.unwrap();
        assert_eq!(names, vec!["page_1.json", "page_2.json"]);
    }
}
