//! In-memory object store for tests.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use super::{RemoteClient, RemoteError};

/// DashMap-backed remote client. Keys list in sorted order, matching the
/// lexicographic listing of real object stores.
#[derive(Default, Debug)]
pub struct InMemoryRemote {
    objects: DashMap<String, Bytes>,
    uploads: AtomicU64,
    deletes: AtomicU64,
}

impl InMemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Total successful uploads.
    #[must_use]
    pub fn upload_count(&self) -> u64 {
        self.uploads.load(Ordering::Relaxed)
    }

    /// Total deleted keys.
    #[must_use]
    pub fn delete_count(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Direct insert for test setup.
    pub fn seed(&self, key: &str, data: impl Into<Bytes>) {
        self.objects.insert(key.to_string(), data.into());
    }

    /// True when `key` exists.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }
}

#[async_trait]
impl RemoteClient for InMemoryRemote {
    async fn upload(&self, key: &str, data: Bytes) -> Result<(), RemoteError> {
        self.objects.insert(key.to_string(), data);
        self.uploads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Bytes, RemoteError> {
        self.objects
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RemoteError::NotFound {
                key: key.to_string(),
            })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, RemoteError> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, keys: &[String]) -> Result<(), RemoteError> {
        for key in keys {
            if self.objects.remove(key).is_some() {
                self.deletes.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_download_round_trip() {
        let remote = InMemoryRemote::new();
        remote
            .upload("a/b.db", Bytes::from_static(b"payload"))
            .await
            .unwrap();

        let data = remote.download("a/b.db").await.unwrap();
        assert_eq!(&data[..], b"payload");
        assert_eq!(remote.upload_count(), 1);
    }

    #[tokio::test]
    async fn test_download_missing_is_not_found() {
        let remote = InMemoryRemote::new();
        let err = remote.download("missing").await.unwrap_err();
        assert!(matches!(err, RemoteError::NotFound { key } if key == "missing"));
    }

    #[tokio::test]
    async fn test_list_filters_and_sorts() {
        let remote = InMemoryRemote::new();
        remote.seed("p/z.db", "1");
        remote.seed("p/a.db", "2");
        remote.seed("q/b.db", "3");

        let keys = remote.list("p/").await.unwrap();
        assert_eq!(keys, vec!["p/a.db".to_string(), "p/z.db".to_string()]);

        let all = remote.list("").await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_delete_ignores_absent_keys() {
        let remote = InMemoryRemote::new();
        remote.seed("x", "1");
        remote
            .delete(&["x".to_string(), "ghost".to_string()])
            .await
            .unwrap();
        assert!(remote.is_empty());
        assert_eq!(remote.delete_count(), 1);
    }
}
