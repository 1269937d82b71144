//! In-memory KV backend with TTL semantics

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::kv::KvStore;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// In-memory `KvStore` honoring per-key TTLs.
///
/// Expiry is lazy: reads treat stale entries as absent and remove them.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, Entry>,
}

impl MemoryKvStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn is_live(entry: &Entry) -> bool {
        Instant::now() < entry.expires_at
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.entries.get(key) {
            if Self::is_live(&entry) {
                return Ok(Some(entry.value.clone()));
            }
        }
        // Drop the stale entry if one was there
        self.entries.remove_if(key, |_, e| !Self::is_live(e));
        Ok(None)
    }

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix) && Self::is_live(e.value()))
            .map(|e| e.key().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let kv = MemoryKvStore::new();
        kv.set_with_ttl("a", b"1".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(kv.get("a").await.unwrap(), Some(b"1".to_vec()));
        kv.delete("a").await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_reads_as_absent() {
        let kv = MemoryKvStore::new();
        kv.set_with_ttl("a", b"1".to_vec(), Duration::from_millis(10))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(kv.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_prefix_scan_and_delete() {
        let kv = MemoryKvStore::new();
        let ttl = Duration::from_secs(60);
        kv.set_with_ttl("cache:b1:x", b"1".to_vec(), ttl).await.unwrap();
        kv.set_with_ttl("cache:b1:y", b"2".to_vec(), ttl).await.unwrap();
        kv.set_with_ttl("cache:b2:z", b"3".to_vec(), ttl).await.unwrap();

        let mut keys = kv.scan_prefix("cache:b1:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["cache:b1:x", "cache:b1:y"]);

        let removed = kv.delete_prefix("cache:b1:").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(kv.get("cache:b2:z").await.unwrap(), Some(b"3".to_vec()));
    }
}
