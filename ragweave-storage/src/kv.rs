//! Key-value store capability for the distributed cache tier

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Distributed KV capability behind the context-aware cache.
///
/// When no backend is configured the cache runs local-only; the trait is
/// the seam a Redis-style backend plugs into.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a value. Expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value with a TTL.
    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Delete a key. Missing keys are not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List live keys with the given prefix.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Delete every live key with the given prefix, returning the count.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let keys = self.scan_prefix(prefix).await?;
        let count = keys.len();
        for key in keys {
            self.delete(&key).await?;
        }
        Ok(count)
    }
}
