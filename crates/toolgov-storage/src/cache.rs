//! In-memory TTL cache.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use toolgov_core::{CacheLayer, Result};

/// A cached value with its expiry instant.
struct CacheEntry {
    data: Vec<u8>,
    expires_at: Instant,
}

/// In-memory cache backed by [`DashMap`] with per-entry TTL.
///
/// Expired entries are lazily evicted on access. Suitable for single-process
/// deployments and tests; a distributed cache implements the same trait.
pub struct InMemoryCacheLayer {
    map: DashMap<String, CacheEntry>,
}

impl InMemoryCacheLayer {
    /// Create a new, empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }
}

impl Default for InMemoryCacheLayer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheLayer for InMemoryCacheLayer {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.map.get(key) {
            if Instant::now() < entry.expires_at {
                return Ok(Some(entry.data.clone()));
            }
            drop(entry);
            self.map.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.map.insert(
            key.to_string(),
            CacheEntry {
                data: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<()> {
        self.map.remove(key);
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let cache = InMemoryCacheLayer::new();
        cache
            .set("k", b"value", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"value".to_vec()));
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let cache = InMemoryCacheLayer::new();
        assert_eq!(cache.get("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = InMemoryCacheLayer::new();
        cache
            .set("k", b"value", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalidate_removes_entry() {
        let cache = InMemoryCacheLayer::new();
        cache
            .set("k", b"value", Duration::from_secs(60))
            .await
            .unwrap();
        cache.invalidate("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_value() {
        let cache = InMemoryCacheLayer::new();
        cache.set("k", b"one", Duration::from_secs(60)).await.unwrap();
        cache.set("k", b"two", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"two".to_vec()));
    }
}
