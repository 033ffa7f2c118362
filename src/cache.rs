//! Key-value cache collaborator
//!
//! The production deployment backs this with an external store; the bundled
//! [`MemoryCache`] keeps the same TTL-at-read semantics in process memory.
//! There is no background sweep: expiry is checked when a key is read.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Generic get/set/delete with TTL
#[async_trait]
pub trait KvCache: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<Option<String>>;

    async fn set_raw(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Read a JSON-encoded value
pub async fn get_json<T: DeserializeOwned>(cache: &dyn KvCache, key: &str) -> Result<Option<T>> {
    match cache.get_raw(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Write a JSON-encoded value
pub async fn set_json<T: Serialize>(
    cache: &dyn KvCache,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<()> {
    cache.set_raw(key, serde_json::to_string(value)?, ttl).await
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-process [`KvCache`] implementation
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvCache for MemoryCache {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.entries.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set_raw(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = MemoryCache::new();
        cache
            .set_raw("k", "v".to_string(), None)
            .await
            .unwrap();
        assert_eq!(cache.get_raw("k").await.unwrap().as_deref(), Some("v"));

        cache.delete("k").await.unwrap();
        assert!(cache.get_raw("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ttl_enforced_at_read() {
        let cache = MemoryCache::new();
        cache
            .set_raw("k", "v".to_string(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert!(cache.get_raw("k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(cache.get_raw("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let cache = MemoryCache::new();
        set_json(&cache, "n", &vec![1u32, 2, 3], None).await.unwrap();
        let back: Option<Vec<u32>> = get_json(&cache, "n").await.unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_overwrite_wins() {
        let cache = MemoryCache::new();
        cache.set_raw("k", "a".to_string(), None).await.unwrap();
        cache.set_raw("k", "b".to_string(), None).await.unwrap();
        assert_eq!(cache.get_raw("k").await.unwrap().as_deref(), Some("b"));
    }
}
