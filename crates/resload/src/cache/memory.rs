//! Memory-only cache backend.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::config::{CacheCapacity, EvictionPolicy};
use crate::error::LoadResult;
use crate::key::ResourceKey;

use super::evict::MemoryTier;
use super::{CacheBackend, CacheEntry, CacheStats};

/// Cache backend that keeps everything in process memory.
#[derive(Debug)]
pub struct MemoryCache {
    tier: Mutex<MemoryTier>,
}

impl MemoryCache {
    pub fn new(capacity: CacheCapacity) -> Self {
        Self::with_policy(capacity, EvictionPolicy::default())
    }

    pub fn with_policy(capacity: CacheCapacity, policy: EvictionPolicy) -> Self {
        Self {
            tier: Mutex::new(MemoryTier::new(capacity, policy)),
        }
    }

    fn tier(&self) -> MutexGuard<'_, MemoryTier> {
        self.tier.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(CacheCapacity::Unlimited)
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn put(&self, key: &ResourceKey, entry: CacheEntry) -> LoadResult<()> {
        let size = entry.size;
        self.tier().insert(key.clone(), entry);
        debug!(key = %key, size, "cached in memory");
        Ok(())
    }

    async fn get(&self, key: &ResourceKey) -> LoadResult<Option<CacheEntry>> {
        Ok(self.tier().get(key))
    }

    async fn remove(&self, key: &ResourceKey) -> LoadResult<()> {
        self.tier().remove(key);
        Ok(())
    }

    async fn clear(&self) -> LoadResult<()> {
        self.tier().clear();
        Ok(())
    }

    async fn contains(&self, key: &ResourceKey) -> bool {
        self.tier().contains(key)
    }

    fn stats(&self) -> CacheStats {
        self.tier().stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::ResourceMeta;
    use bytes::Bytes;

    fn key(s: &str) -> ResourceKey {
        ResourceKey::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let cache = MemoryCache::default();
        let meta = ResourceMeta::new(Some("\"t1\"".into()), None);
        let entry = CacheEntry::new(Bytes::from_static(b"hello"), meta.clone());

        cache.put(&key("img1"), entry).await.unwrap();
        let got = cache.get(&key("img1")).await.unwrap().unwrap();
        assert_eq!(got.data, Bytes::from_static(b"hello"));
        assert_eq!(got.meta, meta);
        assert_eq!(got.size, 5);

        cache.remove(&key("img1")).await.unwrap();
        assert!(cache.get(&key("img1")).await.unwrap().is_none());
        assert!(!cache.contains(&key("img1")).await);
    }

    #[tokio::test]
    async fn test_capacity_bound_holds() {
        let cache = MemoryCache::new(CacheCapacity::Bytes(100));
        for i in 0..50 {
            let entry = CacheEntry::new(
                Bytes::from(vec![1u8; 7 + (i % 13)]),
                ResourceMeta::new(None, None),
            );
            cache.put(&key(&format!("r{}", i)), entry).await.unwrap();
            assert!(cache.stats().total_size <= 100);
        }
        assert!(cache.stats().entries > 0);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = MemoryCache::default();
        let entry = CacheEntry::new(Bytes::from_static(b"x"), ResourceMeta::new(None, None));
        cache.put(&key("a"), entry.clone()).await.unwrap();
        cache.put(&key("b"), entry).await.unwrap();

        cache.clear().await.unwrap();
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().total_size, 0);
    }
}
