//! Memory tier layered over a durable blob store.
//!
//! The blob store is the source of truth across restarts. The memory tier is
//! filled on `put` and lazily on a memory miss that hits disk. Eviction only
//! drops memory residency.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{CacheCapacity, EvictionPolicy, LoaderConfig};
use crate::error::LoadResult;
use crate::key::ResourceKey;
use crate::meta::ResourceMeta;

use super::blob::{BlobStore, FsBlobStore};
use super::evict::MemoryTier;
use super::locks::KeyLocks;
use super::{CacheBackend, CacheEntry, CacheStats};

/// Two-tier cache backend.
#[derive(Debug)]
pub struct PersistentCache {
    memory: Mutex<MemoryTier>,
    disk: Arc<dyn BlobStore>,
    persist_to_disk: bool,
    locks: KeyLocks,
}

impl PersistentCache {
    pub fn new(disk: Arc<dyn BlobStore>, capacity: CacheCapacity) -> Self {
        Self {
            memory: Mutex::new(MemoryTier::new(capacity, EvictionPolicy::default())),
            disk,
            persist_to_disk: true,
            locks: KeyLocks::new(),
        }
    }

    /// Build from loader configuration, using the configured or default directory.
    pub fn from_config(config: &LoaderConfig) -> LoadResult<Self> {
        let store = match &config.cache_dir {
            Some(dir) => FsBlobStore::with_dir(dir),
            None => FsBlobStore::new()?,
        };
        Ok(Self::new(Arc::new(store), config.max_in_memory_cache_capacity)
            .with_eviction_policy(config.eviction_policy)
            .with_persist_to_disk(config.should_persist_to_disk))
    }

    /// With persistence off, the disk tier is neither written nor read, but
    /// `remove` and `clear` still reclaim whatever it holds.
    pub fn with_persist_to_disk(mut self, persist: bool) -> Self {
        self.persist_to_disk = persist;
        self
    }

    pub fn with_eviction_policy(self, policy: EvictionPolicy) -> Self {
        let capacity = self.memory().stats().capacity;
        Self {
            memory: Mutex::new(MemoryTier::new(capacity, policy)),
            ..self
        }
    }

    pub fn persists_to_disk(&self) -> bool {
        self.persist_to_disk
    }

    fn memory(&self) -> MutexGuard<'_, MemoryTier> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn read_disk(&self, key: &ResourceKey) -> LoadResult<Option<CacheEntry>> {
        let Some((data, meta_bytes)) = self.disk.read(key).await? else {
            return Ok(None);
        };

        match serde_json::from_slice::<ResourceMeta>(&meta_bytes) {
            Ok(meta) => Ok(Some(CacheEntry::new(data, meta))),
            Err(e) => {
                warn!(key = %key, error = %e, "unreadable metadata on disk, dropping entry");
                self.disk.delete(key).await?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl CacheBackend for PersistentCache {
    async fn put(&self, key: &ResourceKey, entry: CacheEntry) -> LoadResult<()> {
        let _guard = self.locks.lock(key).await;

        if self.persist_to_disk {
            match serde_json::to_vec(&entry.meta) {
                Ok(meta_bytes) => {
                    if let Err(e) = self.disk.write(key, &entry.data, &meta_bytes).await {
                        warn!(key = %key, error = %e, "disk write failed, keeping memory copy only");
                    }
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "failed to encode metadata, keeping memory copy only")
                }
            }
        }

        let size = entry.size;
        self.memory().insert(key.clone(), entry);
        debug!(key = %key, size, persisted = self.persist_to_disk, "cached resource");
        Ok(())
    }

    async fn get(&self, key: &ResourceKey) -> LoadResult<Option<CacheEntry>> {
        let _guard = self.locks.lock(key).await;

        if let Some(entry) = self.memory().get(key) {
            return Ok(Some(entry));
        }
        if !self.persist_to_disk {
            return Ok(None);
        }

        let Some(entry) = self.read_disk(key).await? else {
            return Ok(None);
        };

        debug!(key = %key, size = entry.size, "promoted disk entry to memory");
        self.memory().insert(key.clone(), entry.clone());
        Ok(Some(entry))
    }

    async fn remove(&self, key: &ResourceKey) -> LoadResult<()> {
        let _guard = self.locks.lock(key).await;
        self.memory().remove(key);
        self.disk.delete(key).await
    }

    async fn clear(&self) -> LoadResult<()> {
        let _guards = self.locks.lock_all().await;
        self.memory().clear();
        self.disk.delete_all().await
    }

    async fn contains(&self, key: &ResourceKey) -> bool {
        let _guard = self.locks.lock(key).await;
        if self.memory().contains(key) {
            return true;
        }
        self.persist_to_disk && self.disk.exists(key).await
    }

    fn stats(&self) -> CacheStats {
        self.memory().stats()
    }
}
