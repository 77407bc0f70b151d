//! Cache backends.
//!
//! The coordinator talks to a [`CacheBackend`]; two implementations ship:
//!
//! - [`MemoryCache`]: memory only, bounded by the capacity evictor
//! - [`PersistentCache`]: memory tier in front of a [`BlobStore`], with lazy
//!   promotion from disk on a memory miss
//!
//! # Disk Layout ([`FsBlobStore`])
//!
//! ```text
//! {cache_dir}/{name[..2]}/{name}/
//!   data.bin       # Resource bytes
//!   meta.bin       # Opaque metadata, stored verbatim
//!   record.json    # Key, size and digest (written last)
//! ```

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::CacheCapacity;
use crate::error::LoadResult;
use crate::key::ResourceKey;
use crate::meta::ResourceMeta;

mod blob;
mod evict;
mod locks;
mod memory;
mod persistent;

pub use blob::{BlobStore, FsBlobStore};
pub use memory::MemoryCache;
pub use persistent::PersistentCache;

/// A cached resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Raw bytes as fetched.
    pub data: Bytes,

    /// Metadata, returned exactly as stored.
    pub meta: ResourceMeta,

    /// Size charged against the memory tier capacity.
    pub size: u64,
}

impl CacheEntry {
    /// Create an entry whose size is the byte length of `data`.
    pub fn new(data: Bytes, meta: ResourceMeta) -> Self {
        let size = data.len() as u64;
        Self { data, meta, size }
    }
}

/// Memory tier occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size: u64,
    pub capacity: CacheCapacity,
}

/// Storage capability for fetched resources.
///
/// Operations on the same key are linearizable: a `get` never observes a
/// half-applied `put` or `remove`.
#[async_trait]
pub trait CacheBackend: Send + Sync + std::fmt::Debug {
    /// Store or overwrite the entry for `key`.
    async fn put(&self, key: &ResourceKey, entry: CacheEntry) -> LoadResult<()>;

    /// Fetch the entry for `key`, if any tier has it.
    async fn get(&self, key: &ResourceKey) -> LoadResult<Option<CacheEntry>>;

    /// Remove `key` from every tier.
    async fn remove(&self, key: &ResourceKey) -> LoadResult<()>;

    /// Remove every entry from every tier.
    async fn clear(&self) -> LoadResult<()>;

    /// Whether any tier holds `key`, without promoting it.
    async fn contains(&self, key: &ResourceKey) -> bool;

    /// Memory tier occupancy.
    fn stats(&self) -> CacheStats;
}
