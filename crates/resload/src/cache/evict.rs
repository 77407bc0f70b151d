//! Capacity-bounded memory tier.
//!
//! Tracks the aggregate size of resident entries and expunges entries in
//! policy order when an insert would exceed the configured capacity. Only
//! memory residency is affected; disk copies are untouched.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::config::{CacheCapacity, EvictionPolicy};
use crate::key::ResourceKey;

use super::{CacheEntry, CacheStats};

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    tick: u64,
}

/// In-memory entries plus the bookkeeping needed to evict them.
///
/// Invariant: `total_size` equals the sum of resident entry sizes and never
/// exceeds the capacity when the capacity is finite.
#[derive(Debug)]
pub(crate) struct MemoryTier {
    entries: HashMap<ResourceKey, Slot>,
    order: BTreeMap<u64, ResourceKey>,
    next_tick: u64,
    total_size: u64,
    capacity: CacheCapacity,
    policy: EvictionPolicy,
}

impl MemoryTier {
    pub(crate) fn new(capacity: CacheCapacity, policy: EvictionPolicy) -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_tick: 0,
            total_size: 0,
            capacity,
            policy,
        }
    }

    /// Insert or replace an entry, evicting as needed.
    ///
    /// Returns the keys that lost memory residency. An entry larger than the
    /// whole capacity is not admitted; the previous entry for its key is
    /// still dropped so a stale copy is never served from memory.
    pub(crate) fn insert(&mut self, key: ResourceKey, entry: CacheEntry) -> Vec<ResourceKey> {
        self.remove(&key);

        let mut evicted = Vec::new();
        if let Some(limit) = self.capacity.limit() {
            if entry.size > limit {
                debug!(key = %key, size = entry.size, limit, "entry exceeds memory capacity, not admitted");
                return evicted;
            }
            while self.total_size + entry.size > limit {
                match self.evict_one() {
                    Some(victim) => evicted.push(victim),
                    None => break,
                }
            }
        }

        let tick = self.bump();
        self.total_size += entry.size;
        self.order.insert(tick, key.clone());
        self.entries.insert(key, Slot { entry, tick });

        if !evicted.is_empty() {
            debug!(
                evicted = evicted.len(),
                total_size = self.total_size,
                "memory tier evicted entries"
            );
        }
        evicted
    }

    pub(crate) fn get(&mut self, key: &ResourceKey) -> Option<CacheEntry> {
        let refresh = self.policy == EvictionPolicy::Lru && self.entries.contains_key(key);
        if refresh {
            let tick = self.bump();
            if let Some(slot) = self.entries.get_mut(key) {
                self.order.remove(&slot.tick);
                slot.tick = tick;
                self.order.insert(tick, key.clone());
            }
        }
        self.entries.get(key).map(|slot| slot.entry.clone())
    }

    pub(crate) fn contains(&self, key: &ResourceKey) -> bool {
        self.entries.contains_key(key)
    }

    pub(crate) fn remove(&mut self, key: &ResourceKey) -> Option<CacheEntry> {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot.tick);
        self.total_size -= slot.entry.size;
        Some(slot.entry)
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.total_size = 0;
    }

    pub(crate) fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            total_size: self.total_size,
            capacity: self.capacity,
        }
    }

    fn evict_one(&mut self) -> Option<ResourceKey> {
        let (_, victim) = self.order.pop_first()?;
        if let Some(slot) = self.entries.remove(&victim) {
            self.total_size -= slot.entry.size;
        }
        Some(victim)
    }

    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
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

    fn entry(size: usize) -> CacheEntry {
        CacheEntry::new(Bytes::from(vec![0u8; size]), ResourceMeta::new(None, None))
    }

    #[test]
    fn test_lru_evicts_least_recently_used() {
        let mut tier = MemoryTier::new(CacheCapacity::Bytes(30), EvictionPolicy::Lru);
        tier.insert(key("a"), entry(10));
        tier.insert(key("b"), entry(10));
        tier.insert(key("c"), entry(10));

        // Touch "a" so "b" becomes the oldest.
        assert!(tier.get(&key("a")).is_some());

        let evicted = tier.insert(key("d"), entry(10));
        assert_eq!(evicted, vec![key("b")]);
        assert!(tier.contains(&key("a")));
        assert!(!tier.contains(&key("b")));
        assert_eq!(tier.stats().total_size, 30);
    }

    #[test]
    fn test_fifo_ignores_reads() {
        let mut tier = MemoryTier::new(CacheCapacity::Bytes(20), EvictionPolicy::Fifo);
        tier.insert(key("a"), entry(10));
        tier.insert(key("b"), entry(10));
        assert!(tier.get(&key("a")).is_some());

        let evicted = tier.insert(key("c"), entry(10));
        assert_eq!(evicted, vec![key("a")]);
    }

    #[test]
    fn test_replacing_entry_adjusts_size() {
        let mut tier = MemoryTier::new(CacheCapacity::Unlimited, EvictionPolicy::Lru);
        tier.insert(key("a"), entry(10));
        tier.insert(key("a"), entry(4));
        let stats = tier.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_size, 4);
    }

    #[test]
    fn test_oversized_entry_not_admitted() {
        let mut tier = MemoryTier::new(CacheCapacity::Bytes(8), EvictionPolicy::Lru);
        tier.insert(key("a"), entry(4));
        tier.insert(key("a"), entry(100));
        assert!(!tier.contains(&key("a")));
        assert_eq!(tier.stats().total_size, 0);
    }

    #[test]
    fn test_size_invariant_over_mixed_operations() {
        let mut tier = MemoryTier::new(CacheCapacity::Bytes(64), EvictionPolicy::Lru);
        for i in 0..200usize {
            let k = key(&format!("k{}", i % 17));
            match i % 5 {
                0 => {
                    tier.remove(&k);
                }
                1 => {
                    tier.get(&k);
                }
                _ => {
                    tier.insert(k, entry((i * 7) % 40));
                }
            }
            let stats = tier.stats();
            assert!(stats.total_size <= 64);
            let resident: u64 = tier.entries.values().map(|s| s.entry.size).sum();
            assert_eq!(resident, stats.total_size);
            assert_eq!(tier.order.len(), tier.entries.len());
        }
    }
}
