//! Durable state: an abstract ordered KV store and the Z-set layers above it.
//!
//! The engine does not prescribe a host storage engine. It defines the
//! [`OrderedKv`] contract (ordered keys, point mutation, lower-bound seek,
//! segment maintenance) and builds three semantic layers on top:
//!
//! * [`ZSetStore`] — a persistent Z-set keyed `(K, V)` with coalescing
//!   writes and snapshot reads;
//! * [`HybridStore`] — a memory overlay spilling into a `ZSetStore` under
//!   size pressure;
//! * [`TemporalTrace`] — a time-indexed trace keyed `(T, K, V)` supporting
//!   snapshot and range queries by time.
//!
//! Composite keys order lexicographically. The value component is optional
//! so that a lower-bound probe for "the first entry of key `k`" is just a
//! seek to the key with `None` in the value position, which sorts before
//! every real entry of `k`.

pub mod hybrid;
pub mod kv;
pub mod memory;
pub mod temporal;
pub mod zset_store;

pub use hybrid::HybridStore;
pub use kv::{KvConfig, KvCursor, MergeOperation, OrderedKv};
pub use memory::MemoryKv;
pub use temporal::TemporalTrace;
pub use zset_store::{StoreStats, ZSetStore};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which storage layering to use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StorageMode {
    /// Everything stays in the mutable segment.
    #[default]
    InMemory,
    /// Writes go straight to the LSM-semantic layer.
    Lsm,
    /// Memory overlay in front of the LSM layer.
    Hybrid,
}

/// Configuration for the storage layers.
#[derive(Clone, Debug)]
pub struct StorageConfig {
    /// Base directory for on-disk state, when a host engine needs one.
    pub data_path: Option<PathBuf>,
    /// The layering in use.
    pub mode: StorageMode,
    /// Disk-segment item count handed to the host engine.
    pub compaction_threshold: usize,
    /// Memtable size (items) for the host engine, and the hybrid overlay's
    /// item bound.
    pub write_buffer_size: usize,
    /// Total cache budget in bytes, split heuristically key/value.
    pub block_cache_size: usize,
    /// Fraction of the cache budget at which the hybrid overlay spills.
    pub spill_threshold: f64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            data_path: None,
            mode: StorageMode::InMemory,
            compaction_threshold: 4096,
            write_buffer_size: 8192,
            block_cache_size: 16 << 20,
            spill_threshold: 0.5,
        }
    }
}

impl StorageConfig {
    /// Splits the cache budget between key and value caches.
    ///
    /// Keys are small and hot; a quarter of the budget goes to them.
    pub fn cache_split(&self) -> (usize, usize) {
        let keys = self.block_cache_size / 4;
        (keys, self.block_cache_size - keys)
    }

    /// The hybrid overlay's byte bound.
    pub fn overlay_byte_limit(&self) -> usize {
        (self.block_cache_size as f64 * self.spill_threshold) as usize
    }

    /// The derived host-engine configuration.
    pub fn kv(&self) -> KvConfig {
        let (key_cache_bytes, value_cache_bytes) = self.cache_split();
        KvConfig {
            disk_segment_items: self.compaction_threshold,
            write_buffer_items: self.write_buffer_size,
            key_cache_bytes,
            value_cache_bytes,
        }
    }
}

/// The composite key of the persistent Z-set layers: `(K, V)`, ordered by
/// key then value, with `None` in the value position as the per-key lower
/// bound.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompositeKey<K, V> {
    /// The logical key.
    pub key: K,
    /// The payload value; `None` only in probe keys.
    pub value: Option<V>,
}

impl<K, V> CompositeKey<K, V> {
    /// A real entry key.
    pub fn entry(key: K, value: V) -> Self {
        CompositeKey { key, value: Some(value) }
    }

    /// The lower bound of every entry with logical key `key`.
    pub fn prefix(key: K) -> Self {
        CompositeKey { key, value: None }
    }

    /// The payload of an entry key.
    pub fn into_pair(self) -> Option<(K, V)> {
        let CompositeKey { key, value } = self;
        value.map(|v| (key, v))
    }
}

/// The composite key of the temporal trace: `(T, K, V)`, ordered by time,
/// then key, then value, with `None` positions as range lower bounds.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TemporalKey<K, V> {
    /// The logical time.
    pub time: i64,
    /// The logical key; `None` only in probe keys.
    pub key: Option<K>,
    /// The payload value; `None` only in probe keys.
    pub value: Option<V>,
}

impl<K, V> TemporalKey<K, V> {
    /// A real entry key.
    pub fn entry(time: i64, key: K, value: V) -> Self {
        TemporalKey { time, key: Some(key), value: Some(value) }
    }

    /// The lower bound of every entry at `time` or later.
    pub fn time_prefix(time: i64) -> Self {
        TemporalKey { time, key: None, value: None }
    }

    /// The payload of an entry key.
    pub fn into_parts(self) -> Option<(i64, K, V)> {
        match (self.key, self.value) {
            (Some(key), Some(value)) => Some((self.time, key, value)),
            _ => None,
        }
    }
}

/// A persistent Z-set opened per the configured [`StorageMode`].
///
/// `InMemory` pins every record in the mutable segment (the write buffer
/// never freezes); `Lsm` runs the reference engine with the configured
/// segment thresholds; `Hybrid` adds the spilling overlay in front.
pub enum ZSetStorage<K, V> {
    /// Everything in the mutable segment.
    Memory(ZSetStore<K, V>),
    /// The LSM-semantic layer alone.
    Lsm(ZSetStore<K, V>),
    /// Overlay plus LSM layer.
    Hybrid(HybridStore<K, V>),
}

impl<K, V> ZSetStorage<K, V>
where
    K: Ord + Clone + serde::Serialize,
    V: Ord + Clone + serde::Serialize,
{
    /// Opens storage in the configured mode.
    pub fn open(config: &StorageConfig) -> Self {
        match config.mode {
            StorageMode::InMemory => {
                let pinned = StorageConfig {
                    write_buffer_size: usize::MAX,
                    ..config.clone()
                };
                ZSetStorage::Memory(ZSetStore::open(&pinned))
            }
            StorageMode::Lsm => ZSetStorage::Lsm(ZSetStore::open(config)),
            StorageMode::Hybrid => ZSetStorage::Hybrid(HybridStore::open(config)),
        }
    }

    /// The mode this storage was opened in.
    pub fn mode(&self) -> StorageMode {
        match self {
            ZSetStorage::Memory(_) => StorageMode::InMemory,
            ZSetStorage::Lsm(_) => StorageMode::Lsm,
            ZSetStorage::Hybrid(_) => StorageMode::Hybrid,
        }
    }

    /// Applies a batch of weighted updates.
    pub fn store_batch(
        &mut self,
        updates: Vec<((K, V), crate::algebra::Weight)>,
    ) -> crate::error::Result<()> {
        match self {
            ZSetStorage::Memory(store) | ZSetStorage::Lsm(store) => store.store_batch(updates),
            ZSetStorage::Hybrid(store) => store.store_batch(updates),
        }
    }

    /// Some `(value, weight)` stored under `key`, if any.
    pub fn get(&self, key: &K) -> Option<(V, crate::algebra::Weight)> {
        match self {
            ZSetStorage::Memory(store) | ZSetStorage::Lsm(store) => store.get(key),
            ZSetStorage::Hybrid(store) => store.get(key),
        }
    }

    /// The weight of one exact `(key, value)` pair; zero when absent.
    pub fn weight_at(&self, key: &K, value: &V) -> crate::algebra::Weight {
        match self {
            ZSetStorage::Memory(store) | ZSetStorage::Lsm(store) => store.weight_at(key, value),
            ZSetStorage::Hybrid(store) => store.weight_at(key, value),
        }
    }

    /// Every stored `(key, value, weight)` in key order.
    pub fn records(&self) -> Vec<(K, V, crate::algebra::Weight)> {
        match self {
            ZSetStorage::Memory(store) | ZSetStorage::Lsm(store) => store.iter().collect(),
            ZSetStorage::Hybrid(store) => store.iter().collect(),
        }
    }

    /// Runs maintenance appropriate to the mode.
    pub fn compact(&mut self) -> crate::error::Result<()> {
        match self {
            ZSetStorage::Memory(store) | ZSetStorage::Lsm(store) => store.compact(),
            ZSetStorage::Hybrid(store) => store.compact(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_prefix_sorts_before_entries() {
        let prefix: CompositeKey<u64, u64> = CompositeKey::prefix(5);
        assert!(prefix < CompositeKey::entry(5, 0));
        assert!(CompositeKey::entry(4, u64::MAX) < prefix);
        assert!(CompositeKey::entry(5, 3) < CompositeKey::entry(5, 4));
        assert!(CompositeKey::entry(5, u64::MAX) < CompositeKey::<u64, u64>::prefix(6));
    }

    #[test]
    fn temporal_key_orders_time_first() {
        let early = TemporalKey::entry(1, 9u64, 9u64);
        let late_prefix: TemporalKey<u64, u64> = TemporalKey::time_prefix(2);
        let late = TemporalKey::entry(2, 0, 0);
        assert!(early < late_prefix);
        assert!(late_prefix < late);
    }

    #[test]
    fn cache_split_spends_whole_budget() {
        let config = StorageConfig { block_cache_size: 1000, ..StorageConfig::default() };
        let (keys, values) = config.cache_split();
        assert_eq!(keys + values, 1000);
        assert!(keys < values);
    }

    #[test]
    fn modes_agree_on_contents() {
        let updates: Vec<((u64, u64), i64)> =
            vec![((1, 1), 2), ((2, 2), 1), ((1, 1), -2), ((3, 3), 4)];
        let mut outcomes = Vec::new();
        for mode in [StorageMode::InMemory, StorageMode::Lsm, StorageMode::Hybrid] {
            let config = StorageConfig { mode, write_buffer_size: 2, ..StorageConfig::default() };
            let mut storage: ZSetStorage<u64, u64> = ZSetStorage::open(&config);
            assert_eq!(storage.mode(), mode);
            storage.store_batch(updates.clone()).unwrap();
            storage.compact().unwrap();
            outcomes.push(storage.records());
        }
        assert_eq!(outcomes[0], vec![(2, 2, 1), (3, 3, 4)]);
        assert_eq!(outcomes[0], outcomes[1]);
        assert_eq!(outcomes[1], outcomes[2]);
    }
}
