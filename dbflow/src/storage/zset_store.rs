//! A persistent Z-set over an ordered KV store.
//!
//! The layout is one record per `(key, value)` pair, holding its signed
//! 64-bit weight. The write path coalesces a batch in memory before touching
//! the store, then read-modify-writes each survivor so that weights
//! accumulate and entries reaching zero are deleted; the store never holds a
//! zero weight. Reads are cursor walks over point-in-time snapshots.

use std::marker::PhantomData;
use std::time::Instant;

use serde::Serialize;

use crate::algebra::Weight;
use crate::codec::{BinCodec, Codec};
use crate::consolidation;
use crate::error::Result;
use crate::storage::kv::{KvCursor, OrderedKv};
use crate::storage::memory::MemoryKv;
use crate::storage::{CompositeKey, StorageConfig};

/// Write and maintenance counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct StoreStats {
    /// Batches accepted.
    pub batches: u64,
    /// Individual records written or deleted.
    pub keys_written: u64,
    /// Estimated bytes written, per the codec.
    pub bytes_written: u64,
    /// Completed compactions.
    pub compactions: u64,
    /// When the last compaction finished.
    pub last_compaction: Option<Instant>,
}

/// A Z-set of `(K, V)` pairs backed by an [`OrderedKv`].
pub struct ZSetStore<K, V, S = MemoryKv<CompositeKey<K, V>, Weight>> {
    store: S,
    codec: BinCodec,
    stats: StoreStats,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> ZSetStore<K, V, MemoryKv<CompositeKey<K, V>, Weight>>
where
    K: Ord + Clone + Serialize,
    V: Ord + Clone + Serialize,
{
    /// A store over the in-memory reference engine.
    pub fn open(config: &StorageConfig) -> Self {
        ZSetStore::new(MemoryKv::new(config.kv()))
    }
}

impl<K, V, S> ZSetStore<K, V, S>
where
    K: Ord + Clone + Serialize,
    V: Ord + Clone + Serialize,
    S: OrderedKv<CompositeKey<K, V>, Weight>,
{
    /// Wraps an arbitrary host engine.
    pub fn new(store: S) -> Self {
        ZSetStore { store, codec: BinCodec, stats: StoreStats::default(), _marker: PhantomData }
    }

    /// The write/maintenance counters.
    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    /// The number of stored pairs.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Applies a batch of weighted updates.
    ///
    /// The batch is coalesced by `(key, value)` before the store is touched;
    /// surviving deltas read the current weight and write the sum, deleting
    /// entries that reach zero. A zero-delta update is a no-op.
    pub fn store_batch(&mut self, mut updates: Vec<((K, V), Weight)>) -> Result<()> {
        consolidation::consolidate(&mut updates);
        self.stats.batches += 1;
        for ((key, value), delta) in updates {
            let record = CompositeKey::entry(key, value);
            self.stats.keys_written += 1;
            self.stats.bytes_written +=
                self.codec.estimate_size(&record) as u64 + std::mem::size_of::<Weight>() as u64;
            match self.store.try_get(&record) {
                None => {
                    self.store.upsert(record, delta);
                }
                Some(weight) => {
                    let accumulated = weight + delta;
                    if accumulated == 0 {
                        self.store.try_delete(&record);
                    } else {
                        self.store.upsert(record, accumulated);
                    }
                }
            }
        }
        Ok(())
    }

    /// Sets the absolute weight of one pair; zero deletes.
    pub(crate) fn set_weight(&mut self, record: CompositeKey<K, V>, weight: Weight) {
        self.stats.keys_written += 1;
        if weight == 0 {
            self.store.try_delete(&record);
        } else {
            self.store.upsert(record, weight);
        }
    }

    /// The weight of one exact `(key, value)` pair; zero when absent.
    pub fn weight_at(&self, key: &K, value: &V) -> Weight {
        self.store
            .try_get(&CompositeKey::entry(key.clone(), value.clone()))
            .unwrap_or(0)
    }

    /// Some `(value, weight)` stored under `key`, if any.
    ///
    /// Seeks the per-key lower bound and returns the first entry whose key
    /// component matches. With the reference engine that is the minimum
    /// value, but callers must not rely on which value is chosen.
    pub fn get(&self, key: &K) -> Option<(V, Weight)> {
        let mut cursor = self.store.cursor();
        cursor.seek(&CompositeKey::prefix(key.clone()));
        while cursor.valid() {
            let record = cursor.key();
            if record.key != *key {
                return None;
            }
            if let Some(value) = record.value.clone() {
                return Some((value, *cursor.value()));
            }
            cursor.step();
        }
        None
    }

    /// A forward iterator over every stored `(key, value, weight)`.
    pub fn iter(&self) -> StoreIter<K, V, S::Cursor> {
        StoreIter { cursor: self.store.cursor(), end: None, _marker: PhantomData }
    }

    /// A forward iterator over keys in `[start, end]`, inclusive.
    pub fn range(&self, start: &K, end: &K) -> StoreIter<K, V, S::Cursor> {
        let mut cursor = self.store.cursor();
        cursor.seek(&CompositeKey::prefix(start.clone()));
        StoreIter { cursor, end: Some(end.clone()), _marker: PhantomData }
    }

    /// Drives the host engine's maintenance until no in-memory records
    /// remain.
    pub fn compact(&mut self) -> Result<()> {
        let mut merged_segments = 0;
        while self.store.in_memory_record_count() > 0 {
            self.store.move_mutable_segment_forward();
            merged_segments += self.store.start_merge().join();
        }
        self.stats.compactions += 1;
        self.stats.last_compaction = Some(Instant::now());
        tracing::debug!(merged_segments, "storage compaction complete");
        Ok(())
    }

    /// The host engine, for maintenance introspection.
    pub fn engine(&self) -> &S {
        &self.store
    }
}

/// Iterates `(key, value, weight)` records in key order.
pub struct StoreIter<K, V, C> {
    cursor: C,
    end: Option<K>,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, C> Iterator for StoreIter<K, V, C>
where
    K: Ord + Clone,
    V: Clone,
    C: KvCursor<CompositeKey<K, V>, Weight>,
{
    type Item = (K, V, Weight);

    fn next(&mut self) -> Option<Self::Item> {
        while self.cursor.valid() {
            let record = self.cursor.key();
            if let Some(end) = &self.end {
                if record.key > *end {
                    return None;
                }
            }
            let weight = *self.cursor.value();
            let pair = record.clone().into_pair();
            self.cursor.step();
            if let Some((key, value)) = pair {
                if weight != 0 {
                    return Some((key, value, weight));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ZSetStore<u64, String> {
        ZSetStore::open(&StorageConfig::default())
    }

    #[test]
    fn coalesces_before_writing() {
        let mut store = store();
        store
            .store_batch(vec![
                ((1, "a".into()), 3),
                ((1, "a".into()), -3),
                ((1, "b".into()), 1),
            ])
            .unwrap();
        let records: Vec<_> = store.iter().collect();
        assert_eq!(records, vec![(1, "b".to_string(), 1)]);
    }

    #[test]
    fn accumulates_and_deletes_on_zero() {
        let mut store = store();
        store.store_batch(vec![((1, "a".into()), 2)]).unwrap();
        store.store_batch(vec![((1, "a".into()), 3)]).unwrap();
        assert_eq!(store.weight_at(&1, &"a".into()), 5);

        store.store_batch(vec![((1, "a".into()), -5)]).unwrap();
        assert_eq!(store.weight_at(&1, &"a".into()), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn point_get_finds_first_value_of_key() {
        let mut store = store();
        store
            .store_batch(vec![((2, "b".into()), 1), ((2, "a".into()), 4), ((3, "z".into()), 9)])
            .unwrap();
        let (value, weight) = store.get(&2).unwrap();
        assert_eq!((value.as_str(), weight), ("a", 4));
        assert!(store.get(&1).is_none());
        assert!(store.get(&4).is_none());
    }

    #[test]
    fn range_is_inclusive_and_ordered() {
        let mut store = store();
        for key in 1..=5u64 {
            store.store_batch(vec![((key, format!("v{key}")), key as Weight)]).unwrap();
        }
        let records: Vec<_> = store.range(&2, &4).map(|(k, _, w)| (k, w)).collect();
        assert_eq!(records, vec![(2, 2), (3, 3), (4, 4)]);
    }

    #[test]
    fn order_independence_and_splitting() {
        let updates: Vec<((u64, u64), Weight)> =
            vec![((1, 1), 2), ((2, 2), -1), ((1, 1), -2), ((3, 3), 4), ((2, 2), 1)];

        // One batch.
        let mut one = ZSetStore::<u64, u64>::open(&StorageConfig::default());
        one.store_batch(updates.clone()).unwrap();

        // Permuted.
        let mut permuted_updates = updates.clone();
        permuted_updates.reverse();
        let mut permuted = ZSetStore::<u64, u64>::open(&StorageConfig::default());
        permuted.store_batch(permuted_updates).unwrap();

        // Split into singleton batches.
        let mut split = ZSetStore::<u64, u64>::open(&StorageConfig::default());
        for update in updates {
            split.store_batch(vec![update]).unwrap();
        }

        let contents = |s: &ZSetStore<u64, u64>| s.iter().collect::<Vec<_>>();
        assert_eq!(contents(&one), contents(&permuted));
        assert_eq!(contents(&one), contents(&split));
        assert_eq!(contents(&one), vec![(3, 3, 4)]);
    }

    #[test]
    fn compaction_is_idempotent_and_drains_memory() {
        let mut store = store();
        for key in 0..100u64 {
            store.store_batch(vec![((key, "v".into()), 1)]).unwrap();
        }
        store.compact().unwrap();
        assert_eq!(store.engine().in_memory_record_count(), 0);
        let once: Vec<_> = store.iter().collect();

        store.compact().unwrap();
        let twice: Vec<_> = store.iter().collect();
        assert_eq!(once, twice);
        assert_eq!(once.len(), 100);
        assert!(once.iter().all(|(_, _, w)| *w != 0));
        assert_eq!(store.stats().compactions, 2);
    }

    #[test]
    fn stats_accumulate() {
        let mut store = store();
        store.store_batch(vec![((1, "a".into()), 1), ((2, "b".into()), 1)]).unwrap();
        assert_eq!(store.stats().batches, 1);
        assert_eq!(store.stats().keys_written, 2);
        assert!(store.stats().bytes_written > 0);
    }
}
