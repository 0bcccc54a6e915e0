//! The in-memory reference implementation of [`OrderedKv`].
//!
//! Shaped like a miniature LSM tree so the semantic layers above exercise
//! the same maintenance paths a durable engine would demand: a mutable
//! `BTreeMap` segment, a list of frozen segments, and a merged base.
//! Deletions write tombstones (`None`) so a frozen delete masks an older
//! insert; merging folds segments into the base oldest-first and drops
//! tombstones. The mutable segment freezes automatically when it outgrows
//! the configured write buffer.
//!
//! Cursors materialize the visible entries at creation time, which is the
//! cheapest honest way to give point-in-time snapshot reads.

use std::collections::BTreeMap;

use super::kv::{KvConfig, KvCursor, MergeOperation, OrderedKv};

/// An ordered KV store held entirely in memory.
#[derive(Clone, Debug)]
pub struct MemoryKv<K, V> {
    mutable: BTreeMap<K, Option<V>>,
    /// Frozen segments, newest first.
    frozen: Vec<BTreeMap<K, Option<V>>>,
    base: BTreeMap<K, V>,
    config: KvConfig,
}

impl<K: Ord + Clone, V: Clone> Default for MemoryKv<K, V> {
    fn default() -> Self {
        MemoryKv::new(KvConfig::default())
    }
}

impl<K: Ord + Clone, V: Clone> MemoryKv<K, V> {
    /// An empty store.
    pub fn new(config: KvConfig) -> Self {
        MemoryKv { mutable: BTreeMap::new(), frozen: Vec::new(), base: BTreeMap::new(), config }
    }

    /// The number of frozen segments awaiting a merge.
    pub fn frozen_segments(&self) -> usize {
        self.frozen.len()
    }

    fn visible(&self, key: &K) -> Option<V> {
        if let Some(slot) = self.mutable.get(key) {
            return slot.clone();
        }
        for segment in self.frozen.iter() {
            if let Some(slot) = segment.get(key) {
                return slot.clone();
            }
        }
        self.base.get(key).cloned()
    }

    /// The visible entries, merged across all segments.
    fn snapshot(&self) -> Vec<(K, V)> {
        let mut merged: BTreeMap<K, Option<V>> =
            self.base.iter().map(|(k, v)| (k.clone(), Some(v.clone()))).collect();
        for segment in self.frozen.iter().rev() {
            for (key, slot) in segment.iter() {
                merged.insert(key.clone(), slot.clone());
            }
        }
        for (key, slot) in self.mutable.iter() {
            merged.insert(key.clone(), slot.clone());
        }
        merged.into_iter().filter_map(|(k, slot)| slot.map(|v| (k, v))).collect()
    }
}

impl<K: Ord + Clone, V: Clone> OrderedKv<K, V> for MemoryKv<K, V> {
    type Cursor = MemoryCursor<K, V>;

    fn try_get(&self, key: &K) -> Option<V> {
        self.visible(key)
    }

    fn upsert(&mut self, key: K, value: V) {
        self.mutable.insert(key, Some(value));
        if self.mutable.len() >= self.config.write_buffer_items {
            self.move_mutable_segment_forward();
        }
    }

    fn try_delete(&mut self, key: &K) -> Option<V> {
        let previous = self.visible(key);
        if previous.is_some() {
            self.mutable.insert(key.clone(), None);
        } else {
            self.mutable.remove(key);
        }
        previous
    }

    fn cursor(&self) -> Self::Cursor {
        MemoryCursor { entries: self.snapshot(), pos: 0 }
    }

    fn len(&self) -> usize {
        self.snapshot().len()
    }

    fn in_memory_record_count(&self) -> usize {
        self.mutable.len() + self.frozen.iter().map(BTreeMap::len).sum::<usize>()
    }

    fn move_mutable_segment_forward(&mut self) {
        if !self.mutable.is_empty() {
            let segment = std::mem::take(&mut self.mutable);
            tracing::trace!(records = segment.len(), "freezing mutable segment");
            self.frozen.insert(0, segment);
        }
    }

    fn start_merge(&mut self) -> MergeOperation {
        let merged = self.frozen.len();
        // Oldest first, so newer segments overwrite older entries.
        for segment in self.frozen.drain(..).rev() {
            for (key, slot) in segment {
                match slot {
                    Some(value) => {
                        self.base.insert(key, value);
                    }
                    None => {
                        self.base.remove(&key);
                    }
                }
            }
        }
        MergeOperation::completed(merged)
    }

    fn config(&self) -> &KvConfig {
        &self.config
    }
}

/// A cursor over a materialized snapshot.
#[derive(Debug)]
pub struct MemoryCursor<K, V> {
    entries: Vec<(K, V)>,
    pos: usize,
}

impl<K: Ord, V> KvCursor<K, V> for MemoryCursor<K, V> {
    fn seek(&mut self, lower_bound: &K) {
        let remaining = &self.entries[self.pos..];
        self.pos += remaining.partition_point(|(k, _)| k < lower_bound);
    }

    fn valid(&self) -> bool {
        self.pos < self.entries.len()
    }

    fn key(&self) -> &K {
        &self.entries[self.pos].0
    }

    fn value(&self) -> &V {
        &self.entries[self.pos].1
    }

    fn step(&mut self) {
        self.pos += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layered_reads_respect_recency() {
        let mut kv: MemoryKv<u64, &str> = MemoryKv::default();
        kv.upsert(1, "old");
        kv.move_mutable_segment_forward();
        kv.upsert(1, "new");
        assert_eq!(kv.try_get(&1), Some("new"));
    }

    #[test]
    fn tombstones_mask_frozen_entries() {
        let mut kv: MemoryKv<u64, &str> = MemoryKv::default();
        kv.upsert(1, "v");
        kv.move_mutable_segment_forward();
        assert_eq!(kv.try_delete(&1), Some("v"));
        assert_eq!(kv.try_get(&1), None);
        assert_eq!(kv.len(), 0);

        // Merging folds the tombstone into the base.
        kv.move_mutable_segment_forward();
        assert_eq!(kv.start_merge().join(), 2);
        assert_eq!(kv.in_memory_record_count(), 0);
        assert_eq!(kv.try_get(&1), None);
    }

    #[test]
    fn cursor_is_a_snapshot() {
        let mut kv: MemoryKv<u64, u64> = MemoryKv::default();
        for i in 0..5 {
            kv.upsert(i, i * 10);
        }
        let mut cursor = kv.cursor();
        kv.upsert(99, 990);

        let mut seen = Vec::new();
        while cursor.valid() {
            seen.push((*cursor.key(), *cursor.value()));
            cursor.step();
        }
        assert_eq!(seen, (0..5).map(|i| (i, i * 10)).collect::<Vec<_>>());
    }

    #[test]
    fn cursor_seeks_lower_bounds() {
        let mut kv: MemoryKv<u64, u64> = MemoryKv::default();
        for i in [10, 20, 30] {
            kv.upsert(i, i);
        }
        let mut cursor = kv.cursor();
        cursor.seek(&15);
        assert_eq!(*cursor.key(), 20);
        cursor.seek(&20);
        assert_eq!(*cursor.key(), 20);
        cursor.seek(&31);
        assert!(!cursor.valid());
    }

    #[test]
    fn write_buffer_overflow_freezes() {
        let config = KvConfig { write_buffer_items: 4, ..KvConfig::default() };
        let mut kv: MemoryKv<u64, u64> = MemoryKv::new(config);
        for i in 0..10 {
            kv.upsert(i, i);
        }
        assert!(kv.frozen_segments() > 0);
        assert_eq!(kv.len(), 10);
        kv.move_mutable_segment_forward();
        kv.start_merge().join();
        assert_eq!(kv.in_memory_record_count(), 0);
        assert_eq!(kv.len(), 10);
    }
}
