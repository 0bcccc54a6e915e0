//! The hybrid storage layer: a memory overlay in front of the LSM layer.
//!
//! The same overlay-and-spine pattern as the adaptive Z-set, applied to
//! durable state. Writes land in an ordered in-memory map holding the
//! *absolute* weight of each touched pair (a read-modify-write against
//! overlay-then-disk), so reads take the overlay's word whenever it has one:
//! memory wins collisions, and an overlay zero masks a stale disk entry
//! until the next spill. When the overlay outgrows its item or estimated
//! byte bound it spills to the LSM layer and clears.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::algebra::Weight;
use crate::codec::{BinCodec, Codec};
use crate::consolidation;
use crate::error::Result;
use crate::storage::kv::OrderedKv;
use crate::storage::memory::MemoryKv;
use crate::storage::zset_store::ZSetStore;
use crate::storage::{CompositeKey, StorageConfig};

/// A spilling memory overlay over a [`ZSetStore`].
pub struct HybridStore<K, V, S = MemoryKv<CompositeKey<K, V>, Weight>> {
    /// Absolute weights for recently-touched pairs; zero masks disk.
    overlay: BTreeMap<CompositeKey<K, V>, Weight>,
    overlay_bytes: usize,
    disk: ZSetStore<K, V, S>,
    max_items: usize,
    max_bytes: usize,
    codec: BinCodec,
}

impl<K, V> HybridStore<K, V, MemoryKv<CompositeKey<K, V>, Weight>>
where
    K: Ord + Clone + Serialize,
    V: Ord + Clone + Serialize,
{
    /// A hybrid store over the in-memory reference engine.
    pub fn open(config: &StorageConfig) -> Self {
        HybridStore::new(ZSetStore::open(config), config)
    }
}

impl<K, V, S> HybridStore<K, V, S>
where
    K: Ord + Clone + Serialize,
    V: Ord + Clone + Serialize,
    S: OrderedKv<CompositeKey<K, V>, Weight>,
{
    /// Wraps an existing LSM layer with an overlay sized from `config`.
    pub fn new(disk: ZSetStore<K, V, S>, config: &StorageConfig) -> Self {
        HybridStore {
            overlay: BTreeMap::new(),
            overlay_bytes: 0,
            disk,
            max_items: config.write_buffer_size,
            max_bytes: config.overlay_byte_limit(),
            codec: BinCodec,
        }
    }

    /// Entries currently held in the overlay, masked zeros included.
    pub fn overlay_len(&self) -> usize {
        self.overlay.len()
    }

    /// The LSM layer beneath the overlay.
    pub fn disk(&self) -> &ZSetStore<K, V, S> {
        &self.disk
    }

    /// Applies a batch of weighted updates into the overlay.
    pub fn store_batch(&mut self, mut updates: Vec<((K, V), Weight)>) -> Result<()> {
        consolidation::consolidate(&mut updates);
        for ((key, value), delta) in updates {
            let record = CompositeKey::entry(key, value);
            let current = match self.overlay.get(&record) {
                Some(weight) => *weight,
                None => {
                    self.overlay_bytes += self.codec.estimate_size(&record);
                    match (&record.key, &record.value) {
                        (key, Some(value)) => self.disk.weight_at(key, value),
                        _ => 0,
                    }
                }
            };
            self.overlay.insert(record, current + delta);
        }
        self.maybe_spill()
    }

    /// The weight of one exact `(key, value)` pair; zero when absent.
    pub fn weight_at(&self, key: &K, value: &V) -> Weight {
        let record = CompositeKey::entry(key.clone(), value.clone());
        match self.overlay.get(&record) {
            Some(weight) => *weight,
            None => self.disk.weight_at(key, value),
        }
    }

    /// Some `(value, weight)` stored under `key`, memory consulted first.
    pub fn get(&self, key: &K) -> Option<(V, Weight)> {
        let lower = CompositeKey::prefix(key.clone());
        for (record, weight) in self.overlay.range(lower..) {
            if record.key != *key {
                break;
            }
            if *weight != 0 {
                if let Some(value) = record.value.clone() {
                    return Some((value, *weight));
                }
            }
        }
        // The overlay may be masking the disk's candidates with zeros.
        self.disk.get(key).and_then(|(value, weight)| {
            let record = CompositeKey::entry(key.clone(), value.clone());
            match self.overlay.get(&record) {
                Some(0) => self.scan_key(key),
                Some(w) => Some((value, *w)),
                None => Some((value, weight)),
            }
        })
    }

    fn scan_key(&self, key: &K) -> Option<(V, Weight)> {
        self.iter().find(|(k, _, _)| k == key).map(|(_, v, w)| (v, w))
    }

    /// Every visible `(key, value, weight)`, overlay winning collisions.
    pub fn iter(&self) -> impl Iterator<Item = (K, V, Weight)> + '_ {
        let mut merged: BTreeMap<CompositeKey<K, V>, Weight> = self
            .disk
            .iter()
            .map(|(k, v, w)| (CompositeKey::entry(k, v), w))
            .collect();
        for (record, weight) in self.overlay.iter() {
            merged.insert(record.clone(), *weight);
        }
        merged.into_iter().filter_map(|(record, weight)| {
            if weight == 0 {
                return None;
            }
            record.into_pair().map(|(k, v)| (k, v, weight))
        })
    }

    /// Visible entries with keys in `[start, end]`, inclusive.
    pub fn range(&self, start: &K, end: &K) -> impl Iterator<Item = (K, V, Weight)> + '_ {
        let start = start.clone();
        let end = end.clone();
        self.iter().skip_while(move |(k, _, _)| *k < start).take_while(move |(k, _, _)| *k <= end)
    }

    fn maybe_spill(&mut self) -> Result<()> {
        if self.overlay.len() >= self.max_items || self.overlay_bytes >= self.max_bytes {
            self.spill()?;
        }
        Ok(())
    }

    /// Writes the overlay's absolute weights through to disk and clears it.
    pub fn spill(&mut self) -> Result<()> {
        if self.overlay.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            entries = self.overlay.len(),
            bytes = self.overlay_bytes,
            "spilling hybrid overlay"
        );
        for (record, weight) in std::mem::take(&mut self.overlay) {
            self.disk.set_weight(record, weight);
        }
        self.overlay_bytes = 0;
        Ok(())
    }

    /// Spills, then compacts the LSM layer.
    pub fn compact(&mut self) -> Result<()> {
        self.spill()?;
        self.disk.compact()
    }
}
