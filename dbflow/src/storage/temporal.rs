//! The persistent temporal trace: `(time, key, value) → weight`.
//!
//! Where the storage backend holds the present, the temporal trace holds
//! history: every batch of updates is recorded under its logical time, and
//! queries reconstruct the state at a time (the accumulated sum of all
//! earlier batches) or slice out the per-time batches in a range.
//! Maintenance can coarsen old history by re-bucketing times into wider
//! intervals, re-aggregating whatever lands together.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use serde::Serialize;

use crate::algebra::Weight;
use crate::consolidation;
use crate::error::Result;
use crate::storage::kv::{KvConfig, KvCursor, OrderedKv};
use crate::storage::memory::MemoryKv;
use crate::storage::TemporalKey;

/// A time-indexed persistent trace over an ordered KV store.
pub struct TemporalTrace<K, V, S = MemoryKv<TemporalKey<K, V>, Weight>> {
    store: S,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> Default for TemporalTrace<K, V, MemoryKv<TemporalKey<K, V>, Weight>>
where
    K: Ord + Clone + Serialize,
    V: Ord + Clone + Serialize,
{
    fn default() -> Self {
        TemporalTrace::new(MemoryKv::new(KvConfig::default()))
    }
}

impl<K, V, S> TemporalTrace<K, V, S>
where
    K: Ord + Clone + Serialize,
    V: Ord + Clone + Serialize,
    S: OrderedKv<TemporalKey<K, V>, Weight>,
{
    /// Wraps a host engine.
    pub fn new(store: S) -> Self {
        TemporalTrace { store, _marker: PhantomData }
    }

    /// The number of stored records across all times.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// True when no history is recorded.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Records a batch of updates at `time`.
    ///
    /// Updates coalesce by `(key, value)` within the batch, then accumulate
    /// into any existing record at the same time; zero accumulations are
    /// deleted, so no record ever holds weight zero.
    pub fn insert_batch(&mut self, time: i64, mut updates: Vec<((K, V), Weight)>) -> Result<()> {
        consolidation::consolidate(&mut updates);
        for ((key, value), delta) in updates {
            let record = TemporalKey::entry(time, key, value);
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

    /// The accumulated state at `time`: the sum of every batch with an
    /// equal or earlier time, zero weights dropped.
    pub fn query_at_time(&self, time: i64) -> Vec<((K, V), Weight)> {
        let mut accumulated: BTreeMap<(K, V), Weight> = BTreeMap::new();
        let mut cursor = self.store.cursor();
        while cursor.valid() {
            let record = cursor.key();
            if record.time > time {
                break;
            }
            if let Some(pair) = record.clone().into_parts().map(|(_, k, v)| (k, v)) {
                *accumulated.entry(pair).or_insert(0) += *cursor.value();
            }
            cursor.step();
        }
        accumulated.into_iter().filter(|(_, weight)| *weight != 0).collect()
    }

    /// The per-time batches with times in `[start, end]`, ascending.
    pub fn query_time_range(&self, start: i64, end: i64) -> Vec<(i64, Vec<((K, V), Weight)>)> {
        let mut batches: Vec<(i64, Vec<((K, V), Weight)>)> = Vec::new();
        let mut cursor = self.store.cursor();
        cursor.seek(&TemporalKey::time_prefix(start));
        while cursor.valid() {
            let record = cursor.key();
            if record.time > end {
                break;
            }
            if let Some((time, key, value)) = record.clone().into_parts() {
                match batches.last_mut() {
                    Some((current, batch)) if *current == time => {
                        batch.push(((key, value), *cursor.value()));
                    }
                    _ => batches.push((time, vec![((key, value), *cursor.value())])),
                }
            }
            cursor.step();
        }
        batches
    }

    /// Coarsens history before `before`: times collapse to multiples of
    /// `bucket`, re-aggregating records that land together.
    pub fn maintain(&mut self, before: i64, bucket: i64) -> Result<()> {
        if bucket <= 0 {
            return Ok(());
        }
        let mut rewritten: Vec<(i64, (K, V), Weight)> = Vec::new();
        let mut cursor = self.store.cursor();
        while cursor.valid() {
            let record = cursor.key();
            if record.time >= before {
                break;
            }
            if let Some((time, key, value)) = record.clone().into_parts() {
                rewritten.push((time, (key, value), *cursor.value()));
            }
            cursor.step();
        }
        drop(cursor);

        if rewritten.is_empty() {
            return Ok(());
        }
        tracing::debug!(records = rewritten.len(), before, bucket, "re-bucketing temporal trace");

        for (time, (key, value), _) in rewritten.iter() {
            self.store.try_delete(&TemporalKey::entry(*time, key.clone(), value.clone()));
        }
        let mut regrouped: Vec<((i64, (K, V)), Weight)> = rewritten
            .into_iter()
            .map(|(time, pair, weight)| ((time.div_euclid(bucket) * bucket, pair), weight))
            .collect();
        consolidation::consolidate(&mut regrouped);
        for ((time, (key, value)), weight) in regrouped {
            let record = TemporalKey::entry(time, key, value);
            match self.store.try_get(&record) {
                None => self.store.upsert(record, weight),
                Some(existing) => {
                    let accumulated = existing + weight;
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_accumulates_history() {
        let mut trace: TemporalTrace<&str, u64> = TemporalTrace::default();
        trace.insert_batch(1, vec![(("k", 1), 1)]).unwrap();
        trace.insert_batch(2, vec![(("k", 1), -1)]).unwrap();

        assert_eq!(trace.query_at_time(1), vec![(("k", 1), 1)]);
        assert!(trace.query_at_time(2).is_empty());
        assert_eq!(trace.query_at_time(0), vec![]);
    }

    #[test]
    fn batches_coalesce_within_a_time() {
        let mut trace: TemporalTrace<u64, u64> = TemporalTrace::default();
        trace.insert_batch(5, vec![((1, 1), 2), ((1, 1), -2), ((2, 2), 1)]).unwrap();
        assert_eq!(trace.len(), 1);
        trace.insert_batch(5, vec![((2, 2), -1)]).unwrap();
        assert!(trace.is_empty());
    }

    #[test]
    fn range_partitions_by_time() {
        let mut trace: TemporalTrace<u64, u64> = TemporalTrace::default();
        trace.insert_batch(1, vec![((1, 1), 1)]).unwrap();
        trace.insert_batch(2, vec![((2, 2), 2), ((3, 3), 3)]).unwrap();
        trace.insert_batch(4, vec![((4, 4), 4)]).unwrap();

        let batches = trace.query_time_range(2, 4);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].0, 2);
        assert_eq!(batches[0].1, vec![((2, 2), 2), ((3, 3), 3)]);
        assert_eq!(batches[1].0, 4);

        // The range excludes earlier and later times exactly.
        assert_eq!(trace.query_time_range(0, 1).len(), 1);
        assert!(trace.query_time_range(5, 9).is_empty());
    }

    #[test]
    fn maintain_rebuckets_old_history() {
        let mut trace: TemporalTrace<u64, u64> = TemporalTrace::default();
        trace.insert_batch(1, vec![((1, 1), 1)]).unwrap();
        trace.insert_batch(3, vec![((1, 1), 2)]).unwrap();
        trace.insert_batch(12, vec![((1, 1), 5)]).unwrap();

        trace.maintain(10, 10).unwrap();

        // Times 1 and 3 collapse into bucket 0; time 12 is untouched.
        let batches = trace.query_time_range(0, 20);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0], (0, vec![((1, 1), 3)]));
        assert_eq!(batches[1], (12, vec![((1, 1), 5)]));

        // Accumulated queries still see the same history totals.
        assert_eq!(trace.query_at_time(20), vec![((1, 1), 8)]);
        assert_eq!(trace.query_at_time(9), vec![((1, 1), 3)]);
    }
}
