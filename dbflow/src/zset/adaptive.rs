//! The adaptive Z-set representation.
//!
//! A composite of three layers, sized for three workload regimes:
//!
//! * `small` — a sorted inline vector for tiny sets, up to a threshold `N`;
//!   insertion is a binary search and scans are a slice walk.
//! * `fast` — an open-addressed memtable absorbing medium-rate updates.
//! * `spine` — a layered trace holding the frozen bulk of the set.
//!
//! Whichever layers are non-empty, the logical set is their sum. The overlay
//! (`small` and `fast`) flushes into the spine when its size passes `S` or
//! when `T` has elapsed since the last flush, the classic memtable/spine
//! trade: constant-time insertion up front, bounded run count behind.
//!
//! Arranged views are read-mostly snapshots of the consolidated spine. While
//! any view is outstanding both flush thresholds tighten by 4x, so
//! subscribers observe recent changes promptly. The subscriber count lives in
//! a per-set registry handle rather than process-global state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use smallvec::SmallVec;

use crate::algebra::{Abelian, IsZero, Monoid, Scale, Semigroup, Weight};
use crate::consolidation;
use crate::trace::{Batch, Trace, TraceConfig};

/// Tuning for the adaptive layout.
#[derive(Clone, Copy, Debug)]
pub struct AdaptiveConfig {
    /// Largest total size served by the sorted inline vector (`N`).
    pub small_limit: usize,
    /// Overlay size which triggers a flush into the spine (`S`).
    pub flush_size: usize,
    /// Elapsed time since the last flush which triggers another (`T`).
    pub flush_interval: Duration,
    /// Maintenance knobs for the spine.
    pub trace: TraceConfig,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        AdaptiveConfig {
            small_limit: 512,
            flush_size: 65_536,
            flush_interval: Duration::from_millis(20),
            trace: TraceConfig::default(),
        }
    }
}

/// Shared subscriber count for arranged views of one adaptive set.
#[derive(Clone, Debug, Default)]
pub struct ArrangementRegistry {
    subscribers: Arc<AtomicUsize>,
}

impl ArrangementRegistry {
    /// The number of outstanding arranged views.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::Relaxed)
    }

    fn subscribe(&self) -> SubscriberToken {
        self.subscribers.fetch_add(1, Ordering::Relaxed);
        SubscriberToken { subscribers: Arc::clone(&self.subscribers) }
    }
}

/// Reference-counted registration; dropping it releases the subscription.
#[derive(Debug)]
pub struct SubscriberToken {
    subscribers: Arc<AtomicUsize>,
}

impl Drop for SubscriberToken {
    fn drop(&mut self) {
        self.subscribers.fetch_sub(1, Ordering::Relaxed);
    }
}

/// A read-mostly snapshot of an adaptive set's consolidated trace.
///
/// Holding the view keeps the producing set in its tightened-flush regime;
/// drop it to release the subscription.
#[derive(Debug)]
pub struct ArrangedView<K> {
    snapshot: Batch<K>,
    _token: SubscriberToken,
}

impl<K: Ord> ArrangedView<K> {
    /// The consolidated snapshot.
    pub fn batch(&self) -> &Batch<K> {
        &self.snapshot
    }

    /// The weight of `key` in the snapshot.
    pub fn get(&self, key: &K) -> Weight {
        self.snapshot.get(key)
    }
}

/// A Z-set that migrates between representations as it grows.
#[derive(Clone, Debug)]
pub struct AdaptiveZSet<K> {
    small: SmallVec<[(K, Weight); 16]>,
    fast: super::fast::FastZSet<K>,
    spine: Trace<K>,
    last_flush: Instant,
    config: AdaptiveConfig,
    registry: ArrangementRegistry,
}

impl<K: Ord + std::hash::Hash + Clone> Default for AdaptiveZSet<K> {
    fn default() -> Self {
        AdaptiveZSet::new(AdaptiveConfig::default())
    }
}

impl<K: Ord + std::hash::Hash + Clone> AdaptiveZSet<K> {
    /// An empty set with the given tuning.
    pub fn new(config: AdaptiveConfig) -> Self {
        AdaptiveZSet {
            small: SmallVec::new(),
            fast: super::fast::FastZSet::new(),
            spine: Trace::new(config.trace),
            last_flush: Instant::now(),
            config,
            registry: ArrangementRegistry::default(),
        }
    }

    /// A handle onto this set's subscriber registry.
    pub fn registry(&self) -> ArrangementRegistry {
        self.registry.clone()
    }

    /// Total entries across all three layers.
    ///
    /// An upper bound on the number of distinct keys: layers may hold
    /// entries for the same key.
    pub fn layered_len(&self) -> usize {
        self.small.len() + self.fast.len() + self.spine.update_count()
    }

    /// True when every layer is structurally empty.
    pub fn layers_empty(&self) -> bool {
        self.small.is_empty() && self.fast.is_empty() && self.spine.num_batches() == 0
    }

    /// Adds `weight` to `key`.
    pub fn insert_with_weight(&mut self, key: K, weight: Weight) {
        if weight.is_zero() {
            return;
        }
        if self.layered_len() < self.config.small_limit {
            match self.small.binary_search_by(|(k, _)| k.cmp(&key)) {
                Ok(index) => {
                    self.small[index].1.plus_equals(&weight);
                    if self.small[index].1.is_zero() {
                        self.small.remove(index);
                    }
                }
                Err(index) => self.small.insert(index, (key, weight)),
            }
        } else {
            self.fast.insert_with_weight(key, weight);
        }
        self.maybe_flush();
    }

    /// The accumulated weight of `key`: small, then memtable, then spine.
    pub fn get(&self, key: &K) -> Weight {
        let mut accum = match self.small.binary_search_by(|(k, _)| k.cmp(key)) {
            Ok(index) => self.small[index].1,
            Err(_) => 0,
        };
        accum.plus_equals(&self.fast.get(key));
        accum.plus_equals(&self.spine.get(key));
        accum
    }

    fn thresholds(&self) -> (usize, Duration) {
        // Outstanding arranged views want low-latency visibility.
        if self.registry.subscriber_count() > 0 {
            (self.config.flush_size / 4, self.config.flush_interval / 4)
        } else {
            (self.config.flush_size, self.config.flush_interval)
        }
    }

    fn maybe_flush(&mut self) {
        let (size_limit, interval) = self.thresholds();
        let overlay = self.small.len() + self.fast.len();
        if overlay > 0 && (overlay >= size_limit || self.last_flush.elapsed() >= interval) {
            self.flush();
        }
    }

    /// Freezes the overlay into the spine.
    pub fn flush(&mut self) {
        let mut pending: Vec<(K, Weight)> = self.small.drain(..).collect();
        pending.extend(self.fast.drain_pairs());
        self.last_flush = Instant::now();
        if pending.is_empty() {
            return;
        }
        tracing::trace!(updates = pending.len(), "adaptive overlay flush");
        self.spine.insert(Batch::from_unsorted(pending));
    }

    /// Runs a maintenance pass: flush the overlay, compact the spine.
    pub fn maintain(&mut self) {
        self.flush();
        self.spine.maintain();
    }

    /// Flushes and returns a consolidated read-mostly snapshot.
    pub fn arrange(&mut self) -> ArrangedView<K> {
        self.flush();
        self.spine.compact();
        ArrangedView { snapshot: self.spine.consolidated(), _token: self.registry.subscribe() }
    }

    /// The consolidated `(key, weight)` pairs in key order.
    ///
    /// Overlay layers are merged with the spine through consolidation, so a
    /// key split across layers surfaces once with its accumulated weight.
    pub fn pairs(&self) -> Vec<(K, Weight)> {
        let mut pairs: Vec<(K, Weight)> = self.small.iter().cloned().collect();
        pairs.extend(self.fast.to_pairs());
        pairs.extend(self.spine.pairs());
        consolidation::consolidate(&mut pairs);
        pairs
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.small.clear();
        self.fast.drain_pairs();
        self.spine = Trace::new(self.config.trace);
        self.last_flush = Instant::now();
    }
}

impl<K: Ord + std::hash::Hash + Clone> IsZero for AdaptiveZSet<K> {
    fn is_zero(&self) -> bool {
        self.layers_empty() || self.pairs().is_empty()
    }
}

impl<K: Ord + std::hash::Hash + Clone> Semigroup for AdaptiveZSet<K> {
    fn plus_equals(&mut self, rhs: &Self) {
        // The frozen spines union directly; the overlay replays as inserts.
        self.spine.plus_equals(&rhs.spine);
        for (key, weight) in rhs.small.iter() {
            self.insert_with_weight(key.clone(), *weight);
        }
        for (key, weight) in rhs.fast.iter() {
            self.insert_with_weight(key.clone(), weight);
        }
    }
}

impl<K: Ord + std::hash::Hash + Clone> Monoid for AdaptiveZSet<K> {
    fn zero() -> Self {
        AdaptiveZSet::default()
    }
}

impl<K: Ord + std::hash::Hash + Clone> Abelian for AdaptiveZSet<K> {
    fn negate(&mut self) {
        for (_, weight) in self.small.iter_mut() {
            weight.negate();
        }
        self.fast.negate();
        self.spine.negate();
    }
}

impl<K: Ord + std::hash::Hash + Clone> Scale for AdaptiveZSet<K> {
    fn scale(&mut self, factor: Weight) {
        if factor == 0 {
            self.clear();
            return;
        }
        for (_, weight) in self.small.iter_mut() {
            weight.scale(factor);
        }
        self.fast.scale(factor);
        self.spine.scale(factor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> AdaptiveConfig {
        AdaptiveConfig {
            small_limit: 4,
            flush_size: 8,
            flush_interval: Duration::from_secs(3600),
            trace: TraceConfig::default(),
        }
    }

    #[test]
    fn small_vector_stays_sorted_and_cancels() {
        let mut set = AdaptiveZSet::new(tiny_config());
        set.insert_with_weight(3u64, 1);
        set.insert_with_weight(1, 2);
        set.insert_with_weight(2, -1);
        set.insert_with_weight(1, -2);
        assert_eq!(set.pairs(), vec![(2, -1), (3, 1)]);
    }

    #[test]
    fn growth_spills_to_memtable_then_spine() {
        let mut set = AdaptiveZSet::new(tiny_config());
        for i in 0..20u64 {
            set.insert_with_weight(i, 1);
        }
        // Past `small_limit` the memtable absorbs inserts; past `flush_size`
        // the overlay freezes into the spine.
        assert!(set.spine.update_count() > 0);
        for i in 0..20u64 {
            assert_eq!(set.get(&i), 1);
        }
        assert_eq!(set.pairs().len(), 20);
    }

    #[test]
    fn lookups_sum_across_layers() {
        let mut set = AdaptiveZSet::new(tiny_config());
        for i in 0..12u64 {
            set.insert_with_weight(i, 1);
        }
        set.flush();
        // Same key again lands in the overlay while the spine holds the rest.
        set.insert_with_weight(3, 5);
        assert_eq!(set.get(&3), 6);
        let pairs = set.pairs();
        assert!(pairs.contains(&(3, 6)));
    }

    #[test]
    fn arranged_views_tighten_thresholds() {
        let mut set = AdaptiveZSet::new(AdaptiveConfig {
            small_limit: 2,
            flush_size: 16,
            flush_interval: Duration::from_secs(3600),
            trace: TraceConfig::default(),
        });
        for i in 0..3u64 {
            set.insert_with_weight(i, 1);
        }
        let view = set.arrange();
        assert_eq!(view.get(&0), 1);
        assert_eq!(set.registry().subscriber_count(), 1);

        // Tightened size threshold is 16/4 = 4: these inserts flush on their own.
        for i in 10..20u64 {
            set.insert_with_weight(i, 1);
        }
        assert!(set.small.len() + set.fast.len() < 10);

        // The view is a stable snapshot, blind to later inserts.
        assert_eq!(view.get(&10), 0);

        drop(view);
        assert_eq!(set.registry().subscriber_count(), 0);
    }

    #[test]
    fn addition_of_adaptive_sets() {
        let mut a = AdaptiveZSet::new(tiny_config());
        let mut b = AdaptiveZSet::new(tiny_config());
        for i in 0..10u64 {
            a.insert_with_weight(i, 1);
            b.insert_with_weight(i, -1);
        }
        b.insert_with_weight(42, 7);
        a.plus_equals(&b);
        assert_eq!(a.pairs(), vec![(42, 7)]);
    }

    #[test]
    fn scale_zero_empties() {
        let mut set = AdaptiveZSet::new(tiny_config());
        for i in 0..10u64 {
            set.insert_with_weight(i, 2);
        }
        set.scale(0);
        assert!(set.is_zero());
    }
}
