//! Sorted batches of updates, layered into a log-structured trace.
//!
//! A [`Batch`] is an immutable, key-sorted, consolidated run of
//! `(key, weight)` updates: strictly increasing keys, no zero weights. A
//! [`Trace`] represents a Z-set as the multiset sum of an ordered list of
//! batches, in the manner of an LSM tree: insertion prepends a new level and
//! a time-budgeted maintenance pass merges the oldest levels pairwise so the
//! number of runs stays bounded without incurring latency spikes on any
//! single insertion.
//!
//! Enumerating a trace computes the k-way merge of its batches; the result is
//! memoized and invalidated by the next mutation.

pub mod cursor;

pub use cursor::{BatchCursor, CursorList};

use std::cell::RefCell;
use std::hash::Hash;
use std::time::{Duration, Instant};

use crate::algebra::{Abelian, IsZero, Monoid, Scale, Semigroup, Weight};
use crate::consolidation;

/// An immutable sorted run of `(key, weight)` updates.
///
/// Keys are strictly increasing and weights are non-zero; every constructor
/// establishes this canonical form.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Batch<K> {
    updates: Vec<(K, Weight)>,
}

impl<K: Ord> Batch<K> {
    /// The empty batch.
    pub fn empty() -> Self {
        Batch { updates: Vec::new() }
    }

    /// Builds a batch from updates already in canonical form.
    ///
    /// Callers must supply strictly key-ordered pairs with non-zero weights.
    pub fn from_consolidated(updates: Vec<(K, Weight)>) -> Self {
        debug_assert!(updates.windows(2).all(|w| w[0].0 < w[1].0));
        debug_assert!(updates.iter().all(|(_, w)| !w.is_zero()));
        Batch { updates }
    }

    /// The updates as a sorted slice.
    #[inline]
    pub fn updates(&self) -> &[(K, Weight)] {
        &self.updates
    }

    /// Surrenders the underlying sorted vector.
    #[inline]
    pub fn into_updates(self) -> Vec<(K, Weight)> {
        self.updates
    }

    /// The number of distinct keys in the batch.
    #[inline]
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    /// True when the batch holds no updates.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// The weight of `key`, zero when absent.
    pub fn get(&self, key: &K) -> Weight {
        match self.updates.binary_search_by(|(k, _)| k.cmp(key)) {
            Ok(index) => self.updates[index].1,
            Err(_) => 0,
        }
    }

    /// Iterates the updates in key order.
    pub fn iter(&self) -> impl Iterator<Item = &(K, Weight)> {
        self.updates.iter()
    }

    /// Linearly merges two sorted runs, summing weights and dropping zeros.
    pub fn merge(&self, other: &Self) -> Self
    where
        K: Clone,
    {
        let mut output = Vec::with_capacity(self.len() + other.len());
        let mut left = self.updates.iter().peekable();
        let mut right = other.updates.iter().peekable();

        while let (Some((lk, _)), Some((rk, _))) = (left.peek(), right.peek()) {
            match lk.cmp(rk) {
                std::cmp::Ordering::Less => output.push(left.next().unwrap().clone()),
                std::cmp::Ordering::Greater => output.push(right.next().unwrap().clone()),
                std::cmp::Ordering::Equal => {
                    let (key, lw) = left.next().unwrap();
                    let (_, rw) = right.next().unwrap();
                    let mut weight = *lw;
                    weight.plus_equals(rw);
                    if !weight.is_zero() {
                        output.push((key.clone(), weight));
                    }
                }
            }
        }
        output.extend(left.cloned());
        output.extend(right.cloned());

        Batch { updates: output }
    }
}

impl<K: Ord + Hash> Batch<K> {
    /// Builds a batch from unordered updates by sorting and consolidating.
    ///
    /// Inputs past the bucket-sort threshold partition by hash first.
    pub fn from_unsorted(mut updates: Vec<(K, Weight)>) -> Self {
        consolidation::consolidate_bucketed(&mut updates);
        Batch { updates }
    }
}

impl<K: Ord> IsZero for Batch<K> {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<K: Ord + Clone> Semigroup for Batch<K> {
    fn plus_equals(&mut self, rhs: &Self) {
        *self = self.merge(rhs);
    }
}

impl<K: Ord + Clone> Monoid for Batch<K> {
    fn zero() -> Self {
        Batch::empty()
    }
}

impl<K: Ord + Clone> Abelian for Batch<K> {
    fn negate(&mut self) {
        for (_, weight) in self.updates.iter_mut() {
            weight.negate();
        }
    }
}

impl<K: Ord + Clone> Scale for Batch<K> {
    fn scale(&mut self, factor: Weight) {
        if factor == 0 {
            self.updates.clear();
        } else {
            for (_, weight) in self.updates.iter_mut() {
                weight.scale(factor);
            }
        }
    }
}

/// Maintenance knobs for a [`Trace`].
#[derive(Clone, Copy, Debug)]
pub struct TraceConfig {
    /// Maximum number of batches tolerated before maintenance merges levels.
    pub max_batches: usize,
    /// Time budget for one maintenance pass.
    pub compaction_budget: Duration,
}

impl Default for TraceConfig {
    fn default() -> Self {
        TraceConfig { max_batches: 4, compaction_budget: Duration::from_millis(2) }
    }
}

/// An ordered list of batches representing a Z-set as their multiset sum.
///
/// Newer batches sit at the front. The consolidated view of the whole trace
/// is memoized in a cell and cleared by any mutation.
#[derive(Clone, Debug)]
pub struct Trace<K> {
    batches: Vec<Batch<K>>,
    merged: RefCell<Option<Batch<K>>>,
    config: TraceConfig,
}

impl<K: Ord + Clone> Default for Trace<K> {
    fn default() -> Self {
        Trace::new(TraceConfig::default())
    }
}

impl<K: Ord + Clone> Trace<K> {
    /// An empty trace with the given maintenance configuration.
    pub fn new(config: TraceConfig) -> Self {
        Trace { batches: Vec::new(), merged: RefCell::new(None), config }
    }

    /// The maintenance configuration.
    pub fn config(&self) -> TraceConfig {
        self.config
    }

    /// The number of batches currently layered in the trace.
    pub fn num_batches(&self) -> usize {
        self.batches.len()
    }

    /// The total number of updates across all batches.
    ///
    /// An upper bound on the number of distinct keys: batches may hold
    /// entries that cancel or accumulate across levels.
    pub fn update_count(&self) -> usize {
        self.batches.iter().map(Batch::len).sum()
    }

    /// True when the trace consolidates to nothing.
    pub fn is_empty(&self) -> bool {
        self.batches.iter().all(Batch::is_empty) || self.consolidated().is_empty()
    }

    /// Introduces a batch of updates to the trace.
    ///
    /// Empty batches are discarded. The insertion itself is a prepend; a
    /// budgeted maintenance pass follows.
    pub fn insert(&mut self, batch: Batch<K>) {
        if batch.is_empty() {
            return;
        }
        self.merged.replace(None);
        self.batches.insert(0, batch);
        self.maintain();
    }

    /// Merges the oldest batches pairwise while more than `max_batches`
    /// remain and the time budget has not elapsed.
    pub fn maintain(&mut self) {
        let start = Instant::now();
        let mut merges = 0usize;
        while self.batches.len() > self.config.max_batches.max(1)
            && start.elapsed() < self.config.compaction_budget
        {
            let oldest = self.batches.pop().expect("non-empty batch list");
            let older = self.batches.pop().expect("non-empty batch list");
            let merged = older.merge(&oldest);
            if !merged.is_empty() {
                self.batches.push(merged);
            }
            merges += 1;
        }
        if merges > 0 {
            self.merged.replace(None);
            tracing::trace!(merges, remaining = self.batches.len(), "trace maintenance pass");
        }
    }

    /// Fully consolidates the trace into at most one batch.
    pub fn compact(&mut self) {
        let merged = self.consolidated();
        self.batches.clear();
        if !merged.is_empty() {
            self.batches.push(merged.clone());
        }
        self.merged.replace(Some(merged));
    }

    /// The k-way merge of all batches, memoized until the next mutation.
    pub fn consolidated(&self) -> Batch<K> {
        if let Some(merged) = self.merged.borrow().as_ref() {
            return merged.clone();
        }
        let cursors = self.batches.iter().map(BatchCursor::new).collect();
        let mut output = Vec::new();
        CursorList::new(cursors).drain_into(&mut output);
        let merged = Batch::from_consolidated(output);
        self.merged.replace(Some(merged.clone()));
        merged
    }

    /// The consolidated updates in key order.
    pub fn pairs(&self) -> Vec<(K, Weight)> {
        self.consolidated().into_updates()
    }

    /// The accumulated weight of `key` across all batches.
    pub fn get(&self, key: &K) -> Weight {
        let mut accum: Weight = 0;
        for batch in self.batches.iter() {
            accum.plus_equals(&batch.get(key));
        }
        accum
    }

    /// Folds the consolidated updates in key order.
    pub fn fold<A, F: FnMut(A, &K, Weight) -> A>(&self, init: A, mut fold: F) -> A {
        let mut accum = init;
        for (key, weight) in self.consolidated().iter() {
            accum = fold(accum, key, *weight);
        }
        accum
    }
}

impl<K: Ord + Clone> IsZero for Trace<K> {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<K: Ord + Clone> Semigroup for Trace<K> {
    fn plus_equals(&mut self, rhs: &Self) {
        self.merged.replace(None);
        for batch in rhs.batches.iter().rev() {
            if !batch.is_empty() {
                self.batches.insert(0, batch.clone());
            }
        }
        self.maintain();
    }
}

impl<K: Ord + Clone> Monoid for Trace<K> {
    fn zero() -> Self {
        Trace::default()
    }
}

impl<K: Ord + Clone> Abelian for Trace<K> {
    fn negate(&mut self) {
        self.merged.replace(None);
        for batch in self.batches.iter_mut() {
            batch.negate();
        }
    }
}

impl<K: Ord + Clone> Scale for Trace<K> {
    fn scale(&mut self, factor: Weight) {
        self.merged.replace(None);
        if factor == 0 {
            self.batches.clear();
        } else {
            for batch in self.batches.iter_mut() {
                batch.scale(factor);
            }
        }
    }
}

impl<K: Ord + Clone> PartialEq for Trace<K> {
    fn eq(&self, other: &Self) -> bool {
        self.consolidated() == other.consolidated()
    }
}

impl<K: Ord + Clone> Eq for Trace<K> {}
