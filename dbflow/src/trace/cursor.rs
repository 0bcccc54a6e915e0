//! Cursors over sorted batches, and a generic merging cursor.
//!
//! A cursor is a positioned reader over key-ordered updates. The
//! [`CursorList`] merges multiple cursors by tracking the indices of cursors
//! positioned at the minimum key. It performs no clever management of that
//! set otherwise: stepping advances every minimal cursor and re-derives the
//! set by a linear scan.

use crate::algebra::{IsZero, Semigroup, Weight};
use crate::trace::Batch;

/// A positioned reader over one sorted batch.
#[derive(Debug)]
pub struct BatchCursor<'a, K> {
    updates: &'a [(K, Weight)],
    pos: usize,
}

impl<'a, K: Ord> BatchCursor<'a, K> {
    /// Creates a cursor positioned at the first update of `batch`.
    pub fn new(batch: &'a Batch<K>) -> Self {
        BatchCursor { updates: batch.updates(), pos: 0 }
    }

    /// True while the cursor references a valid update.
    #[inline]
    pub fn key_valid(&self) -> bool {
        self.pos < self.updates.len()
    }

    /// The key the cursor currently references.
    #[inline]
    pub fn key(&self) -> &'a K {
        &self.updates[self.pos].0
    }

    /// The key, or `None` once the cursor is exhausted.
    #[inline]
    pub fn get_key(&self) -> Option<&'a K> {
        self.updates.get(self.pos).map(|(k, _)| k)
    }

    /// The weight associated with the current key.
    #[inline]
    pub fn weight(&self) -> Weight {
        self.updates[self.pos].1
    }

    /// Advances the cursor by one update.
    #[inline]
    pub fn step(&mut self) {
        self.pos += 1;
    }

    /// Advances the cursor to the first key greater or equal to `key`.
    pub fn seek(&mut self, key: &K) {
        let remaining = &self.updates[self.pos..];
        self.pos += remaining.partition_point(|(k, _)| k < key);
    }
}

/// Provides a merged view over a list of cursors.
///
/// The `CursorList` tracks the indices of cursors with the minimum key.
/// Reading the current key accumulates the weights of all minimal cursors,
/// so duplicated keys across batches surface exactly once.
#[derive(Debug)]
pub struct CursorList<'a, K> {
    cursors: Vec<BatchCursor<'a, K>>,
    min_key: Vec<usize>,
}

impl<'a, K: Ord> CursorList<'a, K> {
    /// Creates a new cursor list from pre-existing cursors.
    pub fn new(cursors: Vec<BatchCursor<'a, K>>) -> Self {
        let mut result = CursorList { cursors, min_key: Vec::new() };
        result.minimize_keys();
        result
    }

    /// Re-derives `min_key`: the indices of cursors with the minimum key.
    ///
    /// Scans the current key of each cursor, tracking indices whose key
    /// equals the minimum valid key seen so far; an improved key clears the
    /// list and continues.
    fn minimize_keys(&mut self) {
        self.min_key.clear();

        let mut iter = self
            .cursors
            .iter()
            .enumerate()
            .flat_map(|(idx, cur)| cur.get_key().map(|key| (idx, key)));
        if let Some((idx, key)) = iter.next() {
            let mut min_key = key;
            self.min_key.push(idx);
            for (idx, key) in iter {
                match key.cmp(min_key) {
                    std::cmp::Ordering::Less => {
                        self.min_key.clear();
                        self.min_key.push(idx);
                        min_key = key;
                    }
                    std::cmp::Ordering::Equal => {
                        self.min_key.push(idx);
                    }
                    std::cmp::Ordering::Greater => {}
                }
            }
        }
    }

    /// True while any cursor still references a valid key.
    #[inline]
    pub fn key_valid(&self) -> bool {
        !self.min_key.is_empty()
    }

    /// The minimum key across all cursors.
    #[inline]
    pub fn key(&self) -> &'a K {
        debug_assert!(self.key_valid());
        self.cursors[self.min_key[0]].key()
    }

    /// The accumulated weight of the minimum key across all minimal cursors.
    pub fn weight(&self) -> Weight {
        let mut accum: Weight = 0;
        for &index in self.min_key.iter() {
            accum.plus_equals(&self.cursors[index].weight());
        }
        accum
    }

    /// Advances every minimal cursor past the current key.
    pub fn step(&mut self) {
        for &index in self.min_key.iter() {
            self.cursors[index].step();
        }
        self.minimize_keys();
    }

    /// Advances all cursors to the first key greater or equal to `key`.
    pub fn seek(&mut self, key: &K) {
        for cursor in self.cursors.iter_mut() {
            cursor.seek(key);
        }
        self.minimize_keys();
    }

    /// Drains the merged sequence into owned, consolidated pairs.
    pub fn drain_into(mut self, output: &mut Vec<(K, Weight)>)
    where
        K: Clone,
    {
        while self.key_valid() {
            let weight = self.weight();
            if !weight.is_zero() {
                output.push((self.key().clone(), weight));
            }
            self.step();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::Batch;

    #[test]
    fn cursor_walks_in_order() {
        let batch = Batch::from_unsorted(vec![(3, 1), (1, 2), (2, -1)]);
        let mut cursor = BatchCursor::new(&batch);
        let mut seen = Vec::new();
        while cursor.key_valid() {
            seen.push((*cursor.key(), cursor.weight()));
            cursor.step();
        }
        assert_eq!(seen, vec![(1, 2), (2, -1), (3, 1)]);
    }

    #[test]
    fn cursor_seeks_lower_bound() {
        let batch = Batch::from_unsorted(vec![(10, 1), (20, 1), (30, 1)]);
        let mut cursor = BatchCursor::new(&batch);
        cursor.seek(&15);
        assert_eq!(cursor.key(), &20);
        cursor.seek(&31);
        assert!(!cursor.key_valid());
    }

    #[test]
    fn cursor_list_accumulates_and_cancels() {
        let a = Batch::from_unsorted(vec![(1, 2), (2, -1)]);
        let b = Batch::from_unsorted(vec![(2, 1), (3, 3)]);
        let list = CursorList::new(vec![BatchCursor::new(&a), BatchCursor::new(&b)]);
        let mut merged = Vec::new();
        list.drain_into(&mut merged);
        assert_eq!(merged, vec![(1, 2), (3, 3)]);
    }
}
