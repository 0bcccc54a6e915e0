//! The hash-map Z-set representation.
//!
//! A thin wrapper over an `FnvHashMap` from keys to non-zero weights. This is
//! the default backend: constant-time point updates and lookups, with scans
//! paying the usual hash-map iteration cost and no intrinsic ordering.

use fnv::FnvHashMap;
use std::hash::Hash;

use crate::algebra::{Abelian, IsZero, Monoid, Scale, Semigroup, Weight};

/// A Z-set stored as a hash map from key to weight.
#[derive(Clone, Debug, Default)]
pub struct HashZSet<K> {
    entries: FnvHashMap<K, Weight>,
}

impl<K: Hash + Eq + Clone> HashZSet<K> {
    /// An empty set.
    pub fn new() -> Self {
        HashZSet { entries: FnvHashMap::default() }
    }

    /// The number of distinct keys.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no keys are present.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds `weight` to `key`, removing the entry if the sum reaches zero.
    pub fn insert_with_weight(&mut self, key: K, weight: Weight) {
        if weight.is_zero() {
            return;
        }
        let entry = self.entries.entry(key);
        match entry {
            std::collections::hash_map::Entry::Occupied(mut occupied) => {
                occupied.get_mut().plus_equals(&weight);
                if occupied.get().is_zero() {
                    occupied.remove();
                }
            }
            std::collections::hash_map::Entry::Vacant(vacant) => {
                vacant.insert(weight);
            }
        }
    }

    /// The weight of `key`, zero when absent.
    #[inline]
    pub fn get(&self, key: &K) -> Weight {
        self.entries.get(key).copied().unwrap_or(0)
    }

    /// Iterates `(key, weight)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, Weight)> {
        self.entries.iter().map(|(k, w)| (k, *w))
    }

    /// Drains the entries into a vector of pairs.
    pub fn drain_pairs(&mut self) -> Vec<(K, Weight)> {
        self.entries.drain().collect()
    }

    /// Copies the entries into a vector of pairs.
    pub fn to_pairs(&self) -> Vec<(K, Weight)> {
        self.entries.iter().map(|(k, w)| (k.clone(), *w)).collect()
    }
}

impl<K: Hash + Eq + Clone> IsZero for HashZSet<K> {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<K: Hash + Eq + Clone> Semigroup for HashZSet<K> {
    fn plus_equals(&mut self, rhs: &Self) {
        for (key, weight) in rhs.iter() {
            self.insert_with_weight(key.clone(), weight);
        }
    }
}

impl<K: Hash + Eq + Clone> Monoid for HashZSet<K> {
    fn zero() -> Self {
        HashZSet::new()
    }
}

impl<K: Hash + Eq + Clone> Abelian for HashZSet<K> {
    fn negate(&mut self) {
        for weight in self.entries.values_mut() {
            weight.negate();
        }
    }
}

impl<K: Hash + Eq + Clone> Scale for HashZSet<K> {
    fn scale(&mut self, factor: Weight) {
        if factor == 0 {
            self.entries.clear();
        } else {
            for weight in self.entries.values_mut() {
                weight.scale(factor);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updates_cancel() {
        let mut set = HashZSet::new();
        set.insert_with_weight("a", 2);
        set.insert_with_weight("a", -2);
        assert!(set.is_empty());
        assert_eq!(set.get(&"a"), 0);
    }

    #[test]
    fn addition_merges() {
        let mut a = HashZSet::new();
        a.insert_with_weight(1, 2);
        a.insert_with_weight(2, -1);
        let mut b = HashZSet::new();
        b.insert_with_weight(2, 1);
        b.insert_with_weight(3, 3);
        a.plus_equals(&b);
        assert_eq!(a.get(&1), 2);
        assert_eq!(a.get(&2), 0);
        assert_eq!(a.get(&3), 3);
        assert_eq!(a.len(), 2);
    }
}
