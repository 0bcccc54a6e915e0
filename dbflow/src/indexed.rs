//! Z-sets indexed by a key, the primitive behind joins and group-bys.
//!
//! An [`IndexedZSet`] maps an index key to a Z-set of payload values. The
//! index key admits total order (entries enumerate in key order); the inner
//! sets obey the usual Z-set discipline. Empty inner sets are dropped
//! eagerly, so the presence of a key always means non-trivial content.

use std::collections::BTreeMap;
use std::hash::Hash;

use crate::algebra::{Abelian, IsZero, Monoid, Scale, Semigroup, Weight};
use crate::zset::ZSet;

/// A mapping from index key to a Z-set of payloads.
#[derive(Clone, Debug, Default)]
pub struct IndexedZSet<K, V> {
    entries: BTreeMap<K, ZSet<V>>,
}

impl<K, V> PartialEq for IndexedZSet<K, V>
where
    K: Ord + Hash + Clone,
    V: Ord + Hash + Clone,
{
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<K, V> Eq for IndexedZSet<K, V>
where
    K: Ord + Hash + Clone,
    V: Ord + Hash + Clone,
{
}

impl<K, V> IndexedZSet<K, V>
where
    K: Ord + Hash + Clone,
    V: Ord + Hash + Clone,
{
    /// An empty indexed Z-set.
    pub fn new() -> Self {
        IndexedZSet { entries: BTreeMap::new() }
    }

    /// The number of index keys present.
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    /// True when no keys are present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The Z-set under `key`, if any.
    pub fn get(&self, key: &K) -> Option<&ZSet<V>> {
        self.entries.get(key)
    }

    /// Adds `weight` instances of `value` under `key`.
    pub fn insert_with_weight(&mut self, key: K, value: V, weight: Weight) {
        if weight.is_zero() {
            return;
        }
        let inner = self.entries.entry(key.clone()).or_default();
        inner.insert_with_weight(value, weight);
        if inner.is_empty() {
            self.entries.remove(&key);
        }
    }

    /// Groups a Z-set over pairs by the first component.
    pub fn from_zset(set: &ZSet<(K, V)>) -> Self
    where
        (K, V): Ord + Hash + Clone,
    {
        Self::group_by(set, |(k, v)| (k.clone(), v.clone()))
    }

    /// Groups an arbitrary Z-set by an index-key function.
    pub fn group_by<T, F>(set: &ZSet<T>, split: F) -> Self
    where
        T: Ord + Hash + Clone,
        F: Fn(&T) -> (K, V),
    {
        let mut output = IndexedZSet::new();
        for (element, weight) in set.pairs() {
            let (key, value) = split(&element);
            output.insert_with_weight(key, value, weight);
        }
        output
    }

    /// Flattens back into a Z-set over pairs. Inverse of [`Self::from_zset`].
    pub fn to_zset(&self) -> ZSet<(K, V)>
    where
        (K, V): Ord + Hash + Clone,
    {
        let mut output = ZSet::new();
        for (key, inner) in self.entries.iter() {
            for (value, weight) in inner.pairs() {
                output.insert_with_weight((key.clone(), value), weight);
            }
        }
        output
    }

    /// Inner join on the index key.
    ///
    /// For each key present on both sides, the output holds the Cartesian
    /// product of payloads with the product of their weights; keys whose
    /// product consolidates to nothing are dropped.
    pub fn join<V2>(&self, other: &IndexedZSet<K, V2>) -> IndexedZSet<K, (V, V2)>
    where
        V2: Ord + Hash + Clone,
        (V, V2): Ord + Hash + Clone,
    {
        let mut output = IndexedZSet::new();
        for (key, left) in self.entries.iter() {
            if let Some(right) = other.entries.get(key) {
                let right_pairs = right.pairs();
                for (lv, lw) in left.pairs() {
                    for (rv, rw) in right_pairs.iter() {
                        output.insert_with_weight(key.clone(), (lv.clone(), rv.clone()), lw * rw);
                    }
                }
            }
        }
        output
    }

    /// Retains the index keys satisfying `predicate`.
    pub fn filter_keys<P: Fn(&K) -> bool>(&self, predicate: P) -> Self {
        IndexedZSet {
            entries: self
                .entries
                .iter()
                .filter(|(k, _)| predicate(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Retains the payload values satisfying `predicate`.
    pub fn filter_values<P: Fn(&V) -> bool>(&self, predicate: P) -> Self {
        let mut output = IndexedZSet::new();
        for (key, inner) in self.entries.iter() {
            let filtered = inner.filter(&predicate);
            if !filtered.is_empty() {
                output.entries.insert(key.clone(), filtered);
            }
        }
        output
    }

    /// Maps index keys, accumulating inner sets on collision.
    pub fn map_keys<K2, F>(&self, transform: F) -> IndexedZSet<K2, V>
    where
        K2: Ord + Hash + Clone,
        F: Fn(&K) -> K2,
    {
        let mut output = IndexedZSet::new();
        for (key, inner) in self.entries.iter() {
            for (value, weight) in inner.pairs() {
                output.insert_with_weight(transform(key), value, weight);
            }
        }
        output
    }

    /// Iterates `(key, inner)` entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &ZSet<V>)> {
        self.entries.iter()
    }

    /// The sum of `self` and `rhs` as a new indexed set.
    pub fn added(&self, rhs: &Self) -> Self {
        let mut sum = self.clone();
        sum.plus_equals(rhs);
        sum
    }
}

impl<K, V> IsZero for IndexedZSet<K, V>
where
    K: Ord + Hash + Clone,
    V: Ord + Hash + Clone,
{
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<K, V> Semigroup for IndexedZSet<K, V>
where
    K: Ord + Hash + Clone,
    V: Ord + Hash + Clone,
{
    fn plus_equals(&mut self, rhs: &Self) {
        for (key, inner) in rhs.entries.iter() {
            for (value, weight) in inner.pairs() {
                self.insert_with_weight(key.clone(), value, weight);
            }
        }
    }
}

impl<K, V> Monoid for IndexedZSet<K, V>
where
    K: Ord + Hash + Clone,
    V: Ord + Hash + Clone,
{
    fn zero() -> Self {
        IndexedZSet::new()
    }
}

impl<K, V> Abelian for IndexedZSet<K, V>
where
    K: Ord + Hash + Clone,
    V: Ord + Hash + Clone,
{
    fn negate(&mut self) {
        for inner in self.entries.values_mut() {
            inner.negate();
        }
    }
}

impl<K, V> Scale for IndexedZSet<K, V>
where
    K: Ord + Hash + Clone,
    V: Ord + Hash + Clone,
{
    fn scale(&mut self, factor: Weight) {
        if factor == 0 {
            self.entries.clear();
        } else {
            for inner in self.entries.values_mut() {
                inner.scale(factor);
            }
        }
    }
}
