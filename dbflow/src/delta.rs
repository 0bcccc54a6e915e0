//! Typed helpers for constructing update Z-sets.
//!
//! A delta is an ordinary Z-set read as an instruction: positive weights
//! insert, negative weights delete. The [`DeltaBuilder`] assembles one from
//! intent-named operations, so call sites read as what they change rather
//! than as weight arithmetic.

use std::hash::Hash;

use crate::algebra::Weight;
use crate::zset::{ZSet, ZSetConfig};

/// Accumulates insertions, deletions, and moves into a single delta.
#[derive(Clone, Debug, Default)]
pub struct DeltaBuilder<K> {
    updates: Vec<(K, Weight)>,
}

impl<K: Ord + Hash + Clone> DeltaBuilder<K> {
    /// An empty builder.
    pub fn new() -> Self {
        DeltaBuilder { updates: Vec::new() }
    }

    /// Records the insertion of one instance of `key`.
    pub fn insert(mut self, key: K) -> Self {
        self.updates.push((key, 1));
        self
    }

    /// Records insertions for every key in `keys`.
    pub fn insert_many<I: IntoIterator<Item = K>>(mut self, keys: I) -> Self {
        self.updates.extend(keys.into_iter().map(|k| (k, 1)));
        self
    }

    /// Records the deletion of one instance of `key`.
    pub fn delete(mut self, key: K) -> Self {
        self.updates.push((key, -1));
        self
    }

    /// Records deletions for every key in `keys`.
    pub fn delete_many<I: IntoIterator<Item = K>>(mut self, keys: I) -> Self {
        self.updates.extend(keys.into_iter().map(|k| (k, -1)));
        self
    }

    /// Records a move: delete `from`, insert `to`.
    pub fn move_between(self, from: K, to: K) -> Self {
        self.delete(from).insert(to)
    }

    /// Records `weight` instances of `key` directly.
    pub fn with_weight(mut self, key: K, weight: Weight) -> Self {
        self.updates.push((key, weight));
        self
    }

    /// Finishes into a Z-set with the default representation.
    pub fn build(self) -> ZSet<K> {
        ZSet::from_pairs(self.updates)
    }

    /// Finishes into a Z-set with an explicit configuration.
    pub fn build_with(self, config: ZSetConfig) -> ZSet<K> {
        ZSet::from_pairs_with(config, self.updates)
    }
}
