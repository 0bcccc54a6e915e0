//! Z-sets: finite maps from elements to non-zero integer weights.
//!
//! A Z-set is the universal container of change in this crate. Positive
//! weights insert, negative weights delete, and addition of Z-sets composes
//! updates; the structure is an abelian group, which is what makes delta
//! propagation compositional.
//!
//! [`ZSet`] is a facade over four representations, chosen at construction:
//!
//! * [`Backend::Hash`] — a hash map; the default.
//! * [`Backend::Fast`] — an open-addressed Robin-Hood table.
//! * [`Backend::Batch`] — a layered trace of sorted runs.
//! * [`Backend::Adaptive`] — inline vector + memtable + trace spine,
//!   migrating between them by size and time thresholds.
//!
//! Whatever the representation, enumeration yields consolidated pairs in key
//! order and never surfaces a zero weight, and equality is multiset equality
//! of the consolidated form.

pub mod adaptive;
pub mod fast;
pub mod hash;

pub use adaptive::{AdaptiveConfig, AdaptiveZSet, ArrangedView, ArrangementRegistry};
pub use fast::FastZSet;
pub use hash::HashZSet;

use std::hash::Hash;

use crate::algebra::{Abelian, IsZero, Monoid, Scale, Semigroup, Weight};
use crate::trace::{Batch, Trace};

/// The available Z-set representations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Backend {
    /// Hash map from key to weight.
    #[default]
    Hash,
    /// Open-addressed Robin-Hood table.
    Fast,
    /// Layered trace of sorted batches.
    Batch,
    /// Small-vector / memtable / spine composite.
    Adaptive,
}

/// Construction-time configuration for [`ZSet`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ZSetConfig {
    /// Which representation to use.
    pub backend: Backend,
    /// Tuning for the adaptive representation.
    pub adaptive: AdaptiveConfig,
}

#[derive(Clone, Debug)]
enum Repr<K> {
    Hash(HashZSet<K>),
    Fast(FastZSet<K>),
    Batch(Trace<K>),
    Adaptive(AdaptiveZSet<K>),
}

/// A finite signed multiset over `K`.
#[derive(Clone, Debug)]
pub struct ZSet<K> {
    repr: Repr<K>,
}

impl<K: Ord + Hash + Clone> Default for ZSet<K> {
    fn default() -> Self {
        ZSet::new()
    }
}

impl<K: Ord + Hash + Clone> ZSet<K> {
    /// An empty Z-set with the default (`Hash`) representation.
    pub fn new() -> Self {
        ZSet::with_config(ZSetConfig::default())
    }

    /// An empty Z-set with the given representation.
    pub fn with_backend(backend: Backend) -> Self {
        ZSet::with_config(ZSetConfig { backend, ..ZSetConfig::default() })
    }

    /// An empty Z-set configured explicitly.
    pub fn with_config(config: ZSetConfig) -> Self {
        let repr = match config.backend {
            Backend::Hash => Repr::Hash(HashZSet::new()),
            Backend::Fast => Repr::Fast(FastZSet::new()),
            Backend::Batch => Repr::Batch(Trace::new(config.adaptive.trace)),
            Backend::Adaptive => Repr::Adaptive(AdaptiveZSet::new(config.adaptive)),
        };
        ZSet { repr }
    }

    /// Builds a Z-set from weighted pairs, default representation.
    pub fn from_pairs<I: IntoIterator<Item = (K, Weight)>>(pairs: I) -> Self {
        let mut set = ZSet::new();
        set.extend(pairs);
        set
    }

    /// Builds a Z-set from weighted pairs with an explicit configuration.
    pub fn from_pairs_with<I: IntoIterator<Item = (K, Weight)>>(config: ZSetConfig, pairs: I) -> Self {
        let mut set = ZSet::with_config(config);
        set.extend(pairs);
        set
    }

    /// The representation tag.
    pub fn backend(&self) -> Backend {
        match &self.repr {
            Repr::Hash(_) => Backend::Hash,
            Repr::Fast(_) => Backend::Fast,
            Repr::Batch(_) => Backend::Batch,
            Repr::Adaptive(_) => Backend::Adaptive,
        }
    }

    /// Adds one instance of `key`.
    pub fn insert(&mut self, key: K) {
        self.insert_with_weight(key, 1);
    }

    /// Removes one instance of `key` (adds weight −1).
    pub fn remove(&mut self, key: K) {
        self.insert_with_weight(key, -1);
    }

    /// Adds `weight` instances of `key`; entries reaching zero vanish.
    pub fn insert_with_weight(&mut self, key: K, weight: Weight) {
        match &mut self.repr {
            Repr::Hash(set) => set.insert_with_weight(key, weight),
            Repr::Fast(set) => set.insert_with_weight(key, weight),
            Repr::Batch(trace) => {
                if !weight.is_zero() {
                    trace.insert(Batch::from_consolidated(vec![(key, weight)]));
                }
            }
            Repr::Adaptive(set) => set.insert_with_weight(key, weight),
        }
    }

    /// Adds all of `pairs`.
    pub fn extend<I: IntoIterator<Item = (K, Weight)>>(&mut self, pairs: I) {
        match &mut self.repr {
            Repr::Batch(trace) => {
                let batch = Batch::from_unsorted(pairs.into_iter().collect());
                trace.insert(batch);
            }
            _ => {
                for (key, weight) in pairs {
                    self.insert_with_weight(key, weight);
                }
            }
        }
    }

    /// The weight of `key`, zero when absent.
    pub fn weight_of(&self, key: &K) -> Weight {
        match &self.repr {
            Repr::Hash(set) => set.get(key),
            Repr::Fast(set) => set.get(key),
            Repr::Batch(trace) => trace.get(key),
            Repr::Adaptive(set) => set.get(key),
        }
    }

    /// True when `key` carries non-zero weight.
    pub fn contains(&self, key: &K) -> bool {
        !self.weight_of(key).is_zero()
    }

    /// The number of distinct keys with non-zero weight.
    ///
    /// Constant-time for the hash representations; the layered
    /// representations consolidate first.
    pub fn distinct_count(&self) -> usize {
        match &self.repr {
            Repr::Hash(set) => set.len(),
            Repr::Fast(set) => set.len(),
            Repr::Batch(trace) => trace.consolidated().len(),
            Repr::Adaptive(set) => set.pairs().len(),
        }
    }

    /// True when the set consolidates to nothing.
    pub fn is_empty(&self) -> bool {
        match &self.repr {
            Repr::Hash(set) => set.is_empty(),
            Repr::Fast(set) => set.is_empty(),
            Repr::Batch(trace) => trace.is_empty(),
            Repr::Adaptive(set) => set.is_zero(),
        }
    }

    /// The consolidated `(key, weight)` pairs in key order.
    pub fn pairs(&self) -> Vec<(K, Weight)> {
        match &self.repr {
            Repr::Hash(set) => {
                let mut pairs = set.to_pairs();
                pairs.sort_by(|a, b| a.0.cmp(&b.0));
                pairs
            }
            Repr::Fast(set) => {
                let mut pairs = set.to_pairs();
                pairs.sort_by(|a, b| a.0.cmp(&b.0));
                pairs
            }
            Repr::Batch(trace) => trace.pairs(),
            Repr::Adaptive(set) => set.pairs(),
        }
    }

    /// Folds over the consolidated pairs in key order.
    pub fn fold<A, F: FnMut(A, &K, Weight) -> A>(&self, init: A, mut fold: F) -> A {
        let mut accum = init;
        for (key, weight) in self.pairs().iter() {
            accum = fold(accum, key, *weight);
        }
        accum
    }

    /// Retains the keys satisfying `predicate`, preserving the backend.
    pub fn filter<P: Fn(&K) -> bool>(&self, predicate: P) -> Self {
        let mut output = ZSet::with_backend(self.backend());
        output.extend(self.pairs().into_iter().filter(|(k, _)| predicate(k)));
        output
    }

    /// Maps keys through `transform`, consolidating collisions.
    pub fn map<K2: Ord + Hash + Clone, F: Fn(&K) -> K2>(&self, transform: F) -> ZSet<K2> {
        let mut output = ZSet::with_backend(self.backend());
        output.extend(self.pairs().into_iter().map(|(k, w)| (transform(&k), w)));
        output
    }

    /// The sum of `self` and `rhs` as a new set.
    pub fn added(&self, rhs: &Self) -> Self {
        let mut sum = self.clone();
        sum.plus_equals(rhs);
        sum
    }

    /// The difference `self − rhs` as a new set.
    pub fn difference(&self, rhs: &Self) -> Self {
        let mut diff = self.clone();
        diff.minus_equals(rhs);
        diff
    }

    /// Renders the set as a trace, whatever its representation.
    pub fn to_trace(&self) -> Trace<K> {
        match &self.repr {
            Repr::Batch(trace) => trace.clone(),
            _ => {
                let mut trace = Trace::default();
                trace.insert(Batch::from_consolidated(self.pairs()));
                trace
            }
        }
    }

    /// Runs a maintenance pass on representations that benefit from one.
    pub fn maintain(&mut self) {
        match &mut self.repr {
            Repr::Batch(trace) => trace.maintain(),
            Repr::Adaptive(set) => set.maintain(),
            _ => {}
        }
    }

    /// For the adaptive representation: a consolidated read-mostly snapshot.
    ///
    /// Returns `None` for other representations.
    pub fn arrange(&mut self) -> Option<ArrangedView<K>> {
        match &mut self.repr {
            Repr::Adaptive(set) => Some(set.arrange()),
            _ => None,
        }
    }
}

impl<K: Ord + Hash + Clone> IsZero for ZSet<K> {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<K: Ord + Hash + Clone> Semigroup for ZSet<K> {
    fn plus_equals(&mut self, rhs: &Self) {
        match (&mut self.repr, &rhs.repr) {
            (Repr::Hash(lhs), Repr::Hash(rhs)) => lhs.plus_equals(rhs),
            (Repr::Fast(lhs), Repr::Fast(rhs)) => lhs.plus_equals(rhs),
            (Repr::Batch(lhs), Repr::Batch(rhs)) => lhs.plus_equals(rhs),
            (Repr::Adaptive(lhs), Repr::Adaptive(rhs)) => lhs.plus_equals(rhs),
            // Mixed representations normalize through traces.
            _ => {
                let mut merged = self.to_trace();
                merged.plus_equals(&rhs.to_trace());
                self.repr = Repr::Batch(merged);
            }
        }
    }
}

impl<K: Ord + Hash + Clone> Monoid for ZSet<K> {
    fn zero() -> Self {
        ZSet::new()
    }
}

impl<K: Ord + Hash + Clone> Abelian for ZSet<K> {
    fn negate(&mut self) {
        match &mut self.repr {
            Repr::Hash(set) => set.negate(),
            Repr::Fast(set) => set.negate(),
            Repr::Batch(trace) => trace.negate(),
            Repr::Adaptive(set) => set.negate(),
        }
    }
}

impl<K: Ord + Hash + Clone> Scale for ZSet<K> {
    fn scale(&mut self, factor: Weight) {
        match &mut self.repr {
            Repr::Hash(set) => set.scale(factor),
            Repr::Fast(set) => set.scale(factor),
            Repr::Batch(trace) => trace.scale(factor),
            Repr::Adaptive(set) => set.scale(factor),
        }
    }
}

impl<K: Ord + Hash + Clone> PartialEq for ZSet<K> {
    fn eq(&self, other: &Self) -> bool {
        self.pairs() == other.pairs()
    }
}

impl<K: Ord + Hash + Clone> Eq for ZSet<K> {}

impl<K: Ord + Hash + Clone> Hash for ZSet<K> {
    /// Hashes a bounded sample: the first consolidated pairs in key order.
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        for (key, weight) in self.pairs().iter().take(8) {
            key.hash(state);
            weight.hash(state);
        }
    }
}

impl<K: Ord + Hash + Clone> FromIterator<(K, Weight)> for ZSet<K> {
    fn from_iter<I: IntoIterator<Item = (K, Weight)>>(iter: I) -> Self {
        ZSet::from_pairs(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_BACKENDS: [Backend; 4] =
        [Backend::Hash, Backend::Fast, Backend::Batch, Backend::Adaptive];

    fn sample(backend: Backend, pairs: &[(u64, Weight)]) -> ZSet<u64> {
        let mut set = ZSet::with_backend(backend);
        set.extend(pairs.iter().copied());
        set
    }

    #[test]
    fn group_laws_all_backends() {
        for backend in ALL_BACKENDS {
            let a = sample(backend, &[(1, 2), (2, -1)]);
            let b = sample(backend, &[(2, 1), (3, 3)]);
            let c = sample(backend, &[(1, 5)]);

            // Commutativity.
            assert_eq!(a.added(&b), b.added(&a), "{backend:?}");
            // Associativity.
            assert_eq!(a.added(&b).added(&c), a.added(&b.added(&c)), "{backend:?}");
            // Identity.
            assert_eq!(a.added(&ZSet::with_backend(backend)), a, "{backend:?}");
            // Inverses.
            assert!(a.added(&a.clone().negated()).is_empty(), "{backend:?}");
            // Involution.
            assert_eq!(a.clone().negated().negated(), a, "{backend:?}");
        }
    }

    #[test]
    fn scalar_laws_all_backends() {
        for backend in ALL_BACKENDS {
            let a = sample(backend, &[(1, 2), (2, -1)]);
            let b = sample(backend, &[(2, 4)]);

            let mut one = a.clone();
            one.scale(1);
            assert_eq!(one, a, "{backend:?}");

            let mut zero = a.clone();
            zero.scale(0);
            assert!(zero.is_empty(), "{backend:?}");

            let mut st = a.clone();
            st.scale(6);
            let mut s_then_t = a.clone();
            s_then_t.scale(2);
            s_then_t.scale(3);
            assert_eq!(st, s_then_t, "{backend:?}");

            let mut sum_scaled = a.added(&b);
            sum_scaled.scale(5);
            let mut a5 = a.clone();
            a5.scale(5);
            let mut b5 = b.clone();
            b5.scale(5);
            assert_eq!(sum_scaled, a5.added(&b5), "{backend:?}");
        }
    }

    #[test]
    fn literal_group_scenario() {
        let a = ZSet::from_pairs(vec![(1, 2), (2, -1)]);
        let b = ZSet::from_pairs(vec![(2, 1), (3, 3)]);
        assert_eq!(a.added(&b).pairs(), vec![(1, 2), (3, 3)]);
        assert!(a.added(&a.clone().negated()).pairs().is_empty());
    }

    #[test]
    fn no_zero_weights_enumerated() {
        for backend in ALL_BACKENDS {
            let set = sample(backend, &[(1, 1), (1, -1), (2, 3), (2, -3), (3, 4)]);
            let pairs = set.pairs();
            assert!(pairs.iter().all(|(_, w)| *w != 0), "{backend:?}");
            assert_eq!(pairs, vec![(3, 4)], "{backend:?}");
        }
    }

    #[test]
    fn filter_map_fold() {
        for backend in ALL_BACKENDS {
            let set = sample(backend, &[(1, 1), (2, 2), (3, 3)]);
            assert_eq!(set.filter(|k| k % 2 == 1).pairs(), vec![(1, 1), (3, 3)], "{backend:?}");
            // Mapping may collide keys; weights accumulate.
            assert_eq!(set.map(|k| k % 2).pairs(), vec![(0, 2), (1, 4)], "{backend:?}");
            let total = set.fold(0, |accum, _, w| accum + w);
            assert_eq!(total, 6, "{backend:?}");
        }
    }

    #[test]
    fn mixed_backend_addition_normalizes() {
        let a = sample(Backend::Hash, &[(1, 1)]);
        let b = sample(Backend::Adaptive, &[(2, 2)]);
        let sum = a.added(&b);
        assert_eq!(sum.backend(), Backend::Batch);
        assert_eq!(sum.pairs(), vec![(1, 1), (2, 2)]);
    }

    #[test]
    fn insert_remove_round_trip() {
        for backend in ALL_BACKENDS {
            let mut set = ZSet::with_backend(backend);
            set.insert(9u64);
            set.insert(9);
            set.remove(9);
            assert_eq!(set.weight_of(&9), 1, "{backend:?}");
            set.remove(9);
            assert!(set.is_empty(), "{backend:?}");
        }
    }

    #[test]
    fn equality_is_multiset_equality() {
        let a = sample(Backend::Hash, &[(1, 1), (2, 2)]);
        let b = sample(Backend::Batch, &[(2, 2), (1, 1)]);
        assert_eq!(a.pairs(), b.pairs());
        // Same representation, different insertion orders.
        let c = sample(Backend::Fast, &[(2, 2), (1, 1)]);
        let d = sample(Backend::Fast, &[(1, 1), (2, 2)]);
        assert_eq!(c, d);
    }
}
