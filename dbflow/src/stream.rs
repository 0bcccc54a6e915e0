//! Streams: maps from logical time to values.
//!
//! A [`Stream`] is a lightweight, time-indexed container used where history
//! matters: one value per signed 64-bit timestamp, ordered by timestamp
//! alone. `integrate` turns a stream of deltas into a stream of accumulated
//! states; `delay` is the z⁻¹ of the DBSP literature, shifting every
//! timestamp by a fixed offset.

use std::collections::BTreeMap;

use crate::algebra::Semigroup;

/// A mapping from logical time to a value.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Stream<V> {
    values: BTreeMap<i64, V>,
}

impl<V> Stream<V> {
    /// An empty stream.
    pub fn new() -> Self {
        Stream { values: BTreeMap::new() }
    }

    /// Builds a stream from `(time, value)` pairs. Later pairs win on ties.
    pub fn from_pairs<I: IntoIterator<Item = (i64, V)>>(pairs: I) -> Self {
        Stream { values: pairs.into_iter().collect() }
    }

    /// The number of timestamps present.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when no timestamps are present.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sets the value at `time`, replacing any previous value.
    pub fn set(&mut self, time: i64, value: V) {
        self.values.insert(time, value);
    }

    /// The value at `time`, if any.
    pub fn get(&self, time: i64) -> Option<&V> {
        self.values.get(&time)
    }

    /// Iterates `(time, value)` pairs in ascending time order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, &V)> {
        self.values.iter().map(|(t, v)| (*t, v))
    }

    /// Combines two streams with `combine` at matching timestamps.
    ///
    /// Timestamps present on only one side are dropped, mirroring a join on
    /// time.
    pub fn combine<V2, O, F>(&self, other: &Stream<V2>, combine: F) -> Stream<O>
    where
        F: Fn(&V, &V2) -> O,
    {
        let mut output = Stream::new();
        for (time, value) in self.values.iter() {
            if let Some(rhs) = other.values.get(time) {
                output.set(*time, combine(value, rhs));
            }
        }
        output
    }

    /// Shifts every timestamp by `offset`.
    pub fn delay(&self, offset: i64) -> Self
    where
        V: Clone,
    {
        Stream {
            values: self.values.iter().map(|(t, v)| (t + offset, v.clone())).collect(),
        }
    }

    /// The running sum over time, in ascending order.
    ///
    /// The value at each timestamp becomes the accumulation of every value at
    /// that timestamp or earlier.
    pub fn integrate(&self) -> Self
    where
        V: Semigroup,
    {
        let mut output = Stream::new();
        let mut accum: Option<V> = None;
        for (time, value) in self.values.iter() {
            let next = match accum {
                Some(mut sum) => {
                    sum.plus_equals(value);
                    sum
                }
                None => value.clone(),
            };
            output.set(*time, next.clone());
            accum = Some(next);
        }
        output
    }

    /// Retains the timestamps satisfying `predicate`.
    pub fn filter_time<P: Fn(i64) -> bool>(&self, predicate: P) -> Self
    where
        V: Clone,
    {
        Stream {
            values: self
                .values
                .iter()
                .filter(|(t, _)| predicate(**t))
                .map(|(t, v)| (*t, v.clone()))
                .collect(),
        }
    }

    /// Retains the values satisfying `predicate`.
    pub fn filter<P: Fn(&V) -> bool>(&self, predicate: P) -> Self
    where
        V: Clone,
    {
        Stream {
            values: self
                .values
                .iter()
                .filter(|(_, v)| predicate(v))
                .map(|(t, v)| (*t, v.clone()))
                .collect(),
        }
    }

    /// Maps values, preserving timestamps.
    pub fn map<O, F: Fn(&V) -> O>(&self, transform: F) -> Stream<O> {
        Stream {
            values: self.values.iter().map(|(t, v)| (*t, transform(v))).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zset::ZSet;

    #[test]
    fn one_value_per_timestamp() {
        let mut stream = Stream::new();
        stream.set(1, "a");
        stream.set(1, "b");
        assert_eq!(stream.len(), 1);
        assert_eq!(stream.get(1), Some(&"b"));
    }

    #[test]
    fn integrate_accumulates_in_time_order() {
        let stream = Stream::from_pairs(vec![(3, 10i64), (1, 1), (2, 2)]);
        let integrated = stream.integrate();
        assert_eq!(integrated.get(1), Some(&1));
        assert_eq!(integrated.get(2), Some(&3));
        assert_eq!(integrated.get(3), Some(&13));
    }

    #[test]
    fn integrate_zset_deltas() {
        let mut deltas = Stream::new();
        deltas.set(1, ZSet::from_pairs(vec![("k", 1)]));
        deltas.set(2, ZSet::from_pairs(vec![("k", -1), ("j", 2)]));
        let states = deltas.integrate();
        assert_eq!(states.get(1).unwrap().pairs(), vec![("k", 1)]);
        assert_eq!(states.get(2).unwrap().pairs(), vec![("j", 2)]);
    }

    #[test]
    fn delay_shifts_timestamps() {
        let stream = Stream::from_pairs(vec![(0, 5), (1, 6)]);
        let delayed = stream.delay(1);
        assert_eq!(delayed.get(0), None);
        assert_eq!(delayed.get(1), Some(&5));
        assert_eq!(delayed.get(2), Some(&6));
    }

    #[test]
    fn combine_joins_on_time() {
        let a = Stream::from_pairs(vec![(1, 2), (2, 3)]);
        let b = Stream::from_pairs(vec![(2, 10), (3, 20)]);
        let sum = a.combine(&b, |x, y| x + y);
        assert_eq!(sum.iter().collect::<Vec<_>>(), vec![(2, &13)]);
    }

    #[test]
    fn filters_and_map() {
        let stream = Stream::from_pairs(vec![(1, 1), (2, 2), (3, 3)]);
        assert_eq!(stream.filter_time(|t| t > 1).len(), 2);
        assert_eq!(stream.filter(|v| v % 2 == 1).len(), 2);
        assert_eq!(stream.map(|v| v * 10).get(2), Some(&20));
    }
}
