//! Common logic for the consolidation of vectors of weighted data.
//!
//! We often find ourselves with collections of records with associated
//! weights, where we want to reduce the collection to the point that each
//! record occurs at most once, with the accumulated weight. These methods
//! supply that functionality, and they are what keeps zero weights from ever
//! being materialized: any accumulation that reaches zero is discarded.
//!
//! Small inputs are sorted and consolidated in place. Inputs beyond
//! [`BUCKET_SORT_THRESHOLD`] are first partitioned by a bounded hash so that
//! each partition sorts independently, and the partitions are then merged
//! back together in key order.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::hash::{Hash, Hasher};

use fnv::FnvHasher;

use crate::algebra::{IsZero, Semigroup};

/// Input length beyond which consolidation switches to bucket sorting.
pub const BUCKET_SORT_THRESHOLD: usize = 200_000;

/// Number of bits of hash used to select a bucket.
const BUCKET_BITS: u32 = 12;

/// Sorts and consolidates `vec`.
///
/// This method will sort `vec` and then consolidate runs of more than one
/// entry with identical first elements by accumulating the second elements of
/// the pairs. Should the final accumulation be zero, the element is discarded.
#[inline]
pub fn consolidate<T: Ord, R: Semigroup>(vec: &mut Vec<(T, R)>) {
    consolidate_from(vec, 0);
}

/// Sorts and consolidates `vec[offset..]`.
#[inline]
pub fn consolidate_from<T: Ord, R: Semigroup>(vec: &mut Vec<(T, R)>, offset: usize) {
    let length = consolidate_slice(&mut vec[offset..]);
    vec.truncate(offset + length);
}

/// Sorts and consolidates a slice, returning the valid prefix length.
#[inline]
pub fn consolidate_slice<T: Ord, R: Semigroup>(slice: &mut [(T, R)]) -> usize {
    if slice.len() > 1 {
        consolidate_slice_slow(slice)
    } else {
        slice.iter().filter(|x| !x.1.is_zero()).count()
    }
}

/// Part of `consolidate_slice` that handles slices of length greater than 1.
fn consolidate_slice_slow<T: Ord, R: Semigroup>(slice: &mut [(T, R)]) -> usize {
    slice.sort_by(|x, y| x.0.cmp(&y.0));

    // Counts the number of distinct known-non-zero accumulations. Indexes the write location.
    let mut offset = 0;
    let mut accum = slice[offset].1.clone();

    for index in 1..slice.len() {
        if slice[index].0 == slice[index - 1].0 {
            accum.plus_equals(&slice[index].1);
        } else {
            if !accum.is_zero() {
                slice.swap(offset, index - 1);
                slice[offset].1.clone_from(&accum);
                offset += 1;
            }
            accum.clone_from(&slice[index].1);
        }
    }
    if !accum.is_zero() {
        slice.swap(offset, slice.len() - 1);
        slice[offset].1 = accum;
        offset += 1;
    }

    offset
}

/// Consolidates `vec`, bucket sorting when the input is large enough.
///
/// Behaviorally identical to [`consolidate`]; inputs above
/// [`BUCKET_SORT_THRESHOLD`] are partitioned into `2^12` hash buckets which
/// sort and consolidate independently before a k-way merge reassembles them
/// in key order. Equal keys share a bucket, so the merge is a pure ordered
/// interleave, but it accumulates on ties all the same.
pub fn consolidate_bucketed<T: Ord + Hash, R: Semigroup>(vec: &mut Vec<(T, R)>) {
    if vec.len() < BUCKET_SORT_THRESHOLD {
        consolidate(vec);
        return;
    }

    let mut buckets: Vec<Vec<(T, R)>> = (0..(1usize << BUCKET_BITS)).map(|_| Vec::new()).collect();
    for (data, diff) in vec.drain(..) {
        let mut hasher = FnvHasher::default();
        data.hash(&mut hasher);
        let bucket = (hasher.finish() >> (64 - BUCKET_BITS)) as usize;
        buckets[bucket].push((data, diff));
    }
    for bucket in buckets.iter_mut() {
        consolidate(bucket);
    }

    merge_sorted_runs(buckets, vec);
}

/// K-way merges key-sorted, consolidated runs into `output`, accumulating
/// weights on equal keys and dropping zeros.
pub fn merge_sorted_runs<T: Ord, R: Semigroup>(runs: Vec<Vec<(T, R)>>, output: &mut Vec<(T, R)>) {
    struct Head<T, R> {
        data: T,
        diff: R,
        run: usize,
    }

    // Ordering considers the key and the run index only; the run index breaks
    // ties deterministically.
    impl<T: Ord, R> PartialEq for Head<T, R> {
        fn eq(&self, other: &Self) -> bool {
            self.data == other.data && self.run == other.run
        }
    }
    impl<T: Ord, R> Eq for Head<T, R> {}
    impl<T: Ord, R> PartialOrd for Head<T, R> {
        fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
            Some(self.cmp(other))
        }
    }
    impl<T: Ord, R> Ord for Head<T, R> {
        fn cmp(&self, other: &Self) -> std::cmp::Ordering {
            self.data.cmp(&other.data).then(self.run.cmp(&other.run))
        }
    }

    let mut iters: Vec<_> = runs.into_iter().map(Vec::into_iter).collect();

    let mut heap = BinaryHeap::with_capacity(iters.len());
    for (run, iter) in iters.iter_mut().enumerate() {
        if let Some((data, diff)) = iter.next() {
            heap.push(Reverse(Head { data, diff, run }));
        }
    }

    while let Some(Reverse(Head { data, diff, run })) = heap.pop() {
        if let Some((data, diff)) = iters[run].next() {
            heap.push(Reverse(Head { data, diff, run }));
        }
        match output.last_mut() {
            Some((prev, accum)) if *prev == data => {
                accum.plus_equals(&diff);
                if accum.is_zero() {
                    output.pop();
                }
            }
            _ => {
                if !diff.is_zero() {
                    output.push((data, diff));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consolidate() {
        let test_cases = vec![
            (vec![("a", -1), ("b", -2), ("a", 1)], vec![("b", -2)]),
            (vec![("a", -1), ("b", 0), ("a", 1)], vec![]),
            (vec![("a", 0)], vec![]),
            (vec![("a", 0), ("b", 0)], vec![]),
            (vec![("a", 1), ("b", 1)], vec![("a", 1), ("b", 1)]),
        ];

        for (mut input, output) in test_cases {
            consolidate(&mut input);
            assert_eq!(input, output);
        }
    }

    #[test]
    fn test_consolidate_from() {
        let mut input = vec![("a", 1), ("b", 2), ("b", -2), ("a", 1)];
        consolidate_from(&mut input, 1);
        assert_eq!(input, vec![("a", 1), ("a", 1)]);
    }

    #[test]
    fn consolidate_is_idempotent() {
        let mut input: Vec<(u64, i64)> = (0..100).map(|i| (i % 10, 1)).collect();
        consolidate(&mut input);
        let once = input.clone();
        consolidate(&mut input);
        assert_eq!(input, once);
    }

    #[test]
    fn bucketed_matches_plain() {
        let mut plain: Vec<(u64, i64)> = (0..1000u64).map(|i| (i % 37, (i % 5) as i64 - 2)).collect();
        let mut bucketed = plain.clone();
        // Force the bucketed path regardless of threshold.
        let runs = {
            let mut buckets: Vec<Vec<(u64, i64)>> = (0..16).map(|_| Vec::new()).collect();
            for (data, diff) in bucketed.drain(..) {
                buckets[(data % 16) as usize].push((data, diff));
            }
            for bucket in buckets.iter_mut() {
                consolidate(bucket);
            }
            buckets
        };
        merge_sorted_runs(runs, &mut bucketed);
        consolidate(&mut plain);
        assert_eq!(bucketed, plain);
    }

    #[test]
    fn merge_accumulates_across_runs() {
        let runs = vec![vec![(1u64, 2i64), (3, 1)], vec![(1, -2), (2, 5)]];
        let mut output = Vec::new();
        merge_sorted_runs(runs, &mut output);
        assert_eq!(output, vec![(2, 5), (3, 1)]);
    }
}
