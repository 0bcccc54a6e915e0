//! The open-addressed Z-set representation.
//!
//! A Robin-Hood hash table storing keys and weights inline: linear probing
//! where an inserted entry displaces any resident entry closer to its home
//! slot ("rob the rich"), which keeps probe distances tightly clustered.
//! Deletions leave explicit tombstones so probe chains stay intact.
//!
//! A side index records the positions of slots that have ever been occupied
//! in the current table generation: a position is pushed exactly when its
//! slot transitions from empty to occupied, so the index holds no duplicates
//! and iteration can walk it (filtering tombstoned positions) instead of
//! scanning the whole table. Rehashing starts a new generation, dropping
//! tombstones and stale index entries alike.

use std::hash::{Hash, Hasher};

use fnv::FnvHasher;

use crate::algebra::{Abelian, IsZero, Monoid, Scale, Semigroup, Weight};

const INITIAL_CAPACITY: usize = 16;

#[derive(Clone, Debug, Default)]
enum Slot<K> {
    #[default]
    Empty,
    Tombstone,
    Occupied {
        key: K,
        weight: Weight,
        distance: u32,
    },
}

impl<K> Slot<K> {
    fn is_occupied(&self) -> bool {
        matches!(self, Slot::Occupied { .. })
    }
}

/// A Z-set stored in an open-addressed Robin-Hood table.
#[derive(Clone, Debug)]
pub struct FastZSet<K> {
    slots: Vec<Slot<K>>,
    /// Positions whose slot has been occupied this generation; no duplicates.
    occupied: Vec<usize>,
    len: usize,
    tombstones: usize,
}

impl<K: Hash + Eq + Clone> Default for FastZSet<K> {
    fn default() -> Self {
        FastZSet::new()
    }
}

impl<K: Hash + Eq + Clone> FastZSet<K> {
    /// An empty set.
    pub fn new() -> Self {
        FastZSet {
            slots: (0..INITIAL_CAPACITY).map(|_| Slot::Empty).collect(),
            occupied: Vec::new(),
            len: 0,
            tombstones: 0,
        }
    }

    /// The number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no live entries remain.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn home(&self, key: &K) -> usize {
        let mut hasher = FnvHasher::default();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & (self.slots.len() - 1)
    }

    /// The weight of `key`, zero when absent.
    pub fn get(&self, key: &K) -> Weight {
        let mask = self.slots.len() - 1;
        let mut pos = self.home(key);
        // Tombstones may interrupt clusters, so the scan runs to an empty slot.
        for _ in 0..self.slots.len() {
            match &self.slots[pos] {
                Slot::Empty => return 0,
                Slot::Tombstone => {}
                Slot::Occupied { key: resident, weight, .. } => {
                    if resident == key {
                        return *weight;
                    }
                }
            }
            pos = (pos + 1) & mask;
        }
        0
    }

    /// Adds `weight` to `key`, tombstoning the entry if the sum reaches zero.
    pub fn insert_with_weight(&mut self, key: K, weight: Weight) {
        if weight.is_zero() {
            return;
        }
        self.reserve_one();

        let mask = self.slots.len() - 1;
        let home = self.home(&key);
        let mut pos = home;
        let mut first_tombstone = None;
        for _ in 0..self.slots.len() {
            match &mut self.slots[pos] {
                Slot::Empty => break,
                Slot::Tombstone => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(pos);
                    }
                }
                Slot::Occupied { key: resident, weight: resident_weight, .. } => {
                    if *resident == key {
                        resident_weight.plus_equals(&weight);
                        if resident_weight.is_zero() {
                            self.slots[pos] = Slot::Tombstone;
                            self.len -= 1;
                            self.tombstones += 1;
                        }
                        return;
                    }
                }
            }
            pos = (pos + 1) & mask;
        }

        // Not present. Reclaim the earliest tombstone on the probe path if one
        // was seen (its position is already indexed); otherwise displace
        // Robin-Hood style towards the empty slot.
        if let Some(pos) = first_tombstone {
            let distance = (pos.wrapping_sub(home) & mask) as u32;
            self.slots[pos] = Slot::Occupied { key, weight, distance };
            self.tombstones -= 1;
            self.len += 1;
        } else {
            self.insert_displacing(key, weight);
        }
    }

    /// Inserts a key known to be absent, swapping with any richer resident.
    fn insert_displacing(&mut self, key: K, weight: Weight) {
        let mask = self.slots.len() - 1;
        let mut pos = self.home(&key);
        let mut carried_key = key;
        let mut carried_weight = weight;
        let mut carried_distance = 0u32;
        loop {
            match &mut self.slots[pos] {
                slot @ Slot::Empty => {
                    *slot = Slot::Occupied {
                        key: carried_key,
                        weight: carried_weight,
                        distance: carried_distance,
                    };
                    self.occupied.push(pos);
                    self.len += 1;
                    return;
                }
                slot @ Slot::Tombstone => {
                    *slot = Slot::Occupied {
                        key: carried_key,
                        weight: carried_weight,
                        distance: carried_distance,
                    };
                    self.tombstones -= 1;
                    self.len += 1;
                    return;
                }
                Slot::Occupied { key: resident_key, weight: resident_weight, distance } => {
                    if *distance < carried_distance {
                        std::mem::swap(resident_key, &mut carried_key);
                        std::mem::swap(resident_weight, &mut carried_weight);
                        std::mem::swap(distance, &mut carried_distance);
                    }
                }
            }
            carried_distance += 1;
            pos = (pos + 1) & mask;
        }
    }

    /// Subtracts the full weight of `key`, returning the removed weight.
    pub fn remove(&mut self, key: &K) -> Weight {
        let weight = self.get(key);
        if !weight.is_zero() {
            self.insert_with_weight(key.clone(), weight.negated());
        }
        weight
    }

    /// Iterates live `(key, weight)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, Weight)> {
        self.occupied.iter().filter_map(|&pos| match &self.slots[pos] {
            Slot::Occupied { key, weight, .. } => Some((key, *weight)),
            _ => None,
        })
    }

    /// Copies the live entries into a vector of pairs.
    pub fn to_pairs(&self) -> Vec<(K, Weight)> {
        self.iter().map(|(k, w)| (k.clone(), w)).collect()
    }

    /// Drains all live entries, leaving the table empty.
    pub fn drain_pairs(&mut self) -> Vec<(K, Weight)> {
        let pairs = self.to_pairs();
        self.slots = (0..INITIAL_CAPACITY).map(|_| Slot::Empty).collect();
        self.occupied.clear();
        self.len = 0;
        self.tombstones = 0;
        pairs
    }

    fn reserve_one(&mut self) {
        // Grow (or shed tombstones) at 70% combined load.
        if (self.len + self.tombstones + 1) * 10 >= self.slots.len() * 7 {
            let target = ((self.len + 1) * 2).next_power_of_two().max(INITIAL_CAPACITY);
            self.rehash(target);
        }
    }

    fn rehash(&mut self, capacity: usize) {
        let old = std::mem::replace(&mut self.slots, (0..capacity).map(|_| Slot::Empty).collect());
        self.occupied.clear();
        self.len = 0;
        self.tombstones = 0;
        for slot in old {
            if let Slot::Occupied { key, weight, .. } = slot {
                self.insert_displacing(key, weight);
            }
        }
    }
}

impl<K: Hash + Eq + Clone> IsZero for FastZSet<K> {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<K: Hash + Eq + Clone> Semigroup for FastZSet<K> {
    fn plus_equals(&mut self, rhs: &Self) {
        for (key, weight) in rhs.iter() {
            self.insert_with_weight(key.clone(), weight);
        }
    }
}

impl<K: Hash + Eq + Clone> Monoid for FastZSet<K> {
    fn zero() -> Self {
        FastZSet::new()
    }
}

impl<K: Hash + Eq + Clone> Abelian for FastZSet<K> {
    fn negate(&mut self) {
        for slot in self.slots.iter_mut() {
            if let Slot::Occupied { weight, .. } = slot {
                weight.negate();
            }
        }
    }
}

impl<K: Hash + Eq + Clone> Scale for FastZSet<K> {
    fn scale(&mut self, factor: Weight) {
        if factor == 0 {
            self.drain_pairs();
        } else {
            for slot in self.slots.iter_mut() {
                if let Slot::Occupied { weight, .. } = slot {
                    weight.scale(factor);
                }
            }
        }
    }
}
