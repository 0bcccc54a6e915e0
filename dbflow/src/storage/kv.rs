//! The abstract ordered key/value contract.
//!
//! This is the boundary behind which a host storage engine lives. The engine
//! requires ordered keys, point reads and mutation, a forward cursor with
//! lower-bound seek, and LSM-shaped maintenance hooks: how many records sit
//! in mutable memory, freezing the mutable segment, and merging frozen
//! segments down. Cursors are point-in-time snapshots, consistent with the
//! sequence point at which they were created.

/// Host-engine tuning handed through from [`super::StorageConfig`].
#[derive(Clone, Copy, Debug)]
pub struct KvConfig {
    /// Target item count for a disk segment.
    pub disk_segment_items: usize,
    /// Item bound on the mutable segment before it freezes.
    pub write_buffer_items: usize,
    /// Cache budget for keys, in bytes.
    pub key_cache_bytes: usize,
    /// Cache budget for values, in bytes.
    pub value_cache_bytes: usize,
}

impl Default for KvConfig {
    fn default() -> Self {
        KvConfig {
            disk_segment_items: 4096,
            write_buffer_items: 8192,
            key_cache_bytes: 4 << 20,
            value_cache_bytes: 12 << 20,
        }
    }
}

/// A forward cursor over a point-in-time snapshot.
pub trait KvCursor<K, V> {
    /// Positions the cursor at the first key not less than `lower_bound`.
    fn seek(&mut self, lower_bound: &K);

    /// True while the cursor references an entry.
    fn valid(&self) -> bool;

    /// The current key. Only meaningful while [`Self::valid`].
    fn key(&self) -> &K;

    /// The current value. Only meaningful while [`Self::valid`].
    fn value(&self) -> &V;

    /// Advances to the next entry in key order.
    fn step(&mut self);
}

/// A completed or in-flight merge of frozen segments.
///
/// The in-crate engine merges synchronously; `join` exists so that callers
/// are already written against an engine that merges in the background.
#[derive(Debug)]
pub struct MergeOperation {
    merged_segments: usize,
}

impl MergeOperation {
    /// Wraps a finished merge of `merged_segments` segments.
    pub fn completed(merged_segments: usize) -> Self {
        MergeOperation { merged_segments }
    }

    /// Waits for the merge and reports how many segments it folded.
    pub fn join(self) -> usize {
        self.merged_segments
    }
}

/// An ordered key/value store with LSM maintenance hooks.
pub trait OrderedKv<K: Ord + Clone, V: Clone> {
    /// The cursor type for snapshot reads.
    type Cursor: KvCursor<K, V>;

    /// The value at `key`, if present.
    fn try_get(&self, key: &K) -> Option<V>;

    /// Sets the value at `key`.
    fn upsert(&mut self, key: K, value: V);

    /// Removes `key`, returning the previous value if one was visible.
    fn try_delete(&mut self, key: &K) -> Option<V>;

    /// A cursor over a snapshot taken now, positioned at the first entry.
    fn cursor(&self) -> Self::Cursor;

    /// The number of visible entries.
    fn len(&self) -> usize;

    /// True when no entries are visible.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records held in mutable or frozen in-memory segments.
    fn in_memory_record_count(&self) -> usize;

    /// Freezes the mutable segment.
    fn move_mutable_segment_forward(&mut self);

    /// Merges frozen segments into the base. Returns a joinable handle.
    fn start_merge(&mut self) -> MergeOperation;

    /// The engine's configuration.
    fn config(&self) -> &KvConfig;
}
