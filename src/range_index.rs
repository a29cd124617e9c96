//! The incremental range-index builder, and the equal-range lookup over
//! a built index.
//!
//! An index is a sequence of `(low_key, high_key, low_offset, high_offset)`
//! entries: each covers a half-open offset range `[low_offset, high_offset)`
//! into a run whose keys, under the active order, are bounded by
//! `low_key` and `high_key` inclusive. Ranges are split at most every
//! `G` entries, except a run of equal keys is never split mid-run.

use std::cmp::Ordering;

use crate::key::{Key, OrderKind};

/// One entry of a built range index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeIndexEntry {
    pub low_key: Key,
    pub high_key: Key,
    pub low_offset: u64,
    pub high_offset: u64,
}

/// A built range index plus the order it was built under.
#[derive(Debug, Clone)]
pub struct RangeIndex {
    pub order: OrderKind,
    pub entries: Vec<RangeIndexEntry>,
}

/// On-disk width of one [`RangeIndexEntry`]: two 16-byte keys plus two
/// 8-byte offsets.
pub const RANGE_INDEX_ENTRY_DISK_SIZE: usize = 16 + 16 + 8 + 8;

impl RangeIndexEntry {
    fn to_bytes(self) -> [u8; RANGE_INDEX_ENTRY_DISK_SIZE] {
        let mut out = [0u8; RANGE_INDEX_ENTRY_DISK_SIZE];
        out[0..16].copy_from_slice(&self.low_key.to_bytes());
        out[16..32].copy_from_slice(&self.high_key.to_bytes());
        out[32..40].copy_from_slice(&self.low_offset.to_le_bytes());
        out[40..48].copy_from_slice(&self.high_offset.to_le_bytes());
        out
    }

    fn from_bytes(bytes: &[u8]) -> RangeIndexEntry {
        RangeIndexEntry {
            low_key: Key::from_bytes(bytes[0..16].try_into().unwrap()),
            high_key: Key::from_bytes(bytes[16..32].try_into().unwrap()),
            low_offset: u64::from_le_bytes(bytes[32..40].try_into().unwrap()),
            high_offset: u64::from_le_bytes(bytes[40..48].try_into().unwrap()),
        }
    }
}

impl RangeIndex {
    /// Serialize to the raw on-disk tuple array.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.entries.len() * RANGE_INDEX_ENTRY_DISK_SIZE);
        for e in &self.entries {
            out.extend_from_slice(&e.to_bytes());
        }
        out
    }

    /// Deserialize a raw on-disk tuple array built under `order`.
    pub fn from_bytes(bytes: &[u8], order: OrderKind) -> RangeIndex {
        let entries = bytes
            .chunks_exact(RANGE_INDEX_ENTRY_DISK_SIZE)
            .map(RangeIndexEntry::from_bytes)
            .collect();
        RangeIndex { order, entries }
    }

    /// Find the index entries whose `[low_key, high_key]` range could
    /// contain `key`, i.e. the `equal_range` over entries ordered by
    /// `low_key`/`high_key`: an entry compares less than `key` iff its
    /// `high_key < key`, greater iff its `low_key > key`.
    ///
    /// Returns the `[low_offset, high_offset)` window spanning all
    /// matching entries, or `None` if no entry's range contains `key`
    /// (the key is then absent without any data-file access).
    pub fn bounding_window(&self, key: Key) -> Option<(u64, u64)> {
        let order = self.order;
        let start = self.entries.partition_point(|e| e.high_key.compare(key, order) == Ordering::Less);
        if start >= self.entries.len() {
            return None;
        }
        if self.entries[start].low_key.compare(key, order) == Ordering::Greater {
            return None;
        }
        let end = self.entries[start..].partition_point(|e| e.low_key.compare(key, order) != Ordering::Greater);
        let end = start + end;
        Some((self.entries[start].low_offset, self.entries[end - 1].high_offset))
    }
}

/// Drives the incremental range-index construction state machine
/// described for [`RangeIndex`], consuming entries (as `(key, offset)`
/// pairs, where `offset` is the entry's position in the run) one at a
/// time in order.
pub struct RangeIndexBuilder {
    order: OrderKind,
    granularity: u64,
    entries: Vec<RangeIndexEntry>,
    range_start_key: Option<Key>,
    range_start_offset: u64,
    range_len: u64,
    // The key most recently fed in, used as the prospective `high_key`
    // of the range currently being accumulated.
    last_seen_key: Option<Key>,
    // The (key, offset) of the most recent order-value change inside
    // the current range, i.e. a candidate split point; `None` until
    // the first change since the range opened.
    pending_split: Option<(Key, u64)>,
}

impl RangeIndexBuilder {
    pub fn new(order: OrderKind, granularity: u64) -> Self {
        RangeIndexBuilder {
            order,
            granularity: granularity.max(1),
            entries: Vec::new(),
            range_start_key: None,
            range_start_offset: 0,
            range_len: 0,
            last_seen_key: None,
            pending_split: None,
        }
    }

    /// Feed the next `(key, offset)` pair, where `offset` is this
    /// entry's zero-based position in the run.
    pub fn push(&mut self, key: Key, offset: u64) {
        match self.range_start_key {
            None => {
                self.range_start_key = Some(key);
                self.range_start_offset = offset;
                self.range_len = 1;
                self.last_seen_key = Some(key);
            }
            Some(start_key) => {
                let changed = key.compare(start_key, self.order) != Ordering::Equal;
                if changed && self.pending_split.is_none() {
                    self.pending_split = Some((key, offset));
                }
                self.range_len += 1;
                self.last_seen_key = Some(key);

                if self.range_len >= self.granularity {
                    if let Some((split_key, split_offset)) = self.pending_split.take() {
                        // The range closes just before the split point;
                        // everything from `split_offset` on starts the
                        // next range.
                        self.close_range_ending_before(split_offset);
                        self.range_start_key = Some(split_key);
                        self.range_start_offset = split_offset;
                        self.range_len = offset + 1 - split_offset;
                        self.last_seen_key = Some(key);
                        if key.compare(split_key, self.order) != Ordering::Equal {
                            self.pending_split = Some((key, offset));
                        }
                    }
                    // If no split point was ever recorded, the whole
                    // range (so far) is one equal-valued run and is
                    // allowed to exceed `granularity`.
                }
            }
        }
    }

    /// Close the range open since `range_start_offset`, covering
    /// `[range_start_offset, end_offset)`. A range only ever closes
    /// this way on a pending split, and a split is recorded on the
    /// *first* change away from `range_start_key` — so every entry in
    /// `[range_start_offset, end_offset)` is still equal to the range's
    /// starting key, which is therefore also its `high_key`.
    fn close_range_ending_before(&mut self, end_offset: u64) {
        let low_offset = self.range_start_offset;
        let low_key = self.range_start_key.expect("close_range called on an empty range");
        self.entries.push(RangeIndexEntry {
            low_key,
            high_key: low_key,
            low_offset,
            high_offset: end_offset,
        });
    }

    /// Finish the stream, closing the final open range if any entries
    /// were pushed. `total_len` is the number of entries fed in total
    /// (used as the final range's `high_offset`).
    pub fn finish(mut self, total_len: u64) -> RangeIndex {
        if self.range_start_key.is_some() {
            let high_key = self.last_seen_key.unwrap_or_else(|| self.range_start_key.unwrap());
            let low_offset = self.range_start_offset;
            let low_key = self.range_start_key.unwrap();
            self.entries.push(RangeIndexEntry { low_key, high_key, low_offset, high_offset: total_len });
        }
        RangeIndex { order: self.order, entries: self.entries }
    }
}
