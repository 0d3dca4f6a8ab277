/// Row keys and key ranges still to be read by a scan
use bytes::Bytes;
use std::ops::Bound;
use widerow_proto::{self as proto, row_range};

/// A contiguous range of row keys. Each bound is open, closed or unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub start: Bound<Bytes>,
    pub end: Bound<Bytes>,
}

impl KeyRange {
    /// Creates a range. An empty key on either side means unbounded.
    pub fn new(start: Bound<Bytes>, end: Bound<Bytes>) -> Self {
        Self {
            start: non_empty(start),
            end: non_empty(end),
        }
    }

    /// The whole table.
    pub fn unbounded() -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Unbounded,
        }
    }

    /// `[start, end)`
    pub fn closed_open(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        Self::new(Bound::Included(start.into()), Bound::Excluded(end.into()))
    }

    /// `[start, end]`
    pub fn closed(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        Self::new(Bound::Included(start.into()), Bound::Included(end.into()))
    }

    /// `[start, ∞)`
    pub fn starting_at(start: impl Into<Bytes>) -> Self {
        Self::new(Bound::Included(start.into()), Bound::Unbounded)
    }

    /// Every key that begins with `prefix`.
    pub fn prefix(prefix: impl Into<Bytes>) -> Self {
        let prefix = prefix.into();
        let end = match prefix_successor(&prefix) {
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };
        Self::new(Bound::Included(prefix), end)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        let after_start = match &self.start {
            Bound::Unbounded => true,
            Bound::Included(start) => key >= start.as_ref(),
            Bound::Excluded(start) => key > start.as_ref(),
        };
        after_start && self.ends_after(key)
    }

    /// True if no key of the range sorts after `key`'s position on the left,
    /// i.e. the range's start has already been passed by a scan at `key`.
    fn starts_at_or_before(&self, key: &[u8]) -> bool {
        match &self.start {
            Bound::Unbounded => true,
            Bound::Included(start) | Bound::Excluded(start) => start.as_ref() <= key,
        }
    }

    /// True if the range still holds keys greater than `key`.
    fn ends_after(&self, key: &[u8]) -> bool {
        match &self.end {
            Bound::Unbounded => true,
            Bound::Included(end) | Bound::Excluded(end) => key < end.as_ref(),
        }
    }

    pub fn to_proto(&self) -> proto::RowRange {
        proto::RowRange {
            start_key: match &self.start {
                Bound::Unbounded => None,
                Bound::Included(k) => Some(row_range::StartKey::StartKeyClosed(k.clone())),
                Bound::Excluded(k) => Some(row_range::StartKey::StartKeyOpen(k.clone())),
            },
            end_key: match &self.end {
                Bound::Unbounded => None,
                Bound::Included(k) => Some(row_range::EndKey::EndKeyClosed(k.clone())),
                Bound::Excluded(k) => Some(row_range::EndKey::EndKeyOpen(k.clone())),
            },
        }
    }
}

fn non_empty(bound: Bound<Bytes>) -> Bound<Bytes> {
    match bound {
        Bound::Included(k) | Bound::Excluded(k) if k.is_empty() => Bound::Unbounded,
        other => other,
    }
}

/// Smallest key greater than every key starting with `prefix`.
///
/// Returns `None` when no such key exists (empty or all-`0xFF` prefix).
pub fn prefix_successor(prefix: &[u8]) -> Option<Bytes> {
    let end = prefix.iter().rposition(|&b| b != 0xFF)?;
    let mut successor = prefix[..=end].to_vec();
    successor[end] += 1;
    Some(Bytes::from(successor))
}

/// What remains to be read by one logical scan.
///
/// Built once per scan. Progress is recorded as rows are emitted; the keys
/// and ranges themselves are only trimmed by [`ScanWorkSet::resume`] at a
/// retry boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanWorkSet {
    row_keys: Vec<Bytes>,
    ranges: Vec<KeyRange>,
    limit: Option<u64>,
    rows_emitted: u64,
    last_key: Option<Bytes>,
}

impl ScanWorkSet {
    /// With neither keys nor ranges the scan covers the whole table.
    /// A zero limit means no limit.
    pub fn new(mut row_keys: Vec<Bytes>, mut ranges: Vec<KeyRange>, limit: Option<u64>) -> Self {
        if row_keys.is_empty() && ranges.is_empty() {
            ranges.push(KeyRange::unbounded());
        }
        row_keys.sort();
        row_keys.dedup();

        Self {
            row_keys,
            ranges,
            limit: limit.filter(|&l| l > 0),
            rows_emitted: 0,
            last_key: None,
        }
    }

    pub fn row_keys(&self) -> &[Bytes] {
        &self.row_keys
    }

    pub fn ranges(&self) -> &[KeyRange] {
        &self.ranges
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn rows_emitted(&self) -> u64 {
        self.rows_emitted
    }

    /// Key after which a resumed scan continues.
    pub fn last_key(&self) -> Option<&Bytes> {
        self.last_key.as_ref()
    }

    /// Records a row handed to the caller.
    pub fn record_emitted(&mut self, key: Bytes) {
        self.rows_emitted += 1;
        self.last_key = Some(key);
    }

    /// Records a server progress marker. Moves the resume point forward only.
    pub fn record_scanned(&mut self, key: Bytes) {
        if key.is_empty() {
            return;
        }
        match &self.last_key {
            Some(last) if &key <= last => {}
            _ => self.last_key = Some(key),
        }
    }

    /// Row limit for the next request, after subtracting emitted rows.
    pub fn remaining_limit(&self) -> Option<u64> {
        self.limit.map(|l| l.saturating_sub(self.rows_emitted))
    }

    pub fn limit_reached(&self) -> bool {
        self.remaining_limit() == Some(0)
    }

    /// Drops everything at or before the resume point.
    ///
    /// Explicit keys `<= last` are removed. A range whose start has been
    /// passed either restarts just after `last` (exclusive) or, if its end
    /// has also been passed, is removed.
    pub fn resume(&mut self) {
        let Some(last) = self.last_key.clone() else {
            return;
        };

        self.row_keys.retain(|k| k > &last);
        self.ranges.retain_mut(|range| {
            if !range.starts_at_or_before(&last) {
                return true;
            }
            if range.ends_after(&last) {
                range.start = Bound::Excluded(last.clone());
                true
            } else {
                false
            }
        });
    }

    /// True once there are no keys and no ranges left to read.
    pub fn is_exhausted(&self) -> bool {
        self.row_keys.is_empty() && self.ranges.is_empty()
    }

    pub fn to_row_set(&self) -> proto::RowSet {
        proto::RowSet {
            row_keys: self.row_keys.clone(),
            row_ranges: self.ranges.iter().map(KeyRange::to_proto).collect(),
        }
    }
}
