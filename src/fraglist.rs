// Fragment interval list — the merge primitive shared by the IP reassembly
// engines.
//
// Holds the received byte ranges of one datagram's fragmentable part as a
// sorted run of non-overlapping half-open intervals, each owning a copy of
// its bytes. Insertion resolves overlaps in favor of the newcomer and
// reports the byte deltas so the caller can update its memory accounting
// without re-walking the list.

use log::trace;
use serde::{Deserialize, Serialize};

use crate::error::DefragError;

/// How [`FragmentList::insert`] treats an interval overlapping received data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverlapPolicy {
    /// Newest bytes win contested ranges; existing intervals are trimmed,
    /// split, or removed.
    #[default]
    PreferNewest,
    /// Any overlap (a retransmitted duplicate included) is an error; the
    /// caller abandons the whole datagram. This is the RFC 5722 stance.
    RejectConflicts,
}

/// Byte deltas reported by one insertion.
///
/// `bytes_inserted` is the full size of the newcomer (its bytes are always
/// copied whole); `bytes_removed` is what displaced intervals gave up. The
/// net change in held bytes is `bytes_inserted - bytes_removed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertDelta {
    pub bytes_inserted: usize,
    pub bytes_removed: usize,
}

#[derive(Debug)]
struct Interval {
    start: u32,
    end: u32,
    bytes: Vec<u8>,
}

/// Sorted, non-overlapping half-open byte intervals of one datagram.
#[derive(Debug, Default)]
pub struct FragmentList {
    intervals: Vec<Interval>,
}

impl FragmentList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Total bytes currently held.
    pub fn byte_count(&self) -> usize {
        self.intervals.iter().map(|iv| iv.bytes.len()).sum()
    }

    /// Insert `data` at byte offset `start`, merging overlaps.
    ///
    /// The newcomer's bytes are copied whole; existing intervals it overlaps
    /// are trimmed at either edge, split when they straddle it, or removed
    /// when fully subsumed. An exact duplicate range retains the newest
    /// bytes. Under [`OverlapPolicy::RejectConflicts`] any overlap returns
    /// an error and leaves the list untouched.
    pub fn insert(
        &mut self,
        data: &[u8],
        start: u32,
        policy: OverlapPolicy,
    ) -> Result<InsertDelta, DefragError> {
        if data.is_empty() {
            return Err(DefragError::EmptyInterval);
        }
        let end = start + data.len() as u32;

        // Overlap window: intervals[lo..hi] intersect [start, end).
        let lo = self.intervals.partition_point(|iv| iv.end <= start);
        let hi = self.intervals.partition_point(|iv| iv.start < end);

        if lo < hi && policy == OverlapPolicy::RejectConflicts {
            return Err(DefragError::OverlapConflict { start, end });
        }

        let mut removed = 0usize;
        for iv in &self.intervals[lo..hi] {
            removed += (iv.end.min(end) - iv.start.max(start)) as usize;
        }

        let mut replacement: Vec<Interval> = Vec::with_capacity(3);
        if lo < hi {
            let first = &self.intervals[lo];
            if first.start < start {
                let keep = (start - first.start) as usize;
                replacement.push(Interval {
                    start: first.start,
                    end: start,
                    bytes: first.bytes[..keep].to_vec(),
                });
            }
        }
        replacement.push(Interval {
            start,
            end,
            bytes: data.to_vec(),
        });
        if lo < hi {
            let last = &self.intervals[hi - 1];
            if last.end > end {
                let skip = (end - last.start) as usize;
                replacement.push(Interval {
                    start: end,
                    end: last.end,
                    bytes: last.bytes[skip..].to_vec(),
                });
            }
        }
        self.intervals.splice(lo..hi, replacement);

        trace!(
            "inserted [{start}, {end}), displaced {removed} bytes, {} intervals held",
            self.intervals.len()
        );
        Ok(InsertDelta {
            bytes_inserted: data.len(),
            bytes_removed: removed,
        })
    }

    /// True iff the union of held intervals covers `[0, total_len)`.
    pub fn is_contiguous(&self, total_len: u32) -> bool {
        let mut covered = 0u32;
        for iv in &self.intervals {
            if iv.start != covered {
                return false;
            }
            covered = iv.end;
            if covered >= total_len {
                return true;
            }
        }
        covered >= total_len
    }

    /// Append the held intervals, in order, to `out`.
    ///
    /// Returns the byte count written, or `LengthMismatch` when it disagrees
    /// with `declared_len` (a misbehaving fragment stream).
    pub fn compact(&self, out: &mut Vec<u8>, declared_len: u32) -> Result<usize, DefragError> {
        let mut count = 0usize;
        for iv in &self.intervals {
            out.extend_from_slice(&iv.bytes);
            count += iv.bytes.len();
        }
        if count != declared_len as usize {
            return Err(DefragError::LengthMismatch {
                declared: declared_len as usize,
                actual: count,
            });
        }
        Ok(count)
    }
}
