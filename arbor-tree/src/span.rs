//! Entry ranges of baskets and the lookup of the baskets covering a request.

use std::fmt::{Display, Formatter};
use std::ops::Range;

/// The entry range and on-disk location of one basket.
///
/// The spans of a branch partition `[first_entry, entries)`: for adjacent spans `a` and `b`,
/// `a.end == b.beg`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Span {
    /// First entry held by the basket.
    pub beg: u64,
    /// One past the last entry held by the basket.
    pub end: u64,
    /// Byte offset of the basket record.
    pub pos: u64,
    /// Length of the basket record in bytes. Zero for a basket that was never flushed.
    pub size: u32,
}

impl Span {
    /// Create a span for the entries `[beg, end)` stored at `pos`.
    pub fn new(beg: u64, end: u64, pos: u64, size: u32) -> Self {
        Self {
            beg,
            end,
            pos,
            size,
        }
    }

    /// Whether `entry` falls inside the span.
    #[inline]
    pub fn contains(&self, entry: u64) -> bool {
        self.beg <= entry && entry < self.end
    }

    /// Number of entries held by the basket.
    pub fn entries(&self) -> u64 {
        self.end - self.beg
    }

    /// Whether the basket only lives in memory.
    pub fn is_resident(&self) -> bool {
        self.size == 0
    }
}

impl Display for Span {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {}) at {}+{}",
            self.beg, self.end, self.pos, self.size
        )
    }
}

/// Find the baskets covering the entries `[beg, end)`.
///
/// The first index is the span holding `beg`. The range ends after the first span reaching
/// `end`, or at the end of the list when no span does. Returns `None` when no span overlaps the
/// request.
pub fn find_baskets(spans: &[Span], beg: u64, end: u64) -> Option<Range<usize>> {
    let stop = end.max(beg.saturating_add(1));
    let first = spans.iter().position(|s| beg < s.end && s.beg < stop)?;
    let last = spans[first..]
        .iter()
        .position(|s| s.end >= end)
        .map_or(spans.len(), |i| first + i + 1);
    Some(first..last)
}
