//! `Range` request header (RFC 9110) for the `bytes` range-unit, as the cache client sends it.

use std::cmp;
use std::fmt::Write as _;

/// An inclusive byte range (`start..=end`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Length of this range in bytes.
    pub fn len(self) -> u64 {
        // `end` is inclusive.
        debug_assert!(self.start <= self.end);
        self.end - self.start + 1
    }

    pub fn is_empty(self) -> bool {
        self.start > self.end
    }

    /// Exclusive end offset.
    pub fn end_exclusive(self) -> u64 {
        self.end.saturating_add(1)
    }
}

/// Render ranges as a `Range` header value: `bytes=0-99,500-999`.
///
/// Returns `None` for an empty slice; there is no valid header for "nothing".
pub fn format_range_header(ranges: &[ByteRange]) -> Option<String> {
    if ranges.is_empty() {
        return None;
    }
    let mut out = String::from("bytes=");
    for (i, r) in ranges.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        // Writing into a `String` cannot fail.
        let _ = write!(out, "{}-{}", r.start, r.end);
    }
    Some(out)
}

/// Coalesce overlapping or adjacent ranges in-place.
///
/// RFC 9110 says clients SHOULD NOT send abutting ranges, so the cache client runs its missing
/// ranges through this before building a header.
pub fn coalesce_ranges(ranges: &mut Vec<ByteRange>) {
    if ranges.len() <= 1 {
        return;
    }

    ranges.sort_by_key(|r| r.start);

    let mut out: Vec<ByteRange> = Vec::with_capacity(ranges.len());
    for r in ranges.iter().copied() {
        match out.last_mut() {
            Some(prev) if r.start <= prev.end.saturating_add(1) => {
                prev.end = cmp::max(prev.end, r.end);
            }
            _ => out.push(r),
        }
    }

    *ranges = out;
}
