//! Server-side reading of the `Range` headers the cache client sends, for the test servers.

use rangecache_http_range::ByteRange;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeRequest {
    /// No usable `Range` header; serve the whole representation.
    Whole,
    Ranges(Vec<ByteRange>),
    /// Every range starts past the end (`416`).
    Unsatisfiable,
}

/// Interpret a `Range` header value against a representation of `len` bytes.
///
/// Malformed headers and other range-units are ignored, as RFC 9110 allows. Open-ended
/// (`500-`) and suffix (`-100`) specs are accepted; ends are clamped to the last byte.
pub fn interpret_range(value: Option<&str>, len: u64) -> RangeRequest {
    let Some(list) = value.and_then(|v| v.trim().strip_prefix("bytes=")) else {
        return RangeRequest::Whole;
    };

    let mut ranges = Vec::new();
    for part in list.split(',') {
        let Some((first, last)) = part.trim().split_once('-') else {
            return RangeRequest::Whole;
        };
        let (first, last) = (first.trim(), last.trim());
        let range = match (first.parse::<u64>(), last.parse::<u64>()) {
            (Ok(start), Ok(end)) if start <= end => (start < len).then(|| (start, end.min(len - 1))),
            (Ok(start), Err(_)) if last.is_empty() => (start < len).then(|| (start, len - 1)),
            (Err(_), Ok(suffix)) if first.is_empty() => {
                (suffix > 0 && len > 0).then(|| (len.saturating_sub(suffix), len - 1))
            }
            _ => return RangeRequest::Whole,
        };
        if let Some((start, end)) = range {
            ranges.push(ByteRange::new(start, end));
        }
    }

    if ranges.is_empty() {
        RangeRequest::Unsatisfiable
    } else {
        RangeRequest::Ranges(ranges)
    }
}
