//! `Content-Range` response header parsing.
//!
//! Accepts `bytes X-Y/Z` as well as the non-standard `bytes=X-Y/Z` some servers emit inside
//! `multipart/byteranges` parts. `Z` may be `*` (unknown complete length).

/// A satisfied `Content-Range`: inclusive `start..=end`, plus the complete length if known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub total: Option<u64>,
}

// A satisfied range always covers at least one byte.
#[allow(clippy::len_without_is_empty)]
impl ContentRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Exclusive end offset.
    pub fn end_exclusive(&self) -> u64 {
        self.end.saturating_add(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContentRangeError {
    #[error("unsupported Content-Range unit: {0}")]
    Unit(String),
    #[error("unsatisfied Content-Range: {0}")]
    Unsatisfied(String),
    #[error("malformed Content-Range: {0}")]
    Malformed(String),
}

pub fn parse_content_range(value: &str) -> Result<ContentRange, ContentRangeError> {
    let value = value.trim();
    let malformed = || ContentRangeError::Malformed(value.to_string());

    if value.len() < 5 || !value.is_char_boundary(5) {
        return Err(malformed());
    }
    let (unit, rest) = value.split_at(5);
    if !unit.eq_ignore_ascii_case("bytes") {
        return Err(ContentRangeError::Unit(value.to_string()));
    }
    let spec = match rest.strip_prefix('=') {
        Some(spec) => spec,
        None if rest.starts_with(|c: char| c.is_ascii_whitespace()) => rest.trim_start(),
        None => return Err(malformed()),
    };

    let (range_part, total_part) = spec.split_once('/').ok_or_else(malformed)?;
    if range_part.trim() == "*" {
        return Err(ContentRangeError::Unsatisfied(value.to_string()));
    }

    let total = match total_part.trim() {
        "*" => None,
        t => Some(parse_u64(t).ok_or_else(malformed)?),
    };

    let (start, end) = range_part.split_once('-').ok_or_else(malformed)?;
    let start = parse_u64(start).ok_or_else(malformed)?;
    let end = parse_u64(end).ok_or_else(malformed)?;
    if end < start {
        return Err(malformed());
    }
    if matches!(total, Some(total) if end >= total) {
        return Err(malformed());
    }

    Ok(ContentRange { start, end, total })
}

fn parse_u64(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
