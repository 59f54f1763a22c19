//! HTTP byte-range helpers for the cache client.
//!
//! - [`format_range_header`] / [`coalesce_ranges`]: the request side (`Range: bytes=...`)
//! - [`parse_content_range`]: the response side (`Content-Range: bytes X-Y/Z`)
//! - [`multipart_boundary`]: boundary extraction for `multipart/byteranges` responses
//!
//! All offsets are `u64` end-to-end; resources are routinely larger than 4 GiB.

mod content_range;
mod multipart;
mod range;

pub use content_range::{parse_content_range, ContentRange, ContentRangeError};
pub use multipart::{is_multipart_byteranges, multipart_boundary, MULTIPART_BYTERANGES};
pub use range::{coalesce_ranges, format_range_header, ByteRange};

#[cfg(all(test, not(target_arch = "wasm32")))]
mod proptests;
