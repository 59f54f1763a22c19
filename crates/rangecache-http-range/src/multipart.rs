//! `multipart/byteranges` media type helpers.

pub const MULTIPART_BYTERANGES: &str = "multipart/byteranges";

/// Whether a `Content-Type` value names `multipart/byteranges` (parameters ignored).
pub fn is_multipart_byteranges(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|essence| essence.trim().eq_ignore_ascii_case(MULTIPART_BYTERANGES))
        .unwrap_or(false)
}

/// Extract the `boundary` parameter of a `multipart/byteranges` content type.
///
/// Returns `None` for other media types and for a missing or empty boundary. Quoted boundaries
/// (`boundary="a b"`) are unquoted.
pub fn multipart_boundary(content_type: &str) -> Option<String> {
    if !is_multipart_byteranges(content_type) {
        return None;
    }

    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        (!value.is_empty()).then(|| value.to_string())
    })
}
