use rangecache_http_range::{parse_content_range, ContentRange};

use crate::byte_buffer::ByteBuffer;
use crate::error::{Result, StreamError};
use crate::loader::RangeLoader;

/// Longest header or delimiter line accepted inside a multipart body.
const MAX_LINE_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipartState {
    /// Expecting a delimiter line.
    Boundary,
    /// Inside a part's header block.
    Headers,
    /// The caller is consuming a part body.
    Body,
    /// Closing delimiter seen.
    Finished,
}

/// Headers of one `multipart/byteranges` part.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartHeader {
    /// `None` when the part carried no `Content-Range`; the caller decides how far it extends.
    pub content_range: Option<ContentRange>,
    pub content_type: Option<String>,
}

/// Frames a `multipart/byteranges` response body.
///
/// Part bodies are not read here. After [`MultipartReader::next_part`] returns a header the caller
/// consumes exactly the part's length from the shared buffer and calls
/// [`MultipartReader::end_part`].
#[derive(Debug)]
pub struct MultipartReader {
    boundary: String,
    state: MultipartState,
    line_read_bytes: usize,
}

impl MultipartReader {
    pub fn new(boundary: impl Into<String>, line_read_bytes: usize) -> Self {
        Self {
            boundary: boundary.into(),
            state: MultipartState::Boundary,
            line_read_bytes: line_read_bytes.max(1),
        }
    }

    pub fn state(&self) -> MultipartState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == MultipartState::Finished
    }

    /// Parse the next delimiter and header block.
    ///
    /// Returns `Ok(None)` once the closing delimiter has been read.
    pub fn next_part(
        &mut self,
        loader: &mut RangeLoader,
        buffer: &mut ByteBuffer,
    ) -> Result<Option<PartHeader>> {
        match self.state {
            MultipartState::Finished => return Ok(None),
            MultipartState::Body => {
                return Err(StreamError::Protocol(
                    "multipart part body was not fully consumed".to_string(),
                ))
            }
            MultipartState::Boundary | MultipartState::Headers => {}
        }

        if self.state == MultipartState::Boundary {
            if self.read_boundary(loader, buffer)? {
                self.state = MultipartState::Finished;
                return Ok(None);
            }
            self.state = MultipartState::Headers;
        }

        let mut header = PartHeader::default();
        loop {
            let line = self.read_line(loader, buffer)?;
            if line.is_empty() {
                break;
            }
            let (name, value) = line.split_once(':').ok_or_else(|| {
                StreamError::Protocol(format!("malformed multipart header line: {line:?}"))
            })?;
            let value = value.trim();
            if name.trim().eq_ignore_ascii_case("content-range") {
                header.content_range = Some(parse_content_range(value)?);
            } else if name.trim().eq_ignore_ascii_case("content-type") {
                header.content_type = Some(value.to_string());
            }
        }

        self.state = MultipartState::Body;
        Ok(Some(header))
    }

    /// Mark the current part body as consumed.
    pub fn end_part(&mut self) {
        if self.state == MultipartState::Body {
            self.state = MultipartState::Boundary;
        }
    }

    /// Consume one delimiter line; `true` for the closing delimiter.
    fn read_boundary(&mut self, loader: &mut RangeLoader, buffer: &mut ByteBuffer) -> Result<bool> {
        let mut line = self.read_line(loader, buffer)?;
        // The CRLF ending the previous body (or a leading one) belongs to the delimiter.
        if line.is_empty() {
            line = self.read_line(loader, buffer)?;
        }

        let token = line
            .strip_prefix("--")
            .and_then(|rest| rest.strip_prefix(self.boundary.as_str()))
            .ok_or_else(|| {
                StreamError::Protocol(format!(
                    "expected multipart delimiter for boundary {:?}, got {line:?}",
                    self.boundary
                ))
            })?;
        match token.trim_end_matches([' ', '\t']) {
            "" => Ok(false),
            "--" => Ok(true),
            other => Err(StreamError::Protocol(format!(
                "unexpected bytes after multipart delimiter: {other:?}"
            ))),
        }
    }

    /// Pull one line (CRLF or bare LF terminated) out of the buffer, loading more as needed.
    fn read_line(&mut self, loader: &mut RangeLoader, buffer: &mut ByteBuffer) -> Result<String> {
        let line_len = loop {
            if let Some(pos) = buffer.find(b"\n") {
                break pos + 1;
            }
            if buffer.len() > MAX_LINE_BYTES {
                return Err(StreamError::Protocol(format!(
                    "multipart line exceeds {MAX_LINE_BYTES} bytes"
                )));
            }
            if loader.load_received(buffer, self.line_read_bytes)? == 0 {
                // An unterminated final line (typically the closing delimiter) is still a line.
                if buffer.is_empty() {
                    return Err(StreamError::Protocol(
                        "response ended inside multipart framing".to_string(),
                    ));
                }
                break buffer.len();
            }
        };

        let raw = buffer.read(line_len).unwrap_or_default();
        let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        std::str::from_utf8(raw)
            .map(str::to_string)
            .map_err(|_| StreamError::Protocol("multipart header is not valid UTF-8".to_string()))
    }
}
