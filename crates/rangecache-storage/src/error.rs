use rangecache_http_range::ContentRangeError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StreamError>;

/// Unified error type for the remote stream and its cache.
///
/// Payloads are strings so the error stays `Clone` and can be sent back across the worker's reply
/// channel without tying callers to `std::io::Error` or `reqwest::Error`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("remote server does not support HTTP Range requests")]
    RangeNotSupported,

    #[error("remote request failed with HTTP status {status}")]
    HttpStatus { status: u16 },

    #[error("remote request failed: {0}")]
    Http(String),

    #[error("unexpected remote response: {0}")]
    Protocol(String),

    #[error("remote resource size is unknown (no Content-Length or Content-Range total)")]
    MissingContentLength,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("out of memory reserving {requested} buffer bytes")]
    OutOfMemory { requested: usize },

    #[error("cache storage exhausted: still need {needed} bytes after evicting every candidate")]
    QuotaExhausted { needed: u64 },

    #[error("cache invariant violated: {0}")]
    CacheInvariant(String),

    #[error("URL must be absolute: {0}")]
    UrlNotAbsolute(String),

    #[error("stream worker has shut down")]
    WorkerGone,
}

impl StreamError {
    /// Whether the stream may restart the request at the same position once.
    pub(crate) fn is_protocol(&self) -> bool {
        matches!(self, StreamError::Protocol(_))
    }
}

impl From<std::io::Error> for StreamError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<ContentRangeError> for StreamError {
    fn from(value: ContentRangeError) -> Self {
        Self::Protocol(value.to_string())
    }
}
