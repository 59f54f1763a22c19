use std::fmt;
use std::path::PathBuf;

use url::Url;

/// Upper bound on bytes pulled from the network per `download_and_cache` pass.
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 1024 * 1024; // 1MiB
/// Bytes requested at a time while hunting for the end of a multipart header line.
pub const DEFAULT_LINE_READ_BYTES: usize = 512;
pub const DEFAULT_PENDING_RETRY_LIMIT: usize = 1024;

#[derive(Debug, Clone)]
pub struct RemoteStreamOptions {
    /// Maximum bytes moved from the response into the cache per read/seek call. Keeps the worker
    /// responsive instead of draining a multi-gigabyte response in one go.
    pub max_chunk_bytes: usize,
    pub line_read_bytes: usize,
    /// Optional byte budget for the whole cache directory. When unset, only the filesystem's own
    /// out-of-space errors trigger eviction.
    pub quota_bytes: Option<u64>,
    /// How many consecutive `Pending` reads [`crate::StreamReader`] tolerates before giving up.
    pub pending_retry_limit: usize,
}

impl Default for RemoteStreamOptions {
    fn default() -> Self {
        Self {
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            line_read_bytes: DEFAULT_LINE_READ_BYTES,
            quota_bytes: None,
            pending_retry_limit: DEFAULT_PENDING_RETRY_LIMIT,
        }
    }
}

#[derive(Clone)]
pub struct RemoteStreamConfig {
    pub url: Url,
    /// Shared cache directory. Several resources may live here side by side; their files are
    /// namespaced by a hash of the URL.
    pub cache_dir: PathBuf,
    /// Additional headers applied to every request (`HEAD` + `GET Range`).
    ///
    /// Not persisted and not part of the cache identity.
    pub request_headers: Vec<(String, String)>,
    pub options: RemoteStreamOptions,
}

impl fmt::Debug for RemoteStreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Header values routinely carry credentials; only names are shown.
        let header_names: Vec<&str> = self
            .request_headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect();

        f.debug_struct("RemoteStreamConfig")
            .field("url", &redact_url_for_logs(&self.url).as_str())
            .field("cache_dir", &self.cache_dir)
            .field("request_headers", &header_names)
            .field("options", &self.options)
            .finish()
    }
}

impl RemoteStreamConfig {
    pub fn new(url: Url, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            url,
            cache_dir: cache_dir.into(),
            request_headers: Vec::new(),
            options: RemoteStreamOptions::default(),
        }
    }
}

pub(crate) fn redact_url_for_logs(url: &Url) -> Url {
    let mut url = url.clone();
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url.set_query(None);
    url.set_fragment(None);
    url
}
