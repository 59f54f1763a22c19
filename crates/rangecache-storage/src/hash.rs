use std::fmt;

use url::Url;
use xxhash_rust::xxh3::xxh3_64;

/// Names every file a resource owns in the shared cache directory.
///
/// The key is a fast non-cryptographic hash of the resource's `scheme://location` string. It only
/// has to keep resources apart; a collision means two URLs share (and keep resetting) one cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceKey(u64);

pub(crate) const META_EXTENSION: &str = "meta";
pub(crate) const DATA_EXTENSION: &str = "data";

impl ResourceKey {
    pub fn for_url(url: &Url) -> Self {
        Self(xxh3_64(url.as_str().as_bytes()))
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    /// `{hash}.meta`
    pub fn meta_file_name(self) -> String {
        format!("{self}.{META_EXTENSION}")
    }

    /// `{hash}.{id}.data`
    pub fn data_file_name(self, meta_id: u64) -> String {
        format!("{self}.{meta_id}.{DATA_EXTENSION}")
    }

    /// Whether a directory entry name belongs to this resource (data file or sidecar).
    pub fn owns_file_name(self, name: &str) -> bool {
        name.strip_prefix(self.to_string().as_str())
            .is_some_and(|rest| rest.starts_with('.'))
    }

    /// Parse `{hash}.{id}.data` back into its meta id, if the name is one of ours.
    pub fn parse_data_file_name(self, name: &str) -> Option<u64> {
        let prefix = self.to_string();
        let rest = name.strip_prefix(prefix.as_str())?.strip_prefix('.')?;
        let id = rest.strip_suffix(DATA_EXTENSION)?.strip_suffix('.')?;
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        id.parse().ok()
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
