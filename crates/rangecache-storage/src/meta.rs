use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Result, StreamError};

/// One contiguous cache segment.
///
/// A meta logically covers `[start, next.start)` (or `[start, file_size)` for the last one); the
/// bytes actually on disk are a prefix of that span, held in the file named by `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheMeta {
    pub id: u64,
    pub start: u64,
}

const HEADER_BYTES: usize = 16;
const RECORD_BYTES: usize = 16;

/// Persisted form of the segment list.
///
/// Layout (little-endian): `u64 count`, `u64 next_meta_id`, then `count` × `{u64 id, u64 start}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheIndex {
    pub metas: Vec<CacheMeta>,
    pub next_meta_id: u64,
}

impl Default for CacheIndex {
    fn default() -> Self {
        Self::fresh()
    }
}

impl CacheIndex {
    /// A single empty segment covering the whole resource.
    pub fn fresh() -> Self {
        Self {
            metas: vec![CacheMeta { id: 1, start: 0 }],
            next_meta_id: 2,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_BYTES + RECORD_BYTES * self.metas.len());
        out.extend_from_slice(&(self.metas.len() as u64).to_le_bytes());
        out.extend_from_slice(&self.next_meta_id.to_le_bytes());
        for meta in &self.metas {
            out.extend_from_slice(&meta.id.to_le_bytes());
            out.extend_from_slice(&meta.start.to_le_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_BYTES {
            return Err(StreamError::CacheInvariant(format!(
                "index is {} bytes, shorter than its header",
                bytes.len()
            )));
        }
        let count = read_u64(bytes, 0);
        let next_meta_id = read_u64(bytes, 8);

        let expected = usize::try_from(count)
            .ok()
            .and_then(|c| c.checked_mul(RECORD_BYTES))
            .and_then(|b| b.checked_add(HEADER_BYTES));
        if expected != Some(bytes.len()) {
            return Err(StreamError::CacheInvariant(format!(
                "index declares {count} metas but is {} bytes long",
                bytes.len()
            )));
        }

        let metas = bytes[HEADER_BYTES..]
            .chunks_exact(RECORD_BYTES)
            .map(|rec| CacheMeta {
                id: read_u64(rec, 0),
                start: read_u64(rec, 8),
            })
            .collect();
        Ok(Self {
            metas,
            next_meta_id,
        })
    }

    /// Check the structural invariants against the resource size.
    pub fn validate(&self, file_size: u64) -> Result<()> {
        let first = self
            .metas
            .first()
            .ok_or_else(|| StreamError::CacheInvariant("index has no metas".to_string()))?;
        if first.start != 0 {
            return Err(StreamError::CacheInvariant(format!(
                "first meta starts at {} instead of 0",
                first.start
            )));
        }
        for pair in self.metas.windows(2) {
            if pair[1].start <= pair[0].start {
                return Err(StreamError::CacheInvariant(format!(
                    "meta starts are not strictly increasing ({} then {})",
                    pair[0].start, pair[1].start
                )));
            }
        }
        if let Some(last) = self.metas.last() {
            if last.start > 0 && last.start >= file_size {
                return Err(StreamError::CacheInvariant(format!(
                    "meta starts at {} beyond the resource size {file_size}",
                    last.start
                )));
            }
        }

        let mut ids: Vec<u64> = self.metas.iter().map(|m| m.id).collect();
        ids.sort_unstable();
        if ids.windows(2).any(|w| w[0] == w[1]) {
            return Err(StreamError::CacheInvariant("duplicate meta id".to_string()));
        }
        if ids.last().is_some_and(|&max| max >= self.next_meta_id) {
            return Err(StreamError::CacheInvariant(format!(
                "next meta id {} is not above every issued id",
                self.next_meta_id
            )));
        }
        Ok(())
    }
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(raw)
}

/// Owns the segment list of one resource and its sidecar file.
#[derive(Debug)]
pub struct CacheMetaStore {
    path: PathBuf,
    index: CacheIndex,
    file_size: u64,
}

impl CacheMetaStore {
    pub fn fresh(path: impl Into<PathBuf>, file_size: u64) -> Self {
        Self::from_index(path, CacheIndex::fresh(), file_size)
    }

    pub fn from_index(path: impl Into<PathBuf>, index: CacheIndex, file_size: u64) -> Self {
        Self {
            path: path.into(),
            index,
            file_size,
        }
    }

    /// Read a sidecar. Missing and corrupt sidecars both yield `None`; the caller starts over.
    pub fn load(path: &Path) -> Option<CacheIndex> {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to read cache index");
                return None;
            }
        };
        match CacheIndex::decode(&raw) {
            Ok(index) => Some(index),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "discarding corrupt cache index");
                None
            }
        }
    }

    /// Rewrite the whole sidecar (temp file + rename).
    pub fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = tmp_path(&self.path);
        fs::write(&tmp, self.index.encode())?;
        match fs::rename(&tmp, &self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                match fs::remove_file(&self.path) {
                    Ok(()) => {}
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
                fs::rename(&tmp, &self.path)?;
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    /// Split the segment containing `start`, returning the new meta's position.
    ///
    /// The new id is taken from `next_meta_id` and the index is persisted before returning. If the
    /// write fails the meta is removed again, but the id stays consumed.
    pub fn insert(&mut self, start: u64) -> Result<usize> {
        if start >= self.file_size {
            return Err(StreamError::CacheInvariant(format!(
                "cannot start a meta at {start}, resource is {} bytes",
                self.file_size
            )));
        }
        let pos = self.index.metas.partition_point(|m| m.start < start);
        if self.index.metas.get(pos).is_some_and(|m| m.start == start) {
            return Err(StreamError::CacheInvariant(format!(
                "a meta already starts at {start}"
            )));
        }
        if pos == 0 {
            return Err(StreamError::CacheInvariant(
                "the first meta must start at 0".to_string(),
            ));
        }

        let id = self.index.next_meta_id;
        self.index.next_meta_id += 1;
        self.index.metas.insert(pos, CacheMeta { id, start });
        if let Err(err) = self.persist() {
            self.index.metas.remove(pos);
            return Err(err);
        }
        tracing::debug!(id, start, position = pos, "inserted cache meta");
        Ok(pos)
    }

    /// Position of the last meta with `start <= offset`.
    pub fn find(&self, offset: u64) -> usize {
        self.index
            .metas
            .partition_point(|m| m.start <= offset)
            .saturating_sub(1)
    }

    pub fn get(&self, index: usize) -> CacheMeta {
        self.index.metas[index]
    }

    /// Exclusive logical end of the meta at `index`.
    pub fn meta_end(&self, index: usize) -> u64 {
        self.index
            .metas
            .get(index + 1)
            .map_or(self.file_size, |next| next.start)
    }

    pub fn span(&self, index: usize) -> u64 {
        self.meta_end(index) - self.index.metas[index].start
    }

    pub fn is_last(&self, index: usize) -> bool {
        index + 1 == self.index.metas.len()
    }

    pub fn len(&self) -> usize {
        self.index.metas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.metas.is_empty()
    }

    pub fn metas(&self) -> &[CacheMeta] {
        &self.index.metas
    }

    pub fn index(&self) -> &CacheIndex {
        &self.index
    }

    pub fn next_meta_id(&self) -> u64 {
        self.index.next_meta_id
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
