use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{Result, StreamError};
use crate::hash::{ResourceKey, META_EXTENSION};

/// Eviction totals since the manager was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionStats {
    pub files: u64,
    pub bytes: u64,
}

/// Backing files of one resource inside a shared cache directory.
///
/// Handles are opened lazily and memoized per meta id. Growth that runs into the directory budget
/// (or the filesystem's own out-of-space errors) evicts *other* resources' segments, oldest first.
#[derive(Debug)]
pub struct CacheFileManager {
    dir: PathBuf,
    key: ResourceKey,
    handles: HashMap<u64, File>,
    quota: Option<u64>,
    /// Bytes used by every regular file in `dir`. Only tracked when a quota is configured.
    usage: u64,
    evictions: EvictionStats,
}

impl CacheFileManager {
    pub fn new(dir: impl Into<PathBuf>, key: ResourceKey, quota: Option<u64>) -> Result<Self> {
        let dir = dir.into();
        let usage = match quota {
            Some(_) => directory_usage(&dir)?,
            None => 0,
        };
        Ok(Self {
            dir,
            key,
            handles: HashMap::new(),
            quota,
            usage,
            evictions: EvictionStats::default(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn key(&self) -> ResourceKey {
        self.key
    }

    pub fn usage(&self) -> u64 {
        self.usage
    }

    pub fn evictions(&self) -> EvictionStats {
        self.evictions
    }

    pub fn data_path(&self, meta_id: u64) -> PathBuf {
        self.dir.join(self.key.data_file_name(meta_id))
    }

    pub fn meta_path(&self) -> PathBuf {
        self.dir.join(self.key.meta_file_name())
    }

    /// Open (creating it empty if needed) the data file for `meta_id`.
    pub fn open_or_create(&mut self, meta_id: u64) -> Result<&mut File> {
        if !self.handles.contains_key(&meta_id) {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(self.data_path(meta_id))?;
            self.handles.insert(meta_id, file);
        }
        self.handles
            .get_mut(&meta_id)
            .ok_or_else(|| StreamError::Io(format!("no handle for meta {meta_id}")))
    }

    /// Bytes on disk for `meta_id`. A missing file holds nothing.
    pub fn cached_len(&self, meta_id: u64) -> Result<u64> {
        if let Some(file) = self.handles.get(&meta_id) {
            return Ok(file.metadata()?.len());
        }
        match fs::metadata(self.data_path(meta_id)) {
            Ok(meta) => Ok(meta.len()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    /// Grow the data file of `meta_id` to `new_size` bytes. Never shrinks.
    pub fn resize(&mut self, meta_id: u64, span: u64, new_size: u64) -> Result<()> {
        if new_size > span {
            return Err(StreamError::CacheInvariant(format!(
                "meta {meta_id} would grow to {new_size} bytes, past its {span}-byte span"
            )));
        }
        let current = self.cached_len(meta_id)?;
        if new_size <= current {
            return Ok(());
        }
        let delta = new_size - current;
        self.reserve(delta)?;

        let first = self.open_or_create(meta_id)?.set_len(new_size);
        match first {
            Ok(()) => {}
            Err(err) if is_out_of_space(&err) => {
                tracing::warn!(meta_id, delta, error = %err, "cache storage full; evicting");
                self.evict(delta)?;
                self.open_or_create(meta_id)?.set_len(new_size)?;
            }
            Err(err) => return Err(err.into()),
        }
        if self.quota.is_some() {
            self.usage += delta;
        }
        Ok(())
    }

    /// Write `data` at `offset` within the data file of `meta_id`.
    pub fn write_at(&mut self, meta_id: u64, offset: u64, data: &[u8]) -> Result<()> {
        let first = write_all_at(self.open_or_create(meta_id)?, offset, data);
        match first {
            Ok(()) => Ok(()),
            // Sparse files only claim blocks when written to.
            Err(err) if is_out_of_space(&err) => {
                tracing::warn!(meta_id, len = data.len(), error = %err, "cache storage full; evicting");
                self.evict(data.len() as u64)?;
                write_all_at(self.open_or_create(meta_id)?, offset, data)?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Cut the data file of `meta_id` back to `len` bytes after a failed write.
    pub(crate) fn truncate(&mut self, meta_id: u64, len: u64) -> Result<()> {
        let current = self.cached_len(meta_id)?;
        if len >= current {
            return Ok(());
        }
        self.open_or_create(meta_id)?.set_len(len)?;
        if self.quota.is_some() {
            self.usage = self.usage.saturating_sub(current - len);
        }
        Ok(())
    }

    /// Read up to `buf.len()` bytes at `offset`; returns how many were available.
    pub fn read_at(&mut self, meta_id: u64, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let file = self.open_or_create(meta_id)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(filled)
    }

    /// Delete the data file of `meta_id`, if any.
    pub fn remove(&mut self, meta_id: u64) -> Result<()> {
        self.handles.remove(&meta_id);
        let path = self.data_path(meta_id);
        let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        match fs::remove_file(&path) {
            Ok(()) => {
                self.usage = self.usage.saturating_sub(size);
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete every data file belonging to this resource.
    pub fn purge_resource(&mut self) -> Result<()> {
        self.handles.clear();
        for (meta_id, _) in self.resource_files()? {
            self.remove(meta_id)?;
        }
        Ok(())
    }

    /// `(meta_id, size)` of every data file this resource has on disk.
    pub fn resource_files(&self) -> Result<Vec<(u64, u64)>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Some(meta_id) = self.key.parse_data_file_name(&name) else {
                continue;
            };
            let meta = entry.metadata()?;
            if meta.is_file() {
                out.push((meta_id, meta.len()));
            }
        }
        out.sort_unstable();
        Ok(out)
    }

    /// Drop every open handle.
    pub fn close(&mut self) {
        self.handles.clear();
    }

    fn reserve(&mut self, delta: u64) -> Result<()> {
        let Some(quota) = self.quota else {
            return Ok(());
        };
        let wanted = self.usage.saturating_add(delta);
        if wanted <= quota {
            return Ok(());
        }
        tracing::warn!(usage = self.usage, delta, quota, "cache quota exceeded; evicting");
        self.evict(wanted - quota)
    }

    /// Delete other resources' data files, least recently modified first, until `needed` bytes
    /// have been freed.
    pub fn evict(&mut self, needed: u64) -> Result<()> {
        let mut candidates = BinaryHeap::new();
        let mut usage = 0u64;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            usage += meta.len();

            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if self.key.owns_file_name(&name) || is_sidecar(&name) {
                continue;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            candidates.push(Reverse((modified, entry.path(), meta.len())));
        }
        if self.quota.is_some() {
            self.usage = usage;
        }

        let mut freed = 0u64;
        while freed < needed {
            let Some(Reverse((_, path, size))) = candidates.pop() else {
                tracing::error!(needed, freed, "no cache files left to evict");
                return Err(StreamError::QuotaExhausted {
                    needed: needed - freed,
                });
            };
            match fs::remove_file(&path) {
                Ok(()) => {}
                // Another stream got there first.
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            }
            tracing::warn!(path = %path.display(), size, "evicted cache file");
            freed += size;
            self.evictions.files += 1;
            self.evictions.bytes += size;
            if self.quota.is_some() {
                self.usage = self.usage.saturating_sub(size);
            }
        }
        Ok(())
    }
}

fn write_all_at(file: &mut File, offset: u64, data: &[u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)
}

fn is_out_of_space(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::StorageFull | ErrorKind::QuotaExceeded)
}

/// Index sidecars (and their temp files) are never evicted.
fn is_sidecar(name: &str) -> bool {
    let suffix = format!(".{META_EXTENSION}");
    name.ends_with(&suffix) || name.ends_with(&format!("{suffix}.tmp"))
}

fn directory_usage(dir: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let meta = entry?.metadata()?;
        if meta.is_file() {
            total += meta.len();
        }
    }
    Ok(total)
}
