use std::collections::HashSet;
use std::fs;

use rangecache_http_range::{
    coalesce_ranges, format_range_header, is_multipart_byteranges, multipart_boundary,
    parse_content_range, ByteRange,
};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING, CONTENT_RANGE, RANGE};
use serde::Serialize;
use url::Url;

use crate::byte_buffer::ByteBuffer;
use crate::config::{redact_url_for_logs, RemoteStreamConfig, RemoteStreamOptions};
use crate::error::{Result, StreamError};
use crate::files::CacheFileManager;
use crate::hash::ResourceKey;
use crate::loader::RangeLoader;
use crate::meta::{CacheIndex, CacheMetaStore};
use crate::multipart::{MultipartReader, PartHeader};
use crate::telemetry::{StreamTelemetry, StreamTelemetrySnapshot};
use crate::transport::{build_header_map, probe_remote_size, HttpTransport, ReqwestTransport};

/// Outcome of [`RemoteStream::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// `n` bytes were copied into the destination.
    Data(usize),
    /// Nothing is cached at the read position yet; call again.
    Pending,
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetaStatus {
    pub id: u64,
    pub start: u64,
    pub cached: u64,
    pub span: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStatus {
    pub file_size: u64,
    pub cached_bytes: u64,
    pub next_meta_id: u64,
    pub content_type: Option<String>,
    pub metas: Vec<MetaStatus>,
}

/// A meta position plus an absolute offset inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Cursor {
    meta: usize,
    offset: u64,
}

/// The response currently feeding the cache.
#[derive(Debug)]
struct ActiveRequest {
    /// Ranges asked for, in ascending order.
    ranges: Vec<ByteRange>,
    /// First requested range no part has answered yet.
    next_range: usize,
    /// Present for `multipart/byteranges` responses.
    multipart: Option<MultipartReader>,
    /// Exclusive end of the part body being written.
    part_end: u64,
}

/// A remote resource exposed as a seekable byte stream, backed by a segmented on-disk cache.
///
/// Every call is bounded: at most `max_chunk_bytes` are pulled from the network per `read` or
/// `seek`. Reads are served from the cache files only, so a read position that has not been
/// downloaded yet reports [`ReadStatus::Pending`].
pub struct RemoteStream<T: HttpTransport = ReqwestTransport> {
    transport: T,
    url: Url,
    log_url: String,
    request_headers: HeaderMap,
    options: RemoteStreamOptions,
    store: CacheMetaStore,
    files: CacheFileManager,
    loader: RangeLoader,
    buffer: ByteBuffer,
    request: Option<ActiveRequest>,
    download: Cursor,
    read: Cursor,
    content_type: Option<String>,
    /// `(meta id, offset)` positions that already had their one protocol restart.
    restarts: HashSet<(u64, u64)>,
    telemetry: StreamTelemetry,
    closed: bool,
}

impl<T: HttpTransport> std::fmt::Debug for RemoteStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStream")
            .field("url", &self.log_url)
            .field("file_size", &self.store.file_size())
            .field("metas", &self.store.metas())
            .field("download", &self.download)
            .field("read", &self.read)
            .field("request_active", &self.request.is_some())
            .finish_non_exhaustive()
    }
}

impl RemoteStream<ReqwestTransport> {
    pub fn open(config: RemoteStreamConfig) -> Result<Self> {
        let transport = ReqwestTransport::new()?;
        Self::open_with_transport(config, transport)
    }
}

impl<T: HttpTransport> RemoteStream<T> {
    pub fn open_with_transport(config: RemoteStreamConfig, transport: T) -> Result<Self> {
        let log_url = redact_url_for_logs(&config.url).to_string();
        if !matches!(config.url.scheme(), "http" | "https") || !config.url.has_host() {
            return Err(StreamError::UrlNotAbsolute(log_url));
        }

        fs::create_dir_all(&config.cache_dir)?;
        let request_headers = build_header_map(&config.request_headers)?;
        let probe = probe_remote_size(&transport, &config.url, &request_headers)?;

        let key = ResourceKey::for_url(&config.url);
        let mut files =
            CacheFileManager::new(&config.cache_dir, key, config.options.quota_bytes)?;
        let store = load_or_reset(&mut files, probe.size)?;

        let mut stream = Self {
            transport,
            url: config.url,
            log_url,
            request_headers,
            options: config.options,
            store,
            files,
            loader: RangeLoader::new(),
            buffer: ByteBuffer::new(),
            request: None,
            download: Cursor::default(),
            read: Cursor::default(),
            content_type: probe.content_type,
            restarts: HashSet::new(),
            telemetry: StreamTelemetry::default(),
            closed: false,
        };

        tracing::info!(
            url = %stream.log_url,
            file_size = probe.size,
            resource = %key,
            metas = stream.store.len(),
            "opened remote stream"
        );
        stream.start_download(0)?;
        Ok(stream)
    }

    pub fn file_size(&self) -> u64 {
        self.store.file_size()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn position(&self) -> u64 {
        self.read.offset
    }

    pub fn telemetry(&self) -> StreamTelemetrySnapshot {
        let evictions = self.files.evictions();
        StreamTelemetry::set(&self.telemetry.evicted_files, evictions.files);
        StreamTelemetry::set(&self.telemetry.evicted_bytes, evictions.bytes);
        self.telemetry.snapshot()
    }

    pub fn cache_status(&self) -> Result<CacheStatus> {
        let mut metas = Vec::with_capacity(self.store.len());
        for (i, meta) in self.store.metas().iter().enumerate() {
            metas.push(MetaStatus {
                id: meta.id,
                start: meta.start,
                cached: self.files.cached_len(meta.id)?,
                span: self.store.span(i),
            });
        }
        Ok(CacheStatus {
            file_size: self.file_size(),
            cached_bytes: metas.iter().map(|m| m.cached).sum(),
            next_meta_id: self.store.next_meta_id(),
            content_type: self.content_type.clone(),
            metas,
        })
    }

    /// Move the read position to `target`.
    ///
    /// One bounded chunk of the in-flight download is cached first; if that fails the request is
    /// dropped and replanned below. Seeking into an uncached gap splits the containing meta and
    /// points the download at the new one. On error the read position is unchanged.
    pub fn seek(&mut self, target: u64) -> Result<()> {
        if let Err(err) = self.download_and_cache() {
            tracing::warn!(url = %self.log_url, error = %err, target, "dropping in-flight download before seek");
            self.close_request();
        }

        if target >= self.file_size() {
            self.read = Cursor {
                meta: self.store.len() - 1,
                offset: target,
            };
            return Ok(());
        }

        let i = self.store.find(target);
        let meta = self.store.get(i);
        let cached_end = meta.start + self.files.cached_len(meta.id)?;

        if meta.start != target && cached_end < target {
            let pos = self.store.insert(target)?;
            if self.read.meta >= pos {
                self.read.meta += 1;
            }
            if self.download.meta >= pos {
                self.download.meta += 1;
            }
            self.close_request();
            tracing::debug!(target, meta = pos, "seek into uncached gap");
            self.start_download(pos)?;
            self.read = Cursor {
                meta: pos,
                offset: target,
            };
            return Ok(());
        }

        if self.request.is_none() || self.download.meta != i {
            self.start_download(i)?;
        }
        self.read = Cursor {
            meta: i,
            offset: target,
        };
        Ok(())
    }

    /// Copy cached bytes at the read position into `dest`.
    pub fn read(&mut self, dest: &mut [u8]) -> Result<ReadStatus> {
        if self.read.offset >= self.file_size() {
            return Ok(ReadStatus::Eof);
        }
        if dest.is_empty() {
            return Ok(ReadStatus::Data(0));
        }

        self.download_and_cache()?;

        loop {
            let meta = self.store.get(self.read.meta);
            let cached_end = meta.start + self.files.cached_len(meta.id)?;
            let meta_end = self.store.meta_end(self.read.meta);

            if self.read.offset < cached_end {
                let avail = (cached_end - self.read.offset).min(dest.len() as u64) as usize;
                let n =
                    self.files
                        .read_at(meta.id, self.read.offset - meta.start, &mut dest[..avail])?;
                if n == 0 {
                    return Err(StreamError::CacheInvariant(format!(
                        "meta {} reports {cached_end} cached bytes but reads came back empty",
                        meta.id
                    )));
                }
                self.read.offset += n as u64;
                if self.read.offset >= meta_end && !self.store.is_last(self.read.meta) {
                    self.read.meta += 1;
                }
                StreamTelemetry::add(&self.telemetry.bytes_served, n as u64);
                return Ok(ReadStatus::Data(n));
            }

            if self.read.offset >= meta_end && !self.store.is_last(self.read.meta) {
                self.read.meta += 1;
                continue;
            }
            break;
        }

        // The read position sits on a gap. Make sure something is going to fill it: either the
        // active request reaches it later, or a new one starts here.
        if self.request.is_none() || self.download.meta > self.read.meta {
            tracing::debug!(
                offset = self.read.offset,
                meta = self.read.meta,
                "read hit an uncached gap; requesting it"
            );
            self.start_download(self.read.meta)?;
        }
        Ok(ReadStatus::Pending)
    }

    /// Stop downloading, persist the index and release file handles.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.close_request();
        if let Err(err) = self.store.persist() {
            tracing::error!(url = %self.log_url, error = %err, "failed to persist cache index");
        }
        self.files.close();
        tracing::info!(url = %self.log_url, telemetry = ?self.telemetry.snapshot(), "closed remote stream");
    }

    /// Move one bounded chunk from the active response into the cache.
    ///
    /// A protocol error restarts the request once per download position; a second one at the
    /// same position, and every other error, closes the request and is returned.
    pub fn download_and_cache(&mut self) -> Result<()> {
        match self.cache_chunk() {
            Ok(()) => Ok(()),
            Err(err) if err.is_protocol() => {
                let from = self.download.meta;
                self.recover(from, err)
            }
            Err(err) => {
                tracing::error!(url = %self.log_url, error = %err, "download failed");
                self.close_request();
                Err(err)
            }
        }
    }

    fn cache_chunk(&mut self) -> Result<()> {
        if self.request.is_none() {
            return Ok(());
        }

        let budget = self.options.max_chunk_bytes;
        if self.buffer.len() < budget {
            let want = budget - self.buffer.len();
            let pulled = self.loader.load_received(&mut self.buffer, want)?;
            StreamTelemetry::add(&self.telemetry.bytes_downloaded, pulled as u64);
        }

        loop {
            let Some(part_end) = self.request.as_ref().map(|r| r.part_end) else {
                return Ok(());
            };
            let dl = self.download;
            let limit = self.store.meta_end(dl.meta).min(part_end);

            if dl.offset >= limit {
                self.at_limit(part_end)?;
                continue;
            }
            if self.buffer.is_empty() {
                if self.loader.remaining() == 0 {
                    return Err(StreamError::Protocol(format!(
                        "response ended at {} before the part end {part_end}",
                        dl.offset
                    )));
                }
                return Ok(());
            }

            let n = (self.buffer.len() as u64).min(limit - dl.offset) as usize;
            self.store_bytes(n)?;
        }
    }

    /// The download cursor hit the end of its meta or of the current part.
    fn at_limit(&mut self, part_end: u64) -> Result<()> {
        let dl = self.download;

        if dl.offset >= part_end {
            let Some(request) = self.request.as_mut() else {
                return Ok(());
            };
            let Some(reader) = request.multipart.as_mut() else {
                tracing::debug!(end = part_end, "range response complete");
                self.close_request();
                return self.new_download(dl.meta);
            };

            reader.end_part();
            let next = reader.next_part(&mut self.loader, &mut self.buffer)?;
            return match next {
                Some(header) => self.begin_part(header),
                None => {
                    tracing::debug!("multipart response complete");
                    self.close_request();
                    Ok(())
                }
            };
        }

        // Meta end reached inside a part.
        if self.store.is_last(dl.meta) {
            self.close_request();
            return Ok(());
        }
        let next = dl.meta + 1;
        let next_meta = self.store.get(next);
        if self.files.cached_len(next_meta.id)? != 0 {
            // The part runs into bytes that are already cached; ask again for what is missing.
            tracing::debug!(meta = next_meta.id, "part overlaps cached data; re-planning");
            self.close_request();
            return self.new_download(next);
        }
        self.download.meta = next;
        Ok(())
    }

    fn begin_part(&mut self, header: PartHeader) -> Result<()> {
        let file_size = self.file_size();
        let Some(request) = self.request.as_ref() else {
            return Ok(());
        };

        let (start, end) = match header.content_range {
            Some(cr) => {
                if cr.total.is_some_and(|total| total != file_size) {
                    return Err(StreamError::Protocol(format!(
                        "part reports a total of {:?} bytes, expected {file_size}",
                        cr.total
                    )));
                }
                (cr.start, cr.end_exclusive())
            }
            None => {
                let r = request.ranges.get(request.next_range).ok_or_else(|| {
                    StreamError::Protocol(
                        "part without Content-Range after every requested range".to_string(),
                    )
                })?;
                (r.start, r.end_exclusive())
            }
        };
        let next_range = request.ranges.partition_point(|r| r.end < start) + 1;

        let dl_meta = self.store.get(self.download.meta);
        if start < dl_meta.start {
            return Err(StreamError::Protocol(format!(
                "part starts at {start}, before the download position {}",
                dl_meta.start
            )));
        }
        let i = self.store.find(start);
        let meta = self.store.get(i);
        let cached_end = meta.start + self.files.cached_len(meta.id)?;
        if start != cached_end {
            return Err(StreamError::Protocol(format!(
                "part starts at {start} but meta {} is cached up to {cached_end}",
                meta.id
            )));
        }

        if let Some(content_type) = header.content_type {
            self.content_type = Some(content_type);
        }
        if let Some(request) = self.request.as_mut() {
            request.part_end = end;
            request.next_range = next_range;
        }
        self.download = Cursor {
            meta: i,
            offset: start,
        };
        tracing::debug!(start, end, meta = meta.id, "multipart part");
        Ok(())
    }

    /// Write `n` buffered bytes at the download cursor.
    fn store_bytes(&mut self, n: usize) -> Result<()> {
        let dl = self.download;
        let meta = self.store.get(dl.meta);
        let rel = dl.offset - meta.start;
        let span = self.store.span(dl.meta);

        self.files.resize(meta.id, span, rel + n as u64)?;
        let Some(data) = self.buffer.read(n) else {
            return Err(StreamError::CacheInvariant(format!(
                "asked to store {n} bytes with fewer buffered"
            )));
        };
        if let Err(err) = self.files.write_at(meta.id, rel, data) {
            if let Err(undo) = self.files.truncate(meta.id, rel) {
                tracing::warn!(meta = meta.id, error = %undo, "failed to roll back partial write");
            }
            return Err(err);
        }
        self.download.offset += n as u64;
        Ok(())
    }

    /// `new_download` with the protocol-restart policy applied.
    fn start_download(&mut self, from: usize) -> Result<()> {
        match self.new_download(from) {
            Err(err) if err.is_protocol() => self.recover(from, err),
            other => other,
        }
    }

    fn recover(&mut self, from: usize, err: StreamError) -> Result<()> {
        self.close_request();
        let Some(position) = self.first_missing(from)? else {
            return Err(err);
        };
        if !self.restarts.insert(position) {
            tracing::error!(url = %self.log_url, error = %err, meta = position.0, offset = position.1, "protocol error repeated; giving up");
            return Err(err);
        }
        tracing::warn!(url = %self.log_url, error = %err, meta = position.0, offset = position.1, "protocol error; restarting request");
        StreamTelemetry::add(&self.telemetry.protocol_restarts, 1);
        self.new_download(from)
    }

    /// Issue one `GET` covering every gap from meta `from` onwards.
    fn new_download(&mut self, from: usize) -> Result<()> {
        self.close_request();
        let ranges = self.missing_ranges(from)?;
        let Some(range_header) = format_range_header(&ranges) else {
            tracing::info!(url = %self.log_url, from_meta = from, "nothing left to download");
            return Ok(());
        };
        let first = ranges[0].start;
        let dl_meta = self.store.find(first);

        let mut headers = self.request_headers.clone();
        let value = HeaderValue::from_str(&range_header)
            .map_err(|e| StreamError::Protocol(e.to_string()))?;
        headers.insert(RANGE, value);
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

        tracing::debug!(url = %self.log_url, range = %range_header, from_meta = from, "issuing range request");
        StreamTelemetry::add(&self.telemetry.range_requests, 1);
        let resp = self.transport.get(&self.url, &headers)?;
        match resp.status {
            206 => {}
            200 => {
                // Falling back to a full download is not attempted.
                tracing::error!(url = %self.log_url, "server ignored the Range header");
                return Err(StreamError::RangeNotSupported);
            }
            status => return Err(StreamError::HttpStatus { status }),
        }

        let content_type = resp.content_type().map(str::to_string);
        let boundary = content_type.as_deref().and_then(multipart_boundary);

        let request = match boundary {
            Some(boundary) => ActiveRequest {
                ranges,
                next_range: 0,
                multipart: Some(MultipartReader::new(boundary, self.options.line_read_bytes)),
                // Zero-length pseudo part: the first real part is parsed on the next pass.
                part_end: first,
            },
            None => {
                if content_type.as_deref().is_some_and(is_multipart_byteranges) {
                    return Err(StreamError::Protocol(
                        "multipart response without a boundary".to_string(),
                    ));
                }
                let cr = resp
                    .header_str(CONTENT_RANGE)
                    .ok_or_else(|| StreamError::Protocol("missing Content-Range".to_string()))?;
                let cr = parse_content_range(cr)?;
                if cr.start != first {
                    return Err(StreamError::Protocol(format!(
                        "response starts at {} but the first gap starts at {first}",
                        cr.start
                    )));
                }
                if cr.total.is_some_and(|total| total != self.file_size()) {
                    return Err(StreamError::Protocol(format!(
                        "response reports a total of {:?} bytes, expected {}",
                        cr.total,
                        self.file_size()
                    )));
                }
                if content_type.is_some() {
                    self.content_type = content_type;
                }
                ActiveRequest {
                    ranges,
                    next_range: 1,
                    multipart: None,
                    part_end: cr.end_exclusive(),
                }
            }
        };

        self.loader.open(resp);
        self.buffer.clear();
        self.download = Cursor {
            meta: dl_meta,
            offset: first,
        };
        self.request = Some(request);
        Ok(())
    }

    /// Every uncached byte range from meta `from` onwards, coalesced.
    fn missing_ranges(&self, from: usize) -> Result<Vec<ByteRange>> {
        let mut ranges = Vec::new();
        for i in from..self.store.len() {
            let meta = self.store.get(i);
            let cached_end = meta.start + self.files.cached_len(meta.id)?;
            let end = self.store.meta_end(i);
            if cached_end < end {
                ranges.push(ByteRange::new(cached_end, end - 1));
            }
        }
        coalesce_ranges(&mut ranges);
        Ok(ranges)
    }

    fn first_missing(&self, from: usize) -> Result<Option<(u64, u64)>> {
        for i in from..self.store.len() {
            let meta = self.store.get(i);
            let cached_end = meta.start + self.files.cached_len(meta.id)?;
            if cached_end < self.store.meta_end(i) {
                return Ok(Some((meta.id, cached_end)));
            }
        }
        Ok(None)
    }

    fn close_request(&mut self) {
        if self.request.take().is_some() {
            tracing::debug!(progress = ?self.loader.progress(), "closing range request");
        }
        self.loader.close();
        self.buffer.clear();
    }
}

impl<T: HttpTransport> Drop for RemoteStream<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Load the resource's index and check it against the data files on disk. Anything inconsistent
/// throws the whole resource cache away.
fn load_or_reset(files: &mut CacheFileManager, file_size: u64) -> Result<CacheMetaStore> {
    let path = files.meta_path();
    if let Some(index) = CacheMetaStore::load(&path) {
        match check_consistency(&index, file_size, files) {
            Ok(()) => return Ok(CacheMetaStore::from_index(path, index, file_size)),
            Err(err) => {
                tracing::warn!(resource = %files.key(), error = %err, "cache is inconsistent; resetting");
            }
        }
    }

    files.purge_resource()?;
    let store = CacheMetaStore::fresh(path, file_size);
    store.persist()?;
    Ok(store)
}

fn check_consistency(index: &CacheIndex, file_size: u64, files: &CacheFileManager) -> Result<()> {
    index.validate(file_size)?;
    let store = CacheMetaStore::from_index(files.meta_path(), index.clone(), file_size);
    for (meta_id, size) in files.resource_files()? {
        let Some(pos) = index.metas.iter().position(|m| m.id == meta_id) else {
            return Err(StreamError::CacheInvariant(format!(
                "data file for unknown meta {meta_id}"
            )));
        };
        let span = store.span(pos);
        if size > span {
            return Err(StreamError::CacheInvariant(format!(
                "meta {meta_id} holds {size} bytes, more than its {span}-byte span"
            )));
        }
    }
    Ok(())
}
