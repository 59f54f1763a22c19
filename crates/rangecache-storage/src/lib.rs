//! Segmented on-disk cache for remote resources, read through resumable HTTP range requests.
//!
//! A resource is split into *metas*: contiguous segments, each backed by one file in a shared cache
//! directory. Seeking into bytes nobody has fetched yet splits the containing segment, so playback
//! can start anywhere without throwing away what is already on disk. Metas and their ids survive
//! restarts through a small binary sidecar index.
//!
//! [`RemoteStream`] is the single-threaded engine. [`RemoteStreamHandle`] runs one on a worker
//! thread, and [`StreamReader`] adapts that to `std::io::{Read, Seek}`.

mod byte_buffer;
mod config;
mod error;
mod files;
mod hash;
mod loader;
mod meta;
mod multipart;
mod stream;
mod telemetry;
mod transport;
mod worker;

#[cfg(test)]
mod test_support;

pub use byte_buffer::ByteBuffer;
pub use config::{
    RemoteStreamConfig, RemoteStreamOptions, DEFAULT_LINE_READ_BYTES, DEFAULT_MAX_CHUNK_BYTES,
    DEFAULT_PENDING_RETRY_LIMIT,
};
pub use error::{Result, StreamError};
pub use files::{CacheFileManager, EvictionStats};
pub use hash::ResourceKey;
pub use loader::RangeLoader;
pub use meta::{CacheIndex, CacheMeta, CacheMetaStore};
pub use multipart::{MultipartReader, MultipartState, PartHeader};
pub use stream::{CacheStatus, MetaStatus, ReadStatus, RemoteStream};
pub use telemetry::{StreamTelemetry, StreamTelemetrySnapshot};
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport};
pub use worker::{RemoteStreamHandle, StreamReader};
