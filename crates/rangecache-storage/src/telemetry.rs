use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct StreamTelemetry {
    pub bytes_downloaded: AtomicU64,
    pub range_requests: AtomicU64,
    pub bytes_served: AtomicU64,
    pub protocol_restarts: AtomicU64,
    pub evicted_files: AtomicU64,
    pub evicted_bytes: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamTelemetrySnapshot {
    pub bytes_downloaded: u64,
    pub range_requests: u64,
    pub bytes_served: u64,
    pub protocol_restarts: u64,
    pub evicted_files: u64,
    pub evicted_bytes: u64,
}

impl StreamTelemetry {
    pub fn snapshot(&self) -> StreamTelemetrySnapshot {
        StreamTelemetrySnapshot {
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            range_requests: self.range_requests.load(Ordering::Relaxed),
            bytes_served: self.bytes_served.load(Ordering::Relaxed),
            protocol_restarts: self.protocol_restarts.load(Ordering::Relaxed),
            evicted_files: self.evicted_files.load(Ordering::Relaxed),
            evicted_bytes: self.evicted_bytes.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn set(counter: &AtomicU64, n: u64) {
        counter.store(n, Ordering::Relaxed);
    }
}
