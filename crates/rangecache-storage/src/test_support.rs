//! Deterministic in-memory HTTP server used by the unit tests.

use std::collections::VecDeque;
use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex};

use rangecache_http_range::ByteRange;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use url::Url;

use crate::error::Result;
use crate::transport::{HttpResponse, HttpTransport};

#[path = "../tests/common/ranges.rs"]
mod ranges;

use ranges::{interpret_range, RangeRequest};

pub(crate) const TEST_BOUNDARY: &str = "RANGECACHE_TEST_BOUNDARY";

/// Deterministic pseudo-random content so misplaced bytes are caught.
pub(crate) fn pattern(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u32).wrapping_mul(2_654_435_761).rotate_left(7) as u8)
        .collect()
}

pub(crate) fn multipart_body(
    data: &[u8],
    ranges: &[ByteRange],
    boundary: &str,
    content_type: &str,
) -> Vec<u8> {
    let mut body = Vec::new();
    for r in ranges {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Type: {content_type}\r\nContent-Range: bytes {}-{}/{}\r\n\r\n",
                r.start,
                r.end,
                data.len()
            )
            .as_bytes(),
        );
        body.extend_from_slice(&data[r.start as usize..=r.end as usize]);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}

/// Hands out at most `step` bytes per `read` call.
struct Trickle {
    inner: Cursor<Vec<u8>>,
    step: usize,
}

impl Read for Trickle {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = buf.len().min(self.step);
        self.inner.read(&mut buf[..n])
    }
}

#[derive(Default)]
struct TransportLog {
    heads: usize,
    gets: usize,
    ranges: Vec<String>,
    get_headers: Vec<HeaderMap>,
    garbled_remaining: usize,
    scripted: VecDeque<Vec<ByteRange>>,
}

#[derive(Clone)]
pub(crate) struct MemoryTransport {
    data: Arc<Vec<u8>>,
    content_type: String,
    head_supported: bool,
    honor_ranges: bool,
    first_range_only: bool,
    fixed_status: Option<u16>,
    step: usize,
    log: Arc<Mutex<TransportLog>>,
}

impl MemoryTransport {
    pub(crate) fn new(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
            content_type: "application/octet-stream".to_string(),
            head_supported: true,
            honor_ranges: true,
            first_range_only: false,
            fixed_status: None,
            step: usize::MAX,
            log: Arc::default(),
        }
    }

    pub(crate) fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = content_type.to_string();
        self
    }

    pub(crate) fn without_head(mut self) -> Self {
        self.head_supported = false;
        self
    }

    /// Answer every `GET` with `200` and the full body.
    pub(crate) fn ignoring_ranges(mut self) -> Self {
        self.honor_ranges = false;
        self
    }

    /// Serve only the first requested range, as a single part.
    pub(crate) fn first_range_only(mut self) -> Self {
        self.first_range_only = true;
        self
    }

    /// Answer every `GET` with `status` and no body.
    pub(crate) fn responding_with(mut self, status: u16) -> Self {
        self.fixed_status = Some(status);
        self
    }

    /// Deliver bodies in reads of at most `step` bytes.
    pub(crate) fn trickle(mut self, step: usize) -> Self {
        self.step = step.max(1);
        self
    }

    /// The next `n` ranged responses carry an unparseable `Content-Range`.
    pub(crate) fn garbling_next(self, n: usize) -> Self {
        self.log.lock().unwrap().garbled_remaining = n;
        self
    }

    /// Answer the next ranged `GET` with exactly `ranges`, whatever was asked for.
    pub(crate) fn scripting_next(self, ranges: Vec<ByteRange>) -> Self {
        self.log.lock().unwrap().scripted.push_back(ranges);
        self
    }

    pub(crate) fn get_count(&self) -> usize {
        self.log.lock().unwrap().gets
    }

    pub(crate) fn head_count(&self) -> usize {
        self.log.lock().unwrap().heads
    }

    pub(crate) fn requested_ranges(&self) -> Vec<String> {
        self.log.lock().unwrap().ranges.clone()
    }

    pub(crate) fn get_headers(&self) -> Vec<HeaderMap> {
        self.log.lock().unwrap().get_headers.clone()
    }

    fn respond(&self, status: u16, headers: HeaderMap, body: Vec<u8>) -> HttpResponse {
        let mut headers = headers;
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len() as u64));
        HttpResponse {
            status,
            content_length: Some(body.len() as u64),
            headers,
            body: Box::new(Trickle {
                inner: Cursor::new(body),
                step: self.step,
            }),
        }
    }
}

impl HttpTransport for MemoryTransport {
    fn head(&self, _url: &Url, _headers: &HeaderMap) -> Result<HttpResponse> {
        self.log.lock().unwrap().heads += 1;
        if !self.head_supported {
            return Ok(self.respond(405, HeaderMap::new(), Vec::new()));
        }
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_str(&self.content_type).unwrap());
        let mut resp = self.respond(200, headers, Vec::new());
        resp.content_length = Some(self.data.len() as u64);
        Ok(resp)
    }

    fn get(&self, _url: &Url, headers: &HeaderMap) -> Result<HttpResponse> {
        let range_header = headers
            .get(RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let (garbled, scripted) = {
            let mut log = self.log.lock().unwrap();
            log.gets += 1;
            log.get_headers.push(headers.clone());
            if let Some(range) = &range_header {
                log.ranges.push(range.clone());
            }
            let garbled = range_header.is_some() && log.garbled_remaining > 0;
            if garbled {
                log.garbled_remaining -= 1;
            }
            let scripted = match range_header {
                Some(_) => log.scripted.pop_front(),
                None => None,
            };
            (garbled, scripted)
        };

        if let Some(status) = self.fixed_status {
            return Ok(self.respond(status, HeaderMap::new(), Vec::new()));
        }

        let mut out = HeaderMap::new();
        let len = self.data.len() as u64;
        let request = if self.honor_ranges {
            interpret_range(range_header.as_deref(), len)
        } else {
            RangeRequest::Whole
        };
        let mut ranges = match request {
            RangeRequest::Ranges(ranges) => ranges,
            RangeRequest::Whole => {
                out.insert(CONTENT_TYPE, HeaderValue::from_str(&self.content_type).unwrap());
                return Ok(self.respond(200, out, self.data.to_vec()));
            }
            RangeRequest::Unsatisfiable => {
                out.insert(
                    CONTENT_RANGE,
                    HeaderValue::from_str(&format!("bytes */{len}")).unwrap(),
                );
                return Ok(self.respond(416, out, Vec::new()));
            }
        };
        if let Some(script) = scripted {
            ranges = script;
        }
        if self.first_range_only {
            ranges.truncate(1);
        }

        if ranges.len() == 1 {
            let r = ranges[0];
            let content_range = if garbled {
                "bytes nonsense".to_string()
            } else {
                format!("bytes {}-{}/{len}", r.start, r.end)
            };
            out.insert(CONTENT_TYPE, HeaderValue::from_str(&self.content_type).unwrap());
            out.insert(CONTENT_RANGE, HeaderValue::from_str(&content_range).unwrap());
            let body = self.data[r.start as usize..=r.end as usize].to_vec();
            return Ok(self.respond(206, out, body));
        }

        let boundary = if garbled { "SOMETHING_ELSE" } else { TEST_BOUNDARY };
        let body = multipart_body(&self.data, &ranges, boundary, &self.content_type);
        out.insert(
            CONTENT_TYPE,
            HeaderValue::from_str(&format!("multipart/byteranges; boundary={TEST_BOUNDARY}"))
                .unwrap(),
        );
        Ok(self.respond(206, out, body))
    }
}
