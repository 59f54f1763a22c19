use std::io::{ErrorKind, Read};

use crate::byte_buffer::ByteBuffer;
use crate::error::{Result, StreamError};
use crate::transport::HttpResponse;

/// Pulls bytes out of one in-flight response body and keeps count.
///
/// `read` is the only place the stream blocks on the network.
#[derive(Default)]
pub struct RangeLoader {
    body: Option<Box<dyn Read + Send>>,
    received: u64,
    total: Option<u64>,
    ended: bool,
}

impl std::fmt::Debug for RangeLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeLoader")
            .field("open", &self.is_open())
            .field("received", &self.received)
            .field("total", &self.total)
            .field("ended", &self.ended)
            .finish()
    }
}

impl RangeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `response`'s body and reset accounting.
    pub fn open(&mut self, response: HttpResponse) {
        self.body = Some(response.body);
        self.received = 0;
        self.total = response.content_length;
        self.ended = false;
    }

    pub fn is_open(&self) -> bool {
        self.body.is_some()
    }

    /// `(received, total)` since the last `open`. When the response did not declare a length, the
    /// total is unknown until the body ends and is reported as `received` until then.
    pub fn progress(&self) -> (u64, u64) {
        (self.received, self.total.unwrap_or(self.received))
    }

    /// Bytes still expected. An undeclared length counts as unbounded until the body ends.
    pub fn remaining(&self) -> u64 {
        match self.total {
            Some(total) => total.saturating_sub(self.received),
            None if self.ended => 0,
            None => u64::MAX,
        }
    }

    /// Block until exactly `n` bytes have been appended to `buffer`.
    ///
    /// A body that ends early is a transport failure. Bytes that did arrive stay in the buffer.
    pub fn read(&mut self, buffer: &mut ByteBuffer, n: usize) -> Result<()> {
        let filled = self.fill(buffer, n)?;
        if filled < n {
            return Err(StreamError::Http(format!(
                "response body ended early: received {} of {} bytes",
                self.received,
                self.total
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "?".to_string())
            )));
        }
        Ok(())
    }

    /// Read `min(max, remaining)` bytes, returning how many were appended.
    ///
    /// With an undeclared length this reads until `max` bytes arrive or the body ends.
    pub fn load_received(&mut self, buffer: &mut ByteBuffer, max: usize) -> Result<usize> {
        let n = usize::try_from(self.remaining()).map_or(max, |remaining| remaining.min(max));
        if n == 0 {
            return Ok(0);
        }
        if self.total.is_some() {
            self.read(buffer, n)?;
            Ok(n)
        } else {
            self.fill(buffer, n)
        }
    }

    /// Drop the body. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.body = None;
    }

    fn fill(&mut self, buffer: &mut ByteBuffer, n: usize) -> Result<usize> {
        if n == 0 {
            return Ok(0);
        }
        let body = self
            .body
            .as_mut()
            .ok_or_else(|| StreamError::Http("no response is open".to_string()))?;

        let spare = buffer.spare_mut(n)?;
        let mut filled = 0;
        let mut failure = None;
        while filled < n {
            match body.read(&mut spare[filled..]) {
                Ok(0) => {
                    self.ended = true;
                    break;
                }
                Ok(k) => filled += k,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        buffer.commit(n, filled);
        self.received += filled as u64;

        if self.ended && self.total.is_none() {
            self.total = Some(self.received);
        }
        match failure {
            Some(err) => Err(StreamError::Http(err.to_string())),
            None => Ok(filled),
        }
    }
}
