use crate::error::{Result, StreamError};

/// Growable working buffer with a read cursor.
///
/// Bytes are appended at the tail and consumed from the cursor. Consumed bytes are only reclaimed
/// when more space is requested, so `read` can hand out borrowed slices without copying.
#[derive(Debug, Default)]
pub struct ByteBuffer {
    buf: Vec<u8>,
    pos: usize,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure `n` bytes can be appended without reallocating.
    ///
    /// The consumed prefix is dropped first; only if that is not enough is the allocation grown.
    pub fn need(&mut self, n: usize) -> Result<()> {
        self.compact();
        self.buf
            .try_reserve(n)
            .map_err(|_| StreamError::OutOfMemory { requested: n })
    }

    /// Append `src` at the tail.
    pub fn copy(&mut self, src: &[u8]) -> Result<()> {
        self.need(src.len())?;
        self.buf.extend_from_slice(src);
        Ok(())
    }

    /// Borrow the next `n` unread bytes and advance past them.
    ///
    /// Returns `None` (cursor untouched) when fewer than `n` bytes are buffered.
    pub fn read(&mut self, n: usize) -> Option<&[u8]> {
        if self.len() < n {
            return None;
        }
        let start = self.pos;
        self.pos += n;
        Some(&self.buf[start..start + n])
    }

    /// Index (relative to the cursor) of the first occurrence of `delim` in the unread bytes.
    pub fn find(&self, delim: &[u8]) -> Option<usize> {
        if delim.is_empty() {
            return Some(0);
        }
        self.unread()
            .windows(delim.len())
            .position(|window| window == delim)
    }

    /// Number of unread bytes.
    pub fn len(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn unread(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    /// Skip `n` unread bytes (clamped to what is buffered).
    pub fn consume(&mut self, n: usize) {
        self.pos += n.min(self.len());
        if self.pos == self.buf.len() {
            self.clear();
        }
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.pos = 0;
    }

    /// Spare room at the tail for readers that fill in place. Callers must follow up with
    /// [`ByteBuffer::commit`].
    pub(crate) fn spare_mut(&mut self, n: usize) -> Result<&mut [u8]> {
        self.need(n)?;
        let len = self.buf.len();
        self.buf.resize(len + n, 0);
        Ok(&mut self.buf[len..])
    }

    /// Keep `filled` bytes of the last [`ByteBuffer::spare_mut`] region of size `reserved`.
    pub(crate) fn commit(&mut self, reserved: usize, filled: usize) {
        let len = self.buf.len();
        self.buf.truncate(len - reserved + filled.min(reserved));
    }

    fn compact(&mut self) {
        if self.pos == 0 {
            return;
        }
        self.buf.drain(..self.pos);
        self.pos = 0;
    }
}
