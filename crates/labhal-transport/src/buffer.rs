use std::fmt;
use std::io::ErrorKind;

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{Result, TransportError};

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;

/// FIFO byte accumulator with a resumable terminator search.
///
/// Stream transports `put` whatever each low-level read returns and then
/// `search` for the read terminator. A failed search keeps both the bytes and
/// the scan position, so the next search after more data arrives continues
/// where the previous one stopped instead of rescanning.
#[derive(Debug, Default)]
pub struct ByteStreamBuffer {
    buf: BytesMut,
    search_index: usize,
    target_index: usize,
}

impl ByteStreamBuffer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            search_index: 0,
            target_index: 0,
        }
    }

    /// Append bytes to the tail.
    pub fn put(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Look at up to `size` bytes at the head without consuming them.
    pub fn peek(&self, size: usize) -> &[u8] {
        &self.buf[..size.min(self.buf.len())]
    }

    /// Drain up to `size` bytes from the head and reset the search cursors.
    pub fn get(&mut self, size: usize) -> Bytes {
        let size = size.min(self.buf.len());
        let out = self.buf.split_to(size).freeze();
        self.reset_index();
        out
    }

    /// Drain everything buffered.
    pub fn take_all(&mut self) -> Bytes {
        let out = self.buf.split().freeze();
        self.reset_index();
        out
    }

    /// Scan for `pattern` from the saved cursor position.
    ///
    /// On a full match, drains and returns everything up to and including the
    /// pattern. Otherwise returns `None`, leaving the bytes and cursors in place.
    ///
    /// This is a single-pass scanner: a mismatch restarts the pattern at the
    /// current byte without backtracking, so patterns with a self-overlapping
    /// prefix (e.g. `aab` inside `aaab`) can be missed.
    pub fn search(&mut self, pattern: &[u8]) -> Option<Bytes> {
        if pattern.is_empty() {
            return None;
        }

        while self.search_index < self.buf.len() {
            let byte = self.buf[self.search_index];
            self.search_index += 1;

            if byte == pattern[self.target_index] {
                self.target_index += 1;
            } else {
                self.target_index = usize::from(byte == pattern[0]);
            }

            if self.target_index == pattern.len() {
                let end = self.search_index;
                return Some(self.get(end));
            }
        }

        None
    }

    /// Drop every consecutive copy of `terminator` at the head of the buffer.
    pub fn clean(&mut self, terminator: &[u8]) {
        if terminator.is_empty() {
            return;
        }
        while self.buf.starts_with(terminator) {
            self.buf.advance(terminator.len());
        }
        self.reset_index();
    }

    /// Reset both search cursors to the head.
    pub fn reset_index(&mut self) {
        self.search_index = 0;
        self.target_index = 0;
    }

    /// Discard all buffered bytes and reset the cursors.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.reset_index();
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Current `(search_index, target_index)`.
    pub fn cursors(&self) -> (usize, usize) {
        (self.search_index, self.target_index)
    }

    /// Run the framed read loop shared by every stream transport.
    ///
    /// With `size` set, returns once at least `size` bytes are buffered.
    /// Otherwise returns the first match of `terminator`, or whatever the
    /// first non-empty read produced when `terminator` is empty. `fill` performs
    /// one blocking low-level read into the buffer and returns the number of
    /// bytes added; `Ok(0)` means the peer closed the stream.
    ///
    /// A timeout during a size-bounded read yields the partial data if any was
    /// buffered.
    pub fn read_framed<F>(
        &mut self,
        size: Option<usize>,
        terminator: &[u8],
        mut fill: F,
    ) -> Result<Bytes>
    where
        F: FnMut(&mut ByteStreamBuffer) -> std::io::Result<usize>,
    {
        loop {
            match size {
                Some(size) if self.len() >= size => return Ok(self.get(size)),
                Some(_) => {}
                None if terminator.is_empty() => {
                    if !self.is_empty() {
                        return Ok(self.take_all());
                    }
                }
                None => {
                    if let Some(frame) = self.search(terminator) {
                        return Ok(frame);
                    }
                }
            }

            match fill(self) {
                Ok(0) => return Err(TransportError::ConnectionClosed),
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => {
                    let err = TransportError::from_io(err);
                    if matches!(err, TransportError::Timeout) && size.is_some() && !self.is_empty()
                    {
                        return Ok(self.take_all());
                    }
                    return Err(err);
                }
            }
        }
    }
}

/// Displays raw bytes with non-printable characters escaped, for logging.
pub struct Escaped<'a>(pub &'a [u8]);

impl fmt::Display for Escaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &byte in self.0 {
            write!(f, "{}", std::ascii::escape_default(byte))?;
        }
        Ok(())
    }
}
