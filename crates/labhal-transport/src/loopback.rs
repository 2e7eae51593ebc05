use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::buffer::Escaped;
use crate::config::TransportKind;
use crate::error::{Result, TransportError};
use crate::traits::Backend;

#[derive(Debug, Default)]
struct Exchange {
    replies: VecDeque<Bytes>,
    sent: Vec<Bytes>,
    timeouts: Vec<Duration>,
}

/// Test-side handle to a [`Loopback`] backend.
///
/// Clones share state with the backend they were created for.
#[derive(Debug, Clone, Default)]
pub struct LoopbackHandle {
    inner: Arc<Mutex<Exchange>>,
}

impl LoopbackHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next `recv`.
    pub fn push_reply(&self, reply: impl Into<Bytes>) {
        self.lock().replies.push_back(reply.into());
    }

    /// Drain everything sent so far.
    pub fn take_sent(&self) -> Vec<Bytes> {
        std::mem::take(&mut self.lock().sent)
    }

    pub fn clear_sent(&self) {
        self.lock().sent.clear();
    }

    /// Timeouts pushed by the owning transport, oldest first.
    pub fn timeouts(&self) -> Vec<Duration> {
        self.lock().timeouts.clone()
    }

    pub fn pending_replies(&self) -> usize {
        self.lock().replies.len()
    }

    fn lock(&self) -> MutexGuard<'_, Exchange> {
        // Recovers from a test that panicked while holding the lock.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-memory backend: records writes and answers reads from a script.
///
/// A `recv` with nothing queued fails with [`TransportError::Timeout`], the
/// same as a silent instrument.
#[derive(Debug)]
pub struct Loopback {
    handle: LoopbackHandle,
    open: bool,
}

impl Loopback {
    pub fn new(handle: LoopbackHandle) -> Self {
        Self {
            handle,
            open: false,
        }
    }

    pub fn handle(&self) -> &LoopbackHandle {
        &self.handle
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(TransportError::NotOpen)
        }
    }
}

impl Backend for Loopback {
    fn kind(&self) -> TransportKind {
        TransportKind::Loopback
    }

    fn open(&mut self) -> Result<()> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        debug!(data = %Escaped(data), "loopback send");
        self.handle.lock().sent.push(Bytes::copy_from_slice(data));
        Ok(())
    }

    fn recv(&mut self, size: Option<usize>) -> Result<Bytes> {
        self.ensure_open()?;
        let mut exchange = self.handle.lock();
        let mut reply = exchange.replies.pop_front().ok_or(TransportError::Timeout)?;
        if let Some(size) = size.filter(|&size| size < reply.len()) {
            let rest = reply.split_off(size);
            exchange.replies.push_front(rest);
        }
        Ok(reply)
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.handle.lock().timeouts.push(timeout);
        Ok(())
    }
}
