use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::buffer::Escaped;
use crate::config::{ConnectionParameters, HttpMethod, TimeoutKind, TransportKind};
use crate::error::{Result, TransportError};

/// Method, form body and headers for the next request of an HTTP transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub form: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
}

/// The per-backend half of a transport.
///
/// Implementors only deal with their own device or library. Open/close
/// idempotency, timeout caching, logging and the open-state check live in
/// [`Transport`], which is what callers use.
pub trait Backend: Send {
    fn kind(&self) -> TransportKind;

    fn open(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Read `size` bytes, or one terminator-bounded message when `size` is `None`.
    fn recv(&mut self, size: Option<usize>) -> Result<Bytes>;

    fn query(&mut self, data: &[u8], size: Option<usize>) -> Result<Bytes> {
        self.send(data)?;
        self.recv(size)
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Stage method, form and headers for the next request. Only HTTP supports this.
    fn prepare_request(&mut self, request: HttpRequest) -> Result<()> {
        let _ = request;
        Err(TransportError::unsupported(self.kind(), "prepare_request"))
    }
}

impl<T: Backend + ?Sized> Backend for Box<T> {
    fn kind(&self) -> TransportKind {
        (**self).kind()
    }

    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        (**self).send(data)
    }

    fn recv(&mut self, size: Option<usize>) -> Result<Bytes> {
        (**self).recv(size)
    }

    fn query(&mut self, data: &[u8], size: Option<usize>) -> Result<Bytes> {
        (**self).query(data, size)
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        (**self).set_timeout(timeout)
    }

    fn prepare_request(&mut self, request: HttpRequest) -> Result<()> {
        (**self).prepare_request(request)
    }
}

/// A connection to one instrument.
///
/// `Transport` owns its backend and tracks whether it is open. `open` and
/// `close` are idempotent, timeouts are only pushed to the backend when they
/// change, and every backend failure is logged before it is returned.
///
/// Call [`close`](Self::close) explicitly; dropping an open transport closes it
/// as a fallback.
pub struct Transport<B: Backend = Box<dyn Backend>> {
    params: ConnectionParameters,
    name: String,
    backend: B,
    enabled: bool,
    timeout: Option<Duration>,
}

impl<B: Backend> Transport<B> {
    pub fn new(params: ConnectionParameters, backend: B) -> Self {
        let name = params.name();
        Self {
            params,
            name,
            backend,
            enabled: false,
            timeout: None,
        }
    }

    /// Open the backend and apply the connect timeout. No-op when already open.
    pub fn open(&mut self) -> Result<()> {
        if self.enabled {
            debug!(transport = %self.name, "already open");
            return Ok(());
        }

        info!(transport = %self.name, kind = %self.backend.kind(), "opening transport");
        let result = self.backend.open();
        self.check("open", result)?;

        if let Err(err) = self.push_timeout(self.params.timeout(TimeoutKind::Connect)) {
            self.timeout = None;
            if let Err(close_err) = self.backend.close() {
                warn!(transport = %self.name, error = %close_err, "close after failed open");
            }
            return Err(err);
        }
        self.enabled = true;
        Ok(())
    }

    /// Close the backend. No-op when not open.
    pub fn close(&mut self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        self.enabled = false;
        self.timeout = None;
        info!(transport = %self.name, "closing transport");
        let result = self.backend.close();
        self.check("close", result)
    }

    pub fn is_open(&self) -> bool {
        self.enabled
    }

    /// Change the I/O timeout.
    ///
    /// `None` leaves the current timeout unchanged. The backend is only called
    /// when the value differs from the last one applied.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        if timeout.is_some() {
            self.ensure_open()?;
        }
        self.push_timeout(timeout)
    }

    fn push_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        let Some(timeout) = timeout else {
            return Ok(());
        };
        if self.timeout == Some(timeout) {
            return Ok(());
        }

        debug!(transport = %self.name, ?timeout, "setting timeout");
        let result = self.backend.set_timeout(timeout);
        self.check("set_timeout", result)?;
        self.timeout = Some(timeout);
        Ok(())
    }

    /// Apply one of the configured timeouts.
    pub fn apply_timeout(&mut self, kind: TimeoutKind) -> Result<()> {
        self.set_timeout(self.params.timeout(kind))
    }

    /// The last timeout pushed to the backend.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        debug!(transport = %self.name, data = %Escaped(data), "send");
        let result = self.backend.send(data);
        self.check("send", result)
    }

    pub fn recv_raw(&mut self, size: Option<usize>) -> Result<Bytes> {
        self.ensure_open()?;
        let result = self.backend.recv(size);
        let data = self.check("recv", result)?;
        debug!(transport = %self.name, data = %Escaped(&data), "recv");
        Ok(data)
    }

    pub fn query_raw(&mut self, data: &[u8], size: Option<usize>) -> Result<Bytes> {
        self.ensure_open()?;
        debug!(transport = %self.name, data = %Escaped(data), "query");
        let result = self.backend.query(data, size);
        let reply = self.check("query", result)?;
        debug!(transport = %self.name, data = %Escaped(&reply), "query reply");
        Ok(reply)
    }

    /// Stage method, form and headers for the next HTTP request.
    pub fn prepare_request(&mut self, request: HttpRequest) -> Result<()> {
        let result = self.backend.prepare_request(request);
        self.check("prepare_request", result)
    }

    pub fn params(&self) -> &ConnectionParameters {
        &self.params
    }

    /// Connection name used in log output.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TransportKind {
        self.backend.kind()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    fn ensure_open(&self) -> Result<()> {
        if self.enabled {
            Ok(())
        } else {
            Err(TransportError::NotOpen)
        }
    }

    fn check<T>(&self, operation: &'static str, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            error!(transport = %self.name, operation, error = %err, "transport operation failed");
        }
        result
    }
}

impl<B: Backend> Drop for Transport<B> {
    fn drop(&mut self) {
        if self.enabled {
            warn!(transport = %self.name, "transport dropped while open; closing");
            let _ = self.close();
        }
    }
}

impl<B: Backend> std::fmt::Debug for Transport<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("name", &self.name)
            .field("kind", &self.backend.kind())
            .field("enabled", &self.enabled)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Timeout as the OS socket/device APIs expect it; zero means "block".
pub(crate) fn os_timeout(timeout: Duration) -> Option<Duration> {
    if timeout.is_zero() {
        None
    } else {
        Some(timeout)
    }
}
