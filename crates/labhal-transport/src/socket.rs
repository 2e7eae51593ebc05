use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info};

use crate::buffer::ByteStreamBuffer;
use crate::config::{ConnectionParameters, TimeoutKind, TransportKind};
use crate::error::{Result, TransportError};
use crate::traits::{os_timeout, Backend};

/// Bytes requested from the OS per read.
pub const READ_CHUNK_SIZE: usize = 20 * 1024;

/// Raw TCP socket transport (e.g. SCPI over port 5025).
#[derive(Debug)]
pub struct Socket {
    host: String,
    port: u16,
    read_terminator: Vec<u8>,
    connect_timeout: Option<Duration>,
    stream: Option<TcpStream>,
    buffer: ByteStreamBuffer,
}

impl Socket {
    pub fn new(params: &ConnectionParameters) -> Self {
        let network = params.network();
        Self::connect_to(
            network.host.clone(),
            u16::try_from(network.port).unwrap_or_default(),
            params.read_terminator(),
            params.timeout(TimeoutKind::Connect),
        )
    }

    /// Build a socket for an explicit address.
    pub fn connect_to(
        host: impl Into<String>,
        port: u16,
        read_terminator: &[u8],
        connect_timeout: Option<Duration>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            read_terminator: read_terminator.to_vec(),
            connect_timeout,
            stream: None,
            buffer: ByteStreamBuffer::new(),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The connected stream, if open.
    pub fn stream(&self) -> Option<&TcpStream> {
        self.stream.as_ref()
    }

    fn connect(&self) -> Result<TcpStream> {
        let target = self.address();
        let addrs = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|source| TransportError::Connect {
                target: target.clone(),
                source,
            })?;

        let mut last_err = std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            "host resolved to no addresses",
        );
        for addr in addrs {
            let attempt = match self.connect_timeout.and_then(os_timeout) {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    debug!(%addr, error = %err, "connect attempt failed");
                    last_err = err;
                }
            }
        }

        Err(TransportError::Connect {
            target,
            source: last_err,
        })
    }
}

impl Backend for Socket {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    fn open(&mut self) -> Result<()> {
        info!(host = %self.host, port = self.port, "connecting to instrument socket");
        let stream = self.connect()?;
        stream.set_nodelay(true)?;
        self.buffer.reset();
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            debug!(address = %self.address(), "closing socket");
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.buffer.reset();
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotOpen)?;
        stream.write_all(data).map_err(TransportError::from_io)
    }

    fn recv(&mut self, size: Option<usize>) -> Result<Bytes> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotOpen)?;
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];
        self.buffer
            .read_framed(size, &self.read_terminator, |buf| {
                let read = stream.read(&mut chunk)?;
                buf.put(&chunk[..read]);
                Ok(read)
            })
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        let stream = self.stream.as_ref().ok_or(TransportError::NotOpen)?;
        stream.set_read_timeout(os_timeout(timeout))?;
        stream.set_write_timeout(os_timeout(timeout))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    fn socket(port: u16, terminator: &[u8]) -> Socket {
        Socket::connect_to("127.0.0.1", port, terminator, Some(Duration::from_secs(5)))
    }

    #[test]
    fn recv_reassembles_split_messages() {
        let (listener, port) = listener();
        let handle = std::thread::spawn(move || {
            let (mut peer, _) = listener.accept().unwrap();
            peer.write_all(b"+1.2").unwrap();
            peer.flush().unwrap();
            std::thread::sleep(Duration::from_millis(20));
            peer.write_all(b"5E+00\n+3.0").unwrap();
            std::thread::sleep(Duration::from_millis(20));
            peer.write_all(b"\n").unwrap();
        });

        let mut sock = socket(port, b"\n");
        sock.open().unwrap();
        sock.set_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(sock.recv(None).unwrap().as_ref(), b"+1.25E+00\n");
        assert_eq!(sock.recv(None).unwrap().as_ref(), b"+3.0\n");
        sock.close().unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn query_round_trip() {
        let (listener, port) = listener();
        let handle = std::thread::spawn(move || {
            let (mut peer, _) = listener.accept().unwrap();
            let mut buf = [0u8; 7];
            peer.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, b"*IDN?\r\n");
            peer.write_all(b"ACME,PSU-1,0001,1.0\n").unwrap();
        });

        let mut sock = socket(port, b"\n");
        sock.open().unwrap();
        let reply = sock.query(b"*IDN?\r\n", None).unwrap();
        assert_eq!(reply.as_ref(), b"ACME,PSU-1,0001,1.0\n");
        handle.join().unwrap();
    }

    #[test]
    fn sized_recv_returns_exact_count() {
        let (listener, port) = listener();
        let handle = std::thread::spawn(move || {
            let (mut peer, _) = listener.accept().unwrap();
            peer.write_all(&[1, 2, 3, 4, 5, 6]).unwrap();
        });

        let mut sock = socket(port, b"\n");
        sock.open().unwrap();
        assert_eq!(sock.recv(Some(4)).unwrap().as_ref(), &[1, 2, 3, 4]);
        assert_eq!(sock.recv(Some(2)).unwrap().as_ref(), &[5, 6]);
        handle.join().unwrap();
    }

    #[test]
    fn peer_close_is_reported() {
        let (listener, port) = listener();
        let handle = std::thread::spawn(move || {
            let (mut peer, _) = listener.accept().unwrap();
            peer.write_all(b"no terminator").unwrap();
        });

        let mut sock = socket(port, b"\n");
        sock.open().unwrap();
        handle.join().unwrap();
        assert!(matches!(
            sock.recv(None),
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[test]
    fn read_timeout_surfaces_as_timeout() {
        let (listener, port) = listener();
        let handle = std::thread::spawn(move || {
            let (peer, _) = listener.accept().unwrap();
            std::thread::sleep(Duration::from_millis(300));
            drop(peer);
        });

        let mut sock = socket(port, b"\n");
        sock.open().unwrap();
        sock.set_timeout(Duration::from_millis(50)).unwrap();
        assert!(matches!(sock.recv(None), Err(TransportError::Timeout)));
        handle.join().unwrap();
    }

    #[test]
    fn connect_refused_names_target() {
        let (listener, port) = listener();
        drop(listener);
        let mut sock = socket(port, b"\n");
        let err = sock.open().unwrap_err();
        assert!(matches!(err, TransportError::Connect { ref target, .. } if target.ends_with(&port.to_string())));
    }

    #[test]
    fn io_on_closed_socket_fails() {
        let mut sock = socket(1, b"\n");
        assert!(matches!(sock.send(b"x"), Err(TransportError::NotOpen)));
        assert!(matches!(sock.recv(None), Err(TransportError::NotOpen)));
    }
}
