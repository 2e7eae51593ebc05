//! Minimal ONC-RPC (RFC 5531) client over TCP with XDR encoding.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::error::{Result, TransportError};

pub const PORTMAPPER_PROGRAM: u32 = 100_000;
pub const PORTMAPPER_VERSION: u32 = 2;
pub const PORTMAPPER_PORT: u16 = 111;
const PMAPPROC_GETPORT: u32 = 3;
const IPPROTO_TCP: u32 = 6;

const CALL: u32 = 0;
const REPLY: u32 = 1;
const RPC_VERSION: u32 = 2;
const MSG_ACCEPTED: u32 = 0;
const SUCCESS: u32 = 0;
const AUTH_NONE: u32 = 0;

const LAST_FRAGMENT: u32 = 0x8000_0000;
const MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;

/// Builds an XDR-encoded message.
#[derive(Debug, Default)]
pub struct XdrWriter {
    buf: BytesMut,
}

impl XdrWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32(value);
        self
    }

    pub fn put_i32(&mut self, value: i32) -> &mut Self {
        self.buf.put_i32(value);
        self
    }

    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        self.put_u32(u32::from(value))
    }

    /// Variable-length opaque: length, bytes, zero padding to a 4-byte boundary.
    pub fn put_opaque(&mut self, data: &[u8]) -> &mut Self {
        // Callers never pass more than a u32 worth of data; RPC records are bounded.
        self.buf.put_u32(data.len() as u32);
        self.buf.put_slice(data);
        self.buf.put_bytes(0, padding(data.len()));
        self
    }

    pub fn put_string(&mut self, value: &str) -> &mut Self {
        self.put_opaque(value.as_bytes())
    }

    /// Append already-encoded XDR.
    pub fn put_raw(&mut self, data: &[u8]) -> &mut Self {
        self.buf.put_slice(data);
        self
    }

    pub fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

/// Reads XDR values from a decoded message.
#[derive(Debug)]
pub struct XdrReader<'a> {
    buf: &'a [u8],
}

impl<'a> XdrReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        if self.buf.remaining() < 4 {
            return Err(TransportError::Rpc("truncated xdr value".to_string()));
        }
        Ok(self.buf.get_u32())
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        self.get_u32().map(|value| value as i32)
    }

    pub fn get_bool(&mut self) -> Result<bool> {
        self.get_u32().map(|value| value != 0)
    }

    pub fn get_opaque(&mut self) -> Result<Bytes> {
        let len = self.get_u32()? as usize;
        let padded = len + padding(len);
        if self.buf.remaining() < padded {
            return Err(TransportError::Rpc(format!(
                "truncated xdr opaque ({len} bytes declared, {} available)",
                self.buf.remaining()
            )));
        }
        let data = Bytes::copy_from_slice(&self.buf[..len]);
        self.buf.advance(padded);
        Ok(data)
    }

    pub fn get_string(&mut self) -> Result<String> {
        let data = self.get_opaque()?;
        String::from_utf8(data.to_vec())
            .map_err(|_| TransportError::Rpc("xdr string is not utf-8".to_string()))
    }

    /// The undecoded tail.
    pub fn rest(&self) -> &'a [u8] {
        self.buf
    }
}

fn padding(len: usize) -> usize {
    (4 - len % 4) % 4
}

/// Write `data` as a single last-fragment record.
pub fn write_record<W: Write>(writer: &mut W, data: &[u8]) -> Result<()> {
    if data.len() > MAX_RECORD_SIZE {
        return Err(TransportError::Rpc(format!(
            "record too large ({} bytes)",
            data.len()
        )));
    }
    let mut frame = BytesMut::with_capacity(4 + data.len());
    frame.put_u32(LAST_FRAGMENT | data.len() as u32);
    frame.put_slice(data);
    writer.write_all(&frame).map_err(TransportError::from_io)
}

/// Read one record, joining its fragments.
pub fn read_record<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut record = Vec::new();
    loop {
        let mut header = [0u8; 4];
        reader
            .read_exact(&mut header)
            .map_err(TransportError::from_io)?;
        let header = u32::from_be_bytes(header);
        let len = (header & !LAST_FRAGMENT) as usize;
        if record.len() + len > MAX_RECORD_SIZE {
            return Err(TransportError::Rpc(format!(
                "record exceeds {MAX_RECORD_SIZE} bytes"
            )));
        }

        let start = record.len();
        record.resize(start + len, 0);
        reader
            .read_exact(&mut record[start..])
            .map_err(TransportError::from_io)?;

        if header & LAST_FRAGMENT != 0 {
            return Ok(record);
        }
    }
}

/// A connected RPC client for one program/version.
#[derive(Debug)]
pub struct RpcClient {
    stream: TcpStream,
    program: u32,
    version: u32,
    xid: u32,
}

impl RpcClient {
    pub fn connect(
        host: &str,
        port: u16,
        program: u32,
        version: u32,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let target = format!("{host}:{port}");
        let connect_err = |source: std::io::Error| TransportError::Connect {
            target: target.clone(),
            source,
        };
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(connect_err)?
            .next()
            .ok_or_else(|| {
                connect_err(std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    "host resolved to no addresses",
                ))
            })?;
        let stream = match timeout.filter(|t| !t.is_zero()) {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        }
        .map_err(connect_err)?;
        stream.set_nodelay(true)?;
        if let Some(timeout) = timeout.filter(|t| !t.is_zero()) {
            stream.set_read_timeout(Some(timeout))?;
            stream.set_write_timeout(Some(timeout))?;
        }

        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.subsec_nanos())
            .unwrap_or_default();

        Ok(Self {
            stream,
            program,
            version,
            xid: seed,
        })
    }

    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout)?;
        self.stream.set_write_timeout(timeout)?;
        Ok(())
    }

    /// Call `procedure` with pre-encoded arguments and return the encoded results.
    pub fn call(&mut self, procedure: u32, args: &[u8]) -> Result<Bytes> {
        self.xid = self.xid.wrapping_add(1);
        let mut msg = XdrWriter::new();
        msg.put_u32(self.xid)
            .put_u32(CALL)
            .put_u32(RPC_VERSION)
            .put_u32(self.program)
            .put_u32(self.version)
            .put_u32(procedure)
            .put_u32(AUTH_NONE)
            .put_u32(0)
            .put_u32(AUTH_NONE)
            .put_u32(0)
            .put_raw(args);
        write_record(&mut self.stream, &msg.finish())?;

        let reply = read_record(&mut self.stream)?;
        let mut reader = XdrReader::new(&reply);
        let xid = reader.get_u32()?;
        if xid != self.xid {
            return Err(TransportError::Rpc(format!(
                "reply xid {xid:#x} does not match call {:#x}",
                self.xid
            )));
        }
        if reader.get_u32()? != REPLY {
            return Err(TransportError::Rpc("expected a reply message".to_string()));
        }
        let reply_stat = reader.get_u32()?;
        if reply_stat != MSG_ACCEPTED {
            return Err(TransportError::Rpc(format!(
                "call denied (reply_stat {reply_stat})"
            )));
        }
        let _verifier_flavor = reader.get_u32()?;
        let _verifier = reader.get_opaque()?;
        let accept_stat = reader.get_u32()?;
        if accept_stat != SUCCESS {
            return Err(TransportError::Rpc(format!(
                "call not accepted (accept_stat {accept_stat})"
            )));
        }

        Ok(Bytes::copy_from_slice(reader.rest()))
    }
}

/// Ask the portmapper on `host` which TCP port serves `program`/`version`.
pub fn lookup_port(
    host: &str,
    portmapper_port: u16,
    program: u32,
    version: u32,
    timeout: Option<Duration>,
) -> Result<u16> {
    let mut client = RpcClient::connect(
        host,
        portmapper_port,
        PORTMAPPER_PROGRAM,
        PORTMAPPER_VERSION,
        timeout,
    )?;
    let mut args = XdrWriter::new();
    args.put_u32(program)
        .put_u32(version)
        .put_u32(IPPROTO_TCP)
        .put_u32(0);
    let reply = client.call(PMAPPROC_GETPORT, &args.finish())?;
    let port = XdrReader::new(&reply).get_u32()?;
    debug!(host, program, port, "portmapper lookup");
    match u16::try_from(port) {
        Ok(0) | Err(_) => Err(TransportError::Rpc(format!(
            "program {program:#x} is not registered on {host}"
        ))),
        Ok(port) => Ok(port),
    }
}

/// Server-side helpers for in-process RPC fakes.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub struct Call {
        pub xid: u32,
        pub program: u32,
        pub procedure: u32,
        pub args: Vec<u8>,
    }

    pub fn read_call<R: Read>(reader: &mut R) -> Result<Call> {
        let record = read_record(reader)?;
        let mut r = XdrReader::new(&record);
        let xid = r.get_u32()?;
        assert_eq!(r.get_u32()?, CALL);
        assert_eq!(r.get_u32()?, RPC_VERSION);
        let program = r.get_u32()?;
        let _version = r.get_u32()?;
        let procedure = r.get_u32()?;
        let _cred_flavor = r.get_u32()?;
        let _cred = r.get_opaque()?;
        let _verf_flavor = r.get_u32()?;
        let _verf = r.get_opaque()?;
        Ok(Call {
            xid,
            program,
            procedure,
            args: r.rest().to_vec(),
        })
    }

    pub fn write_reply<W: Write>(writer: &mut W, xid: u32, results: &[u8]) -> Result<()> {
        let mut msg = XdrWriter::new();
        msg.put_u32(xid)
            .put_u32(REPLY)
            .put_u32(MSG_ACCEPTED)
            .put_u32(AUTH_NONE)
            .put_u32(0)
            .put_u32(SUCCESS)
            .put_raw(results);
        write_record(writer, &msg.finish())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::net::TcpListener;

    use super::testing::{read_call, write_reply};
    use super::*;

    #[test]
    fn opaque_is_padded_to_four_bytes() {
        let mut writer = XdrWriter::new();
        writer.put_opaque(b"inst0");
        let encoded = writer.finish();
        assert_eq!(encoded.as_ref(), &[0, 0, 0, 5, b'i', b'n', b's', b't', b'0', 0, 0, 0]);

        let mut reader = XdrReader::new(&encoded);
        assert_eq!(reader.get_string().unwrap(), "inst0");
        assert!(reader.rest().is_empty());
    }

    #[test]
    fn truncated_values_are_rejected() {
        let mut reader = XdrReader::new(&[0, 0, 0, 9, 1, 2]);
        assert!(matches!(reader.get_opaque(), Err(TransportError::Rpc(_))));
        let mut reader = XdrReader::new(&[0, 1]);
        assert!(matches!(reader.get_u32(), Err(TransportError::Rpc(_))));
    }

    #[test]
    fn record_marking_sets_last_fragment_bit() {
        let mut wire = Vec::new();
        write_record(&mut wire, b"abcd").unwrap();
        assert_eq!(&wire[..4], &[0x80, 0, 0, 4]);
        assert_eq!(&wire[4..], b"abcd");
    }

    #[test]
    fn read_record_joins_fragments() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&3u32.to_be_bytes());
        wire.extend_from_slice(b"abc");
        wire.extend_from_slice(&(LAST_FRAGMENT | 2).to_be_bytes());
        wire.extend_from_slice(b"de");
        let record = read_record(&mut Cursor::new(wire)).unwrap();
        assert_eq!(record, b"abcde");
    }

    #[test]
    fn read_record_eof_is_connection_closed() {
        let err = read_record(&mut Cursor::new(vec![0x80, 0, 0, 8, 1])).unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
    }

    #[test]
    fn portmapper_lookup_against_fake_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let (mut peer, _) = listener.accept().unwrap();
            let call = read_call(&mut peer).unwrap();
            assert_eq!(call.program, PORTMAPPER_PROGRAM);
            assert_eq!(call.procedure, PMAPPROC_GETPORT);
            let mut args = XdrReader::new(&call.args);
            assert_eq!(args.get_u32().unwrap(), 0x0607AF);
            assert_eq!(args.get_u32().unwrap(), 1);
            assert_eq!(args.get_u32().unwrap(), IPPROTO_TCP);
            let mut results = XdrWriter::new();
            results.put_u32(1024);
            write_reply(&mut peer, call.xid, &results.finish()).unwrap();
        });

        let found = lookup_port("127.0.0.1", port, 0x0607AF, 1, Some(Duration::from_secs(5))).unwrap();
        assert_eq!(found, 1024);
        handle.join().unwrap();
    }

    #[test]
    fn mismatched_xid_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let (mut peer, _) = listener.accept().unwrap();
            let call = read_call(&mut peer).unwrap();
            write_reply(&mut peer, call.xid.wrapping_add(7), &[]).unwrap();
        });

        let mut client =
            RpcClient::connect("127.0.0.1", port, 1, 1, Some(Duration::from_secs(5))).unwrap();
        assert!(matches!(client.call(0, &[]), Err(TransportError::Rpc(_))));
        handle.join().unwrap();
    }
}
