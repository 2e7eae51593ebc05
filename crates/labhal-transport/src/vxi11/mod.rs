//! VXI-11 (TCP/IP instrument protocol) over ONC-RPC.

pub mod rpc;

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::{debug, info, warn};

use crate::config::{ConnectionParameters, TimeoutKind, TransportKind};
use crate::error::{ConfigError, Result, TransportError};
use crate::traits::Backend;

use self::rpc::{lookup_port, RpcClient, XdrReader, XdrWriter, PORTMAPPER_PORT};

pub const DEVICE_CORE_PROGRAM: u32 = 0x0607AF;
pub const DEVICE_CORE_VERSION: u32 = 1;

const CREATE_LINK: u32 = 10;
const DEVICE_WRITE: u32 = 11;
const DEVICE_READ: u32 = 12;
const DESTROY_LINK: u32 = 23;

const FLAG_END: i32 = 0x08;
const FLAG_TERMCHR_SET: i32 = 0x80;

const REASON_REQCNT: i32 = 0x01;
const REASON_CHR: i32 = 0x02;
const REASON_END: i32 = 0x04;

const ERR_IO_TIMEOUT: i32 = 15;

const DEFAULT_DEVICE: &str = "inst0";
const READ_REQUEST_SIZE: u32 = 1024 * 1024;
const LOCK_TIMEOUT_MS: u32 = 0;
// Extra socket slack on top of the device I/O timeout so the server can answer first.
const SOCKET_TIMEOUT_SLACK: Duration = Duration::from_secs(2);

/// Host and device name parsed from `TCPIP[n]::host[::device]::INSTR`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vxi11Address {
    pub host: String,
    pub device: String,
}

impl Vxi11Address {
    pub fn parse(resource: &str) -> std::result::Result<Self, ConfigError> {
        let bad = || ConfigError::UnknownResource(resource.to_string());
        let mut parts = resource.split("::");
        let board = parts.next().ok_or_else(bad)?;
        if !board.starts_with("TCPIP") || !board[5..].bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        let host = parts.next().filter(|h| !h.is_empty()).ok_or_else(bad)?;
        let rest: Vec<&str> = parts.collect();
        let device = match rest.as_slice() {
            [] | ["INSTR"] => DEFAULT_DEVICE,
            [device] | [device, "INSTR"] if !device.is_empty() => *device,
            _ => return Err(bad()),
        };
        Ok(Self {
            host: host.to_string(),
            device: device.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Link {
    id: i32,
    max_recv_size: u32,
}

/// VXI-11 core-channel client.
#[derive(Debug)]
pub struct Vxi11 {
    resource: String,
    read_terminator: Vec<u8>,
    connect_timeout: Option<Duration>,
    io_timeout: Duration,
    portmapper_port: u16,
    client: Option<RpcClient>,
    link: Option<Link>,
}

impl Vxi11 {
    pub fn new(params: &ConnectionParameters) -> Self {
        Self {
            resource: params.resource().to_string(),
            read_terminator: params.read_terminator().to_vec(),
            connect_timeout: params.timeout(TimeoutKind::Connect),
            io_timeout: params
                .timeout(TimeoutKind::Recv)
                .unwrap_or(Duration::from_secs(15)),
            portmapper_port: PORTMAPPER_PORT,
            client: None,
            link: None,
        }
    }

    /// Use a non-standard portmapper port.
    pub fn with_portmapper_port(mut self, port: u16) -> Self {
        self.portmapper_port = port;
        self
    }

    fn io_timeout_ms(&self) -> u32 {
        u32::try_from(self.io_timeout.as_millis()).unwrap_or(u32::MAX)
    }

    fn session(&mut self) -> Result<(&mut RpcClient, Link)> {
        match (self.client.as_mut(), self.link) {
            (Some(client), Some(link)) => Ok((client, link)),
            _ => Err(TransportError::NotOpen),
        }
    }

    fn create_link(client: &mut RpcClient, device: &str) -> Result<Link> {
        let mut args = XdrWriter::new();
        args.put_i32(0)
            .put_bool(false)
            .put_u32(LOCK_TIMEOUT_MS)
            .put_string(device);
        let reply = client.call(CREATE_LINK, &args.finish())?;
        let mut reader = XdrReader::new(&reply);
        check_device_error("create_link", reader.get_i32()?)?;
        let id = reader.get_i32()?;
        let _abort_port = reader.get_u32()?;
        let max_recv_size = reader.get_u32()?;
        Ok(Link { id, max_recv_size })
    }

    fn write_chunk(&mut self, chunk: &[u8], last: bool) -> Result<usize> {
        let io_timeout = self.io_timeout_ms();
        let (client, link) = self.session()?;
        let mut args = XdrWriter::new();
        args.put_i32(link.id)
            .put_u32(io_timeout)
            .put_u32(LOCK_TIMEOUT_MS)
            .put_i32(if last { FLAG_END } else { 0 })
            .put_opaque(chunk);
        let reply = client.call(DEVICE_WRITE, &args.finish())?;
        let mut reader = XdrReader::new(&reply);
        check_device_error("device_write", reader.get_i32()?)?;
        Ok(reader.get_u32()? as usize)
    }

    fn read_chunk(&mut self, request: u32) -> Result<(i32, Bytes)> {
        let io_timeout = self.io_timeout_ms();
        let term_char = match self.read_terminator.as_slice() {
            [byte] => Some(*byte),
            _ => None,
        };
        let (client, link) = self.session()?;
        let mut args = XdrWriter::new();
        args.put_i32(link.id)
            .put_u32(request)
            .put_u32(io_timeout)
            .put_u32(LOCK_TIMEOUT_MS)
            .put_i32(if term_char.is_some() { FLAG_TERMCHR_SET } else { 0 })
            .put_u32(u32::from(term_char.unwrap_or(0)));
        let reply = client.call(DEVICE_READ, &args.finish())?;
        let mut reader = XdrReader::new(&reply);
        check_device_error("device_read", reader.get_i32()?)?;
        let reason = reader.get_i32()?;
        let data = reader.get_opaque()?;
        Ok((reason, data))
    }
}

impl Backend for Vxi11 {
    fn kind(&self) -> TransportKind {
        TransportKind::Vxi11
    }

    fn open(&mut self) -> Result<()> {
        let address = Vxi11Address::parse(&self.resource)?;
        info!(host = %address.host, device = %address.device, "connecting to vxi-11 instrument");

        let port = lookup_port(
            &address.host,
            self.portmapper_port,
            DEVICE_CORE_PROGRAM,
            DEVICE_CORE_VERSION,
            self.connect_timeout,
        )?;
        let mut client = RpcClient::connect(
            &address.host,
            port,
            DEVICE_CORE_PROGRAM,
            DEVICE_CORE_VERSION,
            self.connect_timeout,
        )?;
        let link = Self::create_link(&mut client, &address.device)?;
        debug!(link = link.id, max_recv_size = link.max_recv_size, "vxi-11 link created");

        self.client = Some(client);
        self.link = Some(link);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let link = self.link.take();
        let Some(mut client) = self.client.take() else {
            return Ok(());
        };
        if let Some(link) = link {
            let mut args = XdrWriter::new();
            args.put_i32(link.id);
            let reply = client.call(DESTROY_LINK, &args.finish())?;
            let code = XdrReader::new(&reply).get_i32()?;
            if code != 0 {
                warn!(link = link.id, code, "destroy_link reported an error");
            }
        }
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        let (_, link) = self.session()?;
        let max = match link.max_recv_size as usize {
            0 => data.len().max(1),
            max => max,
        };

        let mut offset = 0;
        loop {
            let end = (offset + max).min(data.len());
            let last = end == data.len();
            let written = self.write_chunk(&data[offset..end], last)?;
            if written == 0 && end > offset {
                return Err(TransportError::Rpc(
                    "device_write accepted no data".to_string(),
                ));
            }
            offset += written.min(end - offset);
            if offset >= data.len() {
                return Ok(());
            }
        }
    }

    fn recv(&mut self, size: Option<usize>) -> Result<Bytes> {
        let mut out = BytesMut::new();
        loop {
            let request = match size {
                Some(size) => u32::try_from(size - out.len()).unwrap_or(u32::MAX),
                None => READ_REQUEST_SIZE,
            };
            let (reason, data) = self.read_chunk(request)?;
            out.extend_from_slice(&data);

            if reason & (REASON_END | REASON_CHR) != 0 {
                return Ok(out.freeze());
            }
            if let Some(size) = size {
                if out.len() >= size || (reason & REASON_REQCNT != 0 && data.is_empty()) {
                    return Ok(out.freeze());
                }
            }
        }
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.io_timeout = timeout;
        if let Some(client) = &self.client {
            client.set_timeout(Some(timeout + SOCKET_TIMEOUT_SLACK))?;
        }
        Ok(())
    }
}

fn check_device_error(operation: &'static str, code: i32) -> Result<()> {
    match code {
        0 => Ok(()),
        ERR_IO_TIMEOUT => Err(TransportError::Timeout),
        code => Err(TransportError::Device {
            operation,
            code: code as u32,
        }),
    }
}
