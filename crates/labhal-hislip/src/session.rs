use std::time::Duration;

use bytes::{Bytes, BytesMut};
use labhal_transport::config::DEFAULT_HISLIP_PORT;
use labhal_transport::{Backend, ConnectionParameters, Socket, TimeoutKind, Transport, TransportKind};
use tracing::{debug, info, warn};

use crate::error::{HislipError, Origin, Result};
use crate::message::{
    chunks, encode_message, initialize_parameter, ErrorCode, FatalErrorCode, Header, MessageType,
    HEADER_SIZE,
};

/// Highest protocol version this client offers (1.0).
pub const PROTOCOL_VERSION: u16 = 0x0100;
/// Largest payload sent in one `DATA`/`DATA_END` message.
pub const MAX_DATA_SIZE: usize = 256;
/// Message id of the first message in a session.
pub const INITIAL_MESSAGE_ID: u32 = 0xFFFF_FF00;
/// Largest message this client accepts, announced during the handshake.
pub const DEFAULT_MAX_MESSAGE_SIZE: u64 = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninit,
    SyncEstablished,
    Ready,
    Error,
    FatalError,
    Closed,
}

/// Protocol bookkeeping for one session.
///
/// Plain data: a caller that drives the async channel from another thread
/// can share a copy behind its own lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub state: SessionState,
    pub session_id: u16,
    pub overlap_mode: bool,
    pub message_id: u32,
    pub last_message_id: u32,
    pub rmt_delivered: bool,
    pub server_protocol_version: u16,
    pub server_max_message_size: Option<u64>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            state: SessionState::Uninit,
            session_id: 0,
            overlap_mode: false,
            message_id: INITIAL_MESSAGE_ID,
            last_message_id: INITIAL_MESSAGE_ID,
            rmt_delivered: false,
            server_protocol_version: 0,
            server_max_message_size: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Channel {
    Sync,
    Async,
}

/// HiSLIP client over two TCP channels.
///
/// The synchronous channel carries data; the asynchronous channel is only
/// used to establish the session. Protocol anomalies detected locally are
/// reported to the server, after which both channels are closed.
#[derive(Debug)]
pub struct Hislip {
    vendor_id: [u8; 2],
    sub_address: String,
    write_terminator: Vec<u8>,
    max_message_size: u64,
    sync_channel: Transport<Socket>,
    async_channel: Transport<Socket>,
    session: Session,
}

impl Hislip {
    pub fn new(params: &ConnectionParameters) -> Self {
        let network = params.network();
        let port = u16::try_from(network.port).unwrap_or(DEFAULT_HISLIP_PORT);
        let channel = || {
            let socket = Socket::connect_to(
                network.host.clone(),
                port,
                params.read_terminator(),
                params.timeout(TimeoutKind::Connect),
            );
            Transport::new(params.clone(), socket)
        };

        let vendor = params.hislip().vendor_id.as_bytes();
        Self {
            vendor_id: [
                vendor.first().copied().unwrap_or(b'x'),
                vendor.get(1).copied().unwrap_or(b'x'),
            ],
            sub_address: params.hislip().sub_address.clone(),
            write_terminator: params.write_terminator().to_vec(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            sync_channel: channel(),
            async_channel: channel(),
            session: Session::default(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    /// Run the two-channel handshake. On failure both channels are closed.
    pub fn connect(&mut self) -> Result<()> {
        if self.session.state == SessionState::Ready {
            return Ok(());
        }
        self.session = Session::default();
        let result = self.handshake();
        if result.is_err() {
            self.close_channels();
            if !matches!(
                self.session.state,
                SessionState::Error | SessionState::FatalError
            ) {
                self.session.state = SessionState::Closed;
            }
        }
        result
    }

    /// Send one message, split into `DATA` chunks and a final `DATA_END`.
    pub fn write_message(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_ready()?;
        for (last, chunk) in chunks(data, MAX_DATA_SIZE) {
            let message_type = if last {
                MessageType::DataEnd
            } else {
                MessageType::Data
            };
            let message = encode_message(
                message_type,
                u8::from(self.session.rmt_delivered),
                self.session.message_id,
                chunk,
            );
            self.sync_channel.send_raw(&message)?;
            self.session.last_message_id = self.session.message_id;
            self.session.message_id = self.session.message_id.wrapping_add(2);
        }
        Ok(())
    }

    /// Receive one complete message (through its `DATA_END`).
    pub fn read_message(&mut self) -> Result<Bytes> {
        self.ensure_ready()?;
        let mut message = BytesMut::new();
        loop {
            let header = self.read_header(Channel::Sync)?;
            match header.message_type {
                MessageType::Data | MessageType::DataEnd => {}
                MessageType::Error | MessageType::FatalError => {
                    return Err(self.server_error(Channel::Sync, header));
                }
                other => {
                    warn!(message_type = %other, "unexpected message on sync channel");
                    return Err(self.raise_error(ErrorCode::UnrecognizedMessageType, Origin::Client));
                }
            }
            if self.session.overlap_mode && header.parameter != self.session.last_message_id {
                warn!(
                    expected = self.session.last_message_id,
                    received = header.parameter,
                    "message id mismatch"
                );
                return Err(self.raise_error(ErrorCode::UnrecognizedMessageType, Origin::Client));
            }

            let payload = self.read_payload(Channel::Sync, header.payload_length)?;
            let end = header.message_type == MessageType::DataEnd;
            self.session.rmt_delivered = end
                && !payload.is_empty()
                && !self.write_terminator.is_empty()
                && payload.ends_with(&self.write_terminator);
            message.extend_from_slice(&payload);
            if end {
                return Ok(message.freeze());
            }
        }
    }

    /// Close both channels. Safe to call in any state.
    pub fn disconnect(&mut self) -> Result<()> {
        let result = self
            .sync_channel
            .close()
            .and(self.async_channel.close());
        if !matches!(
            self.session.state,
            SessionState::Error | SessionState::FatalError
        ) {
            self.session.state = SessionState::Closed;
        }
        Ok(result?)
    }

    fn handshake(&mut self) -> Result<()> {
        self.sync_channel.open()?;
        let parameter = initialize_parameter(PROTOCOL_VERSION, self.vendor_id);
        let initialize = encode_message(
            MessageType::Initialize,
            0,
            parameter,
            self.sub_address.as_bytes(),
        );
        self.sync_channel.send_raw(&initialize)?;

        let (response, _) = self.expect(Channel::Sync, MessageType::InitializeResponse)?;
        let (server_version, session_id) = response.version_and_session();
        self.session.overlap_mode = response.control_code & 1 != 0;
        self.session.session_id = session_id;
        self.session.server_protocol_version = server_version;
        self.session.state = SessionState::SyncEstablished;
        debug!(session_id, overlap = self.session.overlap_mode, "sync channel established");

        self.async_channel.open()?;
        let async_initialize =
            encode_message(MessageType::AsyncInitialize, 0, u32::from(session_id), &[]);
        self.async_channel.send_raw(&async_initialize)?;
        self.expect(Channel::Async, MessageType::AsyncInitializeResponse)?;

        let max_size = encode_message(
            MessageType::AsyncMaximumMessageSize,
            0,
            0,
            &self.max_message_size.to_be_bytes(),
        );
        self.async_channel.send_raw(&max_size)?;
        let (_, payload) = self.expect(Channel::Async, MessageType::AsyncMaximumMessageSizeResponse)?;
        self.session.server_max_message_size = <[u8; 8]>::try_from(payload.as_ref())
            .ok()
            .map(u64::from_be_bytes);

        self.session.state = SessionState::Ready;
        info!(
            session_id,
            server_version = format_args!("{:#06x}", server_version),
            "hislip session ready"
        );
        Ok(())
    }

    /// Read one handshake reply and check its type.
    fn expect(&mut self, channel: Channel, wanted: MessageType) -> Result<(Header, Bytes)> {
        let header = self.read_header(channel)?;
        match header.message_type {
            found if found == wanted => {
                let payload = self.read_payload(channel, header.payload_length)?;
                Ok((header, payload))
            }
            MessageType::Error | MessageType::FatalError => Err(self.server_error(channel, header)),
            other => {
                warn!(expected = %wanted, found = %other, "unexpected handshake reply");
                Err(self.raise_fatal(FatalErrorCode::InvalidInitializationSequence, Origin::Client))
            }
        }
    }

    fn read_header(&mut self, channel: Channel) -> Result<Header> {
        let raw = read_exact(self.channel_mut(channel), HEADER_SIZE)?;
        match Header::decode(&raw) {
            Ok(header) => Ok(header),
            Err(HislipError::PoorlyFormedHeader(bytes)) => {
                warn!(header = format_args!("{bytes:02X?}"), "poorly formed header");
                Err(self.raise_fatal(FatalErrorCode::PoorlyFormedMessageHeader, Origin::Client))
            }
            Err(HislipError::UnknownMessageType(code)) => {
                warn!(code, "unknown message type");
                Err(self.raise_error(ErrorCode::UnrecognizedMessageType, Origin::Client))
            }
            Err(other) => Err(other),
        }
    }

    fn read_payload(&mut self, channel: Channel, length: u64) -> Result<Bytes> {
        if length == 0 {
            return Ok(Bytes::new());
        }
        if length > self.max_message_size {
            warn!(length, max = self.max_message_size, "payload exceeds maximum message size");
            return Err(self.raise_error(ErrorCode::MessageTooLarge, Origin::Client));
        }
        // length <= max_message_size, which fits in usize.
        read_exact(self.channel_mut(channel), length as usize)
    }

    /// Consume a server `ERROR`/`FATAL_ERROR` and turn it into an error.
    fn server_error(&mut self, channel: Channel, header: Header) -> HislipError {
        // Bounded by max_message_size, which fits in usize.
        let length = header.payload_length.min(self.max_message_size) as usize;
        let text = read_exact(self.channel_mut(channel), length)
            .map(|payload| String::from_utf8_lossy(&payload).into_owned())
            .unwrap_or_default();
        if header.message_type == MessageType::FatalError {
            let code = FatalErrorCode::from_code(header.control_code);
            warn!(%code, message = %text, "server reported fatal error");
            self.raise_fatal(code, Origin::Server)
        } else {
            let code = ErrorCode::from_code(header.control_code);
            warn!(%code, message = %text, "server reported error");
            self.raise_error(code, Origin::Server)
        }
    }

    fn raise_error(&mut self, code: ErrorCode, origin: Origin) -> HislipError {
        if origin == Origin::Client {
            self.notify_server(MessageType::Error, code.code());
        }
        self.close_channels();
        self.session.state = SessionState::Error;
        HislipError::Error { code, origin }
    }

    fn raise_fatal(&mut self, code: FatalErrorCode, origin: Origin) -> HislipError {
        if origin == Origin::Client {
            self.notify_server(MessageType::FatalError, code.code());
        }
        self.close_channels();
        self.session.state = SessionState::FatalError;
        HislipError::Fatal { code, origin }
    }

    fn notify_server(&mut self, message_type: MessageType, code: u8) {
        if !self.sync_channel.is_open() {
            return;
        }
        let message = encode_message(message_type, code, 0, &[]);
        if let Err(err) = self.sync_channel.send_raw(&message) {
            warn!(error = %err, "could not report error to server");
        }
    }

    fn close_channels(&mut self) {
        for channel in [&mut self.sync_channel, &mut self.async_channel] {
            if let Err(err) = channel.close() {
                debug!(error = %err, "error while closing hislip channel");
            }
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.session.state == SessionState::Ready {
            Ok(())
        } else {
            Err(HislipError::NotReady(self.session.state))
        }
    }

    fn channel_mut(&mut self, channel: Channel) -> &mut Transport<Socket> {
        match channel {
            Channel::Sync => &mut self.sync_channel,
            Channel::Async => &mut self.async_channel,
        }
    }
}

/// Read exactly `count` bytes from a channel.
fn read_exact(channel: &mut Transport<Socket>, count: usize) -> Result<Bytes> {
    let mut out = BytesMut::with_capacity(count);
    while out.len() < count {
        let data = channel.recv_raw(Some(count - out.len()))?;
        out.extend_from_slice(&data);
    }
    Ok(out.freeze())
}

impl Backend for Hislip {
    fn kind(&self) -> TransportKind {
        TransportKind::Hislip
    }

    fn open(&mut self) -> labhal_transport::Result<()> {
        Ok(self.connect()?)
    }

    fn close(&mut self) -> labhal_transport::Result<()> {
        Ok(self.disconnect()?)
    }

    fn send(&mut self, data: &[u8]) -> labhal_transport::Result<()> {
        Ok(self.write_message(data)?)
    }

    /// Messages are self-delimiting, so `size` is ignored.
    fn recv(&mut self, _size: Option<usize>) -> labhal_transport::Result<Bytes> {
        Ok(self.read_message()?)
    }

    fn set_timeout(&mut self, timeout: Duration) -> labhal_transport::Result<()> {
        for channel in [&mut self.sync_channel, &mut self.async_channel] {
            if channel.is_open() {
                channel.set_timeout(Some(timeout))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread::JoinHandle;

    use labhal_transport::{ConnectionConfig, TransportError};

    use super::*;

    fn read_message(stream: &mut TcpStream) -> (Header, Vec<u8>) {
        let mut raw = [0u8; HEADER_SIZE];
        stream.read_exact(&mut raw).unwrap();
        let header = Header::decode(&raw).unwrap();
        let mut payload = vec![0u8; header.payload_length as usize];
        stream.read_exact(&mut payload).unwrap();
        (header, payload)
    }

    fn write_message(
        stream: &mut TcpStream,
        message_type: MessageType,
        control_code: u8,
        parameter: u32,
        payload: &[u8],
    ) {
        stream
            .write_all(&encode_message(message_type, control_code, parameter, payload))
            .unwrap();
    }

    /// Server side of a successful handshake. Returns (sync, async).
    fn accept_session(listener: &TcpListener, overlap: bool, session_id: u16) -> (TcpStream, TcpStream) {
        let (mut sync, _) = listener.accept().unwrap();
        let (header, payload) = read_message(&mut sync);
        assert_eq!(header.message_type, MessageType::Initialize);
        assert_eq!(header.parameter, 0x0100_7878);
        assert_eq!(payload, b"hislip0");
        write_message(
            &mut sync,
            MessageType::InitializeResponse,
            u8::from(overlap),
            (0x0100 << 16) | u32::from(session_id),
            &[],
        );

        let (mut async_channel, _) = listener.accept().unwrap();
        let (header, _) = read_message(&mut async_channel);
        assert_eq!(header.message_type, MessageType::AsyncInitialize);
        assert_eq!(header.parameter, u32::from(session_id));
        write_message(&mut async_channel, MessageType::AsyncInitializeResponse, 0, 0x7878, &[]);

        let (header, payload) = read_message(&mut async_channel);
        assert_eq!(header.message_type, MessageType::AsyncMaximumMessageSize);
        assert_eq!(payload, (1u64 << 20).to_be_bytes());
        write_message(
            &mut async_channel,
            MessageType::AsyncMaximumMessageSizeResponse,
            0,
            0,
            &4096u64.to_be_bytes(),
        );
        (sync, async_channel)
    }

    fn server<F>(script: F) -> (Hislip, JoinHandle<()>)
    where
        F: FnOnce(TcpListener) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || script(listener));

        let mut config = ConnectionConfig::default();
        config.interface = Some(TransportKind::Hislip);
        config.network.host = "127.0.0.1".to_string();
        config.network.port = i64::from(port);
        let params = ConnectionParameters::new(config).unwrap();
        (Hislip::new(&params), handle)
    }

    #[test]
    fn handshake_establishes_session() {
        let (mut client, server) = server(|listener| {
            let (_sync, _async) = accept_session(&listener, true, 42);
        });
        client.connect().unwrap();
        server.join().unwrap();

        let session = client.session();
        assert_eq!(session.state, SessionState::Ready);
        assert_eq!(session.session_id, 42);
        assert!(session.overlap_mode);
        assert_eq!(session.server_protocol_version, 0x0100);
        assert_eq!(session.server_max_message_size, Some(4096));
        assert_eq!(session.message_id, INITIAL_MESSAGE_ID);
    }

    #[test]
    fn send_splits_into_256_byte_chunks() {
        let (mut client, server) = server(|listener| {
            let (mut sync, _async) = accept_session(&listener, false, 1);
            let first = read_message(&mut sync);
            let second = read_message(&mut sync);
            assert_eq!(first.0.message_type, MessageType::Data);
            assert_eq!(second.0.message_type, MessageType::DataEnd);
            assert_eq!((first.1.len(), second.1.len()), (256, 44));
            assert_eq!(
                (first.0.parameter, second.0.parameter),
                (INITIAL_MESSAGE_ID, INITIAL_MESSAGE_ID + 2)
            );
        });
        client.connect().unwrap();
        client.write_message(&[b'A'; 300]).unwrap();
        server.join().unwrap();

        assert_eq!(client.session().last_message_id, INITIAL_MESSAGE_ID + 2);
        assert_eq!(client.session().message_id, INITIAL_MESSAGE_ID + 4);
    }

    #[test]
    fn empty_send_is_one_empty_data_end() {
        let (mut client, server) = server(|listener| {
            let (mut sync, _async) = accept_session(&listener, false, 1);
            let (header, payload) = read_message(&mut sync);
            assert_eq!(header.message_type, MessageType::DataEnd);
            assert!(payload.is_empty());
        });
        client.connect().unwrap();
        client.write_message(b"").unwrap();
        server.join().unwrap();
    }

    #[test]
    fn query_joins_chunks_and_tracks_rmt_delivered() {
        let (mut client, server) = server(|listener| {
            let (mut sync, _async) = accept_session(&listener, true, 7);
            let (header, payload) = read_message(&mut sync);
            assert_eq!(payload, b"*IDN?\r\n");
            assert_eq!(header.control_code, 0);
            write_message(&mut sync, MessageType::Data, 0, header.parameter, b"ACME,");
            write_message(&mut sync, MessageType::DataEnd, 0, header.parameter, b"DMM\r\n");

            let (header, _) = read_message(&mut sync);
            assert_eq!(header.control_code, 1, "rmt delivered reported on next message");
        });
        client.connect().unwrap();
        client.write_message(b"*IDN?\r\n").unwrap();
        assert_eq!(client.read_message().unwrap().as_ref(), b"ACME,DMM\r\n");
        assert!(client.session().rmt_delivered);
        client.write_message(b"*CLS\r\n").unwrap();
        server.join().unwrap();
    }

    #[test]
    fn unexpected_message_type_is_reported_to_server() {
        let (mut client, server) = server(|listener| {
            let (mut sync, _async) = accept_session(&listener, false, 1);
            write_message(&mut sync, MessageType::Trigger, 0, 0, &[]);
            let (header, _) = read_message(&mut sync);
            assert_eq!(header.message_type, MessageType::Error);
            assert_eq!(header.control_code, ErrorCode::UnrecognizedMessageType.code());
            let mut rest = Vec::new();
            assert_eq!(sync.read_to_end(&mut rest).unwrap(), 0);
        });
        client.connect().unwrap();
        let err = client.read_message().unwrap_err();
        assert!(matches!(
            err,
            HislipError::Error {
                code: ErrorCode::UnrecognizedMessageType,
                origin: Origin::Client
            }
        ));
        assert_eq!(client.state(), SessionState::Error);
        assert!(matches!(
            client.write_message(b"x"),
            Err(HislipError::NotReady(SessionState::Error))
        ));
        server.join().unwrap();
    }

    #[test]
    fn message_id_mismatch_in_overlap_mode() {
        let (mut client, server) = server(|listener| {
            let (mut sync, _async) = accept_session(&listener, true, 1);
            let (header, _) = read_message(&mut sync);
            write_message(&mut sync, MessageType::DataEnd, 0, header.parameter + 2, b"1\n");
            let (header, _) = read_message(&mut sync);
            assert_eq!(header.message_type, MessageType::Error);
            assert_eq!(header.control_code, ErrorCode::UnrecognizedMessageType.code());
        });
        client.connect().unwrap();
        client.write_message(b"*OPC?\r\n").unwrap();
        let err = client.read_message().unwrap_err();
        assert!(matches!(
            err,
            HislipError::Error {
                code: ErrorCode::UnrecognizedMessageType,
                ..
            }
        ));
        server.join().unwrap();
    }

    #[test]
    fn server_error_is_surfaced_without_echo() {
        let (mut client, server) = server(|listener| {
            let (mut sync, _async) = accept_session(&listener, false, 1);
            write_message(&mut sync, MessageType::Error, 4, 0, b"message too large");
            let mut rest = Vec::new();
            assert_eq!(sync.read_to_end(&mut rest).unwrap(), 0);
        });
        client.connect().unwrap();
        let err = client.read_message().unwrap_err();
        assert!(matches!(
            err,
            HislipError::Error {
                code: ErrorCode::MessageTooLarge,
                origin: Origin::Server
            }
        ));
        server.join().unwrap();
    }

    #[test]
    fn server_fatal_error_during_handshake() {
        let (mut client, server) = server(|listener| {
            let (mut sync, _) = listener.accept().unwrap();
            read_message(&mut sync);
            write_message(&mut sync, MessageType::FatalError, 4, 0, b"too many clients");
            let mut rest = Vec::new();
            assert_eq!(sync.read_to_end(&mut rest).unwrap(), 0);
        });
        let err = client.connect().unwrap_err();
        assert!(matches!(
            err,
            HislipError::Fatal {
                code: FatalErrorCode::ServerRefusedConnectionDueToMaximumNumberOfClientsExceeded,
                origin: Origin::Server
            }
        ));
        assert_eq!(client.state(), SessionState::FatalError);
        server.join().unwrap();
    }

    #[test]
    fn unexpected_handshake_reply_is_invalid_initialization() {
        let (mut client, server) = server(|listener| {
            let (mut sync, _) = listener.accept().unwrap();
            read_message(&mut sync);
            write_message(&mut sync, MessageType::DataEnd, 0, 0, &[]);
            let (header, _) = read_message(&mut sync);
            assert_eq!(header.message_type, MessageType::FatalError);
            assert_eq!(
                header.control_code,
                FatalErrorCode::InvalidInitializationSequence.code()
            );
        });
        let err = client.connect().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("INVALID_INITIALIZATION_SEQUENCE"), "{message}");
        server.join().unwrap();
    }

    #[test]
    fn poorly_formed_header_is_fatal() {
        let (mut client, server) = server(|listener| {
            let (mut sync, _async) = accept_session(&listener, false, 1);
            sync.write_all(b"XX\x06\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00")
                .unwrap();
            let (header, _) = read_message(&mut sync);
            assert_eq!(header.message_type, MessageType::FatalError);
            assert_eq!(
                header.control_code,
                FatalErrorCode::PoorlyFormedMessageHeader.code()
            );
        });
        client.connect().unwrap();
        let err = client.read_message().unwrap_err();
        assert!(matches!(
            err,
            HislipError::Fatal {
                code: FatalErrorCode::PoorlyFormedMessageHeader,
                origin: Origin::Client
            }
        ));
        server.join().unwrap();
    }

    #[test]
    fn io_before_connect_is_not_ready() {
        let (mut client, _server) = server(|_listener| {});
        assert!(matches!(
            client.read_message(),
            Err(HislipError::NotReady(SessionState::Uninit))
        ));
        let err: TransportError = Backend::send(&mut client, b"x").unwrap_err();
        assert!(matches!(err, TransportError::NotOpen));
    }

    #[test]
    fn transport_wrapper_drives_the_session() {
        let (client, server) = server(|listener| {
            let (mut sync, _async) = accept_session(&listener, false, 3);
            let (header, payload) = read_message(&mut sync);
            assert_eq!(payload, b"MEAS:VOLT?");
            write_message(&mut sync, MessageType::DataEnd, 0, header.parameter, b"+1.5\n");
        });
        let mut config = ConnectionConfig::default();
        config.interface = Some(TransportKind::Hislip);
        config.network.host = "127.0.0.1".to_string();
        config.network.port = 1;
        let params = ConnectionParameters::new(config).unwrap();

        let mut transport = Transport::new(params, client);
        transport.open().unwrap();
        let reply = transport.query_raw(b"MEAS:VOLT?", None).unwrap();
        assert_eq!(reply.as_ref(), b"+1.5\n");
        transport.close().unwrap();
        assert_eq!(transport.backend().state(), SessionState::Closed);
        server.join().unwrap();
    }
}
