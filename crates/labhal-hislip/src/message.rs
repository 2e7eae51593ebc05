//! HiSLIP message header codec.
//!
//! Every message starts with a fixed 16-byte header:
//!
//! ```text
//! +------+------+---------+-----------+----------------+
//! | "HS" | type | control | parameter | payload length |
//! |  2B  |  1B  |   1B    |  u32 BE   |     u64 BE     |
//! +------+------+---------+-----------+----------------+
//! ```
//!
//! followed by `payload length` bytes of payload.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{HislipError, Result};

pub const HEADER_SIZE: usize = 16;
pub const PROLOGUE: [u8; 2] = *b"HS";

macro_rules! message_types {
    ($($name:ident = $code:literal => $label:literal,)+) => {
        /// HiSLIP message types (1.0 and 2.0).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum MessageType {
            $($name = $code,)+
        }

        impl MessageType {
            pub fn name(self) -> &'static str {
                match self {
                    $(MessageType::$name => $label,)+
                }
            }
        }

        impl TryFrom<u8> for MessageType {
            type Error = HislipError;

            fn try_from(code: u8) -> Result<Self> {
                match code {
                    $($code => Ok(MessageType::$name),)+
                    other => Err(HislipError::UnknownMessageType(other)),
                }
            }
        }
    };
}

message_types! {
    Initialize = 0 => "INITIALIZE",
    InitializeResponse = 1 => "INITIALIZE_RESPONSE",
    FatalError = 2 => "FATAL_ERROR",
    Error = 3 => "ERROR",
    AsyncLock = 4 => "ASYNC_LOCK",
    AsyncLockResponse = 5 => "ASYNC_LOCK_RESPONSE",
    Data = 6 => "DATA",
    DataEnd = 7 => "DATA_END",
    DeviceClearComplete = 8 => "DEVICE_CLEAR_COMPLETE",
    DeviceClearAcknowledge = 9 => "DEVICE_CLEAR_ACKNOWLEDGE",
    AsyncRemoteLocalControl = 10 => "ASYNC_REMOTE_LOCAL_CONTROL",
    AsyncRemoteLocalResponse = 11 => "ASYNC_REMOTE_LOCAL_RESPONSE",
    Trigger = 12 => "TRIGGER",
    Interrupted = 13 => "INTERRUPTED",
    AsyncInterrupted = 14 => "ASYNC_INTERRUPTED",
    AsyncMaximumMessageSize = 15 => "ASYNC_MAXIMUM_MESSAGE_SIZE",
    AsyncMaximumMessageSizeResponse = 16 => "ASYNC_MAXIMUM_MESSAGE_SIZE_RESPONSE",
    AsyncInitialize = 17 => "ASYNC_INITIALIZE",
    AsyncInitializeResponse = 18 => "ASYNC_INITIALIZE_RESPONSE",
    AsyncDeviceClear = 19 => "ASYNC_DEVICE_CLEAR",
    AsyncServiceRequest = 20 => "ASYNC_SERVICE_REQUEST",
    AsyncStatusQuery = 21 => "ASYNC_STATUS_QUERY",
    AsyncStatusResponse = 22 => "ASYNC_STATUS_RESPONSE",
    AsyncDeviceClearAcknowledge = 23 => "ASYNC_DEVICE_CLEAR_ACKNOWLEDGE",
    AsyncLockInfo = 24 => "ASYNC_LOCK_INFO",
    AsyncLockInfoResponse = 25 => "ASYNC_LOCK_INFO_RESPONSE",
    GetDescriptors = 26 => "GET_DESCRIPTORS",
    GetDescriptorsResponse = 27 => "GET_DESCRIPTORS_RESPONSE",
    StartTls = 28 => "START_TLS",
    AsyncStartTls = 29 => "ASYNC_START_TLS",
    AsyncStartTlsResponse = 30 => "ASYNC_START_TLS_RESPONSE",
    EndTls = 31 => "END_TLS",
    AsyncEndTls = 32 => "ASYNC_END_TLS",
    AsyncEndTlsResponse = 33 => "ASYNC_END_TLS_RESPONSE",
    GetSaslMechanismList = 34 => "GET_SASL_MECHANISM_LIST",
    GetSaslMechanismListResponse = 35 => "GET_SASL_MECHANISM_LIST_RESPONSE",
    AuthenticationStart = 36 => "AUTHENTICATION_START",
    AuthenticationExchange = 37 => "AUTHENTICATION_EXCHANGE",
    AuthenticationResult = 38 => "AUTHENTICATION_RESULT",
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Non-fatal error codes, carried in the control code of an `ERROR` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    UnidentifiedError,
    UnrecognizedMessageType,
    UnrecognizedControlCode,
    UnrecognizedVendorDefinedMessage,
    MessageTooLarge,
    AuthenticationFailed,
    /// Codes 128..=255 are reserved for vendors.
    Other(u8),
}

impl ErrorCode {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => ErrorCode::UnidentifiedError,
            1 => ErrorCode::UnrecognizedMessageType,
            2 => ErrorCode::UnrecognizedControlCode,
            3 => ErrorCode::UnrecognizedVendorDefinedMessage,
            4 => ErrorCode::MessageTooLarge,
            5 => ErrorCode::AuthenticationFailed,
            other => ErrorCode::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            ErrorCode::UnidentifiedError => 0,
            ErrorCode::UnrecognizedMessageType => 1,
            ErrorCode::UnrecognizedControlCode => 2,
            ErrorCode::UnrecognizedVendorDefinedMessage => 3,
            ErrorCode::MessageTooLarge => 4,
            ErrorCode::AuthenticationFailed => 5,
            ErrorCode::Other(code) => code,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::UnidentifiedError => "UNIDENTIFIED_ERROR",
            ErrorCode::UnrecognizedMessageType => "UNRECOGNIZED_MESSAGE_TYPE",
            ErrorCode::UnrecognizedControlCode => "UNRECOGNIZED_CONTROL_CODE",
            ErrorCode::UnrecognizedVendorDefinedMessage => "UNRECOGNIZED_VENDOR_DEFINED_MESSAGE",
            ErrorCode::MessageTooLarge => "MESSAGE_TOO_LARGE",
            ErrorCode::AuthenticationFailed => "AUTHENTICATION_FAILED",
            ErrorCode::Other(_) => "VENDOR_SPECIFIC_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Other(code) => write!(f, "{}({code})", self.name()),
            _ => f.write_str(self.name()),
        }
    }
}

/// Fatal error codes, carried in the control code of a `FATAL_ERROR` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FatalErrorCode {
    UnidentifiedError,
    PoorlyFormedMessageHeader,
    AttemptToUseConnectionWithoutBothChannelsEstablished,
    InvalidInitializationSequence,
    ServerRefusedConnectionDueToMaximumNumberOfClientsExceeded,
    SecureConnectionFailed,
    /// Codes 128..=255 are reserved for vendors.
    Other(u8),
}

impl FatalErrorCode {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => FatalErrorCode::UnidentifiedError,
            1 => FatalErrorCode::PoorlyFormedMessageHeader,
            2 => FatalErrorCode::AttemptToUseConnectionWithoutBothChannelsEstablished,
            3 => FatalErrorCode::InvalidInitializationSequence,
            4 => FatalErrorCode::ServerRefusedConnectionDueToMaximumNumberOfClientsExceeded,
            5 => FatalErrorCode::SecureConnectionFailed,
            other => FatalErrorCode::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            FatalErrorCode::UnidentifiedError => 0,
            FatalErrorCode::PoorlyFormedMessageHeader => 1,
            FatalErrorCode::AttemptToUseConnectionWithoutBothChannelsEstablished => 2,
            FatalErrorCode::InvalidInitializationSequence => 3,
            FatalErrorCode::ServerRefusedConnectionDueToMaximumNumberOfClientsExceeded => 4,
            FatalErrorCode::SecureConnectionFailed => 5,
            FatalErrorCode::Other(code) => code,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FatalErrorCode::UnidentifiedError => "UNIDENTIFIED_ERROR",
            FatalErrorCode::PoorlyFormedMessageHeader => "POORLY_FORMED_MESSAGE_HEADER",
            FatalErrorCode::AttemptToUseConnectionWithoutBothChannelsEstablished => {
                "ATTEMPT_TO_USE_CONNECTION_WITHOUT_BOTH_CHANNELS_ESTABLISHED"
            }
            FatalErrorCode::InvalidInitializationSequence => "INVALID_INITIALIZATION_SEQUENCE",
            FatalErrorCode::ServerRefusedConnectionDueToMaximumNumberOfClientsExceeded => {
                "SERVER_REFUSED_CONNECTION_DUE_TO_MAXIMUM_NUMBER_OF_CLIENTS_EXCEEDED"
            }
            FatalErrorCode::SecureConnectionFailed => "SECURE_CONNECTION_FAILED",
            FatalErrorCode::Other(_) => "VENDOR_SPECIFIC_FATAL_ERROR",
        }
    }
}

impl fmt::Display for FatalErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalErrorCode::Other(code) => write!(f, "{}({code})", self.name()),
            _ => f.write_str(self.name()),
        }
    }
}

/// A decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub message_type: MessageType,
    pub control_code: u8,
    pub parameter: u32,
    pub payload_length: u64,
}

impl Header {
    pub fn new(message_type: MessageType, control_code: u8, parameter: u32) -> Self {
        Self {
            message_type,
            control_code,
            parameter,
            payload_length: 0,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..2].copy_from_slice(&PROLOGUE);
        out[2] = self.message_type as u8;
        out[3] = self.control_code;
        out[4..8].copy_from_slice(&self.parameter.to_be_bytes());
        out[8..].copy_from_slice(&self.payload_length.to_be_bytes());
        out
    }

    /// Decode a header. Fails on a wrong prologue, a short buffer or an
    /// unknown message type.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < HEADER_SIZE || raw[..2] != PROLOGUE {
            return Err(HislipError::PoorlyFormedHeader(
                raw[..raw.len().min(HEADER_SIZE)].to_vec(),
            ));
        }
        let message_type = MessageType::try_from(raw[2])?;
        let mut parameter = [0u8; 4];
        parameter.copy_from_slice(&raw[4..8]);
        let mut length = [0u8; 8];
        length.copy_from_slice(&raw[8..16]);
        Ok(Self {
            message_type,
            control_code: raw[3],
            parameter: u32::from_be_bytes(parameter),
            payload_length: u64::from_be_bytes(length),
        })
    }

    /// For `INITIALIZE_RESPONSE`: the server's protocol version (high half of
    /// the parameter) and the session id (low half).
    pub fn version_and_session(&self) -> (u16, u16) {
        ((self.parameter >> 16) as u16, self.parameter as u16)
    }
}

/// Header followed by `payload`, ready to write.
pub fn encode_message(
    message_type: MessageType,
    control_code: u8,
    parameter: u32,
    payload: &[u8],
) -> Bytes {
    let header = Header {
        payload_length: payload.len() as u64,
        ..Header::new(message_type, control_code, parameter)
    };
    let mut out = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    out.put_slice(&header.encode());
    out.put_slice(payload);
    out.freeze()
}

/// `INITIALIZE` parameter: protocol version in the high half, vendor id in
/// the low half.
pub fn initialize_parameter(protocol_version: u16, vendor_id: [u8; 2]) -> u32 {
    (u32::from(protocol_version) << 16) | u32::from(u16::from_be_bytes(vendor_id))
}

/// Split `data` into chunks of at most `max` bytes, flagging the last one.
///
/// Empty input yields a single empty final chunk.
pub fn chunks(data: &[u8], max: usize) -> impl Iterator<Item = (bool, &[u8])> {
    let count = data.len().div_ceil(max.max(1)).max(1);
    (0..count).map(move |index| {
        let start = index * max;
        let end = (start + max).min(data.len());
        (index + 1 == count, &data[start.min(end)..end])
    })
}
