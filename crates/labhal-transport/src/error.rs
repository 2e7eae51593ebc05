use crate::config::{TimeoutKind, TransportKind};

/// Errors raised while validating connection parameters.
///
/// These are always reported from [`ConnectionParameters::new`](crate::ConnectionParameters::new),
/// never deferred to the first I/O call.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Both a resource string and a network host were supplied.
    #[error("resource '{resource}' and host '{host}' are mutually exclusive")]
    ResourceAndHost { resource: String, host: String },

    /// Neither a resource string nor a network host was supplied.
    #[error("either a resource or a network host is required")]
    MissingTarget,

    /// The network port is outside `0..=65535`.
    #[error("port {0} is invalid (expected 0..=65535)")]
    PortOutOfRange(i64),

    /// No transport could be selected for the resource string.
    #[error("cannot select a transport for resource '{0}'")]
    UnknownResource(String),

    /// The remote transport was requested without a board address.
    #[error("the remote transport requires a board address")]
    MissingBoardAddress,

    /// A serial setting is out of range or unsupported.
    #[error("invalid serial setting: {0}")]
    Serial(String),

    /// An HTTP setting is missing or unsupported.
    #[error("invalid http setting: {0}")]
    Http(String),

    /// A HiSLIP setting is malformed.
    #[error("invalid hislip setting: {0}")]
    Hislip(String),

    /// A timeout is not finite or too large to represent.
    #[error("{kind:?} timeout {value} is not a valid number of seconds")]
    InvalidTimeout { kind: TimeoutKind, value: f64 },

    /// The JSON configuration could not be parsed.
    #[error("invalid configuration json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection parameters were rejected.
    #[error("invalid connection parameters: {0}")]
    Config(#[from] ConfigError),

    /// Failed to connect to the instrument.
    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        source: std::io::Error,
    },

    /// An I/O error occurred on the underlying stream or device.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The serial port driver reported an error.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The HTTP client reported an error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The HTTP endpoint answered with a non-success status.
    #[error("http request to {url} failed with status {status}")]
    HttpStatus { url: String, status: u16 },

    /// The active timeout expired before the operation completed.
    #[error("operation timed out")]
    Timeout,

    /// The peer closed the connection before a complete message was received.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// I/O was attempted on a transport that is not open.
    #[error("transport is not open")]
    NotOpen,

    /// The transport does not implement the requested operation.
    #[error("{operation} is not supported by the {kind} transport")]
    Unsupported {
        kind: TransportKind,
        operation: &'static str,
    },

    /// An ONC-RPC call failed or its reply was malformed.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// A VXI-11 device call returned a non-zero error code.
    #[error("{operation} failed with device error {code}")]
    Device { operation: &'static str, code: u32 },

    /// A wire protocol layered on this transport reported an anomaly.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The VISA library reported an error.
    #[error("visa error: {0}")]
    Visa(String),

    /// The remote board rejected or failed a forwarded call.
    #[error("remote board error: {0}")]
    Remote(String),

    /// A transport kind needs an injected collaborator that was not supplied.
    #[error("the {0} transport needs an injected collaborator")]
    MissingCollaborator(TransportKind),
}

impl TransportError {
    /// Shorthand for [`TransportError::Unsupported`].
    pub fn unsupported(kind: TransportKind, operation: &'static str) -> Self {
        Self::Unsupported { kind, operation }
    }

    /// Map a low-level read/write error, turning timeouts into [`TransportError::Timeout`].
    pub fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => Self::Timeout,
            std::io::ErrorKind::UnexpectedEof => Self::ConnectionClosed,
            _ => Self::Io(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_map_to_timeout_variant() {
        let err = TransportError::from_io(std::io::Error::from(std::io::ErrorKind::WouldBlock));
        assert!(matches!(err, TransportError::Timeout));
        let err = TransportError::from_io(std::io::Error::from(std::io::ErrorKind::TimedOut));
        assert!(matches!(err, TransportError::Timeout));
    }

    #[test]
    fn other_io_errors_are_preserved() {
        let err = TransportError::from_io(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(matches!(err, TransportError::Io(ref e) if e.kind() == std::io::ErrorKind::BrokenPipe));
    }

    #[test]
    fn unsupported_names_kind_and_operation() {
        let err = TransportError::unsupported(TransportKind::Http, "recv");
        assert_eq!(err.to_string(), "recv is not supported by the http transport");
    }
}
