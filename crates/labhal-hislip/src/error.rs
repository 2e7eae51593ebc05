use std::fmt;

use labhal_transport::TransportError;

use crate::message::{ErrorCode, FatalErrorCode};
use crate::session::SessionState;

/// Which side of the connection detected an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Detected here and reported to the server.
    Client,
    /// Reported by the server.
    Server,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Origin::Client => "client",
            Origin::Server => "server",
        })
    }
}

/// Errors that can occur in a HiSLIP session.
#[derive(Debug, thiserror::Error)]
pub enum HislipError {
    /// A channel transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A non-fatal protocol error. The session is closed.
    #[error("ERROR with {code} (raised by {origin})")]
    Error { code: ErrorCode, origin: Origin },

    /// A fatal protocol error. The session is closed.
    #[error("FATAL_ERROR with {code} (raised by {origin})")]
    Fatal { code: FatalErrorCode, origin: Origin },

    /// The header did not start with the `HS` prologue.
    #[error("poorly formed message header: {0:02X?}")]
    PoorlyFormedHeader(Vec<u8>),

    /// The header carried a message type this client does not know.
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    /// Data was exchanged outside the ready state.
    #[error("session is not ready (state {0:?})")]
    NotReady(SessionState),
}

pub type Result<T> = std::result::Result<T, HislipError>;

impl From<HislipError> for TransportError {
    fn from(err: HislipError) -> Self {
        match err {
            HislipError::Transport(err) => err,
            HislipError::NotReady(_) => TransportError::NotOpen,
            other => TransportError::Protocol(other.to_string()),
        }
    }
}
