//! HiSLIP (High-Speed LAN Instrument Protocol) client.
//!
//! A session runs over two TCP connections to the same instrument port:
//! - the synchronous channel carries `DATA`/`DATA_END` messages
//! - the asynchronous channel is opened with the session id handed out by
//!   the synchronous `INITIALIZE` exchange
//!
//! [`Hislip`] implements [`Backend`](labhal_transport::Backend), so it is used
//! through a [`Transport`](labhal_transport::Transport) like any other link.

pub mod error;
pub mod message;
pub mod session;

pub use error::{HislipError, Origin, Result};
pub use message::{ErrorCode, FatalErrorCode, Header, MessageType, HEADER_SIZE};
pub use session::{Hislip, Session, SessionState, MAX_DATA_SIZE};
