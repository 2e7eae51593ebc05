//! Message framing over labhal transports.
//!
//! A [`Datagram`] decides how one message is written to and read from a
//! [`Transport`](labhal_transport::Transport):
//! - [`BytesDatagram`]: payload plus terminator
//! - [`OneByOneBytesDatagram`]: the same, written a byte at a time
//! - [`PngDatagram`]: a PNG image delimited by its own chunk lengths
//! - [`HttpDatagram`]: one HTTP request
//!
//! [`DataHandler`] is the text and bytes API built on top of them.

pub mod datagram;
pub mod error;
pub mod handler;
pub mod http;
pub mod png;
pub mod raw;

pub use datagram::Datagram;
pub use error::{DatagramError, Result};
pub use handler::DataHandler;
pub use http::HttpDatagram;
pub use png::{PngDatagram, PNG_SIGNATURE};
pub use raw::{BytesDatagram, OneByOneBytesDatagram};
