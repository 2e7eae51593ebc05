//! Blocking byte transports for lab instruments.
//!
//! Every physical or virtual link is a [`Backend`]; callers use it through
//! [`Transport`], which adds open/close idempotency, timeout caching and
//! logging. Available backends:
//! - [`Socket`]: raw TCP (SCPI over port 5025 and similar)
//! - [`Serial`]: RS-232 / USB-serial ports
//! - [`UsbTmc`]: USB Test & Measurement Class through the Linux driver
//! - [`Vxi11`]: VXI-11 over ONC-RPC
//! - [`Http`]: web-controlled endpoints
//! - [`Dmx`]: DMX-512 lighting widgets
//! - [`Visa`]: an injected VISA library
//! - [`RemoteProxy`]: instruments owned by a remote board
//! - [`Loopback`]: scripted in-memory exchanges
//!
//! Stream-oriented backends reassemble messages with [`ByteStreamBuffer`].

pub mod buffer;
pub mod config;
pub mod dmx;
pub mod error;
pub mod http;
pub mod loopback;
pub mod remote;
pub mod serial;
pub mod socket;
pub mod traits;
pub mod usbtmc;
pub mod visa;
pub mod vxi11;

pub use buffer::{ByteStreamBuffer, Escaped};
pub use config::{
    ConnectionConfig, ConnectionParameters, FlowControl, HttpAuthMode, HttpConfig, HttpMethod,
    NetworkConfig, Parity, SerialConfig, StopBits, TimeoutKind, TransportKind,
};
pub use dmx::{Dmx, DmxParameters, DmxUniverse};
pub use error::{ConfigError, Result, TransportError};
pub use http::Http;
pub use loopback::{Loopback, LoopbackHandle};
pub use remote::{BoardClient, RemoteProxy};
pub use serial::Serial;
pub use socket::Socket;
pub use traits::{Backend, HttpRequest, Transport};
pub use usbtmc::UsbTmc;
pub use visa::{Visa, VisaLibrary, VisaSerialSettings, VisaSession};
pub use vxi11::Vxi11;
