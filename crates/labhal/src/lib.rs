//! Lab instrument communication.
//!
//! labhal moves bytes between a test host and its instruments over serial
//! ports, TCP sockets, USB-TMC, VXI-11, HiSLIP, HTTP, DMX-512, an injected
//! VISA library or a remote board.
//!
//! # Crate Structure
//!
//! - [`transport`]: connection parameters, the `Backend` contract and its adapters
//! - [`datagram`]: message framing and the `DataHandler` command surface
//! - [`hislip`]: the HiSLIP session engine
//! - [`registry`]: builds the right backend for a set of connection parameters
//! - [`scan`]: lists locally attached instruments
//! - [`logging`]: `tracing` subscriber setup (behind the `logging` feature)

/// Re-export transport types.
pub mod transport {
    pub use labhal_transport::*;
}

/// Re-export datagram types.
pub mod datagram {
    pub use labhal_datagram::*;
}

/// Re-export HiSLIP types.
pub mod hislip {
    pub use labhal_hislip::*;
}

#[cfg(feature = "logging")]
pub mod logging;
pub mod registry;
pub mod scan;

pub use labhal_datagram::DataHandler;
pub use labhal_transport::{ConnectionConfig, ConnectionParameters, Transport, TransportKind};
pub use registry::{build_backend, build_transport, connect, Collaborators};
