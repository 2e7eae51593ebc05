use labhal_transport::{Backend, Transport};

use crate::error::Result;

/// A framing strategy for one logical exchange over a [`Transport`].
///
/// A datagram owns its payload. `send` writes it in whatever shape the
/// strategy requires, `recv` reads one framed message and stores it.
/// Strategies that only work in one direction make the other a no-op.
pub trait Datagram {
    fn send<B: Backend>(&mut self, transport: &mut Transport<B>) -> Result<()>;

    fn recv<B: Backend>(&mut self, transport: &mut Transport<B>) -> Result<()>;
}
