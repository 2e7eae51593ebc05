use bytes::{BufMut, Bytes, BytesMut};
use labhal_transport::{Backend, Transport};

use crate::datagram::Datagram;
use crate::error::Result;

/// Bytes followed by a terminator on send; one terminator- or size-bounded
/// read on receive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BytesDatagram {
    data: Bytes,
    write_terminator: Bytes,
    read_terminator: Bytes,
    size: Option<usize>,
}

impl BytesDatagram {
    pub fn new(
        data: impl Into<Bytes>,
        write_terminator: impl Into<Bytes>,
        read_terminator: impl Into<Bytes>,
    ) -> Self {
        Self {
            data: data.into(),
            write_terminator: write_terminator.into(),
            read_terminator: read_terminator.into(),
            size: None,
        }
    }

    /// Bound the next `recv` to `size` bytes instead of the read terminator.
    pub fn with_size(mut self, size: Option<usize>) -> Self {
        self.size = size;
        self
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }

    pub fn size(&self) -> Option<usize> {
        self.size
    }

    /// Payload followed by the write terminator.
    pub fn pack_data(&self) -> Bytes {
        let mut packed = BytesMut::with_capacity(self.data.len() + self.write_terminator.len());
        packed.put_slice(&self.data);
        packed.put_slice(&self.write_terminator);
        packed.freeze()
    }

    /// Payload with trailing read-terminator bytes removed.
    ///
    /// Any run of bytes that occur in the terminator is stripped, so `"\r\n"`
    /// also removes a lone trailing `'\n'`.
    pub fn unpack_data(&self) -> Bytes {
        let end = self
            .data
            .iter()
            .rposition(|byte| !self.read_terminator.contains(byte))
            .map_or(0, |last| last + 1);
        self.data.slice(..end)
    }
}

impl Datagram for BytesDatagram {
    fn send<B: Backend>(&mut self, transport: &mut Transport<B>) -> Result<()> {
        transport.send_raw(&self.pack_data())?;
        Ok(())
    }

    fn recv<B: Backend>(&mut self, transport: &mut Transport<B>) -> Result<()> {
        self.data = transport.recv_raw(self.size)?;
        Ok(())
    }
}

/// A [`BytesDatagram`] that is written one byte per low-level send.
///
/// For instruments that drop characters when a whole command arrives at once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OneByOneBytesDatagram {
    inner: BytesDatagram,
}

impl OneByOneBytesDatagram {
    pub fn new(
        data: impl Into<Bytes>,
        write_terminator: impl Into<Bytes>,
        read_terminator: impl Into<Bytes>,
    ) -> Self {
        Self {
            inner: BytesDatagram::new(data, write_terminator, read_terminator),
        }
    }

    pub fn with_size(self, size: Option<usize>) -> Self {
        Self {
            inner: self.inner.with_size(size),
        }
    }

    pub fn data(&self) -> &Bytes {
        self.inner.data()
    }

    pub fn pack_data(&self) -> Bytes {
        self.inner.pack_data()
    }

    pub fn unpack_data(&self) -> Bytes {
        self.inner.unpack_data()
    }
}

impl From<BytesDatagram> for OneByOneBytesDatagram {
    fn from(inner: BytesDatagram) -> Self {
        Self { inner }
    }
}

impl Datagram for OneByOneBytesDatagram {
    fn send<B: Backend>(&mut self, transport: &mut Transport<B>) -> Result<()> {
        for byte in self.pack_data().iter() {
            transport.send_raw(std::slice::from_ref(byte))?;
        }
        Ok(())
    }

    fn recv<B: Backend>(&mut self, transport: &mut Transport<B>) -> Result<()> {
        self.inner.recv(transport)
    }
}
