use bytes::{Bytes, BytesMut};
use labhal_transport::{Backend, Transport};
use tracing::{debug, trace};

use crate::datagram::Datagram;
use crate::error::{DatagramError, Result};

pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n'];

const LENGTH_SIZE: usize = 4;
const TYPE_SIZE: usize = 4;
const CRC_SIZE: usize = 4;

/// A PNG image read straight off the wire (screen captures).
///
/// The image has no terminator. Its end is found by walking the chunk
/// length fields until the `IEND` chunk. Receive-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PngDatagram {
    data: Bytes,
    chunks: usize,
}

impl PngDatagram {
    pub fn new() -> Self {
        Self::default()
    }

    /// The complete image, signature included.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// Chunks read by the last `recv`, `IEND` included.
    pub fn chunk_count(&self) -> usize {
        self.chunks
    }
}

impl Datagram for PngDatagram {
    fn send<B: Backend>(&mut self, _transport: &mut Transport<B>) -> Result<()> {
        Ok(())
    }

    fn recv<B: Backend>(&mut self, transport: &mut Transport<B>) -> Result<()> {
        let mut reader = ExactReader {
            transport,
            surplus: BytesMut::new(),
        };
        let mut image = BytesMut::new();
        reader.read_exact(PNG_SIGNATURE.len(), &mut image)?;
        if image[..] != PNG_SIGNATURE {
            return Err(DatagramError::InvalidPngSignature(image.to_vec()));
        }

        let mut chunks = 0;
        loop {
            let start = image.len();
            reader.read_exact(LENGTH_SIZE, &mut image)?;
            let mut length = [0u8; LENGTH_SIZE];
            length.copy_from_slice(&image[start..]);
            let length = u32::from_be_bytes(length) as usize;

            let type_start = image.len();
            reader.read_exact(TYPE_SIZE + length + CRC_SIZE, &mut image)?;
            chunks += 1;

            let chunk_type = &image[type_start..type_start + TYPE_SIZE];
            trace!(chunk = %String::from_utf8_lossy(chunk_type), length, "png chunk");
            if chunk_type == b"IEND" {
                break;
            }
        }

        if !reader.surplus.is_empty() {
            debug!(bytes = reader.surplus.len(), "discarding bytes after IEND");
        }
        self.data = image.freeze();
        self.chunks = chunks;
        Ok(())
    }
}

/// Sized reads over any backend.
///
/// Message-oriented backends (HiSLIP, VISA, remote boards) may hand back a
/// whole reply for a sized request; the excess is kept for the next read.
struct ExactReader<'a, B: Backend> {
    transport: &'a mut Transport<B>,
    surplus: BytesMut,
}

impl<B: Backend> ExactReader<'_, B> {
    /// Append exactly `count` bytes to `out`.
    fn read_exact(&mut self, count: usize, out: &mut BytesMut) -> Result<()> {
        let mut remaining = count;
        while remaining > 0 {
            if self.surplus.is_empty() {
                let data = self.transport.recv_raw(Some(remaining))?;
                self.surplus.extend_from_slice(&data);
            }
            let taken = self.surplus.len().min(remaining);
            out.extend_from_slice(&self.surplus.split_to(taken));
            remaining -= taken;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use labhal_transport::{
        ConnectionConfig, ConnectionParameters, Loopback, LoopbackHandle, TransportError,
        TransportKind,
    };

    use super::*;

    fn loopback() -> (Transport<Loopback>, LoopbackHandle) {
        let params = ConnectionParameters::new(ConnectionConfig {
            interface: Some(TransportKind::Loopback),
            ..Default::default()
        })
        .unwrap();
        let handle = LoopbackHandle::new();
        let mut transport = Transport::new(params, Loopback::new(handle.clone()));
        transport.open().unwrap();
        (transport, handle)
    }

    fn chunk(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = (body.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(body);
        out.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        out
    }

    #[test]
    fn stops_after_iend() {
        let (mut transport, handle) = loopback();
        let mut image = PNG_SIGNATURE.to_vec();
        image.extend(chunk(b"IHDR", &[]));
        image.extend(chunk(b"IEND", &[]));
        let mut stream = image.clone();
        stream.extend_from_slice(b"trailing");
        handle.push_reply(stream);

        let mut png = PngDatagram::new();
        png.recv(&mut transport).unwrap();
        assert_eq!(png.chunk_count(), 2);
        assert_eq!(png.data().as_ref(), image.as_slice());
        assert_eq!(transport.recv_raw(None).unwrap().as_ref(), b"trailing");
    }

    #[test]
    fn reassembles_chunks_split_across_reads() {
        let (mut transport, handle) = loopback();
        let mut image = PNG_SIGNATURE.to_vec();
        image.extend(chunk(b"IHDR", &[1; 13]));
        image.extend(chunk(b"IDAT", &[7; 300]));
        image.extend(chunk(b"IEND", &[]));
        for piece in image.chunks(5) {
            handle.push_reply(piece.to_vec());
        }

        let mut png = PngDatagram::new();
        png.recv(&mut transport).unwrap();
        assert_eq!(png.chunk_count(), 3);
        assert_eq!(png.data().as_ref(), image.as_slice());
    }

    #[test]
    fn iend_text_inside_chunk_data_does_not_end_the_image() {
        let (mut transport, handle) = loopback();
        let mut image = PNG_SIGNATURE.to_vec();
        image.extend(chunk(b"tEXt", b"IEND"));
        image.extend(chunk(b"IEND", &[]));
        handle.push_reply(image.clone());

        let mut png = PngDatagram::new();
        png.recv(&mut transport).unwrap();
        assert_eq!(png.chunk_count(), 2);
        assert_eq!(png.data().len(), image.len());
    }

    #[test]
    fn rejects_bad_signature() {
        let (mut transport, handle) = loopback();
        handle.push_reply(&b"GIF89a\0\0"[..]);
        let err = PngDatagram::new().recv(&mut transport).unwrap_err();
        assert!(matches!(err, DatagramError::InvalidPngSignature(_)));
    }

    #[test]
    fn truncated_image_surfaces_transport_error() {
        let (mut transport, handle) = loopback();
        let mut image = PNG_SIGNATURE.to_vec();
        image.extend(&chunk(b"IHDR", &[0; 13])[..10]);
        handle.push_reply(image);
        let err = PngDatagram::new().recv(&mut transport).unwrap_err();
        assert!(matches!(
            err,
            DatagramError::Transport(TransportError::Timeout)
        ));
    }

    /// Answers every read with the same complete reply, ignoring the size.
    struct WholeReply(Bytes);

    impl Backend for WholeReply {
        fn kind(&self) -> TransportKind {
            TransportKind::Hislip
        }

        fn open(&mut self) -> labhal_transport::Result<()> {
            Ok(())
        }

        fn close(&mut self) -> labhal_transport::Result<()> {
            Ok(())
        }

        fn send(&mut self, _data: &[u8]) -> labhal_transport::Result<()> {
            Ok(())
        }

        fn recv(&mut self, _size: Option<usize>) -> labhal_transport::Result<Bytes> {
            Ok(self.0.clone())
        }

        fn set_timeout(&mut self, _timeout: std::time::Duration) -> labhal_transport::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn whole_message_backends_yield_the_full_image() {
        let mut image = PNG_SIGNATURE.to_vec();
        image.extend(chunk(b"IHDR", &[2; 13]));
        image.extend(chunk(b"IDAT", &[9; 40]));
        image.extend(chunk(b"IEND", &[]));

        let params = ConnectionParameters::new(ConnectionConfig {
            interface: Some(TransportKind::Loopback),
            ..Default::default()
        })
        .unwrap();
        let mut transport = Transport::new(params, WholeReply(Bytes::from(image.clone())));
        transport.open().unwrap();

        let mut png = PngDatagram::new();
        png.recv(&mut transport).unwrap();
        assert_eq!(png.chunk_count(), 3);
        assert_eq!(png.data().as_ref(), image.as_slice());
    }

    #[test]
    fn send_is_a_no_op() {
        let (mut transport, handle) = loopback();
        PngDatagram::new().send(&mut transport).unwrap();
        assert!(handle.take_sent().is_empty());
    }
}
