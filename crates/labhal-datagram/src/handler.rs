use std::time::Duration;

use bytes::Bytes;
use labhal_transport::{Backend, Transport};

use crate::datagram::Datagram;
use crate::error::Result;
use crate::raw::BytesDatagram;

/// The command/response surface instrument drivers talk to.
///
/// Text helpers frame commands with the connection's terminators through a
/// [`BytesDatagram`]. The `*_datagram` methods accept any other framing.
/// Every operation takes an optional timeout that is applied first; `None`
/// keeps whatever timeout is active.
pub struct DataHandler<B: Backend = Box<dyn Backend>> {
    transport: Transport<B>,
}

impl<B: Backend> DataHandler<B> {
    pub fn new(transport: Transport<B>) -> Self {
        Self { transport }
    }

    pub fn send(&mut self, command: &str, timeout: Option<Duration>) -> Result<()> {
        self.send_raw(command.as_bytes(), timeout)
    }

    pub fn send_raw(&mut self, data: &[u8], timeout: Option<Duration>) -> Result<()> {
        let mut datagram = self.bytes_datagram(Bytes::copy_from_slice(data), None);
        self.send_datagram(&mut datagram, timeout)
    }

    pub fn send_datagram<D: Datagram>(
        &mut self,
        datagram: &mut D,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.transport.set_timeout(timeout)?;
        datagram.send(&mut self.transport)
    }

    /// Read one message as text. The terminator is kept.
    pub fn recv(&mut self, timeout: Option<Duration>, size: Option<usize>) -> Result<String> {
        let data = self.recv_raw(timeout, size)?;
        Ok(std::str::from_utf8(&data)?.to_owned())
    }

    pub fn recv_raw(&mut self, timeout: Option<Duration>, size: Option<usize>) -> Result<Bytes> {
        let mut datagram = self.bytes_datagram(Bytes::new(), size);
        self.recv_datagram(&mut datagram, timeout)?;
        Ok(datagram.into_data())
    }

    pub fn recv_datagram<D: Datagram>(
        &mut self,
        datagram: &mut D,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.transport.set_timeout(timeout)?;
        datagram.recv(&mut self.transport)
    }

    /// Send a command and read the reply as text with terminator bytes
    /// trimmed from both ends.
    pub fn query(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
        size: Option<usize>,
    ) -> Result<String> {
        let reply = self.query_raw(command.as_bytes(), timeout, size)?;
        let trimmed = trim_terminator(&reply, self.transport.params().read_terminator());
        Ok(std::str::from_utf8(trimmed)?.to_owned())
    }

    pub fn query_raw(
        &mut self,
        data: &[u8],
        timeout: Option<Duration>,
        size: Option<usize>,
    ) -> Result<Bytes> {
        let mut request = self.bytes_datagram(Bytes::copy_from_slice(data), None);
        let mut reply = self.bytes_datagram(Bytes::new(), size);
        self.query_datagram(&mut request, &mut reply, timeout)?;
        Ok(reply.into_data())
    }

    /// Send `request` and receive into `reply` under one timeout.
    pub fn query_datagram<S: Datagram, R: Datagram>(
        &mut self,
        request: &mut S,
        reply: &mut R,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.transport.set_timeout(timeout)?;
        request.send(&mut self.transport)?;
        reply.recv(&mut self.transport)
    }

    pub fn transport(&self) -> &Transport<B> {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut Transport<B> {
        &mut self.transport
    }

    pub fn into_inner(self) -> Transport<B> {
        self.transport
    }

    fn bytes_datagram(&self, data: Bytes, size: Option<usize>) -> BytesDatagram {
        let params = self.transport.params();
        BytesDatagram::new(
            data,
            Bytes::copy_from_slice(params.write_terminator()),
            Bytes::copy_from_slice(params.read_terminator()),
        )
        .with_size(size)
    }
}

impl<B: Backend> std::fmt::Debug for DataHandler<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataHandler")
            .field("transport", &self.transport)
            .finish()
    }
}

impl<B: Backend> From<Transport<B>> for DataHandler<B> {
    fn from(transport: Transport<B>) -> Self {
        Self::new(transport)
    }
}

fn trim_terminator<'a>(data: &'a [u8], terminator: &[u8]) -> &'a [u8] {
    let Some(start) = data.iter().position(|byte| !terminator.contains(byte)) else {
        return &[];
    };
    let end = data
        .iter()
        .rposition(|byte| !terminator.contains(byte))
        .map_or(start, |last| last + 1);
    &data[start..end]
}

#[cfg(test)]
mod tests {
    use labhal_transport::{
        ConnectionConfig, ConnectionParameters, Loopback, LoopbackHandle, TransportKind,
    };

    use super::*;
    use crate::error::DatagramError;
    use crate::png::{PngDatagram, PNG_SIGNATURE};

    fn handler(config: ConnectionConfig) -> (DataHandler<Loopback>, LoopbackHandle) {
        let params = ConnectionParameters::new(ConnectionConfig {
            interface: Some(TransportKind::Loopback),
            ..config
        })
        .unwrap();
        let handle = LoopbackHandle::new();
        let mut transport = Transport::new(params, Loopback::new(handle.clone()));
        transport.open().unwrap();
        (DataHandler::new(transport), handle)
    }

    #[test]
    fn send_appends_write_terminator() {
        let (mut handler, handle) = handler(ConnectionConfig::default());
        handler.send("OUTP ON", None).unwrap();
        assert_eq!(handle.take_sent(), vec![Bytes::from_static(b"OUTP ON\r\n")]);
    }

    #[test]
    fn query_trims_terminators() {
        let (mut handler, handle) = handler(ConnectionConfig::default());
        handle.push_reply("\nACME,PSU,0,1.0\n");
        let reply = handler.query("*IDN?", None, None).unwrap();
        assert_eq!(reply, "ACME,PSU,0,1.0");
        assert_eq!(handle.take_sent(), vec![Bytes::from_static(b"*IDN?\r\n")]);
    }

    #[test]
    fn recv_keeps_the_terminator() {
        let (mut handler, handle) = handler(ConnectionConfig::default());
        handle.push_reply("5.000\n");
        assert_eq!(handler.recv(None, None).unwrap(), "5.000\n");
    }

    #[test]
    fn timeout_is_applied_before_the_exchange() {
        let (mut handler, handle) = handler(ConnectionConfig::default());
        handle.push_reply("1\n");
        handler
            .query_raw(b"*OPC?", Some(Duration::from_secs(2)), None)
            .unwrap();
        handle.push_reply("1\n");
        handler.query_raw(b"*OPC?", None, None).unwrap();
        assert_eq!(
            handle.timeouts(),
            vec![Duration::from_secs(30), Duration::from_secs(2)]
        );
    }

    #[test]
    fn custom_terminators_come_from_the_connection() {
        let mut config = ConnectionConfig::default();
        config.terminator.read = "\r".to_string();
        config.terminator.write = "\r".to_string();
        let (mut handler, handle) = handler(config);
        handle.push_reply("OK\r");
        assert_eq!(handler.query("PW 1", None, None).unwrap(), "OK");
        assert_eq!(handle.take_sent(), vec![Bytes::from_static(b"PW 1\r")]);
    }

    #[test]
    fn invalid_utf8_is_reported() {
        let (mut handler, handle) = handler(ConnectionConfig::default());
        handle.push_reply(&b"\xFF\xFE\n"[..]);
        let err = handler.recv(None, None).unwrap_err();
        assert!(matches!(err, DatagramError::InvalidUtf8(_)));
    }

    #[test]
    fn query_datagram_with_png_reply() {
        let (mut handler, handle) = handler(ConnectionConfig::default());
        let mut image = PNG_SIGNATURE.to_vec();
        image.extend_from_slice(&0u32.to_be_bytes());
        image.extend_from_slice(b"IEND");
        image.extend_from_slice(&[0xAE, 0x42, 0x60, 0x82]);
        handle.push_reply(image.clone());

        let mut request = BytesDatagram::new("HCOP:DATA?", "\n", "");
        let mut reply = PngDatagram::new();
        handler
            .query_datagram(&mut request, &mut reply, None)
            .unwrap();
        assert_eq!(reply.data().as_ref(), image.as_slice());
        assert_eq!(handle.take_sent(), vec![Bytes::from_static(b"HCOP:DATA?\n")]);
    }

    #[test]
    fn trim_handles_all_terminator_input() {
        assert_eq!(trim_terminator(b"\r\n\r\n", b"\r\n"), b"");
        assert_eq!(trim_terminator(b"abc", b""), b"abc");
        assert_eq!(trim_terminator(b"\na\nb\n", b"\n"), b"a\nb");
    }
}
