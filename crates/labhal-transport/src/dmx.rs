use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::config::{ConnectionParameters, TransportKind};
use crate::error::{Result, TransportError};
use crate::serial::Serial;
use crate::traits::Backend;

/// Channels in one DMX universe.
pub const DMX_SIZE: usize = 512;

const START_OF_MESSAGE: u8 = 0x7E;
const END_OF_MESSAGE: u8 = 0xE7;

/// Widget label that sets break/MAB/rate parameters.
pub const SET_PARAMETERS_LABEL: u8 = 4;
/// Widget label that transmits a universe.
pub const SEND_DMX_LABEL: u8 = 6;

/// Wrap `data` in a widget message: `0x7E, label, len (u16 LE), data, 0xE7`.
pub fn format_frame(label: u8, data: &[u8]) -> Result<Bytes> {
    let len = u16::try_from(data.len())
        .map_err(|_| TransportError::Protocol(format!("dmx payload too large ({} bytes)", data.len())))?;
    let mut frame = BytesMut::with_capacity(data.len() + 5);
    frame.put_u8(START_OF_MESSAGE);
    frame.put_u8(label);
    frame.put_u16_le(len);
    frame.put_slice(data);
    frame.put_u8(END_OF_MESSAGE);
    Ok(frame.freeze())
}

/// DMX signal timing. Break and MAB are in units of 10.67 µs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmxParameters {
    /// 9..=127
    pub break_time: u32,
    /// 1..=127
    pub mab_time: u32,
    /// Packets per second, 1..=40; 0 sends as fast as possible.
    pub output_rate: u32,
    /// At most 512 bytes.
    pub user_data: Vec<u8>,
}

impl Default for DmxParameters {
    fn default() -> Self {
        Self {
            break_time: 9,
            mab_time: 1,
            output_rate: 40,
            user_data: Vec::new(),
        }
    }
}

impl DmxParameters {
    pub fn validate(&self) -> Result<()> {
        if self.user_data.len() > DMX_SIZE {
            return Err(invalid("user data must not be longer than 512 bytes"));
        }
        if !(9..=127).contains(&self.break_time) {
            return Err(invalid("break time must be between 9 and 127"));
        }
        if !(1..=127).contains(&self.mab_time) {
            return Err(invalid("MAB time must be between 1 and 127"));
        }
        if self.output_rate > 40 {
            return Err(invalid("output rate must be between 0 and 40"));
        }
        Ok(())
    }

    /// The set-parameters widget message.
    pub fn frame(&self) -> Result<Bytes> {
        self.validate()?;
        let mut data = BytesMut::with_capacity(14 + self.user_data.len());
        // user_data.len() <= 512 after validation
        data.put_u16_le(self.user_data.len() as u16);
        data.put_u32_le(self.break_time);
        data.put_u32_le(self.mab_time);
        data.put_u32_le(self.output_rate);
        data.put_slice(&self.user_data);
        format_frame(SET_PARAMETERS_LABEL, &data)
    }
}

/// Channel levels for one universe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmxUniverse {
    levels: [u8; DMX_SIZE],
}

impl Default for DmxUniverse {
    fn default() -> Self {
        Self {
            levels: [0; DMX_SIZE],
        }
    }
}

impl DmxUniverse {
    /// Set one channel. Channels are numbered 1..=512.
    pub fn set_value(&mut self, channel: usize, value: u8) -> Result<()> {
        if !(1..=DMX_SIZE).contains(&channel) {
            return Err(invalid("channel must be between 1 and 512"));
        }
        self.levels[channel - 1] = value;
        Ok(())
    }

    pub fn value(&self, channel: usize) -> Option<u8> {
        channel
            .checked_sub(1)
            .and_then(|index| self.levels.get(index))
            .copied()
    }

    pub fn set_all(&mut self, value: u8) {
        self.levels = [value; DMX_SIZE];
    }

    pub fn clear(&mut self) {
        self.set_all(0);
    }

    /// The send-DMX widget message for the current levels.
    pub fn frame(&self) -> Result<Bytes> {
        format_frame(SEND_DMX_LABEL, &self.levels)
    }
}

/// DMX-512 over a USB serial widget. Write-only.
#[derive(Debug)]
pub struct Dmx {
    serial: Serial,
    parameters: DmxParameters,
    universe: DmxUniverse,
}

impl Dmx {
    pub fn new(params: &ConnectionParameters) -> Self {
        Self {
            serial: Serial::new(params),
            parameters: DmxParameters::default(),
            universe: DmxUniverse::default(),
        }
    }

    pub fn universe(&self) -> &DmxUniverse {
        &self.universe
    }

    pub fn universe_mut(&mut self) -> &mut DmxUniverse {
        &mut self.universe
    }

    /// Validate and send new timing parameters.
    pub fn set_parameters(&mut self, parameters: DmxParameters) -> Result<()> {
        let frame = parameters.frame()?;
        self.serial.send(&frame)?;
        self.parameters = parameters;
        Ok(())
    }

    /// Transmit the current universe.
    pub fn submit(&mut self) -> Result<()> {
        let frame = self.universe.frame()?;
        debug!("submitting dmx universe");
        self.serial.send(&frame)
    }
}

impl Backend for Dmx {
    fn kind(&self) -> TransportKind {
        TransportKind::Dmx
    }

    fn open(&mut self) -> Result<()> {
        self.serial.open()?;
        self.universe.clear();
        let frame = self.parameters.frame()?;
        self.serial.send(&frame)
    }

    fn close(&mut self) -> Result<()> {
        self.serial.close()
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.serial.send(data)
    }

    fn recv(&mut self, _size: Option<usize>) -> Result<Bytes> {
        Err(TransportError::unsupported(TransportKind::Dmx, "recv"))
    }

    fn query(&mut self, _data: &[u8], _size: Option<usize>) -> Result<Bytes> {
        Err(TransportError::unsupported(TransportKind::Dmx, "query"))
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.serial.set_timeout(timeout)
    }
}

fn invalid(message: &str) -> TransportError {
    TransportError::Protocol(format!("invalid dmx setting: {message}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;

    #[test]
    fn frame_layout() {
        let frame = format_frame(SEND_DMX_LABEL, &[1, 2, 3]).unwrap();
        assert_eq!(frame.as_ref(), &[0x7E, 6, 3, 0, 1, 2, 3, 0xE7]);
    }

    #[test]
    fn universe_frame_carries_all_channels() {
        let mut universe = DmxUniverse::default();
        universe.set_value(1, 255).unwrap();
        universe.set_value(512, 7).unwrap();
        let frame = universe.frame().unwrap();
        assert_eq!(frame.len(), DMX_SIZE + 5);
        assert_eq!(&frame[..4], &[0x7E, SEND_DMX_LABEL, 0x00, 0x02]);
        assert_eq!(frame[4], 255);
        assert_eq!(frame[4 + 511], 7);
        assert_eq!(frame[frame.len() - 1], 0xE7);
    }

    #[test]
    fn channel_numbers_are_one_based() {
        let mut universe = DmxUniverse::default();
        assert!(universe.set_value(0, 1).is_err());
        assert!(universe.set_value(513, 1).is_err());
        universe.set_value(3, 9).unwrap();
        assert_eq!(universe.value(3), Some(9));
        assert_eq!(universe.value(0), None);
    }

    #[test]
    fn set_all_and_clear() {
        let mut universe = DmxUniverse::default();
        universe.set_all(128);
        assert_eq!(universe.value(200), Some(128));
        universe.clear();
        assert_eq!(universe.value(200), Some(0));
    }

    #[test]
    fn default_parameters_frame() {
        let frame = DmxParameters::default().frame().unwrap();
        let mut expected = vec![0x7E, SET_PARAMETERS_LABEL, 14, 0];
        expected.extend_from_slice(&[0, 0]);
        expected.extend_from_slice(&9u32.to_le_bytes());
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.extend_from_slice(&40u32.to_le_bytes());
        expected.push(0xE7);
        assert_eq!(frame.as_ref(), expected.as_slice());
    }

    #[test]
    fn parameter_ranges_are_checked() {
        let cases = [
            DmxParameters {
                break_time: 8,
                ..Default::default()
            },
            DmxParameters {
                mab_time: 0,
                ..Default::default()
            },
            DmxParameters {
                output_rate: 41,
                ..Default::default()
            },
            DmxParameters {
                user_data: vec![0; 513],
                ..Default::default()
            },
        ];
        for parameters in cases {
            assert!(parameters.validate().is_err(), "{parameters:?}");
        }
    }

    #[test]
    fn recv_and_query_are_unsupported() {
        let params = ConnectionParameters::new(ConnectionConfig {
            resource: "/dev/ttyUSB0".to_string(),
            interface: Some(TransportKind::Dmx),
            ..Default::default()
        })
        .unwrap();
        let mut dmx = Dmx::new(&params);
        assert!(matches!(
            dmx.recv(None),
            Err(TransportError::Unsupported { .. })
        ));
        assert!(matches!(
            dmx.query(b"x", None),
            Err(TransportError::Unsupported { .. })
        ));
    }
}
