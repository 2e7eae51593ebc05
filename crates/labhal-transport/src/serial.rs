use std::io::{Read, Write};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use serialport::SerialPort;
use tracing::{debug, info};

use crate::buffer::ByteStreamBuffer;
use crate::config::{
    ConnectionParameters, FlowControl, Parity, SerialConfig, StopBits, TimeoutKind, TransportKind,
};
use crate::error::{ConfigError, Result, TransportError};
use crate::traits::Backend;

const DSR_SETTLE: Duration = Duration::from_millis(100);
const DSR_POLL_INTERVAL: Duration = Duration::from_millis(10);
const DEFAULT_PORT_TIMEOUT: Duration = Duration::from_secs(15);

/// A serial port found on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub resource: String,
    pub description: String,
}

/// List serial ports with the resource string that opens each one.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|port| {
            let description = match &port.port_type {
                serialport::SerialPortType::UsbPort(usb) => format!(
                    "USB {:04x}:{:04x} {}",
                    usb.vid,
                    usb.pid,
                    usb.product.clone().unwrap_or_default()
                ),
                serialport::SerialPortType::PciPort => "PCI".to_string(),
                serialport::SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                serialport::SerialPortType::Unknown => String::new(),
            };
            PortInfo {
                resource: port_resource(&port.port_name),
                name: port.port_name,
                description,
            }
        })
        .collect())
}

/// Resource string for a port name (`COM3` becomes `ASRL3::INSTR`).
pub fn port_resource(port_name: &str) -> String {
    match port_name.strip_prefix("COM") {
        Some(number) => format!("ASRL{number}::INSTR"),
        None => port_name.to_string(),
    }
}

/// OS port path for a resource string.
///
/// Accepts plain device paths, `ASRL/dev/ttyUSB0::INSTR` and `ASRL3::INSTR`.
pub fn port_path(resource: &str) -> String {
    let Some(rest) = resource.strip_prefix("ASRL") else {
        return resource.to_string();
    };
    let rest = rest.strip_suffix("::INSTR").unwrap_or(rest);
    if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) {
        if cfg!(windows) {
            format!("COM{rest}")
        } else {
            format!("/dev/ttyS{rest}")
        }
    } else {
        rest.to_string()
    }
}

/// Serial port transport.
///
/// Reads drain whatever the driver already holds, then block for one more
/// byte. Consecutive read terminators left at the head of the buffer after a
/// message are discarded, which swallows the `\r\n` pairs many instruments
/// send when the read terminator is `\n` or `\r`.
pub struct Serial {
    path: String,
    settings: SerialConfig,
    read_terminator: Vec<u8>,
    initial_timeout: Duration,
    port: Option<Box<dyn SerialPort>>,
    buffer: ByteStreamBuffer,
}

impl Serial {
    pub fn new(params: &ConnectionParameters) -> Self {
        Self {
            path: port_path(params.resource()),
            settings: params.serial().clone(),
            read_terminator: params.read_terminator().to_vec(),
            initial_timeout: params
                .timeout(TimeoutKind::Connect)
                .unwrap_or(DEFAULT_PORT_TIMEOUT),
            port: None,
            buffer: ByteStreamBuffer::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(TransportError::NotOpen)
    }

    fn wait_for_dsr(port: &mut dyn SerialPort) -> Result<()> {
        thread::sleep(DSR_SETTLE);
        while !port.read_data_set_ready()? {
            thread::sleep(DSR_POLL_INTERVAL);
        }
        Ok(())
    }
}

impl Backend for Serial {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn open(&mut self) -> Result<()> {
        info!(path = %self.path, baud = self.settings.baud_rate, "opening serial port");
        let port = serialport::new(&self.path, self.settings.baud_rate)
            .data_bits(data_bits(self.settings.data_bits)?)
            .parity(parity(self.settings.parity)?)
            .stop_bits(stop_bits(self.settings.stop_bits)?)
            .flow_control(flow_control(self.settings.flow_control))
            .timeout(self.initial_timeout)
            .open()?;
        self.buffer.reset();
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            debug!(path = %self.path, "serial port closed");
        }
        self.buffer.reset();
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        let dtr_dsr = self.settings.flow_control == FlowControl::DtrDsr;
        let port = self.port_mut()?;
        port.write_all(data).map_err(TransportError::from_io)?;
        port.flush().map_err(TransportError::from_io)?;
        if dtr_dsr {
            Self::wait_for_dsr(port.as_mut())?;
        }
        Ok(())
    }

    fn recv(&mut self, size: Option<usize>) -> Result<Bytes> {
        let port = self.port.as_mut().ok_or(TransportError::NotOpen)?;
        let frame = self.buffer.read_framed(size, &self.read_terminator, |buf| {
            let waiting = port.bytes_to_read().map_err(std::io::Error::from)? as usize;
            let mut chunk = vec![0u8; waiting.max(1)];
            let read = port.read(&mut chunk)?;
            if read == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "serial read timeout",
                ));
            }
            buf.put(&chunk[..read]);
            Ok(read)
        })?;
        self.buffer.clean(&self.read_terminator);
        Ok(frame)
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.port_mut()?.set_timeout(timeout)?;
        Ok(())
    }
}

impl std::fmt::Debug for Serial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Serial")
            .field("path", &self.path)
            .field("settings", &self.settings)
            .field("open", &self.port.is_some())
            .finish()
    }
}

fn data_bits(bits: u8) -> Result<serialport::DataBits> {
    match bits {
        5 => Ok(serialport::DataBits::Five),
        6 => Ok(serialport::DataBits::Six),
        7 => Ok(serialport::DataBits::Seven),
        8 => Ok(serialport::DataBits::Eight),
        other => Err(ConfigError::Serial(format!("unsupported data bits {other}")).into()),
    }
}

fn parity(parity: Parity) -> Result<serialport::Parity> {
    match parity {
        Parity::None => Ok(serialport::Parity::None),
        Parity::Odd => Ok(serialport::Parity::Odd),
        Parity::Even => Ok(serialport::Parity::Even),
        Parity::Mark | Parity::Space => Err(ConfigError::Serial(format!(
            "{parity:?} parity is not supported by the serial driver"
        ))
        .into()),
    }
}

fn stop_bits(stop_bits: StopBits) -> Result<serialport::StopBits> {
    match stop_bits {
        StopBits::One => Ok(serialport::StopBits::One),
        StopBits::Two => Ok(serialport::StopBits::Two),
        StopBits::OnePointFive => Err(ConfigError::Serial(
            "1.5 stop bits are not supported by the serial driver".to_string(),
        )
        .into()),
    }
}

// DTR/DSR has no driver mode; it is handled by polling DSR after each write.
fn flow_control(flow: FlowControl) -> serialport::FlowControl {
    match flow {
        FlowControl::None | FlowControl::DtrDsr => serialport::FlowControl::None,
        FlowControl::XonXoff => serialport::FlowControl::Software,
        FlowControl::RtsCts => serialport::FlowControl::Hardware,
    }
}
