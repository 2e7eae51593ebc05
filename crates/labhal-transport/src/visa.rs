use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info};

use crate::config::{ConnectionParameters, Parity, SerialConfig, StopBits, TransportKind};
use crate::error::{Result, TransportError};
use crate::traits::Backend;

/// A VISA implementation (vendor shared library, simulator, ...).
///
/// Implementations report their own failures as [`TransportError::Visa`].
pub trait VisaLibrary: Send + Sync {
    fn open_resource(&self, resource: &str) -> Result<Box<dyn VisaSession>>;

    fn list_resources(&self) -> Result<Vec<String>>;
}

/// One open VISA resource.
pub trait VisaSession: Send {
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read up to `size` bytes, or one terminated message when `size` is `None`.
    fn read(&mut self, size: Option<usize>) -> Result<Bytes>;

    fn set_timeout_ms(&mut self, millis: u32) -> Result<()>;

    fn set_terminators(&mut self, read: &[u8], write: &[u8]) -> Result<()>;

    fn set_serial(&mut self, settings: &VisaSerialSettings) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// Serial attributes in VISA's numeric encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisaSerialSettings {
    pub baud_rate: u32,
    pub data_bits: u8,
    /// `ASRL_PARITY`: none 0, odd 1, even 2, mark 3, space 4.
    pub parity: u8,
    /// `ASRL_STOP_BITS` in tenths: 10, 15 or 20.
    pub stop_bits: u8,
    /// `ASRL_FLOW_CNTRL` bit code.
    pub flow_control: u8,
}

impl From<&SerialConfig> for VisaSerialSettings {
    fn from(config: &SerialConfig) -> Self {
        Self {
            baud_rate: config.baud_rate,
            data_bits: config.data_bits,
            parity: match config.parity {
                Parity::None => 0,
                Parity::Odd => 1,
                Parity::Even => 2,
                Parity::Mark => 3,
                Parity::Space => 4,
            },
            stop_bits: match config.stop_bits {
                StopBits::One => 10,
                StopBits::OnePointFive => 15,
                StopBits::Two => 20,
            },
            flow_control: config.flow_control.code(),
        }
    }
}

/// Pass-through to an injected VISA library.
pub struct Visa {
    resource: String,
    read_terminator: Vec<u8>,
    write_terminator: Vec<u8>,
    serial: SerialConfig,
    library: Arc<dyn VisaLibrary>,
    session: Option<Box<dyn VisaSession>>,
}

impl Visa {
    pub fn new(params: &ConnectionParameters, library: Arc<dyn VisaLibrary>) -> Self {
        Self {
            resource: params.resource().to_string(),
            read_terminator: params.read_terminator().to_vec(),
            write_terminator: params.write_terminator().to_vec(),
            serial: params.serial().clone(),
            library,
            session: None,
        }
    }

    fn session_mut(&mut self) -> Result<&mut Box<dyn VisaSession>> {
        self.session.as_mut().ok_or(TransportError::NotOpen)
    }
}

impl Backend for Visa {
    fn kind(&self) -> TransportKind {
        TransportKind::Visa
    }

    fn open(&mut self) -> Result<()> {
        info!(resource = %self.resource, "opening visa resource");
        let mut session = self.library.open_resource(&self.resource)?;
        session.set_terminators(&self.read_terminator, &self.write_terminator)?;
        if self.resource.starts_with("ASRL") {
            let settings = VisaSerialSettings::from(&self.serial);
            debug!(?settings, "applying serial attributes");
            session.set_serial(&settings)?;
        }
        self.session = Some(session);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        match self.session.take() {
            Some(mut session) => session.close(),
            None => Ok(()),
        }
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.session_mut()?.write(data)
    }

    fn recv(&mut self, size: Option<usize>) -> Result<Bytes> {
        let data = self.session_mut()?.read(size)?;
        Ok(data.slice_ref(data.trim_ascii()))
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        self.session_mut()?.set_timeout_ms(millis)
    }
}

impl std::fmt::Debug for Visa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Visa")
            .field("resource", &self.resource)
            .field("open", &self.session.is_some())
            .finish_non_exhaustive()
    }
}
