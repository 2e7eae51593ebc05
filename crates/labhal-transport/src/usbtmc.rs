use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info};

use crate::buffer::ByteStreamBuffer;
use crate::config::{ConnectionParameters, TransportKind};
use crate::error::{ConfigError, Result, TransportError};
use crate::socket::READ_CHUNK_SIZE;
use crate::traits::Backend;

const SYSFS_USBMISC: &str = "/sys/class/usbmisc";

/// `_IOW('[', 10, u32)`: set the driver I/O timeout in milliseconds.
#[cfg(target_os = "linux")]
const USBTMC_IOCTL_SET_TIMEOUT: u32 = 0x4004_5B0A;

/// USB identity parsed from a `USB...::vid::pid[::serial]::INSTR` resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbId {
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial: Option<String>,
}

impl UsbId {
    /// Parse a USB resource string. Ids may be decimal or `0x` hex.
    pub fn parse(resource: &str) -> Result<Self> {
        let parts: Vec<&str> = resource.split("::").collect();
        let bad = || TransportError::Config(ConfigError::UnknownResource(resource.to_string()));

        if parts.len() < 3 || !parts[0].starts_with("USB") {
            return Err(bad());
        }
        let vendor_id = parse_id(parts[1]).ok_or_else(bad)?;
        let product_id = parse_id(parts[2]).ok_or_else(bad)?;
        let serial = parts
            .get(3)
            .filter(|part| !part.is_empty() && **part != "INSTR")
            .map(|part| part.to_string());

        Ok(Self {
            vendor_id,
            product_id,
            serial,
        })
    }

    /// Canonical resource string for this device.
    pub fn resource(&self) -> String {
        match &self.serial {
            Some(serial) => format!(
                "USB0::0x{:04X}::0x{:04X}::{serial}::INSTR",
                self.vendor_id, self.product_id
            ),
            None => format!(
                "USB0::0x{:04X}::0x{:04X}::INSTR",
                self.vendor_id, self.product_id
            ),
        }
    }

    fn matches(&self, other: &UsbId) -> bool {
        self.vendor_id == other.vendor_id
            && self.product_id == other.product_id
            && match &self.serial {
                Some(serial) => other.serial.as_deref() == Some(serial.as_str()),
                None => true,
            }
    }
}

/// A USB-TMC character device bound by the kernel driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbTmcDevice {
    pub path: PathBuf,
    pub id: UsbId,
}

/// List USB-TMC devices known to the kernel driver.
pub fn list_devices() -> Result<Vec<UsbTmcDevice>> {
    list_devices_in(Path::new(SYSFS_USBMISC))
}

fn list_devices_in(root: &Path) -> Result<Vec<UsbTmcDevice>> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut devices = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with("usbtmc") {
            continue;
        }
        let usb_dir = entry.path().join("device").join("..");
        let read = |file: &str| {
            std::fs::read_to_string(usb_dir.join(file))
                .map(|value| value.trim().to_string())
                .ok()
        };
        let (Some(vendor), Some(product)) = (read("idVendor"), read("idProduct")) else {
            debug!(device = %name, "skipping usbtmc entry without usb ids");
            continue;
        };
        let (Ok(vendor_id), Ok(product_id)) = (
            u16::from_str_radix(&vendor, 16),
            u16::from_str_radix(&product, 16),
        ) else {
            continue;
        };
        devices.push(UsbTmcDevice {
            path: Path::new("/dev").join(&name),
            id: UsbId {
                vendor_id,
                product_id,
                serial: read("serial").filter(|serial| !serial.is_empty()),
            },
        });
    }
    devices.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(devices)
}

fn find_device_in(root: &Path, resource: &str) -> Result<PathBuf> {
    if resource.starts_with("/dev/") {
        return Ok(PathBuf::from(resource));
    }
    let wanted = UsbId::parse(resource)?;
    list_devices_in(root)?
        .into_iter()
        .find(|device| wanted.matches(&device.id))
        .map(|device| device.path)
        .ok_or_else(|| TransportError::Connect {
            target: resource.to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no matching usbtmc device",
            ),
        })
}

fn parse_id(text: &str) -> Option<u16> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// USB Test & Measurement Class device through the Linux `usbtmc` driver.
#[derive(Debug)]
pub struct UsbTmc {
    resource: String,
    read_terminator: Vec<u8>,
    sysfs_root: PathBuf,
    device: Option<File>,
    buffer: ByteStreamBuffer,
}

impl UsbTmc {
    pub fn new(params: &ConnectionParameters) -> Self {
        Self {
            resource: params.resource().to_string(),
            read_terminator: params.read_terminator().to_vec(),
            sysfs_root: PathBuf::from(SYSFS_USBMISC),
            device: None,
            buffer: ByteStreamBuffer::new(),
        }
    }

    fn device_mut(&mut self) -> Result<&mut File> {
        self.device.as_mut().ok_or(TransportError::NotOpen)
    }
}

impl Backend for UsbTmc {
    fn kind(&self) -> TransportKind {
        TransportKind::Usbtmc
    }

    fn open(&mut self) -> Result<()> {
        let path = find_device_in(&self.sysfs_root, &self.resource)?;
        info!(resource = %self.resource, path = %path.display(), "opening usbtmc device");
        let device = File::options()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| TransportError::Connect {
                target: path.display().to_string(),
                source,
            })?;
        self.buffer.reset();
        self.device = Some(device);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.device = None;
        self.buffer.reset();
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.device_mut()?
            .write_all(data)
            .map_err(TransportError::from_io)
    }

    fn recv(&mut self, size: Option<usize>) -> Result<Bytes> {
        let device = self.device.as_mut().ok_or(TransportError::NotOpen)?;
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];
        self.buffer
            .read_framed(size, &self.read_terminator, |buf| {
                let read = device.read(&mut chunk)?;
                buf.put(&chunk[..read]);
                Ok(read)
            })
    }

    #[cfg(target_os = "linux")]
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        use std::os::fd::AsRawFd;

        let fd = self.device_mut()?.as_raw_fd();
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);

        // SAFETY: `fd` is an open usbtmc descriptor owned by `self.device`, and
        // the ioctl reads exactly one u32 from the provided pointer.
        let rc = unsafe { libc::ioctl(fd, USBTMC_IOCTL_SET_TIMEOUT as _, &millis as *const u32) };
        if rc < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.device_mut()?;
        debug!(?timeout, "usbtmc timeouts are fixed by the driver on this platform");
        Ok(())
    }
}
