//! Discovery of locally attached instruments.

use labhal_transport::serial::{self, PortInfo};
use labhal_transport::usbtmc::{self, UsbTmcDevice};
use labhal_transport::{Result, TransportKind};
use tracing::{debug, warn};

use crate::registry::Collaborators;

/// An instrument found by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundResource {
    /// Resource string that opens this instrument.
    pub resource: String,
    pub kind: TransportKind,
    pub description: String,
}

/// Resource strings of every USB-TMC device and serial port on this host.
pub fn list_resources() -> Result<Vec<String>> {
    Ok(scan()?
        .into_iter()
        .map(|found| found.resource)
        .collect())
}

/// USB-TMC devices first, then serial ports.
pub fn scan() -> Result<Vec<FoundResource>> {
    let devices = usbtmc::list_devices()?;
    let ports = serial::list_ports()?;
    let found = merge(devices, ports);
    debug!(count = found.len(), "scan finished");
    Ok(found)
}

/// [`scan`] plus whatever the injected VISA library reports.
///
/// A failing VISA library is logged and skipped so local results still come back.
pub fn scan_with(collaborators: &Collaborators) -> Result<Vec<FoundResource>> {
    let mut found = scan()?;
    if let Some(library) = collaborators.visa() {
        match library.list_resources() {
            Ok(resources) => found.extend(resources.into_iter().map(|resource| FoundResource {
                resource,
                kind: TransportKind::Visa,
                description: String::new(),
            })),
            Err(err) => warn!(error = %err, "visa resource listing failed"),
        }
    }
    Ok(found)
}

fn merge(devices: Vec<UsbTmcDevice>, ports: Vec<PortInfo>) -> Vec<FoundResource> {
    let usb = devices.into_iter().map(|device| FoundResource {
        resource: device.id.resource(),
        kind: TransportKind::Usbtmc,
        description: device.path.display().to_string(),
    });
    let serial = ports.into_iter().map(|port| FoundResource {
        resource: port.resource,
        kind: TransportKind::Serial,
        description: port.description,
    });
    usb.chain(serial).collect()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use labhal_transport::usbtmc::UsbId;
    use labhal_transport::{TransportError, VisaLibrary, VisaSession};

    use super::*;

    #[test]
    fn usb_devices_come_before_serial_ports() {
        let devices = vec![UsbTmcDevice {
            path: PathBuf::from("/dev/usbtmc0"),
            id: UsbId {
                vendor_id: 0x0957,
                product_id: 0x1798,
                serial: Some("MY1234".to_string()),
            },
        }];
        let ports = vec![PortInfo {
            name: "/dev/ttyUSB0".to_string(),
            resource: "/dev/ttyUSB0".to_string(),
            description: "USB 0403:6001 FT232R".to_string(),
        }];

        let found = merge(devices, ports);
        assert_eq!(
            found,
            vec![
                FoundResource {
                    resource: "USB0::0x0957::0x1798::MY1234::INSTR".to_string(),
                    kind: TransportKind::Usbtmc,
                    description: "/dev/usbtmc0".to_string(),
                },
                FoundResource {
                    resource: "/dev/ttyUSB0".to_string(),
                    kind: TransportKind::Serial,
                    description: "USB 0403:6001 FT232R".to_string(),
                },
            ]
        );
    }

    #[test]
    fn nothing_attached_is_an_empty_list() {
        assert!(merge(Vec::new(), Vec::new()).is_empty());
    }

    struct BrokenVisa;

    impl VisaLibrary for BrokenVisa {
        fn open_resource(&self, _resource: &str) -> labhal_transport::Result<Box<dyn VisaSession>> {
            Err(TransportError::Visa("unavailable".to_string()))
        }

        fn list_resources(&self) -> labhal_transport::Result<Vec<String>> {
            Err(TransportError::Visa("unavailable".to_string()))
        }
    }

    #[test]
    fn failing_visa_listing_is_skipped() {
        let collaborators = Collaborators::new().with_visa(Arc::new(BrokenVisa));
        // Local enumeration depends on the host, so only the VISA part is checked.
        if let Ok(found) = scan_with(&collaborators) {
            assert!(found.iter().all(|entry| entry.kind != TransportKind::Visa));
        }
    }
}
