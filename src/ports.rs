//! Serial ports of the host, through `serialport` and `tokio-serial`
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{debug, info};
use serialport::{SerialPortInfo, SerialPortType};
use tokio_serial::SerialPortBuilderExt;

use crate::errors::DeviceError;
use crate::io::{
    BoxedReader, BoxedWriter, EndpointInfo, PortFilter, SerialBackend, SerialEndpoint,
    VexPortType,
};
use crate::v5::{VEX_V5_BRAIN_PID, VEX_V5_CONTROLLER_PID, VEX_VID};

/// Port names this process currently holds open
type ClaimedPorts = Arc<Mutex<HashSet<String>>>;

/// Finds ports through the operating system's serial port list
#[derive(Debug, Clone, Default)]
pub struct NativeBackend {
    claimed: ClaimedPorts,
}

impl NativeBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Works out the type of every V5 port in `ports`, in order.
///
/// Brains show up as two ports. The product name tells them apart when
/// the platform reports one. Otherwise the system port is listed first
/// and the user port right after it.
fn classify_ports(ports: &[SerialPortInfo]) -> Vec<VexPortType> {
    let mut types: Vec<VexPortType> = Vec::with_capacity(ports.len());

    for port in ports {
        let usb = match &port.port_type {
            SerialPortType::UsbPort(usb) if usb.vid == VEX_VID => usb,
            _ => {
                types.push(VexPortType::Unknown);
                continue;
            }
        };

        let port_type = match usb.pid {
            VEX_V5_CONTROLLER_PID => VexPortType::Controller,
            VEX_V5_BRAIN_PID => {
                let product = usb.product.as_deref().unwrap_or("");
                if product.contains("User") {
                    VexPortType::User
                } else if product.contains("Communications") {
                    VexPortType::System
                } else if types
                    .iter()
                    .rev()
                    .find(|t| **t != VexPortType::Unknown)
                    == Some(&VexPortType::System)
                {
                    VexPortType::User
                } else {
                    VexPortType::System
                }
            }
            _ => VexPortType::System,
        };
        types.push(port_type);
    }

    types
}

fn endpoint_info(port: &SerialPortInfo, port_type: VexPortType) -> EndpointInfo {
    let (vendor_id, product_id) = match &port.port_type {
        SerialPortType::UsbPort(usb) => (Some(usb.vid), Some(usb.pid)),
        _ => (None, None),
    };

    EndpointInfo {
        name: port.port_name.clone(),
        vendor_id,
        product_id,
        port_type,
    }
}

#[async_trait]
impl SerialBackend for NativeBackend {
    async fn list_endpoints(&self) -> Result<Vec<Arc<dyn SerialEndpoint>>, DeviceError> {
        let ports = serialport::available_ports()?;
        let types = classify_ports(&ports);

        let endpoints = ports
            .iter()
            .zip(types)
            // User ports only carry the program's stdio
            .filter(|(_, port_type)| *port_type != VexPortType::User)
            .map(|(port, port_type)| {
                Arc::new(NativeEndpoint {
                    info: endpoint_info(port, port_type),
                    claimed: self.claimed.clone(),
                }) as Arc<dyn SerialEndpoint>
            })
            .collect::<Vec<_>>();

        debug!("Found {} serial endpoints", endpoints.len());
        Ok(endpoints)
    }

    async fn request_authorization(
        &self,
        filters: &[PortFilter],
    ) -> Result<Option<Arc<dyn SerialEndpoint>>, DeviceError> {
        // Native ports need no authorization, so take the first one that fits
        let endpoints = self.list_endpoints().await?;
        Ok(endpoints.into_iter().find(|endpoint| {
            let info = endpoint.info();
            !endpoint.is_claimed() && filters.iter().any(|f| f.matches(&info))
        }))
    }
}

/// One serial port of the host
#[derive(Debug)]
pub struct NativeEndpoint {
    info: EndpointInfo,
    claimed: ClaimedPorts,
}

impl NativeEndpoint {
    fn claimed_ports(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.claimed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SerialEndpoint for NativeEndpoint {
    fn info(&self) -> EndpointInfo {
        self.info.clone()
    }

    fn is_claimed(&self) -> bool {
        self.claimed_ports().contains(&self.info.name)
    }

    async fn open(&self, baud_rate: u32) -> Result<(BoxedReader, BoxedWriter), DeviceError> {
        if self.is_claimed() {
            return Err(DeviceError::AlreadyConnected);
        }

        let stream = tokio_serial::new(&self.info.name, baud_rate)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .open_native_async()?;

        self.claimed_ports().insert(self.info.name.clone());
        info!("Opened {} at {} baud", self.info, baud_rate);

        let (reader, writer) = tokio::io::split(stream);
        Ok((Box::pin(reader), Box::pin(writer)))
    }

    async fn close(&self) -> Result<(), DeviceError> {
        // The port itself closes when both halves are dropped
        if self.claimed_ports().remove(&self.info.name) {
            debug!("Released {}", self.info);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;

    fn usb_port(name: &str, pid: u16, product: Option<&str>) -> SerialPortInfo {
        SerialPortInfo {
            port_name: name.to_string(),
            port_type: SerialPortType::UsbPort(UsbPortInfo {
                vid: VEX_VID,
                pid,
                serial_number: None,
                manufacturer: None,
                product: product.map(str::to_string),
            }),
        }
    }

    #[test]
    fn brains_are_split_by_order() {
        let ports = vec![
            usb_port("/dev/ttyACM0", VEX_V5_BRAIN_PID, None),
            usb_port("/dev/ttyACM1", VEX_V5_BRAIN_PID, None),
            usb_port("/dev/ttyACM2", VEX_V5_CONTROLLER_PID, None),
        ];

        assert_eq!(
            classify_ports(&ports),
            vec![
                VexPortType::System,
                VexPortType::User,
                VexPortType::Controller
            ]
        );
    }

    #[test]
    fn product_names_win_over_order() {
        let ports = vec![
            usb_port("COM4", VEX_V5_BRAIN_PID, Some("VEX V5 User Port")),
            usb_port("COM3", VEX_V5_BRAIN_PID, Some("VEX V5 Communications Port")),
        ];

        assert_eq!(
            classify_ports(&ports),
            vec![VexPortType::User, VexPortType::System]
        );
    }

    #[test]
    fn foreign_ports_are_unknown() {
        let ports = vec![SerialPortInfo {
            port_name: "/dev/ttyS0".to_string(),
            port_type: SerialPortType::Unknown,
        }];

        assert_eq!(classify_ports(&ports), vec![VexPortType::Unknown]);
        assert_eq!(endpoint_info(&ports[0], VexPortType::Unknown).vendor_id, None);
    }
}
