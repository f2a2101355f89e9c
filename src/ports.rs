//! Serial port enumeration.

use serde::Serialize;
use serialport::{available_ports, SerialPortType};

use crate::error::{AppError, Result};

const UNKNOWN_MANUFACTURER: &str = "Unknown";
const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialPortInfo {
    pub path: String,
    pub manufacturer: String,
    pub serial_number: String,
    pub vendor_id: String,
    pub product_id: String,
}

impl SerialPortInfo {
    fn from_port(port: serialport::SerialPortInfo) -> Self {
        match port.port_type {
            SerialPortType::UsbPort(usb) => Self {
                path: port.port_name,
                manufacturer: usb
                    .manufacturer
                    .unwrap_or_else(|| UNKNOWN_MANUFACTURER.to_string()),
                serial_number: usb
                    .serial_number
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                vendor_id: format!("{:04x}", usb.vid),
                product_id: format!("{:04x}", usb.pid),
            },
            _ => Self {
                path: port.port_name,
                manufacturer: UNKNOWN_MANUFACTURER.to_string(),
                serial_number: NOT_AVAILABLE.to_string(),
                vendor_id: NOT_AVAILABLE.to_string(),
                product_id: NOT_AVAILABLE.to_string(),
            },
        }
    }
}

/// Serial ports currently visible to the host, sorted by path.
pub fn list_serial_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = available_ports()
        .map_err(|e| AppError::io(format!("Failed to list serial ports: {}", e)))?;

    let mut ports: Vec<SerialPortInfo> = ports.into_iter().map(SerialPortInfo::from_port).collect();
    ports.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(ports)
}
