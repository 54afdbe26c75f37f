//! Serial port transport implementation
//!
//! Provides low-level serial port operations for direct hardware connection
//! to 3D printer control boards via USB or RS-232.
//!
//! Supports:
//! - Port enumeration and discovery
//! - Baud rate configuration
//! - Non-blocking reads with a short timeout

use crate::transport::{ConnectionParams, Transport};
use printkit_core::{ConnectionError, Error, Result};
use std::io::{Read, Write};
use std::time::Duration;

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB Serial Port")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// Serial number if available
    pub serial_number: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

impl SerialPortInfo {
    /// Create a new port info
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
            manufacturer: None,
            serial_number: None,
            vid: None,
            pid: None,
        }
    }
}

/// Baud rates a printer port can be opened at
///
/// The set supported by the common 8-bit and 32-bit control boards.
pub fn port_speeds() -> &'static [u32] {
    &[
        9_600, 14_400, 19_200, 28_800, 38_400, 57_600, 76_800, 115_200, 230_400, 250_000, 500_000,
        1_000_000,
    ]
}

/// List available serial ports on the system
///
/// Returns the available ports filtered to device patterns printer boards
/// enumerate as:
/// - Windows: COM* (e.g., COM1, COM3)
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    match serialport::available_ports() {
        Ok(ports) => {
            let port_infos: Vec<SerialPortInfo> = ports
                .iter()
                .filter(|port| is_printer_port(&port.port_name))
                .map(|port| {
                    let mut info = SerialPortInfo::new(&port.port_name, port_description(port));

                    if let serialport::SerialPortType::UsbPort(usb_info) = &port.port_type {
                        info.vid = Some(usb_info.vid);
                        info.pid = Some(usb_info.pid);
                        info.manufacturer = usb_info.manufacturer.clone();
                        info.serial_number = usb_info.serial_number.clone();
                    }
                    info
                })
                .collect();

            Ok(port_infos)
        }
        Err(e) => {
            tracing::error!("Failed to enumerate serial ports: {}", e);
            Err(Error::other(format!("Failed to enumerate ports: {}", e)))
        }
    }
}

/// Check if a port name matches printer board patterns
fn is_printer_port(port_name: &str) -> bool {
    // Windows COM ports
    if port_name.starts_with("COM") && port_name[3..].chars().all(|c| c.is_ascii_digit()) {
        return true;
    }

    // Linux USB and ACM devices
    if port_name.starts_with("/dev/ttyUSB") || port_name.starts_with("/dev/ttyACM") {
        return true;
    }

    // macOS serial and modem devices
    if port_name.starts_with("/dev/cu.usbserial-") || port_name.starts_with("/dev/cu.usbmodem") {
        return true;
    }

    false
}

/// Get a user-friendly description for a port
fn port_description(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb_info) => {
            format!(
                "USB {} {}",
                usb_info.manufacturer.as_deref().unwrap_or("Device"),
                usb_info.product.as_deref().unwrap_or("Serial Port")
            )
        }
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

/// Trait for serial port I/O operations
pub trait ReadWrite: Read + Write + Send {}
impl<T: Read + Write + Send> ReadWrite for T {}

/// Serial transport backed by the `serialport` crate
///
/// Reads use a short timeout so the controller's I/O loop never parks on a
/// silent device; a timed-out read yields an empty buffer.
pub struct SerialTransport {
    port: Option<Box<dyn ReadWrite>>,
    port_name: Option<String>,
    read_buf: [u8; 256],
}

impl SerialTransport {
    /// Create a new, unopened serial transport
    pub fn new() -> Self {
        Self {
            port: None,
            port_name: None,
            read_buf: [0u8; 256],
        }
    }
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SerialTransport {
    fn open(&mut self, params: &ConnectionParams) -> Result<()> {
        if self.port.is_some() {
            return Err(ConnectionError::AlreadyConnected {
                port: self.port_name.clone().unwrap_or_default(),
            }
            .into());
        }

        let builder = serialport::new(&params.port, params.baud_rate)
            .timeout(Duration::from_millis(params.timeout_ms))
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None);

        match builder.open_native() {
            Ok(port) => {
                self.port = Some(Box::new(port));
                self.port_name = Some(params.port.clone());
                tracing::debug!("Opened serial port {} @ {}", params.port, params.baud_rate);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Failed to open serial port {}: {}", params.port, e);
                Err(ConnectionError::FailedToOpen {
                    port: params.port.clone(),
                    reason: e.to_string(),
                }
                .into())
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.port = None;
        self.port_name = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn send(&mut self, data: &[u8]) -> Result<usize> {
        let port = self
            .port
            .as_mut()
            .ok_or(Error::Connection(ConnectionError::NotConnected))?;

        port.write_all(data).map_err(|e| {
            Error::Connection(ConnectionError::WriteFailed {
                reason: e.to_string(),
            })
        })?;
        Ok(data.len())
    }

    fn receive(&mut self) -> Result<Vec<u8>> {
        let port = self
            .port
            .as_mut()
            .ok_or(Error::Connection(ConnectionError::NotConnected))?;

        match port.read(&mut self.read_buf) {
            Ok(n) => Ok(self.read_buf[..n].to_vec()),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(e) => Err(Error::Connection(ConnectionError::SerialError {
                reason: e.to_string(),
            })),
        }
    }

    fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }
}
