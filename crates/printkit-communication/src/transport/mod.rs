//! Transport boundary
//!
//! Defines the byte-oriented duplex channel the controller talks through.
//! The controller never parses port tables or enumerates devices itself; it
//! receives already-validated connection parameters and exchanges raw bytes.

pub mod serial;

use printkit_core::{ConnectionError, Result};

/// Parameters for opening a connection
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    /// Port identifier (e.g. "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Read timeout in milliseconds
    ///
    /// Kept short so the controller's I/O loop can interleave reads with
    /// queue processing.
    pub timeout_ms: u64,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115_200,
            timeout_ms: 10,
        }
    }
}

impl ConnectionParams {
    /// Create parameters for a port at a given baud rate
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            ..Default::default()
        }
    }
}

/// Byte-oriented duplex channel to a device
///
/// Implementations must deliver received bytes in the order they arrived
/// and accept writes without blocking for a device reply. `receive` is a
/// non-blocking drain: no pending data yields an empty buffer, not an
/// error.
pub trait Transport: Send {
    /// Open the channel
    fn open(&mut self, params: &ConnectionParams) -> Result<()>;

    /// Close the channel
    fn close(&mut self) -> Result<()>;

    /// True if the channel is open
    fn is_open(&self) -> bool;

    /// Write raw bytes to the device
    fn send(&mut self, data: &[u8]) -> Result<usize>;

    /// Drain any bytes the device has sent since the last call
    fn receive(&mut self) -> Result<Vec<u8>>;

    /// The identifier of the connected port, if open
    fn port_name(&self) -> Option<&str>;
}

/// A transport that goes nowhere
///
/// Placeholder used before a real connection exists.
#[derive(Debug, Default)]
pub struct NoOpTransport {
    open: bool,
}

impl NoOpTransport {
    /// Create a new no-op transport
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for NoOpTransport {
    fn open(&mut self, _params: &ConnectionParams) -> Result<()> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn send(&mut self, data: &[u8]) -> Result<usize> {
        if !self.open {
            return Err(ConnectionError::NotConnected.into());
        }
        Ok(data.len())
    }

    fn receive(&mut self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn port_name(&self) -> Option<&str> {
        None
    }
}
