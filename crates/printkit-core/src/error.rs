//! Error handling for PrintKit
//!
//! Provides error types for all layers of the library:
//! - Controller errors (state machine / operation misuse)
//! - Connection errors (serial communication)
//! - Firmware errors (plugin lookup and detection)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Controller error type
///
/// Represents errors related to controller operation, primarily
/// operations invoked from a state that does not permit them.
#[derive(Error, Debug, Clone)]
pub enum ControllerError {
    /// Operation is not valid in the current state
    #[error("Cannot {operation} while {current}")]
    InvalidState {
        /// The current state name.
        current: String,
        /// The operation that was attempted.
        operation: String,
    },

    /// No print job is active
    #[error("No active print job")]
    NoActiveJob,

    /// Generic controller error
    #[error("Controller error: {message}")]
    Other {
        /// The error message.
        message: String,
    },
}

/// Connection error type
///
/// Represents errors related to communication with the device over
/// the serial transport.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// Failed to open port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Not connected to a device
    #[error("Not connected")]
    NotConnected,

    /// Already connected to a device
    #[error("Already connected to {port}")]
    AlreadyConnected {
        /// The port of the existing connection.
        port: String,
    },

    /// Write to the device failed
    #[error("Write failed: {reason}")]
    WriteFailed {
        /// The reason the write failed.
        reason: String,
    },

    /// Serial port error
    #[error("Serial port error: {reason}")]
    SerialError {
        /// The reason for the serial port error.
        reason: String,
    },

    /// Generic connection error
    #[error("Connection error: {message}")]
    Other {
        /// The error message.
        message: String,
    },
}

/// Firmware error type
///
/// Represents errors specific to firmware plugins and dialect detection.
#[derive(Error, Debug, Clone)]
pub enum FirmwareError {
    /// No plugin with the requested name is registered
    #[error("Unknown firmware plugin: {name}")]
    UnknownPlugin {
        /// The plugin name that was requested.
        name: String,
    },

    /// No firmware plugin is currently loaded
    #[error("No firmware plugin loaded")]
    NoPluginLoaded,

    /// Firmware detection did not match any registered plugin in time
    #[error("Firmware detection timed out after {timeout_ms}ms")]
    DetectionTimeout {
        /// The detection deadline in milliseconds.
        timeout_ms: u64,
    },

    /// Generic firmware error
    #[error("Firmware error: {message}")]
    Other {
        /// The error message.
        message: String,
    },
}

/// Main error type for PrintKit
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Controller error
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Firmware error
    #[error(transparent)]
    Firmware(#[from] FirmwareError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this is a firmware error
    pub fn is_firmware_error(&self) -> bool {
        matches!(self, Error::Firmware(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
