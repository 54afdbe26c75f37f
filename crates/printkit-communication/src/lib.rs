//! # PrintKit Communication
//!
//! Serial communication and firmware support for PrintKit.
//! Provides the transport boundary, firmware plugin implementations for
//! Marlin-family dialects, and the [`Controller`] that drives a print job
//! over a readiness-gated command queue.

pub mod controller;
pub mod firmware;
pub mod transport;

pub use controller::{CommandQueue, Controller, PrintJob, QueuedCommand};
pub use firmware::{
    marlin::MarlinPlugin, repetier::RepetierPlugin, FirmwarePlugin, FirmwareRegistry,
    ResponseClass,
};
pub use transport::{
    serial::{list_ports, port_speeds, SerialPortInfo, SerialTransport},
    ConnectionParams, NoOpTransport, Transport,
};
