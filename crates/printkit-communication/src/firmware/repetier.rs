//! Repetier firmware dialect
//!
//! Repetier speaks the same wire vocabulary as Marlin (`ok`, `wait`,
//! `T:`/`B:` temperature quads) but identifies itself by its own name in
//! the firmware-info reply.

use crate::firmware::{parse_temperature_quad, FirmwarePlugin, ResponseClass};

/// Plugin for the Repetier firmware family
#[derive(Debug, Default)]
pub struct RepetierPlugin;

impl RepetierPlugin {
    /// Create a new Repetier plugin
    pub fn new() -> Self {
        tracing::debug!("Repetier plugin loaded");
        Self
    }
}

impl FirmwarePlugin for RepetierPlugin {
    fn name(&self) -> &str {
        "Repetier"
    }

    fn classify(&self, line: &str) -> ResponseClass {
        let line = line.trim();

        if line.contains("T:") || line.contains("B:") {
            if let Some(temp) = parse_temperature_quad(line) {
                return ResponseClass::TemperatureReport(temp);
            }
        }

        if line.contains("ok") {
            ResponseClass::Accepted
        } else if line.contains("wait") {
            ResponseClass::Busy
        } else {
            ResponseClass::Unrecognized
        }
    }
}
