//! G-code command table
//!
//! Provides descriptions and canonical command strings for the G and M
//! codes the controller emits. `to_command` is a pure lookup: a symbolic
//! code plus up to two argument values maps to the literal wire string.
//! Callers are responsible for supplying the values a code requires;
//! omitted values simply leave the corresponding field off the string.

use std::fmt;

/// G commands used by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GCommand {
    /// Rapid move
    G0,
    /// Controlled move
    G1,
    /// Dwell
    G4,
    /// Set units to inches
    G20,
    /// Set units to millimeters
    G21,
    /// Home axes
    G28,
    /// Absolute positioning
    G90,
    /// Relative positioning
    G91,
    /// Set position
    G92,
}

impl fmt::Display for GCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::G0 => write!(f, "G0"),
            Self::G1 => write!(f, "G1"),
            Self::G4 => write!(f, "G4"),
            Self::G20 => write!(f, "G20"),
            Self::G21 => write!(f, "G21"),
            Self::G28 => write!(f, "G28"),
            Self::G90 => write!(f, "G90"),
            Self::G91 => write!(f, "G91"),
            Self::G92 => write!(f, "G92"),
        }
    }
}

impl GCommand {
    /// Short human description of the command
    pub fn description(self) -> &'static str {
        match self {
            Self::G0 => "Rapid move",
            Self::G1 => "Controlled move",
            Self::G4 => "Dwell",
            Self::G20 => "Set units to inches",
            Self::G21 => "Set units to millimeters",
            Self::G28 => "Home axes",
            Self::G90 => "Absolute positioning",
            Self::G91 => "Relative positioning",
            Self::G92 => "Set position",
        }
    }

    /// Build the wire string for this command
    ///
    /// `value1` is appended verbatim after the code (axis words, dwell
    /// time, ...). Codes that take no arguments ignore it.
    pub fn to_command(self, value1: Option<&str>) -> String {
        match self {
            Self::G20 | Self::G21 | Self::G90 | Self::G91 => self.to_string(),
            _ => match value1 {
                Some(arg) if !arg.is_empty() => format!("{} {}", self, arg),
                _ => self.to_string(),
            },
        }
    }
}

/// M commands used by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MCommand {
    /// Stop idle hold
    M84,
    /// Set extruder temperature
    M104,
    /// Get temperature report
    M105,
    /// Fan on
    M106,
    /// Set extruder temperature and wait
    M109,
    /// Emergency stop
    M112,
    /// Get current position
    M114,
    /// Get firmware version and capabilities
    M115,
    /// Display message on LCD
    M117,
    /// Set bed temperature
    M140,
    /// Set bed temperature and wait
    M190,
    /// Set speed factor override percentage
    M220,
    /// Set extrude factor override percentage
    M221,
}

impl fmt::Display for MCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::M84 => write!(f, "M84"),
            Self::M104 => write!(f, "M104"),
            Self::M105 => write!(f, "M105"),
            Self::M106 => write!(f, "M106"),
            Self::M109 => write!(f, "M109"),
            Self::M112 => write!(f, "M112"),
            Self::M114 => write!(f, "M114"),
            Self::M115 => write!(f, "M115"),
            Self::M117 => write!(f, "M117"),
            Self::M140 => write!(f, "M140"),
            Self::M190 => write!(f, "M190"),
            Self::M220 => write!(f, "M220"),
            Self::M221 => write!(f, "M221"),
        }
    }
}

impl MCommand {
    /// Short human description of the command
    pub fn description(self) -> &'static str {
        match self {
            Self::M84 => "Stop idle hold",
            Self::M104 => "Set extruder temperature",
            Self::M105 => "Get temperature report",
            Self::M106 => "Fan on",
            Self::M109 => "Set extruder temperature and wait",
            Self::M112 => "Emergency stop",
            Self::M114 => "Get current position",
            Self::M115 => "Get firmware version",
            Self::M117 => "Display message",
            Self::M140 => "Set bed temperature",
            Self::M190 => "Set bed temperature and wait",
            Self::M220 => "Set speed factor override",
            Self::M221 => "Set extrude factor override",
        }
    }

    /// Build the wire string for this command
    ///
    /// `value1` carries the primary value (temperature, speed, message),
    /// `value2` the secondary selector (extruder index, fan index) where the
    /// code supports one.
    pub fn to_command(self, value1: Option<&str>, value2: Option<&str>) -> String {
        match self {
            Self::M84 => match value1 {
                Some(delay) => format!("M84 S{}", delay),
                None => "M84".to_string(),
            },
            Self::M104 | Self::M109 => match (value1, value2) {
                (Some(temp), Some(extruder)) => format!("{} T{} S{}", self, extruder, temp),
                (Some(temp), None) => format!("{} S{}", self, temp),
                _ => self.to_string(),
            },
            Self::M106 => match (value1, value2) {
                (Some(speed), Some(fan)) => format!("M106 P{} S{}", fan, speed),
                (Some(speed), None) => format!("M106 S{}", speed),
                _ => self.to_string(),
            },
            Self::M117 => match value1 {
                Some(message) => format!("M117 {}", message),
                None => self.to_string(),
            },
            Self::M140 | Self::M190 | Self::M220 | Self::M221 => match value1 {
                Some(value) => format!("{} S{}", self, value),
                None => self.to_string(),
            },
            Self::M105 | Self::M112 | Self::M114 | Self::M115 => self.to_string(),
        }
    }
}
