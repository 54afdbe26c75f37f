//! Firmware plugin support
//!
//! Each firmware dialect is one implementation of [`FirmwarePlugin`]:
//! it encodes logical commands into wire bytes and classifies received
//! lines. The controller's flow-control logic stays dialect-independent;
//! new dialects are added by providing a new implementation, never by
//! modifying the controller.
//!
//! Supported dialects:
//! - Marlin: the reference implementation
//! - Repetier: shares the Marlin wire vocabulary under its own identity

pub mod marlin;
pub mod repetier;

use printkit_core::Temperature;
use serde::{Deserialize, Serialize};

/// Classification of one received line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseClass {
    /// The device accepted the last instruction and is ready for input
    Accepted,
    /// The device is idle and waiting for input
    Busy,
    /// The line carried a temperature report
    ///
    /// A report does not by itself signal readiness; that requires the
    /// separate accept/busy tokens.
    TemperatureReport(Temperature),
    /// The line matched nothing the dialect knows
    Unrecognized,
}

impl ResponseClass {
    /// True if the device may receive the next command now
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Accepted | Self::Busy)
    }
}

/// Capability contract for a firmware dialect
///
/// `translate` is a pure function of its input; `classify` inspects one
/// received line and must never panic on malformed input; lines it cannot
/// make sense of fail closed as [`ResponseClass::Unrecognized`].
pub trait FirmwarePlugin: Send {
    /// Stable identifier used for plugin lookup and detection matching
    fn name(&self) -> &str;

    /// Encode a logical command into wire bytes, including the line
    /// terminator
    fn translate(&self, command: &str) -> Vec<u8> {
        let mut bytes = command.as_bytes().to_vec();
        bytes.push(b'\n');
        bytes
    }

    /// Classify one received line
    fn classify(&self, line: &str) -> ResponseClass;
}

/// Parse a Marlin-family temperature report
///
/// The report splits on whitespace into exactly four positional tokens:
/// `T:<current>`, `/<target>`, `B:<current>`, `/<target>`. The current
/// tokens drop their two-character marker, the target tokens their leading
/// slash. Any other shape yields `None`.
pub(crate) fn parse_temperature_quad(line: &str) -> Option<Temperature> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() != 4 {
        return None;
    }

    let extruder = tokens[0].get(2..)?.parse().ok()?;
    let extruder_target = tokens[1].strip_prefix('/')?.parse().ok()?;
    let bed = tokens[2].get(2..)?.parse().ok()?;
    let bed_target = tokens[3].strip_prefix('/')?.parse().ok()?;

    Some(Temperature {
        extruder,
        extruder_target,
        bed,
        bed_target,
    })
}

/// Factory producing a boxed plugin instance
pub type PluginFactory = fn() -> Box<dyn FirmwarePlugin>;

/// Registry of known firmware dialects
///
/// Constructed once at controller-creation time and passed in; there is no
/// process-wide discovery. Detection scans received lines for a registered
/// plugin name.
pub struct FirmwareRegistry {
    factories: Vec<(String, PluginFactory)>,
}

impl FirmwareRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    /// Create a registry with all built-in dialects registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(|| Box::new(marlin::MarlinPlugin::new()));
        registry.register(|| Box::new(repetier::RepetierPlugin::new()));
        registry
    }

    /// Register a dialect
    ///
    /// The registered name is taken from the plugin itself, so lookup and
    /// detection always agree with `FirmwarePlugin::name`.
    pub fn register(&mut self, factory: PluginFactory) {
        let name = factory().name().to_string();
        self.factories.retain(|(existing, _)| existing != &name);
        self.factories.push((name, factory));
    }

    /// Names of all registered dialects, in registration order
    pub fn names(&self) -> Vec<String> {
        self.factories.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Create a plugin instance by name (case-insensitive)
    pub fn create(&self, name: &str) -> Option<Box<dyn FirmwarePlugin>> {
        self.factories
            .iter()
            .find(|(registered, _)| registered.eq_ignore_ascii_case(name))
            .map(|(_, factory)| factory())
    }

    /// Find the first registered name that appears in a response line
    ///
    /// Used by the detection handshake: the firmware-info reply contains
    /// the firmware's name somewhere in its text.
    pub fn match_line(&self, line: &str) -> Option<&str> {
        let lowered = line.to_lowercase();
        self.factories
            .iter()
            .find(|(name, _)| lowered.contains(&name.to_lowercase()))
            .map(|(name, _)| name.as_str())
    }
}

impl Default for FirmwareRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
