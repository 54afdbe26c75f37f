//! Marlin firmware dialect
//!
//! The reference dialect implementation. Marlin acknowledges instructions
//! with `ok`, announces an idle device with `wait`, and reports
//! temperatures as `T:<cur> /<target> B:<cur> /<target>`.

use crate::firmware::{parse_temperature_quad, FirmwarePlugin, ResponseClass};

const ACCEPT_TOKEN: &str = "ok";
const BUSY_TOKEN: &str = "wait";
const EXTRUDER_MARKER: &str = "T:";
const BED_MARKER: &str = "B:";

/// Plugin for the Marlin firmware family
#[derive(Debug, Default)]
pub struct MarlinPlugin;

impl MarlinPlugin {
    /// Create a new Marlin plugin
    pub fn new() -> Self {
        tracing::debug!("Marlin plugin loaded");
        Self
    }
}

impl FirmwarePlugin for MarlinPlugin {
    fn name(&self) -> &str {
        "Marlin"
    }

    fn classify(&self, line: &str) -> ResponseClass {
        let line = line.trim();

        // A well-formed temperature quad wins; a line whose temperature
        // payload is malformed still gets the independent readiness check
        // below, so `ok` is never lost to a bad report.
        if line.contains(EXTRUDER_MARKER) || line.contains(BED_MARKER) {
            if let Some(temp) = parse_temperature_quad(line) {
                return ResponseClass::TemperatureReport(temp);
            }
        }

        if line.contains(ACCEPT_TOKEN) {
            ResponseClass::Accepted
        } else if line.contains(BUSY_TOKEN) {
            ResponseClass::Busy
        } else {
            ResponseClass::Unrecognized
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_and_wait_signal_readiness() {
        let plugin = MarlinPlugin::new();
        assert_eq!(plugin.classify("ok"), ResponseClass::Accepted);
        assert_eq!(plugin.classify("wait"), ResponseClass::Busy);
        assert!(plugin.classify("ok").is_ready());
        assert!(plugin.classify("wait").is_ready());
    }

    #[test]
    fn temperature_report_parses() {
        let plugin = MarlinPlugin::new();
        match plugin.classify("T:185.4 /185.0 B:60.5 /60.0") {
            ResponseClass::TemperatureReport(temp) => {
                assert_eq!(temp.extruder, 185.4);
                assert_eq!(temp.extruder_target, 185.0);
                assert_eq!(temp.bed, 60.5);
                assert_eq!(temp.bed_target, 60.0);
            }
            other => panic!("expected temperature report, got {:?}", other),
        }
    }

    #[test]
    fn temperature_report_is_not_readiness() {
        let plugin = MarlinPlugin::new();
        assert!(!plugin.classify("T:185.4 /185.0 B:60.5 /60.0").is_ready());
    }

    #[test]
    fn malformed_temperature_is_unrecognized() {
        let plugin = MarlinPlugin::new();
        assert_eq!(
            plugin.classify("T:185.4 B:60.5"),
            ResponseClass::Unrecognized
        );
    }

    #[test]
    fn ok_prefixed_report_still_signals_readiness() {
        // Five tokens, so the positional quad parse fails; the accept
        // token check is independent and must not be lost.
        let plugin = MarlinPlugin::new();
        assert_eq!(
            plugin.classify("ok T:185.4 /185.0 B:60.5 /60.0"),
            ResponseClass::Accepted
        );
    }

    #[test]
    fn unknown_lines_are_unrecognized() {
        let plugin = MarlinPlugin::new();
        assert_eq!(plugin.classify("echo:busy"), ResponseClass::Unrecognized);
        assert_eq!(plugin.classify(""), ResponseClass::Unrecognized);
    }

    #[test]
    fn translate_appends_line_terminator() {
        let plugin = MarlinPlugin::new();
        assert_eq!(plugin.translate("M105"), b"M105\n");
    }
}
