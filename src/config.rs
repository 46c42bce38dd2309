/// HMD bring-up and teardown settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HmdSettings {
    /// Report rate requested at start, in Hz.
    pub report_rate: u16,
    /// Low-power report rate restored on stop, in Hz.
    pub idle_report_rate: u16,
    /// Cycle the IR LEDs through their blink patterns instead of keeping
    /// them lit.
    pub blink: bool,
    pub low_persistence: bool,
    pub pixel_readback: bool,
}

impl Default for HmdSettings {
    fn default() -> Self {
        Self {
            report_rate: 500,
            idle_report_rate: 50,
            blink: true,
            low_persistence: true,
            pixel_readback: true,
        }
    }
}

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub hmd: HmdSettings,
    /// Capacity of the tracker event queue.
    pub tracker_queue: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            hmd: HmdSettings::default(),
            tracker_queue: 1024,
        }
    }
}

impl DaemonConfig {
    /// Read `VRTRACKD_*` variables, falling back to defaults for anything
    /// unset or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let hmd = HmdSettings {
            report_rate: read_u16(&lookup, "VRTRACKD_REPORT_RATE", defaults.hmd.report_rate),
            idle_report_rate: read_u16(&lookup, "VRTRACKD_IDLE_REPORT_RATE", defaults.hmd.idle_report_rate),
            blink: read_bool(&lookup, "VRTRACKD_BLINK", defaults.hmd.blink),
            low_persistence: read_bool(&lookup, "VRTRACKD_LOW_PERSISTENCE", defaults.hmd.low_persistence),
            pixel_readback: read_bool(&lookup, "VRTRACKD_PIXEL_READBACK", defaults.hmd.pixel_readback),
        };
        let tracker_queue = read_usize(&lookup, "VRTRACKD_TRACKER_QUEUE", defaults.tracker_queue).max(1);
        Self { hmd, tracker_queue }
    }
}

fn read_bool(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: bool) -> bool {
    lookup(name)
        .and_then(|v| {
            let v = v.trim().to_ascii_lowercase();
            match v.as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => {
                    log::warn!("Ignoring {}={:?}, expected a boolean", name, v);
                    None
                }
            }
        })
        .unwrap_or(default)
}

fn read_u16(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: u16) -> u16 {
    lookup(name)
        .and_then(|v| v.trim().parse::<u16>().ok())
        .unwrap_or(default)
}

fn read_usize(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: usize) -> usize {
    lookup(name)
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> DaemonConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DaemonConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.hmd.report_rate, 500);
        assert_eq!(config.hmd.idle_report_rate, 50);
        assert!(config.hmd.blink);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("VRTRACKD_REPORT_RATE", " 1000 "),
            ("VRTRACKD_BLINK", "off"),
            ("VRTRACKD_PIXEL_READBACK", "No"),
            ("VRTRACKD_TRACKER_QUEUE", "0"),
        ]);
        assert_eq!(config.hmd.report_rate, 1000);
        assert!(!config.hmd.blink);
        assert!(!config.hmd.pixel_readback);
        assert!(config.hmd.low_persistence);
        assert_eq!(config.tracker_queue, 1);
    }

    #[test]
    fn test_garbage_falls_back() {
        let config = config_from(&[("VRTRACKD_REPORT_RATE", "fast"), ("VRTRACKD_BLINK", "maybe")]);
        assert_eq!(config.hmd.report_rate, 500);
        assert!(config.hmd.blink);
    }
}
