/// One decoded IMU sample in physical units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuSample {
    /// Device clock in microseconds. Wraps every ~72 minutes.
    pub timestamp_us: u32,
    /// Sensor temperature in °C.
    pub temperature: f64,
    /// Acceleration [x, y, z] in m/s².
    pub acceleration: [f64; 3],
    /// Angular velocity [x, y, z] in rad/s.
    pub angular_velocity: [f64; 3],
    /// Magnetic field [x, y, z], device units scaled by 10⁻⁴.
    pub magnetic_field: [f64; 3],
}

/// Frame and exposure timing carried by every sensor message.
///
/// Passed to the tracker as-is; the daemon does not interpret it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameTiming {
    /// HDMI input frame count.
    pub frame_count: u16,
    /// HDMI vsync timestamp in microseconds.
    pub frame_timestamp: u32,
    /// Frame id from pixel readback.
    pub frame_id: u8,
    pub led_pattern_phase: u8,
    pub exposure_count: u16,
    pub exposure_timestamp: u16,
}

/// A single IR LED in the HMD's local reference frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Led {
    /// Position in meters.
    pub position: [f64; 3],
    /// Emission direction.
    pub direction: [f64; 3],
    /// 10-bit blink signature, bit i set when the i-th symbol is bright.
    pub pattern: u16,
}

/// Factory calibrated LED constellation of one HMD.
///
/// The local frame has the positive x axis pointing left, y upward and
/// z forward.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedModel {
    pub leds: Vec<Led>,
}

impl LedModel {
    pub fn len(&self) -> usize {
        self.leds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leds.is_empty()
    }
}

/// Device class of a matched node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Hmd,
    Camera,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Hmd => f.write_str("hmd"),
            DeviceKind::Camera => f.write_str("camera"),
        }
    }
}

/// Read-only view of a registered device, for export to other processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub name: String,
    pub serial: Option<String>,
    pub devnode: String,
    pub kind: DeviceKind,
    pub active: bool,
}

bitflags::bitflags! {
    /// Sensor configuration flags (config feature report).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConfigFlags: u8 {
        const USE_CALIBRATION    = 0x04;
        const AUTO_CALIBRATION   = 0x08;
        const SENSOR_COORDINATES = 0x40;
    }
}

bitflags::bitflags! {
    /// IR LED control flags (tracking feature report).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TrackingFlags: u8 {
        const ENABLE         = 0x01;
        const AUTO_INCREMENT = 0x02;
        const USE_CARRIER    = 0x04;
        const SYNC_INPUT     = 0x08;
        const VSYNC_LOCK     = 0x10;
        const CUSTOM_PATTERN = 0x20;
    }
}

bitflags::bitflags! {
    /// Second flag byte of the display feature report.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DisplayFlags: u8 {
        const READ_PIXEL     = 0x04;
        const DIRECT_PENTILE = 0x08;
    }
}
