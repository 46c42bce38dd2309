/// Errors raised while bringing up, running or monitoring tracking devices.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("HID error: {0}")]
    Hid(#[from] hidapi::HidError),

    #[error("Transport failed: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Short report 0x{id:02x}: expected {expected} bytes, got {got}")]
    ShortReport { id: u8, expected: usize, got: usize },

    #[error("Unexpected report id: expected 0x{expected:02x}, got 0x{got:02x}")]
    UnexpectedReportId { expected: u8, got: u8 },

    #[error("Record index {index} out of range for {count} records")]
    RecordIndex { index: u16, count: u16 },

    #[error("Device reports {count} records, at most {max} supported")]
    TooManyRecords { count: u16, max: usize },

    #[error("Invalid LED blink pattern 0x{0:05x}")]
    InvalidPattern(u32),

    #[error("Unexpected LED pattern length {0}")]
    PatternLength(u8),

    #[error("Unknown position record type {0}")]
    UnknownRecordType(u16),

    #[error("Invalid sensor configuration: {0}")]
    InvalidConfig(String),

    #[error("Device node not open")]
    NotOpen,

    #[error("Failed to spawn worker thread: {0}")]
    ThreadSpawn(String),

    #[error("Hotplug monitor failed: {0}")]
    Monitor(String),

    #[error("Signal handling failed: {0}")]
    Signal(#[from] nix::Error),
}

impl DaemonError {
    /// True for errors caused by malformed device data rather than the transport.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            DaemonError::ShortReport { .. }
                | DaemonError::UnexpectedReportId { .. }
                | DaemonError::RecordIndex { .. }
                | DaemonError::TooManyRecords { .. }
                | DaemonError::InvalidPattern(_)
                | DaemonError::PatternLength(_)
                | DaemonError::UnknownRecordType(_)
                | DaemonError::InvalidConfig(_)
        )
    }
}
