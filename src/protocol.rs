use crate::types::{ConfigFlags, DisplayFlags, FrameTiming, ImuSample, TrackingFlags};
use crate::{DaemonError, Result};

// -- USB identifiers --
pub const VID_OCULUSVR: u16 = 0x2833;
pub const PID_RIFT_DK2: u16 = 0x0021;
pub const PID_CAMERA_DK2: u16 = 0x0201;

// -- Feature report ids --
pub const CONFIG_REPORT_ID: u8 = 0x02;
pub const TRACKING_REPORT_ID: u8 = 0x0c;
pub const DISPLAY_REPORT_ID: u8 = 0x0d;
pub const POSITION_REPORT_ID: u8 = 0x0f;
pub const LED_PATTERN_REPORT_ID: u8 = 0x10;
pub const KEEPALIVE_REPORT_ID: u8 = 0x11;

// -- Interrupt reports --
pub const SENSOR_MESSAGE_ID: u8 = 0x0b;
pub const SENSOR_MESSAGE_SIZE: usize = 64;
/// At most two IMU samples fit into one sensor message.
pub const MAX_SAMPLES_PER_MESSAGE: usize = 2;

// -- Limits --
pub const MAX_LEDS: usize = 40;
/// One position record per LED plus one for the IMU.
pub const MAX_POSITIONS: usize = MAX_LEDS + 1;
pub const MIN_REPORT_RATE: u16 = 5;
pub const LED_PATTERN_LENGTH: u8 = 10;

// -- Keepalive --
pub const KEEPALIVE_TYPE: u8 = 0x0b;
pub const KEEPALIVE_TIMEOUT_MS: u16 = 10000;

// -- Tracking LED timing --
pub const TRACKING_EXPOSURE_US: u16 = 350;
pub const TRACKING_PERIOD_US: u16 = 16666;
pub const TRACKING_VSYNC_OFFSET: u16 = 0;
pub const TRACKING_DUTY_CYCLE: u8 = 0x7f;

// -- Fixed-point scales --
/// Positions are transmitted in micrometers.
pub const POSITION_SCALE: f64 = 1e-6;
pub const DIRECTION_SCALE: f64 = 1e-4;
/// Accelerometer (m/s²), gyroscope (rad/s) and magnetometer units.
pub const IMU_SCALE: f64 = 1e-4;
/// Temperature is transmitted in centi-degrees Celsius.
pub const TEMPERATURE_SCALE: f64 = 0.01;

/// A fixed-size feature report addressed by a one-byte report id.
///
/// `decode` expects the full report including the id byte at offset 0,
/// `encode` produces exactly `SIZE` bytes.
pub trait FeatureReport: Sized {
    const ID: u8;
    const SIZE: usize;

    fn decode(buf: &[u8]) -> Result<Self>;
    fn encode(&self) -> Vec<u8>;
}

/// A feature report that is one record of an indexed sequence.
pub trait RecordReport: FeatureReport {
    fn index(&self) -> u16;
    fn count(&self) -> u16;
}

fn check_report(buf: &[u8], id: u8, size: usize) -> Result<()> {
    if buf.len() < size {
        return Err(DaemonError::ShortReport {
            id,
            expected: size,
            got: buf.len(),
        });
    }
    if buf[0] != id {
        return Err(DaemonError::UnexpectedReportId {
            expected: id,
            got: buf[0],
        });
    }
    Ok(())
}

fn le_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn le_i16(buf: &[u8], off: usize) -> i16 {
    i16::from_le_bytes([buf[off], buf[off + 1]])
}

fn le_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn le_i32(buf: &[u8], off: usize) -> i32 {
    i32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn be_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// Sensor sample rate and report rate divisor.
///
/// Layout: id, echo u16, flags u8, packet_interval u8, sample_rate u16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigReport {
    pub echo: u16,
    pub flags: ConfigFlags,
    pub packet_interval: u8,
    pub sample_rate: u16,
}

impl ConfigReport {
    /// Effective report rate: one report every `packet_interval + 1` samples.
    pub fn report_rate(&self) -> Result<u16> {
        if self.sample_rate == 0 {
            return Err(DaemonError::InvalidConfig("sample rate is zero".into()));
        }
        Ok(self.sample_rate / (self.packet_interval as u16 + 1))
    }

    /// Program the divisor for `requested`, clamped to [5, sample_rate].
    ///
    /// The divisor is an integer, so the achieved rate can differ from the
    /// requested one. Returns the achieved rate.
    pub fn set_report_rate(&mut self, requested: u16) -> Result<u16> {
        if self.sample_rate < MIN_REPORT_RATE {
            return Err(DaemonError::InvalidConfig(format!(
                "sample rate {} Hz below minimum report rate",
                self.sample_rate
            )));
        }
        let rate = requested.clamp(MIN_REPORT_RATE, self.sample_rate);
        let interval = (self.sample_rate / rate - 1).min(u8::MAX as u16);
        self.packet_interval = interval as u8;
        self.report_rate()
    }
}

impl FeatureReport for ConfigReport {
    const ID: u8 = CONFIG_REPORT_ID;
    const SIZE: usize = 7;

    fn decode(buf: &[u8]) -> Result<Self> {
        check_report(buf, Self::ID, Self::SIZE)?;
        Ok(ConfigReport {
            echo: le_u16(buf, 1),
            flags: ConfigFlags::from_bits_retain(buf[3]),
            packet_interval: buf[4],
            sample_rate: le_u16(buf, 5),
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.push(Self::ID);
        buf.extend_from_slice(&self.echo.to_le_bytes());
        buf.push(self.flags.bits());
        buf.push(self.packet_interval);
        buf.extend_from_slice(&self.sample_rate.to_le_bytes());
        buf
    }
}

/// What a position record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionKind {
    Led,
    Imu,
}

/// One factory calibrated position (LED or IMU) in µm.
///
/// Layout: id, echo u16, reserved u8, pos i32×3, dir i16×3, reserved u16,
/// index u16, num u16, type u16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionReport {
    pub echo: u16,
    pub position: [i32; 3],
    pub direction: [i16; 3],
    pub index: u16,
    pub num: u16,
    pub record_type: u16,
}

impl PositionReport {
    pub fn kind(&self) -> Result<PositionKind> {
        match self.record_type {
            0 => Ok(PositionKind::Led),
            1 => Ok(PositionKind::Imu),
            other => Err(DaemonError::UnknownRecordType(other)),
        }
    }

    /// Position in meters.
    pub fn position_m(&self) -> [f64; 3] {
        self.position.map(|v| v as f64 * POSITION_SCALE)
    }

    pub fn direction(&self) -> [f64; 3] {
        self.direction.map(|v| v as f64 * DIRECTION_SCALE)
    }
}

impl FeatureReport for PositionReport {
    const ID: u8 = POSITION_REPORT_ID;
    const SIZE: usize = 30;

    fn decode(buf: &[u8]) -> Result<Self> {
        check_report(buf, Self::ID, Self::SIZE)?;
        Ok(PositionReport {
            echo: le_u16(buf, 1),
            position: [le_i32(buf, 4), le_i32(buf, 8), le_i32(buf, 12)],
            direction: [le_i16(buf, 16), le_i16(buf, 18), le_i16(buf, 20)],
            index: le_u16(buf, 24),
            num: le_u16(buf, 26),
            record_type: le_u16(buf, 28),
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.push(Self::ID);
        buf.extend_from_slice(&self.echo.to_le_bytes());
        buf.push(0);
        for p in self.position {
            buf.extend_from_slice(&p.to_le_bytes());
        }
        for d in self.direction {
            buf.extend_from_slice(&d.to_le_bytes());
        }
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(&self.index.to_le_bytes());
        buf.extend_from_slice(&self.num.to_le_bytes());
        buf.extend_from_slice(&self.record_type.to_le_bytes());
        buf
    }
}

impl RecordReport for PositionReport {
    fn index(&self) -> u16 {
        self.index
    }

    fn count(&self) -> u16 {
        self.num
    }
}

/// Blink pattern of one IR LED.
///
/// Layout: id, echo u16, pattern_length u8, pattern u32, index u16, num u16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedPatternReport {
    pub echo: u16,
    pub pattern_length: u8,
    pub pattern: u32,
    pub index: u16,
    pub num: u16,
}

impl LedPatternReport {
    /// Validated 10-bit blink signature of this LED.
    pub fn signature(&self) -> Result<u16> {
        if self.pattern_length != LED_PATTERN_LENGTH {
            return Err(DaemonError::PatternLength(self.pattern_length));
        }
        compress_led_pattern(self.pattern)
    }
}

impl FeatureReport for LedPatternReport {
    const ID: u8 = LED_PATTERN_REPORT_ID;
    const SIZE: usize = 12;

    fn decode(buf: &[u8]) -> Result<Self> {
        check_report(buf, Self::ID, Self::SIZE)?;
        Ok(LedPatternReport {
            echo: le_u16(buf, 1),
            pattern_length: buf[3],
            pattern: le_u32(buf, 4),
            index: le_u16(buf, 8),
            num: le_u16(buf, 10),
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.push(Self::ID);
        buf.extend_from_slice(&self.echo.to_le_bytes());
        buf.push(self.pattern_length);
        buf.extend_from_slice(&self.pattern.to_le_bytes());
        buf.extend_from_slice(&self.index.to_le_bytes());
        buf.extend_from_slice(&self.num.to_le_bytes());
        buf
    }
}

impl RecordReport for LedPatternReport {
    fn index(&self) -> u16 {
        self.index
    }

    fn count(&self) -> u16 {
        self.num
    }
}

/// Keeps the sensor streaming for `timeout_ms`.
///
/// Layout: id, echo u16, type u8, timeout_ms u16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveReport {
    pub echo: u16,
    pub keepalive_type: u8,
    pub timeout_ms: u16,
}

impl Default for KeepaliveReport {
    fn default() -> Self {
        KeepaliveReport {
            echo: 0,
            keepalive_type: KEEPALIVE_TYPE,
            timeout_ms: KEEPALIVE_TIMEOUT_MS,
        }
    }
}

impl FeatureReport for KeepaliveReport {
    const ID: u8 = KEEPALIVE_REPORT_ID;
    const SIZE: usize = 6;

    fn decode(buf: &[u8]) -> Result<Self> {
        check_report(buf, Self::ID, Self::SIZE)?;
        Ok(KeepaliveReport {
            echo: le_u16(buf, 1),
            keepalive_type: buf[3],
            timeout_ms: le_u16(buf, 4),
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.push(Self::ID);
        buf.extend_from_slice(&self.echo.to_le_bytes());
        buf.push(self.keepalive_type);
        buf.extend_from_slice(&self.timeout_ms.to_le_bytes());
        buf
    }
}

/// IR tracking LED control.
///
/// Layout: id, echo u16, pattern u8, flags u8, reserved u8, exposure_us u16,
/// period_us u16, vsync_offset u16, duty_cycle u8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackingReport {
    pub echo: u16,
    pub pattern: u8,
    pub flags: TrackingFlags,
    pub exposure_us: u16,
    pub period_us: u16,
    pub vsync_offset: u16,
    pub duty_cycle: u8,
}

impl TrackingReport {
    /// Enable the LEDs, either cycling through their blink patterns or
    /// permanently lit.
    pub fn enable(blink: bool) -> Self {
        let (pattern, flags) = if blink {
            (
                0,
                TrackingFlags::ENABLE | TrackingFlags::USE_CARRIER | TrackingFlags::AUTO_INCREMENT,
            )
        } else {
            (0xff, TrackingFlags::ENABLE | TrackingFlags::USE_CARRIER)
        };
        TrackingReport {
            echo: 0,
            pattern,
            flags,
            exposure_us: TRACKING_EXPOSURE_US,
            period_us: TRACKING_PERIOD_US,
            vsync_offset: TRACKING_VSYNC_OFFSET,
            duty_cycle: TRACKING_DUTY_CYCLE,
        }
    }
}

impl FeatureReport for TrackingReport {
    const ID: u8 = TRACKING_REPORT_ID;
    const SIZE: usize = 13;

    fn decode(buf: &[u8]) -> Result<Self> {
        check_report(buf, Self::ID, Self::SIZE)?;
        Ok(TrackingReport {
            echo: le_u16(buf, 1),
            pattern: buf[3],
            flags: TrackingFlags::from_bits_retain(buf[4]),
            exposure_us: le_u16(buf, 6),
            period_us: le_u16(buf, 8),
            vsync_offset: le_u16(buf, 10),
            duty_cycle: buf[12],
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.push(Self::ID);
        buf.extend_from_slice(&self.echo.to_le_bytes());
        buf.push(self.pattern);
        buf.push(self.flags.bits());
        buf.push(0);
        buf.extend_from_slice(&self.exposure_us.to_le_bytes());
        buf.extend_from_slice(&self.period_us.to_le_bytes());
        buf.extend_from_slice(&self.vsync_offset.to_le_bytes());
        buf.push(self.duty_cycle);
        buf
    }
}

/// Display timing and pixel readback set-up.
///
/// Layout: id, echo u16, brightness u8, flags1 u8, flags2 u8, unknown u16,
/// persistence u16, lighting_offset u16, pixel_settle u16, total_rows u16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayReport {
    pub echo: u16,
    pub brightness: u8,
    pub flags1: u8,
    pub flags2: DisplayFlags,
    pub unknown_6: u16,
    pub persistence: u16,
    pub lighting_offset: u16,
    pub pixel_settle: u16,
    pub total_rows: u16,
}

impl DisplayReport {
    /// Low persistence lights each row for 18% of the frame at full
    /// brightness. Pixel readback enables latency measurement through the
    /// frame id in sensor messages.
    pub fn configure(&mut self, low_persistence: bool, pixel_readback: bool) {
        if low_persistence {
            self.brightness = 255;
            self.persistence = (self.total_rows as u32 * 18 / 100) as u16;
        } else {
            self.brightness = 0;
            self.persistence = self.total_rows;
        }
        self.flags2.set(DisplayFlags::READ_PIXEL, pixel_readback);
        self.flags2.remove(DisplayFlags::DIRECT_PENTILE);
    }
}

impl FeatureReport for DisplayReport {
    const ID: u8 = DISPLAY_REPORT_ID;
    const SIZE: usize = 16;

    fn decode(buf: &[u8]) -> Result<Self> {
        check_report(buf, Self::ID, Self::SIZE)?;
        Ok(DisplayReport {
            echo: le_u16(buf, 1),
            brightness: buf[3],
            flags1: buf[4],
            flags2: DisplayFlags::from_bits_retain(buf[5]),
            unknown_6: le_u16(buf, 6),
            persistence: le_u16(buf, 8),
            lighting_offset: le_u16(buf, 10),
            pixel_settle: le_u16(buf, 12),
            total_rows: le_u16(buf, 14),
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.push(Self::ID);
        buf.extend_from_slice(&self.echo.to_le_bytes());
        buf.push(self.brightness);
        buf.push(self.flags1);
        buf.push(self.flags2.bits());
        for v in [
            self.unknown_6,
            self.persistence,
            self.lighting_offset,
            self.pixel_settle,
            self.total_rows,
        ] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf
    }
}

/// Validate a 20-bit LED pattern and compress it to a 10-bit signature.
///
/// The wire value holds ten 2-bit symbols, each 0b01 (dark) or 0b11
/// (bright). Bit i of the signature is set when symbol i is bright.
pub fn compress_led_pattern(pattern: u32) -> Result<u16> {
    if (pattern & !0xaaaaa) != 0x55555 {
        return Err(DaemonError::InvalidPattern(pattern));
    }
    let signature = (0..10).fold(0u16, |acc, i| {
        let bright = (pattern >> (2 * i + 1)) & 1;
        acc | ((bright as u16) << i)
    });
    Ok(signature)
}

/// Unpack three big-endian signed 21-bit values from the 8 bytes at
/// `buf[off..off + 8]` and scale them by 10⁻⁴.
///
/// Bit layout of the 64-bit word: x in bits 63..43, y in 42..22,
/// z in 21..1. y straddles the two 32-bit halves.
pub fn unpack_3x21bit(buf: &[u8], off: usize) -> [f64; 3] {
    let xy = be_u32(buf, off);
    let yz = be_u32(buf, off + 4);

    let x = (xy as i32) >> 11;
    let y = (((xy << 21) | (yz >> 11)) as i32) >> 11;
    let z = ((yz << 10) as i32) >> 11;

    [
        x as f64 * IMU_SCALE,
        y as f64 * IMU_SCALE,
        z as f64 * IMU_SCALE,
    ]
}

/// Decoded periodic sensor message.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorMessage {
    /// Number of samples the device claims since the previous message.
    pub num_samples: u8,
    /// Running sample counter.
    pub sample_count: u16,
    pub timestamp_us: u32,
    /// Decoded IMU samples, at most two.
    pub samples: Vec<ImuSample>,
    pub frame: FrameTiming,
}

/// Parse a 64-byte sensor message.
///
/// Layout:
/// - `[0]`: report id 0x0b
/// - `[1..3]`: echo
/// - `[3]`: number of samples since the previous message
/// - `[4..6]`: uint16 LE sample counter
/// - `[6..8]`: int16 LE temperature (10⁻² °C)
/// - `[8..12]`: uint32 LE timestamp (µs)
/// - `[12..44]`: two samples of packed accel/gyro (be64 each)
/// - `[44..50]`: 3x int16 LE magnetic field
/// - `[50..62]`: frame count, frame timestamp, frame id, LED pattern
///   phase, exposure count, exposure timestamp
pub fn parse_sensor_message(data: &[u8]) -> Result<SensorMessage> {
    check_report(data, SENSOR_MESSAGE_ID, SENSOR_MESSAGE_SIZE)?;

    let num_samples = data[3];
    let sample_count = le_u16(data, 4);
    let temperature = le_i16(data, 6) as f64 * TEMPERATURE_SCALE;
    let timestamp_us = le_u32(data, 8);

    let magnetic_field = [le_i16(data, 44), le_i16(data, 46), le_i16(data, 48)]
        .map(|v| v as f64 * IMU_SCALE);

    let frame = FrameTiming {
        frame_count: le_u16(data, 50),
        frame_timestamp: le_u32(data, 52),
        frame_id: data[56],
        led_pattern_phase: data[57],
        exposure_count: le_u16(data, 58),
        exposure_timestamp: le_u16(data, 60),
    };

    let decoded = (num_samples as usize).clamp(1, MAX_SAMPLES_PER_MESSAGE);
    let samples = (0..decoded)
        .map(|i| {
            let off = 12 + 16 * i;
            ImuSample {
                timestamp_us,
                temperature,
                acceleration: unpack_3x21bit(data, off),
                angular_velocity: unpack_3x21bit(data, off + 8),
                magnetic_field,
            }
        })
        .collect();

    Ok(SensorMessage {
        num_samples,
        sample_count,
        timestamp_us,
        samples,
        frame,
    })
}
