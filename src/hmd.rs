//! Rift DK2 head mounted display.
//!
//! Bring-up reads the factory calibrated LED and IMU positions and the LED
//! blink patterns, programs the report rate, enables the tracking LEDs and
//! registers the LED model with the tracker. The worker keeps the sensor
//! alive and forwards decoded IMU samples.

use crate::config::HmdSettings;
use crate::device::{ActiveFlag, Driver, DriverContext, POLL_TIMEOUT_MS};
use crate::hid::{self, HidTransport, ReportTransport};
use crate::protocol::{
    self, ConfigReport, DisplayReport, KeepaliveReport, LedPatternReport, PositionKind,
    PositionReport, SensorMessage, TrackingReport, MAX_LEDS, MAX_POSITIONS, SENSOR_MESSAGE_SIZE,
};
use crate::tracker::TrackerHandle;
use crate::types::{DeviceKind, Led, LedModel, TrackingFlags};
use crate::{DaemonError, Result};
use std::time::Duration;

/// Resend the keepalive after this many seconds worth of reports, one
/// second ahead of the keepalive timeout.
const KEEPALIVE_RESEND_S: u32 = protocol::KEEPALIVE_TIMEOUT_MS as u32 / 1000 - 1;

const READ_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Opens the transport for a device node.
pub type TransportOpener = Box<dyn Fn(&str) -> Result<Box<dyn ReportTransport>> + Send>;

/// Timestamp mismatch between two consecutive sensor messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingDrift {
    pub num_samples: u8,
    pub elapsed_us: u32,
    pub expected_us: u32,
}

/// Stateful sensor message decoder.
///
/// Tracks the device clock across messages to spot dropped or late
/// reports. Drift is reported, never corrected.
#[derive(Debug, Clone)]
pub struct SensorDecoder {
    report_rate: u16,
    report_interval_us: u32,
    last_timestamp: Option<u32>,
}

impl Default for SensorDecoder {
    fn default() -> Self {
        let mut decoder = Self {
            report_rate: 0,
            report_interval_us: 0,
            last_timestamp: None,
        };
        decoder.configure(1000);
        decoder
    }
}

impl SensorDecoder {
    /// Apply a negotiated report rate.
    pub fn configure(&mut self, report_rate: u16) {
        let report_rate = report_rate.max(1);
        self.report_rate = report_rate;
        self.report_interval_us = 1_000_000 / report_rate as u32;
    }

    pub fn report_rate(&self) -> u16 {
        self.report_rate
    }

    pub fn report_interval_us(&self) -> u32 {
        self.report_interval_us
    }

    /// Decode one message and compare its timestamp against the previous
    /// one. The tolerance is 1 µs per sample in the message.
    pub fn decode(&mut self, data: &[u8]) -> Result<(SensorMessage, Option<TimingDrift>)> {
        let message = protocol::parse_sensor_message(data)?;

        let drift = self.last_timestamp.replace(message.timestamp_us).and_then(|last| {
            // The device clock wraps; only the difference is meaningful.
            let elapsed_us = message.timestamp_us.wrapping_sub(last);
            let tolerance = (message.num_samples as u32).max(1);
            if elapsed_us.abs_diff(self.report_interval_us) > tolerance {
                Some(TimingDrift {
                    num_samples: message.num_samples,
                    elapsed_us,
                    expected_us: self.report_interval_us,
                })
            } else {
                None
            }
        });

        Ok((message, drift))
    }
}

/// Rift DK2 HMD driver.
pub struct RiftHmd {
    devnode: String,
    opener: TransportOpener,
    transport: Option<Box<dyn ReportTransport>>,
    tracker: TrackerHandle,
    settings: HmdSettings,
    leds: LedModel,
    /// IMU position in the HMD's local frame, in meters.
    imu_position: [f64; 3],
    decoder: SensorDecoder,
    registered: bool,
}

impl RiftHmd {
    /// Signature table constructor.
    pub fn construct(ctx: &DriverContext<'_>) -> Result<Box<dyn Driver>> {
        Ok(Box::new(Self::new(
            ctx.devnode,
            ctx.tracker.clone(),
            ctx.config.hmd,
            Box::new(HidTransport::open_boxed),
        )))
    }

    pub fn new(devnode: &str, tracker: TrackerHandle, settings: HmdSettings, opener: TransportOpener) -> Self {
        Self {
            devnode: devnode.to_string(),
            opener,
            transport: None,
            tracker,
            settings,
            leds: LedModel::default(),
            imu_position: [0.0; 3],
            decoder: SensorDecoder::default(),
            registered: false,
        }
    }

    /// Choose blinking or steady LEDs for the next start.
    pub fn set_blink(&mut self, blink: bool) {
        self.settings.blink = blink;
    }

    pub fn leds(&self) -> &LedModel {
        &self.leds
    }

    pub fn imu_position(&self) -> [f64; 3] {
        self.imu_position
    }

    pub fn report_rate(&self) -> u16 {
        self.decoder.report_rate()
    }

    pub fn report_interval_us(&self) -> u32 {
        self.decoder.report_interval_us()
    }

    fn transport(&self) -> Result<&dyn ReportTransport> {
        self.transport.as_deref().ok_or(DaemonError::NotOpen)
    }

    /// Read the current sensor configuration.
    fn read_config(&mut self) -> Result<()> {
        let config: ConfigReport = hid::get(self.transport()?)?;
        let report_rate = config.report_rate()?;
        log::info!(
            "Rift DK2: Got sample rate {} Hz, report rate {} Hz, flags: {:?}",
            config.sample_rate,
            report_rate,
            config.flags
        );
        self.decoder.configure(report_rate);
        Ok(())
    }

    /// Program the report rate and remember the rate actually achieved.
    pub fn set_report_rate(&mut self, requested: u16) -> Result<u16> {
        let transport = self.transport()?;
        let mut config: ConfigReport = hid::get(transport)?;
        let achieved = config.set_report_rate(requested)?;
        log::info!(
            "Rift DK2: Set sample rate {} Hz, report rate {} Hz",
            config.sample_rate,
            achieved
        );
        hid::set(transport, &config)?;
        self.decoder.configure(achieved);
        Ok(achieved)
    }

    fn send_keepalive(transport: &dyn ReportTransport) {
        if let Err(e) = hid::set(transport, &KeepaliveReport::default()) {
            log::warn!("Rift DK2: Keepalive failed: {}", e);
        }
    }

    fn send_display(&self) -> Result<()> {
        let transport = self.transport()?;
        let mut display: DisplayReport = hid::get(transport)?;
        display.configure(self.settings.low_persistence, self.settings.pixel_readback);
        hid::set(transport, &display)
    }

    fn disable_tracking(&self) -> Result<()> {
        let transport = self.transport()?;
        let mut tracking: TrackingReport = hid::get(transport)?;
        tracking.flags.remove(TrackingFlags::ENABLE);
        hid::set(transport, &tracking)
    }

    fn forward(&self, message: &SensorMessage) {
        for sample in &message.samples {
            self.tracker.push_imu_sample(sample);
        }
        self.tracker.push_frame_timing(&message.frame);
    }
}

/// LED and IMU positions from one factory calibration read.
struct Positions {
    leds: Vec<Led>,
    imu: Option<[f64; 3]>,
}

/// Read the factory calibrated positions of all LEDs and the IMU.
///
/// Values are stored with µm accuracy in the HMD's local frame: x points
/// left, y up and z forward.
fn read_positions(transport: &dyn ReportTransport) -> Result<Positions> {
    let records: Vec<PositionReport> = hid::read_records(transport, MAX_POSITIONS)?;

    let mut leds = Vec::new();
    let mut imu = None;
    for record in &records {
        match record.kind()? {
            PositionKind::Led => leds.push((record.index, record.position_m(), record.direction())),
            PositionKind::Imu => imu = Some(record.position_m()),
        }
    }
    if leds.len() > MAX_LEDS {
        return Err(DaemonError::TooManyRecords {
            count: leds.len() as u16,
            max: MAX_LEDS,
        });
    }

    leds.sort_by_key(|(index, _, _)| *index);
    let leds = leds
        .into_iter()
        .map(|(_, position, direction)| Led {
            position,
            direction,
            pattern: 0,
        })
        .collect();
    Ok(Positions { leds, imu })
}

/// Read the blink signatures of all LEDs, ordered by LED index.
fn read_led_patterns(transport: &dyn ReportTransport) -> Result<Vec<u16>> {
    let records: Vec<LedPatternReport> = hid::read_records(transport, MAX_LEDS)?;

    let mut patterns = vec![0u16; records.first().map_or(0, |r| r.num as usize)];
    for record in &records {
        patterns[record.index as usize] = record.signature()?;
    }
    Ok(patterns)
}

impl Driver for RiftHmd {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Hmd
    }

    fn open(&mut self) -> Result<()> {
        if self.transport.is_none() {
            let transport = (self.opener)(&self.devnode).map_err(|e| {
                log::warn!("Rift DK2: Failed to open '{}': {}", self.devnode, e);
                e
            })?;
            self.transport = Some(transport);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    fn close(&mut self) {
        self.transport = None;
    }

    fn start(&mut self) -> Result<()> {
        let transport = self.transport()?;

        let positions = read_positions(transport).map_err(|e| {
            log::warn!("Rift DK2: Error reading factory calibrated positions: {}", e);
            e
        })?;
        let patterns = read_led_patterns(transport).map_err(|e| {
            log::warn!("Rift DK2: Error reading IR LED blinking patterns: {}", e);
            e
        })?;

        if positions.leds.len() != MAX_LEDS {
            log::info!("Rift DK2: Reported {} IR LEDs", positions.leds.len());
        }
        if patterns.len() != positions.leds.len() {
            log::warn!(
                "Rift DK2: {} blink patterns for {} LEDs",
                patterns.len(),
                positions.leds.len()
            );
        }

        let mut leds = positions.leds;
        for (led, pattern) in leds.iter_mut().zip(patterns.iter()) {
            led.pattern = *pattern;
        }

        self.read_config()?;
        self.set_report_rate(self.settings.report_rate)?;
        hid::set(self.transport()?, &TrackingReport::enable(self.settings.blink))?;
        self.send_display()?;

        self.leds = LedModel { leds };
        if let Some(imu) = positions.imu {
            self.imu_position = imu;
        }
        self.tracker.register_leds(&self.leds);
        self.registered = true;
        Ok(())
    }

    fn run(&mut self, active: &ActiveFlag) {
        let transport = match self.transport.as_deref() {
            Some(t) => t,
            None => return,
        };
        let mut buf = [0u8; SENSOR_MESSAGE_SIZE];
        let resend_after = KEEPALIVE_RESEND_S * self.decoder.report_rate() as u32;
        let mut count = 0u32;

        log::info!("Rift DK2: Sending keepalive");
        Self::send_keepalive(transport);

        while active.is_active() {
            match transport.read_timeout(&mut buf, POLL_TIMEOUT_MS) {
                Ok(0) => {
                    log::warn!("Rift DK2: Resending keepalive");
                    Self::send_keepalive(transport);
                    count = 0;
                }
                Err(e) => {
                    log::warn!("Rift DK2: Read error: {}", e);
                    Self::send_keepalive(transport);
                    count = 0;
                    std::thread::sleep(READ_ERROR_BACKOFF);
                }
                Ok(len) if len < SENSOR_MESSAGE_SIZE => {
                    log::warn!("Rift DK2: Error, invalid {}-byte report 0x{:02x}", len, buf[0]);
                }
                Ok(_) => {
                    match self.decoder.decode(&buf) {
                        Ok((message, drift)) => {
                            if let Some(drift) = drift {
                                log::warn!(
                                    "Rift DK2: Got {} samples after {} µs, expected {} µs",
                                    drift.num_samples,
                                    drift.elapsed_us,
                                    drift.expected_us
                                );
                            }
                            log::trace!(
                                "Rift DK2: {} samples at {} µs",
                                message.samples.len(),
                                message.timestamp_us
                            );
                            self.forward(&message);
                        }
                        Err(e) => log::warn!("Rift DK2: Discarding report: {}", e),
                    }

                    count += 1;
                    if count > resend_after {
                        Self::send_keepalive(transport);
                        count = 0;
                    }
                }
            }
        }
    }

    fn stop(&mut self) {
        if self.registered {
            self.tracker.unregister_leds(&self.leds);
            self.registered = false;
        }
        if let Err(e) = self.disable_tracking() {
            log::warn!("Rift DK2: Failed to disable tracking LEDs: {}", e);
        }
        if let Err(e) = self.set_report_rate(self.settings.idle_report_rate) {
            log::warn!("Rift DK2: Failed to restore idle report rate: {}", e);
        }
    }

    fn tracker(&self) -> Option<TrackerHandle> {
        Some(self.tracker.clone())
    }

    fn set_tracker(&mut self, tracker: TrackerHandle) {
        self.tracker = tracker;
    }
}
