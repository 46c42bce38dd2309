//! Rift DK2 positional tracking camera.
//!
//! Only the pairing side is handled here: the node is held open so the
//! camera shows up as an active device next to its HMD, and the shared
//! tracker handle lives as long as either of them.

use crate::device::{ActiveFlag, Driver, DriverContext, POLL_TIMEOUT_MS};
use crate::tracker::TrackerHandle;
use crate::types::DeviceKind;
use crate::Result;
use std::fs::{File, OpenOptions};
use std::time::{Duration, Instant};

const IDLE_STEP: Duration = Duration::from_millis(100);

pub struct CameraDk2 {
    devnode: String,
    file: Option<File>,
    tracker: TrackerHandle,
}

impl CameraDk2 {
    /// Signature table constructor.
    pub fn construct(ctx: &DriverContext<'_>) -> Result<Box<dyn Driver>> {
        Ok(Box::new(Self::new(ctx.devnode, ctx.tracker.clone())))
    }

    pub fn new(devnode: &str, tracker: TrackerHandle) -> Self {
        Self {
            devnode: devnode.to_string(),
            file: None,
            tracker,
        }
    }
}

impl Driver for CameraDk2 {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Camera
    }

    fn open(&mut self) -> Result<()> {
        if self.file.is_none() {
            let file = OpenOptions::new().read(true).write(true).open(&self.devnode)?;
            self.file = Some(file);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn close(&mut self) {
        self.file = None;
    }

    fn start(&mut self) -> Result<()> {
        log::debug!("Camera DK2: Holding {}", self.devnode);
        Ok(())
    }

    fn run(&mut self, active: &ActiveFlag) {
        let period = Duration::from_millis(POLL_TIMEOUT_MS as u64);
        let mut last_tick = Instant::now();
        while active.is_active() {
            std::thread::sleep(IDLE_STEP);
            if last_tick.elapsed() >= period {
                log::trace!("Camera DK2: Idle");
                last_tick = Instant::now();
            }
        }
    }

    fn stop(&mut self) {}

    fn tracker(&self) -> Option<TrackerHandle> {
        Some(self.tracker.clone())
    }

    fn set_tracker(&mut self, tracker: TrackerHandle) {
        self.tracker = tracker;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, DeviceState};
    use crate::tracker::tests::RecordingTracker;

    fn scratch_node(name: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("vrtrackd-{}-{}", name, std::process::id()));
        std::fs::write(&path, b"").unwrap();
        path
    }

    #[test]
    fn test_camera_lifecycle() {
        let path = scratch_node("video");
        let camera = CameraDk2::new(path.to_str().unwrap(), TrackerHandle::new(RecordingTracker::default()));
        let mut device = Device::new(Box::new(camera), path.to_str().unwrap(), "Camera DK2", None);

        device.start().unwrap();
        assert_eq!(device.state(), DeviceState::Running);
        assert!(device.is_active());

        let begin = Instant::now();
        device.stop();
        assert!(begin.elapsed() < Duration::from_millis(500));
        assert!(!device.is_active());
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_missing_node_fails_start() {
        let camera = CameraDk2::new("/nonexistent/video0", TrackerHandle::new(RecordingTracker::default()));
        let mut device = Device::new(Box::new(camera), "/nonexistent/video0", "Camera DK2", None);
        assert!(device.start().is_err());
        assert_eq!(device.state(), DeviceState::Failed);
        assert!(!device.has_worker());
    }
}
