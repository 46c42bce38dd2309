use crate::config::DaemonConfig;
use crate::tracker::TrackerHandle;
use crate::types::{DeviceKind, DeviceSnapshot};
use crate::{DaemonError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Poll timeout of device workers. Bounds how long `stop()` waits for a
/// worker to notice its cleared active flag.
pub const POLL_TIMEOUT_MS: i32 = 1000;

/// Cooperative cancellation flag shared between a device and its worker.
#[derive(Debug, Clone, Default)]
pub struct ActiveFlag(Arc<AtomicBool>);

impl ActiveFlag {
    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, active: bool) {
        self.0.store(active, Ordering::Release);
    }
}

/// Everything a driver constructor gets to build a device instance.
pub struct DriverContext<'a> {
    pub devnode: &'a str,
    pub tracker: TrackerHandle,
    pub config: &'a DaemonConfig,
}

/// Builds a driver for a matched device node.
pub type Constructor = fn(&DriverContext<'_>) -> Result<Box<dyn Driver>>;

/// The capability set every device class implements.
///
/// `start` and `stop` run on the monitor thread, `run` on the device's own
/// worker thread. The driver moves into the worker for the duration of
/// `run` and comes back when the worker is joined, so the three never
/// overlap.
pub trait Driver: Send + 'static {
    fn kind(&self) -> DeviceKind;

    /// Name reported by the device itself, if any.
    fn name(&self) -> Option<&str> {
        None
    }

    /// Serial reported by the device itself, if any.
    fn serial(&self) -> Option<&str> {
        None
    }

    /// Open the device node.
    fn open(&mut self) -> Result<()>;
    fn is_open(&self) -> bool;
    /// Release the device node.
    fn close(&mut self);

    /// Device specific bring-up. On error the lifecycle closes the node.
    fn start(&mut self) -> Result<()>;

    /// Worker loop body. Must return soon after `active` reads false.
    fn run(&mut self, active: &ActiveFlag);

    /// Device specific teardown, after the worker has exited.
    fn stop(&mut self);

    fn tracker(&self) -> Option<TrackerHandle>;
    fn set_tracker(&mut self, tracker: TrackerHandle);
}

/// Lifecycle state of a [`Device`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Created,
    Running,
    /// Bring-up failed; the node is closed and no worker exists.
    Failed,
    Stopped,
}

/// A matched device node with its driver and worker thread.
pub struct Device {
    name: String,
    serial: Option<String>,
    devnode: String,
    kind: DeviceKind,
    state: DeviceState,
    active: ActiveFlag,
    tracker: Option<TrackerHandle>,
    /// None while the worker owns the driver.
    driver: Option<Box<dyn Driver>>,
    worker: Option<JoinHandle<Box<dyn Driver>>>,
}

impl Device {
    /// Wrap a freshly constructed driver. Name and serial reported by the
    /// driver take precedence over the ones from the signature table and
    /// sysfs.
    pub fn new(driver: Box<dyn Driver>, devnode: &str, name: &str, serial: Option<&str>) -> Self {
        let name = driver.name().unwrap_or(name).to_string();
        let serial = driver.serial().or(serial).map(str::to_string);
        Self {
            name,
            serial,
            devnode: devnode.to_string(),
            kind: driver.kind(),
            state: DeviceState::Created,
            active: ActiveFlag::default(),
            tracker: driver.tracker(),
            driver: Some(driver),
            worker: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    pub fn devnode(&self) -> &str {
        &self.devnode
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.active.is_active()
    }

    /// True while a worker thread exists for this device.
    pub fn has_worker(&self) -> bool {
        self.worker.is_some()
    }

    pub fn tracker(&self) -> Option<TrackerHandle> {
        self.tracker.clone()
    }

    /// Replace the tracker handle. Only possible before start.
    pub fn set_tracker(&mut self, tracker: TrackerHandle) -> bool {
        match self.driver.as_mut() {
            Some(driver) if self.state == DeviceState::Created => {
                driver.set_tracker(tracker.clone());
                self.tracker = Some(tracker);
                true
            }
            _ => false,
        }
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            name: self.name.clone(),
            serial: self.serial.clone(),
            devnode: self.devnode.clone(),
            kind: self.kind,
            active: self.is_active(),
        }
    }

    /// Open the node, run the driver's bring-up and spawn the worker.
    ///
    /// On failure the node is closed again and no worker is left behind.
    pub fn start(&mut self) -> Result<()> {
        if self.state == DeviceState::Running {
            return Ok(());
        }
        let mut driver = self.driver.take().ok_or(DaemonError::NotOpen)?;

        let bring_up = if driver.is_open() {
            driver.start()
        } else {
            driver.open().and_then(|_| driver.start())
        };
        if let Err(e) = bring_up {
            driver.close();
            self.driver = Some(driver);
            self.state = DeviceState::Failed;
            return Err(e);
        }

        self.active.set(true);
        let active = self.active.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("vrtrackd-{}", self.kind))
            .spawn(move || {
                driver.run(&active);
                active.set(false);
                driver
            });

        match spawned {
            Ok(worker) => {
                log::debug!("{}: Worker started for {}", self.name, self.devnode);
                self.worker = Some(worker);
                self.state = DeviceState::Running;
                Ok(())
            }
            Err(e) => {
                // The closure and the driver in it are gone; dropping the
                // driver closed the node.
                self.active.set(false);
                self.state = DeviceState::Failed;
                Err(DaemonError::ThreadSpawn(e.to_string()))
            }
        }
    }

    /// Clear the active flag, join the worker, run teardown and close the
    /// node. Blocks for at most one poll timeout plus teardown.
    pub fn stop(&mut self) {
        self.active.set(false);

        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(driver) => self.driver = Some(driver),
                Err(_) => log::error!("{}: Worker thread panicked", self.name),
            }
            if let Some(driver) = self.driver.as_mut() {
                driver.stop();
            }
            self.state = DeviceState::Stopped;
        }

        if let Some(driver) = self.driver.as_mut() {
            if driver.is_open() {
                driver.close();
            }
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.stop();
    }
}
