//! Hot-plug add/remove handling.
//!
//! Turns matched device nodes into running [`Device`]s, pairs an HMD with
//! its tracking camera through the serial number, and tears devices down
//! again on removal. Runs on the monitor thread only.

use crate::config::DaemonConfig;
use crate::device::{Device, DriverContext};
use crate::matcher::{find_signature, DeviceSignature, UsbIdentity};
use crate::registry::Registry;
use crate::tracker::TrackerFactory;
use crate::types::DeviceKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    Add(UsbIdentity),
    Remove { devnode: String },
}

/// True for an HMD and a camera, in either order.
fn is_tracking_pair(a: DeviceKind, b: DeviceKind) -> bool {
    matches!(
        (a, b),
        (DeviceKind::Hmd, DeviceKind::Camera) | (DeviceKind::Camera, DeviceKind::Hmd)
    )
}

pub struct Hotplug {
    registry: Registry,
    signatures: &'static [DeviceSignature],
    tracker_factory: TrackerFactory,
    config: DaemonConfig,
}

impl Hotplug {
    pub fn new(signatures: &'static [DeviceSignature], tracker_factory: TrackerFactory, config: DaemonConfig) -> Self {
        Self {
            registry: Registry::new(),
            signatures,
            tracker_factory,
            config,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn handle(&mut self, event: HotplugEvent) {
        match event {
            HotplugEvent::Add(identity) => self.handle_add(&identity),
            HotplugEvent::Remove { devnode } => self.handle_remove(&devnode),
        }
    }

    /// Match, construct, correlate and start a newly seen device node.
    pub fn handle_add(&mut self, identity: &UsbIdentity) {
        let signature = match find_signature(self.signatures, identity) {
            Some(s) => s,
            None => {
                log::trace!(
                    "No driver for {:04x}:{:04x} {} interface {}",
                    identity.vendor_id,
                    identity.product_id,
                    identity.subsystem,
                    identity.interface
                );
                return;
            }
        };
        log::info!("{}: Found {} at {}", signature.name, signature.kind, identity.devnode);

        let ctx = DriverContext {
            devnode: &identity.devnode,
            tracker: (self.tracker_factory)(),
            config: &self.config,
        };
        let driver = match (signature.constructor)(&ctx) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("{}: Failed to create device for {}: {}", signature.name, identity.devnode, e);
                return;
            }
        };
        let mut device = Device::new(driver, &identity.devnode, signature.name, identity.serial.as_deref());

        if let Some(serial) = device.serial().map(str::to_string) {
            let kind = device.kind();
            let partner = self
                .registry
                .find_by_serial(&serial)
                .find(|d| d.devnode() != identity.devnode && is_tracking_pair(d.kind(), kind));
            if let Some(partner) = partner {
                if let Some(tracker) = partner.tracker() {
                    log::info!(
                        "{}: Sharing tracker with {} {} (serial {})",
                        device.name(),
                        partner.name(),
                        partner.devnode(),
                        serial
                    );
                    device.set_tracker(tracker);
                }
            }
        }

        let device = self.registry.insert(device);
        match device.start() {
            Ok(()) => log::info!("{}: Started {}", device.name(), device.devnode()),
            Err(e) if e.is_malformed() => {
                log::warn!("{}: Malformed data from {}, not starting: {}", device.name(), device.devnode(), e)
            }
            Err(e) => log::warn!("{}: Failed to start {}: {}", device.name(), device.devnode(), e),
        }
        log::debug!("Devices: {:?}", self.registry.snapshot());
    }

    /// Stop and forget the device on `devnode`, if any.
    pub fn handle_remove(&mut self, devnode: &str) {
        if let Some(device) = self.registry.remove(devnode) {
            log::info!("{}: Removed {}", device.name(), devnode);
            log::debug!("Devices: {:?}", self.registry.snapshot());
        }
    }

    /// Stop every device, in registration order.
    pub fn stop_all(&mut self) {
        self.registry.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::ScriptedDriver;
    use crate::device::{Driver, DeviceState};
    use crate::tracker::tests::RecordingTracker;
    use crate::tracker::TrackerHandle;
    use crate::{DaemonError, Result};
    use std::cell::RefCell;
    use std::sync::{Arc, Mutex};

    type Events = Arc<Mutex<Vec<&'static str>>>;

    thread_local! {
        /// Event logs of the HMD drivers built on this test thread.
        static HMD_EVENTS: RefCell<Vec<Events>> = const { RefCell::new(Vec::new()) };
    }

    fn scripted_hmd(ctx: &DriverContext<'_>) -> Result<Box<dyn Driver>> {
        let mut driver = ScriptedDriver::new(DeviceKind::Hmd);
        driver.tracker = ctx.tracker.clone();
        HMD_EVENTS.with(|all| all.borrow_mut().push(driver.events.clone()));
        Ok(Box::new(driver))
    }

    fn last_hmd_events() -> Vec<&'static str> {
        HMD_EVENTS.with(|all| all.borrow().last().map(|e| e.lock().unwrap().clone()).unwrap_or_default())
    }

    fn scripted_camera(ctx: &DriverContext<'_>) -> Result<Box<dyn Driver>> {
        let mut driver = ScriptedDriver::new(DeviceKind::Camera);
        driver.tracker = ctx.tracker.clone();
        Ok(Box::new(driver))
    }

    fn failing_start(ctx: &DriverContext<'_>) -> Result<Box<dyn Driver>> {
        let mut driver = ScriptedDriver::new(DeviceKind::Hmd);
        driver.tracker = ctx.tracker.clone();
        driver.fail_start = true;
        Ok(Box::new(driver))
    }

    fn no_device(_ctx: &DriverContext<'_>) -> Result<Box<dyn Driver>> {
        Err(DaemonError::Transport("gone".into()))
    }

    static TEST_SIGNATURES: &[DeviceSignature] = &[
        DeviceSignature {
            vendor_id: 0x2833,
            product_id: 0x0021,
            subsystem: "hidraw",
            interface: 0,
            name: "Rift DK2",
            kind: DeviceKind::Hmd,
            constructor: scripted_hmd,
        },
        DeviceSignature {
            vendor_id: 0x2833,
            product_id: 0x0201,
            subsystem: "video4linux",
            interface: 0,
            name: "Camera DK2",
            kind: DeviceKind::Camera,
            constructor: scripted_camera,
        },
        DeviceSignature {
            vendor_id: 0x2833,
            product_id: 0x0bad,
            subsystem: "hidraw",
            interface: 0,
            name: "Broken",
            kind: DeviceKind::Hmd,
            constructor: failing_start,
        },
        DeviceSignature {
            vendor_id: 0x2833,
            product_id: 0x0000,
            subsystem: "hidraw",
            interface: 0,
            name: "Vanishing",
            kind: DeviceKind::Hmd,
            constructor: no_device,
        },
    ];

    fn hotplug() -> Hotplug {
        let factory: TrackerFactory = Arc::new(|| TrackerHandle::new(RecordingTracker::default()));
        Hotplug::new(TEST_SIGNATURES, factory, DaemonConfig::default())
    }

    fn identity(subsystem: &str, product_id: u16, devnode: &str, serial: Option<&str>) -> UsbIdentity {
        UsbIdentity {
            subsystem: subsystem.to_string(),
            vendor_id: 0x2833,
            product_id,
            interface: 0,
            devnode: devnode.to_string(),
            serial: serial.map(str::to_string),
        }
    }

    fn hmd(serial: Option<&str>) -> UsbIdentity {
        identity("hidraw", 0x0021, "/dev/hidraw0", serial)
    }

    fn camera(serial: Option<&str>) -> UsbIdentity {
        identity("video4linux", 0x0201, "/dev/video0", serial)
    }

    fn shares_tracker(hotplug: &Hotplug, a: &str, b: &str) -> bool {
        let registry = hotplug.registry();
        let a = registry.find_by_devnode(a).unwrap().tracker().unwrap();
        let b = registry.find_by_devnode(b).unwrap().tracker().unwrap();
        a.same_as(&b)
    }

    #[test]
    fn test_pairs_hmd_then_camera() {
        let mut hotplug = hotplug();
        hotplug.handle_add(&hmd(Some("WMHD301")));
        hotplug.handle_add(&camera(Some("WMHD301")));
        assert!(shares_tracker(&hotplug, "/dev/hidraw0", "/dev/video0"));
        hotplug.stop_all();
    }

    #[test]
    fn test_pairs_camera_then_hmd() {
        let mut hotplug = hotplug();
        hotplug.handle_add(&camera(Some("WMHD301")));
        hotplug.handle_add(&hmd(Some("WMHD301")));
        assert!(shares_tracker(&hotplug, "/dev/hidraw0", "/dev/video0"));
        hotplug.stop_all();
    }

    #[test]
    fn test_no_pairing_without_matching_serial() {
        let mut hotplug = hotplug();
        hotplug.handle_add(&hmd(Some("WMHD301")));
        hotplug.handle_add(&camera(Some("WMHD999")));
        assert!(!shares_tracker(&hotplug, "/dev/hidraw0", "/dev/video0"));

        let mut hotplug = self::hotplug();
        hotplug.handle_add(&hmd(None));
        hotplug.handle_add(&camera(None));
        assert!(!shares_tracker(&hotplug, "/dev/hidraw0", "/dev/video0"));
    }

    #[test]
    fn test_no_pairing_between_same_kinds() {
        let mut hotplug = hotplug();
        hotplug.handle_add(&hmd(Some("SN")));
        hotplug.handle_add(&identity("hidraw", 0x0021, "/dev/hidraw1", Some("SN")));
        assert!(!shares_tracker(&hotplug, "/dev/hidraw0", "/dev/hidraw1"));
    }

    #[test]
    fn test_add_then_remove() {
        let mut hotplug = hotplug();
        hotplug.handle(HotplugEvent::Add(hmd(Some("WMHD301"))));
        {
            let device = hotplug.registry().find_by_devnode("/dev/hidraw0").unwrap();
            assert!(device.is_active());
            assert!(device.has_worker());
            assert_eq!(device.name(), "Rift DK2");
            assert_eq!(device.serial(), Some("WMHD301"));
        }

        hotplug.handle(HotplugEvent::Remove {
            devnode: "/dev/hidraw0".to_string(),
        });
        assert!(hotplug.registry().is_empty());
        assert_eq!(last_hmd_events().last(), Some(&"close"));

        // Unknown node is a no-op.
        hotplug.handle_remove("/dev/hidraw0");
    }

    #[test]
    fn test_unmatched_event_ignored() {
        let mut hotplug = hotplug();
        hotplug.handle_add(&identity("hidraw", 0x1234, "/dev/hidraw5", None));
        let mut other_interface = hmd(None);
        other_interface.interface = 1;
        hotplug.handle_add(&other_interface);
        assert!(hotplug.registry().is_empty());
    }

    #[test]
    fn test_failed_start_stays_listed() {
        let mut hotplug = hotplug();
        hotplug.handle_add(&identity("hidraw", 0x0bad, "/dev/hidraw2", None));

        let device = hotplug.registry().find_by_devnode("/dev/hidraw2").unwrap();
        assert_eq!(device.state(), DeviceState::Failed);
        assert!(!device.is_active());
        assert!(!device.has_worker());
        assert!(!hotplug.registry().snapshot()[0].active);

        hotplug.handle_remove("/dev/hidraw2");
        assert!(hotplug.registry().is_empty());
    }

    #[test]
    fn test_constructor_failure_drops_event() {
        let mut hotplug = hotplug();
        hotplug.handle_add(&identity("hidraw", 0x0000, "/dev/hidraw3", None));
        assert!(hotplug.registry().is_empty());
    }

    #[test]
    fn test_repeated_add_replaces_entry() {
        let mut hotplug = hotplug();
        hotplug.handle_add(&hmd(Some("WMHD301")));
        let first = HMD_EVENTS.with(|all| all.borrow().last().cloned()).unwrap();
        hotplug.handle_add(&hmd(Some("WMHD301")));
        assert_eq!(first.lock().unwrap().last(), Some(&"close"));
        assert_eq!(hotplug.registry().len(), 1);
        assert!(hotplug.registry().find_by_devnode("/dev/hidraw0").unwrap().is_active());
    }
}
