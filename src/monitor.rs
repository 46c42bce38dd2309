//! udev enumeration and hot-plug monitoring.
//!
//! Devices already present at start-up are reported as synthetic add
//! events, then the monitor socket is polled together with the shutdown
//! signal until a termination signal arrives.

use crate::hotplug::{Hotplug, HotplugEvent};
use crate::matcher::{parse_hex_u16, UsbIdentity, WATCHED_SUBSYSTEMS};
use crate::shutdown::ShutdownSignal;
use crate::{DaemonError, Result};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::ffi::OsStr;
use std::os::fd::AsFd;

pub struct Monitor {
    socket: udev::MonitorSocket,
}

impl Monitor {
    /// Subscribe to add/remove events of the watched subsystems.
    pub fn new() -> Result<Self> {
        let mut builder = udev::MonitorBuilder::new().map_err(monitor_error("create udev monitor"))?;
        for subsystem in WATCHED_SUBSYSTEMS {
            builder = builder
                .match_subsystem(subsystem)
                .map_err(monitor_error("add udev monitor filter"))?;
        }
        let socket = builder.listen().map_err(monitor_error("enable udev monitor"))?;
        Ok(Self { socket })
    }

    /// Add events for every watched device already present.
    pub fn enumerate(&self) -> Result<Vec<HotplugEvent>> {
        let mut events = Vec::new();
        for subsystem in WATCHED_SUBSYSTEMS {
            let mut enumerator = udev::Enumerator::new().map_err(monitor_error("create udev enumerator"))?;
            enumerator
                .match_subsystem(subsystem)
                .map_err(monitor_error("add udev enumerator filter"))?;
            let devices = enumerator.scan_devices().map_err(monitor_error("scan devices"))?;
            events.extend(devices.filter_map(|device| usb_identity(&device)).map(HotplugEvent::Add));
        }
        Ok(events)
    }

    /// Events queued on the monitor socket. Never blocks.
    pub fn pending(&self) -> Vec<HotplugEvent> {
        self.socket
            .iter()
            .filter_map(|event| match event.event_type() {
                udev::EventType::Add => usb_identity(&event.device()).map(HotplugEvent::Add),
                udev::EventType::Remove => event.devnode().map(|devnode| HotplugEvent::Remove {
                    devnode: devnode.to_string_lossy().into_owned(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Process the initial enumeration, then dispatch hot-plug events until
    /// a termination signal arrives.
    pub fn run(&self, hotplug: &mut Hotplug, shutdown: &mut ShutdownSignal) -> Result<()> {
        for event in self.enumerate()? {
            hotplug.handle(event);
        }

        loop {
            let (monitor_ready, signal_ready) = {
                let mut fds = [
                    PollFd::new(self.socket.as_fd(), PollFlags::POLLIN),
                    PollFd::new(shutdown.as_fd(), PollFlags::POLLIN),
                ];
                match poll(&mut fds, PollTimeout::NONE) {
                    Ok(_) => {}
                    Err(Errno::EINTR) => continue,
                    Err(e) => return Err(e.into()),
                }
                let ready = |fd: &PollFd| fd.revents().is_some_and(|r| r.intersects(PollFlags::POLLIN));
                (ready(&fds[0]), ready(&fds[1]))
            };

            if signal_ready {
                if let Some(signal) = shutdown.pending()? {
                    log::info!("Got {}, shutting down", signal);
                    return Ok(());
                }
            }
            if monitor_ready {
                for event in self.pending() {
                    hotplug.handle(event);
                }
            }
        }
    }
}

fn monitor_error(context: &'static str) -> impl Fn(std::io::Error) -> DaemonError {
    move |e| DaemonError::Monitor(format!("Failed to {}: {}", context, e))
}

fn os_str(value: Option<&OsStr>) -> Option<&str> {
    value.and_then(OsStr::to_str)
}

/// Attributes read along the parent chain of a device node.
#[derive(Debug, Default)]
struct SysfsAttributes<'a> {
    subsystem: Option<&'a str>,
    devnode: Option<String>,
    interface_number: Option<&'a str>,
    vendor_id: Option<&'a str>,
    product_id: Option<&'a str>,
    serial: Option<&'a str>,
}

/// Identity of a device node from its owning USB interface and device.
/// Anything missing along the way yields `None`.
fn usb_identity(device: &udev::Device) -> Option<UsbIdentity> {
    let interface = device
        .parent_with_subsystem_devtype("usb", "usb_interface")
        .ok()
        .flatten();
    let usb_device = interface
        .as_ref()
        .and_then(|i| i.parent_with_subsystem_devtype("usb", "usb_device").ok().flatten());

    let attributes = SysfsAttributes {
        subsystem: os_str(device.subsystem()),
        devnode: device.devnode().map(|p| p.to_string_lossy().into_owned()),
        interface_number: interface.as_ref().and_then(|i| os_str(i.attribute_value("bInterfaceNumber"))),
        vendor_id: usb_device.as_ref().and_then(|d| os_str(d.attribute_value("idVendor"))),
        product_id: usb_device.as_ref().and_then(|d| os_str(d.attribute_value("idProduct"))),
        serial: usb_device.as_ref().and_then(|d| os_str(d.attribute_value("serial"))),
    };
    let identity = identity_from_attributes(attributes);
    if identity.is_none() {
        log::trace!("Skipping {:?}: incomplete USB topology", device.syspath());
    }
    identity
}

fn identity_from_attributes(attributes: SysfsAttributes<'_>) -> Option<UsbIdentity> {
    let interface = parse_hex_u16(attributes.interface_number?)?;
    Some(UsbIdentity {
        subsystem: attributes.subsystem?.to_string(),
        vendor_id: parse_hex_u16(attributes.vendor_id?)?,
        product_id: parse_hex_u16(attributes.product_id?)?,
        interface: u8::try_from(interface).ok()?,
        devnode: attributes.devnode?,
        serial: attributes
            .serial
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    })
}
