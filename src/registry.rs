use crate::device::Device;
use crate::types::DeviceSnapshot;

/// All matched devices, in registration order.
///
/// Only the monitor thread touches the registry, so it needs no lock.
/// Entries are unique by device node.
#[derive(Default)]
pub struct Registry {
    devices: Vec<Device>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    pub fn find_by_devnode(&self, devnode: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.devnode() == devnode)
    }

    /// Devices reporting this serial, in registration order.
    pub fn find_by_serial<'a>(&'a self, serial: &'a str) -> impl Iterator<Item = &'a Device> + 'a {
        self.devices.iter().filter(move |d| d.serial() == Some(serial))
    }

    /// Append a device and return it for bring-up. An entry already holding
    /// the same node is stopped and dropped first.
    pub fn insert(&mut self, device: Device) -> &mut Device {
        if let Some(stale) = self.remove(device.devnode()) {
            log::warn!("{}: Replacing stale entry for {}", stale.name(), stale.devnode());
        }
        self.devices.push(device);
        let last = self.devices.len() - 1;
        &mut self.devices[last]
    }

    /// Stop the device on `devnode` and take it out of the registry.
    pub fn remove(&mut self, devnode: &str) -> Option<Device> {
        let index = self.devices.iter().position(|d| d.devnode() == devnode)?;
        let mut device = self.devices.remove(index);
        device.stop();
        Some(device)
    }

    pub fn snapshot(&self) -> Vec<DeviceSnapshot> {
        self.devices.iter().map(Device::snapshot).collect()
    }

    /// Stop every device in registration order. Entries stay listed.
    pub fn stop_all(&mut self) {
        for device in &mut self.devices {
            if device.has_worker() {
                log::info!("{}: Stopping {}", device.name(), device.devnode());
            }
            device.stop();
        }
    }
}
