//! Device signature table and matching of hot-plug identities against it.

use crate::camera::CameraDk2;
use crate::device::Constructor;
use crate::hmd::RiftHmd;
use crate::protocol::{PID_CAMERA_DK2, PID_RIFT_DK2, VID_OCULUSVR};
use crate::types::DeviceKind;

/// One supported device: where it shows up and how to drive it.
#[derive(Clone, Copy)]
pub struct DeviceSignature {
    pub vendor_id: u16,
    pub product_id: u16,
    pub subsystem: &'static str,
    pub interface: u8,
    pub name: &'static str,
    pub kind: DeviceKind,
    pub constructor: Constructor,
}

impl DeviceSignature {
    pub fn matches(&self, identity: &UsbIdentity) -> bool {
        self.vendor_id == identity.vendor_id
            && self.product_id == identity.product_id
            && self.interface == identity.interface
            && self.subsystem == identity.subsystem
    }
}

impl std::fmt::Debug for DeviceSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSignature")
            .field("vendor_id", &format_args!("{:04x}", self.vendor_id))
            .field("product_id", &format_args!("{:04x}", self.product_id))
            .field("subsystem", &self.subsystem)
            .field("interface", &self.interface)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Supported devices. Extending support means appending an entry.
pub static SIGNATURES: &[DeviceSignature] = &[
    DeviceSignature {
        vendor_id: VID_OCULUSVR,
        product_id: PID_RIFT_DK2,
        subsystem: "hidraw",
        interface: 0,
        name: "Rift DK2",
        kind: DeviceKind::Hmd,
        constructor: RiftHmd::construct,
    },
    DeviceSignature {
        vendor_id: VID_OCULUSVR,
        product_id: PID_CAMERA_DK2,
        subsystem: "video4linux",
        interface: 0,
        name: "Camera DK2",
        kind: DeviceKind::Camera,
        constructor: CameraDk2::construct,
    },
];

/// Subsystems the hot-plug monitor subscribes to.
pub const WATCHED_SUBSYSTEMS: [&str; 2] = ["hidraw", "video4linux"];

/// What a hot-plug event tells us about a device node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbIdentity {
    pub subsystem: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface: u8,
    pub devnode: String,
    pub serial: Option<String>,
}

/// First entry matching on vendor, product, subsystem and interface.
pub fn find_signature<'a>(signatures: &'a [DeviceSignature], identity: &UsbIdentity) -> Option<&'a DeviceSignature> {
    signatures.iter().find(|s| s.matches(identity))
}

/// Parse a sysfs hex attribute such as `idVendor` ("2833") or
/// `bInterfaceNumber` ("00").
pub fn parse_hex_u16(value: &str) -> Option<u16> {
    let value = value.trim();
    let value = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    if value.is_empty() {
        return None;
    }
    u16::from_str_radix(value, 16).ok()
}
