//! # vrtrackd - hot-plug daemon for USB VR tracking peripherals
//!
//! Watches udev for the Rift DK2 HMD and its tracking camera and drives
//! them over hidraw. Provides:
//! - Rift DK2 HID report codec (calibration, LED patterns, IMU messages)
//! - One worker thread per device with cooperative shutdown
//! - Serial number pairing of an HMD with its camera on a shared tracker
//!
//! ## Quick Start
//! ```no_run
//! use vrtrackd::{channel_tracker_factory, DaemonConfig, Hotplug, Monitor, ShutdownSignal, SIGNATURES};
//!
//! let mut shutdown = ShutdownSignal::install().unwrap();
//! let (sender, events) = crossbeam_channel::bounded(1024);
//! let mut hotplug = Hotplug::new(SIGNATURES, channel_tracker_factory(sender), DaemonConfig::from_env());
//!
//! std::thread::spawn(move || {
//!     for event in events {
//!         println!("{:?}", event);
//!     }
//! });
//!
//! Monitor::new().unwrap().run(&mut hotplug, &mut shutdown).unwrap();
//! hotplug.stop_all();
//! ```

pub mod error;
pub mod types;
pub mod protocol;
pub mod hid;
pub mod tracker;
pub mod config;
pub mod device;
pub mod hmd;
pub mod camera;
pub mod matcher;
pub mod registry;
pub mod hotplug;
pub mod monitor;
pub mod shutdown;

pub use error::DaemonError;
pub use types::*;
pub use config::{DaemonConfig, HmdSettings};
pub use device::{Device, DeviceState, Driver};
pub use hotplug::{Hotplug, HotplugEvent};
pub use matcher::{DeviceSignature, UsbIdentity, SIGNATURES};
pub use monitor::Monitor;
pub use shutdown::ShutdownSignal;
pub use tracker::{channel_tracker_factory, Tracker, TrackerEvent, TrackerHandle};

/// Result type alias for daemon operations.
pub type Result<T> = std::result::Result<T, DaemonError>;
