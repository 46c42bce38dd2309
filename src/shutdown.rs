//! Termination signal delivery as a pollable file descriptor.

use crate::hotplug::Hotplug;
use crate::Result;
use nix::sys::signal::{SigSet, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use std::os::fd::{AsFd, BorrowedFd};

/// SIGINT and SIGTERM, blocked for normal delivery and read from a
/// signalfd instead.
pub struct ShutdownSignal {
    fd: SignalFd,
}

fn termination_signals() -> SigSet {
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGINT);
    mask.add(Signal::SIGTERM);
    mask
}

impl ShutdownSignal {
    /// Block the termination signals on the calling thread and open a
    /// signalfd for them. Call before spawning any thread so every thread
    /// inherits the mask.
    pub fn install() -> Result<Self> {
        let mask = termination_signals();
        mask.thread_block()?;
        let fd = SignalFd::with_flags(&mask, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC)?;
        Ok(Self { fd })
    }

    /// The pending termination signal, if any.
    pub fn pending(&mut self) -> Result<Option<Signal>> {
        match self.fd.read_signal()? {
            Some(info) => Ok(Signal::try_from(info.ssi_signo as i32).ok()),
            None => Ok(None),
        }
    }
}

impl AsFd for ShutdownSignal {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// Stop every registered device in registration order.
pub fn stop_all_devices(hotplug: &mut Hotplug) {
    let count = hotplug.registry().len();
    log::info!("Stopping {} device(s)", count);
    hotplug.stop_all();
    log::debug!("Devices: {:?}", hotplug.registry().snapshot());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_termination_signals() {
        let mask = termination_signals();
        assert!(mask.contains(Signal::SIGINT));
        assert!(mask.contains(Signal::SIGTERM));
        assert!(!mask.contains(Signal::SIGHUP));
    }

    #[test]
    fn test_signal_delivered_through_fd() {
        // Blocking only affects this test thread.
        let mut shutdown = ShutdownSignal::install().unwrap();
        assert_eq!(shutdown.pending().unwrap(), None);

        nix::sys::pthread::pthread_kill(nix::sys::pthread::pthread_self(), Signal::SIGTERM).unwrap();
        assert_eq!(shutdown.pending().unwrap(), Some(Signal::SIGTERM));
        assert_eq!(shutdown.pending().unwrap(), None);
    }
}
