//! Interface to the downstream pose tracker.
//!
//! A tracker may be shared by a correlated HMD and camera, so every call
//! goes through [`TrackerHandle`], which serialises access with a mutex.
//! The lock is held for a single call only and never across device I/O,
//! so a worker pushing samples cannot block a concurrent `stop()` for
//! longer than one call.

use crate::types::{FrameTiming, ImuSample, LedModel};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub const REGISTRATION_TIMEOUT: Duration = Duration::from_millis(100);

/// Consumer of LED constellations and IMU samples.
pub trait Tracker: Send {
    fn register_leds(&mut self, leds: &LedModel);
    fn unregister_leds(&mut self, leds: &LedModel);
    fn push_imu_sample(&mut self, sample: &ImuSample);

    /// Frame timing is forwarded uninterpreted.
    fn push_frame_timing(&mut self, _timing: &FrameTiming) {}
}

/// Shared, reference-counted tracker.
#[derive(Clone)]
pub struct TrackerHandle {
    inner: Arc<Mutex<dyn Tracker>>,
}

impl TrackerHandle {
    pub fn new<T: Tracker + 'static>(tracker: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(tracker)),
        }
    }

    /// True when both handles refer to the same tracker instance.
    pub fn same_as(&self, other: &TrackerHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn lock(&self) -> MutexGuard<'_, dyn Tracker + 'static> {
        // A panic in another holder leaves the tracker usable for the rest.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register_leds(&self, leds: &LedModel) {
        self.lock().register_leds(leds);
    }

    pub fn unregister_leds(&self, leds: &LedModel) {
        self.lock().unregister_leds(leds);
    }

    pub fn push_imu_sample(&self, sample: &ImuSample) {
        self.lock().push_imu_sample(sample);
    }

    pub fn push_frame_timing(&self, timing: &FrameTiming) {
        self.lock().push_frame_timing(timing);
    }
}

impl std::fmt::Debug for TrackerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerHandle")
            .field("ptr", &Arc::as_ptr(&self.inner).cast::<()>())
            .finish()
    }
}

/// Events delivered by a [`ChannelTracker`].
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    LedsRegistered(LedModel),
    LedsUnregistered(usize),
    Imu(ImuSample),
    Frame(FrameTiming),
}

/// Tracker that forwards everything to a solver over a bounded channel.
///
/// Samples are dropped when the solver falls behind. Registrations wait up
/// to [`REGISTRATION_TIMEOUT`] for queue space.
pub struct ChannelTracker {
    sender: Sender<TrackerEvent>,
    dropped: u64,
}

impl ChannelTracker {
    pub fn new(sender: Sender<TrackerEvent>) -> Self {
        Self { sender, dropped: 0 }
    }

    /// Create a tracker and the receiving end of its event queue.
    pub fn with_capacity(capacity: usize) -> (Self, Receiver<TrackerEvent>) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        (Self::new(sender), receiver)
    }

    fn forward(&mut self, event: TrackerEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                log::trace!("Tracker queue full, dropped {} events", self.dropped);
            }
            Err(TrySendError::Disconnected(_)) => {
                log::trace!("Tracker consumer gone, discarding event");
            }
        }
    }

    /// Registrations wait briefly for room instead of being dropped.
    fn forward_registration(&mut self, event: TrackerEvent) {
        if let Err(e) = self.sender.send_timeout(event, REGISTRATION_TIMEOUT) {
            log::warn!("Tracker: registration not delivered: {}", e);
        }
    }
}

impl Tracker for ChannelTracker {
    fn register_leds(&mut self, leds: &LedModel) {
        log::info!("Tracker: registering {} LEDs", leds.len());
        self.forward_registration(TrackerEvent::LedsRegistered(leds.clone()));
    }

    fn unregister_leds(&mut self, leds: &LedModel) {
        log::info!("Tracker: unregistering {} LEDs", leds.len());
        self.forward_registration(TrackerEvent::LedsUnregistered(leds.len()));
    }

    fn push_imu_sample(&mut self, sample: &ImuSample) {
        self.forward(TrackerEvent::Imu(*sample));
    }

    fn push_frame_timing(&mut self, timing: &FrameTiming) {
        self.forward(TrackerEvent::Frame(*timing));
    }
}

/// Builds a fresh tracker for every newly matched device.
pub type TrackerFactory = Arc<dyn Fn() -> TrackerHandle + Send + Sync>;

/// Factory handing out [`ChannelTracker`]s that all feed one queue.
pub fn channel_tracker_factory(sender: Sender<TrackerEvent>) -> TrackerFactory {
    Arc::new(move || TrackerHandle::new(ChannelTracker::new(sender.clone())))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::Led;

    /// Records every call, for assertions from other modules' tests.
    #[derive(Default)]
    pub(crate) struct RecordingTracker {
        pub log: Arc<Mutex<Vec<TrackerEvent>>>,
    }

    impl Tracker for RecordingTracker {
        fn register_leds(&mut self, leds: &LedModel) {
            self.log.lock().unwrap().push(TrackerEvent::LedsRegistered(leds.clone()));
        }

        fn unregister_leds(&mut self, leds: &LedModel) {
            self.log.lock().unwrap().push(TrackerEvent::LedsUnregistered(leds.len()));
        }

        fn push_imu_sample(&mut self, sample: &ImuSample) {
            self.log.lock().unwrap().push(TrackerEvent::Imu(*sample));
        }

        fn push_frame_timing(&mut self, timing: &FrameTiming) {
            self.log.lock().unwrap().push(TrackerEvent::Frame(*timing));
        }
    }

    fn sample(ts: u32) -> ImuSample {
        ImuSample {
            timestamp_us: ts,
            temperature: 30.0,
            acceleration: [0.0, 9.81, 0.0],
            angular_velocity: [0.0; 3],
            magnetic_field: [0.0; 3],
        }
    }

    #[test]
    fn test_handle_identity() {
        let (tracker, _rx) = ChannelTracker::with_capacity(4);
        let a = TrackerHandle::new(tracker);
        let b = a.clone();
        let (other, _rx2) = ChannelTracker::with_capacity(4);
        let c = TrackerHandle::new(other);
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
    }

    #[test]
    fn test_channel_tracker_drops_samples_when_full() {
        let (tracker, rx) = ChannelTracker::with_capacity(2);
        let handle = TrackerHandle::new(tracker);
        for ts in 0..5 {
            handle.push_imu_sample(&sample(ts));
        }
        let received: Vec<_> = rx.try_iter().collect();
        assert_eq!(received, vec![TrackerEvent::Imu(sample(0)), TrackerEvent::Imu(sample(1))]);
    }

    #[test]
    fn test_channel_tracker_forwards_registration() {
        let (tracker, rx) = ChannelTracker::with_capacity(4);
        let handle = TrackerHandle::new(tracker);
        let model = LedModel {
            leds: vec![Led::default(); 3],
        };
        handle.register_leds(&model);
        handle.unregister_leds(&model);
        assert_eq!(rx.try_recv().unwrap(), TrackerEvent::LedsRegistered(model));
        assert_eq!(rx.try_recv().unwrap(), TrackerEvent::LedsUnregistered(3));
    }

    #[test]
    fn test_shared_handle_across_threads() {
        let recorder = RecordingTracker::default();
        let log = recorder.log.clone();
        let handle = TrackerHandle::new(recorder);

        let workers: Vec<_> = (0..2)
            .map(|n| {
                let handle = handle.clone();
                std::thread::spawn(move || {
                    for ts in 0..100 {
                        handle.push_imu_sample(&sample(n * 1000 + ts));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(log.lock().unwrap().len(), 200);
    }
}
