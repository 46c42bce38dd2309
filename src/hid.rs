use crate::protocol::{FeatureReport, RecordReport};
use crate::{DaemonError, Result};
use hidapi::{HidApi, HidDevice};
use std::ffi::CString;

/// Report-level access to one HID device node.
///
/// Feature reports carry the report id in `buf[0]` in both directions.
/// `read_timeout` returns `Ok(0)` when no interrupt report arrived in time.
pub trait ReportTransport: Send {
    fn get_feature_report(&self, buf: &mut [u8]) -> Result<usize>;
    fn send_feature_report(&self, buf: &[u8]) -> Result<()>;
    fn read_timeout(&self, buf: &mut [u8], timeout_ms: i32) -> Result<usize>;
}

/// hidapi transport on a hidraw device node.
pub struct HidTransport {
    device: HidDevice,
}

impl HidTransport {
    /// Open a device node such as `/dev/hidraw3`.
    pub fn open(devnode: &str) -> Result<Self> {
        let path = CString::new(devnode)
            .map_err(|e| DaemonError::Transport(format!("invalid device node {:?}: {}", devnode, e)))?;
        let api = HidApi::new_without_enumerate()?;
        let device = api.open_path(&path)?;
        Ok(Self { device })
    }

    /// Open a device node as a boxed transport, for driver constructors.
    pub fn open_boxed(devnode: &str) -> Result<Box<dyn ReportTransport>> {
        Ok(Box::new(Self::open(devnode)?))
    }
}

impl ReportTransport for HidTransport {
    fn get_feature_report(&self, buf: &mut [u8]) -> Result<usize> {
        self.device
            .get_feature_report(buf)
            .map_err(|e| DaemonError::Transport(format!("get_feature_report 0x{:02x} failed: {}", buf[0], e)))
    }

    fn send_feature_report(&self, buf: &[u8]) -> Result<()> {
        self.device
            .send_feature_report(buf)
            .map_err(|e| DaemonError::Transport(format!("send_feature_report 0x{:02x} failed: {}", buf[0], e)))
    }

    fn read_timeout(&self, buf: &mut [u8], timeout_ms: i32) -> Result<usize> {
        self.device
            .read_timeout(buf, timeout_ms)
            .map_err(|e| DaemonError::Transport(format!("read failed: {}", e)))
    }
}

/// Request feature report `R` and decode the response.
pub fn get<R: FeatureReport>(transport: &dyn ReportTransport) -> Result<R> {
    let mut buf = vec![0u8; R::SIZE];
    buf[0] = R::ID;
    let len = transport.get_feature_report(&mut buf)?;
    R::decode(&buf[..len.min(R::SIZE)])
}

/// Send a fully populated feature report.
pub fn set<R: FeatureReport>(transport: &dyn ReportTransport, report: &R) -> Result<()> {
    transport.send_feature_report(&report.encode())
}

/// Read an indexed sequence of records by repeating the same request.
///
/// Every response carries its zero-based index and the total count; the
/// sequence ends with index `count - 1`. An index outside the count or a
/// count above `max` fails the whole sequence, so callers never see a
/// partial set.
pub fn read_records<R: RecordReport>(transport: &dyn ReportTransport, max: usize) -> Result<Vec<R>> {
    let mut report: R = get(transport)?;
    let count = report.count();
    if count as usize > max {
        return Err(DaemonError::TooManyRecords { count, max });
    }

    let mut records = Vec::with_capacity(count as usize);
    loop {
        let index = report.index();
        if index >= count {
            return Err(DaemonError::RecordIndex { index, count });
        }
        records.push(report);

        // Stop before the device wraps around to the first record again.
        if index == count - 1 || records.len() == count as usize {
            break;
        }
        report = get(transport)?;
    }

    Ok(records)
}

#[cfg(test)]
pub(crate) mod mock {
    use super::ReportTransport;
    use crate::device::ActiveFlag;
    use crate::{DaemonError, Result};
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    pub(crate) enum MockRead {
        Report(Vec<u8>),
        Timeout,
        Error,
    }

    #[derive(Default)]
    pub(crate) struct MockState {
        /// Queued responses per report id. The last one stays and is
        /// replaced by whatever the host sends for that id.
        pub features: HashMap<u8, VecDeque<Vec<u8>>>,
        pub sent: Vec<Vec<u8>>,
        pub reads: VecDeque<MockRead>,
        pub fail_ids: Vec<u8>,
        /// Cleared once `reads` runs empty, ending a worker loop.
        pub stop_when_drained: Option<ActiveFlag>,
    }

    impl MockState {
        pub fn queue_feature(&mut self, report: Vec<u8>) {
            self.features.entry(report[0]).or_default().push_back(report);
        }

        pub fn sent_with_id(&self, id: u8) -> Vec<Vec<u8>> {
            self.sent.iter().filter(|r| r[0] == id).cloned().collect()
        }
    }

    /// Scripted transport. Clones share state so tests can inspect it after
    /// the transport moved into a driver.
    #[derive(Clone, Default)]
    pub(crate) struct MockTransport {
        pub state: Arc<Mutex<MockState>>,
        pub open: Arc<AtomicUsize>,
    }

    impl MockTransport {
        pub fn open_handle(&self) -> Box<dyn ReportTransport> {
            self.open.fetch_add(1, Ordering::SeqCst);
            Box::new(OpenMock(self.clone()))
        }

        pub fn open_count(&self) -> usize {
            self.open.load(Ordering::SeqCst)
        }
    }

    /// One open handle on a [`MockTransport`].
    pub(crate) struct OpenMock(MockTransport);

    impl Drop for OpenMock {
        fn drop(&mut self) {
            self.0.open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl ReportTransport for OpenMock {
        fn get_feature_report(&self, buf: &mut [u8]) -> Result<usize> {
            let mut state = self.0.state.lock().unwrap();
            if state.fail_ids.contains(&buf[0]) {
                return Err(DaemonError::Transport("injected failure".into()));
            }
            let queue = state
                .features
                .get_mut(&buf[0])
                .ok_or_else(|| DaemonError::Transport(format!("no report 0x{:02x}", buf[0])))?;
            let report = if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue.front().cloned().unwrap()
            };
            let len = report.len().min(buf.len());
            buf[..len].copy_from_slice(&report[..len]);
            Ok(len)
        }

        fn send_feature_report(&self, buf: &[u8]) -> Result<()> {
            let mut state = self.0.state.lock().unwrap();
            if state.fail_ids.contains(&buf[0]) {
                return Err(DaemonError::Transport("injected failure".into()));
            }
            state.sent.push(buf.to_vec());
            state.features.insert(buf[0], VecDeque::from([buf.to_vec()]));
            Ok(())
        }

        fn read_timeout(&self, buf: &mut [u8], timeout_ms: i32) -> Result<usize> {
            let (next, stop) = {
                let mut state = self.0.state.lock().unwrap();
                (state.reads.pop_front(), state.stop_when_drained.clone())
            };
            match next {
                Some(MockRead::Report(report)) => {
                    let len = report.len().min(buf.len());
                    buf[..len].copy_from_slice(&report[..len]);
                    Ok(len)
                }
                Some(MockRead::Error) => Err(DaemonError::Transport("read failed".into())),
                Some(MockRead::Timeout) => Ok(0),
                None if stop.is_some() => {
                    if let Some(active) = stop {
                        active.set(false);
                    }
                    Ok(0)
                }
                None => {
                    std::thread::sleep(Duration::from_millis(timeout_ms.clamp(0, 5) as u64));
                    Ok(0)
                }
            }
        }
    }
}
