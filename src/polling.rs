//! Client-side polling timers.
//!
//! One [`PollingTimer`] exists per polling period. It groups attributes by
//! device and, on every tick, asks each device to poll its attributes in
//! two phases (request, then reply). Devices are polled one after the
//! other on the timer thread; a failing or panicking device is logged and
//! skipped for the cycle.
//!
//! The timer thread starts with the first attribute and stops when the last
//! one is removed.

use crate::attribute::TaurusAttribute;
use crate::caseless::NameMap;
use crate::device::{PollRequest, TaurusDevice};
use crate::error::Result;
use crate::model::TaurusModel;
use crate::threadpool::JobDispatcher;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

struct DeviceBucket {
    device: Arc<TaurusDevice>,
    attrs: NameMap<Arc<TaurusAttribute>>,
}

struct PollMap {
    devices: NameMap<DeviceBucket>,
    attr_count: usize,
    // guarded with the map so start/stop follow the attribute count
    runner: Option<Runner>,
}

struct Runner {
    // dropping the sender stops the thread
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl Runner {
    fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Periodic poller for all attributes sharing one period.
pub struct PollingTimer {
    period: Duration,
    case_sensitive: bool,
    map: Arc<Mutex<PollMap>>,
    dispatcher: Arc<JobDispatcher>,
}

impl PollingTimer {
    /// Timer ticking every `period`. Initial reads of added attributes go
    /// through `dispatcher`.
    pub fn new(period: Duration, case_sensitive: bool, dispatcher: Arc<JobDispatcher>) -> Self {
        Self {
            period,
            case_sensitive,
            map: Arc::new(Mutex::new(PollMap {
                devices: NameMap::new(case_sensitive),
                attr_count: 0,
                runner: None,
            })),
            dispatcher,
        }
    }

    /// Tick period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Add an attribute. The first one starts the timer when `auto_start`.
    /// Otherwise a newly added attribute is read once when `read_now`.
    pub fn add_attribute(&self, attr: &Arc<TaurusAttribute>, auto_start: bool, read_now: bool) {
        let Some(device) = attr.device() else {
            tracing::warn!(attr = %attr.full_name(), "Attribute has no device; not polled");
            return;
        };
        let read = {
            let mut guard = self.map.lock();
            let map = &mut *guard;
            let case_sensitive = self.case_sensitive;
            let bucket = map.devices.get_or_insert_with(attr.device_key(), || DeviceBucket {
                device,
                attrs: NameMap::new(case_sensitive),
            });
            if bucket.attrs.contains_key(attr.attr_name()) {
                return;
            }
            bucket.attrs.insert(attr.attr_name(), Arc::clone(attr));
            map.attr_count += 1;
            if map.attr_count == 1 && auto_start {
                self.spawn_locked(map);
                false
            } else {
                read_now
            }
        };
        if read {
            let attr = Arc::clone(attr);
            self.dispatcher.enqueue(move || attr.poll(), None);
        }
    }

    /// Remove an attribute. Removing the last one stops the timer.
    pub fn remove_attribute(&self, attr: &Arc<TaurusAttribute>) {
        let runner = {
            let mut guard = self.map.lock();
            let map = &mut *guard;
            let Some(bucket) = map.devices.get_mut(attr.device_key()) else {
                return;
            };
            if bucket.attrs.remove(attr.attr_name()).is_none() {
                return;
            }
            let bucket_empty = bucket.attrs.is_empty();
            map.attr_count -= 1;
            if bucket_empty {
                map.devices.remove(attr.device_key());
            }
            if map.attr_count == 0 {
                map.runner.take()
            } else {
                None
            }
        };
        if let Some(runner) = runner {
            self.finish(runner);
        }
    }

    /// Whether `attr` is polled by this timer.
    pub fn contains_attribute(&self, attr: &TaurusAttribute) -> bool {
        self.map
            .lock()
            .devices
            .get(attr.device_key())
            .is_some_and(|b| b.attrs.contains_key(attr.attr_name()))
    }

    /// Number of polled attributes.
    pub fn attribute_count(&self) -> usize {
        self.map.lock().attr_count
    }

    /// Number of devices with polled attributes.
    pub fn device_count(&self) -> usize {
        self.map.lock().devices.len()
    }

    /// Whether the timer thread is running.
    pub fn is_running(&self) -> bool {
        self.map.lock().runner.as_ref().is_some_and(Runner::is_alive)
    }

    /// Start the timer thread if it is not running.
    pub fn start(&self) {
        let mut map = self.map.lock();
        self.spawn_locked(&mut map);
    }

    /// Stop the timer thread and wait for it, unless called from it.
    pub fn stop(&self) {
        let runner = self.map.lock().runner.take();
        if let Some(runner) = runner {
            self.finish(runner);
        }
    }

    fn spawn_locked(&self, map: &mut PollMap) {
        if map.runner.as_ref().is_some_and(Runner::is_alive) {
            return;
        }
        let (stop, stopped) = bounded::<()>(1);
        let shared = Arc::clone(&self.map);
        let period = self.period;
        let spawned = thread::Builder::new()
            .name(format!("polling-{}ms", period.as_millis()))
            .spawn(move || loop {
                match stopped.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => poll_cycle(&shared),
                    _ => break,
                }
            });
        match spawned {
            Ok(handle) => {
                tracing::debug!(period_ms = period.as_millis() as u64, "Polling timer started");
                map.runner = Some(Runner { stop, handle });
            }
            Err(e) => tracing::error!(error = %e, "Cannot start polling timer"),
        }
    }

    // Called without the map lock: the timer thread takes it every cycle.
    fn finish(&self, runner: Runner) {
        drop(runner.stop);
        if runner.handle.thread().id() == thread::current().id() {
            return;
        }
        if runner.handle.join().is_err() {
            tracing::warn!(period_ms = self.period.as_millis() as u64, "Polling thread panicked");
        }
        tracing::debug!(period_ms = self.period.as_millis() as u64, "Polling timer stopped");
    }
}

impl Drop for PollingTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_cycle(map: &Mutex<PollMap>) {
    let snapshot: Vec<(Arc<TaurusDevice>, Vec<Arc<TaurusAttribute>>)> = map
        .lock()
        .devices
        .values()
        .map(|b| (Arc::clone(&b.device), b.attrs.values().cloned().collect()))
        .collect();

    for (device, attrs) in snapshot {
        match catch_unwind(AssertUnwindSafe(|| poll_device(&device, &attrs))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(device = %device.full_name(), error = %e, "Polling failed");
            }
            Err(_) => {
                tracing::error!(device = %device.full_name(), "Polling panicked");
            }
        }
    }
}

fn poll_device(device: &TaurusDevice, attrs: &[Arc<TaurusAttribute>]) -> Result<()> {
    if let Some(id) = device.poll(attrs, PollRequest::Asynch)? {
        device.poll(attrs, PollRequest::Reply(id))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sim_factory;
    use std::time::Instant;

    #[test]
    fn timer_runs_only_while_attributes_are_registered() {
        let (factory, _) = sim_factory();
        let attr = factory.get_attribute("a/b/c/voltage").unwrap();
        let timer = PollingTimer::new(
            Duration::from_millis(1000),
            false,
            Arc::clone(factory.dispatcher()),
        );
        timer.add_attribute(&attr, true, true);
        assert!(timer.is_running());
        assert!(timer.contains_attribute(&attr));

        timer.remove_attribute(&attr);
        let deadline = Instant::now() + Duration::from_secs(2);
        while timer.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!timer.is_running());
        assert_eq!(timer.attribute_count(), 0);
    }

    #[test]
    fn attributes_of_one_device_share_a_bucket() {
        let (factory, _) = sim_factory();
        let a = factory.get_attribute("a/b/c/voltage").unwrap();
        let b = factory.get_attribute("a/b/c/counter").unwrap();
        let timer = PollingTimer::new(
            Duration::from_millis(1000),
            false,
            Arc::clone(factory.dispatcher()),
        );
        timer.add_attribute(&a, false, false);
        timer.add_attribute(&b, false, false);
        timer.add_attribute(&b, false, false);
        assert_eq!(timer.device_count(), 1);
        assert_eq!(timer.attribute_count(), 2);
        assert!(!timer.is_running());
    }

    #[test]
    fn tick_polls_every_attribute() {
        let (factory, sim) = sim_factory();
        let attr = factory.get_attribute("a/b/c/counter").unwrap();
        let timer = PollingTimer::new(
            Duration::from_millis(20),
            false,
            Arc::clone(factory.dispatcher()),
        );
        timer.add_attribute(&attr, true, true);
        let deadline = Instant::now() + Duration::from_secs(2);
        while sim.read_count("a/b/c", "counter") < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        timer.stop();
        assert!(sim.read_count("a/b/c", "counter") >= 3);
    }

    #[test]
    fn timer_follows_attribute_count_across_restarts() {
        let (factory, _) = sim_factory();
        let attr = factory.get_attribute("a/b/c/voltage").unwrap();
        let timer = Arc::new(PollingTimer::new(
            Duration::from_millis(5),
            false,
            Arc::clone(factory.dispatcher()),
        ));
        for _ in 0..20 {
            timer.add_attribute(&attr, true, false);
            assert!(timer.is_running());
            timer.remove_attribute(&attr);
            assert!(!timer.is_running());
        }

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let timer = Arc::clone(&timer);
                let attr = Arc::clone(&attr);
                thread::spawn(move || {
                    for _ in 0..50 {
                        timer.add_attribute(&attr, true, false);
                        timer.remove_attribute(&attr);
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        assert_eq!(timer.attribute_count(), 0);
        assert!(!timer.is_running());

        timer.add_attribute(&attr, true, false);
        assert!(timer.is_running());
        timer.remove_attribute(&attr);
    }
}
