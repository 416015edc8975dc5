//! Sensor backends. Every backend implements the same small capability set
//! (discover / open / set_polling / close) behind [`SensorDriver`] and
//! [`SensorHandle`]; the coordinator owns at most one handle per sensor
//! kind and never calls two of its methods concurrently.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::ProxyConfig;
use crate::device::{Device, DeviceCatalog, DeviceEvent, DeviceIo};
use crate::errors::SensorResult;
use crate::readings::{Reading, SensorKind};
use crate::sysfs::SysfsIo;

pub mod fake_compass;
pub mod fake_light;
pub mod hwmon_light;
pub mod iio;
pub mod iio_buffer_accel;
pub mod iio_buffer_light;
pub mod iio_poll_accel;
pub mod iio_poll_light;
pub mod input_accel;

/// Channel the drivers push normalized readings into.
pub type ReadingSender = mpsc::UnboundedSender<Reading>;

/// Everything a backend may consult while discovering or opening a device.
#[derive(Clone)]
pub struct DriverCtx {
    pub sysfs: Arc<dyn SysfsIo>,
    pub dev_io: Arc<dyn DeviceIo>,
    pub catalog: Arc<dyn DeviceCatalog>,
    pub hotplug: broadcast::Sender<DeviceEvent>,
    pub config: Arc<ProxyConfig>,
}

#[async_trait]
pub trait SensorDriver: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> SensorKind;

    /// Does this backend claim the candidate device? Pure predicate: no
    /// persistent state may be allocated here.
    fn discover(&self, device: &Device, ctx: &DriverCtx) -> bool;

    /// Allocate backend state and perform one-time device setup. Acquisition
    /// itself starts with `set_polling(true)` on the returned handle.
    async fn open(
        &self,
        device: &Device,
        ctx: &DriverCtx,
        readings: ReadingSender,
    ) -> SensorResult<Box<dyn SensorHandle>>;
}

#[async_trait]
pub trait SensorHandle: Send {
    /// Idempotently start or stop periodic acquisition without tearing down
    /// open state.
    async fn set_polling(&mut self, enabled: bool);

    /// Stop polling and release everything acquired in `open`. Called
    /// exactly once per successful open.
    async fn close(self: Box<Self>);
}

/// All known backends, in probe order. For each kind the first backend whose
/// `discover` accepts a device wins.
pub fn all_drivers() -> Vec<Arc<dyn SensorDriver>> {
    vec![
        Arc::new(iio_buffer_accel::IioBufferAccel),
        Arc::new(iio_poll_accel::IioPollAccel),
        Arc::new(input_accel::InputAccel),
        Arc::new(iio_poll_light::IioPollLight),
        Arc::new(iio_buffer_light::IioBufferLight),
        Arc::new(hwmon_light::HwmonLight),
        Arc::new(fake_compass::FakeCompass),
        Arc::new(fake_light::FakeLight),
    ]
}

/// Owned handle to a backend's acquisition task. Starting twice or stopping
/// twice is a no-op.
pub(crate) struct PollTask {
    task: Option<JoinHandle<()>>,
}

impl PollTask {
    pub fn idle() -> Self {
        Self { task: None }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Run `tick` immediately and then once per `period`.
    pub fn start<F>(&mut self, period: Duration, mut tick: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.start_future(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                tick();
            }
        });
    }

    /// Run an arbitrary acquisition loop.
    pub fn start_future<F>(&mut self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.task.is_some() {
            return;
        }
        self.task = Some(tokio::spawn(fut));
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for PollTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_poll_task_ticks_and_stops() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut poll = PollTask::idle();
        assert!(!poll.is_running());

        let counter = ticks.clone();
        poll.start(Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(poll.is_running());

        tokio::time::sleep(Duration::from_millis(30)).await;
        poll.stop();
        assert!(!poll.is_running());

        let after_stop = ticks.load(Ordering::SeqCst);
        assert!(after_stop >= 2);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn test_poll_task_start_is_idempotent() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut poll = PollTask::idle();

        for _ in 0..3 {
            let counter = ticks.clone();
            poll.start(Duration::from_secs(3600), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        // only the first start took; one immediate tick
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        poll.stop();
    }
}
