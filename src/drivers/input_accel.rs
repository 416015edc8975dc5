//! Input-event accelerometer backend. Reads the absolute-axis state of an
//! evdev node on demand, driven by kernel "change" notifications for the
//! parent device. Until the first such notification arrives, a timer
//! fallback does the driving; the first notification latches push mode
//! permanently and the timer stays off.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::device::{Device, DeviceAction, DeviceEvent, DeviceIo};
use crate::drivers::{DriverCtx, PollTask, ReadingSender, SensorDriver, SensorHandle};
use crate::errors::{SensorError, SensorResult};
use crate::readings::{Reading, SensorKind};

/// Input accelerometers report in units of 1G ~= 256 already.
const INPUT_ACCEL_SCALE: f64 = 9.81 / 256.0;

pub struct InputAccel;

#[async_trait]
impl SensorDriver for InputAccel {
    fn name(&self) -> &'static str {
        "Input accelerometer"
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Accelerometer
    }

    fn discover(&self, device: &Device, _ctx: &DriverCtx) -> bool {
        if device.subsystem() != "input" {
            return false;
        }
        if !device.property_bool("ID_INPUT_ACCELEROMETER") {
            return false;
        }
        let Some(node) = device.dev_node() else {
            return false;
        };
        if !node.to_string_lossy().contains("/event") {
            return false;
        }
        debug!("Found input accel at {}", device.sysfs_path().display());
        true
    }

    async fn open(
        &self,
        device: &Device,
        ctx: &DriverCtx,
        readings: ReadingSender,
    ) -> SensorResult<Box<dyn SensorHandle>> {
        let node = device
            .dev_node()
            .ok_or_else(|| SensorError::Setup {
                device: device.kernel_name().to_string(),
                reason: "device has no event node".to_string(),
            })?
            .to_path_buf();

        // Change notifications arrive for the parent device, not the event
        // node itself.
        let notify_path = device
            .parent()
            .unwrap_or(device)
            .sysfs_path()
            .to_path_buf();

        Ok(Box::new(Handle {
            node,
            notify_path,
            dev_io: ctx.dev_io.clone(),
            events: ctx.hotplug.clone(),
            readings,
            period: ctx.config.poll.interval(),
            poll: PollTask::idle(),
        }))
    }
}

struct Handle {
    node: PathBuf,
    notify_path: PathBuf,
    dev_io: Arc<dyn DeviceIo>,
    events: broadcast::Sender<DeviceEvent>,
    readings: ReadingSender,
    period: Duration,
    poll: PollTask,
}

fn report(dev_io: &dyn DeviceIo, node: &PathBuf, readings: &ReadingSender) {
    let abs = match dev_io.read_abs_axes(node) {
        Ok(abs) => abs,
        Err(e) => {
            warn!("Failed to read axes from {}: {}", node.display(), e);
            return;
        }
    };
    let _ = readings.send(Reading::Accel {
        x: abs.x,
        y: abs.y,
        z: abs.z,
        scale: INPUT_ACCEL_SCALE,
    });
}

#[async_trait]
impl SensorHandle for Handle {
    async fn set_polling(&mut self, enabled: bool) {
        if !enabled {
            self.poll.stop();
            return;
        }
        if self.poll.is_running() {
            return;
        }

        let node = self.node.clone();
        let notify_path = self.notify_path.clone();
        let dev_io = self.dev_io.clone();
        let readings = self.readings.clone();
        let mut events = self.events.subscribe();
        let period = self.period;

        self.poll.start_future(async move {
            report(dev_io.as_ref(), &node, &readings);

            // One-way latch: flips on the first kernel change notification,
            // never back.
            let mut kernel_pushes = false;
            let mut fallback =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);

            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(DeviceEvent { action: DeviceAction::Changed, device })
                            if device.sysfs_path() == notify_path =>
                        {
                            if !kernel_pushes {
                                debug!(
                                    "Kernel pushes changes for {}; disabling timer fallback",
                                    notify_path.display()
                                );
                                kernel_pushes = true;
                            }
                            report(dev_io.as_ref(), &node, &readings);
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => break,
                    },
                    _ = fallback.tick(), if !kernel_pushes => {
                        report(dev_io.as_ref(), &node, &readings);
                    }
                }
            }
        });
    }

    async fn close(mut self: Box<Self>) {
        self.poll.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use crate::device::AbsReading;
    use crate::drivers::iio::tests::{MemCatalog, MemDeviceIo};
    use crate::sysfs::mem::MemSysfs;
    use tokio::sync::mpsc;

    fn input_device(fs: &Arc<MemSysfs>) -> Device {
        let parent = Device::builder("input", "input4")
            .sysfs_path("/sys/class/input/input4")
            .build(fs.clone());
        Device::builder("input", "event4")
            .sysfs_path("/sys/class/input/event4")
            .dev_node("/dev/input/event4")
            .property("ID_INPUT_ACCELEROMETER", "1")
            .parent(parent)
            .build(fs.clone())
    }

    fn ctx(fs: Arc<MemSysfs>, dev_io: Arc<MemDeviceIo>, period_ms: u64) -> DriverCtx {
        let (hotplug, _) = broadcast::channel(16);
        let mut config = ProxyConfig::default();
        config.poll.interval_ms = period_ms;
        DriverCtx {
            sysfs: fs,
            dev_io,
            catalog: Arc::new(MemCatalog { devices: vec![] }),
            hotplug,
            config: Arc::new(config),
        }
    }

    #[tokio::test]
    async fn test_discover_requires_accelerometer_event_node() {
        let fs = Arc::new(MemSysfs::new());
        let device = input_device(&fs);
        let ctx = ctx(fs.clone(), Arc::new(MemDeviceIo::new(vec![])), 700);
        assert!(InputAccel.discover(&device, &ctx));

        let mouse = Device::builder("input", "event5")
            .sysfs_path("/sys/class/input/event5")
            .dev_node("/dev/input/event5")
            .build(fs.clone());
        assert!(!InputAccel.discover(&mouse, &ctx));

        let joydev = Device::builder("input", "js0")
            .sysfs_path("/sys/class/input/js0")
            .dev_node("/dev/input/js0")
            .property("ID_INPUT_ACCELEROMETER", "1")
            .build(fs.clone());
        assert!(!InputAccel.discover(&joydev, &ctx));
    }

    #[tokio::test]
    async fn test_change_event_latches_off_timer_fallback() {
        let fs = Arc::new(MemSysfs::new());
        let device = input_device(&fs);
        let dev_io = Arc::new(MemDeviceIo::new(vec![]));
        *dev_io.abs.lock().unwrap() = AbsReading { x: 0, y: -256, z: 0 };
        // long fallback period: only the initial read fires from the timer
        let ctx = ctx(fs.clone(), dev_io.clone(), 3_600_000);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = InputAccel.open(&device, &ctx, tx).await.unwrap();
        handle.set_polling(true).await;

        // initial read from the fallback path
        assert_eq!(
            rx.recv().await.unwrap(),
            Reading::Accel {
                x: 0,
                y: -256,
                z: 0,
                scale: INPUT_ACCEL_SCALE,
            }
        );

        // a kernel change notification for the parent triggers a fresh read
        *dev_io.abs.lock().unwrap() = AbsReading { x: 256, y: 0, z: 0 };
        let parent = device.parent().unwrap().clone();
        ctx.hotplug
            .send(DeviceEvent {
                action: DeviceAction::Changed,
                device: parent,
            })
            .unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            Reading::Accel {
                x: 256,
                y: 0,
                z: 0,
                scale: INPUT_ACCEL_SCALE,
            }
        );

        // unrelated change events are ignored
        let stranger = Device::builder("input", "input9")
            .sysfs_path("/sys/class/input/input9")
            .build(fs.clone());
        ctx.hotplug
            .send(DeviceEvent {
                action: DeviceAction::Changed,
                device: stranger,
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());

        handle.close().await;
    }
}
