//! Synthetic compass: heading sweeps 10° per second and wraps at 360.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::device::Device;
use crate::drivers::{DriverCtx, PollTask, ReadingSender, SensorDriver, SensorHandle};
use crate::errors::SensorResult;
use crate::readings::{Reading, SensorKind};

pub struct FakeCompass;

#[async_trait]
impl SensorDriver for FakeCompass {
    fn name(&self) -> &'static str {
        "Fake compass"
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Compass
    }

    fn discover(&self, device: &Device, ctx: &DriverCtx) -> bool {
        if !ctx.config.fake_compass_enabled() {
            return false;
        }
        if device.subsystem() != "input" {
            return false;
        }
        // the power button is as good an anchor as any
        if device.property("NAME") != Some("\"Power Button\"") {
            return false;
        }
        debug!("Found fake compass at {}", device.sysfs_path().display());
        true
    }

    async fn open(
        &self,
        _device: &Device,
        _ctx: &DriverCtx,
        readings: ReadingSender,
    ) -> SensorResult<Box<dyn SensorHandle>> {
        Ok(Box::new(Handle {
            readings,
            poll: PollTask::idle(),
        }))
    }
}

struct Handle {
    readings: ReadingSender,
    poll: PollTask,
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

        let readings = self.readings.clone();
        let mut heading = 0.0;
        self.poll.start(Duration::from_secs(1), move || {
            heading += 10.0;
            if heading >= 360.0 {
                heading = 0.0;
            }
            debug!("Changed heading to {}", heading);
            let _ = readings.send(Reading::Heading { degrees: heading });
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
    use crate::drivers::iio::tests::{MemCatalog, MemDeviceIo};
    use crate::sysfs::mem::MemSysfs;
    use std::sync::Arc;
    use tokio::sync::{broadcast, mpsc};

    fn ctx(fake_compass: bool) -> DriverCtx {
        let (hotplug, _) = broadcast::channel(16);
        let mut config = ProxyConfig::default();
        config.fake.compass = fake_compass;
        DriverCtx {
            sysfs: Arc::new(MemSysfs::new()),
            dev_io: Arc::new(MemDeviceIo::new(vec![])),
            catalog: Arc::new(MemCatalog { devices: vec![] }),
            hotplug,
            config: Arc::new(config),
        }
    }

    fn power_button() -> Device {
        Device::builder("input", "event1")
            .sysfs_path("/sys/class/input/event1")
            .property("NAME", "\"Power Button\"")
            .build(Arc::new(MemSysfs::new()))
    }

    #[tokio::test]
    async fn test_discover_wants_the_power_button_anchor() {
        assert!(FakeCompass.discover(&power_button(), &ctx(true)));
        assert!(!FakeCompass.discover(&power_button(), &ctx(false)));

        let other = Device::builder("input", "event2")
            .sysfs_path("/sys/class/input/event2")
            .property("NAME", "\"Sleep Button\"")
            .build(Arc::new(MemSysfs::new()));
        assert!(!FakeCompass.discover(&other, &ctx(true)));
    }

    #[tokio::test]
    async fn test_heading_ramps_in_ten_degree_steps() {
        let ctx = ctx(true);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = FakeCompass.open(&power_button(), &ctx, tx).await.unwrap();
        handle.set_polling(true).await;

        assert_eq!(rx.recv().await.unwrap(), Reading::Heading { degrees: 10.0 });
        handle.close().await;
    }
}
