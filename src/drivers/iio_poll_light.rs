//! Raw-attribute polling ambient light backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::device::Device;
use crate::drivers::{DriverCtx, PollTask, ReadingSender, SensorDriver, SensorHandle};
use crate::errors::SensorResult;
use crate::readings::{Reading, SensorKind};
use crate::sysfs::SysfsIo;

const DEFAULT_POLL_TIME: Duration = Duration::from_millis(800);

pub struct IioPollLight;

#[async_trait]
impl SensorDriver for IioPollLight {
    fn name(&self) -> &'static str {
        "IIO Polling Light sensor"
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Light
    }

    fn discover(&self, device: &Device, _ctx: &DriverCtx) -> bool {
        if device.property("IIO_SENSOR_PROXY_TYPE") != Some("iio-poll-als") {
            return false;
        }
        debug!("Found IIO poll light at {}", device.sysfs_path().display());
        true
    }

    async fn open(
        &self,
        device: &Device,
        ctx: &DriverCtx,
        readings: ReadingSender,
    ) -> SensorResult<Box<dyn SensorHandle>> {
        // Poll at the device's own integration time when it declares one.
        let period = device
            .attr_f64("in_illuminance_integration_time")
            .map(Duration::from_secs_f64)
            .unwrap_or(DEFAULT_POLL_TIME);

        Ok(Box::new(Handle {
            device: device.clone(),
            sysfs: ctx.sysfs.clone(),
            readings,
            period,
            poll: PollTask::idle(),
        }))
    }
}

struct Handle {
    device: Device,
    sysfs: Arc<dyn SysfsIo>,
    readings: ReadingSender,
    period: Duration,
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

        let input_path = self.device.sysfs_path().join("in_illuminance_input");
        let sysfs = self.sysfs.clone();
        let readings = self.readings.clone();
        self.poll.start(self.period, move || {
            let level = match sysfs.read_f64(&input_path) {
                Ok(level) => level,
                Err(e) => {
                    warn!(
                        "Failed to read input level at {}: {}",
                        input_path.display(),
                        e
                    );
                    return;
                }
            };

            let _ = readings.send(Reading::Light {
                level,
                uses_lux: true,
            });
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
    use tokio::sync::{broadcast, mpsc};

    fn poll_als_device(fs: &Arc<MemSysfs>) -> Device {
        let dir = "/sys/bus/iio/devices/iio:device5";
        fs.insert(format!("{dir}/in_illuminance_input"), "321.5");
        fs.insert(format!("{dir}/in_illuminance_integration_time"), "0.1");
        Device::builder("iio", "iio:device5")
            .sysfs_path(dir)
            .property("IIO_SENSOR_PROXY_TYPE", "iio-poll-als")
            .build(fs.clone())
    }

    fn ctx(fs: Arc<MemSysfs>) -> DriverCtx {
        let (hotplug, _) = broadcast::channel(16);
        DriverCtx {
            sysfs: fs,
            dev_io: Arc::new(MemDeviceIo::new(vec![])),
            catalog: Arc::new(MemCatalog { devices: vec![] }),
            hotplug,
            config: Arc::new(ProxyConfig::default()),
        }
    }

    #[tokio::test]
    async fn test_reads_illuminance_input() {
        let fs = Arc::new(MemSysfs::new());
        let device = poll_als_device(&fs);
        let ctx = ctx(fs.clone());
        assert!(IioPollLight.discover(&device, &ctx));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = IioPollLight.open(&device, &ctx, tx).await.unwrap();
        handle.set_polling(true).await;

        let reading = rx.recv().await.unwrap();
        assert_eq!(
            reading,
            Reading::Light {
                level: 321.5,
                uses_lux: true,
            }
        );
        handle.close().await;
    }
}
