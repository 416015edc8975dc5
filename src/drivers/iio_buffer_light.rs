//! Buffered-binary ambient light backend, for ALS devices with a kernel
//! ring buffer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::device::{Device, DeviceIo};
use crate::drivers::iio::{find_trigger, BufferedScan};
use crate::drivers::{DriverCtx, PollTask, ReadingSender, SensorDriver, SensorHandle};
use crate::errors::{SensorError, SensorResult};
use crate::readings::{Reading, SensorKind};
use crate::scan::decode;

const TRIGGER_PREFIX: &str = "als";

pub struct IioBufferLight;

#[async_trait]
impl SensorDriver for IioBufferLight {
    fn name(&self) -> &'static str {
        "IIO Buffer Light sensor"
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Light
    }

    fn discover(&self, device: &Device, ctx: &DriverCtx) -> bool {
        if device.property("IIO_SENSOR_PROXY_TYPE") != Some("iio-buffer-als") {
            return false;
        }
        if find_trigger(ctx.catalog.as_ref(), device, TRIGGER_PREFIX).is_none() {
            return false;
        }
        debug!("Found IIO buffer ALS at {}", device.sysfs_path().display());
        true
    }

    async fn open(
        &self,
        device: &Device,
        ctx: &DriverCtx,
        readings: ReadingSender,
    ) -> SensorResult<Box<dyn SensorHandle>> {
        let trigger_name = find_trigger(ctx.catalog.as_ref(), device, TRIGGER_PREFIX).ok_or(
            SensorError::MissingTrigger {
                device: device.kernel_name().to_string(),
            },
        )?;
        let scan = BufferedScan::acquire(
            ctx.sysfs.clone(),
            device,
            &trigger_name,
            ctx.config.poll.read_records,
        )?;

        Ok(Box::new(Handle {
            scan: Arc::new(scan),
            name: device.kernel_name().to_string(),
            dev_io: ctx.dev_io.clone(),
            readings,
            period: ctx.config.poll.interval(),
            poll: PollTask::idle(),
        }))
    }
}

struct Handle {
    scan: Arc<BufferedScan>,
    name: String,
    dev_io: Arc<dyn DeviceIo>,
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

        let scan = self.scan.clone();
        let name = self.name.clone();
        let dev_io = self.dev_io.clone();
        let readings = self.readings.clone();
        self.poll.start(self.period, move || {
            let record = match scan.read_latest(dev_io.as_ref()) {
                Ok(Some(record)) => record,
                Ok(None) => return,
                Err(e) => {
                    warn!("Couldn't read from device '{}': {}", name, e);
                    return;
                }
            };

            let sample = decode(&record, scan.layout(), "in_intensity_both");
            if !sample.present {
                return;
            }

            let mut level = sample.value as f64;
            if sample.scale != 0.0 {
                level *= sample.scale;
            }
            debug!(
                "Light read from IIO on '{}': {} (scale {}) = {}",
                name, sample.value, sample.scale, level
            );

            // The kernel declares in_intensity* values as unitless, but
            // Windows-8-compatible sensor firmware reports Lux, and that is
            // what nearly all of these devices are.
            let _ = readings.send(Reading::Light {
                level,
                uses_lux: true,
            });
        });
    }

    async fn close(mut self: Box<Self>) {
        self.poll.stop();
        self.scan.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use crate::drivers::iio::tests::{MemCatalog, MemDeviceIo};
    use crate::sysfs::mem::MemSysfs;
    use tokio::sync::{broadcast, mpsc};

    fn als_device(fs: &Arc<MemSysfs>) -> Device {
        let dir = "/sys/bus/iio/devices/iio:device1";
        fs.insert(format!("{dir}/name"), "als");
        fs.insert(format!("{dir}/in_intensity_scale"), "0.5");
        fs.insert(format!("{dir}/scan_elements/in_intensity_both_en"), "1");
        fs.insert(format!("{dir}/scan_elements/in_intensity_both_index"), "0");
        fs.insert(
            format!("{dir}/scan_elements/in_intensity_both_type"),
            "le:u16/16>>0",
        );
        Device::builder("iio", "iio:device1")
            .sysfs_path(dir)
            .dev_node("/dev/iio:device1")
            .property("IIO_SENSOR_PROXY_TYPE", "iio-buffer-als")
            .build(fs.clone())
    }

    fn als_trigger(fs: &Arc<MemSysfs>) -> Device {
        let dir = "/sys/bus/iio/devices/trigger1";
        fs.insert(format!("{dir}/name"), "als-dev1");
        Device::builder("iio", "trigger1")
            .sysfs_path(dir)
            .build(fs.clone())
    }

    fn ctx(fs: Arc<MemSysfs>, devices: Vec<Device>, dev_io: MemDeviceIo) -> DriverCtx {
        let (hotplug, _) = broadcast::channel(16);
        DriverCtx {
            sysfs: fs,
            dev_io: Arc::new(dev_io),
            catalog: Arc::new(MemCatalog { devices }),
            hotplug,
            config: Arc::new(ProxyConfig::default()),
        }
    }

    #[tokio::test]
    async fn test_discover_needs_proxy_type_property() {
        let fs = Arc::new(MemSysfs::new());
        let device = als_device(&fs);
        let trigger = als_trigger(&fs);
        let ctx = ctx(fs.clone(), vec![device.clone(), trigger], MemDeviceIo::new(vec![]));
        assert!(IioBufferLight.discover(&device, &ctx));

        let plain = Device::builder("iio", "iio:device1")
            .sysfs_path("/sys/bus/iio/devices/iio:device1")
            .build(fs.clone());
        assert!(!IioBufferLight.discover(&plain, &ctx));
    }

    #[tokio::test]
    async fn test_reports_scaled_lux_level() {
        let fs = Arc::new(MemSysfs::new());
        let device = als_device(&fs);
        let trigger = als_trigger(&fs);

        let record = 300u16.to_le_bytes().to_vec();
        let dev_io = MemDeviceIo::new(vec![Some(record)]);
        let ctx = ctx(fs.clone(), vec![device.clone(), trigger], dev_io);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = IioBufferLight.open(&device, &ctx, tx).await.unwrap();
        handle.set_polling(true).await;

        let reading = rx.recv().await.unwrap();
        assert_eq!(
            reading,
            Reading::Light {
                level: 150.0,
                uses_lux: true,
            }
        );
        handle.close().await;
    }
}
