//! Raw-attribute polling accelerometer backend, for devices without a ring
//! buffer or trigger. Reads the `in_accel_*_raw` text attributes on a timer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::device::Device;
use crate::drivers::iio::fixup_sampling_frequency;
use crate::drivers::{DriverCtx, PollTask, ReadingSender, SensorDriver, SensorHandle};
use crate::errors::SensorResult;
use crate::readings::{Reading, SensorKind};
use crate::sysfs::SysfsIo;
use crate::transform::{accel_scale, AccelLocation, MountMatrix, Vec3};

/// Known polled accelerometer that never grew buffer support.
const QUIRK_MODEL: &str = "i2c-SMO8500:00";

pub struct IioPollAccel;

#[async_trait]
impl SensorDriver for IioPollAccel {
    fn name(&self) -> &'static str {
        "IIO Poll accelerometer"
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Accelerometer
    }

    fn discover(&self, device: &Device, _ctx: &DriverCtx) -> bool {
        let selected = device.property("IIO_SENSOR_PROXY_TYPE") == Some("iio-poll-accel")
            || device.attr("name").as_deref() == Some(QUIRK_MODEL);
        if !selected {
            return false;
        }
        debug!(
            "Found polling accelerometer at {}",
            device.sysfs_path().display()
        );
        true
    }

    async fn open(
        &self,
        device: &Device,
        ctx: &DriverCtx,
        readings: ReadingSender,
    ) -> SensorResult<Box<dyn SensorHandle>> {
        // Polled devices idling at 1Hz block every raw read for up to a
        // second; raise them to the floor before the first poll.
        fixup_sampling_frequency(ctx.sysfs.as_ref(), device);
        debug!(
            "Accelerometer mounted in the {}",
            AccelLocation::for_device(device).as_str()
        );

        Ok(Box::new(Handle {
            device: device.clone(),
            sysfs: ctx.sysfs.clone(),
            scale: accel_scale(device),
            matrix: MountMatrix::for_device(device),
            readings,
            period: ctx.config.poll.interval(),
            poll: PollTask::idle(),
        }))
    }
}

struct Handle {
    device: Device,
    sysfs: Arc<dyn SysfsIo>,
    scale: f64,
    matrix: MountMatrix,
    readings: ReadingSender,
    period: Duration,
    poll: PollTask,
}

fn read_axis(sysfs: &dyn SysfsIo, device: &Device, attribute: &str) -> i32 {
    sysfs
        .read_i64(&device.sysfs_path().join(attribute))
        .map(|v| v as i32)
        .unwrap_or(0)
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

        let device = self.device.clone();
        let sysfs = self.sysfs.clone();
        let scale = self.scale;
        let matrix = self.matrix;
        let readings = self.readings.clone();
        self.poll.start(self.period, move || {
            let mut v = Vec3::new(
                read_axis(sysfs.as_ref(), &device, "in_accel_x_raw") as f32,
                read_axis(sysfs.as_ref(), &device, "in_accel_y_raw") as f32,
                read_axis(sysfs.as_ref(), &device, "in_accel_z_raw") as f32,
            );
            matrix.apply(&mut v);
            debug!(
                "Accel read from polled IIO (mount corrected): {}, {}, {} (scale {})",
                v.x, v.y, v.z, scale
            );

            let _ = readings.send(Reading::Accel {
                x: v.x.round() as i32,
                y: v.y.round() as i32,
                z: v.z.round() as i32,
                scale,
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

    fn polled_device(fs: &Arc<MemSysfs>) -> Device {
        let dir = "/sys/bus/iio/devices/iio:device2";
        fs.insert(format!("{dir}/name"), QUIRK_MODEL);
        fs.insert(format!("{dir}/sampling_frequency"), "1");
        fs.insert(format!("{dir}/in_accel_scale"), "0.019");
        fs.insert(format!("{dir}/in_accel_x_raw"), "0");
        fs.insert(format!("{dir}/in_accel_y_raw"), "-256");
        fs.insert(format!("{dir}/in_accel_z_raw"), "0");
        Device::builder("iio", "iio:device2")
            .sysfs_path(dir)
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
    async fn test_discover_by_model_or_selection_property() {
        let fs = Arc::new(MemSysfs::new());
        let quirk = polled_device(&fs);
        let ctx = ctx(fs.clone());
        assert!(IioPollAccel.discover(&quirk, &ctx));

        let selected = Device::builder("iio", "iio:device3")
            .sysfs_path("/sys/bus/iio/devices/iio:device3")
            .property("IIO_SENSOR_PROXY_TYPE", "iio-poll-accel")
            .build(fs.clone());
        assert!(IioPollAccel.discover(&selected, &ctx));

        let other = Device::builder("iio", "iio:device4")
            .sysfs_path("/sys/bus/iio/devices/iio:device4")
            .build(fs.clone());
        assert!(!IioPollAccel.discover(&other, &ctx));
    }

    #[tokio::test]
    async fn test_open_raises_sampling_floor_and_polls_raw_attrs() {
        let fs = Arc::new(MemSysfs::new());
        let device = polled_device(&fs);
        let ctx = ctx(fs.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = IioPollAccel.open(&device, &ctx, tx).await.unwrap();
        assert_eq!(
            fs.get("/sys/bus/iio/devices/iio:device2/sampling_frequency")
                .unwrap(),
            "10"
        );

        handle.set_polling(true).await;
        let reading = rx.recv().await.unwrap();
        assert_eq!(
            reading,
            Reading::Accel {
                x: 0,
                y: -256,
                z: 0,
                scale: 0.019,
            }
        );
        handle.close().await;
    }
}
