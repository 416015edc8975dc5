//! Buffered-binary accelerometer backend: decodes `in_accel_*` channels out
//! of the kernel ring buffer on a timer and reports mount-corrected raw
//! values plus their scale.

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
use crate::transform::{AccelLocation, MountMatrix, Vec3};

const DEVICE_NAME: &str = "accel_3d";

pub struct IioBufferAccel;

#[async_trait]
impl SensorDriver for IioBufferAccel {
    fn name(&self) -> &'static str {
        "IIO Buffer accelerometer"
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Accelerometer
    }

    fn discover(&self, device: &Device, ctx: &DriverCtx) -> bool {
        if device.subsystem() != "iio" || device.attr("name").as_deref() != Some(DEVICE_NAME) {
            return false;
        }
        // No data-ready trigger means no ring buffer; let a polled backend
        // pick the device up instead.
        if find_trigger(ctx.catalog.as_ref(), device, DEVICE_NAME).is_none() {
            return false;
        }
        debug!("Found {} at {}", DEVICE_NAME, device.sysfs_path().display());
        true
    }

    async fn open(
        &self,
        device: &Device,
        ctx: &DriverCtx,
        readings: ReadingSender,
    ) -> SensorResult<Box<dyn SensorHandle>> {
        let trigger_name = find_trigger(ctx.catalog.as_ref(), device, DEVICE_NAME).ok_or(
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
        debug!(
            "Accelerometer mounted in the {}",
            AccelLocation::for_device(device).as_str()
        );

        Ok(Box::new(Handle {
            scan: Arc::new(scan),
            matrix: MountMatrix::for_device(device),
            dev_io: ctx.dev_io.clone(),
            readings,
            period: ctx.config.poll.interval(),
            poll: PollTask::idle(),
        }))
    }
}

struct Handle {
    scan: Arc<BufferedScan>,
    matrix: MountMatrix,
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
        let matrix = self.matrix;
        let dev_io = self.dev_io.clone();
        let readings = self.readings.clone();
        self.poll.start(self.period, move || {
            let record = match scan.read_latest(dev_io.as_ref()) {
                Ok(Some(record)) => record,
                Ok(None) => return,
                Err(e) => {
                    warn!("Couldn't read from device: {}", e);
                    return;
                }
            };

            let x = decode(&record, scan.layout(), "in_accel_x");
            let y = decode(&record, scan.layout(), "in_accel_y");
            let z = decode(&record, scan.layout(), "in_accel_z");
            if !(x.present && y.present && z.present) {
                return;
            }

            let mut v = Vec3::new(x.value as f32, y.value as f32, z.value as f32);
            matrix.apply(&mut v);
            debug!(
                "Accel read from IIO (mount corrected): {}, {}, {} (scale {})",
                v.x, v.y, v.z, x.scale
            );

            let _ = readings.send(Reading::Accel {
                x: v.x.round() as i32,
                y: v.y.round() as i32,
                z: v.z.round() as i32,
                scale: x.scale,
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
    use crate::drivers::iio::tests::{accel_3d_device, accel_trigger_device, MemCatalog, MemDeviceIo};
    use crate::sysfs::mem::MemSysfs;
    use tokio::sync::{broadcast, mpsc};

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
    async fn test_discover_requires_name_and_trigger() {
        let fs = Arc::new(MemSysfs::new());
        let device = accel_3d_device(&fs);
        let trigger = accel_trigger_device(&fs);

        let without_trigger = ctx(fs.clone(), vec![device.clone()], MemDeviceIo::new(vec![]));
        assert!(!IioBufferAccel.discover(&device, &without_trigger));

        let with_trigger = ctx(
            fs.clone(),
            vec![device.clone(), trigger],
            MemDeviceIo::new(vec![]),
        );
        assert!(IioBufferAccel.discover(&device, &with_trigger));
    }

    #[tokio::test]
    async fn test_polls_decode_and_close_releases() {
        let fs = Arc::new(MemSysfs::new());
        let device = accel_3d_device(&fs);
        let trigger = accel_trigger_device(&fs);

        // one record: x=-256, y=0, z=10 as s16 stored in 32 bits
        let mut record = vec![0u8; 12];
        record[0..4].copy_from_slice(&(-256i32 as u32 & 0xffff).to_le_bytes());
        record[8..12].copy_from_slice(&10u32.to_le_bytes());
        let dev_io = MemDeviceIo::new(vec![Some(record)]);

        let ctx = ctx(fs.clone(), vec![device.clone(), trigger], dev_io);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = IioBufferAccel.open(&device, &ctx, tx).await.unwrap();

        handle.set_polling(true).await;
        let reading = rx.recv().await.unwrap();
        assert_eq!(
            reading,
            Reading::Accel {
                x: -256,
                y: 0,
                z: 10,
                scale: 0.038324,
            }
        );

        handle.close().await;
        assert_eq!(
            fs.get("/sys/bus/iio/devices/iio:device0/buffer/enable").unwrap(),
            "0"
        );
    }
}
