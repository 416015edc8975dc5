//! Platform light sensor exposed through the applesmc hwmon interface.
//! Levels come as a `(left,right)` pair and are reported in a vendor unit,
//! not lux.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::device::Device;
use crate::drivers::{DriverCtx, PollTask, ReadingSender, SensorDriver, SensorHandle};
use crate::errors::SensorResult;
use crate::readings::{Reading, SensorKind};
use crate::sysfs::SysfsIo;

const DEFAULT_POLL_TIME: Duration = Duration::from_secs(8);
const MAX_LIGHT_LEVEL: f64 = 255.0;

pub struct HwmonLight;

fn parse_light_pair(raw: &str) -> Option<(i32, i32)> {
    let inner = raw.trim().strip_prefix('(')?.strip_suffix(')')?;
    let (left, right) = inner.split_once(',')?;
    Some((left.trim().parse().ok()?, right.trim().parse().ok()?))
}

#[async_trait]
impl SensorDriver for HwmonLight {
    fn name(&self) -> &'static str {
        "HWMon Light sensor"
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Light
    }

    fn discover(&self, device: &Device, ctx: &DriverCtx) -> bool {
        if device.subsystem() != "platform" {
            return false;
        }
        if device.property("MODALIAS") != Some("platform:applesmc") {
            return false;
        }
        if !ctx.sysfs.exists(&device.sysfs_path().join("light")) {
            return false;
        }
        debug!("Found HWMon light at {}", device.sysfs_path().display());
        true
    }

    async fn open(
        &self,
        device: &Device,
        ctx: &DriverCtx,
        readings: ReadingSender,
    ) -> SensorResult<Box<dyn SensorHandle>> {
        Ok(Box::new(Handle {
            light_path: device.sysfs_path().join("light").into(),
            sysfs: ctx.sysfs.clone(),
            readings,
            poll: PollTask::idle(),
        }))
    }
}

struct Handle {
    light_path: std::path::PathBuf,
    sysfs: Arc<dyn SysfsIo>,
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

        let light_path = self.light_path.clone();
        let sysfs = self.sysfs.clone();
        let readings = self.readings.clone();
        self.poll.start(DEFAULT_POLL_TIME, move || {
            let raw = match sysfs.read_string(&light_path) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(
                        "Failed to read input level at {}: {}",
                        light_path.display(),
                        e
                    );
                    return;
                }
            };
            let Some((left, right)) = parse_light_pair(&raw) else {
                warn!("Failed to parse light level: {}", raw);
                return;
            };

            let level = f64::from(left.max(right)) / MAX_LIGHT_LEVEL * 100.0;
            let _ = readings.send(Reading::Light {
                level,
                uses_lux: false,
            });
        });
    }

    async fn close(mut self: Box<Self>) {
        self.poll.stop();
    }
}
