//! Synthetic light sensor: a deterministic 1 lux/second ramp, for
//! exercising the coordinator and claim logic without hardware.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::device::Device;
use crate::drivers::{DriverCtx, PollTask, ReadingSender, SensorDriver, SensorHandle};
use crate::errors::SensorResult;
use crate::readings::{Reading, SensorKind};

pub struct FakeLight;

#[async_trait]
impl SensorDriver for FakeLight {
    fn name(&self) -> &'static str {
        "Fake light"
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Light
    }

    fn discover(&self, device: &Device, ctx: &DriverCtx) -> bool {
        if !ctx.config.fake_light_enabled() {
            return false;
        }
        if device.subsystem() != "input" {
            return false;
        }
        // any input device will do as an anchor, except the lid switch
        if device.property("NAME") == Some("\"Lid Switch\"") {
            return false;
        }
        debug!("Found fake light at {}", device.sysfs_path().display());
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
        let mut level = -1.0;
        self.poll.start(Duration::from_secs(1), move || {
            level += 1.0;
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
