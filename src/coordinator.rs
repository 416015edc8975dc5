//! The sensor coordinator: owns one active driver handle per sensor kind,
//! fans hotplug events out, folds driver readings into the published
//! property set and reference-counts consumer claims so that expensive
//! polling only runs while somebody is listening.
//!
//! Everything mutable lives inside the single [`Coordinator::run`] loop;
//! consumers talk to it through the cloneable [`CoordinatorHandle`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::ProxyConfig;
use crate::device::{Device, DeviceAction, DeviceCatalog, DeviceEvent, DeviceIo};
use crate::drivers::{DriverCtx, ReadingSender, SensorDriver, SensorHandle};
use crate::orientation::{classify, Orientation};
use crate::readings::{LightUnit, PropertyUpdate, ProxyState, Reading, SensorKind};
use crate::sysfs::SysfsIo;

struct ActiveSensor {
    driver_name: &'static str,
    device: Device,
    handle: Box<dyn SensorHandle>,
}

enum Command {
    Claim {
        kind: SensorKind,
        client: String,
        reply: oneshot::Sender<()>,
    },
    Release {
        kind: SensorKind,
        client: String,
        reply: oneshot::Sender<()>,
    },
    ClientGone {
        client: String,
    },
    Snapshot {
        reply: oneshot::Sender<ProxyState>,
    },
}

/// Consumer-facing side of the coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::UnboundedSender<Command>,
    updates: broadcast::Sender<PropertyUpdate>,
    hotplug: broadcast::Sender<DeviceEvent>,
}

impl CoordinatorHandle {
    /// Register interest in a sensor kind. Idempotent per client; polling
    /// starts on the first claim.
    pub async fn claim(&self, kind: SensorKind, client: &str) {
        let (reply, done) = oneshot::channel();
        if self
            .commands
            .send(Command::Claim {
                kind,
                client: client.to_string(),
                reply,
            })
            .is_ok()
        {
            let _ = done.await;
        }
    }

    /// Drop a client's interest. Polling stops when the last claim goes.
    pub async fn release(&self, kind: SensorKind, client: &str) {
        let (reply, done) = oneshot::channel();
        if self
            .commands
            .send(Command::Release {
                kind,
                client: client.to_string(),
                reply,
            })
            .is_ok()
        {
            let _ = done.await;
        }
    }

    /// A client disappeared without releasing; treated as a release of
    /// everything it claimed.
    pub fn client_gone(&self, client: &str) {
        let _ = self.commands.send(Command::ClientGone {
            client: client.to_string(),
        });
    }

    pub async fn snapshot(&self) -> Option<ProxyState> {
        let (reply, state) = oneshot::channel();
        self.commands.send(Command::Snapshot { reply }).ok()?;
        state.await.ok()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PropertyUpdate> {
        self.updates.subscribe()
    }

    /// Inject a hotplug notification. The embedding service feeds its udev
    /// stream in here.
    pub fn announce(&self, event: DeviceEvent) {
        let _ = self.hotplug.send(event);
    }
}

pub struct Coordinator {
    ctx: DriverCtx,
    drivers: Vec<Arc<dyn SensorDriver>>,
    active: HashMap<SensorKind, ActiveSensor>,
    claims: HashMap<SensorKind, HashSet<String>>,
    state: ProxyState,
    readings_tx: ReadingSender,
    readings_rx: mpsc::UnboundedReceiver<Reading>,
    hotplug_rx: broadcast::Receiver<DeviceEvent>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    updates: broadcast::Sender<PropertyUpdate>,
}

impl Coordinator {
    pub fn new(
        sysfs: Arc<dyn SysfsIo>,
        dev_io: Arc<dyn DeviceIo>,
        catalog: Arc<dyn DeviceCatalog>,
        config: Arc<ProxyConfig>,
        drivers: Vec<Arc<dyn SensorDriver>>,
    ) -> (Self, CoordinatorHandle) {
        let (hotplug, hotplug_rx) = broadcast::channel(64);
        let (readings_tx, readings_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(64);

        let ctx = DriverCtx {
            sysfs,
            dev_io,
            catalog,
            hotplug: hotplug.clone(),
            config,
        };

        let handle = CoordinatorHandle {
            commands: commands_tx,
            updates: updates.clone(),
            hotplug,
        };

        (
            Self {
                ctx,
                drivers,
                active: HashMap::new(),
                claims: HashMap::new(),
                state: ProxyState::default(),
                readings_tx,
                readings_rx,
                hotplug_rx,
                commands_rx,
                updates,
            },
            handle,
        )
    }

    /// Startup scan: probe every enumerable device against the driver list.
    /// Returns whether any sensor was brought up.
    pub async fn start(&mut self) -> bool {
        let mut devices = Vec::new();
        for subsystem in ["iio", "input", "platform"] {
            devices.extend(self.ctx.catalog.by_subsystem(subsystem));
        }

        for device in devices {
            if SensorKind::ALL.iter().all(|k| self.active.contains_key(k)) {
                break;
            }
            self.adopt_device(&device).await;
        }

        !self.active.is_empty()
    }

    /// The event loop. Runs until no sensors are left.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                Some(reading) = self.readings_rx.recv() => {
                    self.handle_reading(reading);
                }
                event = self.hotplug_rx.recv() => match event {
                    Ok(event) => {
                        self.handle_hotplug(event).await;
                        if self.active.is_empty() {
                            info!("No sensors left, shutting down");
                            return;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Dropped {} hotplug events", missed);
                    }
                    Err(RecvError::Closed) => return,
                },
                Some(command) = self.commands_rx.recv() => {
                    self.handle_command(command).await;
                }
                else => return,
            }
        }
    }

    /// Probe one device against every driver whose kind is still vacant;
    /// per kind, the first backend that discovers and opens it wins. One
    /// physical device may end up serving more than one kind.
    async fn adopt_device(&mut self, device: &Device) -> bool {
        let mut adopted = false;
        let drivers = self.drivers.clone();
        for driver in drivers {
            let kind = driver.kind();
            if self.active.contains_key(&kind) {
                continue;
            }
            if !driver.discover(device, &self.ctx) {
                continue;
            }
            debug!(
                "Found device {} of type {} at {}",
                device.sysfs_path().display(),
                kind,
                driver.name()
            );

            match driver.open(device, &self.ctx, self.readings_tx.clone()).await {
                Ok(mut handle) => {
                    // claims may predate the device; resume polling at once
                    if self.has_claims(kind) {
                        handle.set_polling(true).await;
                    }
                    self.active.insert(
                        kind,
                        ActiveSensor {
                            driver_name: driver.name(),
                            device: device.clone(),
                            handle,
                        },
                    );
                    self.set_presence(kind, true);
                    adopted = true;
                }
                Err(e) => {
                    // fall through to the next candidate backend
                    warn!(
                        "Could not open {} for {}: {}",
                        driver.name(),
                        device.sysfs_path().display(),
                        e
                    );
                }
            }
        }
        adopted
    }

    fn has_claims(&self, kind: SensorKind) -> bool {
        self.claims.get(&kind).is_some_and(|c| !c.is_empty())
    }

    fn publish(&self, update: PropertyUpdate) {
        // no subscribers is fine
        let _ = self.updates.send(update);
    }

    fn set_presence(&mut self, kind: SensorKind, present: bool) {
        match kind {
            SensorKind::Accelerometer => {
                self.state.has_accelerometer = present;
                if !present {
                    self.state.orientation = Orientation::Undefined;
                }
            }
            SensorKind::Light => self.state.has_ambient_light = present,
            SensorKind::Compass => self.state.has_compass = present,
        }
        self.publish(PropertyUpdate::Presence { kind, present });

        // send the current value along when the sensor appears
        if present {
            match kind {
                SensorKind::Accelerometer => self.publish(PropertyUpdate::Orientation {
                    orientation: self.state.orientation,
                }),
                SensorKind::Light => self.publish(PropertyUpdate::LightLevel {
                    level: self.state.light_level,
                    unit: self.state.light_level_unit,
                }),
                SensorKind::Compass => self.publish(PropertyUpdate::CompassHeading {
                    degrees: self.state.compass_heading,
                }),
            }
        }
    }

    fn handle_reading(&mut self, reading: Reading) {
        if !self.active.contains_key(&reading.kind()) {
            return;
        }
        match reading {
            Reading::Accel { x, y, z, scale } => {
                debug!("Accel sent by driver: {}, {}, {} (scale: {})", x, y, z, scale);
                let orientation = classify(self.state.orientation, x, y, z, scale);
                if orientation != self.state.orientation {
                    let previous = self.state.orientation;
                    self.state.orientation = orientation;
                    self.publish(PropertyUpdate::Orientation { orientation });
                    debug!(
                        "Emitted orientation changed: from {} to {}",
                        previous, orientation
                    );
                }
            }
            Reading::Light { level, uses_lux } => {
                let unit = LightUnit::from_uses_lux(uses_lux);
                debug!("Light level sent by driver: {} (unit: {})", level, unit.as_str());
                if self.state.light_level != level || self.state.light_level_unit != unit {
                    self.state.light_level = level;
                    self.state.light_level_unit = unit;
                    self.publish(PropertyUpdate::LightLevel { level, unit });
                }
            }
            Reading::Heading { degrees } => {
                debug!("Heading sent by driver: {} degrees", degrees);
                if self.state.compass_heading != degrees {
                    self.state.compass_heading = degrees;
                    self.publish(PropertyUpdate::CompassHeading { degrees });
                }
            }
        }
    }

    async fn handle_hotplug(&mut self, event: DeviceEvent) {
        match event.action {
            DeviceAction::Removed => {
                let removed: Vec<SensorKind> = self
                    .active
                    .iter()
                    .filter(|(_, active)| {
                        active.device.sysfs_path() == event.device.sysfs_path()
                    })
                    .map(|(kind, _)| *kind)
                    .collect();

                for kind in removed {
                    if let Some(active) = self.active.remove(&kind) {
                        info!(
                            "Sensor type {} got removed ({} at {})",
                            kind,
                            active.driver_name,
                            active.device.sysfs_path().display()
                        );
                        active.handle.close().await;
                    }
                    // clients must claim again after a re-plug
                    self.claims.remove(&kind);
                    self.set_presence(kind, false);
                }
            }
            DeviceAction::Added => {
                self.adopt_device(&event.device).await;
            }
            // change notifications are consumed by the input driver directly
            DeviceAction::Changed => {}
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Claim { kind, client, reply } => {
                debug!("Handling claim of {} device from {}", kind, client);
                let clients = self.claims.entry(kind).or_default();
                let first = clients.insert(client) && clients.len() == 1;
                if first {
                    if let Some(active) = self.active.get_mut(&kind) {
                        active.handle.set_polling(true).await;
                    }
                }
                let _ = reply.send(());
            }
            Command::Release { kind, client, reply } => {
                debug!("Handling release of {} device from {}", kind, client);
                self.release_client(kind, &client).await;
                let _ = reply.send(());
            }
            Command::ClientGone { client } => {
                for kind in SensorKind::ALL {
                    self.release_client(kind, &client).await;
                }
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.state.clone());
            }
        }
    }

    async fn release_client(&mut self, kind: SensorKind, client: &str) {
        let Some(clients) = self.claims.get_mut(&kind) else {
            return;
        };
        if clients.remove(client) && clients.is_empty() {
            if let Some(active) = self.active.get_mut(&kind) {
                active.handle.set_polling(false).await;
            }
        }
    }
}
