// Public modules
pub mod config;
pub mod coordinator;
pub mod device;
pub mod drivers;
pub mod errors;
pub mod orientation;
pub mod readings;
pub mod scan;
pub mod sysfs;
pub mod transform;

// Re-export commonly used types
pub use config::ProxyConfig;
pub use coordinator::{Coordinator, CoordinatorHandle};
pub use errors::{SensorError, SensorResult};
pub use orientation::Orientation;
pub use readings::{ProxyState, Reading, SensorKind};

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::device::{DeviceCatalog, DeviceIo, LinuxDeviceIo, SysfsCatalog};
use crate::readings::PropertyUpdate;
use crate::sysfs::{LinuxSysfs, SysfsIo};

/// Initialize tracing with RUST_LOG environment variable support
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
}

/// Bring the daemon up against the real sysfs and run it until the last
/// sensor disappears or the process is interrupted.
pub async fn run_daemon() -> Result<(), Box<dyn std::error::Error>> {
    info!("[sensor-proxyd] starting up...");

    let config = Arc::new(ProxyConfig::from_env()?);

    let sysfs: Arc<dyn SysfsIo> = Arc::new(LinuxSysfs::new());
    let dev_io: Arc<dyn DeviceIo> = Arc::new(LinuxDeviceIo::new());
    let catalog: Arc<dyn DeviceCatalog> = Arc::new(SysfsCatalog::new(sysfs.clone()));

    let (mut coordinator, handle) =
        Coordinator::new(sysfs, dev_io, catalog, config, drivers::all_drivers());

    if !coordinator.start().await {
        info!("[coordinator] could not find any supported sensors");
        return Ok(());
    }

    // Log property changes the way a monitoring client would see them.
    let mut updates = handle.subscribe();
    tokio::spawn(async move {
        while let Ok(update) = updates.recv().await {
            match update {
                PropertyUpdate::Presence { kind, present } => {
                    info!("[proxy] {}: {}", kind, if present { "present" } else { "gone" });
                }
                PropertyUpdate::Orientation { orientation } => {
                    info!("[proxy] accelerometer orientation changed: {}", orientation);
                }
                PropertyUpdate::LightLevel { level, unit } => {
                    info!("[proxy] light level changed: {} ({})", level, unit.as_str());
                }
                PropertyUpdate::CompassHeading { degrees } => {
                    info!("[proxy] compass heading changed: {}", degrees);
                }
            }
        }
    });

    // Until a bus surface claims the sensors, the built-in monitor does, so
    // the drivers actually poll. Runs once the coordinator loop is live.
    let monitor = handle.clone();
    tokio::spawn(async move {
        let Some(state) = monitor.snapshot().await else {
            return;
        };
        if let Ok(json) = state.to_json() {
            info!("[proxy] initial state: {}", json);
        }
        if state.has_accelerometer {
            monitor.claim(SensorKind::Accelerometer, "monitor").await;
        }
        if state.has_ambient_light {
            monitor.claim(SensorKind::Light, "monitor").await;
        }
        if state.has_compass {
            monitor.claim(SensorKind::Compass, "monitor").await;
        }
    });

    tokio::select! {
        _ = coordinator.run() => {
            info!("[sensor-proxyd] no sensors to watch, exiting");
        }
        _ = tokio::signal::ctrl_c() => {
            handle.client_gone("monitor");
            info!("[sensor-proxyd] interrupted, shutting down");
        }
    }

    Ok(())
}
