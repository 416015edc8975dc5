//! Shared control-plane plumbing for IIO devices: sampling-frequency floor,
//! scan-channel enables, data-ready trigger selection and the kernel ring
//! buffer. Only the one active handle for a device ever writes these files.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::device::{Device, DeviceCatalog, DeviceIo};
use crate::errors::{SensorError, SensorResult};
use crate::scan::{enabled_channels, latest_record, BufferLayout};
use crate::sysfs::SysfsIo;

/// Floor for `*sampling_frequency` attributes, in Hz.
///
/// Some buffered devices default to 0Hz and never produce a reading; some
/// polled devices default to 1Hz and block raw reads waiting for a fresh
/// sample.
pub const MIN_SAMPLING_FREQUENCY: f64 = 10.0;

const RING_BUFFER_LENGTH: i64 = 128;

/// Raise every `*sampling_frequency` attribute below the floor to the floor.
pub fn fixup_sampling_frequency(sysfs: &dyn SysfsIo, device: &Device) {
    let dir = device.sysfs_path();
    let entries = match sysfs.list_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to open directory '{}': {}", dir.display(), e);
            return;
        }
    };

    for name in entries {
        if !name.ends_with("sampling_frequency") {
            continue;
        }
        let path = dir.join(&name);
        match sysfs.read_f64(&path) {
            Ok(freq) if freq >= MIN_SAMPLING_FREQUENCY => continue,
            Ok(_) | Err(_) => {}
        }
        if sysfs
            .write_int(&path, MIN_SAMPLING_FREQUENCY as i64)
            .is_err()
        {
            warn!("Could not fix sample-freq for {}", path.display());
        }
    }
}

/// Flip every `scan_elements/*_en` flag. Returns whether at least one channel
/// ended up in the requested state.
fn set_channels_enabled(sysfs: &dyn SysfsIo, device: &Device, enable: bool) -> bool {
    let scan_dir = device.sysfs_path().join("scan_elements");
    let entries = match sysfs.list_dir(&scan_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to open directory '{}': {}", scan_dir.display(), e);
            return false;
        }
    };

    let value = i64::from(enable);
    let mut any = false;
    for name in entries {
        if !name.ends_with("_en") {
            continue;
        }
        let path = scan_dir.join(&name);
        if sysfs.read_i64(&path).ok() == Some(value) {
            any = true;
            continue;
        }
        if sysfs.write_int(&path, value).is_err() {
            warn!("Could not toggle sensor channel {}", path.display());
            continue;
        }
        any = true;
        debug!("Toggled sensor channel {}", path.display());
    }

    if !any {
        warn!(
            "Failed to toggle any scan channels for device '{}'",
            device.sysfs_path().display()
        );
    }
    any
}

/// Look for the data-ready trigger paired with `device` by the
/// `<prefix>-dev<N>` name convention. Backends needing a ring buffer decline
/// discovery when this comes back `None`.
pub fn find_trigger(catalog: &dyn DeviceCatalog, device: &Device, prefix: &str) -> Option<String> {
    let number = device.number()?;
    let trigger_name = format!("{prefix}-dev{number}");

    for candidate in catalog.by_subsystem("iio") {
        if candidate.attr("name").as_deref() == Some(trigger_name.as_str()) {
            debug!(
                "Found associated trigger at {}",
                candidate.sysfs_path().display()
            );
            return Some(trigger_name);
        }
    }

    debug!(
        "Could not find trigger name associated with {}",
        device.sysfs_path().display()
    );
    None
}

/// An acquired kernel ring buffer: channels enabled, trigger selected,
/// buffer sized and enabled, layout planned. `release` undoes all of it.
pub struct BufferedScan {
    sysfs: Arc<dyn SysfsIo>,
    device: Device,
    dev_node: PathBuf,
    layout: BufferLayout,
    read_records: usize,
}

impl BufferedScan {
    pub fn acquire(
        sysfs: Arc<dyn SysfsIo>,
        device: &Device,
        trigger_name: &str,
        read_records: usize,
    ) -> SensorResult<Self> {
        let dir = device.sysfs_path();
        let setup_err = |reason: String| SensorError::Setup {
            device: device.kernel_name().to_string(),
            reason,
        };

        let dev_node = device
            .dev_node()
            .ok_or_else(|| setup_err("device has no data node".to_string()))?
            .to_path_buf();

        fixup_sampling_frequency(sysfs.as_ref(), device);

        if !set_channels_enabled(sysfs.as_ref(), device, true) {
            return Err(setup_err("could not enable any scan channels".to_string()));
        }

        // Set the device trigger to be the data ready trigger
        sysfs
            .write_string_verify(&dir.join("trigger/current_trigger"), trigger_name)
            .map_err(|e| setup_err(format!("could not select trigger: {e}")))?;

        // Setup ring buffer parameters, then enable the buffer
        sysfs
            .write_int(&dir.join("buffer/length"), RING_BUFFER_LENGTH)
            .map_err(|e| setup_err(format!("could not size ring buffer: {e}")))?;
        sysfs
            .write_int_verify(&dir.join("buffer/enable"), 1)
            .map_err(|e| setup_err(format!("could not enable ring buffer: {e}")))?;

        let channels = enabled_channels(sysfs.as_ref(), dir)?;
        if channels.is_empty() {
            return Err(SensorError::NoChannels {
                device: device.kernel_name().to_string(),
            });
        }
        let layout = BufferLayout::plan(channels)?;

        Ok(Self {
            sysfs,
            device: device.clone(),
            dev_node,
            layout,
            read_records,
        })
    }

    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    /// Read the newest complete scan record, if any.
    pub fn read_latest(&self, dev_io: &dyn DeviceIo) -> io::Result<Option<Vec<u8>>> {
        let record_size = self.layout.record_size() as usize;
        let max_len = record_size * self.read_records;
        let Some(chunk) = dev_io.read_chunk(&self.dev_node, max_len)? else {
            debug!("No new data available on '{}'", self.device.kernel_name());
            return Ok(None);
        };
        match latest_record(&chunk, record_size) {
            Some(record) => Ok(Some(record.to_vec())),
            None => {
                debug!(
                    "Not enough data to read (read_size: {} scan_size: {})",
                    chunk.len(),
                    record_size
                );
                Ok(None)
            }
        }
    }

    /// Disable the channels, stop the ring buffer and disconnect the
    /// trigger.
    pub fn release(&self) {
        let dir = self.device.sysfs_path();
        set_channels_enabled(self.sysfs.as_ref(), &self.device, false);
        let _ = self.sysfs.write_int(&dir.join("buffer/enable"), 0);
        // Disconnect the trigger - just write a dummy name.
        let _ = self
            .sysfs
            .write_string(&dir.join("trigger/current_trigger"), "NULL");
    }
}
