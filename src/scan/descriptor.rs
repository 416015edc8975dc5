use std::path::Path;

use tracing::{debug, warn};

use crate::errors::{SensorError, SensorResult};
use crate::sysfs::SysfsIo;

/// One physical scan channel, as described by the device itself.
///
/// Built once per successful device open and never mutated afterwards;
/// `location` is only meaningful after layout planning.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelDescriptor {
    pub name: String,
    pub generic_name: String,
    pub scale: f64,
    pub offset: f64,
    pub index: u32,
    pub is_signed: bool,
    pub bits_used: u8,
    pub storage_bytes: u8,
    pub shift: u8,
    pub mask: u64,
    pub big_endian: bool,
    pub location: u32,
}

/// Parsed `_type` descriptor: `<b|l>e:<s|u><bits>/<storage>>><shift>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanType {
    pub big_endian: bool,
    pub is_signed: bool,
    pub bits_used: u8,
    pub storage_bits: u8,
    pub shift: u8,
}

impl ScanType {
    pub fn mask(&self) -> u64 {
        if self.bits_used == 64 {
            u64::MAX
        } else {
            (1u64 << self.bits_used) - 1
        }
    }

    pub fn storage_bytes(&self) -> u8 {
        self.storage_bits / 8
    }
}

fn descriptor_err(channel: &str, reason: impl Into<String>) -> SensorError {
    SensorError::Descriptor {
        channel: channel.to_string(),
        reason: reason.into(),
    }
}

/// Parse the kernel's fixed-type description, e.g. `le:s12/16>>4`.
///
/// See `iio_show_fixed_type()` in the IIO core for the format.
pub fn parse_scan_type(channel: &str, raw: &str) -> SensorResult<ScanType> {
    let raw = raw.trim();
    let body = raw
        .strip_prefix("be:")
        .or_else(|| raw.strip_prefix("le:"))
        .ok_or_else(|| descriptor_err(channel, format!("bad endianness in {raw:?}")))?;
    let big_endian = raw.starts_with('b');

    let (sign, body) = body
        .split_at_checked(1)
        .ok_or_else(|| descriptor_err(channel, format!("truncated type {raw:?}")))?;
    let is_signed = match sign {
        "s" => true,
        "u" => false,
        _ => return Err(descriptor_err(channel, format!("bad sign char in {raw:?}"))),
    };

    let (bits, rest) = body
        .split_once('/')
        .ok_or_else(|| descriptor_err(channel, format!("missing storage width in {raw:?}")))?;
    let (storage, shift) = rest
        .split_once(">>")
        .ok_or_else(|| descriptor_err(channel, format!("missing shift in {raw:?}")))?;

    let bits_used: u8 = bits
        .parse()
        .map_err(|_| descriptor_err(channel, format!("bad bit count in {raw:?}")))?;
    let storage_bits: u8 = storage
        .parse()
        .map_err(|_| descriptor_err(channel, format!("bad storage width in {raw:?}")))?;
    let shift: u8 = shift
        .parse()
        .map_err(|_| descriptor_err(channel, format!("bad shift in {raw:?}")))?;

    if !matches!(storage_bits, 8 | 16 | 32 | 64) {
        return Err(descriptor_err(
            channel,
            format!("unsupported storage width {storage_bits}"),
        ));
    }
    if bits_used == 0 || bits_used > storage_bits {
        return Err(descriptor_err(
            channel,
            format!("{bits_used} used bits do not fit {storage_bits} storage bits"),
        ));
    }

    Ok(ScanType {
        big_endian,
        is_signed,
        bits_used,
        storage_bits,
        shift,
    })
}

/// Strip the trailing `_`-separated token: `in_accel_x` -> `in_accel`.
///
/// The generic name is what shared scale/offset attributes hang off.
pub fn generic_channel_name(name: &str) -> String {
    let generic = match name.rfind('_') {
        Some(idx) => &name[..idx],
        None => name,
    };
    // Rotation channels share their attributes under a shorter prefix.
    if generic == "in_rot_from_north_magnetic_tilt" {
        return "in_rot".to_string();
    }
    generic.to_string()
}

/// Read an optional per-channel float parameter (`scale`, `offset`), trying
/// the specific name first, then the generic one. Absence is fine; any other
/// failure is reported.
fn read_param(
    io: &dyn SysfsIo,
    device_dir: &Path,
    name: &str,
    generic_name: &str,
    param: &str,
) -> SensorResult<Option<f64>> {
    for base in [name, generic_name] {
        let path = device_dir.join(format!("{base}_{param}"));
        match io.read_f64(&path) {
            Ok(v) => return Ok(Some(v)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                warn!("Failed to read float from {}: {}", path.display(), e);
                return Err(e.into());
            }
        }
    }
    Ok(None)
}

fn read_scan_type(
    io: &dyn SysfsIo,
    scan_dir: &Path,
    name: &str,
    generic_name: &str,
) -> Option<SensorResult<ScanType>> {
    for base in [name, generic_name] {
        let path = scan_dir.join(format!("{base}_type"));
        if let Ok(raw) = io.read_string(&path) {
            return Some(parse_scan_type(name, &raw));
        }
    }
    None
}

/// Figure out what channels are present and enabled for a device, sorted by
/// their kernel-assigned index. Channels with a missing or malformed type
/// descriptor are excluded; hard attribute read failures abort the device.
pub fn enabled_channels(
    io: &dyn SysfsIo,
    device_dir: &Path,
) -> SensorResult<Vec<ChannelDescriptor>> {
    let scan_dir = device_dir.join("scan_elements");
    let entries = io.list_dir(&scan_dir)?;

    let mut channels = Vec::new();
    for entry in entries {
        let Some(name) = entry.strip_suffix("_en") else {
            continue;
        };
        match io.read_i64(&scan_dir.join(&entry)) {
            Ok(enabled) if enabled != 0 => {}
            _ => continue,
        }

        let generic_name = generic_channel_name(name);
        let index = io.read_i64(&scan_dir.join(format!("{name}_index")))? as u32;

        let scale = read_param(io, device_dir, name, &generic_name, "scale")?.unwrap_or(1.0);
        let offset = read_param(io, device_dir, name, &generic_name, "offset")?.unwrap_or(0.0);

        let scan_type = match read_scan_type(io, &scan_dir, name, &generic_name) {
            Some(Ok(t)) => t,
            Some(Err(e)) => {
                warn!("Could not parse name {}, generic name {}: {}", name, generic_name, e);
                continue;
            }
            None => {
                warn!("Could not parse name {}, generic name {}: missing type", name, generic_name);
                continue;
            }
        };

        debug!(
            "Got type for {}: is signed: {}, bytes: {}, bits_used: {}, shift: {}, mask: {:#x}, be: {}",
            name,
            scan_type.is_signed,
            scan_type.storage_bytes(),
            scan_type.bits_used,
            scan_type.shift,
            scan_type.mask(),
            scan_type.big_endian
        );

        channels.push(ChannelDescriptor {
            name: name.to_string(),
            generic_name,
            scale,
            offset,
            index,
            is_signed: scan_type.is_signed,
            bits_used: scan_type.bits_used,
            storage_bytes: scan_type.storage_bytes(),
            shift: scan_type.shift,
            mask: scan_type.mask(),
            big_endian: scan_type.big_endian,
            location: 0,
        });
    }

    channels.sort_by_key(|c| c.index);
    Ok(channels)
}
