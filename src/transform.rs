use tracing::{debug, warn};

use crate::device::Device;
use crate::errors::{SensorError, SensorResult};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// A fixed 3x3 rotation correcting for the sensor's physical mounting
/// orientation relative to the device-canonical axes.
///
/// The textual format is the one the IIO core uses to export the values:
/// nine floats, row-major, comma-separated columns, semicolon-separated rows.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MountMatrix {
    rows: [[f32; 3]; 3],
}

impl Default for MountMatrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl MountMatrix {
    pub const IDENTITY: Self = Self {
        rows: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
    };

    /// Parse a mount matrix string. The empty string means identity.
    pub fn parse(raw: &str) -> SensorResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Self::IDENTITY);
        }

        let err = |reason: &str| SensorError::MountMatrix {
            raw: raw.to_string(),
            reason: reason.to_string(),
        };

        let mut rows = [[0.0f32; 3]; 3];
        let row_strs: Vec<&str> = raw.split(';').collect();
        if row_strs.len() != 3 {
            return Err(err("expected three rows"));
        }
        for (i, row_str) in row_strs.iter().enumerate() {
            let cols: Vec<&str> = row_str.split(',').collect();
            if cols.len() != 3 {
                return Err(err("expected three columns per row"));
            }
            for (j, col) in cols.iter().enumerate() {
                rows[i][j] = col
                    .trim()
                    .parse()
                    .map_err(|_| err("not a decimal float"))?;
            }
        }

        if rows[2] == [0.0, 0.0, 0.0] {
            warn!("mount matrix '{}' has an all-zero third row", raw);
            return Err(err("all-zero third row"));
        }

        Ok(Self { rows })
    }

    /// Rotate `v` in place: `out[i] = sum_j(in[j] * M[i][j])`.
    pub fn apply(&self, v: &mut Vec3) {
        let m = &self.rows;
        let x = v.x * m[0][0] + v.y * m[0][1] + v.z * m[0][2];
        let y = v.x * m[1][0] + v.y * m[1][1] + v.z * m[1][2];
        let z = v.x * m[2][0] + v.y * m[2][1] + v.z * m[2][2];
        v.x = x;
        v.y = y;
        v.z = z;
    }

    /// Mount matrix for a device: the `ACCEL_MOUNT_MATRIX` property, then the
    /// `in_accel_mount_matrix` sysfs attribute, else identity. A malformed
    /// matrix is never partially applied; the caller gets identity.
    pub fn for_device(device: &Device) -> Self {
        let raw = device
            .property("ACCEL_MOUNT_MATRIX")
            .map(str::to_string)
            .or_else(|| device.attr("in_accel_mount_matrix"));
        let Some(raw) = raw else {
            debug!("no mount matrix for {:?}, using identity", device);
            return Self::IDENTITY;
        };
        match Self::parse(&raw) {
            Ok(matrix) => matrix,
            Err(e) => {
                warn!("Failed to parse '{}' as a mount matrix: {}", raw, e);
                Self::IDENTITY
            }
        }
    }
}

/// Where the accelerometer sits in the chassis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AccelLocation {
    #[default]
    Display,
    Base,
}

impl AccelLocation {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "" | "display" | "lid" => Some(Self::Display),
            "base" => Some(Self::Base),
            _ => None,
        }
    }

    /// Location from the `ACCEL_LOCATION` property, then the `location`
    /// sysfs attribute, defaulting to the display.
    pub fn for_device(device: &Device) -> Self {
        for raw in [
            device.property("ACCEL_LOCATION").map(str::to_string),
            device.attr("location"),
        ]
        .into_iter()
        .flatten()
        {
            match Self::parse(&raw) {
                Some(location) => return location,
                None => warn!("Failed to parse '{}' as a location", raw),
            }
        }
        debug!("No auto-detected location, falling back to display location");
        Self::Display
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Display => "display",
            Self::Base => "base",
        }
    }
}

/// Accelerometer scale: `in_accel_scale`, then `scale`, else 1.0. A zero
/// value counts as missing.
pub fn accel_scale(device: &Device) -> f64 {
    for attr in ["in_accel_scale", "scale"] {
        if let Some(scale) = device.attr_f64(attr) {
            if scale != 0.0 {
                debug!("Attribute {} ('{}') found on sysfs", attr, scale);
                return scale;
            }
        }
    }
    debug!("Failed to auto-detect scale, falling back to 1.0");
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sysfs::mem::MemSysfs;
    use std::sync::Arc;

    #[test]
    fn test_identity_law() {
        let mut v = Vec3::new(1.5, -2.5, 42.0);
        let original = v;
        MountMatrix::IDENTITY.apply(&mut v);
        assert_eq!(v, original);
    }

    #[test]
    fn test_swap_y_z_matrix() {
        let m = MountMatrix::parse("1, 0, 0; 0, 0, 1; 0, 1, 0").unwrap();
        let mut v = Vec3::new(0.0, -256.0, 0.0);
        m.apply(&mut v);
        assert_eq!(v, Vec3::new(0.0, 0.0, -256.0));
    }

    #[test]
    fn test_empty_string_is_identity() {
        assert_eq!(MountMatrix::parse("").unwrap(), MountMatrix::IDENTITY);
    }

    #[test]
    fn test_malformed_matrices_rejected() {
        for raw in [
            "1, 0, 0; 0, 1, 0",
            "1, 0; 0, 1; 0, 0",
            "a, 0, 0; 0, 1, 0; 0, 0, 1",
            "1, 0, 0, 0; 0, 1, 0; 0, 0, 1",
        ] {
            assert!(MountMatrix::parse(raw).is_err(), "accepted {raw:?}");
        }
    }

    #[test]
    fn test_all_zero_third_row_rejected() {
        assert!(MountMatrix::parse("1, 0, 0; 0, 1, 0; 0, 0, 0").is_err());
        // other degenerate matrices are left alone
        assert!(MountMatrix::parse("0, 0, 0; 0, 0, 0; 0, 0, 1").is_ok());
    }

    fn device_with_attrs(attrs: &[(&str, &str)]) -> Device {
        let fs = Arc::new(MemSysfs::new());
        for (name, value) in attrs {
            fs.insert(format!("/sys/devices/sensor/{name}"), *value);
        }
        Device::builder("iio", "iio:device0")
            .sysfs_path("/sys/devices/sensor")
            .build(fs)
    }

    #[test]
    fn test_matrix_for_device_falls_back_to_identity() {
        let dev = device_with_attrs(&[("in_accel_mount_matrix", "garbage")]);
        assert_eq!(MountMatrix::for_device(&dev), MountMatrix::IDENTITY);

        let dev = device_with_attrs(&[]);
        assert_eq!(MountMatrix::for_device(&dev), MountMatrix::IDENTITY);
    }

    #[test]
    fn test_location_parsing() {
        assert_eq!(AccelLocation::parse("lid"), Some(AccelLocation::Display));
        assert_eq!(AccelLocation::parse("base"), Some(AccelLocation::Base));
        assert_eq!(AccelLocation::parse("roof"), None);

        let dev = device_with_attrs(&[("location", "base")]);
        assert_eq!(AccelLocation::for_device(&dev), AccelLocation::Base);
        let dev = device_with_attrs(&[("location", "roof")]);
        assert_eq!(AccelLocation::for_device(&dev), AccelLocation::Display);
    }

    #[test]
    fn test_accel_scale_fallbacks() {
        let dev = device_with_attrs(&[("in_accel_scale", "0.019")]);
        assert_eq!(accel_scale(&dev), 0.019);
        let dev = device_with_attrs(&[("in_accel_scale", "0.0"), ("scale", "0.5")]);
        assert_eq!(accel_scale(&dev), 0.5);
        let dev = device_with_attrs(&[]);
        assert_eq!(accel_scale(&dev), 1.0);
    }
}
