use serde::{Deserialize, Serialize};
use std::fmt;

use crate::orientation::Orientation;

/// The sensor categories the daemon knows about. At most one driver is
/// active per kind at any time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Accelerometer,
    Light,
    Compass,
}

impl SensorKind {
    pub const ALL: [SensorKind; 3] = [
        SensorKind::Accelerometer,
        SensorKind::Light,
        SensorKind::Compass,
    ];

    pub fn describe(&self) -> &'static str {
        match self {
            Self::Accelerometer => "accelerometer",
            Self::Light => "ambient light sensor",
            Self::Compass => "compass",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// One normalized reading delivered by a driver.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Reading {
    Accel { x: i32, y: i32, z: i32, scale: f64 },
    Light { level: f64, uses_lux: bool },
    Heading { degrees: f64 },
}

impl Reading {
    pub fn kind(&self) -> SensorKind {
        match self {
            Self::Accel { .. } => SensorKind::Accelerometer,
            Self::Light { .. } => SensorKind::Light,
            Self::Heading { .. } => SensorKind::Compass,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightUnit {
    Lux,
    Vendor,
}

impl LightUnit {
    pub fn from_uses_lux(uses_lux: bool) -> Self {
        if uses_lux {
            Self::Lux
        } else {
            Self::Vendor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lux => "lux",
            Self::Vendor => "vendor",
        }
    }
}

/// The property set the coordinator exposes to consumers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProxyState {
    pub has_accelerometer: bool,
    pub orientation: Orientation,
    pub has_ambient_light: bool,
    pub light_level: f64,
    pub light_level_unit: LightUnit,
    pub has_compass: bool,
    pub compass_heading: f64,
}

impl Default for ProxyState {
    fn default() -> Self {
        Self {
            has_accelerometer: false,
            orientation: Orientation::Undefined,
            has_ambient_light: false,
            light_level: 0.0,
            light_level_unit: LightUnit::Lux,
            has_compass: false,
            compass_heading: 0.0,
        }
    }
}

impl ProxyState {
    /// Serialize to JSON for debugging
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Property-change notification published by the coordinator.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum PropertyUpdate {
    Presence { kind: SensorKind, present: bool },
    Orientation { orientation: Orientation },
    LightLevel { level: f64, unit: LightUnit },
    CompassHeading { degrees: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_kind_mapping() {
        let accel = Reading::Accel {
            x: 0,
            y: -256,
            z: 0,
            scale: 1.0,
        };
        assert_eq!(accel.kind(), SensorKind::Accelerometer);
        assert_eq!(
            Reading::Light {
                level: 1.0,
                uses_lux: true
            }
            .kind(),
            SensorKind::Light
        );
        assert_eq!(Reading::Heading { degrees: 90.0 }.kind(), SensorKind::Compass);
    }

    #[test]
    fn test_state_serialization_uses_wire_strings() {
        let mut state = ProxyState::default();
        state.has_accelerometer = true;
        state.orientation = Orientation::BottomUp;
        state.light_level_unit = LightUnit::Vendor;

        let json = state.to_json().unwrap();
        assert!(json.contains("\"bottom-up\""));
        assert!(json.contains("\"vendor\""));

        let decoded: ProxyState = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, state);
    }
}
