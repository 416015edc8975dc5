use serde::{Deserialize, Serialize};
use std::fmt;

/// Discrete screen orientation, derived from accelerometer readings.
///
/// `Undefined` is only ever the initial value; the classifier never outputs
/// it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Orientation {
    #[default]
    Undefined,
    Normal,
    BottomUp,
    LeftUp,
    RightUp,
}

impl Orientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Normal => "normal",
            Self::BottomUp => "bottom-up",
            Self::LeftUp => "left-up",
            Self::RightUp => "right-up",
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const RADIANS_TO_DEGREES: f64 = 180.0 / std::f64::consts::PI;
const SAME_AXIS_LIMIT: i32 = 5;
const THRESHOLD_LANDSCAPE: i32 = 35;
const THRESHOLD_PORTRAIT: i32 = 35;

/// First apply scale to get m/s², then convert to 1G ~= 256 as the
/// threshold constants expect.
fn scale_to_g256(raw: i32, scale: f64) -> i64 {
    (f64::from(raw) * scale * 256.0 / 9.81).round() as i64
}

/// Classify a raw 3-axis reading into an orientation, with hysteresis
/// against the previous state.
///
/// The 35° thresholds avoid jitter near 0°/90°; the 5° same-axis band stops
/// rapid toggling between the two opposite states sharing an axis pair. On
/// the common border of both thresholds the previous orientation is kept.
pub fn classify(prev: Orientation, in_x: i32, in_y: i32, in_z: i32, scale: f64) -> Orientation {
    let x = scale_to_g256(in_x, scale);
    let y = scale_to_g256(in_y, scale);
    let z = scale_to_g256(in_z, scale);

    let portrait_rotation =
        (f64::atan2(x as f64, ((y * y + z * z) as f64).sqrt()) * RADIANS_TO_DEGREES).round() as i32;
    let landscape_rotation =
        (f64::atan2(y as f64, ((x * x + z * z) as f64).sqrt()) * RADIANS_TO_DEGREES).round() as i32;

    if portrait_rotation.abs() > THRESHOLD_PORTRAIT && landscape_rotation.abs() > THRESHOLD_LANDSCAPE
    {
        return prev;
    }

    if portrait_rotation.abs() > THRESHOLD_PORTRAIT {
        let mut ret = if portrait_rotation > 0 {
            Orientation::LeftUp
        } else {
            Orientation::RightUp
        };

        if matches!(prev, Orientation::LeftUp | Orientation::RightUp)
            && portrait_rotation.abs() < SAME_AXIS_LIMIT
        {
            ret = prev;
        }
        return ret;
    }

    if landscape_rotation.abs() > THRESHOLD_LANDSCAPE {
        let mut ret = if landscape_rotation > 0 {
            Orientation::BottomUp
        } else {
            Orientation::Normal
        };

        if matches!(prev, Orientation::BottomUp | Orientation::Normal)
            && landscape_rotation.abs() < SAME_AXIS_LIMIT
        {
            ret = prev;
        }
        return ret;
    }

    prev
}

#[cfg(test)]
mod tests {
    use super::*;

    // raw units already follow the 1G ~= 256 convention
    const UNIT_SCALE: f64 = 9.81 / 256.0;

    #[test]
    fn test_cardinal_orientations() {
        let prev = Orientation::Undefined;
        assert_eq!(classify(prev, 0, -256, 0, UNIT_SCALE), Orientation::Normal);
        assert_eq!(classify(prev, -256, 0, 0, UNIT_SCALE), Orientation::RightUp);
        assert_eq!(classify(prev, 256, 0, 0, UNIT_SCALE), Orientation::LeftUp);
        assert_eq!(classify(prev, 0, 256, 0, UNIT_SCALE), Orientation::BottomUp);
    }

    #[test]
    fn test_flat_reading_keeps_previous() {
        // device lying flat: gravity along z only, no threshold crossed
        assert_eq!(
            classify(Orientation::Normal, 0, 0, -256, UNIT_SCALE),
            Orientation::Normal
        );
        assert_eq!(
            classify(Orientation::Undefined, 0, 0, 256, UNIT_SCALE),
            Orientation::Undefined
        );
    }

    #[test]
    fn test_same_axis_hysteresis_portrait() {
        // portrait angle ~2°: above nothing, but the portrait pair keeps its
        // state inside the 5° band even when the sign flips
        let x = 9; // atan2(9, 256) ~ 2°
        assert_eq!(
            classify(Orientation::RightUp, x, 0, -256, UNIT_SCALE),
            Orientation::RightUp
        );
    }

    #[test]
    fn test_same_axis_hysteresis_landscape() {
        assert_eq!(
            classify(Orientation::BottomUp, 0, -9, -256, UNIT_SCALE),
            Orientation::BottomUp
        );
    }

    #[test]
    fn test_ambiguous_diagonal_keeps_previous() {
        // both angles beyond 35°: refuse to classify
        assert_eq!(
            classify(Orientation::Normal, 256, 256, 0, UNIT_SCALE),
            Orientation::Normal
        );
        assert_eq!(
            classify(Orientation::LeftUp, -256, 256, 0, UNIT_SCALE),
            Orientation::LeftUp
        );
    }

    #[test]
    fn test_landscape_to_portrait_switch_not_damped() {
        // the 5° band only guards the same axis pair; a clear portrait tilt
        // from a landscape state must switch immediately
        assert_eq!(
            classify(Orientation::Normal, 256, 0, 0, UNIT_SCALE),
            Orientation::LeftUp
        );
    }

    #[test]
    fn test_applies_scale_before_thresholds() {
        // raw values in m/s² steps of 0.01: 1 g = 981 raw units
        let scale = 0.01;
        assert_eq!(
            classify(Orientation::Undefined, 0, -981, 0, scale),
            Orientation::Normal
        );
    }

    #[test]
    fn test_orientation_strings() {
        assert_eq!(Orientation::Undefined.as_str(), "undefined");
        assert_eq!(Orientation::Normal.as_str(), "normal");
        assert_eq!(Orientation::BottomUp.as_str(), "bottom-up");
        assert_eq!(Orientation::LeftUp.as_str(), "left-up");
        assert_eq!(Orientation::RightUp.as_str(), "right-up");
    }
}
