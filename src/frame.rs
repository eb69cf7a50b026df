//! Boot-frame transform and edge angles
//!
//! Applies a stored calibration to raw samples and derives the live
//! roll/pitch geometry: the signed edge angle (boot roll relative to
//! horizontal, the carving proxy), its magnitude, and pitch. Display values
//! are exponentially smoothed per sensor side.

use crate::geometry::Vec3;
use crate::types::{CalibrationState, EdgeAngles, SensorSample, SensorSide};

/// Smoothing coefficient for live edge angles.
pub const EDGE_SMOOTHING_ALPHA: f64 = 0.18;

/// Below this, a calibration is indistinguishable from "none" and samples
/// pass through untouched.
const DEFAULT_CALIBRATION_EPSILON: f64 = 1e-9;

/// One sample expressed in the boot frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BootFrameSample {
    /// Acceleration in g.
    pub accel: Vec3,
    /// Angular rate in deg/s, bias-corrected.
    pub gyro: Vec3,
}

/// Everything the transform derives from one raw sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameOutput {
    pub boot: BootFrameSample,
    /// Smoothed edge angles for display.
    pub edge: EdgeAngles,
    /// Unsmoothed edge angles.
    pub raw_edge: EdgeAngles,
    /// Pitch in degrees.
    pub pitch: f64,
}

/// Map a raw sample into the boot frame.
///
/// A calibration still at its default (identity rotation, zero bias, unit
/// scale) returns the sample unchanged so that no artifacts appear before
/// any calibration exists.
pub fn to_boot_frame(sample: &SensorSample, calibration: &CalibrationState) -> BootFrameSample {
    if calibration.is_default(DEFAULT_CALIBRATION_EPSILON) {
        return BootFrameSample {
            accel: sample.accel(),
            gyro: sample.gyro(),
        };
    }

    let accel = calibration
        .rotation
        .mul_vec(&sample.accel().scaled(calibration.accel_scale));
    let gyro = calibration
        .rotation
        .mul_vec(&sample.gyro().sub(&calibration.gyro_bias));
    BootFrameSample { accel, gyro }
}

/// Edge angles from boot-frame acceleration.
///
/// Roll comes from `atan2(ay, az)` and is folded into [-90, 90]: a boot past
/// vertical reads as the supplementary angle on the same side. The signed
/// value is clamped to [-90, 90], the magnitude to [0, 90].
pub fn edge_angles(accel: &Vec3) -> EdgeAngles {
    let mut roll = accel.y.atan2(accel.z).to_degrees();
    if roll > 90.0 {
        roll -= 180.0;
    } else if roll < -90.0 {
        roll += 180.0;
    }
    EdgeAngles {
        signed: roll.clamp(-90.0, 90.0),
        magnitude: roll.abs().clamp(0.0, 90.0),
    }
}

/// Pitch in degrees from boot-frame acceleration.
pub fn pitch_degrees(accel: &Vec3) -> f64 {
    (-accel.x)
        .atan2((accel.y * accel.y + accel.z * accel.z).sqrt())
        .to_degrees()
}

/// Exponential smoother for one side's edge angles. The first sample
/// initializes the state directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeSmoother {
    state: Option<EdgeAngles>,
}

impl EdgeSmoother {
    pub fn smooth(&mut self, raw: EdgeAngles) -> EdgeAngles {
        let next = match self.state {
            None => raw,
            Some(prev) => EdgeAngles {
                signed: prev.signed + EDGE_SMOOTHING_ALPHA * (raw.signed - prev.signed),
                magnitude: prev.magnitude + EDGE_SMOOTHING_ALPHA * (raw.magnitude - prev.magnitude),
            },
        };
        self.state = Some(next);
        next
    }

    pub fn current(&self) -> Option<EdgeAngles> {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = None;
    }
}

/// Per-side transform state: applies calibration and smooths display angles.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameTransform {
    smoothers: [EdgeSmoother; 2],
}

impl FrameTransform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transform one raw sample for a side.
    pub fn process(
        &mut self,
        sample: &SensorSample,
        calibration: &CalibrationState,
        side: SensorSide,
    ) -> FrameOutput {
        let boot = to_boot_frame(sample, calibration);
        let raw_edge = edge_angles(&boot.accel);
        let edge = self.smoothers[side.slot()].smooth(raw_edge);
        FrameOutput {
            boot,
            edge,
            raw_edge,
            pitch: pitch_degrees(&boot.accel),
        }
    }

    pub fn smoothed_edge(&self, side: SensorSide) -> Option<EdgeAngles> {
        self.smoothers[side.slot()].current()
    }
}
