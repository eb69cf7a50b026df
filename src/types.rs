//! Core types for the edgeflow pipeline
//!
//! This module defines the data structures that flow through each stage of
//! the pipeline: raw sensor samples, calibration state, live edge angles,
//! turn events, and the session-level run record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geometry::{Mat3, Vec3};

/// One raw inertial sample as delivered by a boot sensor notification.
///
/// Acceleration is in g, angular rate in degrees per second. Samples are
/// immutable; every derived value lives in a downstream type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub ax: f64,
    pub ay: f64,
    pub az: f64,
    pub gx: f64,
    pub gy: f64,
    pub gz: f64,
}

impl SensorSample {
    pub fn new(ax: f64, ay: f64, az: f64, gx: f64, gy: f64, gz: f64) -> Self {
        Self {
            ax,
            ay,
            az,
            gx,
            gy,
            gz,
        }
    }

    pub fn accel(&self) -> Vec3 {
        Vec3::new(self.ax, self.ay, self.az)
    }

    pub fn gyro(&self) -> Vec3 {
        Vec3::new(self.gx, self.gy, self.gz)
    }

    /// Magnitude of the acceleration vector (g).
    pub fn accel_magnitude(&self) -> f64 {
        self.accel().norm()
    }

    /// Magnitude of the angular-rate vector (deg/s).
    pub fn gyro_magnitude(&self) -> f64 {
        self.gyro().norm()
    }
}

/// Which boot a sensor is mounted on.
///
/// In single-sensor mode the lone sensor occupies the `Left` slot; see
/// [`SensorMode::primary_side`]. Keeping the enum closed (no free-form
/// identifiers) lets per-side state live in fixed two-element arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorSide {
    Left,
    Right,
}

impl SensorSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorSide::Left => "left",
            SensorSide::Right => "right",
        }
    }

    /// Index into per-side state arrays.
    pub fn slot(&self) -> usize {
        match self {
            SensorSide::Left => 0,
            SensorSide::Right => 1,
        }
    }

    pub fn opposite(&self) -> SensorSide {
        match self {
            SensorSide::Left => SensorSide::Right,
            SensorSide::Right => SensorSide::Left,
        }
    }
}

/// How many sensors the host has connected for this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorMode {
    Single,
    Dual,
}

impl SensorMode {
    /// The side whose samples drive turn detection. A single sensor is
    /// assigned the left slot by convention.
    pub fn primary_side(&self) -> SensorSide {
        SensorSide::Left
    }
}

/// Direction of a completed carving turn, classified from the mean turn
/// signal over the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnDirection {
    Left,
    Right,
    Unknown,
}

/// Signed and unsigned boot roll relative to horizontal, in degrees.
///
/// `signed` is clamped to [-90, 90], `magnitude` to [0, 90].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeAngles {
    pub signed: f64,
    pub magnitude: f64,
}

/// One entry in the live edge-angle history. A side that has not reported
/// yet is simply absent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeSample {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right: Option<f64>,
}

/// One sample collected while a turn is in progress (or, for background
/// samples, while no turn is in progress).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TurnSample {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_edge: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right_edge: Option<f64>,
    pub signal: f64,
}

impl TurnSample {
    /// Mean of whichever edge angles are present.
    pub fn combined_edge(&self) -> Option<f64> {
        match (self.left_edge, self.right_edge) {
            (Some(l), Some(r)) => Some((l + r) / 2.0),
            (Some(l), None) => Some(l),
            (None, Some(r)) => Some(r),
            (None, None) => None,
        }
    }
}

/// An optional GPS fix supplied by the host.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_meters: f64,
    pub speed_mps: f64,
    pub horizontal_accuracy_meters: f64,
}

/// A completed carving turn. Created only at a successful finalize and
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnWindow {
    /// 1-based sequential index within the session.
    pub index: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub direction: TurnDirection,
    /// Mean signed turn signal over the window.
    pub mean_signal: f64,
    /// Maximum combined edge angle reached during the turn (degrees).
    pub peak_edge_angle: f64,
    pub samples: Vec<TurnSample>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationFix>,
}

impl TurnWindow {
    pub fn duration_ms(&self) -> i64 {
        (self.end_time - self.start_time).num_milliseconds()
    }
}

/// A left/right raw-sample pair matched by timestamp, recorded when raw
/// logging is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSamplePair {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left: Option<SensorSample>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right: Option<SensorSample>,
}

/// Full per-sensor calibration state.
///
/// Created empty (identity rotation, zero bias, unit scale, not calibrated)
/// and mutated only through the two-phase capture in
/// [`crate::calibration::CalibrationEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationState {
    /// Row-major rotation mapping sensor coordinates into the boot frame.
    pub rotation: Mat3,
    /// Gyro bias in sensor coordinates (deg/s).
    pub gyro_bias: Vec3,
    /// Multiplier normalizing measured gravity to 1 g. Always > 0.
    pub accel_scale: f64,
    /// Last-known up direction in sensor coordinates.
    pub z_axis: Vec3,
    pub is_calibrated: bool,
}

impl Default for CalibrationState {
    fn default() -> Self {
        Self {
            rotation: Mat3::IDENTITY,
            gyro_bias: Vec3::ZERO,
            accel_scale: 1.0,
            z_axis: Vec3::ZERO,
            is_calibrated: false,
        }
    }
}

impl CalibrationState {
    /// True when the state is indistinguishable from the default within
    /// `eps`: identity rotation, zero bias, unit scale. Used by the frame
    /// transform to pass samples through untouched before any calibration
    /// exists.
    pub fn is_default(&self, eps: f64) -> bool {
        self.rotation.max_abs_diff(&Mat3::IDENTITY) < eps
            && self.gyro_bias.norm() < eps
            && (self.accel_scale - 1.0).abs() < eps
    }

    /// Persisted subset, available once calibrated.
    pub fn export(&self) -> Option<BootCalibration> {
        if self.is_calibrated {
            Some(BootCalibration {
                rotation: self.rotation,
                gyro_bias: self.gyro_bias,
                accel_scale: self.accel_scale,
            })
        } else {
            None
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// The persisted calibration record handed to the host's storage
/// collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BootCalibration {
    pub rotation: Mat3,
    pub gyro_bias: Vec3,
    pub accel_scale: f64,
}

/// Calibration snapshot embedded in a run record.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CalibrationSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left: Option<BootCalibration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right: Option<BootCalibration>,
}

/// Live display values, refreshed on every ingested sample.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LiveTelemetry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_edge: Option<EdgeAngles>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right_edge: Option<EdgeAngles>,
    /// Mean of the available sides' signed edge angles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combined_edge: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_pitch: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right_pitch: Option<f64>,
    /// Running turn count. Increments on turn entry, so it can exceed the
    /// number of recorded windows when short turns are discarded.
    pub turn_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_signal: Option<f64>,
}

/// Everything a session produced, assembled at session end for the
/// persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub sensor_mode: SensorMode,
    #[serde(default)]
    pub turn_windows: Vec<TurnWindow>,
    /// Samples observed while no turn was in progress.
    #[serde(default)]
    pub background_samples: Vec<TurnSample>,
    #[serde(default)]
    pub location_track: Vec<LocationFix>,
    /// Full-resolution edge-angle history for the whole session.
    #[serde(default)]
    pub edge_history: Vec<EdgeSample>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_log: Option<Vec<RawSamplePair>>,
    pub calibration: CalibrationSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn sample_magnitudes() {
        let s = SensorSample::new(0.0, 3.0, 4.0, 0.0, 0.0, -2.0);
        assert!((s.accel_magnitude() - 5.0).abs() < 1e-12);
        assert!((s.gyro_magnitude() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn combined_edge_prefers_mean_of_both_sides() {
        let ts = Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap();
        let both = TurnSample {
            timestamp: ts,
            left_edge: Some(30.0),
            right_edge: Some(40.0),
            signal: 1.0,
        };
        assert_eq!(both.combined_edge(), Some(35.0));

        let left_only = TurnSample {
            left_edge: Some(30.0),
            right_edge: None,
            ..both
        };
        assert_eq!(left_only.combined_edge(), Some(30.0));

        let neither = TurnSample {
            left_edge: None,
            right_edge: None,
            ..both
        };
        assert_eq!(neither.combined_edge(), None);
    }

    #[test]
    fn default_calibration_is_default_and_not_exported() {
        let state = CalibrationState::default();
        assert!(state.is_default(1e-9));
        assert!(!state.is_calibrated);
        assert!(state.export().is_none());
    }

    #[test]
    fn calibration_state_round_trips_through_json() {
        let mut state = CalibrationState {
            accel_scale: 1.02,
            gyro_bias: Vec3::new(0.1, -0.2, 0.05),
            is_calibrated: true,
            ..Default::default()
        };
        state.z_axis = Vec3::new(0.0, 0.0, -1.0);

        let json = state.to_json().unwrap();
        let loaded = CalibrationState::from_json(&json).unwrap();
        assert_eq!(state, loaded);
        assert!(loaded.export().is_some());
    }

    #[test]
    fn optional_run_record_fields_survive_missing_keys() {
        let json = r#"{
            "sensor_mode": "single",
            "calibration": {}
        }"#;
        let record: RunRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.sensor_mode, SensorMode::Single);
        assert!(record.turn_windows.is_empty());
        assert!(record.raw_log.is_none());
    }

    #[test]
    fn side_slots_are_stable() {
        assert_eq!(SensorSide::Left.slot(), 0);
        assert_eq!(SensorSide::Right.slot(), 1);
        assert_eq!(SensorSide::Left.opposite(), SensorSide::Right);
        assert_eq!(SensorMode::Single.primary_side(), SensorSide::Left);
    }
}
