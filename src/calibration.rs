//! Two-phase boot calibration
//!
//! Calibration maps a sensor's raw axes onto the boot frame in two captured
//! maneuvers: a stationary hold that resolves gravity (up axis, accel scale,
//! gyro bias), then two forward edge holds whose gravity directions span the
//! boot's transverse plane and fix the forward axis.
//!
//! The engine is pure with respect to time: each capture is a synchronous
//! function of its sample batch. Restarting a capture discards whatever was
//! in flight; no partial state survives.

use log::{debug, info};

use crate::error::CaptureError;
use crate::geometry::{Mat3, Vec3};
use crate::types::{BootCalibration, CalibrationState, SensorSample, SensorSide};

/// Maximum stddev of accel magnitude during the stationary hold (g).
pub const MAX_STATIONARY_ACCEL_STDDEV: f64 = 0.05;
/// Maximum stddev of gyro magnitude during the stationary hold (deg/s).
pub const MAX_STATIONARY_GYRO_STDDEV: f64 = 2.0;
/// Minimum samples per edge-hold batch.
pub const MIN_EDGE_HOLD_SAMPLES: usize = 10;
/// Minimum angular separation between the two edge holds (degrees).
pub const MIN_EDGE_SEPARATION_DEGREES: f64 = 25.0;
/// Minimum magnitude of the roll axis before normalization.
pub const MIN_ROLL_AXIS_MAGNITUDE: f64 = 0.1;
/// Maximum componentwise deviation of rotated stationary gravity from
/// (0, 0, ±1).
pub const MAX_STATIONARY_DEVIATION: f64 = 0.25;
/// Maximum rotated gyro-bias magnitude (deg/s).
pub const MAX_GYRO_BIAS_DPS: f64 = 3.0;

const MIN_GRAVITY_MAGNITUDE: f64 = 1e-6;
const MIN_FORWARD_AXIS_MAGNITUDE: f64 = 1e-6;
/// cos(~5°): beyond this the world X reference is nearly parallel to up.
const REFERENCE_PARALLEL_COSINE: f64 = 0.996;

/// Storage boundary for per-sensor calibration. The engine never touches
/// disk; hosts provide whatever persistence they have.
pub trait CalibrationStore {
    fn get(&self, side: SensorSide) -> CalibrationState;
    fn set(&mut self, side: SensorSide, state: CalibrationState);
}

/// In-memory store for tests and hosts without persistence.
#[derive(Debug, Clone, Default)]
pub struct MemoryCalibrationStore {
    states: [CalibrationState; 2],
}

impl CalibrationStore for MemoryCalibrationStore {
    fn get(&self, side: SensorSide) -> CalibrationState {
        self.states[side.slot()]
    }

    fn set(&mut self, side: SensorSide, state: CalibrationState) {
        self.states[side.slot()] = state;
    }
}

/// Result of the stationary phase, held until the edge-hold phase commits
/// or the stationary phase is restarted.
#[derive(Debug, Clone, Copy)]
pub struct PendingCalibration {
    pub z_axis: Vec3,
    pub gyro_bias: Vec3,
    pub accel_scale: f64,
    pub mean_accel: Vec3,
    pub mean_gyro: Vec3,
}

/// Two-phase calibration engine over an injected store.
pub struct CalibrationEngine<S: CalibrationStore> {
    store: S,
    pending: [Option<PendingCalibration>; 2],
}

impl<S: CalibrationStore> CalibrationEngine<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            pending: [None, None],
        }
    }

    /// Current stored calibration for a side.
    pub fn calibration(&self, side: SensorSide) -> CalibrationState {
        self.store.get(side)
    }

    pub fn is_calibrated(&self, side: SensorSide) -> bool {
        self.store.get(side).is_calibrated
    }

    /// Persisted calibration record, once the side is calibrated.
    pub fn export(&self, side: SensorSide) -> Option<BootCalibration> {
        self.store.get(side).export()
    }

    pub fn has_pending(&self, side: SensorSide) -> bool {
        self.pending[side.slot()].is_some()
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Phase one: resolve gravity from a stationary hold.
    ///
    /// On success the provisional (level) calibration is stored with
    /// `is_calibrated = false` and a pending record is kept for phase two.
    /// Calling again discards any prior pending state for the side.
    pub fn capture_stationary(
        &mut self,
        side: SensorSide,
        samples: &[SensorSample],
    ) -> Result<(), CaptureError> {
        if self.pending[side.slot()].take().is_some() {
            debug!("{}: discarding pending calibration on restart", side.as_str());
        }

        if samples.is_empty() {
            return Err(CaptureError::InsufficientSamples { got: 0, need: 1 });
        }

        let stats = BatchStats::from_samples(samples);
        if stats.accel_mag_stddev > MAX_STATIONARY_ACCEL_STDDEV
            || stats.gyro_mag_stddev > MAX_STATIONARY_GYRO_STDDEV
        {
            return Err(CaptureError::ExcessiveMovement {
                accel_stddev: stats.accel_mag_stddev,
                accel_limit: MAX_STATIONARY_ACCEL_STDDEV,
                gyro_stddev: stats.gyro_mag_stddev,
                gyro_limit: MAX_STATIONARY_GYRO_STDDEV,
            });
        }

        let gravity_magnitude = stats.mean_accel.norm();
        if gravity_magnitude <= MIN_GRAVITY_MAGNITUDE {
            return Err(CaptureError::WeakGravitySignal {
                measured: gravity_magnitude,
            });
        }

        let accel_scale = 1.0 / gravity_magnitude;
        // Up is opposite measured gravity.
        let z_axis = stats.mean_accel.scaled(-accel_scale);
        let rotation = level_basis(&z_axis);

        self.store.set(
            side,
            CalibrationState {
                rotation,
                gyro_bias: stats.mean_gyro,
                accel_scale,
                z_axis,
                is_calibrated: false,
            },
        );
        self.pending[side.slot()] = Some(PendingCalibration {
            z_axis,
            gyro_bias: stats.mean_gyro,
            accel_scale,
            mean_accel: stats.mean_accel,
            mean_gyro: stats.mean_gyro,
        });

        info!(
            "{}: stationary capture accepted, accel scale {:.4}",
            side.as_str(),
            accel_scale
        );
        Ok(())
    }

    /// Phase two: fix the forward axis from two edge holds.
    ///
    /// The holds must tilt the boot onto opposite forward edges; their mean
    /// gravity directions span the plane whose normal is the forward axis.
    /// A validation pass re-applies the candidate calibration to the
    /// stationary-phase measurements before anything is committed.
    pub fn capture_forward_edges(
        &mut self,
        side: SensorSide,
        edge_one: &[SensorSample],
        edge_two: &[SensorSample],
    ) -> Result<(), CaptureError> {
        let pending = self.pending[side.slot()].ok_or(CaptureError::NoPendingCalibration)?;

        for batch in [edge_one, edge_two] {
            if batch.len() < MIN_EDGE_HOLD_SAMPLES {
                return Err(CaptureError::InsufficientSamples {
                    got: batch.len(),
                    need: MIN_EDGE_HOLD_SAMPLES,
                });
            }
        }

        let g_one = mean_accel(edge_one)
            .normalized()
            .ok_or(CaptureError::WeakGravitySignal { measured: 0.0 })?;
        let g_two = mean_accel(edge_two)
            .normalized()
            .ok_or(CaptureError::WeakGravitySignal { measured: 0.0 })?;

        let separation = g_one.angle_to_degrees(&g_two);
        if separation < MIN_EDGE_SEPARATION_DEGREES {
            return Err(CaptureError::EdgeHoldsTooSimilar {
                measured_degrees: separation,
                min_degrees: MIN_EDGE_SEPARATION_DEGREES,
            });
        }

        // The forward axis is normal to both hold gravities; remove any
        // residual vertical component before normalizing.
        let forward = g_one.cross(&g_two).rejected_from(&pending.z_axis);
        let forward_magnitude = forward.norm();
        if forward_magnitude <= MIN_FORWARD_AXIS_MAGNITUDE {
            return Err(CaptureError::AxisNearVertical {
                measured: forward_magnitude,
            });
        }
        let x_axis = forward.scaled(1.0 / forward_magnitude);

        let roll = pending.z_axis.cross(&x_axis);
        let roll_magnitude = roll.norm();
        if roll_magnitude <= MIN_ROLL_AXIS_MAGNITUDE {
            return Err(CaptureError::RollAxisTooCloseToGravity {
                measured: roll_magnitude,
                limit: MIN_ROLL_AXIS_MAGNITUDE,
            });
        }
        let y_axis = roll.scaled(1.0 / roll_magnitude);

        let rotation = Mat3::from_rows(x_axis, y_axis, pending.z_axis);

        // Validation pass: the stationary-phase gravity must rotate to
        // vertical, and the gyro bias must stay small.
        let rotated_gravity = rotation.mul_vec(&pending.mean_accel.scaled(pending.accel_scale));
        let deviation = rotated_gravity
            .x
            .abs()
            .max(rotated_gravity.y.abs())
            .max((rotated_gravity.z.abs() - 1.0).abs());
        if deviation > MAX_STATIONARY_DEVIATION {
            return Err(CaptureError::StationaryCheckFailed {
                deviation,
                limit: MAX_STATIONARY_DEVIATION,
            });
        }

        let rotated_bias = rotation.mul_vec(&pending.gyro_bias);
        let bias_magnitude = rotated_bias.norm();
        if bias_magnitude > MAX_GYRO_BIAS_DPS {
            return Err(CaptureError::GyroBiasTooHigh {
                measured: bias_magnitude,
                limit: MAX_GYRO_BIAS_DPS,
            });
        }

        self.store.set(
            side,
            CalibrationState {
                rotation,
                gyro_bias: pending.gyro_bias,
                accel_scale: pending.accel_scale,
                z_axis: pending.z_axis,
                is_calibrated: true,
            },
        );
        self.pending[side.slot()] = None;

        info!(
            "{}: calibration committed, edge separation {:.1}°",
            side.as_str(),
            separation
        );
        Ok(())
    }
}

struct BatchStats {
    mean_accel: Vec3,
    mean_gyro: Vec3,
    accel_mag_stddev: f64,
    gyro_mag_stddev: f64,
}

impl BatchStats {
    fn from_samples(samples: &[SensorSample]) -> Self {
        let n = samples.len() as f64;
        let mut accel_sum = Vec3::ZERO;
        let mut gyro_sum = Vec3::ZERO;
        for s in samples {
            accel_sum = Vec3::new(accel_sum.x + s.ax, accel_sum.y + s.ay, accel_sum.z + s.az);
            gyro_sum = Vec3::new(gyro_sum.x + s.gx, gyro_sum.y + s.gy, gyro_sum.z + s.gz);
        }
        let mean_accel = accel_sum.scaled(1.0 / n);
        let mean_gyro = gyro_sum.scaled(1.0 / n);

        Self {
            mean_accel,
            mean_gyro,
            accel_mag_stddev: magnitude_stddev(samples.iter().map(SensorSample::accel_magnitude)),
            gyro_mag_stddev: magnitude_stddev(samples.iter().map(SensorSample::gyro_magnitude)),
        }
    }
}

fn magnitude_stddev(magnitudes: impl Iterator<Item = f64> + Clone) -> f64 {
    let mut count = 0usize;
    let mut sum = 0.0;
    for m in magnitudes.clone() {
        count += 1;
        sum += m;
    }
    if count == 0 {
        return 0.0;
    }
    let mean = sum / count as f64;
    let variance = magnitudes.map(|m| (m - mean) * (m - mean)).sum::<f64>() / count as f64;
    variance.sqrt()
}

fn mean_accel(samples: &[SensorSample]) -> Vec3 {
    let n = samples.len() as f64;
    let mut sum = Vec3::ZERO;
    for s in samples {
        sum = Vec3::new(sum.x + s.ax, sum.y + s.ay, sum.z + s.az);
    }
    sum.scaled(1.0 / n)
}

/// Provisional level rotation: world X projected orthogonal to up, unless X
/// is nearly parallel to up, in which case world Y seeds the basis.
fn level_basis(z_axis: &Vec3) -> Mat3 {
    let world_x = Vec3::new(1.0, 0.0, 0.0);
    let reference = if world_x.dot(z_axis).abs() > REFERENCE_PARALLEL_COSINE {
        Vec3::new(0.0, 1.0, 0.0)
    } else {
        world_x
    };

    let x_axis = match reference.rejected_from(z_axis).normalized() {
        Some(x) => x,
        // Both references parallel to up cannot happen for a unit z, but a
        // degenerate z falls back to identity.
        None => return Mat3::IDENTITY,
    };
    let y_axis = z_axis.cross(&x_axis);
    Mat3::from_rows(x_axis, y_axis, *z_axis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn stationary_batch(n: usize, az: f64) -> Vec<SensorSample> {
        (0..n)
            .map(|_| SensorSample::new(0.0, 0.0, az, 0.0, 0.0, 0.0))
            .collect()
    }

    /// Boot tilted about the forward (x) axis by `roll` degrees; gravity
    /// rotates within the y/z plane.
    fn edge_hold(n: usize, roll_degrees: f64) -> Vec<SensorSample> {
        let r = roll_degrees.to_radians();
        (0..n)
            .map(|_| SensorSample::new(0.0, r.sin(), r.cos(), 0.0, 0.0, 0.0))
            .collect()
    }

    fn engine() -> CalibrationEngine<MemoryCalibrationStore> {
        CalibrationEngine::new(MemoryCalibrationStore::default())
    }

    #[test]
    fn stationary_capture_resolves_gravity() {
        let mut engine = engine();
        let batch = stationary_batch(200, 1.0);
        engine
            .capture_stationary(SensorSide::Left, &batch)
            .unwrap();

        let state = engine.calibration(SensorSide::Left);
        assert!((state.accel_scale - 1.0).abs() < 1e-9);
        assert!((state.z_axis.z + 1.0).abs() < 1e-9);
        assert!(state.z_axis.x.abs() < 1e-9 && state.z_axis.y.abs() < 1e-9);
        assert!(!state.is_calibrated);
        assert!(engine.has_pending(SensorSide::Left));
    }

    #[test]
    fn stationary_capture_rejects_accel_movement() {
        let mut engine = engine();
        let mut batch = stationary_batch(50, 0.8);
        batch.extend(stationary_batch(50, 1.2));

        let err = engine
            .capture_stationary(SensorSide::Left, &batch)
            .unwrap_err();
        match err {
            CaptureError::ExcessiveMovement { accel_stddev, .. } => {
                assert!(accel_stddev > MAX_STATIONARY_ACCEL_STDDEV);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn stationary_capture_rejects_gyro_movement() {
        let mut engine = engine();
        let batch: Vec<SensorSample> = (0..100)
            .map(|i| {
                let gz = if i % 2 == 0 { 0.0 } else { 10.0 };
                SensorSample::new(0.0, 0.0, 1.0, 0.0, 0.0, gz)
            })
            .collect();

        let err = engine
            .capture_stationary(SensorSide::Left, &batch)
            .unwrap_err();
        assert!(matches!(err, CaptureError::ExcessiveMovement { .. }));
    }

    #[test]
    fn stationary_capture_rejects_weak_gravity() {
        let mut engine = engine();
        let batch = stationary_batch(20, 0.0);
        let err = engine
            .capture_stationary(SensorSide::Left, &batch)
            .unwrap_err();
        assert!(matches!(err, CaptureError::WeakGravitySignal { .. }));
    }

    #[test]
    fn edge_capture_requires_pending_stationary() {
        let mut engine = engine();
        let err = engine
            .capture_forward_edges(SensorSide::Left, &edge_hold(12, 30.0), &edge_hold(12, -30.0))
            .unwrap_err();
        assert_eq!(err, CaptureError::NoPendingCalibration);
    }

    #[test]
    fn edge_capture_rejects_short_batches() {
        let mut engine = engine();
        engine
            .capture_stationary(SensorSide::Left, &stationary_batch(20, 1.0))
            .unwrap();

        let err = engine
            .capture_forward_edges(SensorSide::Left, &edge_hold(3, 30.0), &edge_hold(12, -30.0))
            .unwrap_err();
        assert_eq!(err, CaptureError::InsufficientSamples { got: 3, need: 10 });
    }

    #[test]
    fn edge_capture_rejects_similar_holds() {
        let mut engine = engine();
        engine
            .capture_stationary(SensorSide::Left, &stationary_batch(20, 1.0))
            .unwrap();

        let err = engine
            .capture_forward_edges(SensorSide::Left, &edge_hold(12, 10.0), &edge_hold(12, 5.0))
            .unwrap_err();
        match err {
            CaptureError::EdgeHoldsTooSimilar {
                measured_degrees, ..
            } => assert!((measured_degrees - 5.0).abs() < 0.5),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn full_capture_produces_orthonormal_rotation() {
        let mut engine = engine();
        engine
            .capture_stationary(SensorSide::Left, &stationary_batch(200, 1.0))
            .unwrap();
        engine
            .capture_forward_edges(SensorSide::Left, &edge_hold(20, 30.0), &edge_hold(20, -30.0))
            .unwrap();

        let state = engine.calibration(SensorSide::Left);
        assert!(state.is_calibrated);
        assert!(state.rotation.is_orthonormal(1e-6));
        assert!(state.accel_scale > 0.0);
        assert!(!engine.has_pending(SensorSide::Left));

        // The committed rotation must send stationary gravity to vertical.
        let boot_gravity = state
            .rotation
            .mul_vec(&Vec3::new(0.0, 0.0, state.accel_scale));
        assert!(boot_gravity.x.abs() < 0.01);
        assert!(boot_gravity.y.abs() < 0.01);
        assert!((boot_gravity.z.abs() - 1.0).abs() < 0.01);

        assert!(engine.export(SensorSide::Left).is_some());
        assert!(engine.export(SensorSide::Right).is_none());
    }

    #[test]
    fn restart_discards_pending_and_commit_clears_it() {
        let mut engine = engine();
        engine
            .capture_stationary(SensorSide::Left, &stationary_batch(20, 1.0))
            .unwrap();
        // Restart with a different gravity magnitude.
        engine
            .capture_stationary(SensorSide::Left, &stationary_batch(20, 0.98))
            .unwrap();
        engine
            .capture_forward_edges(SensorSide::Left, &edge_hold(20, 30.0), &edge_hold(20, -30.0))
            .unwrap();

        // Pending was consumed; a second edge capture must fail.
        let err = engine
            .capture_forward_edges(SensorSide::Left, &edge_hold(20, 30.0), &edge_hold(20, -30.0))
            .unwrap_err();
        assert_eq!(err, CaptureError::NoPendingCalibration);
    }

    #[test]
    fn sides_are_calibrated_independently() {
        let mut engine = engine();
        engine
            .capture_stationary(SensorSide::Right, &stationary_batch(20, 1.0))
            .unwrap();
        engine
            .capture_forward_edges(SensorSide::Right, &edge_hold(20, 35.0), &edge_hold(20, -35.0))
            .unwrap();

        assert!(engine.is_calibrated(SensorSide::Right));
        assert!(!engine.is_calibrated(SensorSide::Left));
    }
}
