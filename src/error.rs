//! Error types for edgeflow
//!
//! Calibration capture is the only fallible surface in the core. Every
//! variant carries the measured value and the violated threshold so the host
//! can show the user what went wrong; all variants are recoverable by
//! restarting the capture step.

use thiserror::Error;

/// Errors reported by the two-phase calibration capture.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CaptureError {
    #[error("sensor moved during stationary capture: accel stddev {accel_stddev:.4} g (limit {accel_limit}), gyro stddev {gyro_stddev:.2} deg/s (limit {gyro_limit})")]
    ExcessiveMovement {
        accel_stddev: f64,
        accel_limit: f64,
        gyro_stddev: f64,
        gyro_limit: f64,
    },

    #[error("mean acceleration magnitude {measured:.2e} g is too weak to resolve gravity")]
    WeakGravitySignal { measured: f64 },

    #[error("no stationary capture is pending; run the stationary step first")]
    NoPendingCalibration,

    #[error("capture batch has {got} samples, need at least {need}")]
    InsufficientSamples { got: usize, need: usize },

    #[error("edge holds are only {measured_degrees:.1}° apart, need at least {min_degrees}°")]
    EdgeHoldsTooSimilar {
        measured_degrees: f64,
        min_degrees: f64,
    },

    #[error("forward axis magnitude {measured:.2e} after removing the vertical component is degenerate")]
    AxisNearVertical { measured: f64 },

    #[error("roll axis magnitude {measured:.3} is too close to gravity (limit {limit})")]
    RollAxisTooCloseToGravity { measured: f64, limit: f64 },

    #[error("rotated stationary gravity deviates {deviation:.3} from vertical (limit {limit})")]
    StationaryCheckFailed { deviation: f64, limit: f64 },

    #[error("rotated gyro bias magnitude {measured:.2} deg/s exceeds limit {limit}")]
    GyroBiasTooHigh { measured: f64, limit: f64 },
}
