//! Edgeflow - On-device carving analytics engine for boot-mounted inertial
//! sensors
//!
//! Edgeflow turns streaming accelerometer/gyroscope samples from one or two
//! boot sensors into carving telemetry through a deterministic pipeline:
//! calibration → boot-frame transform → turn-signal extraction → turn
//! detection → session aggregation.
//!
//! ## Modules
//!
//! - **Calibration**: two-phase capture mapping raw sensor axes onto the
//!   boot frame
//! - **Pipeline**: per-sample transform, robust turn signal, hysteresis turn
//!   detection, and session aggregation into a run record

pub mod calibration;
pub mod detector;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod session;
pub mod signal;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use calibration::{CalibrationEngine, CalibrationStore, MemoryCalibrationStore};
pub use detector::TurnDetector;
pub use encoder::{RunExport, RunExporter};
pub use error::CaptureError;
pub use session::{IngestRecord, SessionAggregator, SessionConfig};
pub use signal::TurnSignalProcessor;
pub use types::{
    BootCalibration, CalibrationState, LiveTelemetry, RunRecord, SensorMode, SensorSample,
    SensorSide, TurnDirection, TurnWindow,
};

/// Engine version embedded in all run exports
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for run exports
pub const PRODUCER_NAME: &str = "edgeflow";
