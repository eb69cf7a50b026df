//! Robust turn-signal extraction
//!
//! One processor instance serves both sides; each side owns independent
//! filter state. A boot-frame sample becomes a scalar "turn signal" in four
//! steps: validity gating (saturation and cross-side imbalance), Hampel
//! de-spiking of the gyro magnitude, first-order low-pass filtering over
//! real elapsed time, and signing by the yaw-axis direction.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use log::debug;

use crate::frame::BootFrameSample;
use crate::types::{SensorMode, SensorSide};

/// Accel saturation guard (g); matches the sensor's ±8 g full scale.
pub const MAX_ACCEL_MAGNITUDE_G: f64 = 8.0;
/// Gyro saturation guard: 35 rad/s, expressed in deg/s (≈ the ±2000 deg/s
/// full scale).
pub const MAX_GYRO_MAGNITUDE_DPS: f64 = 35.0 * 180.0 / std::f64::consts::PI;
/// One side reading more than this multiple of the other marks imbalance.
pub const IMBALANCE_RATIO: f64 = 10.0;
/// Consecutive imbalanced samples before rejection starts.
pub const IMBALANCE_TRIGGER_COUNT: u32 = 3;
/// Hampel rolling-window capacity.
pub const HAMPEL_CAPACITY: usize = 31;
/// Hampel stays inactive below this many samples.
pub const HAMPEL_MIN_SAMPLES: usize = 7;
/// Replace a value further than this many MADs from the local median.
pub const HAMPEL_MAD_THRESHOLD: f64 = 5.0;
/// Low-pass cutoff (Hz).
pub const LOW_PASS_CUTOFF_HZ: f64 = 6.0;
/// Floor on the filter time step under irregular sampling (seconds).
pub const MIN_FILTER_DT_SECONDS: f64 = 0.010;

/// Result of processing one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnSignal {
    /// Filtered gyro magnitude signed by the yaw direction. Meaningful only
    /// when `is_valid`.
    pub value: f64,
    pub is_valid: bool,
}

/// Hampel de-spike filter over a rolling window.
///
/// Values further than `HAMPEL_MAD_THRESHOLD` MADs from the window median
/// are replaced by that median. Inactive (pass-through) until
/// `HAMPEL_MIN_SAMPLES` values have been seen.
#[derive(Debug, Clone, Default)]
pub struct HampelFilter {
    window: VecDeque<f64>,
}

impl HampelFilter {
    pub fn process(&mut self, value: f64) -> f64 {
        if self.window.len() == HAMPEL_CAPACITY {
            self.window.pop_front();
        }
        self.window.push_back(value);

        if self.window.len() < HAMPEL_MIN_SAMPLES {
            return value;
        }

        let median = median_of(self.window.iter().copied());
        let mad = median_of(self.window.iter().map(|v| (v - median).abs()));
        if (value - median).abs() > HAMPEL_MAD_THRESHOLD * mad {
            median
        } else {
            value
        }
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

/// First-order low-pass filter stepped by real elapsed time.
#[derive(Debug, Clone, Copy, Default)]
pub struct LowPassFilter {
    state: Option<f64>,
}

impl LowPassFilter {
    /// The first value initializes the state directly; afterwards
    /// `alpha = dt / (RC + dt)` with dt floored for numeric stability.
    pub fn process(&mut self, value: f64, dt_seconds: f64) -> f64 {
        let next = match self.state {
            None => value,
            Some(prev) => {
                let rc = 1.0 / (2.0 * std::f64::consts::PI * LOW_PASS_CUTOFF_HZ);
                let dt = dt_seconds.max(MIN_FILTER_DT_SECONDS);
                let alpha = dt / (rc + dt);
                prev + alpha * (value - prev)
            }
        };
        self.state = Some(next);
        next
    }
}

#[derive(Debug, Clone, Default)]
struct SideState {
    last_timestamp: Option<DateTime<Utc>>,
    last_filtered_at: Option<DateTime<Utc>>,
    last_valid_gyro_magnitude: Option<f64>,
    imbalance_count: u32,
    hampel: HampelFilter,
    low_pass: LowPassFilter,
}

/// Per-side turn-signal pipeline.
pub struct TurnSignalProcessor {
    mode: SensorMode,
    sides: [SideState; 2],
}

impl TurnSignalProcessor {
    pub fn new(mode: SensorMode) -> Self {
        Self {
            mode,
            sides: [SideState::default(), SideState::default()],
        }
    }

    pub fn mode(&self) -> SensorMode {
        self.mode
    }

    /// Process one boot-frame sample for a side.
    ///
    /// Returns `None` when the timestamp duplicates the side's previous
    /// sample. Invalid samples come back with `is_valid = false` and update
    /// per-side bookkeeping without contributing to the filters.
    pub fn process(
        &mut self,
        sample: &BootFrameSample,
        side: SensorSide,
        timestamp: DateTime<Utc>,
    ) -> Option<TurnSignal> {
        let other_valid_magnitude = match self.mode {
            SensorMode::Dual => self.sides[side.opposite().slot()].last_valid_gyro_magnitude,
            SensorMode::Single => None,
        };

        let state = &mut self.sides[side.slot()];
        if state.last_timestamp == Some(timestamp) {
            return None;
        }
        state.last_timestamp = Some(timestamp);

        let accel_magnitude = sample.accel.norm();
        let gyro_magnitude = sample.gyro.norm();

        if accel_magnitude > MAX_ACCEL_MAGNITUDE_G || gyro_magnitude > MAX_GYRO_MAGNITUDE_DPS {
            debug!(
                "{}: saturated sample rejected (accel {:.2} g, gyro {:.1} deg/s)",
                side.as_str(),
                accel_magnitude,
                gyro_magnitude
            );
            state.imbalance_count = 0;
            return Some(TurnSignal {
                value: 0.0,
                is_valid: false,
            });
        }

        if let Some(other) = other_valid_magnitude {
            if gyro_magnitude > IMBALANCE_RATIO * other {
                state.imbalance_count += 1;
                if state.imbalance_count >= IMBALANCE_TRIGGER_COUNT {
                    debug!(
                        "{}: imbalanced sample rejected ({:.1} vs {:.1} deg/s)",
                        side.as_str(),
                        gyro_magnitude,
                        other
                    );
                    return Some(TurnSignal {
                        value: 0.0,
                        is_valid: false,
                    });
                }
            } else {
                state.imbalance_count = 0;
            }
        } else {
            state.imbalance_count = 0;
        }

        state.last_valid_gyro_magnitude = Some(gyro_magnitude);

        let despiked = state.hampel.process(gyro_magnitude);
        let dt_seconds = match state.last_filtered_at {
            Some(prev) => (timestamp - prev).num_milliseconds() as f64 / 1000.0,
            None => MIN_FILTER_DT_SECONDS,
        };
        state.last_filtered_at = Some(timestamp);
        let filtered = state.low_pass.process(despiked, dt_seconds);

        let sign = if sample.gyro.z > 0.0 {
            1.0
        } else if sample.gyro.z < 0.0 {
            -1.0
        } else {
            0.0
        };

        Some(TurnSignal {
            value: filtered * sign,
            is_valid: true,
        })
    }
}

/// Median of a value stream. Empty input yields 0.
pub(crate) fn median_of(values: impl Iterator<Item = f64>) -> f64 {
    let mut sorted: Vec<f64> = values.collect();
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}
