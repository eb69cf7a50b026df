//! Turn detection state machine
//!
//! A hysteresis machine over the turn signal: entry requires the signal to
//! exceed an adaptive threshold continuously for a minimum time, exit
//! requires both a quiet signal and a flat boot sustained for a minimum
//! time. Turns shorter than a floor duration are discarded at finalize.
//!
//! All timing uses sample-carried timestamps, so replaying a fixed sequence
//! yields identical windows.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use log::debug;

use crate::signal::median_of;
use crate::types::{LocationFix, TurnDirection, TurnSample, TurnWindow};

/// Entry threshold floor for |signal|.
pub const BASE_TURN_ON_THRESHOLD: f64 = 25.0;
/// Exit threshold floor for |signal|.
pub const BASE_TURN_OFF_THRESHOLD: f64 = 15.0;
/// Exit threshold as a fraction of the window's peak signal.
pub const TURN_OFF_PEAK_FRACTION: f64 = 0.35;
/// Combined edge angle at or below this counts as a flat boot (degrees).
pub const EDGE_EXIT_THRESHOLD_DEGREES: f64 = 8.0;
/// Capacity of the adaptive-threshold ring buffer.
pub const ADAPTIVE_HISTORY_CAPACITY: usize = 200;
/// The adaptive threshold stays at zero below this many buffered values.
pub const ADAPTIVE_MIN_SAMPLES: usize = 30;
/// MAD multiplier for the adaptive threshold.
pub const ADAPTIVE_MAD_MULTIPLIER: f64 = 2.5;
/// Entry condition must hold continuously for this long (ms).
pub const TURN_ENTRY_SUSTAIN_MS: i64 = 150;
/// Minimum spacing between consecutive turn starts (ms).
pub const TURN_SPACING_MS: i64 = 300;
/// Exit condition must hold continuously for this long (ms).
pub const TURN_EXIT_SUSTAIN_MS: i64 = 200;
/// Windows shorter than this are discarded at finalize (ms).
pub const MIN_TURN_DURATION_MS: i64 = 400;

/// Detector state. Sample accumulation exists only while a turn is in
/// progress.
#[derive(Debug, Clone)]
enum TurnState {
    Idle,
    InTurn {
        start_time: DateTime<Utc>,
        peak_signal: f64,
        end_candidate: Option<DateTime<Utc>>,
        samples: Vec<TurnSample>,
    },
}

/// Hysteresis turn detector with an adaptive entry threshold.
pub struct TurnDetector {
    state: TurnState,
    start_candidate: Option<DateTime<Utc>>,
    last_turn_start: Option<DateTime<Utc>>,
    /// |signal| history collected while idle; drives the adaptive entry
    /// threshold. In-turn values are excluded so sustained carving cannot
    /// raise the threshold above the carving signal itself.
    history: VecDeque<f64>,
    turn_count: u32,
    windows: Vec<TurnWindow>,
}

impl Default for TurnDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnDetector {
    pub fn new() -> Self {
        Self {
            state: TurnState::Idle,
            start_candidate: None,
            last_turn_start: None,
            history: VecDeque::with_capacity(ADAPTIVE_HISTORY_CAPACITY),
            turn_count: 0,
            windows: Vec::new(),
        }
    }

    /// Running turn count. Increments on every turn entry, so it can exceed
    /// `windows().len()` when short turns are discarded.
    pub fn turn_count(&self) -> u32 {
        self.turn_count
    }

    pub fn is_in_turn(&self) -> bool {
        matches!(self.state, TurnState::InTurn { .. })
    }

    /// Completed turn windows, in order.
    pub fn windows(&self) -> &[TurnWindow] {
        &self.windows
    }

    pub fn into_windows(self) -> Vec<TurnWindow> {
        self.windows
    }

    /// Entry threshold currently in force.
    pub fn turn_on_threshold(&self) -> f64 {
        BASE_TURN_ON_THRESHOLD.max(self.adaptive_threshold())
    }

    fn adaptive_threshold(&self) -> f64 {
        if self.history.len() < ADAPTIVE_MIN_SAMPLES {
            return 0.0;
        }
        let median = median_of(self.history.iter().copied());
        let mad = median_of(self.history.iter().map(|v| (v - median).abs()));
        median + ADAPTIVE_MAD_MULTIPLIER * mad
    }

    /// Advance the machine by one valid signal sample.
    ///
    /// Returns the newly finalized window, if this sample completed one.
    pub fn update(
        &mut self,
        timestamp: DateTime<Utc>,
        signal: f64,
        left_edge: Option<f64>,
        right_edge: Option<f64>,
        location: Option<LocationFix>,
    ) -> Option<&TurnWindow> {
        let magnitude = signal.abs();
        let sample = TurnSample {
            timestamp,
            left_edge,
            right_edge,
            signal,
        };

        match std::mem::replace(&mut self.state, TurnState::Idle) {
            TurnState::Idle => {
                if self.history.len() == ADAPTIVE_HISTORY_CAPACITY {
                    self.history.pop_front();
                }
                self.history.push_back(magnitude);

                let threshold = self.turn_on_threshold();
                if magnitude > threshold {
                    let candidate = *self.start_candidate.get_or_insert(timestamp);
                    let sustained =
                        (timestamp - candidate).num_milliseconds() >= TURN_ENTRY_SUSTAIN_MS;
                    let spaced = self
                        .last_turn_start
                        .map(|t| (timestamp - t).num_milliseconds() >= TURN_SPACING_MS)
                        .unwrap_or(true);

                    if sustained && spaced {
                        self.turn_count += 1;
                        self.last_turn_start = Some(timestamp);
                        self.start_candidate = None;
                        debug!(
                            "turn {} entered at {} (signal {:.1}, threshold {:.1})",
                            self.turn_count, timestamp, signal, threshold
                        );
                        self.state = TurnState::InTurn {
                            start_time: timestamp,
                            peak_signal: magnitude,
                            end_candidate: None,
                            samples: vec![sample],
                        };
                    }
                } else {
                    self.start_candidate = None;
                }
                None
            }
            TurnState::InTurn {
                start_time,
                mut peak_signal,
                mut end_candidate,
                mut samples,
            } => {
                samples.push(sample);
                peak_signal = peak_signal.max(magnitude);

                let turn_off = BASE_TURN_OFF_THRESHOLD.max(TURN_OFF_PEAK_FRACTION * peak_signal);
                let combined_edge = sample.combined_edge().unwrap_or(0.0);
                let quiet = magnitude < turn_off && combined_edge <= EDGE_EXIT_THRESHOLD_DEGREES;

                if !quiet {
                    self.state = TurnState::InTurn {
                        start_time,
                        peak_signal,
                        end_candidate: None,
                        samples,
                    };
                    return None;
                }

                let candidate = *end_candidate.get_or_insert(timestamp);
                if (timestamp - candidate).num_milliseconds() < TURN_EXIT_SUSTAIN_MS {
                    self.state = TurnState::InTurn {
                        start_time,
                        peak_signal,
                        end_candidate,
                        samples,
                    };
                    return None;
                }

                // The turn ended when the exit condition first held; the
                // sustain interval is confirmation only.
                self.finalize(start_time, candidate, samples, location)
            }
        }
    }

    fn finalize(
        &mut self,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        samples: Vec<TurnSample>,
        location: Option<LocationFix>,
    ) -> Option<&TurnWindow> {
        let duration_ms = (end_time - start_time).num_milliseconds();
        if duration_ms < MIN_TURN_DURATION_MS {
            debug!("discarding {duration_ms} ms turn, below minimum");
            return None;
        }

        let mean_signal = samples.iter().map(|s| s.signal).sum::<f64>() / samples.len() as f64;
        let direction = if mean_signal > 0.0 {
            TurnDirection::Right
        } else if mean_signal < 0.0 {
            TurnDirection::Left
        } else {
            TurnDirection::Unknown
        };
        let peak_edge_angle = samples
            .iter()
            .filter_map(TurnSample::combined_edge)
            .fold(0.0_f64, f64::max);

        let window = TurnWindow {
            index: self.windows.len() as u32 + 1,
            start_time,
            end_time,
            direction,
            mean_signal,
            peak_edge_angle,
            samples,
            location,
        };
        debug!(
            "turn {} finalized: {:?}, {} ms, peak edge {:.1}°",
            window.index, window.direction, duration_ms, window.peak_edge_angle
        );
        self.windows.push(window);
        self.windows.last()
    }
}
