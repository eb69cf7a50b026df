//! Session orchestration
//!
//! The aggregator owns one instance of every pipeline stage and serializes
//! ingestion across one or two sides: frame transform and edge smoothing per
//! side, turn-signal extraction for both sides, turn detection driven by the
//! primary side, plus the live histories and logs that become the session's
//! run record.
//!
//! The host funnels all sensor callbacks through a single call sequence; the
//! aggregator itself never locks.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::detector::TurnDetector;
use crate::frame::FrameTransform;
use crate::signal::TurnSignalProcessor;
use crate::types::{
    CalibrationSnapshot, CalibrationState, EdgeSample, LiveTelemetry, LocationFix, RawSamplePair,
    RunRecord, SensorMode, SensorSample, SensorSide, TurnSample, TurnWindow,
};

/// Span of the rolling live edge-history (seconds).
pub const LIVE_EDGE_HISTORY_SECONDS: i64 = 10;

/// Host-supplied session configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub sensor_mode: SensorMode,
    /// Side whose signal drives turn detection.
    pub primary_side: SensorSide,
    /// When set, every raw sample is kept, paired left/right by timestamp.
    pub record_raw_samples: bool,
}

impl SessionConfig {
    pub fn single() -> Self {
        Self {
            sensor_mode: SensorMode::Single,
            primary_side: SensorMode::Single.primary_side(),
            record_raw_samples: false,
        }
    }

    pub fn dual() -> Self {
        Self {
            sensor_mode: SensorMode::Dual,
            primary_side: SensorMode::Dual.primary_side(),
            record_raw_samples: false,
        }
    }
}

/// One wire-format ingestion record, as delivered over NDJSON or FFI.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IngestRecord {
    pub timestamp: DateTime<Utc>,
    pub side: SensorSide,
    pub sample: SensorSample,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationFix>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,
}

/// Stateful session aggregator; one per run.
pub struct SessionAggregator {
    config: SessionConfig,
    calibrations: [CalibrationState; 2],
    transform: FrameTransform,
    processor: TurnSignalProcessor,
    detector: TurnDetector,
    live_history: VecDeque<EdgeSample>,
    edge_history: Vec<EdgeSample>,
    background: Vec<TurnSample>,
    location_track: Vec<LocationFix>,
    latest_location: Option<LocationFix>,
    latest_signal: Option<f64>,
    latest_speed: Option<f64>,
    latest_pitch: [Option<f64>; 2],
    raw_log: Option<Vec<RawSamplePair>>,
    raw_index: HashMap<DateTime<Utc>, usize>,
}

impl SessionAggregator {
    /// A session with no calibration: samples pass through untransformed.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_calibrations(config, CalibrationState::default(), CalibrationState::default())
    }

    pub fn with_calibrations(
        config: SessionConfig,
        left: CalibrationState,
        right: CalibrationState,
    ) -> Self {
        Self {
            config,
            calibrations: [left, right],
            transform: FrameTransform::new(),
            processor: TurnSignalProcessor::new(config.sensor_mode),
            detector: TurnDetector::new(),
            live_history: VecDeque::new(),
            edge_history: Vec::new(),
            background: Vec::new(),
            location_track: Vec::new(),
            latest_location: None,
            latest_signal: None,
            latest_speed: None,
            latest_pitch: [None, None],
            raw_log: if config.record_raw_samples {
                Some(Vec::new())
            } else {
                None
            },
            raw_index: HashMap::new(),
        }
    }

    pub fn config(&self) -> SessionConfig {
        self.config
    }

    /// Ingest one raw sample for a side.
    ///
    /// Returns the turn window this sample finalized, if any. Both sides
    /// flow through the signal processor (keeping cross-side validity state
    /// fresh), but only the primary side drives the detector.
    pub fn ingest(
        &mut self,
        sample: &SensorSample,
        timestamp: DateTime<Utc>,
        side: SensorSide,
        location: Option<LocationFix>,
        speed_mps: Option<f64>,
    ) -> Option<&TurnWindow> {
        if let Some(fix) = location {
            let is_new = self
                .location_track
                .last()
                .map(|last| last.timestamp != fix.timestamp)
                .unwrap_or(true);
            if is_new {
                self.location_track.push(fix);
            }
            self.latest_location = Some(fix);
        }
        if speed_mps.is_some() {
            self.latest_speed = speed_mps;
        }

        let frame = self
            .transform
            .process(sample, &self.calibrations[side.slot()], side);
        self.latest_pitch[side.slot()] = Some(frame.pitch);

        let edge_sample = EdgeSample {
            timestamp,
            left: self
                .transform
                .smoothed_edge(SensorSide::Left)
                .map(|e| e.signed),
            right: self
                .transform
                .smoothed_edge(SensorSide::Right)
                .map(|e| e.signed),
        };
        self.edge_history.push(edge_sample);
        self.live_history.push_back(edge_sample);
        let cutoff = timestamp - Duration::seconds(LIVE_EDGE_HISTORY_SECONDS);
        while self
            .live_history
            .front()
            .map(|e| e.timestamp < cutoff)
            .unwrap_or(false)
        {
            self.live_history.pop_front();
        }

        if self.config.record_raw_samples {
            self.record_raw(sample, timestamp, side);
        }

        let signal = self.processor.process(&frame.boot, side, timestamp)?;
        if side != self.config.primary_side || !signal.is_valid {
            return None;
        }
        self.latest_signal = Some(signal.value);

        let left_edge = self
            .transform
            .smoothed_edge(SensorSide::Left)
            .map(|e| e.magnitude);
        let right_edge = self
            .transform
            .smoothed_edge(SensorSide::Right)
            .map(|e| e.magnitude);

        let was_in_turn = self.detector.is_in_turn();
        let finalized_index = self
            .detector
            .update(
                timestamp,
                signal.value,
                left_edge,
                right_edge,
                self.latest_location,
            )
            .map(|w| w.index as usize - 1);

        if !was_in_turn && !self.detector.is_in_turn() {
            self.background.push(TurnSample {
                timestamp,
                left_edge,
                right_edge,
                signal: signal.value,
            });
        }

        finalized_index.map(|i| &self.detector.windows()[i])
    }

    /// Ingest one wire-format record.
    pub fn ingest_record(&mut self, record: &IngestRecord) -> Option<&TurnWindow> {
        self.ingest(
            &record.sample,
            record.timestamp,
            record.side,
            record.location,
            record.speed_mps,
        )
    }

    fn record_raw(&mut self, sample: &SensorSample, timestamp: DateTime<Utc>, side: SensorSide) {
        let Some(log) = self.raw_log.as_mut() else {
            return;
        };
        match self.raw_index.get(&timestamp) {
            Some(&i) => {
                let pair = &mut log[i];
                match side {
                    SensorSide::Left => pair.left = Some(*sample),
                    SensorSide::Right => pair.right = Some(*sample),
                }
            }
            None => {
                let pair = match side {
                    SensorSide::Left => RawSamplePair {
                        timestamp,
                        left: Some(*sample),
                        right: None,
                    },
                    SensorSide::Right => RawSamplePair {
                        timestamp,
                        left: None,
                        right: Some(*sample),
                    },
                };
                self.raw_index.insert(timestamp, log.len());
                log.push(pair);
            }
        }
    }

    /// Live display values.
    pub fn telemetry(&self) -> LiveTelemetry {
        let left = self.transform.smoothed_edge(SensorSide::Left);
        let right = self.transform.smoothed_edge(SensorSide::Right);
        let combined = match (left, right) {
            (Some(l), Some(r)) => Some((l.signed + r.signed) / 2.0),
            (Some(l), None) => Some(l.signed),
            (None, Some(r)) => Some(r.signed),
            (None, None) => None,
        };
        LiveTelemetry {
            left_edge: left,
            right_edge: right,
            combined_edge: combined,
            left_pitch: self.latest_pitch[SensorSide::Left.slot()],
            right_pitch: self.latest_pitch[SensorSide::Right.slot()],
            turn_count: self.detector.turn_count(),
            latest_signal: self.latest_signal,
        }
    }

    pub fn windows(&self) -> &[TurnWindow] {
        self.detector.windows()
    }

    pub fn turn_count(&self) -> u32 {
        self.detector.turn_count()
    }

    pub fn is_in_turn(&self) -> bool {
        self.detector.is_in_turn()
    }

    pub fn latest_speed(&self) -> Option<f64> {
        self.latest_speed
    }

    /// Rolling edge history for live display (last 10 seconds).
    pub fn live_edge_history(&self) -> &VecDeque<EdgeSample> {
        &self.live_history
    }

    /// Close the session and assemble the run record.
    pub fn finish(self) -> RunRecord {
        RunRecord {
            sensor_mode: self.config.sensor_mode,
            turn_windows: self.detector.into_windows(),
            background_samples: self.background,
            location_track: self.location_track,
            edge_history: self.edge_history,
            raw_log: self.raw_log,
            calibration: CalibrationSnapshot {
                left: self.calibrations[SensorSide::Left.slot()].export(),
                right: self.calibrations[SensorSide::Right.slot()].export(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TurnDirection;
    use chrono::TimeZone;

    fn ts(millis: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap() + chrono::Duration::milliseconds(millis)
    }

    fn flat_sample(gz: f64) -> SensorSample {
        SensorSample::new(0.0, 0.0, 1.0, 0.0, 0.0, gz)
    }

    /// Mirrored carving cadence: 1.4 s half-sine yaw bursts of alternating
    /// sign separated by 0.6 s of quiet, sampled at 20 ms for 10 s.
    fn carving_gyro_z(t: i64) -> f64 {
        let cycle = t / 2000;
        let offset = t % 2000;
        if offset >= 1400 {
            return 0.0;
        }
        let sign = if cycle % 2 == 0 { 1.0 } else { -1.0 };
        sign * 40.0 * (std::f64::consts::PI * offset as f64 / 1400.0).sin()
    }

    #[test]
    fn dual_session_detects_alternating_turns() {
        let mut session = SessionAggregator::new(SessionConfig::dual());

        let mut t = 0;
        while t < 10_000 {
            let gz = carving_gyro_z(t);
            session.ingest(&flat_sample(gz), ts(t), SensorSide::Left, None, None);
            session.ingest(&flat_sample(-gz), ts(t), SensorSide::Right, None, None);
            t += 20;
        }

        let record = session.finish();
        assert_eq!(record.sensor_mode, SensorMode::Dual);
        assert_eq!(record.turn_windows.len(), 5);
        for (i, window) in record.turn_windows.iter().enumerate() {
            let expected = if i % 2 == 0 {
                TurnDirection::Right
            } else {
                TurnDirection::Left
            };
            assert_eq!(window.direction, expected, "window {i}");
            assert!(window.duration_ms() >= 400, "window {i} too short");
        }
    }

    #[test]
    fn secondary_side_never_drives_the_detector() {
        let mut session = SessionAggregator::new(SessionConfig::dual());

        // Strong carving cadence on the right while the primary (left) side
        // stays quiet.
        let mut t = 0;
        while t < 6_000 {
            let gz = carving_gyro_z(t);
            session.ingest(&flat_sample(0.0), ts(t), SensorSide::Left, None, None);
            session.ingest(&flat_sample(gz), ts(t), SensorSide::Right, None, None);
            t += 20;
        }

        assert_eq!(session.turn_count(), 0);
        assert!(session.windows().is_empty());
    }

    #[test]
    fn telemetry_combines_both_sides() {
        let mut session = SessionAggregator::new(SessionConfig::dual());

        // Left boot rolled ~30°, right ~-10°.
        let left = SensorSample::new(0.0, 0.5, 0.866, 0.0, 0.0, 0.0);
        let right = SensorSample::new(0.0, -0.176, 0.984, 0.0, 0.0, 0.0);
        session.ingest(&left, ts(0), SensorSide::Left, None, None);
        session.ingest(&right, ts(0), SensorSide::Right, None, None);

        let telemetry = session.telemetry();
        let left_edge = telemetry.left_edge.unwrap();
        let right_edge = telemetry.right_edge.unwrap();
        assert!((left_edge.signed - 30.0).abs() < 0.2);
        assert!((right_edge.signed + 10.1).abs() < 0.2);
        let combined = telemetry.combined_edge.unwrap();
        assert!((combined - (left_edge.signed + right_edge.signed) / 2.0).abs() < 1e-9);
        assert!(telemetry.left_pitch.unwrap().abs() < 1e-9);
        assert!(telemetry.right_pitch.is_some());
    }

    #[test]
    fn background_samples_collect_outside_turns() {
        let mut session = SessionAggregator::new(SessionConfig::single());

        for i in 0..50 {
            session.ingest(&flat_sample(2.0), ts(i * 20), SensorSide::Left, None, None);
        }

        let record = session.finish();
        assert!(record.turn_windows.is_empty());
        assert_eq!(record.background_samples.len(), 50);
        assert!(record.background_samples.iter().all(|s| s.signal.abs() < 25.0));
    }

    #[test]
    fn live_history_prunes_beyond_ten_seconds() {
        let mut session = SessionAggregator::new(SessionConfig::single());

        for i in 0..30 {
            session.ingest(
                &flat_sample(0.0),
                ts(i * 1000),
                SensorSide::Left,
                None,
                None,
            );
        }

        let history = session.live_edge_history();
        assert!(history.len() <= 11);
        let newest = history.back().unwrap().timestamp;
        let oldest = history.front().unwrap().timestamp;
        assert!((newest - oldest).num_seconds() <= LIVE_EDGE_HISTORY_SECONDS);

        // The full-resolution history keeps everything.
        let record = session.finish();
        assert_eq!(record.edge_history.len(), 30);
    }

    #[test]
    fn raw_log_pairs_sides_by_timestamp() {
        let mut config = SessionConfig::dual();
        config.record_raw_samples = true;
        let mut session = SessionAggregator::new(config);

        let left = flat_sample(1.0);
        let right = flat_sample(-1.0);
        session.ingest(&left, ts(0), SensorSide::Left, None, None);
        session.ingest(&right, ts(0), SensorSide::Right, None, None);
        session.ingest(&left, ts(20), SensorSide::Left, None, None);

        let record = session.finish();
        let log = record.raw_log.unwrap();
        assert_eq!(log.len(), 2);
        assert!(log[0].left.is_some() && log[0].right.is_some());
        assert!(log[1].left.is_some() && log[1].right.is_none());
    }

    #[test]
    fn raw_log_absent_when_disabled() {
        let mut session = SessionAggregator::new(SessionConfig::single());
        session.ingest(&flat_sample(0.0), ts(0), SensorSide::Left, None, None);
        assert!(session.finish().raw_log.is_none());
    }

    #[test]
    fn location_track_dedupes_repeated_fixes() {
        let mut session = SessionAggregator::new(SessionConfig::single());
        let fix = LocationFix {
            timestamp: ts(0),
            latitude: 46.5,
            longitude: 7.5,
            altitude_meters: 1800.0,
            speed_mps: 9.0,
            horizontal_accuracy_meters: 4.0,
        };

        for i in 0..5 {
            session.ingest(
                &flat_sample(0.0),
                ts(i * 20),
                SensorSide::Left,
                Some(fix),
                Some(9.0),
            );
        }
        let later = LocationFix {
            timestamp: ts(1000),
            ..fix
        };
        session.ingest(
            &flat_sample(0.0),
            ts(1000),
            SensorSide::Left,
            Some(later),
            None,
        );

        assert_eq!(session.latest_speed(), Some(9.0));
        let record = session.finish();
        assert_eq!(record.location_track.len(), 2);
    }

    #[test]
    fn run_record_serializes_with_rfc3339_timestamps() {
        let mut session = SessionAggregator::new(SessionConfig::single());
        session.ingest(&flat_sample(0.0), ts(0), SensorSide::Left, None, None);
        let record = session.finish();

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("2024-02-01T12:00:00"));
        let parsed: RunRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }
}
