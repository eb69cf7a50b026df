//! Run export encoding
//!
//! Wraps a finished run record in a versioned envelope with producer
//! metadata so downstream consumers can validate compatibility before
//! parsing the body.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::RunRecord;
use crate::{ENGINE_VERSION, PRODUCER_NAME};

/// Current export format version.
pub const EXPORT_FORMAT_VERSION: &str = "1.0.0";

/// Producer metadata embedded in every export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// A versioned run export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunExport {
    pub format_version: String,
    pub producer: ExportProducer,
    pub exported_at: DateTime<Utc>,
    pub run: RunRecord,
}

/// Encoder for producing run exports.
pub struct RunExporter {
    instance_id: String,
}

impl Default for RunExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl RunExporter {
    /// Create an exporter with a unique instance ID.
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an exporter with a specific instance ID.
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    /// Wrap a run record in the export envelope.
    pub fn encode(&self, run: RunRecord) -> RunExport {
        RunExport {
            format_version: EXPORT_FORMAT_VERSION.to_string(),
            producer: ExportProducer {
                name: PRODUCER_NAME.to_string(),
                version: ENGINE_VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            exported_at: Utc::now(),
            run,
        }
    }

    /// Encode straight to pretty-printed JSON.
    pub fn encode_to_json(&self, run: RunRecord) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.encode(run))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CalibrationSnapshot, SensorMode};

    fn empty_record() -> RunRecord {
        RunRecord {
            sensor_mode: SensorMode::Single,
            turn_windows: Vec::new(),
            background_samples: Vec::new(),
            location_track: Vec::new(),
            edge_history: Vec::new(),
            raw_log: None,
            calibration: CalibrationSnapshot::default(),
        }
    }

    #[test]
    fn export_carries_version_and_producer() {
        let exporter = RunExporter::with_instance_id("test-instance".to_string());
        let json = exporter.encode_to_json(empty_record()).unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["format_version"], EXPORT_FORMAT_VERSION);
        assert_eq!(value["producer"]["name"], PRODUCER_NAME);
        assert_eq!(value["producer"]["instance_id"], "test-instance");
        assert_eq!(value["run"]["sensor_mode"], "single");
    }

    #[test]
    fn export_round_trips() {
        let exporter = RunExporter::new();
        let export = exporter.encode(empty_record());
        let json = serde_json::to_string(&export).unwrap();
        let parsed: RunExport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, export);
    }

    #[test]
    fn fresh_exporters_have_distinct_instance_ids() {
        let a = RunExporter::new().encode(empty_record());
        let b = RunExporter::new().encode(empty_record());
        assert_ne!(a.producer.instance_id, b.producer.instance_id);
    }
}
