// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vertac

//! Core records - streams, samples, cycles and datasets

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Physical sensor categories known to the edge side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Analog,
    Accelerometer,
    Temperature,
    Pressure,
}

impl SensorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Analog => "analog",
            SensorKind::Accelerometer => "accelerometer",
            SensorKind::Temperature => "temperature",
            SensorKind::Pressure => "pressure",
        }
    }
}

/// Declared sensor of a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSpec {
    pub sensor_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SensorKind,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
}

impl SensorSpec {
    pub fn new(sensor_id: &str, name: &str, kind: SensorKind, unit: &str) -> Self {
        Self {
            sensor_id: sensor_id.to_string(),
            name: name.to_string(),
            kind,
            unit: unit.to_string(),
            min_value: None,
            max_value: None,
        }
    }

    pub fn with_limits(mut self, min: f64, max: f64) -> Self {
        self.min_value = Some(min);
        self.max_value = Some(max);
        self
    }

    /// Clamp a raw value into the declared limits
    pub fn clamp(&self, value: f64) -> f64 {
        let value = self.min_value.map_or(value, |min| value.max(min));
        self.max_value.map_or(value, |max| value.min(max))
    }
}

/// A registered data source. The sensor set is fixed at registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    pub stream_id: String,
    pub dataset_id: String,
    pub device_name: String,
    pub sensors: Vec<SensorSpec>,
    pub registered_at: DateTime<Utc>,
}

/// One reading from one sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub sensor_id: String,
    pub sensor_name: String,
    pub value: f64,
    #[serde(default)]
    pub unit: String,
    /// Confidence in `[0, 1]`, carried through but not used to discount severity
    #[serde(default = "default_quality")]
    pub quality: f64,
}

fn default_quality() -> f64 {
    1.0
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, sensor_id: &str, value: f64) -> Self {
        Self {
            timestamp,
            sensor_id: sensor_id.to_string(),
            sensor_name: sensor_id.to_string(),
            value,
            unit: String::new(),
            quality: 1.0,
        }
    }
}

/// A stored `(timestamp, value)` pair of a sensor series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub quality: f64,
}

/// Ordered points per sensor id for one cycle
pub type CycleSamples = BTreeMap<String, Vec<SeriesPoint>>;

/// Extract the bare values of a series
pub fn series_values(points: &[SeriesPoint]) -> Vec<f64> {
    points.iter().map(|p| p.value).collect()
}

/// Why a cycle ended without a confirmed stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    SampleTimeout,
    ConnectionLost,
    ManualAbort,
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbortReason::SampleTimeout => "sample_timeout",
            AbortReason::ConnectionLost => "connection_lost",
            AbortReason::ManualAbort => "manual_abort",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sample_timeout" => Some(AbortReason::SampleTimeout),
            "connection_lost" => Some(AbortReason::ConnectionLost),
            "manual_abort" => Some(AbortReason::ManualAbort),
            _ => None,
        }
    }
}

/// One bounded operational run of a stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cycle {
    pub cycle_id: String,
    pub stream_id: String,
    pub dataset_id: String,
    pub cycle_number: u32,
    pub start_time: DateTime<Utc>,
    pub stop_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub sample_count: u64,
    pub is_reference: bool,
    pub health_score: Option<f64>,
    pub anomaly_flag: bool,
    pub anomaly_score: Option<f64>,
    pub abort_reason: Option<AbortReason>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Cycle {
    pub fn new(
        cycle_id: String,
        stream_id: &str,
        dataset_id: &str,
        cycle_number: u32,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            cycle_id,
            stream_id: stream_id.to_string(),
            dataset_id: dataset_id.to_string(),
            cycle_number,
            start_time,
            stop_time: None,
            end_time: None,
            sample_count: 0,
            is_reference: false,
            health_score: None,
            anomaly_flag: false,
            anomaly_score: None,
            abort_reason: None,
            metadata: Map::new(),
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.end_time.is_some()
    }

    /// Finalized through STOPPING rather than aborted
    pub fn is_complete(&self) -> bool {
        self.is_finalized() && self.abort_reason.is_none()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort_reason.is_some()
    }

    /// Elapsed time from start to end; zero while the cycle is open
    pub fn duration(&self) -> chrono::Duration {
        match self.end_time {
            Some(end) if end > self.start_time => end - self.start_time,
            _ => chrono::Duration::zero(),
        }
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration().num_milliseconds() as f64 / 1000.0
    }
}

/// Relational dataset record owning a set of cycles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub dataset_id: String,
    pub name: String,
    pub device_name: String,
    pub sensors: Vec<SensorSpec>,
    pub created_at: DateTime<Utc>,
}
