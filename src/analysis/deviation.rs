// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vertac

//! Deviation records and analysis results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of departure from the baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviationType {
    Amplitude,
    Shape,
    Timing,
    Overall,
}

impl DeviationType {
    /// Weight of this type in the batch health score
    pub fn weight(&self) -> f64 {
        match self {
            DeviationType::Amplitude => 0.8,
            DeviationType::Shape => 1.0,
            DeviationType::Timing => 0.6,
            DeviationType::Overall => 1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviationType::Amplitude => "amplitude",
            DeviationType::Shape => "shape",
            DeviationType::Timing => "timing",
            DeviationType::Overall => "overall",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "amplitude" => Some(DeviationType::Amplitude),
            "shape" => Some(DeviationType::Shape),
            "timing" => Some(DeviationType::Timing),
            "overall" => Some(DeviationType::Overall),
            _ => None,
        }
    }

    pub(crate) fn describe(&self) -> &'static str {
        match self {
            DeviationType::Amplitude => "amplitude anomaly",
            DeviationType::Shape => "pattern change",
            DeviationType::Timing => "timing shift",
            DeviationType::Overall => "abnormal behavior",
        }
    }
}

/// Which baseline a comparison was made against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparedTo {
    Reference,
    Previous,
}

impl ComparedTo {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparedTo::Reference => "reference",
            ComparedTo::Previous => "previous",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reference" => Some(ComparedTo::Reference),
            "previous" => Some(ComparedTo::Previous),
            _ => None,
        }
    }
}

/// Detector family used for a comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonMode {
    /// Correlation family, used for cross-cycle comparison
    Batch,
    /// Distance family, used right after live cycle completion
    Streaming,
}

/// Severity bucket of a sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityLevel {
    Normal,
    Warning,
    Critical,
}

impl SeverityLevel {
    pub fn from_score(score: f64, warning: f64, critical: f64) -> Self {
        if score > critical {
            SeverityLevel::Critical
        } else if score > warning {
            SeverityLevel::Warning
        } else {
            SeverityLevel::Normal
        }
    }

    /// Contribution of a sensor in this bucket to the streaming health score
    pub fn health_weight(&self) -> f64 {
        match self {
            SeverityLevel::Critical => 0.0,
            SeverityLevel::Warning => 0.5,
            SeverityLevel::Normal => 1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SeverityLevel::Normal => "normal",
            SeverityLevel::Warning => "warning",
            SeverityLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// One sensor's departure from a baseline. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deviation {
    pub sensor_id: String,
    pub deviation_type: DeviationType,
    /// Always within `[0, 1]`
    pub severity: f64,
    pub compared_to: ComparedTo,
    pub time_window: Option<TimeWindow>,
    pub description: String,
}

impl Deviation {
    pub fn new(sensor_id: &str, deviation_type: DeviationType, severity: f64, compared_to: ComparedTo) -> Self {
        let description = match deviation_type {
            DeviationType::Amplitude => "Significant amplitude difference detected",
            DeviationType::Shape => "Signal shape differs from reference",
            DeviationType::Timing => "Timing offset detected",
            DeviationType::Overall => "Overall signal distance exceeds tolerance",
        };
        Self {
            sensor_id: sensor_id.to_string(),
            deviation_type,
            severity: clamp_unit(severity),
            compared_to,
            time_window: None,
            description: description.to_string(),
        }
    }
}

/// Correlation-family scores of one sensor
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationScores {
    pub similarity: f64,
    pub amplitude: f64,
    pub shape: f64,
    pub timing: f64,
}

/// Distance-family scores of one sensor
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DistanceScores {
    pub euclidean: f64,
    pub dtw: f64,
    pub combined: f64,
    pub max_deviation: f64,
    pub mean_deviation: f64,
}

/// Outcome of comparing one sensor's series against its baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorComparison {
    pub sensor_id: String,
    /// Raw severity in `[0, 1]` before the reporting threshold
    pub severity: f64,
    pub level: SeverityLevel,
    /// Deviations above the reporting threshold
    pub deviations: Vec<Deviation>,
    pub correlation: Option<CorrelationScores>,
    pub distance: Option<DistanceScores>,
    /// 1-based rank after sorting, 0 until ranked
    pub contribution_rank: usize,
}

/// Human facing alert for a warning/critical sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub sensor_id: String,
    pub severity: SeverityLevel,
    pub message: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub euclidean_distance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtw_distance: Option<f64>,
}

/// Aggregate of one cycle-vs-baseline comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub cycle_id: String,
    pub reference_cycle_id: String,
    pub mode: ComparisonMode,
    pub compared_to: ComparedTo,
    pub completed_at: DateTime<Utc>,
    /// Ranked, highest contributor first
    pub sensors: Vec<SensorComparison>,
    /// `[0, 1]` in batch mode, `[0, 100]` in streaming mode
    pub health_score: f64,
    pub anomaly_flag: bool,
    /// Mean per-sensor similarity (batch mode only)
    pub similarity_score: Option<f64>,
    pub top_contributors: Vec<(String, f64)>,
    pub alerts: Vec<Alert>,
    pub recommendations: Vec<String>,
    pub summary: String,
}

impl AnalysisResult {
    /// All reported deviations across sensors in rank order
    pub fn deviations(&self) -> Vec<Deviation> {
        self.sensors
            .iter()
            .flat_map(|s| s.deviations.iter().cloned())
            .collect()
    }

    pub fn sensor(&self, sensor_id: &str) -> Option<&SensorComparison> {
        self.sensors.iter().find(|s| s.sensor_id == sensor_id)
    }
}

/// Result of comparing a cycle against its reference and previous cycles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviationReport {
    pub cycle_id: String,
    pub has_deviations: bool,
    pub deviations_from_reference: Vec<Deviation>,
    pub deviations_from_previous: Vec<Deviation>,
    pub overall_health_score: f64,
    pub recommendations: Vec<String>,
}

/// Dataset-level anomaly listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalySummary {
    pub cycle_id: String,
    pub cycle_number: u32,
    pub anomaly_score: f64,
    pub is_anomalous: bool,
    pub top_contributing_sensors: Vec<String>,
    pub description: String,
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Weighted batch health: `1 - weighted mean severity`, 1.0 with no deviations
pub fn batch_health(deviations: &[Deviation]) -> f64 {
    let total_weight: f64 = deviations.iter().map(|d| d.deviation_type.weight()).sum();
    if deviations.is_empty() || total_weight <= 0.0 {
        return 1.0;
    }

    let weighted: f64 = deviations
        .iter()
        .map(|d| d.severity * d.deviation_type.weight())
        .sum();

    clamp_unit(1.0 - weighted / total_weight)
}

/// Streaming health on `[0, 100]`, 100 with no sensors
pub fn streaming_health(levels: &[SeverityLevel]) -> f64 {
    if levels.is_empty() {
        return 100.0;
    }
    let avg = levels.iter().map(|l| l.health_weight()).sum::<f64>() / levels.len() as f64;
    avg * 100.0
}
