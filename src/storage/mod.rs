// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vertac

//! Storage contracts consumed by the engine
//!
//! The engine only ever talks to these traits; `db::Database` is the SQLite
//! backed implementation of both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::Deviation;
use crate::error::{Result, VertacError};
use crate::model::{Cycle, CycleSamples, Dataset};

/// One time-series point. Tags identify the series, fields carry the reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    pub dataset_id: String,
    pub stream_id: String,
    pub cycle_id: Option<String>,
    pub sensor_id: String,
    pub sensor_name: String,
    pub value: f64,
    pub quality: f64,
    /// Receipt time minus sample time, floored at zero
    pub latency_ms: i64,
    pub timestamp: DateTime<Utc>,
}

/// Time-series store
pub trait SampleStore: Send + Sync {
    fn write_points(&self, points: &[SamplePoint]) -> Result<usize>;

    /// Ordered series per sensor for one cycle, optionally restricted to `sensor_ids`
    fn query_cycle_samples(
        &self,
        cycle_id: &str,
        sensor_ids: Option<&[String]>,
    ) -> Result<CycleSamples>;
}

/// Relational store of datasets and cycles
pub trait CycleStore: Send + Sync {
    fn save_dataset(&self, dataset: &Dataset) -> Result<()>;
    fn get_dataset(&self, dataset_id: &str) -> Result<Option<Dataset>>;

    /// Insert or replace a cycle record
    fn save_cycle(&self, cycle: &Cycle) -> Result<()>;
    fn get_cycle(&self, cycle_id: &str) -> Result<Option<Cycle>>;
    fn list_cycles(&self, dataset_id: &str) -> Result<Vec<Cycle>>;

    fn reference_cycle(&self, dataset_id: &str) -> Result<Option<Cycle>>;

    /// Mark a cycle as its dataset's reference, unsetting any other
    fn set_reference_cycle(&self, cycle_id: &str) -> Result<()>;

    /// Cycle numbered `cycle_number - 1` in the same dataset
    fn previous_cycle(&self, cycle: &Cycle) -> Result<Option<Cycle>>;

    fn update_health(&self, cycle_id: &str, health_score: f64, anomaly_flag: bool) -> Result<()>;
    fn update_anomaly(&self, cycle_id: &str, anomaly_score: f64, anomaly_flag: bool) -> Result<()>;

    fn store_deviations(
        &self,
        cycle_id: &str,
        baseline_cycle_id: &str,
        deviations: &[Deviation],
    ) -> Result<()>;

    /// Sensors with the highest stored deviation severity for a cycle
    fn top_contributing_sensors(&self, cycle_id: &str, limit: usize) -> Result<Vec<String>>;

    /// Fetch a cycle or fail with `CycleNotFound`
    fn require_cycle(&self, cycle_id: &str) -> Result<Cycle> {
        self.get_cycle(cycle_id)?
            .ok_or_else(|| VertacError::CycleNotFound(cycle_id.to_string()))
    }
}
