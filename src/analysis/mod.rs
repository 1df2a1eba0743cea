// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vertac

//! Analysis module - signal comparison, deviation scoring and root cause

mod comparator;
mod deviation;
mod root_cause;
mod signal;
mod statistics;

pub use comparator::*;
pub use deviation::*;
pub use root_cause::*;
pub use signal::*;
pub use statistics::*;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::AnalysisConfig;
use crate::error::{Result, VertacError};
use crate::model::{series_values, Cycle, CycleSamples};
use crate::storage::{CycleStore, SampleStore};

/// Upper bound on contributing sensors listed per anomalous cycle
const ANOMALY_TOP_SENSORS: usize = 5;
const STREAMING_TOP_SENSORS: usize = 3;

/// Deviation engine over stored cycles
pub struct AnalysisEngine {
    config: AnalysisConfig,
    cycles: Arc<dyn CycleStore>,
    samples: Arc<dyn SampleStore>,
    correlation: CorrelationComparator,
    distance: DistanceComparator,
}

impl AnalysisEngine {
    pub fn new(
        config: AnalysisConfig,
        cycles: Arc<dyn CycleStore>,
        samples: Arc<dyn SampleStore>,
    ) -> Self {
        Self {
            correlation: CorrelationComparator::new(&config),
            distance: DistanceComparator::new(&config),
            config,
            cycles,
            samples,
        }
    }

    pub fn comparator(&self, mode: ComparisonMode) -> &dyn SignalComparator {
        match mode {
            ComparisonMode::Batch => &self.correlation,
            ComparisonMode::Streaming => &self.distance,
        }
    }

    /// Compare two sample sets sensor by sensor with the comparator of `mode`.
    ///
    /// Sensors missing from either side are skipped.
    pub fn analyze(
        &self,
        cycle_id: &str,
        reference_cycle_id: &str,
        current: &CycleSamples,
        reference: &CycleSamples,
        compared_to: ComparedTo,
        mode: ComparisonMode,
    ) -> AnalysisResult {
        let comparator = self.comparator(mode);

        let pairs: Vec<(&String, Vec<f64>, Vec<f64>)> = current
            .iter()
            .filter_map(|(sensor_id, points)| {
                let reference_points = reference.get(sensor_id)?;
                Some((sensor_id, series_values(points), series_values(reference_points)))
            })
            .collect();

        let mut sensors: Vec<SensorComparison> = pairs
            .par_iter()
            .map(|(sensor_id, cur, refv)| comparator.compare(sensor_id, cur, refv, compared_to))
            .collect();

        sensors.sort_by(|a, b| comparator.rank_key(b).total_cmp(&comparator.rank_key(a)));
        for (i, s) in sensors.iter_mut().enumerate() {
            s.contribution_rank = i + 1;
        }

        let health_score = comparator.health(&sensors);
        let anomaly_flag = comparator.is_anomalous(health_score);

        let similarity_score = match mode {
            ComparisonMode::Batch => Some(mean_similarity(&sensors)),
            ComparisonMode::Streaming => None,
        };

        let top_contributors = sensors
            .iter()
            .take(STREAMING_TOP_SENSORS)
            .map(|s| (s.sensor_id.clone(), comparator.rank_key(s)))
            .collect();

        let alerts = sensors
            .iter()
            .filter(|s| s.level != SeverityLevel::Normal)
            .map(alert_for)
            .collect();

        let deviations: Vec<Deviation> = sensors
            .iter()
            .flat_map(|s| s.deviations.iter().cloned())
            .collect();
        let recommendations = recommend(&deviations, self.config.max_recommendations);

        let summary = match mode {
            ComparisonMode::Batch => {
                similarity_summary(similarity_score.unwrap_or(0.0), deviations.len())
            }
            ComparisonMode::Streaming => format!(
                "Cycle health {:.1}/100 across {} sensor(s){}",
                health_score,
                sensors.len(),
                if anomaly_flag { " - anomaly detected" } else { "" }
            ),
        };

        debug!(
            "Analyzed cycle {} against {} ({:?}): health={:.3}, sensors={}",
            cycle_id,
            reference_cycle_id,
            mode,
            health_score,
            sensors.len()
        );

        AnalysisResult {
            cycle_id: cycle_id.to_string(),
            reference_cycle_id: reference_cycle_id.to_string(),
            mode,
            compared_to,
            completed_at: Utc::now(),
            sensors,
            health_score,
            anomaly_flag,
            similarity_score,
            top_contributors,
            alerts,
            recommendations,
            summary,
        }
    }

    fn load_pair(&self, cycle_id: &str, reference_cycle_id: &str) -> Result<(Cycle, Cycle)> {
        let cycle = self.cycles.require_cycle(cycle_id)?;
        let reference = self.cycles.require_cycle(reference_cycle_id)?;
        if cycle.dataset_id != reference.dataset_id {
            return Err(VertacError::DatasetMismatch {
                cycle_id: cycle_id.to_string(),
                other_id: reference_cycle_id.to_string(),
            });
        }
        Ok((cycle, reference))
    }

    fn batch_against(
        &self,
        cycle: &Cycle,
        baseline: &Cycle,
        compared_to: ComparedTo,
        sensors: Option<&[String]>,
    ) -> Result<AnalysisResult> {
        let current = self.samples.query_cycle_samples(&cycle.cycle_id, sensors)?;
        let reference = self.samples.query_cycle_samples(&baseline.cycle_id, sensors)?;
        Ok(self.analyze(
            &cycle.cycle_id,
            &baseline.cycle_id,
            &current,
            &reference,
            compared_to,
            ComparisonMode::Batch,
        ))
    }

    /// Batch comparison of two cycles of one dataset; deviations are persisted
    pub fn compare_cycles(
        &self,
        cycle_id: &str,
        reference_cycle_id: &str,
        sensors: Option<&[String]>,
    ) -> Result<AnalysisResult> {
        let (cycle, reference) = self.load_pair(cycle_id, reference_cycle_id)?;
        let result = self.batch_against(&cycle, &reference, ComparedTo::Reference, sensors)?;

        self.cycles
            .store_deviations(cycle_id, reference_cycle_id, &result.deviations())?;

        info!(
            "Compared cycle {} with {}: similarity={:.3}, deviations={}",
            cycle_id,
            reference_cycle_id,
            result.similarity_score.unwrap_or(0.0),
            result.deviations().len()
        );
        Ok(result)
    }

    /// Compare a cycle against its dataset reference and its predecessor
    pub fn analyze_deviations(
        &self,
        cycle_id: &str,
        to_reference: bool,
        to_previous: bool,
    ) -> Result<DeviationReport> {
        let cycle = self.cycles.require_cycle(cycle_id)?;

        let mut from_reference = Vec::new();
        if to_reference && !cycle.is_reference {
            if let Some(reference) = self.cycles.reference_cycle(&cycle.dataset_id)? {
                if reference.cycle_id != cycle.cycle_id {
                    let result = self.batch_against(&cycle, &reference, ComparedTo::Reference, None)?;
                    from_reference = result.deviations();
                    self.cycles
                        .store_deviations(cycle_id, &reference.cycle_id, &from_reference)?;
                }
            }
        }

        let mut from_previous = Vec::new();
        if to_previous {
            if let Some(previous) = self.cycles.previous_cycle(&cycle)? {
                let result = self.batch_against(&cycle, &previous, ComparedTo::Previous, None)?;
                from_previous = result.deviations();
                self.cycles
                    .store_deviations(cycle_id, &previous.cycle_id, &from_previous)?;
            }
        }

        let all: Vec<Deviation> = from_reference
            .iter()
            .chain(from_previous.iter())
            .cloned()
            .collect();
        let health = batch_health(&all);
        let is_anomalous = self.correlation.is_anomalous(health);

        self.cycles.update_anomaly(cycle_id, 1.0 - health, is_anomalous)?;

        info!(
            "Deviation analysis of cycle {}: health={:.3}, reference={}, previous={}",
            cycle_id,
            health,
            from_reference.len(),
            from_previous.len()
        );

        Ok(DeviationReport {
            cycle_id: cycle_id.to_string(),
            has_deviations: !all.is_empty(),
            deviations_from_reference: from_reference,
            deviations_from_previous: from_previous,
            overall_health_score: health,
            recommendations: recommend(&all, self.config.max_recommendations),
        })
    }

    /// Cycles of a dataset whose stored anomaly score exceeds `1 - threshold`
    pub fn detect_anomalies(&self, dataset_id: &str, threshold: f64) -> Result<Vec<AnomalySummary>> {
        let cutoff = 1.0 - threshold;
        let mut anomalies = Vec::new();

        for cycle in self.cycles.list_cycles(dataset_id)? {
            let score = match cycle.anomaly_score {
                Some(score) if score > cutoff => score,
                _ => continue,
            };

            let sensors = self
                .cycles
                .top_contributing_sensors(&cycle.cycle_id, ANOMALY_TOP_SENSORS)?;
            let description = if sensors.is_empty() {
                format!("Cycle {} deviates from expected behavior", cycle.cycle_number)
            } else {
                format!(
                    "Cycle {} shows deviations in: {}",
                    cycle.cycle_number,
                    sensors.join(", ")
                )
            };

            anomalies.push(AnomalySummary {
                cycle_id: cycle.cycle_id.clone(),
                cycle_number: cycle.cycle_number,
                anomaly_score: score,
                is_anomalous: cycle.anomaly_flag,
                top_contributing_sensors: sensors,
                description,
            });
        }

        Ok(anomalies)
    }

    /// Rank likely causes for an abnormally ended cycle.
    ///
    /// `Ok(None)` for cycles that completed normally.
    pub fn analyze_root_cause(
        &self,
        cycle_id: &str,
        time_window_seconds: Option<f64>,
    ) -> Result<Option<RootCauseReport>> {
        let cycle = self.cycles.require_cycle(cycle_id)?;
        if cycle.is_complete() {
            return Ok(None);
        }

        let reference = self
            .cycles
            .reference_cycle(&cycle.dataset_id)?
            .ok_or_else(|| VertacError::NoReferenceCycle(cycle.dataset_id.clone()))?;

        let current = self.samples.query_cycle_samples(&cycle.cycle_id, None)?;
        let baseline = self.samples.query_cycle_samples(&reference.cycle_id, None)?;

        let report = locate_root_cause(
            &cycle,
            &current,
            &baseline,
            time_window_seconds,
            self.config.root_cause_threshold,
        );

        if let Some(report) = &report {
            info!(
                "Root cause for cycle {}: {} (confidence {:.2})",
                cycle_id, report.most_likely_cause, report.confidence
            );
        }
        Ok(report)
    }

    /// Streaming comparison of a just-finalized cycle.
    ///
    /// The baseline is the dataset reference, or the previous cycle when the
    /// finalized cycle is itself the reference. Returns `None` without a
    /// baseline or without samples on either side.
    pub fn analyze_completed(&self, cycle: &Cycle) -> Result<Option<AnalysisResult>> {
        let (baseline, compared_to) = match self.cycles.reference_cycle(&cycle.dataset_id)? {
            Some(reference) if reference.cycle_id != cycle.cycle_id => {
                (Some(reference), ComparedTo::Reference)
            }
            _ => (self.cycles.previous_cycle(cycle)?, ComparedTo::Previous),
        };

        let Some(baseline) = baseline else {
            debug!("No baseline for cycle {}, skipping analysis", cycle.cycle_id);
            return Ok(None);
        };

        let current = self.samples.query_cycle_samples(&cycle.cycle_id, None)?;
        let reference = self.samples.query_cycle_samples(&baseline.cycle_id, None)?;
        if current.is_empty() || reference.is_empty() {
            debug!("Cycle {} or its baseline has no samples", cycle.cycle_id);
            return Ok(None);
        }

        let result = self.analyze(
            &cycle.cycle_id,
            &baseline.cycle_id,
            &current,
            &reference,
            compared_to,
            ComparisonMode::Streaming,
        );

        self.cycles
            .update_health(&cycle.cycle_id, result.health_score, result.anomaly_flag)?;

        info!(
            "Cycle {} analyzed: health={:.1}, anomaly={}, alerts={}",
            cycle.cycle_id,
            result.health_score,
            result.anomaly_flag,
            result.alerts.len()
        );
        Ok(Some(result))
    }
}

fn mean_similarity(sensors: &[SensorComparison]) -> f64 {
    let values: Vec<f64> = sensors
        .iter()
        .filter_map(|s| s.correlation.map(|c| c.similarity))
        .collect();
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn similarity_summary(similarity: f64, deviation_count: usize) -> String {
    if similarity > 0.9 {
        "Cycles are highly similar".to_string()
    } else if similarity > 0.7 {
        format!(
            "Cycles show moderate similarity with {} deviation(s)",
            deviation_count
        )
    } else {
        "Cycles differ significantly".to_string()
    }
}

fn alert_for(sensor: &SensorComparison) -> Alert {
    Alert {
        sensor_id: sensor.sensor_id.clone(),
        severity: sensor.level,
        message: format!(
            "{} deviation on {} (score {:.2})",
            sensor.level.as_str(),
            sensor.sensor_id,
            sensor.severity
        ),
        score: sensor.severity,
        euclidean_distance: sensor.distance.map(|d| d.euclidean),
        dtw_distance: sensor.distance.map(|d| d.dtw),
    }
}

/// Per-sensor advice from the mean severity of its deviations
fn recommend(deviations: &[Deviation], limit: usize) -> Vec<String> {
    if deviations.is_empty() {
        return vec!["Cycle operating normally".to_string()];
    }

    let mut by_sensor: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for d in deviations {
        by_sensor.entry(d.sensor_id.as_str()).or_default().push(d.severity);
    }

    let mut ranked: Vec<(&str, f64)> = by_sensor
        .into_iter()
        .map(|(sensor, severities)| {
            let mean = severities.iter().sum::<f64>() / severities.len() as f64;
            (sensor, mean)
        })
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut recommendations: Vec<String> = ranked
        .into_iter()
        .filter_map(|(sensor, mean)| {
            if mean > 0.7 {
                Some(format!("Inspect {} - significant deviation detected", sensor))
            } else if mean > 0.4 {
                Some(format!("Monitor {} - moderate deviation observed", sensor))
            } else {
                None
            }
        })
        .take(limit)
        .collect();

    if recommendations.is_empty() {
        recommendations.push("Minor deviations detected - continue monitoring".to_string());
    }
    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::model::AbortReason;
    use crate::storage::SamplePoint;
    use chrono::{DateTime, Duration};
    use std::f64::consts::PI;

    struct Fixture {
        db: Arc<Database>,
        engine: AnalysisEngine,
        t0: DateTime<Utc>,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let engine = AnalysisEngine::new(AnalysisConfig::default(), db.clone(), db.clone());
        Fixture {
            db,
            engine,
            t0: Utc::now(),
        }
    }

    fn motor(i: usize) -> f64 {
        100.0 + 50.0 * (2.0 * PI * i as f64 / 50.0).sin()
    }

    fn temperature(i: usize) -> f64 {
        60.0 + 2.0 * (2.0 * PI * i as f64 / 200.0).cos()
    }

    impl Fixture {
        fn add_cycle(
            &self,
            id: &str,
            dataset: &str,
            number: u32,
            series: &[(&str, Vec<f64>)],
        ) -> Cycle {
            let start = self.t0 + Duration::minutes(number as i64);
            let len = series.iter().map(|(_, v)| v.len()).max().unwrap_or(0);

            let mut cycle = Cycle::new(id.to_string(), "stream-1", dataset, number, start);
            cycle.end_time = Some(start + Duration::milliseconds(100 * len as i64));
            cycle.sample_count = series.iter().map(|(_, v)| v.len() as u64).sum();
            self.db.save_cycle(&cycle).unwrap();

            let points: Vec<SamplePoint> = series
                .iter()
                .flat_map(|(sensor, values)| {
                    values.iter().enumerate().map(move |(i, &value)| SamplePoint {
                        dataset_id: dataset.to_string(),
                        stream_id: "stream-1".to_string(),
                        cycle_id: Some(id.to_string()),
                        sensor_id: sensor.to_string(),
                        sensor_name: sensor.to_string(),
                        value,
                        quality: 1.0,
                        latency_ms: 0,
                        timestamp: start + Duration::milliseconds(100 * i as i64),
                    })
                })
                .collect();
            self.db.write_points(&points).unwrap();
            cycle
        }

        fn normal(&self, id: &str, number: u32) -> Cycle {
            self.add_cycle(
                id,
                "ds-1",
                number,
                &[
                    ("motor_speed", (0..200).map(motor).collect()),
                    ("temperature", (0..200).map(temperature).collect()),
                ],
            )
        }
    }

    #[test]
    fn test_scaled_motor_speed_reports_amplitude_only() {
        let f = fixture();
        f.add_cycle(
            "ref",
            "ds-1",
            1,
            &[
                ("motor_speed", (0..200).map(|i| motor(i) * 1.3).collect()),
                ("temperature", (0..200).map(temperature).collect()),
            ],
        );
        f.normal("cur", 2);

        let result = f.engine.compare_cycles("cur", "ref", None).unwrap();
        let deviations = result.deviations();

        let motor_devs: Vec<&Deviation> = deviations
            .iter()
            .filter(|d| d.sensor_id == "motor_speed")
            .collect();
        assert!(motor_devs
            .iter()
            .any(|d| d.deviation_type == DeviationType::Amplitude && d.severity > 0.2));
        assert!(deviations.iter().all(|d| d.sensor_id != "temperature"));

        assert_eq!(result.sensors[0].sensor_id, "motor_speed");
        assert_eq!(result.sensors[0].contribution_rank, 1);
        assert!(result.similarity_score.unwrap() > 0.9);
        assert_eq!(result.summary, "Cycles are highly similar");

        // persisted for later anomaly listings
        let top = f.db.top_contributing_sensors("cur", 5).unwrap();
        assert_eq!(top, vec!["motor_speed".to_string()]);
    }

    #[test]
    fn test_compare_validation_errors() {
        let f = fixture();
        f.normal("a", 1);
        f.add_cycle("b", "ds-2", 1, &[("motor_speed", vec![1.0, 2.0])]);

        assert!(matches!(
            f.engine.compare_cycles("a", "missing", None),
            Err(VertacError::CycleNotFound(_))
        ));
        assert!(matches!(
            f.engine.compare_cycles("a", "b", None),
            Err(VertacError::DatasetMismatch { .. })
        ));
    }

    #[test]
    fn test_identical_cycles_are_healthy() {
        let f = fixture();
        f.normal("c-1", 1);
        f.normal("c-2", 2);
        f.db.set_reference_cycle("c-1").unwrap();

        let report = f.engine.analyze_deviations("c-2", true, true).unwrap();
        assert!(!report.has_deviations);
        assert_eq!(report.overall_health_score, 1.0);
        assert_eq!(report.recommendations, vec!["Cycle operating normally".to_string()]);

        let stored = f.db.get_cycle("c-2").unwrap().unwrap();
        assert_eq!(stored.anomaly_score, Some(0.0));
        assert!(!stored.anomaly_flag);
    }

    #[test]
    fn test_reference_skips_self_comparison() {
        let f = fixture();
        f.normal("c-1", 1);
        f.db.set_reference_cycle("c-1").unwrap();

        let report = f.engine.analyze_deviations("c-1", true, true).unwrap();
        assert!(report.deviations_from_reference.is_empty());
        assert!(report.deviations_from_previous.is_empty());
    }

    #[test]
    fn test_detect_anomalies_lists_flagged_cycles() {
        let f = fixture();
        f.normal("c-1", 1);
        let inverted: Vec<f64> = (0..200).map(|i| 200.0 - motor(i)).collect();
        let noisy: Vec<f64> = (0..200).map(|i| if i % 2 == 0 { 40.0 } else { 90.0 }).collect();
        f.add_cycle(
            "c-2",
            "ds-1",
            2,
            &[("motor_speed", inverted), ("temperature", noisy)],
        );
        f.db.set_reference_cycle("c-1").unwrap();

        let report = f.engine.analyze_deviations("c-2", true, false).unwrap();
        assert!(report.has_deviations);
        assert!(report.overall_health_score < 0.7);
        assert!(report.recommendations.len() <= 5);

        let anomalies = f.engine.detect_anomalies("ds-1", 0.7).unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].cycle_id, "c-2");
        assert!(anomalies[0].is_anomalous);
        assert!(!anomalies[0].top_contributing_sensors.is_empty());
    }

    #[test]
    fn test_root_cause_requires_reference() {
        let f = fixture();
        let mut cycle = f.normal("c-1", 1);
        cycle.abort_reason = Some(AbortReason::SampleTimeout);
        f.db.save_cycle(&cycle).unwrap();

        assert!(matches!(
            f.engine.analyze_root_cause("c-1", None),
            Err(VertacError::NoReferenceCycle(_))
        ));

        let complete = f.normal("c-2", 2);
        assert!(f.engine.analyze_root_cause(&complete.cycle_id, None).unwrap().is_none());
    }

    #[test]
    fn test_streaming_analysis_of_completed_cycle() {
        let f = fixture();
        let first = f.normal("c-1", 1);
        assert!(f.engine.analyze_completed(&first).unwrap().is_none());

        f.db.set_reference_cycle("c-1").unwrap();
        let second = f.normal("c-2", 2);
        let result = f.engine.analyze_completed(&second).unwrap().unwrap();

        assert_eq!(result.mode, ComparisonMode::Streaming);
        assert_eq!(result.reference_cycle_id, "c-1");
        assert_eq!(result.health_score, 100.0);
        assert!(!result.anomaly_flag);
        assert!(result.alerts.is_empty());
        assert_eq!(result.top_contributors.len(), 2);

        let stored = f.db.get_cycle("c-2").unwrap().unwrap();
        assert_eq!(stored.health_score, Some(100.0));
    }

    #[test]
    fn test_empty_cycles_are_healthy() {
        let f = fixture();
        let current = CycleSamples::new();
        let result = f.engine.analyze(
            "x",
            "y",
            &current,
            &CycleSamples::new(),
            ComparedTo::Reference,
            ComparisonMode::Streaming,
        );
        assert_eq!(result.health_score, 100.0);

        let batch = f.engine.analyze(
            "x",
            "y",
            &current,
            &CycleSamples::new(),
            ComparedTo::Reference,
            ComparisonMode::Batch,
        );
        assert_eq!(batch.health_score, 1.0);
        assert_eq!(batch.similarity_score, Some(0.0));
    }

    #[test]
    fn test_streaming_all_critical_is_zero_health() {
        let f = fixture();
        let wave: Vec<f64> = (0..400).map(|i| (2.0 * PI * i as f64 / 50.0).sin()).collect();
        let inverted: Vec<f64> = wave.iter().map(|v| -v).collect();

        f.add_cycle(
            "ref",
            "ds-1",
            1,
            &[("pressure", wave.clone()), ("vibration", wave)],
        );
        f.add_cycle(
            "cur",
            "ds-1",
            2,
            &[("pressure", inverted.clone()), ("vibration", inverted)],
        );
        let reference = f.db.query_cycle_samples("ref", None).unwrap();
        let current = f.db.query_cycle_samples("cur", None).unwrap();

        let result = f.engine.analyze(
            "cur",
            "ref",
            &current,
            &reference,
            ComparedTo::Reference,
            ComparisonMode::Streaming,
        );
        assert_eq!(result.sensors.len(), 2);
        assert!(result
            .sensors
            .iter()
            .all(|s| s.level == SeverityLevel::Critical));
        assert_eq!(result.health_score, 0.0);
        assert!(result.anomaly_flag);
    }

    #[test]
    fn test_recommendations_capped() {
        let deviations: Vec<Deviation> = (0..8)
            .map(|i| Deviation::new(&format!("s{}", i), DeviationType::Shape, 0.9, ComparedTo::Reference))
            .collect();
        let recs = recommend(&deviations, 5);
        assert_eq!(recs.len(), 5);
        assert!(recs[0].starts_with("Inspect"));

        let minor = vec![Deviation::new("s", DeviationType::Timing, 0.25, ComparedTo::Previous)];
        assert_eq!(
            recommend(&minor, 5),
            vec!["Minor deviations detected - continue monitoring".to_string()]
        );
    }
}
