// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vertac

//! Per-sensor comparison strategies
//!
//! Both detector families answer the same question, "how far is this series
//! from its baseline", and are selected by [`ComparisonMode`].

use crate::config::AnalysisConfig;

use super::deviation::{
    batch_health, clamp_unit, streaming_health, ComparedTo, ComparisonMode, CorrelationScores,
    Deviation, DeviationType, DistanceScores, SensorComparison, SeverityLevel,
};
use super::signal::{
    align_lengths, cross_correlation_lag, dtw_distance, euclidean, min_max_normalize, pearson,
    pointwise_deviation, z_normalize, SavitzkyGolay,
};
use super::statistics::{relative_difference, SeriesStats};

/// Compares one sensor series against a baseline series
pub trait SignalComparator: Send + Sync {
    fn mode(&self) -> ComparisonMode;

    /// Compare `current` against `reference`. Never fails: degenerate
    /// inputs produce zero severities.
    fn compare(
        &self,
        sensor_id: &str,
        current: &[f64],
        reference: &[f64],
        compared_to: ComparedTo,
    ) -> SensorComparison;

    /// Aggregate health of a set of compared sensors
    fn health(&self, comparisons: &[SensorComparison]) -> f64;

    fn is_anomalous(&self, health: f64) -> bool;

    /// Key used to rank sensors, larger contributes more
    fn rank_key(&self, comparison: &SensorComparison) -> f64;
}

/// Correlation family: similarity, amplitude, shape and timing
pub struct CorrelationComparator {
    report_threshold: f64,
    warning_threshold: f64,
    critical_threshold: f64,
    anomaly_health: f64,
}

impl CorrelationComparator {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            report_threshold: config.report_threshold,
            warning_threshold: config.warning_threshold,
            critical_threshold: config.critical_threshold,
            anomaly_health: config.batch_anomaly_health,
        }
    }

    /// Score a pair of series without thresholding
    pub fn scores(current: &[f64], reference: &[f64]) -> CorrelationScores {
        if current.is_empty() || reference.is_empty() {
            return CorrelationScores {
                similarity: 1.0,
                ..Default::default()
            };
        }

        let (a, b) = align_lengths(current, reference);

        CorrelationScores {
            similarity: similarity(&a, &b),
            amplitude: amplitude_deviation(&a, &b),
            shape: shape_deviation(&a, &b),
            timing: timing_deviation(&a, &b),
        }
    }
}

/// `(r + 1) / 2` of the z-normalized series, 1 when correlation is undefined
pub fn similarity(a: &[f64], b: &[f64]) -> f64 {
    let za = z_normalize(a);
    let zb = z_normalize(b);
    pearson(&za, &zb)
        .map(|r| clamp_unit((r + 1.0) / 2.0))
        .unwrap_or(1.0)
}

/// Mean and spread relative to the reference, averaged and capped at 1
pub fn amplitude_deviation(a: &[f64], b: &[f64]) -> f64 {
    let sa = SeriesStats::of(a);
    let sb = SeriesStats::of(b);
    amplitude_terms(sa.mean, sa.std_dev, sb.mean, sb.std_dev).0
}

/// Returns `(score, mean_term, std_term)`
pub(crate) fn amplitude_terms(mean: f64, std: f64, ref_mean: f64, ref_std: f64) -> (f64, f64, f64) {
    let mean_term = relative_difference(mean, ref_mean);
    let std_term = relative_difference(std, ref_std);
    (clamp_unit((mean_term + std_term) / 2.0), mean_term, std_term)
}

/// `1 - |r|` on the raw series, 0 when correlation is undefined
pub fn shape_deviation(a: &[f64], b: &[f64]) -> f64 {
    pearson(a, b)
        .map(|r| clamp_unit(1.0 - r.abs()))
        .unwrap_or(0.0)
}

/// Cross-correlation peak lag relative to 10% of the series length
pub fn timing_deviation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len();
    if n == 0 {
        return 0.0;
    }
    let lag = cross_correlation_lag(a, b).unsigned_abs() as f64;
    let max_lag = n as f64 * 0.1;
    if max_lag <= 0.0 {
        return 0.0;
    }
    clamp_unit(lag / max_lag)
}

impl SignalComparator for CorrelationComparator {
    fn mode(&self) -> ComparisonMode {
        ComparisonMode::Batch
    }

    fn compare(
        &self,
        sensor_id: &str,
        current: &[f64],
        reference: &[f64],
        compared_to: ComparedTo,
    ) -> SensorComparison {
        let scores = Self::scores(current, reference);

        let deviations: Vec<Deviation> = [
            (DeviationType::Amplitude, scores.amplitude),
            (DeviationType::Shape, scores.shape),
            (DeviationType::Timing, scores.timing),
        ]
        .into_iter()
        .filter(|(_, severity)| *severity > self.report_threshold)
        .map(|(kind, severity)| Deviation::new(sensor_id, kind, severity, compared_to))
        .collect();

        let severity = scores.amplitude.max(scores.shape).max(scores.timing);

        SensorComparison {
            sensor_id: sensor_id.to_string(),
            severity,
            level: SeverityLevel::from_score(severity, self.warning_threshold, self.critical_threshold),
            deviations,
            correlation: Some(scores),
            distance: None,
            contribution_rank: 0,
        }
    }

    fn health(&self, comparisons: &[SensorComparison]) -> f64 {
        let deviations: Vec<Deviation> = comparisons
            .iter()
            .flat_map(|c| c.deviations.iter().cloned())
            .collect();
        batch_health(&deviations)
    }

    fn is_anomalous(&self, health: f64) -> bool {
        health < self.anomaly_health
    }

    fn rank_key(&self, comparison: &SensorComparison) -> f64 {
        comparison.severity
    }
}

/// Distance family: smoothed, normalized Euclidean and DTW
pub struct DistanceComparator {
    filter: Option<SavitzkyGolay>,
    report_threshold: f64,
    warning_threshold: f64,
    critical_threshold: f64,
    anomaly_health: f64,
}

impl DistanceComparator {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            filter: SavitzkyGolay::new(config.smoothing_window, config.smoothing_order),
            report_threshold: config.report_threshold,
            warning_threshold: config.warning_threshold,
            critical_threshold: config.critical_threshold,
            anomaly_health: config.streaming_anomaly_health,
        }
    }

    fn smooth(&self, values: &[f64]) -> Vec<f64> {
        match &self.filter {
            Some(filter) => filter.smooth(values),
            None => values.to_vec(),
        }
    }

    pub fn scores(&self, current: &[f64], reference: &[f64]) -> DistanceScores {
        if current.is_empty() || reference.is_empty() {
            return DistanceScores::default();
        }

        let smooth_current = self.smooth(current);
        let smooth_reference = self.smooth(reference);

        let n = smooth_current.len().min(smooth_reference.len());
        let euclid = euclidean(
            &min_max_normalize(&smooth_current[..n]),
            &min_max_normalize(&smooth_reference[..n]),
        );

        let (a, b) = align_lengths(&smooth_current, &smooth_reference);
        let dtw = dtw_distance(&min_max_normalize(&a), &min_max_normalize(&b));

        let combined = clamp_unit(0.6 * (euclid / 10.0) + 0.4 * (dtw / 100.0));
        let (max_deviation, mean_deviation) = pointwise_deviation(current, reference);

        DistanceScores {
            euclidean: euclid,
            dtw,
            combined,
            max_deviation,
            mean_deviation,
        }
    }
}

impl SignalComparator for DistanceComparator {
    fn mode(&self) -> ComparisonMode {
        ComparisonMode::Streaming
    }

    fn compare(
        &self,
        sensor_id: &str,
        current: &[f64],
        reference: &[f64],
        compared_to: ComparedTo,
    ) -> SensorComparison {
        let scores = self.scores(current, reference);

        let mut deviations = Vec::new();
        if scores.combined > self.report_threshold {
            deviations.push(Deviation::new(
                sensor_id,
                DeviationType::Overall,
                scores.combined,
                compared_to,
            ));
        }

        SensorComparison {
            sensor_id: sensor_id.to_string(),
            severity: scores.combined,
            level: SeverityLevel::from_score(
                scores.combined,
                self.warning_threshold,
                self.critical_threshold,
            ),
            deviations,
            correlation: None,
            distance: Some(scores),
            contribution_rank: 0,
        }
    }

    fn health(&self, comparisons: &[SensorComparison]) -> f64 {
        let levels: Vec<SeverityLevel> = comparisons.iter().map(|c| c.level).collect();
        streaming_health(&levels)
    }

    fn is_anomalous(&self, health: f64) -> bool {
        health < self.anomaly_health
    }

    fn rank_key(&self, comparison: &SensorComparison) -> f64 {
        comparison
            .distance
            .map(|d| d.euclidean + d.dtw)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn wave(n: usize, offset: f64, amplitude: f64) -> Vec<f64> {
        (0..n)
            .map(|i| offset + amplitude * (2.0 * PI * i as f64 / 50.0).sin())
            .collect()
    }

    fn in_unit(x: f64) -> bool {
        (0.0..=1.0).contains(&x)
    }

    #[test]
    fn test_identical_series() {
        let s = wave(200, 100.0, 50.0);
        let scores = CorrelationComparator::scores(&s, &s);
        assert!((scores.similarity - 1.0).abs() < 1e-6);
        assert!(scores.amplitude < 1e-6);
        assert!(scores.shape < 1e-6);
        assert_eq!(scores.timing, 0.0);
    }

    #[test]
    fn test_scaled_reference_is_amplitude() {
        let config = AnalysisConfig::default();
        let comparator = CorrelationComparator::new(&config);

        let current = wave(200, 100.0, 50.0);
        let reference: Vec<f64> = current.iter().map(|v| v * 1.3).collect();

        let result = comparator.compare("motor_speed", &current, &reference, ComparedTo::Reference);
        let kinds: Vec<DeviationType> = result.deviations.iter().map(|d| d.deviation_type).collect();
        assert_eq!(kinds, vec![DeviationType::Amplitude]);
        assert!(result.deviations[0].severity > 0.2);
    }

    #[test]
    fn test_severities_bounded() {
        let a = wave(120, 0.0, 1.0);
        let b: Vec<f64> = (0..37).map(|i| ((i * 7919) % 13) as f64 * 1e6).collect();
        let scores = CorrelationComparator::scores(&a, &b);
        assert!(in_unit(scores.similarity));
        assert!(in_unit(scores.amplitude));
        assert!(in_unit(scores.shape));
        assert!(in_unit(scores.timing));
    }

    #[test]
    fn test_constant_series_degrade_to_zero() {
        let flat = vec![5.0; 40];
        let scores = CorrelationComparator::scores(&flat, &flat);
        assert_eq!(scores.similarity, 1.0);
        assert_eq!(scores.shape, 0.0);
        assert_eq!(scores.amplitude, 0.0);

        let empty = CorrelationComparator::scores(&[], &flat);
        assert_eq!(empty.amplitude, 0.0);
        assert_eq!(empty.timing, 0.0);
    }

    #[test]
    fn test_shifted_series_is_timing() {
        let pulse = |center: f64| -> Vec<f64> {
            (0..100)
                .map(|i| (-((i as f64 - center).powi(2)) / 8.0).exp())
                .collect()
        };
        let shifted = timing_deviation(&pulse(60.0), &pulse(40.0));
        assert_eq!(shifted, 1.0);
    }

    #[test]
    fn test_distance_identical_is_normal() {
        let config = AnalysisConfig::default();
        let comparator = DistanceComparator::new(&config);

        let s = wave(150, 20.0, 3.0);
        let result = comparator.compare("temp", &s, &s, ComparedTo::Reference);
        let distance = result.distance.unwrap();
        assert!(distance.euclidean.abs() < 1e-9);
        assert!(distance.dtw.abs() < 1e-9);
        assert_eq!(result.level, SeverityLevel::Normal);
        assert!(result.deviations.is_empty());
    }

    #[test]
    fn test_distance_inverted_is_critical() {
        let config = AnalysisConfig::default();
        let comparator = DistanceComparator::new(&config);

        let current = wave(400, 0.0, 1.0);
        let reference: Vec<f64> = current.iter().map(|v| -v).collect();
        let result = comparator.compare("vib", &current, &reference, ComparedTo::Reference);

        assert!(result.severity > 0.7);
        assert_eq!(result.level, SeverityLevel::Critical);
        assert_eq!(comparator.health(&[result.clone()]), 0.0);
        assert!(comparator.is_anomalous(0.0));
        assert!(comparator.rank_key(&result) > 0.0);
    }

    #[test]
    fn test_distance_unequal_lengths() {
        let config = AnalysisConfig::default();
        let comparator = DistanceComparator::new(&config);

        let current = wave(90, 5.0, 2.0);
        let reference = wave(130, 5.0, 2.0);
        let scores = comparator.scores(&current, &reference);
        assert!(scores.euclidean >= 0.0);
        assert!(scores.dtw >= 0.0);
        assert!(in_unit(scores.combined));
    }
}
