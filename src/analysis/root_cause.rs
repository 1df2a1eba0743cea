// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vertac

//! Root-cause windowing for abnormally ended cycles

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{series_values, Cycle, CycleSamples};

use super::comparator::amplitude_terms;
use super::deviation::{DeviationType, TimeWindow};
use super::statistics::SeriesStats;

/// Confidence reported when no sensor clears the threshold
const NO_CAUSE_CONFIDENCE: f64 = 0.1;
const MAX_CONFIDENCE: f64 = 0.95;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootCauseContributor {
    pub sensor_id: String,
    pub contribution_score: f64,
    pub deviation_type: DeviationType,
    pub time_of_deviation: Option<DateTime<Utc>>,
    pub description: String,
    pub contribution_rank: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootCauseReport {
    pub cycle_id: String,
    pub analysis_window: TimeWindow,
    pub ranked_contributors: Vec<RootCauseContributor>,
    pub most_likely_cause: String,
    pub confidence: f64,
}

/// Pick the analysis window `[stop - W, stop]`, never starting before the cycle
pub fn analysis_window(cycle: &Cycle, window_secs: Option<f64>) -> TimeWindow {
    let end = cycle
        .stop_time
        .or(cycle.end_time)
        .unwrap_or(cycle.start_time);

    let width = window_secs.unwrap_or_else(|| cycle.duration_secs() * 0.1).max(0.0);
    let start = end - Duration::milliseconds((width * 1000.0).round() as i64);

    TimeWindow {
        start: start.max(cycle.start_time),
        end,
    }
}

fn intensity(score: f64) -> &'static str {
    if score > 0.7 {
        "high"
    } else if score > 0.4 {
        "moderate"
    } else {
        "low"
    }
}

/// Rank the sensors whose end-of-cycle behavior departs from the reference.
///
/// Complete cycles have nothing to explain and yield `None`. The amplitude
/// versus shape split is a heuristic: amplitude when the mean term strictly
/// dominates the spread term.
pub fn locate_root_cause(
    cycle: &Cycle,
    current: &CycleSamples,
    reference: &CycleSamples,
    window_secs: Option<f64>,
    threshold: f64,
) -> Option<RootCauseReport> {
    if cycle.is_complete() {
        return None;
    }

    let window = analysis_window(cycle, window_secs);

    let mut contributors: Vec<RootCauseContributor> = current
        .iter()
        .filter_map(|(sensor_id, points)| {
            let reference_points = reference.get(sensor_id)?;
            if reference_points.is_empty() {
                return None;
            }

            let in_window: Vec<_> = points
                .iter()
                .filter(|p| p.timestamp >= window.start && p.timestamp <= window.end)
                .collect();
            if in_window.is_empty() {
                return None;
            }

            let values: Vec<f64> = in_window.iter().map(|p| p.value).collect();
            let stats = SeriesStats::of(&values);
            let ref_stats = SeriesStats::of(&series_values(reference_points));

            let (score, mean_term, std_term) = amplitude_terms(
                stats.mean,
                stats.sample_std_dev,
                ref_stats.mean,
                ref_stats.sample_std_dev,
            );
            if score <= threshold {
                return None;
            }

            let deviation_type = if mean_term > std_term {
                DeviationType::Amplitude
            } else {
                DeviationType::Shape
            };

            Some(RootCauseContributor {
                sensor_id: sensor_id.clone(),
                contribution_score: score,
                deviation_type,
                time_of_deviation: in_window.last().map(|p| p.timestamp),
                description: format!(
                    "{} shows {} {}",
                    sensor_id,
                    intensity(score),
                    deviation_type.describe()
                ),
                contribution_rank: 0,
            })
        })
        .collect();

    contributors.sort_by(|a, b| b.contribution_score.total_cmp(&a.contribution_score));
    for (i, c) in contributors.iter_mut().enumerate() {
        c.contribution_rank = i + 1;
    }

    let (most_likely_cause, confidence) = match contributors.first() {
        Some(top) => (
            format!("Abnormal behavior in {}", top.sensor_id),
            top.contribution_score.min(MAX_CONFIDENCE),
        ),
        None => (
            "No clear deviation detected in available sensors".to_string(),
            NO_CAUSE_CONFIDENCE,
        ),
    };

    Some(RootCauseReport {
        cycle_id: cycle.cycle_id.clone(),
        analysis_window: window,
        ranked_contributors: contributors,
        most_likely_cause,
        confidence,
    })
}
