// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vertac

//! Descriptive statistics for sensor series

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Summary of one series
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    pub count: usize,
    pub mean: f64,
    /// Population standard deviation (divides by `n`)
    pub std_dev: f64,
    /// Sample standard deviation (divides by `n - 1`), 0 below two points
    pub sample_std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl SeriesStats {
    pub fn of(data: &[f64]) -> Self {
        if data.is_empty() {
            return Self::default();
        }

        let sample_std_dev = if data.len() > 1 { data.std_dev() } else { 0.0 };

        Self {
            count: data.len(),
            mean: data.mean(),
            std_dev: data.population_std_dev(),
            sample_std_dev,
            min: data.min(),
            max: data.max(),
        }
    }
}

/// Relative difference of `value` against `reference`, guarded against zero
pub fn relative_difference(value: f64, reference: f64) -> f64 {
    (value - reference).abs() / (reference.abs() + super::signal::EPSILON)
}
