// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vertac

//! Signal math - normalization, smoothing, resampling, correlation and distances
//!
//! Every function here is total: empty or constant inputs degrade to a neutral
//! value instead of panicking or producing NaN.

use nalgebra::DMatrix;

use super::statistics::SeriesStats;

/// Guard added to divisors that may be zero
pub const EPSILON: f64 = 1e-10;

/// Min-max normalize into `[0, 1]`. A constant series maps to all zeros.
pub fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }

    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;

    if range <= 0.0 || !range.is_finite() {
        return vec![0.0; values.len()];
    }

    values.iter().map(|&x| (x - min) / range).collect()
}

/// Subtract the mean and divide by the (population) std plus epsilon
pub fn z_normalize(values: &[f64]) -> Vec<f64> {
    let stats = SeriesStats::of(values);
    values
        .iter()
        .map(|&x| (x - stats.mean) / (stats.std_dev + EPSILON))
        .collect()
}

/// Savitzky-Golay polynomial smoothing filter.
///
/// Interior points use the centered least-squares fit; the first and last
/// `window / 2` points are evaluated on the polynomial fitted to the first and
/// last full window respectively.
#[derive(Debug, Clone)]
pub struct SavitzkyGolay {
    window: usize,
    /// Hat matrix `A (A^T A)^-1 A^T` of the window, row `r` smooths position `r`
    projection: DMatrix<f64>,
}

impl SavitzkyGolay {
    /// Returns `None` for an even window or a window too small for the order
    pub fn new(window: usize, order: usize) -> Option<Self> {
        if window % 2 == 0 || window <= order {
            return None;
        }

        let half = (window / 2) as f64;
        let vandermonde = DMatrix::from_fn(window, order + 1, |i, j| (i as f64 - half).powi(j as i32));
        let transposed = vandermonde.transpose();
        let gram_inv = (&transposed * &vandermonde).try_inverse()?;
        let projection = &vandermonde * gram_inv * transposed;

        Some(Self { window, projection })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Smooth a series; series shorter than the window are returned unchanged
    pub fn smooth(&self, values: &[f64]) -> Vec<f64> {
        let n = values.len();
        let w = self.window;
        if n < w {
            return values.to_vec();
        }

        let half = w / 2;
        let apply = |row: usize, offset: usize| -> f64 {
            (0..w).map(|i| self.projection[(row, i)] * values[offset + i]).sum()
        };

        let mut out = Vec::with_capacity(n);
        for k in 0..n {
            let value = if k < half {
                apply(k, 0)
            } else if k >= n - half {
                apply(k - (n - w), n - w)
            } else {
                apply(half, k - half)
            };
            out.push(value);
        }
        out
    }
}

/// Smooth with a fresh filter, falling back to the raw series on a bad window
pub fn smooth(values: &[f64], window: usize, order: usize) -> Vec<f64> {
    match SavitzkyGolay::new(window, order) {
        Some(filter) => filter.smooth(values),
        None => values.to_vec(),
    }
}

/// Linear interpolation onto `target_len` points over a shared `[0, 1]` index
pub fn resample_linear(values: &[f64], target_len: usize) -> Vec<f64> {
    let n = values.len();
    if n == 0 || target_len == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![values[0]; target_len];
    }
    if n == target_len {
        return values.to_vec();
    }

    (0..target_len)
        .map(|j| {
            let x = if target_len == 1 {
                0.0
            } else {
                j as f64 / (target_len - 1) as f64
            };
            let pos = x * (n - 1) as f64;
            let i = (pos.floor() as usize).min(n - 2);
            let frac = pos - i as f64;
            values[i] + (values[i + 1] - values[i]) * frac
        })
        .collect()
}

/// Resample the shorter series to the length of the longer one
pub fn align_lengths(a: &[f64], b: &[f64]) -> (Vec<f64>, Vec<f64>) {
    match a.len().cmp(&b.len()) {
        std::cmp::Ordering::Less => (resample_linear(a, b.len()), b.to_vec()),
        std::cmp::Ordering::Greater => (a.to_vec(), resample_linear(b, a.len())),
        std::cmp::Ordering::Equal => (a.to_vec(), b.to_vec()),
    }
}

/// Pearson correlation over the common prefix.
///
/// `None` when fewer than two points overlap or either side is constant.
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len().min(b.len());
    if n < 2 {
        return None;
    }
    let (a, b) = (&a[..n], &b[..n]);

    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (&x, &y) in a.iter().zip(b) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    if is_constant(a) || is_constant(b) || sxx <= 0.0 || syy <= 0.0 {
        return None;
    }

    let r = sxy / (sxx * syy).sqrt();
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}

fn is_constant(values: &[f64]) -> bool {
    values.windows(2).all(|w| w[0] == w[1])
}

/// Lag of the cross-correlation peak, "same" mode.
///
/// The correlation `c[k] = sum a[n + k] * b[n]` is evaluated over the
/// `a.len()` lags centered on the full correlation; the reported lag is the
/// first maximum's index relative to the center. For equal lengths this is
/// the shift `k` by which `a` trails `b`.
pub fn cross_correlation_lag(a: &[f64], b: &[f64]) -> i64 {
    let n1 = a.len() as i64;
    let n2 = b.len() as i64;
    if n1 == 0 || n2 == 0 {
        return 0;
    }

    let first_lag = (n2 - 1) / 2 - (n2 - 1);
    let mut best_index = 0i64;
    let mut best_value = f64::NEG_INFINITY;

    for i in 0..n1 {
        let lag = first_lag + i;
        let lo = 0i64.max(-lag);
        let hi = n2.min(n1 - lag);
        let mut sum = 0.0;
        let mut n = lo;
        while n < hi {
            sum += a[(n + lag) as usize] * b[n as usize];
            n += 1;
        }
        if sum > best_value {
            best_value = sum;
            best_index = i;
        }
    }

    best_index - n1 / 2
}

/// Euclidean distance over the common prefix
pub fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Dynamic time warping distance with cost `|a - b|` and
/// insert/delete/match transitions. Empty input yields 0.
pub fn dtw_distance(a: &[f64], b: &[f64]) -> f64 {
    let (n, m) = (a.len(), b.len());
    if n == 0 || m == 0 {
        return 0.0;
    }

    let mut prev = vec![f64::INFINITY; m + 1];
    let mut curr = vec![f64::INFINITY; m + 1];
    prev[0] = 0.0;

    for i in 1..=n {
        curr[0] = f64::INFINITY;
        for j in 1..=m {
            let cost = (a[i - 1] - b[j - 1]).abs();
            let best = prev[j].min(curr[j - 1]).min(prev[j - 1]);
            curr[j] = cost + best;
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[m]
}

/// Point-wise `(max, mean)` absolute difference over the common prefix
pub fn pointwise_deviation(a: &[f64], b: &[f64]) -> (f64, f64) {
    let n = a.len().min(b.len());
    if n == 0 {
        return (0.0, 0.0);
    }
    let diffs: Vec<f64> = a.iter().zip(b).map(|(&x, &y)| (x - y).abs()).collect();
    let max = diffs.iter().cloned().fold(0.0, f64::max);
    let mean = diffs.iter().sum::<f64>() / n as f64;
    (max, mean)
}
