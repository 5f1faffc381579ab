//! Statistics Engine
//!
//! Pure functions over numeric series. Nothing here touches the store; an
//! empty series is always reported as `None` so callers cannot mistake
//! "no data" for zero.

use serde::{Deserialize, Serialize};

/// Standard deviations at or below this are treated as zero.
const MIN_STD_DEV: f64 = 1e-9;

/// Descriptive statistics of a series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
    /// Population variance
    pub variance: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub iqr: f64,
    pub p5: f64,
    pub p95: f64,
    pub p99: f64,
    pub outlier_count: usize,
    pub outlier_percentage: f64,
}

impl Statistics {
    pub fn range(&self) -> f64 {
        self.max - self.min
    }

    /// `std_dev / |mean|`, `None` when the mean is zero
    pub fn coefficient_of_variation(&self) -> Option<f64> {
        coefficient_of_variation(self.mean, self.std_dev)
    }
}

/// Compute statistics for `values`, or `None` when the series is empty.
pub fn statistics(values: &[f64]) -> Option<Statistics> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    let q1 = percentile_sorted(&sorted, 25.0);
    let median = percentile_sorted(&sorted, 50.0);
    let q3 = percentile_sorted(&sorted, 75.0);
    let iqr = q3 - q1;

    let lower_fence = q1 - 1.5 * iqr;
    let upper_fence = q3 + 1.5 * iqr;
    let outlier_count = sorted
        .iter()
        .filter(|&&v| v < lower_fence || v > upper_fence)
        .count();

    Some(Statistics {
        count: sorted.len(),
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        mean,
        std_dev,
        variance,
        q1,
        median,
        q3,
        iqr,
        p5: percentile_sorted(&sorted, 5.0),
        p95: percentile_sorted(&sorted, 95.0),
        p99: percentile_sorted(&sorted, 99.0),
        outlier_count,
        outlier_percentage: outlier_count as f64 / n * 100.0,
    })
}

/// Percentile `p` (0-100) with linear interpolation between order statistics.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(percentile_sorted(&sorted, p))
}

/// `sorted` must be non-empty and ascending.
fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    let last = sorted.len() - 1;
    let index = (p.clamp(0.0, 100.0) / 100.0) * last as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;

    if lower == upper {
        return sorted[lower];
    }
    let weight = index - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

/// `|value - mean| / std_dev`.
///
/// `None` for a degenerate baseline (zero or non-finite deviation); a flat
/// baseline says nothing about how unusual a value is.
pub fn z_score(value: f64, mean: f64, std_dev: f64) -> Option<f64> {
    if !std_dev.is_finite() || std_dev <= MIN_STD_DEV {
        return None;
    }
    Some((value - mean).abs() / std_dev)
}

pub fn coefficient_of_variation(mean: f64, std_dev: f64) -> Option<f64> {
    if mean.abs() < f64::EPSILON {
        return None;
    }
    Some(std_dev / mean.abs())
}

/// Ordinary least-squares slope of `values` against their indices 0..n-1.
pub fn linear_slope(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }

    let n_f = n as f64;
    let x_mean = (n_f - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / n_f;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        numerator += dx * (y - y_mean);
        denominator += dx * dx;
    }

    Some(numerator / denominator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_series_has_no_statistics() {
        assert!(statistics(&[]).is_none());
        assert!(percentile(&[], 50.0).is_none());
    }

    #[test]
    fn known_series() {
        let stats = statistics(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_eq!(stats.count, 8);
        assert_eq!(stats.mean, 5.0);
        assert_eq!(stats.variance, 4.0);
        assert_eq!(stats.std_dev, 2.0);
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 9.0);
        assert_eq!(stats.median, 4.5);
        assert_eq!(stats.q1, 4.0);
        assert_eq!(stats.q3, 5.5);
        assert_eq!(stats.outlier_count, 1);
        assert_eq!(stats.outlier_percentage, 12.5);
    }

    #[test]
    fn percentile_interpolates() {
        let values = [10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile(&values, 0.0), Some(10.0));
        assert_eq!(percentile(&values, 100.0), Some(40.0));
        // index 0.5 * 3 = 1.5
        assert_eq!(percentile(&values, 50.0), Some(25.0));
    }

    #[test]
    fn z_score_guards_flat_baseline() {
        assert_eq!(z_score(5.0, 5.0, 0.0), None);
        assert_eq!(z_score(5.0, 5.0, f64::NAN), None);
        assert_eq!(z_score(7.0, 5.0, 2.0), Some(1.0));
        assert_eq!(z_score(3.0, 5.0, 2.0), Some(1.0));

        let flat = statistics(&[0.1, 0.1, 0.1, 0.1]).unwrap();
        assert_eq!(z_score(0.2, flat.mean, flat.std_dev), None);
    }

    #[test]
    fn slope_of_lines() {
        assert_eq!(linear_slope(&[1.0]), None);
        assert_eq!(linear_slope(&[1.0, 3.0, 5.0, 7.0]), Some(2.0));
        assert_eq!(linear_slope(&[4.0, 4.0, 4.0]), Some(0.0));
        assert!(linear_slope(&[9.0, 6.0, 3.0]).unwrap() < 0.0);
    }

    #[test]
    fn cv_requires_nonzero_mean() {
        assert_eq!(coefficient_of_variation(0.0, 1.0), None);
        assert_eq!(coefficient_of_variation(-50.0, 5.0), Some(0.1));
    }

    fn conventional_median(values: &[f64]) -> f64 {
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        }
    }

    proptest! {
        #[test]
        fn median_matches_conventional(values in prop::collection::vec(-1e6f64..1e6, 1..200)) {
            let stats = statistics(&values).unwrap();
            let expected = conventional_median(&values);
            prop_assert!((stats.median - expected).abs() <= 1e-9 * expected.abs().max(1.0));
        }

        #[test]
        fn quartiles_are_ordered(values in prop::collection::vec(-1e6f64..1e6, 1..200)) {
            let stats = statistics(&values).unwrap();
            prop_assert!(stats.min <= stats.q1);
            prop_assert!(stats.q1 <= stats.median);
            prop_assert!(stats.median <= stats.q3);
            prop_assert!(stats.q3 <= stats.max);
            prop_assert!(stats.p5 <= stats.p95 && stats.p95 <= stats.p99);
        }

        #[test]
        fn z_score_is_never_infinite(value in -1e6f64..1e6, mean in -1e6f64..1e6, std_dev in 0f64..1e3) {
            if let Some(z) = z_score(value, mean, std_dev) {
                prop_assert!(z.is_finite());
                prop_assert!(z >= 0.0);
            }
        }
    }
}
