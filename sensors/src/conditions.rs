//! Condition checks
//!
//! One function per [`Condition`] kind, each over data already fetched by
//! the evaluator. Every check reports [`Outcome::InsufficientData`] rather
//! than guessing when its minimum history is not met.

use crate::stats::{linear_slope, statistics, z_score};
use crate::thresholds::recommend;
use fieldwatch_store::{Condition, Severity, TrendType};
use serde::{Deserialize, Serialize};

/// Tolerance of `equals`
pub const EQUALS_TOLERANCE: f64 = 0.01;
/// Readings fetched for `rate_of_change`
pub const RATE_SAMPLE_LIMIT: usize = 10;
pub const MIN_DYNAMIC_POINTS: usize = 10;
pub const MIN_ANOMALY_POINTS: usize = 20;
pub const MIN_SEASONAL_POINTS: usize = 10;
pub const MIN_TREND_POINTS: usize = 10;

/// Result of checking one rule against one reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// The rule fired; the detail ends up in the alert message
    Violation { detail: String },
    Normal,
    InsufficientData { required: usize, available: usize },
    /// Condition kind with no evaluation yet
    Unsupported,
}

impl Outcome {
    pub fn violation(detail: impl Into<String>) -> Self {
        Outcome::Violation {
            detail: detail.into(),
        }
    }

    pub fn is_violation(&self) -> bool {
        matches!(self, Outcome::Violation { .. })
    }

    fn when(violated: bool, detail: impl FnOnce() -> String) -> Self {
        if violated {
            Outcome::violation(detail())
        } else {
            Outcome::Normal
        }
    }
}

/// Fixed-threshold conditions. `None` for kinds that need history.
pub fn check_static(condition: &Condition, value: f64) -> Option<Outcome> {
    let outcome = match *condition {
        Condition::GreaterThan { threshold } => Outcome::when(value > threshold, || {
            format!("value {} is above {}", value, threshold)
        }),
        Condition::LessThan { threshold } => Outcome::when(value < threshold, || {
            format!("value {} is below {}", value, threshold)
        }),
        Condition::Equals { target } => {
            Outcome::when((value - target).abs() <= EQUALS_TOLERANCE, || {
                format!("value {} equals {}", value, target)
            })
        }
        // Band rules name the range the value is expected to keep to
        Condition::Between { min, max } => Outcome::when(!between(value, min, max), || {
            format!("value {} left [{}, {}]", value, min, max)
        }),
        Condition::OutsideRange { min, max } => Outcome::when(between(value, min, max), || {
            format!("value {} entered excluded range [{}, {}]", value, min, max)
        }),
        _ => return None,
    };
    Some(outcome)
}

pub fn between(value: f64, min: f64, max: f64) -> bool {
    min <= value && value <= max
}

/// `recent` is newest first; the two newest readings are compared.
pub fn rate_of_change(recent: &[f64], max_delta: f64) -> Outcome {
    let [current, previous, ..] = recent else {
        return Outcome::InsufficientData {
            required: 2,
            available: recent.len(),
        };
    };
    let delta = (current - previous).abs();
    Outcome::when(delta > max_delta, || {
        format!(
            "changed by {:.2} (from {} to {}), more than {}",
            delta, previous, current, max_delta
        )
    })
}

/// Compare against recommended bands derived from `history`, falling back
/// to the static bounds when history is short.
pub fn dynamic_threshold(
    value: f64,
    history: &[f64],
    sensor_type: &str,
    severity: Severity,
    fallback_min: Option<f64>,
    fallback_max: Option<f64>,
) -> Outcome {
    let stats = statistics(history).filter(|s| s.count >= MIN_DYNAMIC_POINTS);

    let Some(stats) = stats else {
        if fallback_min.is_none() && fallback_max.is_none() {
            return Outcome::InsufficientData {
                required: MIN_DYNAMIC_POINTS,
                available: history.len(),
            };
        }
        let below = fallback_min.map_or(false, |min| value < min);
        let above = fallback_max.map_or(false, |max| value > max);
        return Outcome::when(below || above, || {
            format!(
                "value {} is outside static bounds [{}, {}] (not enough history)",
                value,
                fmt_bound(fallback_min),
                fmt_bound(fallback_max)
            )
        });
    };

    let band = recommend(&stats, sensor_type).band_for(severity);
    Outcome::when(!band.contains(value), || {
        format!(
            "value {} is outside dynamic band [{:.2}, {:.2}]",
            value, band.min, band.max
        )
    })
}

fn fmt_bound(bound: Option<f64>) -> String {
    bound.map_or_else(|| "-".to_string(), |b| b.to_string())
}

/// Z-score test of `value` against `baseline`, without a minimum size.
pub fn zscore_anomaly(value: f64, baseline: &[f64], sensitivity: f64) -> Outcome {
    let Some(stats) = statistics(baseline) else {
        return Outcome::InsufficientData {
            required: 1,
            available: 0,
        };
    };
    match z_score(value, stats.mean, stats.std_dev) {
        Some(z) => Outcome::when(z > sensitivity, || {
            format!(
                "z-score {:.2} exceeds {} (baseline mean {:.2}, std dev {:.2})",
                z, sensitivity, stats.mean, stats.std_dev
            )
        }),
        // A flat baseline gives no scale to judge deviation by
        None => Outcome::Normal,
    }
}

/// Z-score anomaly requiring `min_points` of baseline.
pub fn anomaly(value: f64, baseline: &[f64], sensitivity: f64, min_points: usize) -> Outcome {
    if baseline.len() < min_points {
        return Outcome::InsufficientData {
            required: min_points,
            available: baseline.len(),
        };
    }
    zscore_anomaly(value, baseline, sensitivity)
}

/// `series` is oldest first.
pub fn trend(series: &[f64], trend: TrendType, threshold: f64) -> Outcome {
    if series.len() < MIN_TREND_POINTS {
        return Outcome::InsufficientData {
            required: MIN_TREND_POINTS,
            available: series.len(),
        };
    }
    let Some(slope) = linear_slope(series) else {
        return Outcome::Normal;
    };

    let matched = match trend {
        TrendType::Increasing => slope > threshold,
        TrendType::Decreasing => slope < -threshold,
        TrendType::Stable => slope.abs() < threshold,
        TrendType::AnyChange => slope.abs() > threshold,
    };
    Outcome::when(matched, || {
        format!("{:?} trend, slope {:.3} per reading (threshold {})", trend, slope, threshold)
    })
}
