//! Threshold Recommendation Engine
//!
//! Turns descriptive statistics into sensor-type-aware threshold bands, and
//! into the wider set of suggestions offered while calibrating a sensor.

use crate::stats::{percentile, statistics, Statistics};
use crate::Assessed;
use fieldwatch_store::{Band, Confidence, SensorType, Severity};
use serde::{Deserialize, Serialize};

/// Minimum series length for threshold suggestions
pub const MIN_SUGGESTION_POINTS: usize = 10;

/// Air-quality readings above this are on the CO₂ ppm scale
const CO2_SCALE_MAX: f64 = 500.0;

/// Policy chosen for a sensor type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    Temperature,
    Humidity,
    Pressure,
    Light,
    Motion,
    AirQuality,
    Noise,
    Generic,
}

impl Policy {
    /// Pick the policy for a declared type tag (case-insensitive).
    pub fn select(sensor_type: &str, stats: &Statistics) -> Self {
        match SensorType::from_tag(sensor_type) {
            Some(SensorType::Temperature) => Policy::Temperature,
            Some(SensorType::Humidity) => Policy::Humidity,
            Some(SensorType::Pressure) => Policy::Pressure,
            Some(SensorType::Light) => Policy::Light,
            Some(SensorType::Motion) => Policy::Motion,
            Some(SensorType::AirQuality) if stats.max > CO2_SCALE_MAX => Policy::AirQuality,
            Some(SensorType::Noise) => Policy::Noise,
            _ => Policy::Generic,
        }
    }
}

/// Recommended bands for one sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRecommendation {
    pub policy: Policy,
    pub warning: Band,
    pub critical: Band,
    pub optimal: Band,
    pub reasoning: String,
    pub confidence: Confidence,
    pub statistics: Statistics,
}

impl ThresholdRecommendation {
    /// Band a rule of `severity` is checked against.
    pub fn band_for(&self, severity: Severity) -> Band {
        match severity {
            Severity::Critical => self.critical,
            Severity::High | Severity::Warning => self.warning,
            _ => self.optimal,
        }
    }
}

fn around(mean: f64, spread: f64) -> Band {
    Band::new(mean - spread, mean + spread)
}

fn clamped(mean: f64, spread: f64, floor: f64, ceiling: f64) -> Band {
    Band::new((mean - spread).max(floor), (mean + spread).min(ceiling))
}

/// Recommend warning, critical and optimal bands for `stats`.
pub fn recommend(stats: &Statistics, sensor_type: &str) -> ThresholdRecommendation {
    let policy = Policy::select(sensor_type, stats);
    let mean = stats.mean;
    let sd = stats.std_dev;

    let (warning, critical, optimal, reasoning) = match policy {
        Policy::Temperature => (
            around(mean, (2.0 * sd).max(5.0)),
            around(mean, (3.0 * sd).max(8.0)),
            around(mean, sd),
            "Temperature bands follow the observed mean with a minimum margin of 5 (warning) and 8 (critical) degrees",
        ),
        Policy::Humidity => (
            clamped(mean, 2.0 * sd, 25.0, 75.0),
            clamped(mean, 3.0 * sd, 15.0, 85.0),
            clamped(mean, sd, 30.0, 70.0),
            "Humidity bands follow the observed spread, clamped to comfortable relative humidity",
        ),
        Policy::Pressure => (
            around(mean, (1.5 * sd).max(3.0)),
            around(mean, (2.5 * sd).max(5.0)),
            around(mean, 0.5 * sd),
            "Pressure changes slowly, so bands are tight around the observed mean",
        ),
        Policy::Light => (
            Band::new(stats.p5, stats.p95),
            Band::new(0.0, stats.p99),
            Band::new(stats.q1, stats.q3),
            "Light varies with the time of day, so bands use the observed percentiles",
        ),
        Policy::Motion => {
            let activity = mean.max(0.0);
            (
                Band::new(0.0, activity.max(1.0)),
                Band::new(0.0, 1.0),
                Band::new(0.0, activity),
                "Motion is a binary signal; bands follow the observed activity rate",
            )
        }
        Policy::AirQuality => (
            Band::new(0.0, 1000.0),
            Band::new(0.0, 2000.0),
            Band::new(0.0, 800.0),
            "CO₂ levels use fixed indoor air quality standards (800/1000/2000 ppm)",
        ),
        Policy::Noise => (
            Band::new(0.0, (mean + 1.5 * sd).min(60.0)),
            Band::new(0.0, (mean + 2.5 * sd).min(80.0)),
            Band::new(0.0, (mean + 0.5 * sd).min(40.0)),
            "Noise bands are capped at 40/60/80 dB regardless of the observed level",
        ),
        Policy::Generic => (
            Band::new(stats.p5, stats.p95),
            around(mean, 3.0 * sd),
            Band::new(stats.q1, stats.q3),
            "Generic bands use the 5th-95th percentile for warnings and three standard deviations for critical",
        ),
    };

    let cv_percent = stats.coefficient_of_variation().map(|cv| cv * 100.0);

    ThresholdRecommendation {
        policy,
        warning,
        critical,
        optimal,
        reasoning: format!("{} ({} samples).", reasoning, stats.count),
        confidence: Confidence::assess(stats.count, cv_percent),
        statistics: *stats,
    }
}

/// One suggested band with how often it would fire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedBand {
    pub band: Band,
    pub alert_frequency: String,
}

/// Suggestions offered during sensor calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSuggestion {
    pub statistics: Statistics,
    pub conservative: SuggestedBand,
    pub moderate: SuggestedBand,
    pub sensitive: SuggestedBand,
    pub percentile_based: SuggestedBand,
    /// Signs of a miscalibrated or faulty sensor
    pub warnings: Vec<String>,
}

/// Suggest thresholds from a raw series.
pub fn suggest(values: &[f64]) -> Assessed<ThresholdSuggestion> {
    let insufficient = Assessed::InsufficientData {
        required: MIN_SUGGESTION_POINTS,
        available: values.len(),
    };
    if values.len() < MIN_SUGGESTION_POINTS {
        return insufficient;
    }
    let (Some(stats), Some(p10), Some(p90)) = (
        statistics(values),
        percentile(values, 10.0),
        percentile(values, 90.0),
    ) else {
        return insufficient;
    };

    let mean = stats.mean;
    let sd = stats.std_dev;

    let mut warnings = Vec::new();
    if let Some(cv) = stats.coefficient_of_variation() {
        if cv > 0.5 {
            warnings.push(format!(
                "High variability (CV {:.0}%); check the sensor's calibration and mounting",
                cv * 100.0
            ));
        }
    }
    if stats.range() > 3.0 * mean.abs() {
        warnings.push(format!(
            "Range {:.2} exceeds three times the mean {:.2}; the sensor may be faulty",
            stats.range(),
            mean
        ));
    }

    Assessed::Ready(ThresholdSuggestion {
        statistics: stats,
        conservative: SuggestedBand {
            band: around(mean, 2.0 * sd),
            alert_frequency: "Rare alerts, about 5% of readings".to_string(),
        },
        moderate: SuggestedBand {
            band: around(mean, 1.5 * sd),
            alert_frequency: "Occasional alerts, about 13% of readings".to_string(),
        },
        sensitive: SuggestedBand {
            band: around(mean, sd),
            alert_frequency: "Frequent alerts, about 32% of readings".to_string(),
        },
        percentile_based: SuggestedBand {
            band: Band::new(p10, p90),
            alert_frequency: "About 20% of historical readings fall outside".to_string(),
        },
        warnings,
    })
}
