//! Derived calibration results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Inclusive value range
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Band {
    pub min: f64,
    pub max: f64,
}

impl Band {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Confidence in a derived threshold
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    /// Grade a sample by size and coefficient of variation (percent).
    ///
    /// An undefined CV (zero mean) never earns more than `Low`.
    pub fn assess(sample_count: usize, cv_percent: Option<f64>) -> Self {
        if sample_count < 100 {
            return Confidence::Low;
        }
        match cv_percent {
            Some(cv) if sample_count >= 1000 && cv < 30.0 => Confidence::High,
            Some(cv) if sample_count >= 500 && cv < 50.0 => Confidence::Medium,
            _ => Confidence::Low,
        }
    }
}

/// How a calibration was produced
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMethod {
    /// Not enough history; the sensor's static thresholds were returned
    Default,
    Statistical,
    TimeBased,
}

/// Calibrated thresholds for one sensor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationResult {
    pub min_threshold: Option<f64>,
    pub max_threshold: Option<f64>,
    pub method: CalibrationMethod,
    pub confidence: Confidence,
    pub computed_at: DateTime<Utc>,
    pub sample_count: usize,
    /// Hour of day (0-23) to band; hours with no data are absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hourly_thresholds: Option<BTreeMap<u32, Band>>,
}

impl CalibrationResult {
    /// Thresholds that apply at a given hour of day.
    pub fn band_for_hour(&self, hour: u32) -> Option<Band> {
        if let Some(band) = self
            .hourly_thresholds
            .as_ref()
            .and_then(|hours| hours.get(&hour))
        {
            return Some(*band);
        }
        match (self.min_threshold, self.max_threshold) {
            (Some(min), Some(max)) => Some(Band::new(min, max)),
            _ => None,
        }
    }
}
