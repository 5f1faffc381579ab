//! Threshold Calibration Service
//!
//! Derives min/max thresholds for a sensor from its own history. Results
//! are cached per (device, sensor) and persisted onto the sensor row; a
//! sensor without enough history keeps its static thresholds.

use crate::cache::TtlCache;
use crate::stats::{percentile, statistics};
use crate::{Result, SensorError};
use chrono::{Duration, Timelike};
use fieldwatch_store::{
    Band, CalibrationMethod, CalibrationResult, Clock, Confidence, DeviceId, DeviceSensor,
    ReadingQuery, SensorId, TelemetryStore,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Knobs for one calibration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationOptions {
    pub time_window_hours: u32,
    /// Percentile used for the upper threshold
    pub p_high: f64,
    /// Percentile used for the lower threshold
    pub p_low: f64,
    /// Fraction of a standard deviation to widen the band by
    pub smoothing: f64,
    /// Per-hour bands for light-like sensors
    pub use_time_of_day: bool,
    pub min_points: usize,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            time_window_hours: 168,
            p_high: 95.0,
            p_low: 5.0,
            smoothing: 0.2,
            use_time_of_day: false,
            min_points: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CalibrationConfig {
    pub cache_ttl: Duration,
    pub options: CalibrationOptions,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::hours(1),
            options: CalibrationOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibratedSensor {
    pub sensor_id: SensorId,
    pub pin: String,
    pub result: CalibrationResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedSensor {
    pub sensor_id: SensorId,
    pub pin: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedSensor {
    pub sensor_id: SensorId,
    pub pin: String,
    pub error: String,
}

/// Outcome of calibrating every sensor of a device
#[derive(Debug, Clone, Default, Serialize)]
pub struct CalibrationReport {
    pub device_id: DeviceId,
    pub calibrated: Vec<CalibratedSensor>,
    pub skipped: Vec<SkippedSensor>,
    pub failed: Vec<FailedSensor>,
}

pub struct CalibrationService {
    store: Arc<dyn TelemetryStore>,
    clock: Arc<dyn Clock>,
    cache: TtlCache<(DeviceId, SensorId), CalibrationResult>,
    options: CalibrationOptions,
}

impl CalibrationService {
    pub fn new(store: Arc<dyn TelemetryStore>, clock: Arc<dyn Clock>, config: CalibrationConfig) -> Self {
        Self {
            cache: TtlCache::new(config.cache_ttl, clock.clone()),
            store,
            clock,
            options: config.options,
        }
    }

    pub fn options(&self) -> &CalibrationOptions {
        &self.options
    }

    /// Calibrate one sensor with the service's default options.
    pub async fn calibrate(&self, device_id: DeviceId, sensor_id: SensorId) -> Result<CalibrationResult> {
        let options = self.options.clone();
        self.calibrate_with(device_id, sensor_id, &options).await
    }

    pub async fn calibrate_with(
        &self,
        device_id: DeviceId,
        sensor_id: SensorId,
        options: &CalibrationOptions,
    ) -> Result<CalibrationResult> {
        let key = (device_id, sensor_id);
        // The cache only ever holds results for the service's own options
        let default_options = *options == self.options;
        if default_options {
            if let Some(cached) = self.cache.get(&key) {
                return Ok(cached);
            }
        }

        let sensor = self
            .store
            .sensor(sensor_id)
            .await?
            .filter(|s| s.device_id == device_id)
            .ok_or(SensorError::SensorNotFound { device_id, sensor_id })?;

        let result = self.compute(&sensor, options).await?;

        if result.method != CalibrationMethod::Default {
            self.store.save_calibration(sensor.id, &result).await?;
        }
        if default_options {
            self.cache.insert(key, result.clone());
        } else {
            self.cache.invalidate(&key);
        }

        tracing::info!(
            device_id,
            sensor_id,
            method = ?result.method,
            confidence = ?result.confidence,
            samples = result.sample_count,
            "Sensor calibrated"
        );

        Ok(result)
    }

    async fn compute(&self, sensor: &DeviceSensor, options: &CalibrationOptions) -> Result<CalibrationResult> {
        if options.p_low >= options.p_high {
            return Err(SensorError::InvalidConfig(format!(
                "p_low ({}) must be below p_high ({})",
                options.p_low, options.p_high
            )));
        }

        let now = self.clock.now();
        let from = Duration::try_hours(i64::from(options.time_window_hours))
            .and_then(|window| now.checked_sub_signed(window))
            .ok_or_else(|| {
                SensorError::InvalidConfig(format!(
                    "time_window_hours {} is out of range",
                    options.time_window_hours
                ))
            })?;
        let query = ReadingQuery::new(sensor.device_id, from, now).pin(&sensor.pin);
        let readings: Vec<_> = self
            .store
            .readings(&query)
            .await?
            .into_iter()
            .filter(|r| r.recognised_type() == Some(sensor.sensor_type))
            .collect();

        let values: Vec<f64> = readings.iter().map(|r| r.processed_value).collect();
        let sample_count = values.len();

        if sample_count < options.min_points {
            return Ok(CalibrationResult {
                min_threshold: sensor.threshold_min,
                max_threshold: sensor.threshold_max,
                method: CalibrationMethod::Default,
                confidence: Confidence::Low,
                computed_at: now,
                sample_count,
                hourly_thresholds: None,
            });
        }

        let stats = statistics(&values)
            .ok_or_else(|| SensorError::Calibration("empty history".to_string()))?;
        let cv_percent = stats.coefficient_of_variation().map(|cv| cv * 100.0);
        let confidence = Confidence::assess(sample_count, cv_percent);

        let p_low = percentile(&values, options.p_low).unwrap_or(stats.min);
        let p_high = percentile(&values, options.p_high).unwrap_or(stats.max);

        if options.use_time_of_day && sensor.sensor_type.is_light_like() {
            let mut buckets: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
            for reading in &readings {
                buckets
                    .entry(reading.timestamp.hour())
                    .or_default()
                    .push(reading.processed_value);
            }

            let hourly = buckets
                .into_iter()
                .filter_map(|(hour, bucket)| {
                    let low = percentile(&bucket, options.p_low)?;
                    let high = percentile(&bucket, options.p_high)?;
                    Some((hour, Band::new(low, high)))
                })
                .collect();

            return Ok(CalibrationResult {
                min_threshold: Some(p_low),
                max_threshold: Some(p_high),
                method: CalibrationMethod::TimeBased,
                confidence,
                computed_at: now,
                sample_count,
                hourly_thresholds: Some(hourly),
            });
        }

        let margin = options.smoothing * stats.std_dev;
        let mut min_threshold = p_low - margin;
        // Floor at zero only for series that never went negative; a sub-zero
        // series clamped to 0 would end up with min above max
        if stats.min >= 0.0 {
            min_threshold = min_threshold.max(0.0);
        }

        Ok(CalibrationResult {
            min_threshold: Some(min_threshold),
            max_threshold: Some(p_high + margin),
            method: CalibrationMethod::Statistical,
            confidence,
            computed_at: now,
            sample_count,
            hourly_thresholds: None,
        })
    }

    /// Calibrate every enabled, auto-calibrating sensor of a device. One
    /// sensor failing never aborts the others.
    pub async fn calibrate_all_sensors(&self, device_id: DeviceId) -> Result<CalibrationReport> {
        if self.store.device(device_id).await?.is_none() {
            return Err(SensorError::DeviceNotFound(device_id));
        }

        let sensors = self.store.device_sensors(device_id).await?;
        let mut report = CalibrationReport {
            device_id,
            ..Default::default()
        };

        for sensor in sensors {
            if !sensor.enabled || !sensor.auto_calibrate {
                report.skipped.push(SkippedSensor {
                    sensor_id: sensor.id,
                    pin: sensor.pin,
                    reason: "auto-calibration not enabled".to_string(),
                });
                continue;
            }

            match self.calibrate(device_id, sensor.id).await {
                Ok(result) if result.method == CalibrationMethod::Default => {
                    report.skipped.push(SkippedSensor {
                        sensor_id: sensor.id,
                        pin: sensor.pin,
                        reason: format!(
                            "insufficient data ({} of {} readings)",
                            result.sample_count, self.options.min_points
                        ),
                    });
                }
                Ok(result) => report.calibrated.push(CalibratedSensor {
                    sensor_id: sensor.id,
                    pin: sensor.pin,
                    result,
                }),
                Err(e) => {
                    tracing::warn!(device_id, sensor_id = sensor.id, error = %e, "Calibration failed");
                    report.failed.push(FailedSensor {
                        sensor_id: sensor.id,
                        pin: sensor.pin,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            device_id,
            calibrated = report.calibrated.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Device calibration complete"
        );

        Ok(report)
    }
}
