//! Rule Evaluator
//!
//! Stores each incoming reading, resolves (or provisions) the sensor it
//! belongs to, checks every enabled rule for that sensor and raises
//! deduplicated alerts. A failing reading or rule is recorded in the batch
//! outcome and never stops its siblings.

use crate::cache::TtlCache;
use crate::conditions::{self, Outcome};
use crate::{Result, SensorError};
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use fieldwatch_store::rule::{DEFAULT_ANOMALY_SENSITIVITY, DEFAULT_HISTORY_WINDOW_DAYS};
use fieldwatch_store::{
    Alert, AlertInsert, Clock, Condition, Device, DeviceId, DeviceSensor, DeviceStatus, NewAlert,
    NewReading, NewSensor, Reading, ReadingQuery, RuleId, SensorRule, SensorType, TelemetryStore,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Baseline of a statistical anomaly check stops this long before the reading.
const ANOMALY_BASELINE_GAP_MINUTES: i64 = 5;
const SEASONAL_HISTORY_DAYS: i64 = 30;
const SEASONAL_HOUR_SPREAD: i32 = 1;

type RuleKey = (DeviceId, String, SensorType);

#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// How long a device sensor's rule set is served from cache
    pub rule_cache_ttl: Duration,
    /// Window in which a repeat violation is folded into the active alert
    pub dedup_window: Duration,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            rule_cache_ttl: Duration::minutes(5),
            dedup_window: Duration::minutes(5),
        }
    }
}

/// One reading as delivered by the ingestion boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingReading {
    pub pin: String,
    /// Declared sensor type tag
    #[serde(rename = "type", alias = "sensor_type")]
    pub sensor_type: String,
    #[serde(default)]
    pub raw_value: Option<f64>,
    /// Already scaled by the device; skips the sensor's calibration
    #[serde(default)]
    pub processed_value: Option<f64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl IncomingReading {
    pub fn raw(pin: &str, sensor_type: &str, value: f64) -> Self {
        Self {
            pin: pin.to_string(),
            sensor_type: sensor_type.to_string(),
            raw_value: Some(value),
            processed_value: None,
            name: None,
            timestamp: None,
            metadata: HashMap::new(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Reading or rule that could not be processed
#[derive(Debug, Clone, Serialize)]
pub struct ReadingFailure {
    pub pin: String,
    pub rule_id: Option<RuleId>,
    pub error: String,
}

/// What happened to a batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    pub stored: usize,
    /// Rule checks performed
    pub evaluated: usize,
    /// Readings stored but not evaluated (unrecognised type, disabled sensor)
    pub skipped: usize,
    /// Violations folded into an existing active alert
    pub deduplicated: usize,
    pub alerts: Vec<Alert>,
    pub failures: Vec<ReadingFailure>,
}

pub struct RuleEvaluator {
    store: Arc<dyn TelemetryStore>,
    clock: Arc<dyn Clock>,
    rules: TtlCache<RuleKey, Vec<SensorRule>>,
    config: EvaluatorConfig,
}

impl RuleEvaluator {
    pub fn new(store: Arc<dyn TelemetryStore>, clock: Arc<dyn Clock>, config: EvaluatorConfig) -> Self {
        Self {
            rules: TtlCache::new(config.rule_cache_ttl, clock.clone()),
            store,
            clock,
            config,
        }
    }

    /// Drop the cached rule set so the next reading sees rule edits at once.
    pub fn invalidate_rules(&self, device_id: DeviceId, pin: &str, sensor_type: SensorType) {
        self.rules.invalidate(&(device_id, pin.to_string(), sensor_type));
    }

    /// Store and evaluate a batch of readings from one device.
    pub async fn process_reading(
        &self,
        device_id: DeviceId,
        readings: Vec<IncomingReading>,
    ) -> Result<BatchOutcome> {
        let device = self
            .store
            .device(device_id)
            .await?
            .ok_or(SensorError::DeviceNotFound(device_id))?;

        let mut outcome = BatchOutcome::default();

        for reading in readings {
            let pin = reading.pin.clone();
            if let Err(e) = self.process_one(&device, reading, &mut outcome).await {
                tracing::warn!(device_id, pin = %pin, error = %e, "Reading failed");
                outcome.failures.push(ReadingFailure {
                    pin,
                    rule_id: None,
                    error: e.to_string(),
                });
            }
        }

        tracing::debug!(
            device_id,
            stored = outcome.stored,
            evaluated = outcome.evaluated,
            alerts = outcome.alerts.len(),
            "Batch processed"
        );

        Ok(outcome)
    }

    async fn process_one(
        &self,
        device: &Device,
        reading: IncomingReading,
        outcome: &mut BatchOutcome,
    ) -> Result<()> {
        let raw = reading
            .raw_value
            .or(reading.processed_value)
            .filter(|v| v.is_finite())
            .ok_or_else(|| {
                SensorError::InvalidReading(format!("pin {} carries no finite value", reading.pin))
            })?;

        let sensor_type = SensorType::from_tag(&reading.sensor_type);
        let existing = match sensor_type {
            Some(t) => self.store.find_sensor(device.id, &reading.pin, t).await?,
            None => None,
        };

        let processed = reading.processed_value.unwrap_or_else(|| {
            existing
                .as_ref()
                .map_or(raw, |sensor| sensor.apply_calibration(raw))
        });
        let at = reading.timestamp.unwrap_or_else(|| self.clock.now());

        self.store
            .insert_reading(NewReading {
                device_id: device.id,
                pin: reading.pin.clone(),
                sensor_type: reading.sensor_type.clone(),
                raw_value: raw,
                processed_value: processed,
                timestamp: at,
                metadata: reading.metadata,
            })
            .await?;
        outcome.stored += 1;

        let Some(sensor_type) = sensor_type else {
            tracing::warn!(
                device_id = device.id,
                pin = %reading.pin,
                sensor_type = %reading.sensor_type,
                "Unrecognised sensor type, reading stored without evaluation"
            );
            outcome.skipped += 1;
            return Ok(());
        };

        let sensor = match existing {
            Some(sensor) => sensor,
            None => {
                let name = reading
                    .name
                    .unwrap_or_else(|| format!("{} {}", sensor_type, reading.pin));
                let sensor = self
                    .store
                    .insert_sensor(NewSensor {
                        device_id: device.id,
                        pin: reading.pin.clone(),
                        sensor_type,
                        name,
                    })
                    .await?;
                tracing::info!(
                    device_id = device.id,
                    sensor_id = sensor.id,
                    pin = %sensor.pin,
                    "Provisioned sensor {}",
                    sensor.name
                );
                sensor
            }
        };

        if !sensor.enabled {
            outcome.skipped += 1;
            return Ok(());
        }

        let rules = self.rules_for(device.id, &sensor.pin, sensor_type).await?;

        for rule in rules.iter().filter(|r| r.enabled) {
            outcome.evaluated += 1;

            let result = match self.evaluate_rule(rule, &sensor, processed, at).await {
                Ok(Outcome::Violation { detail }) => self
                    .raise(device, &sensor, rule, &detail)
                    .await
                    .map(Some),
                Ok(Outcome::InsufficientData { required, available }) => {
                    tracing::debug!(
                        rule_id = rule.id,
                        kind = rule.condition.kind(),
                        required,
                        available,
                        "Not enough history"
                    );
                    Ok(None)
                }
                Ok(Outcome::Unsupported) => {
                    tracing::debug!(rule_id = rule.id, kind = rule.condition.kind(), "Not supported");
                    Ok(None)
                }
                Ok(Outcome::Normal) => Ok(None),
                Err(e) => Err(e),
            };

            match result {
                Ok(Some(AlertInsert::Created(alert))) => outcome.alerts.push(alert),
                Ok(Some(AlertInsert::Duplicate(existing))) => {
                    tracing::debug!(rule_id = rule.id, alert_id = existing, "Duplicate violation");
                    outcome.deduplicated += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(rule_id = rule.id, error = %e, "Rule evaluation failed");
                    outcome.failures.push(ReadingFailure {
                        pin: sensor.pin.clone(),
                        rule_id: Some(rule.id),
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    async fn rules_for(
        &self,
        device_id: DeviceId,
        pin: &str,
        sensor_type: SensorType,
    ) -> Result<Vec<SensorRule>> {
        let key = (device_id, pin.to_string(), sensor_type);
        let rules = self
            .rules
            .get_or_refresh(key, || self.store.enabled_rules(device_id, pin, sensor_type))
            .await?;
        Ok(rules)
    }

    /// Check one rule against a processed value observed at `at`.
    pub async fn evaluate_rule(
        &self,
        rule: &SensorRule,
        sensor: &DeviceSensor,
        value: f64,
        at: DateTime<Utc>,
    ) -> Result<Outcome> {
        let outcome = match rule.condition {
            Condition::GreaterThan { .. }
            | Condition::LessThan { .. }
            | Condition::Equals { .. }
            | Condition::Between { .. }
            | Condition::OutsideRange { .. } => {
                conditions::check_static(&rule.condition, value).unwrap_or(Outcome::Unsupported)
            }

            Condition::RateOfChange { max_delta, window_minutes } => {
                let mut recent = self
                    .history(sensor, window_start(at, minutes(window_minutes))?, at)
                    .await?;
                recent.truncate(conditions::RATE_SAMPLE_LIMIT);
                conditions::rate_of_change(&recent, max_delta)
            }

            Condition::DynamicThreshold { window_days, fallback_min, fallback_max } => {
                let history = self
                    .history(sensor, window_start(at, days(window_days))?, at)
                    .await?;
                conditions::dynamic_threshold(
                    value,
                    &history,
                    sensor.sensor_type.as_str(),
                    rule.severity,
                    fallback_min,
                    fallback_max,
                )
            }

            Condition::StatisticalAnomaly { window_days, sensitivity } => {
                self.statistical_anomaly(sensor, value, at, window_days, sensitivity)
                    .await?
            }

            Condition::SeasonalAnomaly { sensitivity } => {
                let history = self
                    .history_readings(
                        sensor,
                        window_start(at, Duration::days(SEASONAL_HISTORY_DAYS))?,
                        window_start(at, Duration::days(1))?,
                    )
                    .await?;
                let baseline: Vec<f64> = history
                    .iter()
                    .filter(|r| {
                        r.timestamp.weekday() == at.weekday()
                            && (r.timestamp.hour() as i32 - at.hour() as i32).abs()
                                <= SEASONAL_HOUR_SPREAD
                    })
                    .map(|r| r.processed_value)
                    .collect();

                if baseline.len() >= conditions::MIN_SEASONAL_POINTS {
                    conditions::zscore_anomaly(value, &baseline, sensitivity)
                } else {
                    // Thin seasonal history: plain anomaly check with its own
                    // baseline and sensitivity
                    tracing::debug!(
                        rule_id = rule.id,
                        seasonal_points = baseline.len(),
                        "Seasonal baseline too small, using statistical anomaly"
                    );
                    self.statistical_anomaly(
                        sensor,
                        value,
                        at,
                        DEFAULT_HISTORY_WINDOW_DAYS,
                        DEFAULT_ANOMALY_SENSITIVITY,
                    )
                    .await?
                }
            }

            Condition::TrendDetection { window_minutes, trend, threshold } => {
                let mut series = self
                    .history(sensor, window_start(at, minutes(window_minutes))?, at)
                    .await?;
                series.reverse();
                conditions::trend(&series, trend, threshold)
            }

            Condition::Pattern => Outcome::Unsupported,
        };

        Ok(outcome)
    }

    async fn statistical_anomaly(
        &self,
        sensor: &DeviceSensor,
        value: f64,
        at: DateTime<Utc>,
        window_days: u32,
        sensitivity: f64,
    ) -> Result<Outcome> {
        let baseline = self
            .history(
                sensor,
                window_start(at, days(window_days))?,
                window_start(at, Duration::minutes(ANOMALY_BASELINE_GAP_MINUTES))?,
            )
            .await?;
        Ok(conditions::anomaly(
            value,
            &baseline,
            sensitivity,
            conditions::MIN_ANOMALY_POINTS,
        ))
    }

    /// Processed values of the sensor in `[from, to]`, newest first.
    async fn history(
        &self,
        sensor: &DeviceSensor,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<f64>> {
        Ok(self
            .history_readings(sensor, from, to)
            .await?
            .into_iter()
            .map(|r| r.processed_value)
            .collect())
    }

    async fn history_readings(
        &self,
        sensor: &DeviceSensor,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Reading>> {
        let query = ReadingQuery::new(sensor.device_id, from, to).pin(&sensor.pin);
        let mut readings = self.store.readings(&query).await?;
        readings.retain(|r| r.recognised_type() == Some(sensor.sensor_type));
        Ok(readings)
    }

    async fn raise(
        &self,
        device: &Device,
        sensor: &DeviceSensor,
        rule: &SensorRule,
        detail: &str,
    ) -> Result<AlertInsert> {
        let now = self.clock.now();
        let alert = NewAlert {
            device_id: device.id,
            sensor_id: sensor.id,
            rule_id: Some(rule.id),
            alert_type: rule.condition.kind().to_string(),
            severity: rule.severity,
            message: format!("{} on {} ({}): {}", sensor.name, device.name, sensor.pin, detail),
            created_at: now,
        };

        let insert = self
            .store
            .insert_alert_deduplicated(alert, now - self.config.dedup_window)
            .await?;

        if let AlertInsert::Created(alert) = &insert {
            self.store.set_device_status(device.id, DeviceStatus::Alarm).await?;
            tracing::info!(
                alert_id = alert.id,
                device_id = device.id,
                severity = %alert.severity,
                alert_type = %alert.alert_type,
                "Alert raised: {}",
                alert.message
            );
        }

        Ok(insert)
    }
}

fn minutes(value: u32) -> Option<Duration> {
    Duration::try_minutes(i64::from(value))
}

fn days(value: u32) -> Option<Duration> {
    Duration::try_days(i64::from(value))
}

/// Start of a history window reaching back `span` from `at`. A window that
/// runs past the representable calendar is a rule configuration error.
fn window_start(at: DateTime<Utc>, span: impl Into<Option<Duration>>) -> Result<DateTime<Utc>> {
    span.into()
        .and_then(|span| at.checked_sub_signed(span))
        .ok_or_else(|| {
            SensorError::InvalidConfig(format!("history window before {} is out of range", at))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fieldwatch_store::{ManualClock, MemoryStore, Severity, TrendType};

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        evaluator: RuleEvaluator,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 4, 14, 0, 0).unwrap()
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        store
            .add_device(Device {
                id: 1,
                name: "barn".to_string(),
                location_id: None,
                status: DeviceStatus::Online,
            })
            .unwrap();
        store
            .add_sensor(DeviceSensor {
                id: 5,
                device_id: 1,
                pin: "D4".to_string(),
                sensor_type: SensorType::Temperature,
                name: "barn temp".to_string(),
                enabled: true,
                auto_calibrate: false,
                calibration_offset: -1.0,
                calibration_multiplier: 2.0,
                threshold_min: None,
                threshold_max: None,
                calibration: None,
            })
            .unwrap();
        let evaluator =
            RuleEvaluator::new(store.clone(), clock.clone(), EvaluatorConfig::default());
        Fixture { store, clock, evaluator }
    }

    fn rule(id: RuleId, condition: Condition) -> SensorRule {
        SensorRule {
            id,
            device_sensor_id: 5,
            condition,
            severity: Severity::Warning,
            enabled: true,
        }
    }

    async fn seed(fx: &Fixture, values: &[f64], start: DateTime<Utc>, step: Duration) {
        for (i, value) in values.iter().enumerate() {
            fx.store
                .insert_reading(NewReading {
                    device_id: 1,
                    pin: "D4".to_string(),
                    sensor_type: "temperature".to_string(),
                    raw_value: *value,
                    processed_value: *value,
                    timestamp: start + step * i as i32,
                    metadata: HashMap::new(),
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn calibration_is_applied_before_evaluation() {
        let fx = fixture();
        fx.store
            .add_rule(rule(1, Condition::GreaterThan { threshold: 30.0 }))
            .unwrap();

        // 2 * 16 - 1 = 31
        let outcome = fx
            .evaluator
            .process_reading(1, vec![IncomingReading::raw("D4", "temperature", 16.0)])
            .await
            .unwrap();
        assert_eq!(outcome.stored, 1);
        assert_eq!(outcome.alerts.len(), 1);
        assert_eq!(outcome.alerts[0].alert_type, "greater_than");

        let device = fx.store.device(1).await.unwrap().unwrap();
        assert_eq!(device.status, DeviceStatus::Alarm);
    }

    #[tokio::test]
    async fn unknown_types_are_stored_but_skipped() {
        let fx = fixture();
        let outcome = fx
            .evaluator
            .process_reading(1, vec![IncomingReading::raw("A3", "geiger", 0.2)])
            .await
            .unwrap();
        assert_eq!(outcome.stored, 1);
        assert_eq!(outcome.skipped, 1);
        assert!(outcome.failures.is_empty());
        assert_eq!(fx.store.reading_count().unwrap(), 1);
        assert_eq!(fx.store.device_sensors(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn recognised_types_are_provisioned() {
        let fx = fixture();
        let mut reading = IncomingReading::raw("A0", "Humidity", 55.0);
        reading.name = Some("loft".to_string());
        fx.evaluator.process_reading(1, vec![reading]).await.unwrap();

        let sensor = fx
            .store
            .find_sensor(1, "A0", SensorType::Humidity)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sensor.name, "loft");
    }

    #[tokio::test]
    async fn bad_reading_does_not_stop_the_batch() {
        let fx = fixture();
        fx.store
            .add_rule(rule(1, Condition::GreaterThan { threshold: 30.0 }))
            .unwrap();

        let mut empty = IncomingReading::raw("D4", "temperature", 0.0);
        empty.raw_value = None;
        let outcome = fx
            .evaluator
            .process_reading(
                1,
                vec![empty, IncomingReading::raw("D4", "temperature", 20.0)],
            )
            .await
            .unwrap();
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.stored, 1);
        assert_eq!(outcome.evaluated, 1);
    }

    #[tokio::test]
    async fn out_of_range_window_fails_only_its_rule() {
        let fx = fixture();
        fx.store
            .add_rule(rule(
                1,
                Condition::StatisticalAnomaly {
                    window_days: u32::MAX,
                    sensitivity: 3.0,
                },
            ))
            .unwrap();
        fx.store
            .add_rule(rule(
                2,
                Condition::TrendDetection {
                    window_minutes: u32::MAX,
                    trend: TrendType::AnyChange,
                    threshold: 0.1,
                },
            ))
            .unwrap();
        fx.store
            .add_rule(rule(3, Condition::GreaterThan { threshold: 30.0 }))
            .unwrap();

        // 2 * 20 - 1 = 39
        let outcome = fx
            .evaluator
            .process_reading(1, vec![IncomingReading::raw("D4", "temperature", 20.0)])
            .await
            .unwrap();
        assert_eq!(outcome.stored, 1);
        assert_eq!(outcome.alerts.len(), 1);
        assert_eq!(outcome.alerts[0].rule_id, Some(3));

        let mut failed: Vec<_> = outcome.failures.iter().filter_map(|f| f.rule_id).collect();
        failed.sort();
        assert_eq!(failed, vec![1, 2]);
        assert!(outcome.failures[0].error.contains("out of range"));
    }

    #[tokio::test]
    async fn device_scaled_values_skip_calibration() {
        let fx = fixture();
        fx.store
            .add_rule(rule(1, Condition::GreaterThan { threshold: 30.0 }))
            .unwrap();

        // Raw 16 would calibrate to 31; the device already sent 25
        let reading: IncomingReading = serde_json::from_str(
            r#"{"pin": "D4", "sensor_type": "temperature", "raw_value": 16,
                "processed_value": 25.0, "metadata": {"firmware": "1.4"}}"#,
        )
        .unwrap();
        assert_eq!(reading.sensor_type, "temperature");
        assert_eq!(reading.metadata["firmware"], "1.4");

        let outcome = fx.evaluator.process_reading(1, vec![reading]).await.unwrap();
        assert_eq!(outcome.stored, 1);
        assert_eq!(outcome.evaluated, 1);
        assert!(outcome.alerts.is_empty());
    }

    #[tokio::test]
    async fn unknown_device_is_an_error() {
        let fx = fixture();
        let err = fx.evaluator.process_reading(99, vec![]).await.unwrap_err();
        assert!(matches!(err, SensorError::DeviceNotFound(99)));
    }

    #[tokio::test]
    async fn rule_cache_serves_stale_rules_until_invalidated() {
        let fx = fixture();
        fx.evaluator
            .process_reading(1, vec![IncomingReading::raw("D4", "temperature", 10.0)])
            .await
            .unwrap();

        // Added after the rule set was cached
        fx.store
            .add_rule(rule(1, Condition::GreaterThan { threshold: 30.0 }))
            .unwrap();
        let outcome = fx
            .evaluator
            .process_reading(1, vec![IncomingReading::raw("D4", "temperature", 20.0)])
            .await
            .unwrap();
        assert_eq!(outcome.evaluated, 0);

        fx.clock.advance(Duration::minutes(6));
        let outcome = fx
            .evaluator
            .process_reading(1, vec![IncomingReading::raw("D4", "temperature", 20.0)])
            .await
            .unwrap();
        assert_eq!(outcome.evaluated, 1);
        assert_eq!(outcome.alerts.len(), 1);
    }

    #[tokio::test]
    async fn rate_of_change_uses_two_newest_readings() {
        let fx = fixture();
        let sensor = fx.store.sensor(5).await.unwrap().unwrap();
        let r = rule(1, Condition::RateOfChange { max_delta: 3.0, window_minutes: 5 });

        seed(&fx, &[20.0], t0() - Duration::minutes(1), Duration::minutes(1)).await;
        let outcome = fx.evaluator.evaluate_rule(&r, &sensor, 20.0, t0()).await.unwrap();
        assert_eq!(outcome, Outcome::InsufficientData { required: 2, available: 1 });

        seed(&fx, &[25.0], t0(), Duration::minutes(1)).await;
        let outcome = fx.evaluator.evaluate_rule(&r, &sensor, 25.0, t0()).await.unwrap();
        assert!(outcome.is_violation());
    }

    #[tokio::test]
    async fn statistical_anomaly_excludes_recent_readings() {
        let fx = fixture();
        let sensor = fx.store.sensor(5).await.unwrap().unwrap();
        let r = rule(
            1,
            Condition::StatisticalAnomaly { window_days: 7, sensitivity: 3.0 },
        );

        let baseline: Vec<f64> = (0..30).map(|i| 20.0 + (i % 3) as f64).collect();
        seed(&fx, &baseline, t0() - Duration::hours(3), Duration::minutes(5)).await;
        // Inside the five-minute gap; must not widen the baseline
        seed(&fx, &[95.0], t0() - Duration::minutes(1), Duration::minutes(1)).await;

        let spike = fx.evaluator.evaluate_rule(&r, &sensor, 90.0, t0()).await.unwrap();
        assert!(spike.is_violation());
        let normal = fx.evaluator.evaluate_rule(&r, &sensor, 21.0, t0()).await.unwrap();
        assert_eq!(normal, Outcome::Normal);
    }

    #[tokio::test]
    async fn seasonal_fallback_switches_to_plain_anomaly_sensitivity() {
        let fx = fixture();
        let sensor = fx.store.sensor(5).await.unwrap().unwrap();

        // No seasonal history; the last hours give a baseline of mean 20, sd 1
        let recent: Vec<f64> = (0..40).map(|i| if i % 2 == 0 { 19.0 } else { 21.0 }).collect();
        seed(&fx, &recent, t0() - Duration::hours(4), Duration::minutes(5)).await;

        // z = 2.8: above the seasonal 2.5 but below the fallback's 3.0
        let seasonal = rule(1, Condition::SeasonalAnomaly { sensitivity: 2.5 });
        let outcome = fx.evaluator.evaluate_rule(&seasonal, &sensor, 22.8, t0()).await.unwrap();
        assert_eq!(outcome, Outcome::Normal);

        let outcome = fx.evaluator.evaluate_rule(&seasonal, &sensor, 23.5, t0()).await.unwrap();
        assert!(outcome.is_violation());
    }

    #[tokio::test]
    async fn seasonal_baseline_uses_same_weekday_and_hour() {
        let fx = fixture();
        let sensor = fx.store.sensor(5).await.unwrap().unwrap();

        // Three previous same weekdays, 13:00-15:00, alternating 19/21
        for week in 1..=3 {
            let start = t0() - Duration::weeks(week) - Duration::hours(1);
            let values: Vec<f64> = (0..12).map(|i| if i % 2 == 0 { 19.0 } else { 21.0 }).collect();
            seed(&fx, &values, start, Duration::minutes(10)).await;
        }

        // z = 2.8 fires against the seasonal 2.5
        let seasonal = rule(1, Condition::SeasonalAnomaly { sensitivity: 2.5 });
        let outcome = fx.evaluator.evaluate_rule(&seasonal, &sensor, 22.8, t0()).await.unwrap();
        assert!(outcome.is_violation());
    }

    #[tokio::test]
    async fn trend_detection_over_window() {
        let fx = fixture();
        let sensor = fx.store.sensor(5).await.unwrap().unwrap();
        let values: Vec<f64> = (0..12).map(|i| 10.0 + i as f64).collect();
        seed(&fx, &values, t0() - Duration::minutes(55), Duration::minutes(5)).await;

        let rising = rule(
            1,
            Condition::TrendDetection {
                window_minutes: 60,
                trend: TrendType::Increasing,
                threshold: 0.1,
            },
        );
        assert!(fx
            .evaluator
            .evaluate_rule(&rising, &sensor, 21.0, t0())
            .await
            .unwrap()
            .is_violation());

        let falling = rule(
            2,
            Condition::TrendDetection {
                window_minutes: 60,
                trend: TrendType::Decreasing,
                threshold: 0.1,
            },
        );
        assert_eq!(
            fx.evaluator.evaluate_rule(&falling, &sensor, 21.0, t0()).await.unwrap(),
            Outcome::Normal
        );
    }

    #[tokio::test]
    async fn pattern_is_not_supported() {
        let fx = fixture();
        fx.store.add_rule(rule(1, Condition::Pattern)).unwrap();
        let outcome = fx
            .evaluator
            .process_reading(1, vec![IncomingReading::raw("D4", "temperature", 20.0)])
            .await
            .unwrap();
        assert_eq!(outcome.evaluated, 1);
        assert!(outcome.alerts.is_empty());
    }
}
