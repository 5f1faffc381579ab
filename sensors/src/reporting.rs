//! Reporting queries
//!
//! Read-only views over a device's history for dashboards and the CLI.

use crate::stats::{statistics, Statistics};
use crate::thresholds::{
    recommend, suggest, ThresholdRecommendation, ThresholdSuggestion, MIN_SUGGESTION_POINTS,
};
use crate::{Assessed, Result, SensorError};
use chrono::{DateTime, Duration, Utc};
use fieldwatch_store::{
    AggregatePoint, Clock, Device, DeviceId, Granularity, ReadingQuery, TelemetryStore,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Look-back windows offered to operators
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "1h")]
    LastHour,
    #[default]
    #[serde(rename = "24h")]
    LastDay,
    #[serde(rename = "7d")]
    LastWeek,
    #[serde(rename = "30d")]
    LastMonth,
}

impl TimeRange {
    pub fn duration(&self) -> Duration {
        match self {
            TimeRange::LastHour => Duration::hours(1),
            TimeRange::LastDay => Duration::hours(24),
            TimeRange::LastWeek => Duration::days(7),
            TimeRange::LastMonth => Duration::days(30),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::LastHour => "1h",
            TimeRange::LastDay => "24h",
            TimeRange::LastWeek => "7d",
            TimeRange::LastMonth => "30d",
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1h" => Ok(TimeRange::LastHour),
            "24h" | "1d" => Ok(TimeRange::LastDay),
            "7d" => Ok(TimeRange::LastWeek),
            "30d" => Ok(TimeRange::LastMonth),
            other => Err(format!("unknown time range '{}' (use 1h, 24h, 7d or 30d)", other)),
        }
    }
}

/// Per-pin summary within a device report
#[derive(Debug, Clone, Serialize)]
pub struct SensorSummary {
    pub pin: String,
    pub sensor_type: String,
    pub reading_count: usize,
    pub latest: Option<f64>,
    pub statistics: Option<Statistics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceStats {
    pub device: Device,
    pub range: TimeRange,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub total_readings: usize,
    pub sensors: Vec<SensorSummary>,
    pub active_alerts: usize,
}

pub struct ReportingService {
    store: Arc<dyn TelemetryStore>,
    clock: Arc<dyn Clock>,
}

impl ReportingService {
    pub fn new(store: Arc<dyn TelemetryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    async fn device(&self, device_id: DeviceId) -> Result<Device> {
        self.store
            .device(device_id)
            .await?
            .ok_or(SensorError::DeviceNotFound(device_id))
    }

    fn window(&self, range: TimeRange) -> (DateTime<Utc>, DateTime<Utc>) {
        let to = self.clock.now();
        (to - range.duration(), to)
    }

    /// Threshold bands recommended from one pin's recent history.
    pub async fn get_recommended_thresholds(
        &self,
        device_id: DeviceId,
        pin: &str,
        range: TimeRange,
    ) -> Result<Assessed<ThresholdRecommendation>> {
        self.device(device_id).await?;
        let (from, to) = self.window(range);
        let readings = self
            .store
            .readings(&ReadingQuery::new(device_id, from, to).pin(pin))
            .await?;

        let provisioned = self
            .store
            .device_sensors(device_id)
            .await?
            .into_iter()
            .find(|s| s.pin == pin)
            .map(|s| s.sensor_type.as_str().to_string());
        let sensor_type = provisioned
            .or_else(|| readings.first().map(|r| r.sensor_type.clone()))
            .unwrap_or_default();

        let values: Vec<f64> = readings.iter().map(|r| r.processed_value).collect();
        let stats = statistics(&values).filter(|s| s.count >= MIN_SUGGESTION_POINTS);
        let Some(stats) = stats else {
            return Ok(Assessed::InsufficientData {
                required: MIN_SUGGESTION_POINTS,
                available: values.len(),
            });
        };

        Ok(Assessed::Ready(recommend(&stats, &sensor_type)))
    }

    /// Conservative to sensitive bands for one pin, with warnings about
    /// erratic series.
    pub async fn get_threshold_suggestions(
        &self,
        device_id: DeviceId,
        pin: &str,
        range: TimeRange,
    ) -> Result<Assessed<ThresholdSuggestion>> {
        self.device(device_id).await?;
        let (from, to) = self.window(range);
        let values: Vec<f64> = self
            .store
            .readings(&ReadingQuery::new(device_id, from, to).pin(pin))
            .await?
            .into_iter()
            .map(|r| r.processed_value)
            .collect();
        Ok(suggest(&values))
    }

    /// Bucketed history for a device, optionally for one pin.
    pub async fn get_historical_telemetry(
        &self,
        device_id: DeviceId,
        pin: Option<&str>,
        range: TimeRange,
        granularity: Granularity,
    ) -> Result<Vec<AggregatePoint>> {
        self.device(device_id).await?;
        let (from, to) = self.window(range);
        Ok(self
            .store
            .aggregate(device_id, pin, from, to, granularity)
            .await?)
    }

    /// Per-sensor statistics, reading counts and open alerts for a device.
    pub async fn get_device_stats(&self, device_id: DeviceId, range: TimeRange) -> Result<DeviceStats> {
        let device = self.device(device_id).await?;
        let (from, to) = self.window(range);
        let readings = self
            .store
            .readings(&ReadingQuery::new(device_id, from, to))
            .await?;

        // Newest first, so the first value seen per key is the latest
        let mut grouped: BTreeMap<(String, String), Vec<f64>> = BTreeMap::new();
        for reading in &readings {
            grouped
                .entry((reading.pin.clone(), reading.sensor_type.to_lowercase()))
                .or_default()
                .push(reading.processed_value);
        }

        let sensors = grouped
            .into_iter()
            .map(|((pin, sensor_type), values)| SensorSummary {
                pin,
                sensor_type,
                reading_count: values.len(),
                latest: values.first().copied(),
                statistics: statistics(&values),
            })
            .collect();

        let active_alerts = self.store.active_alerts(Some(device_id)).await?.len();

        Ok(DeviceStats {
            device,
            range,
            from,
            to,
            total_readings: readings.len(),
            sensors,
            active_alerts,
        })
    }
}
