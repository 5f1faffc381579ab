//! Sensor readings and historical queries

use crate::{device::SensorType, DeviceId};
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Stored reading. Never mutated once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    pub id: i64,
    pub device_id: DeviceId,
    pub pin: String,
    /// Declared type tag as delivered by the device
    pub sensor_type: String,
    pub raw_value: f64,
    pub processed_value: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl Reading {
    pub fn recognised_type(&self) -> Option<SensorType> {
        SensorType::from_tag(&self.sensor_type)
    }
}

/// Reading to append
#[derive(Debug, Clone)]
pub struct NewReading {
    pub device_id: DeviceId,
    pub pin: String,
    pub sensor_type: String,
    pub raw_value: f64,
    pub processed_value: f64,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

/// Range query over one device's readings.
///
/// Results are ordered newest first; `limit` keeps the newest rows.
#[derive(Debug, Clone)]
pub struct ReadingQuery {
    pub device_id: DeviceId,
    pub pin: Option<String>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub limit: Option<usize>,
}

impl ReadingQuery {
    pub fn new(device_id: DeviceId, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            device_id,
            pin: None,
            from,
            to,
            limit: None,
        }
    }

    pub fn pin(mut self, pin: &str) -> Self {
        self.pin = Some(pin.to_string());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a reading falls inside this query (bounds inclusive).
    pub fn matches(&self, reading: &Reading) -> bool {
        reading.device_id == self.device_id
            && self.pin.as_ref().map_or(true, |pin| &reading.pin == pin)
            && reading.timestamp >= self.from
            && reading.timestamp <= self.to
    }
}

/// Aggregation granularity for historical telemetry
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    #[default]
    Raw,
    Hourly,
    Daily,
}

impl std::str::FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "raw" => Ok(Granularity::Raw),
            "hourly" | "hour" => Ok(Granularity::Hourly),
            "daily" | "day" => Ok(Granularity::Daily),
            other => Err(format!("unknown granularity: {}", other)),
        }
    }
}

/// One bucket of aggregated telemetry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregatePoint {
    pub bucket: DateTime<Utc>,
    pub pin: String,
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

/// Fold readings into per-pin buckets, oldest bucket first.
pub fn aggregate(readings: &[Reading], granularity: Granularity) -> Vec<AggregatePoint> {
    if granularity == Granularity::Raw {
        let mut points: Vec<AggregatePoint> = readings
            .iter()
            .map(|r| AggregatePoint {
                bucket: r.timestamp,
                pin: r.pin.clone(),
                count: 1,
                min: r.processed_value,
                max: r.processed_value,
                avg: r.processed_value,
            })
            .collect();
        points.sort_by(|a, b| a.bucket.cmp(&b.bucket).then_with(|| a.pin.cmp(&b.pin)));
        return points;
    }

    let step = match granularity {
        Granularity::Hourly => TimeDelta::hours(1),
        _ => TimeDelta::days(1),
    };

    let mut buckets: BTreeMap<(DateTime<Utc>, String), (usize, f64, f64, f64)> = BTreeMap::new();
    for reading in readings {
        let bucket = reading.timestamp.duration_trunc(step).unwrap_or(reading.timestamp);
        let value = reading.processed_value;
        let entry = buckets
            .entry((bucket, reading.pin.clone()))
            .or_insert((0, f64::MAX, f64::MIN, 0.0));
        entry.0 += 1;
        entry.1 = entry.1.min(value);
        entry.2 = entry.2.max(value);
        entry.3 += value;
    }

    buckets
        .into_iter()
        .map(|((bucket, pin), (count, min, max, sum))| AggregatePoint {
            bucket,
            pin,
            count,
            min,
            max,
            avg: sum / count as f64,
        })
        .collect()
}
