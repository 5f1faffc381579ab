//! Storage interfaces
//!
//! The alerting core only ever talks to storage through these traits, so a
//! relational backend and [`MemoryStore`](crate::MemoryStore) are
//! interchangeable.

use crate::{
    Alert, AlertId, AlertInsert, AlertStatus, CalibrationResult, Device, DeviceId, DeviceSensor,
    DeviceStatus, EscalationCandidate, NewAlert, NewReading, NewSensor, Reading, ReadingQuery,
    Result, SensorId, SensorRule, SensorType, Severity, AggregatePoint, Granularity,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Persistent store for devices, readings, rules and alerts
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    // Devices

    async fn device(&self, id: DeviceId) -> Result<Option<Device>>;

    async fn set_device_status(&self, id: DeviceId, status: DeviceStatus) -> Result<()>;

    // Readings

    /// Append a reading. Readings are never updated.
    async fn insert_reading(&self, reading: NewReading) -> Result<Reading>;

    /// Readings matching the query, newest first.
    async fn readings(&self, query: &ReadingQuery) -> Result<Vec<Reading>>;

    /// Bucketed history for a device, optionally restricted to one pin.
    async fn aggregate(
        &self,
        device_id: DeviceId,
        pin: Option<&str>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        granularity: Granularity,
    ) -> Result<Vec<AggregatePoint>>;

    // Sensors

    async fn sensor(&self, id: SensorId) -> Result<Option<DeviceSensor>>;

    async fn find_sensor(
        &self,
        device_id: DeviceId,
        pin: &str,
        sensor_type: SensorType,
    ) -> Result<Option<DeviceSensor>>;

    async fn device_sensors(&self, device_id: DeviceId) -> Result<Vec<DeviceSensor>>;

    async fn insert_sensor(&self, sensor: NewSensor) -> Result<DeviceSensor>;

    async fn save_calibration(&self, sensor_id: SensorId, result: &CalibrationResult)
        -> Result<()>;

    // Rules

    /// Enabled rules for the sensor on (device, pin, type).
    async fn enabled_rules(
        &self,
        device_id: DeviceId,
        pin: &str,
        sensor_type: SensorType,
    ) -> Result<Vec<SensorRule>>;

    // Alerts

    /// Insert unless an active alert for the same (device, sensor, rule)
    /// was created at or after `since`. Check and insert are atomic.
    async fn insert_alert_deduplicated(
        &self,
        alert: NewAlert,
        since: DateTime<Utc>,
    ) -> Result<AlertInsert>;

    async fn alert(&self, id: AlertId) -> Result<Option<Alert>>;

    async fn active_alerts(&self, device_id: Option<DeviceId>) -> Result<Vec<Alert>>;

    /// Acknowledgement workflow hook.
    async fn set_alert_status(&self, id: AlertId, status: AlertStatus) -> Result<()>;

    // Escalation

    /// Active alerts with a matching escalation rule that are due at `now`
    /// and below the rule's maximum level.
    async fn escalation_candidates(&self, now: DateTime<Utc>) -> Result<Vec<EscalationCandidate>>;

    /// Advance an alert to `level`, stamping `last_escalated`.
    async fn record_escalation(&self, id: AlertId, level: u32, at: DateTime<Utc>) -> Result<()>;

    /// Stamp `last_escalated` without changing the level.
    async fn touch_escalation(&self, id: AlertId, at: DateTime<Utc>) -> Result<()>;
}

/// Silent-mode lookup
#[async_trait]
pub trait SuppressionCheck: Send + Sync {
    async fn is_suppressed(
        &self,
        device_id: DeviceId,
        alert_type: &str,
        severity: Severity,
    ) -> Result<bool>;
}
