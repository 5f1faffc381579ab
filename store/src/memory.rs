//! In-memory reference store
//!
//! Keeps every table behind a single lock so alert deduplication is a true
//! check-and-insert. Readings can additionally be appended to a
//! [`ReadingJournal`] so history survives restarts.

use crate::{
    escalation::select_rule, reading, Alert, AlertId, AlertInsert, AlertStatus, AggregatePoint,
    CalibrationResult, Clock, Device, DeviceId, DeviceSensor, DeviceStatus, EscalationCandidate,
    EscalationRule, Granularity, NewAlert, NewReading, NewSensor, Reading, ReadingJournal,
    ReadingQuery, Result, SensorId, SensorRule, SensorType, Severity, StoreError,
    SuppressionCheck, TelemetryStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Configured suppression window for a device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SilentWindow {
    pub device_id: DeviceId,
    /// Restrict to one alert type; `None` silences every type
    #[serde(default)]
    pub alert_type: Option<String>,
    /// Restrict to one severity; `None` silences every severity
    #[serde(default)]
    pub severity: Option<Severity>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl SilentWindow {
    pub fn silences(
        &self,
        device_id: DeviceId,
        alert_type: &str,
        severity: Severity,
        now: DateTime<Utc>,
    ) -> bool {
        self.device_id == device_id
            && self.alert_type.as_deref().map_or(true, |t| t == alert_type)
            && self.severity.map_or(true, |s| s == severity)
            && now >= self.starts_at
            && now < self.ends_at
    }
}

#[derive(Default)]
struct Tables {
    devices: BTreeMap<DeviceId, Device>,
    sensors: BTreeMap<SensorId, DeviceSensor>,
    rules: Vec<SensorRule>,
    escalation_rules: Vec<EscalationRule>,
    readings: Vec<Reading>,
    alerts: BTreeMap<AlertId, Alert>,
    silent_windows: Vec<SilentWindow>,
    next_reading_id: i64,
    next_sensor_id: i64,
    next_alert_id: i64,
}

/// Store that keeps everything in process memory
pub struct MemoryStore {
    tables: RwLock<Tables>,
    journal: Option<Mutex<ReadingJournal>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: RwLock::new(Tables {
                next_reading_id: 1,
                next_sensor_id: 1,
                next_alert_id: 1,
                ..Default::default()
            }),
            journal: None,
            clock,
        }
    }

    /// Append every stored reading to `journal` as well.
    pub fn with_journal(mut self, journal: ReadingJournal) -> Self {
        self.journal = Some(Mutex::new(journal));
        self
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }

    pub fn add_device(&self, device: Device) -> Result<()> {
        self.write()?.devices.insert(device.id, device);
        Ok(())
    }

    pub fn add_sensor(&self, sensor: DeviceSensor) -> Result<()> {
        let mut tables = self.write()?;
        if !tables.devices.contains_key(&sensor.device_id) {
            return Err(StoreError::NotFound {
                entity: "device",
                id: sensor.device_id,
            });
        }
        tables.next_sensor_id = tables.next_sensor_id.max(sensor.id + 1);
        tables.sensors.insert(sensor.id, sensor);
        Ok(())
    }

    pub fn add_rule(&self, rule: SensorRule) -> Result<()> {
        let mut tables = self.write()?;
        if !tables.sensors.contains_key(&rule.device_sensor_id) {
            return Err(StoreError::NotFound {
                entity: "sensor",
                id: rule.device_sensor_id,
            });
        }
        tables.rules.retain(|r| r.id != rule.id);
        tables.rules.push(rule);
        Ok(())
    }

    pub fn add_escalation_rule(&self, rule: EscalationRule) -> Result<()> {
        let mut tables = self.write()?;
        tables.escalation_rules.retain(|r| r.id != rule.id);
        tables.escalation_rules.push(rule);
        Ok(())
    }

    pub fn add_silent_window(&self, window: SilentWindow) -> Result<()> {
        self.write()?.silent_windows.push(window);
        Ok(())
    }

    /// Load previously stored readings, e.g. replayed from a journal.
    pub fn restore_readings(&self, readings: Vec<Reading>) -> Result<()> {
        let mut tables = self.write()?;
        for reading in readings {
            tables.next_reading_id = tables.next_reading_id.max(reading.id + 1);
            tables.readings.push(reading);
        }
        tables.readings.sort_by_key(|r| (r.timestamp, r.id));
        Ok(())
    }

    /// Every device, ordered by id.
    pub fn devices(&self) -> Result<Vec<Device>> {
        Ok(self.read()?.devices.values().cloned().collect())
    }

    pub fn reading_count(&self) -> Result<usize> {
        Ok(self.read()?.readings.len())
    }

    pub fn alerts(&self) -> Result<Vec<Alert>> {
        Ok(self.read()?.alerts.values().cloned().collect())
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn device(&self, id: DeviceId) -> Result<Option<Device>> {
        Ok(self.read()?.devices.get(&id).cloned())
    }

    async fn set_device_status(&self, id: DeviceId, status: DeviceStatus) -> Result<()> {
        let mut tables = self.write()?;
        let device = tables
            .devices
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "device", id })?;
        device.status = status;
        Ok(())
    }

    async fn insert_reading(&self, new: NewReading) -> Result<Reading> {
        let reading = {
            let mut tables = self.write()?;
            let id = tables.next_reading_id;
            tables.next_reading_id += 1;
            let reading = Reading {
                id,
                device_id: new.device_id,
                pin: new.pin,
                sensor_type: new.sensor_type,
                raw_value: new.raw_value,
                processed_value: new.processed_value,
                timestamp: new.timestamp,
                metadata: new.metadata,
            };
            tables.readings.push(reading.clone());
            reading
        };

        if let Some(journal) = &self.journal {
            let mut journal = journal
                .lock()
                .map_err(|_| StoreError::Backend("journal lock poisoned".to_string()))?;
            journal.append(&reading)?;
        }

        Ok(reading)
    }

    async fn readings(&self, query: &ReadingQuery) -> Result<Vec<Reading>> {
        let tables = self.read()?;
        let mut rows: Vec<Reading> = tables
            .readings
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn aggregate(
        &self,
        device_id: DeviceId,
        pin: Option<&str>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        granularity: Granularity,
    ) -> Result<Vec<AggregatePoint>> {
        let mut query = ReadingQuery::new(device_id, from, to);
        if let Some(pin) = pin {
            query = query.pin(pin);
        }
        let rows = self.readings(&query).await?;
        Ok(reading::aggregate(&rows, granularity))
    }

    async fn sensor(&self, id: SensorId) -> Result<Option<DeviceSensor>> {
        Ok(self.read()?.sensors.get(&id).cloned())
    }

    async fn find_sensor(
        &self,
        device_id: DeviceId,
        pin: &str,
        sensor_type: SensorType,
    ) -> Result<Option<DeviceSensor>> {
        Ok(self
            .read()?
            .sensors
            .values()
            .find(|s| s.device_id == device_id && s.pin == pin && s.sensor_type == sensor_type)
            .cloned())
    }

    async fn device_sensors(&self, device_id: DeviceId) -> Result<Vec<DeviceSensor>> {
        Ok(self
            .read()?
            .sensors
            .values()
            .filter(|s| s.device_id == device_id)
            .cloned()
            .collect())
    }

    async fn insert_sensor(&self, new: NewSensor) -> Result<DeviceSensor> {
        let mut tables = self.write()?;
        if !tables.devices.contains_key(&new.device_id) {
            return Err(StoreError::NotFound {
                entity: "device",
                id: new.device_id,
            });
        }
        if let Some(existing) = tables.sensors.values().find(|s| {
            s.device_id == new.device_id && s.pin == new.pin && s.sensor_type == new.sensor_type
        }) {
            return Ok(existing.clone());
        }

        let id = tables.next_sensor_id;
        tables.next_sensor_id += 1;
        let sensor = DeviceSensor {
            id,
            device_id: new.device_id,
            pin: new.pin,
            sensor_type: new.sensor_type,
            name: new.name,
            enabled: true,
            auto_calibrate: false,
            calibration_offset: 0.0,
            calibration_multiplier: 1.0,
            threshold_min: None,
            threshold_max: None,
            calibration: None,
        };
        tables.sensors.insert(id, sensor.clone());
        Ok(sensor)
    }

    async fn save_calibration(&self, sensor_id: SensorId, result: &CalibrationResult) -> Result<()> {
        let mut tables = self.write()?;
        let sensor = tables.sensors.get_mut(&sensor_id).ok_or(StoreError::NotFound {
            entity: "sensor",
            id: sensor_id,
        })?;
        sensor.calibration = Some(result.clone());
        Ok(())
    }

    async fn enabled_rules(
        &self,
        device_id: DeviceId,
        pin: &str,
        sensor_type: SensorType,
    ) -> Result<Vec<SensorRule>> {
        let tables = self.read()?;
        let sensor_ids: Vec<SensorId> = tables
            .sensors
            .values()
            .filter(|s| {
                s.enabled && s.device_id == device_id && s.pin == pin && s.sensor_type == sensor_type
            })
            .map(|s| s.id)
            .collect();

        Ok(tables
            .rules
            .iter()
            .filter(|r| r.enabled && sensor_ids.contains(&r.device_sensor_id))
            .cloned()
            .collect())
    }

    async fn insert_alert_deduplicated(
        &self,
        new: NewAlert,
        since: DateTime<Utc>,
    ) -> Result<AlertInsert> {
        let mut tables = self.write()?;
        if let Some(existing) = tables
            .alerts
            .values()
            .find(|a| a.is_active() && new.same_source(a) && a.created_at >= since)
        {
            return Ok(AlertInsert::Duplicate(existing.id));
        }

        let id = tables.next_alert_id;
        tables.next_alert_id += 1;
        let alert = new.into_alert(id);
        tables.alerts.insert(id, alert.clone());
        Ok(AlertInsert::Created(alert))
    }

    async fn alert(&self, id: AlertId) -> Result<Option<Alert>> {
        Ok(self.read()?.alerts.get(&id).cloned())
    }

    async fn active_alerts(&self, device_id: Option<DeviceId>) -> Result<Vec<Alert>> {
        Ok(self
            .read()?
            .alerts
            .values()
            .filter(|a| a.is_active() && device_id.map_or(true, |d| a.device_id == d))
            .cloned()
            .collect())
    }

    async fn set_alert_status(&self, id: AlertId, status: AlertStatus) -> Result<()> {
        let mut tables = self.write()?;
        let alert = tables
            .alerts
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "alert", id })?;
        alert.status = status;
        Ok(())
    }

    async fn escalation_candidates(&self, now: DateTime<Utc>) -> Result<Vec<EscalationCandidate>> {
        let tables = self.read()?;
        let mut candidates = Vec::new();

        for alert in tables.alerts.values().filter(|a| a.is_active()) {
            let Some(device) = tables.devices.get(&alert.device_id) else {
                continue;
            };
            let Some(rule) = select_rule(&tables.escalation_rules, alert, device) else {
                continue;
            };
            if rule.is_due(alert, now) {
                candidates.push(EscalationCandidate {
                    alert: alert.clone(),
                    rule: rule.clone(),
                    device: device.clone(),
                });
            }
        }

        Ok(candidates)
    }

    async fn record_escalation(&self, id: AlertId, level: u32, at: DateTime<Utc>) -> Result<()> {
        let mut tables = self.write()?;
        let alert = tables
            .alerts
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "alert", id })?;
        if level < alert.escalation_level {
            return Err(StoreError::Conflict(format!(
                "alert {} is already at level {}",
                id, alert.escalation_level
            )));
        }
        alert.escalation_level = level;
        alert.last_escalated = Some(at);
        Ok(())
    }

    async fn touch_escalation(&self, id: AlertId, at: DateTime<Utc>) -> Result<()> {
        let mut tables = self.write()?;
        let alert = tables
            .alerts
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "alert", id })?;
        alert.last_escalated = Some(at);
        Ok(())
    }
}

#[async_trait]
impl SuppressionCheck for MemoryStore {
    async fn is_suppressed(
        &self,
        device_id: DeviceId,
        alert_type: &str,
        severity: Severity,
    ) -> Result<bool> {
        let now = self.clock.now();
        Ok(self
            .read()?
            .silent_windows
            .iter()
            .any(|w| w.silences(device_id, alert_type, severity, now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Condition, ManualClock};
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn store() -> (MemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = MemoryStore::new(clock.clone());
        store
            .add_device(Device {
                id: 1,
                name: "kitchen".to_string(),
                location_id: None,
                status: DeviceStatus::Online,
            })
            .unwrap();
        (store, clock)
    }

    fn new_alert(at: DateTime<Utc>) -> NewAlert {
        NewAlert {
            device_id: 1,
            sensor_id: 2,
            rule_id: Some(3),
            alert_type: "between".to_string(),
            severity: Severity::High,
            message: "out of range".to_string(),
            created_at: at,
        }
    }

    #[tokio::test]
    async fn deduplicated_insert_respects_window() {
        let (store, _) = store();

        let first = store
            .insert_alert_deduplicated(new_alert(t0()), t0() - Duration::minutes(5))
            .await
            .unwrap();
        let AlertInsert::Created(first) = first else {
            panic!("expected a new alert");
        };

        let later = t0() + Duration::minutes(2);
        let second = store
            .insert_alert_deduplicated(new_alert(later), later - Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(second, AlertInsert::Duplicate(first.id));

        let much_later = t0() + Duration::minutes(6);
        let third = store
            .insert_alert_deduplicated(new_alert(much_later), much_later - Duration::minutes(5))
            .await
            .unwrap();
        assert!(matches!(third, AlertInsert::Created(_)));
    }

    #[tokio::test]
    async fn readings_come_back_newest_first_with_limit() {
        let (store, _) = store();
        for i in 0..5 {
            store
                .insert_reading(NewReading {
                    device_id: 1,
                    pin: "D4".to_string(),
                    sensor_type: "temperature".to_string(),
                    raw_value: i as f64,
                    processed_value: i as f64,
                    timestamp: t0() + Duration::minutes(i),
                    metadata: HashMap::new(),
                })
                .await
                .unwrap();
        }

        let query = ReadingQuery::new(1, t0(), t0() + Duration::hours(1)).pin("D4").limit(2);
        let rows = store.readings(&query).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].processed_value, 4.0);
        assert_eq!(rows[1].processed_value, 3.0);
    }

    #[tokio::test]
    async fn disabled_rules_are_not_returned() {
        let (store, _) = store();
        let sensor = store
            .insert_sensor(NewSensor {
                device_id: 1,
                pin: "D4".to_string(),
                sensor_type: SensorType::Temperature,
                name: "dht".to_string(),
            })
            .await
            .unwrap();
        store
            .add_rule(SensorRule {
                id: 1,
                device_sensor_id: sensor.id,
                condition: Condition::GreaterThan { threshold: 30.0 },
                severity: Severity::High,
                enabled: true,
            })
            .unwrap();
        store
            .add_rule(SensorRule {
                id: 2,
                device_sensor_id: sensor.id,
                condition: Condition::LessThan { threshold: 0.0 },
                severity: Severity::High,
                enabled: false,
            })
            .unwrap();

        let rules = store
            .enabled_rules(1, "D4", SensorType::Temperature)
            .await
            .unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, 1);
    }

    #[tokio::test]
    async fn silent_windows_follow_the_clock() {
        let (store, clock) = store();
        store
            .add_silent_window(SilentWindow {
                device_id: 1,
                alert_type: None,
                severity: Some(Severity::High),
                starts_at: t0(),
                ends_at: t0() + Duration::hours(1),
            })
            .unwrap();

        assert!(store.is_suppressed(1, "between", Severity::High).await.unwrap());
        assert!(!store.is_suppressed(1, "between", Severity::Low).await.unwrap());

        clock.advance(Duration::hours(2));
        assert!(!store.is_suppressed(1, "between", Severity::High).await.unwrap());
    }

    #[test]
    fn record_escalation_never_lowers_level() {
        let (store, _) = store();
        let created = tokio_test::block_on(
            store.insert_alert_deduplicated(new_alert(t0()), t0()),
        )
        .unwrap();
        let AlertInsert::Created(alert) = created else {
            panic!("expected a new alert");
        };

        tokio_test::block_on(store.record_escalation(alert.id, 2, t0())).unwrap();
        let err = tokio_test::block_on(store.record_escalation(alert.id, 1, t0())).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }
}
