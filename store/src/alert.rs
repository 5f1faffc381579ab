//! Alert records

use crate::{AlertId, DeviceId, RuleId, SensorId, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert lifecycle state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

/// Materialised rule violation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: AlertId,
    pub device_id: DeviceId,
    pub sensor_id: SensorId,
    pub rule_id: Option<RuleId>,
    pub alert_type: String,
    pub severity: Severity,
    pub message: String,
    pub status: AlertStatus,
    pub escalation_level: u32,
    pub last_escalated: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn is_active(&self) -> bool {
        self.status == AlertStatus::Active
    }
}

/// Alert to insert; always starts active at level 0
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub device_id: DeviceId,
    pub sensor_id: SensorId,
    pub rule_id: Option<RuleId>,
    pub alert_type: String,
    pub severity: Severity,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl NewAlert {
    pub fn into_alert(self, id: AlertId) -> Alert {
        Alert {
            id,
            device_id: self.device_id,
            sensor_id: self.sensor_id,
            rule_id: self.rule_id,
            alert_type: self.alert_type,
            severity: self.severity,
            message: self.message,
            status: AlertStatus::Active,
            escalation_level: 0,
            last_escalated: None,
            created_at: self.created_at,
        }
    }

    /// Same (device, sensor, rule) as an existing alert
    pub fn same_source(&self, alert: &Alert) -> bool {
        alert.device_id == self.device_id
            && alert.sensor_id == self.sensor_id
            && alert.rule_id == self.rule_id
    }
}

/// Outcome of a deduplicated insert
#[derive(Debug, Clone, PartialEq)]
pub enum AlertInsert {
    Created(Alert),
    /// An active alert for the same source already exists inside the window
    Duplicate(AlertId),
}
