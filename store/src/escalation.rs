//! Escalation rules
//!
//! An alert is matched to at most one rule. Rules scoped to the alert's
//! device win over rules scoped to its location, which win over global
//! rules; within a scope an exact severity match wins over `all`.

use crate::{Alert, Device, DeviceId, LocationId, Severity};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity filter of an escalation rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SeverityMatch {
    All,
    Exact(Severity),
}

impl SeverityMatch {
    pub fn matches(&self, severity: Severity) -> bool {
        match self {
            SeverityMatch::All => true,
            SeverityMatch::Exact(s) => *s == severity,
        }
    }
}

impl TryFrom<String> for SeverityMatch {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.eq_ignore_ascii_case("all") {
            return Ok(SeverityMatch::All);
        }
        value.parse().map(SeverityMatch::Exact)
    }
}

impl From<SeverityMatch> for String {
    fn from(value: SeverityMatch) -> Self {
        match value {
            SeverityMatch::All => "all".to_string(),
            SeverityMatch::Exact(s) => s.as_str().to_string(),
        }
    }
}

/// What an escalation rule covers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationScope {
    Device(DeviceId),
    Location(LocationId),
    #[default]
    Global,
}

impl EscalationScope {
    /// Lower is more specific
    pub fn precedence(&self) -> u8 {
        match self {
            EscalationScope::Device(_) => 0,
            EscalationScope::Location(_) => 1,
            EscalationScope::Global => 2,
        }
    }

    pub fn covers(&self, device: &Device) -> bool {
        match self {
            EscalationScope::Device(id) => *id == device.id,
            EscalationScope::Location(id) => device.location_id == Some(*id),
            EscalationScope::Global => true,
        }
    }
}

/// Notification channel kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationMethod {
    Email,
    Sms,
    #[serde(alias = "telegram")]
    Chat,
    Push,
    Webhook,
}

impl fmt::Display for NotificationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NotificationMethod::Email => "email",
            NotificationMethod::Sms => "sms",
            NotificationMethod::Chat => "chat",
            NotificationMethod::Push => "push",
            NotificationMethod::Webhook => "webhook",
        };
        f.write_str(name)
    }
}

/// Notification recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    #[serde(rename = "type")]
    pub kind: String,
    pub address: String,
}

/// Escalation policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRule {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    pub severity_match: SeverityMatch,
    #[serde(default)]
    pub scope: EscalationScope,
    pub escalation_delay_minutes: u32,
    pub max_escalation_level: u32,
    #[serde(default)]
    pub notification_methods: Vec<NotificationMethod>,
    #[serde(default)]
    pub recipients: Vec<Recipient>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl EscalationRule {
    pub fn delay(&self) -> Duration {
        Duration::minutes(i64::from(self.escalation_delay_minutes))
    }

    /// Enabled, severity matches and scope covers the device.
    pub fn applies_to(&self, alert: &Alert, device: &Device) -> bool {
        self.enabled
            && alert.device_id == device.id
            && self.severity_match.matches(alert.severity)
            && self.scope.covers(device)
    }

    /// Whether the alert may advance one level at `now`.
    ///
    /// The delay runs from the last escalation, or from creation when the
    /// alert has never been escalated.
    pub fn is_due(&self, alert: &Alert, now: DateTime<Utc>) -> bool {
        if !alert.is_active() || alert.escalation_level >= self.max_escalation_level {
            return false;
        }
        let since = alert.last_escalated.unwrap_or(alert.created_at);
        since <= now - self.delay()
    }
}

/// Pick the most specific enabled rule for an alert.
pub fn select_rule<'a>(
    rules: &'a [EscalationRule],
    alert: &Alert,
    device: &Device,
) -> Option<&'a EscalationRule> {
    rules
        .iter()
        .filter(|rule| rule.applies_to(alert, device))
        .min_by_key(|rule| {
            let wildcard = matches!(rule.severity_match, SeverityMatch::All);
            (rule.scope.precedence(), wildcard, rule.id)
        })
}

/// Alert that is due for escalation, with its matching rule
#[derive(Debug, Clone)]
pub struct EscalationCandidate {
    pub alert: Alert,
    pub rule: EscalationRule,
    pub device: Device,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AlertStatus, DeviceStatus};
    use chrono::TimeZone;

    fn device() -> Device {
        Device {
            id: 10,
            name: "greenhouse".to_string(),
            location_id: Some(2),
            status: DeviceStatus::Online,
        }
    }

    fn alert(severity: Severity) -> Alert {
        Alert {
            id: 1,
            device_id: 10,
            sensor_id: 4,
            rule_id: Some(9),
            alert_type: "between".to_string(),
            severity,
            message: "too hot".to_string(),
            status: AlertStatus::Active,
            escalation_level: 0,
            last_escalated: None,
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap(),
        }
    }

    fn rule(id: i64, severity_match: SeverityMatch, scope: EscalationScope) -> EscalationRule {
        EscalationRule {
            id,
            name: format!("rule-{}", id),
            severity_match,
            scope,
            escalation_delay_minutes: 5,
            max_escalation_level: 3,
            notification_methods: vec![NotificationMethod::Email],
            recipients: vec![],
            enabled: true,
        }
    }

    #[test]
    fn device_scope_beats_location_and_global() {
        let rules = vec![
            rule(1, SeverityMatch::All, EscalationScope::Global),
            rule(2, SeverityMatch::All, EscalationScope::Location(2)),
            rule(3, SeverityMatch::All, EscalationScope::Device(10)),
        ];
        let picked = select_rule(&rules, &alert(Severity::High), &device()).unwrap();
        assert_eq!(picked.id, 3);

        let picked = select_rule(&rules[..2], &alert(Severity::High), &device()).unwrap();
        assert_eq!(picked.id, 2);
    }

    #[test]
    fn exact_severity_beats_wildcard_in_same_scope() {
        let rules = vec![
            rule(1, SeverityMatch::All, EscalationScope::Global),
            rule(2, SeverityMatch::Exact(Severity::Critical), EscalationScope::Global),
        ];
        assert_eq!(
            select_rule(&rules, &alert(Severity::Critical), &device()).unwrap().id,
            2
        );
        assert_eq!(
            select_rule(&rules, &alert(Severity::Low), &device()).unwrap().id,
            1
        );
    }

    #[test]
    fn other_scopes_and_disabled_rules_are_ignored() {
        let mut disabled = rule(1, SeverityMatch::All, EscalationScope::Global);
        disabled.enabled = false;
        let rules = vec![
            disabled,
            rule(2, SeverityMatch::All, EscalationScope::Device(99)),
            rule(3, SeverityMatch::All, EscalationScope::Location(7)),
        ];
        assert!(select_rule(&rules, &alert(Severity::High), &device()).is_none());
    }

    #[test]
    fn due_only_after_delay_and_below_max() {
        let r = rule(1, SeverityMatch::All, EscalationScope::Global);
        let mut a = alert(Severity::High);
        let t0 = a.created_at;

        assert!(!r.is_due(&a, t0 + Duration::minutes(4)));
        assert!(r.is_due(&a, t0 + Duration::minutes(5)));

        a.escalation_level = 1;
        a.last_escalated = Some(t0 + Duration::minutes(5));
        assert!(!r.is_due(&a, t0 + Duration::minutes(9)));
        assert!(r.is_due(&a, t0 + Duration::minutes(10)));

        a.escalation_level = 3;
        assert!(!r.is_due(&a, t0 + Duration::days(1)));

        a.escalation_level = 1;
        a.status = AlertStatus::Acknowledged;
        assert!(!r.is_due(&a, t0 + Duration::days(1)));
    }

    #[test]
    fn severity_match_round_trips_through_strings() {
        assert_eq!(SeverityMatch::try_from("ALL".to_string()), Ok(SeverityMatch::All));
        assert_eq!(
            SeverityMatch::try_from("high".to_string()),
            Ok(SeverityMatch::Exact(Severity::High))
        );
        assert!(SeverityMatch::try_from("loud".to_string()).is_err());
    }
}
