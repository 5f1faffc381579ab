//! Per-sensor rules
//!
//! Rules are stored as flat rows ([`SensorRuleRow`]) the way the relational
//! store keeps them, and converted once into [`SensorRule`], whose
//! [`Condition`] carries exactly the parameters each kind needs.

use crate::{RuleId, SensorId};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_RATE_WINDOW_MINUTES: u32 = 5;
pub const DEFAULT_HISTORY_WINDOW_DAYS: u32 = 7;
pub const DEFAULT_ANOMALY_SENSITIVITY: f64 = 3.0;
pub const DEFAULT_SEASONAL_SENSITIVITY: f64 = 2.5;
pub const DEFAULT_TREND_WINDOW_MINUTES: u32 = 60;
pub const DEFAULT_TREND_THRESHOLD: f64 = 0.1;
/// Longest history window a rule row may ask for, in days
pub const MAX_WINDOW_DAYS: u32 = 3650;
pub const MAX_WINDOW_MINUTES: u32 = MAX_WINDOW_DAYS * 24 * 60;

/// Alert severity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    Warning,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::Warning => "warning",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "warning" => Ok(Severity::Warning),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// Direction a trend rule looks for
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrendType {
    Increasing,
    Decreasing,
    Stable,
    #[default]
    AnyChange,
}

/// Rule condition with its parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    GreaterThan {
        threshold: f64,
    },
    LessThan {
        threshold: f64,
    },
    /// Within ±0.01 of the target
    Equals {
        target: f64,
    },
    /// Fires when the value leaves `[min, max]`
    Between {
        min: f64,
        max: f64,
    },
    /// Fires when the value enters `[min, max]`
    OutsideRange {
        min: f64,
        max: f64,
    },
    RateOfChange {
        max_delta: f64,
        #[serde(default = "default_rate_window")]
        window_minutes: u32,
    },
    DynamicThreshold {
        #[serde(default = "default_history_window")]
        window_days: u32,
        #[serde(default)]
        fallback_min: Option<f64>,
        #[serde(default)]
        fallback_max: Option<f64>,
    },
    StatisticalAnomaly {
        #[serde(default = "default_history_window")]
        window_days: u32,
        #[serde(default = "default_anomaly_sensitivity")]
        sensitivity: f64,
    },
    SeasonalAnomaly {
        #[serde(default = "default_seasonal_sensitivity")]
        sensitivity: f64,
    },
    TrendDetection {
        #[serde(default = "default_trend_window")]
        window_minutes: u32,
        #[serde(default)]
        trend: TrendType,
        #[serde(default = "default_trend_threshold")]
        threshold: f64,
    },
    /// Reserved; never matches
    Pattern,
}

fn default_rate_window() -> u32 { DEFAULT_RATE_WINDOW_MINUTES }
fn default_history_window() -> u32 { DEFAULT_HISTORY_WINDOW_DAYS }
fn default_anomaly_sensitivity() -> f64 { DEFAULT_ANOMALY_SENSITIVITY }
fn default_seasonal_sensitivity() -> f64 { DEFAULT_SEASONAL_SENSITIVITY }
fn default_trend_window() -> u32 { DEFAULT_TREND_WINDOW_MINUTES }
fn default_trend_threshold() -> f64 { DEFAULT_TREND_THRESHOLD }

impl Condition {
    /// Stable kind tag, also used as the alert type.
    pub fn kind(&self) -> &'static str {
        match self {
            Condition::GreaterThan { .. } => "greater_than",
            Condition::LessThan { .. } => "less_than",
            Condition::Equals { .. } => "equals",
            Condition::Between { .. } => "between",
            Condition::OutsideRange { .. } => "outside_range",
            Condition::RateOfChange { .. } => "rate_of_change",
            Condition::DynamicThreshold { .. } => "dynamic_threshold",
            Condition::StatisticalAnomaly { .. } => "statistical_anomaly",
            Condition::SeasonalAnomaly { .. } => "seasonal_anomaly",
            Condition::TrendDetection { .. } => "trend_detection",
            Condition::Pattern => "pattern",
        }
    }
}

/// Rule attached to one provisioned sensor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorRule {
    pub id: RuleId,
    pub device_sensor_id: SensorId,
    pub condition: Condition,
    pub severity: Severity,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Flat rule row as kept by the relational store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorRuleRow {
    pub id: RuleId,
    pub device_sensor_id: SensorId,
    pub condition_kind: String,
    #[serde(default)]
    pub threshold_min: Option<f64>,
    #[serde(default)]
    pub threshold_max: Option<f64>,
    pub severity: Severity,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Minutes for rate/trend rules, days for history-based rules
    #[serde(default)]
    pub time_window: Option<u32>,
    #[serde(default)]
    pub sensitivity: Option<f64>,
    #[serde(default)]
    pub trend_type: Option<TrendType>,
}

/// Row conversion errors
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RowError {
    #[error("Rule {rule}: unknown condition kind '{kind}'")]
    UnknownKind { rule: RuleId, kind: String },

    #[error("Rule {rule}: {kind} requires {field}")]
    MissingParameter {
        rule: RuleId,
        kind: &'static str,
        field: &'static str,
    },

    #[error("Rule {rule}: {kind} time_window {value} exceeds {max}")]
    WindowOutOfRange {
        rule: RuleId,
        kind: &'static str,
        value: u32,
        max: u32,
    },
}

impl TryFrom<SensorRuleRow> for SensorRule {
    type Error = RowError;

    fn try_from(row: SensorRuleRow) -> Result<Self, Self::Error> {
        let rule = row.id;
        let missing = |kind: &'static str, field: &'static str| RowError::MissingParameter {
            rule,
            kind,
            field,
        };
        let window = |kind: &'static str, default: u32, max: u32| match row.time_window {
            Some(value) if value > max => Err(RowError::WindowOutOfRange {
                rule,
                kind,
                value,
                max,
            }),
            value => Ok(value.unwrap_or(default)),
        };

        let condition = match row.condition_kind.trim().to_lowercase().as_str() {
            "greater_than" => Condition::GreaterThan {
                threshold: row
                    .threshold_max
                    .or(row.threshold_min)
                    .ok_or_else(|| missing("greater_than", "threshold_max"))?,
            },
            "less_than" => Condition::LessThan {
                threshold: row
                    .threshold_min
                    .or(row.threshold_max)
                    .ok_or_else(|| missing("less_than", "threshold_min"))?,
            },
            "equals" => Condition::Equals {
                target: row
                    .threshold_min
                    .or(row.threshold_max)
                    .ok_or_else(|| missing("equals", "threshold_min"))?,
            },
            "between" => Condition::Between {
                min: row.threshold_min.ok_or_else(|| missing("between", "threshold_min"))?,
                max: row.threshold_max.ok_or_else(|| missing("between", "threshold_max"))?,
            },
            "outside_range" => Condition::OutsideRange {
                min: row
                    .threshold_min
                    .ok_or_else(|| missing("outside_range", "threshold_min"))?,
                max: row
                    .threshold_max
                    .ok_or_else(|| missing("outside_range", "threshold_max"))?,
            },
            "rate_of_change" => Condition::RateOfChange {
                max_delta: row
                    .threshold_max
                    .ok_or_else(|| missing("rate_of_change", "threshold_max"))?,
                window_minutes: window("rate_of_change", DEFAULT_RATE_WINDOW_MINUTES, MAX_WINDOW_MINUTES)?,
            },
            "dynamic_threshold" => Condition::DynamicThreshold {
                window_days: window("dynamic_threshold", DEFAULT_HISTORY_WINDOW_DAYS, MAX_WINDOW_DAYS)?,
                fallback_min: row.threshold_min,
                fallback_max: row.threshold_max,
            },
            "statistical_anomaly" => Condition::StatisticalAnomaly {
                window_days: window("statistical_anomaly", DEFAULT_HISTORY_WINDOW_DAYS, MAX_WINDOW_DAYS)?,
                sensitivity: row.sensitivity.unwrap_or(DEFAULT_ANOMALY_SENSITIVITY),
            },
            "seasonal_anomaly" => Condition::SeasonalAnomaly {
                sensitivity: row.sensitivity.unwrap_or(DEFAULT_SEASONAL_SENSITIVITY),
            },
            "trend_detection" => Condition::TrendDetection {
                window_minutes: window("trend_detection", DEFAULT_TREND_WINDOW_MINUTES, MAX_WINDOW_MINUTES)?,
                trend: row.trend_type.unwrap_or_default(),
                threshold: row.threshold_max.unwrap_or(DEFAULT_TREND_THRESHOLD),
            },
            "pattern" => Condition::Pattern,
            other => {
                return Err(RowError::UnknownKind {
                    rule,
                    kind: other.to_string(),
                })
            }
        };

        Ok(SensorRule {
            id: row.id,
            device_sensor_id: row.device_sensor_id,
            condition,
            severity: row.severity,
            enabled: row.enabled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(kind: &str) -> SensorRuleRow {
        SensorRuleRow {
            id: 7,
            device_sensor_id: 3,
            condition_kind: kind.to_string(),
            threshold_min: None,
            threshold_max: None,
            severity: Severity::Warning,
            enabled: true,
            time_window: None,
            sensitivity: None,
            trend_type: None,
        }
    }

    #[test]
    fn between_row_needs_both_bounds() {
        let mut r = row("between");
        r.threshold_min = Some(18.0);
        assert_eq!(
            SensorRule::try_from(r.clone()).unwrap_err(),
            RowError::MissingParameter {
                rule: 7,
                kind: "between",
                field: "threshold_max"
            }
        );

        r.threshold_max = Some(25.0);
        let rule = SensorRule::try_from(r).unwrap();
        assert_eq!(rule.condition, Condition::Between { min: 18.0, max: 25.0 });
    }

    #[test]
    fn anomaly_rows_take_defaults() {
        let rule = SensorRule::try_from(row("statistical_anomaly")).unwrap();
        assert_eq!(
            rule.condition,
            Condition::StatisticalAnomaly {
                window_days: 7,
                sensitivity: 3.0
            }
        );

        let rule = SensorRule::try_from(row("Seasonal_Anomaly")).unwrap();
        assert_eq!(rule.condition, Condition::SeasonalAnomaly { sensitivity: 2.5 });

        let rule = SensorRule::try_from(row("trend_detection")).unwrap();
        assert_eq!(
            rule.condition,
            Condition::TrendDetection {
                window_minutes: 60,
                trend: TrendType::AnyChange,
                threshold: 0.1
            }
        );
    }

    #[test]
    fn oversized_windows_are_rejected() {
        let mut r = row("statistical_anomaly");
        r.time_window = Some(u32::MAX);
        assert_eq!(
            SensorRule::try_from(r.clone()).unwrap_err(),
            RowError::WindowOutOfRange {
                rule: 7,
                kind: "statistical_anomaly",
                value: u32::MAX,
                max: MAX_WINDOW_DAYS
            }
        );

        r.time_window = Some(MAX_WINDOW_DAYS);
        assert!(SensorRule::try_from(r).is_ok());

        // Minute windows get the larger bound
        let mut r = row("trend_detection");
        r.time_window = Some(MAX_WINDOW_DAYS + 1);
        assert!(SensorRule::try_from(r.clone()).is_ok());
        r.time_window = Some(MAX_WINDOW_MINUTES + 1);
        assert!(matches!(
            SensorRule::try_from(r),
            Err(RowError::WindowOutOfRange { kind: "trend_detection", .. })
        ));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(matches!(
            SensorRule::try_from(row("vibes")),
            Err(RowError::UnknownKind { .. })
        ));
    }

    #[test]
    fn pattern_survives_conversion() {
        let rule = SensorRule::try_from(row("pattern")).unwrap();
        assert_eq!(rule.condition.kind(), "pattern");
    }

    #[test]
    fn typed_condition_parses_from_tagged_toml() {
        let rule: SensorRule = toml::from_str(
            r#"
            id = 1
            device_sensor_id = 2
            severity = "critical"
            [condition]
            kind = "rate_of_change"
            max_delta = 4.0
            "#,
        )
        .unwrap();
        assert_eq!(
            rule.condition,
            Condition::RateOfChange {
                max_delta: 4.0,
                window_minutes: 5
            }
        );
        assert!(rule.enabled);
    }
}
