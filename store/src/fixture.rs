//! Fleet fixtures
//!
//! TOML description of devices, sensors and rules used to seed a
//! [`MemoryStore`]. Rules are given in the flat row form so fixtures can be
//! exported straight from the relational tables.
//!
//! ```toml
//! [[devices]]
//! id = 1
//! name = "greenhouse"
//! location_id = 4
//!
//! [[sensors]]
//! id = 10
//! device_id = 1
//! pin = "D4"
//! sensor_type = "temperature"
//! name = "dht22"
//!
//! [[rules]]
//! id = 100
//! device_sensor_id = 10
//! condition_kind = "between"
//! threshold_min = 10.0
//! threshold_max = 30.0
//! severity = "high"
//!
//! [[escalation_rules]]
//! id = 1
//! severity_match = "all"
//! escalation_delay_minutes = 5
//! max_escalation_level = 3
//! notification_methods = ["email", "sms"]
//! ```

use crate::{
    Device, DeviceSensor, EscalationRule, MemoryStore, Result, SensorRule, SensorRuleRow,
    SilentWindow, StoreError,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetFixture {
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub sensors: Vec<DeviceSensor>,
    #[serde(default)]
    pub rules: Vec<SensorRuleRow>,
    #[serde(default)]
    pub escalation_rules: Vec<EscalationRule>,
    #[serde(default)]
    pub silent_windows: Vec<SilentWindow>,
}

impl FleetFixture {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let fixture = Self::parse(&content)?;
        tracing::info!(
            "Loaded fleet fixture {:?}: {} devices, {} sensors, {} rules",
            path,
            fixture.devices.len(),
            fixture.sensors.len(),
            fixture.rules.len()
        );
        Ok(fixture)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Insert everything into `store`. Rule rows are validated first so a
    /// broken fixture seeds nothing.
    pub fn seed(self, store: &MemoryStore) -> Result<()> {
        let rules = self
            .rules
            .into_iter()
            .map(SensorRule::try_from)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Invalid(e.to_string()))?;

        for device in self.devices {
            store.add_device(device)?;
        }
        for sensor in self.sensors {
            store.add_sensor(sensor)?;
        }
        for rule in rules {
            store.add_rule(rule)?;
        }
        for rule in self.escalation_rules {
            store.add_escalation_rule(rule)?;
        }
        for window in self.silent_windows {
            store.add_silent_window(window)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Condition, EscalationScope, SensorType, SystemClock, TelemetryStore};
    use std::sync::Arc;

    const FLEET: &str = r#"
[[devices]]
id = 1
name = "greenhouse"
location_id = 4

[[sensors]]
id = 10
device_id = 1
pin = "D4"
sensor_type = "temperature"
name = "dht22"
auto_calibrate = true

[[rules]]
id = 100
device_sensor_id = 10
condition_kind = "between"
threshold_min = 10.0
threshold_max = 30.0
severity = "high"

[[rules]]
id = 101
device_sensor_id = 10
condition_kind = "statistical_anomaly"
severity = "warning"
sensitivity = 2.0

[[escalation_rules]]
id = 1
severity_match = "all"
scope = { location = 4 }
escalation_delay_minutes = 5
max_escalation_level = 3
notification_methods = ["email", "telegram"]
"#;

    #[tokio::test]
    async fn fixture_seeds_store() {
        let fixture = FleetFixture::parse(FLEET).unwrap();
        assert_eq!(fixture.escalation_rules[0].scope, EscalationScope::Location(4));

        let store = MemoryStore::new(Arc::new(SystemClock));
        fixture.seed(&store).unwrap();

        let sensor = store.sensor(10).await.unwrap().unwrap();
        assert!(sensor.auto_calibrate);
        assert_eq!(sensor.calibration_multiplier, 1.0);

        let rules = store
            .enabled_rules(1, "D4", SensorType::Temperature)
            .await
            .unwrap();
        assert_eq!(rules.len(), 2);
        assert!(rules
            .iter()
            .any(|r| r.condition == Condition::Between { min: 10.0, max: 30.0 }));
    }

    #[test]
    fn broken_rule_row_is_rejected() {
        let fixture = FleetFixture::parse(
            r#"
[[devices]]
id = 1
name = "shed"

[[sensors]]
id = 10
device_id = 1
pin = "A0"
sensor_type = "humidity"
name = "soil"

[[rules]]
id = 5
device_sensor_id = 10
condition_kind = "between"
threshold_min = 10.0
severity = "low"
"#,
        )
        .unwrap();

        let store = MemoryStore::new(Arc::new(SystemClock));
        let err = fixture.seed(&store).unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
        assert!(tokio_test::block_on(store.device(1)).unwrap().is_none());
    }
}
