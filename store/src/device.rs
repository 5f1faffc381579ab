//! Devices and provisioned sensors

use crate::{CalibrationResult, DeviceId, LocationId, SensorId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Field device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    #[serde(default)]
    pub location_id: Option<LocationId>,
    #[serde(default)]
    pub status: DeviceStatus,
}

/// Device status indicator
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    #[default]
    Online,
    Offline,
    /// At least one rule produced an alert
    Alarm,
}

/// Sensor types the platform knows how to provision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Temperature,
    Humidity,
    Pressure,
    Light,
    Motion,
    AirQuality,
    Noise,
    Distance,
    Magnetic,
    Vibration,
}

impl SensorType {
    /// Parse a declared type tag, case-insensitively.
    ///
    /// Returns `None` for tags that cannot be auto-provisioned.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim().to_lowercase();
        let sensor_type = match tag.as_str() {
            "temperature" | "temp" => SensorType::Temperature,
            "humidity" => SensorType::Humidity,
            "pressure" | "barometer" => SensorType::Pressure,
            "light" | "lux" => SensorType::Light,
            "motion" | "pir" => SensorType::Motion,
            "air_quality" | "co2" | "gas" => SensorType::AirQuality,
            "noise" | "sound" => SensorType::Noise,
            "distance" | "ultrasonic" => SensorType::Distance,
            "magnetic" | "reed" => SensorType::Magnetic,
            "vibration" => SensorType::Vibration,
            _ => return None,
        };
        Some(sensor_type)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorType::Temperature => "temperature",
            SensorType::Humidity => "humidity",
            SensorType::Pressure => "pressure",
            SensorType::Light => "light",
            SensorType::Motion => "motion",
            SensorType::AirQuality => "air_quality",
            SensorType::Noise => "noise",
            SensorType::Distance => "distance",
            SensorType::Magnetic => "magnetic",
            SensorType::Vibration => "vibration",
        }
    }

    /// Sensors whose normal range follows the time of day.
    pub fn is_light_like(&self) -> bool {
        matches!(self, SensorType::Light)
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sensor provisioned on a device pin
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSensor {
    pub id: SensorId,
    pub device_id: DeviceId,
    pub pin: String,
    pub sensor_type: SensorType,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Opted in to scheduled threshold calibration
    #[serde(default)]
    pub auto_calibrate: bool,
    #[serde(default)]
    pub calibration_offset: f64,
    #[serde(default = "default_multiplier")]
    pub calibration_multiplier: f64,
    #[serde(default)]
    pub threshold_min: Option<f64>,
    #[serde(default)]
    pub threshold_max: Option<f64>,
    #[serde(default)]
    pub calibration: Option<CalibrationResult>,
}

fn default_true() -> bool {
    true
}

fn default_multiplier() -> f64 {
    1.0
}

impl DeviceSensor {
    /// Scale a raw value by this sensor's calibration.
    pub fn apply_calibration(&self, raw: f64) -> f64 {
        raw * self.calibration_multiplier + self.calibration_offset
    }
}

/// Sensor row to provision
#[derive(Debug, Clone)]
pub struct NewSensor {
    pub device_id: DeviceId,
    pub pin: String,
    pub sensor_type: SensorType,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_type_tags_are_case_insensitive() {
        assert_eq!(SensorType::from_tag("Temperature"), Some(SensorType::Temperature));
        assert_eq!(SensorType::from_tag(" CO2 "), Some(SensorType::AirQuality));
        assert_eq!(SensorType::from_tag("sound"), Some(SensorType::Noise));
        assert_eq!(SensorType::from_tag("ectoplasm"), None);
    }

    #[test]
    fn calibration_scales_then_offsets() {
        let sensor = DeviceSensor {
            id: 1,
            device_id: 1,
            pin: "A0".to_string(),
            sensor_type: SensorType::Light,
            name: "ldr".to_string(),
            enabled: true,
            auto_calibrate: false,
            calibration_offset: -5.0,
            calibration_multiplier: 2.0,
            threshold_min: None,
            threshold_max: None,
            calibration: None,
        };
        assert_eq!(sensor.apply_calibration(10.0), 15.0);
    }
}
