//! FieldWatch Alerting Core
//!
//! Turns sensor readings into alerts and alerts into escalating
//! notifications. Statistics and threshold recommendation are pure; the
//! evaluator, calibration service and escalation engine talk to storage only
//! through [`fieldwatch_store::TelemetryStore`].
//!
//! Data flow: reading batch → [`RuleEvaluator`] → alert → [`EscalationEngine`]
//! → [`NotificationDispatcher`] → channel senders.

pub mod cache;
pub mod calibration;
pub mod conditions;
pub mod escalation;
pub mod evaluator;
pub mod notify;
pub mod reporting;
pub mod stats;
pub mod thresholds;

pub use cache::TtlCache;
pub use calibration::{CalibrationConfig, CalibrationOptions, CalibrationReport, CalibrationService};
pub use conditions::Outcome;
pub use escalation::{EscalationConfig, EscalationEngine, InFlight, InFlightPermit, TickReport};
pub use evaluator::{BatchOutcome, EvaluatorConfig, IncomingReading, RuleEvaluator};
pub use notify::{
    ChannelError, DispatchReport, LoggingChannel, Notification, NotificationChannel,
    NotificationDispatcher,
};
pub use reporting::{DeviceStats, ReportingService, SensorSummary, TimeRange};
pub use stats::{statistics, z_score, Statistics};
pub use thresholds::{ThresholdRecommendation, ThresholdSuggestion};

use fieldwatch_store::{DeviceId, SensorId, StoreError};
use serde::{Deserialize, Serialize};

/// Result of an analysis that needs a minimum amount of history.
///
/// Not having enough data is an answer in its own right, never a zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Assessed<T> {
    Ready(T),
    InsufficientData { required: usize, available: usize },
}

impl<T> Assessed<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Assessed::Ready(value) => Some(value),
            Assessed::InsufficientData { .. } => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Assessed::Ready(_))
    }
}

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceId),

    #[error("Sensor {sensor_id} not found on device {device_id}")]
    SensorNotFound { device_id: DeviceId, sensor_id: SensorId },

    #[error("Invalid reading: {0}")]
    InvalidReading(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Calibration failed: {0}")]
    Calibration(String),
}

pub type Result<T> = std::result::Result<T, SensorError>;
