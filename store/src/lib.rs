//! FieldWatch Storage Layer
//!
//! Domain records and the storage interfaces the alerting core talks to.
//! The relational store, the suppression source and the wall clock are all
//! external collaborators; this crate defines their shape and ships an
//! in-memory implementation used by the daemon, the CLI and the tests.
//!
//! # Modules
//!
//! - [`device`] - devices, provisioned sensors and recognised sensor types
//! - [`reading`] - immutable readings, range queries and aggregation buckets
//! - [`rule`] - per-sensor rules and the flat row form they are stored in
//! - [`alert`] - alert records and their lifecycle
//! - [`escalation`] - escalation rules, scope precedence and gating
//! - [`calibration`] - derived calibration results
//! - [`repository`] - the [`TelemetryStore`] and [`SuppressionCheck`] traits
//! - [`memory`] - [`MemoryStore`], the in-process reference store
//! - [`journal`] - append-only JSONL journal of readings
//! - [`fixture`] - fleet fixture files used to seed a store
//! - [`clock`] - injectable time source
//!
//! # Example
//!
//! ```rust,no_run
//! use fieldwatch_store::{MemoryStore, SystemClock, TelemetryStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryStore::new(Arc::new(SystemClock));
//!     let alerts = store.active_alerts(None).await.unwrap();
//!     println!("{} active alerts", alerts.len());
//! }
//! ```

pub mod alert;
pub mod calibration;
pub mod clock;
pub mod device;
pub mod escalation;
pub mod fixture;
pub mod journal;
pub mod memory;
pub mod reading;
pub mod repository;
pub mod rule;

// Re-exports for convenience
pub use alert::{Alert, AlertInsert, AlertStatus, NewAlert};
pub use calibration::{Band, CalibrationMethod, CalibrationResult, Confidence};
pub use clock::{Clock, ManualClock, SystemClock};
pub use device::{Device, DeviceSensor, DeviceStatus, NewSensor, SensorType};
pub use escalation::{
    EscalationCandidate, EscalationRule, EscalationScope, NotificationMethod, Recipient,
    SeverityMatch,
};
pub use fixture::FleetFixture;
pub use journal::ReadingJournal;
pub use memory::{MemoryStore, SilentWindow};
pub use reading::{AggregatePoint, Granularity, NewReading, Reading, ReadingQuery};
pub use repository::{SuppressionCheck, TelemetryStore};
pub use rule::{Condition, RowError, SensorRule, SensorRuleRow, Severity, TrendType};

pub type DeviceId = i64;
pub type LocationId = i64;
pub type SensorId = i64;
pub type RuleId = i64;
pub type AlertId = i64;

/// Storage error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid record: {0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Fixture parse error: {0}")]
    Fixture(#[from] toml::de::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
