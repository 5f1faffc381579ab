//! Store bootstrap shared by the daemon and the CLI

use crate::config::AppConfig;
use anyhow::{Context, Result};
use fieldwatch_sensors::IncomingReading;
use fieldwatch_store::{Clock, DeviceId, FleetFixture, MemoryStore, Reading, ReadingJournal};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// One line of ingest input: a batch of readings from a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestBatch {
    pub device_id: DeviceId,
    pub readings: Vec<IncomingReading>,
}

/// Store seeded from the fleet fixture only.
pub fn seeded_store(config: &AppConfig, clock: Arc<dyn Clock>) -> Result<MemoryStore> {
    let store = MemoryStore::new(clock);
    let fleet_file = Path::new(&config.fleet_file);

    if fleet_file.exists() {
        FleetFixture::load(fleet_file)
            .and_then(|fixture| fixture.seed(&store))
            .with_context(|| format!("loading fleet fixture {:?}", fleet_file))?;
    } else {
        tracing::warn!("Fleet file {:?} not found, starting with an empty fleet", fleet_file);
    }

    Ok(store)
}

/// Readings recorded in the journal so far, oldest first.
pub fn journal_readings(config: &AppConfig) -> Result<Vec<Reading>> {
    let path = config.journal_path();
    let mut readings = ReadingJournal::load(&path)
        .with_context(|| format!("reading journal {:?}", path))?;
    readings.sort_by_key(|r| (r.timestamp, r.id));
    Ok(readings)
}

/// Fixture plus replayed journal history. With `record`, new readings are
/// appended to the journal as they are stored.
pub fn open_store(config: &AppConfig, clock: Arc<dyn Clock>, record: bool) -> Result<Arc<MemoryStore>> {
    let store = seeded_store(config, clock)?;

    let history = journal_readings(config)?;
    let restored = history.len();
    store.restore_readings(history)?;

    let store = if record {
        let journal = ReadingJournal::open(&config.journal_path())?;
        tracing::info!("Recording readings to {:?}", journal.path());
        store.with_journal(journal)
    } else {
        store
    };

    tracing::info!(
        devices = store.devices()?.len(),
        readings = restored,
        "Store ready"
    );

    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldwatch_store::{NewReading, SystemClock, TelemetryStore};
    use std::collections::HashMap;

    const FLEET: &str = r#"
        [[devices]]
        id = 1
        name = "greenhouse"

        [[sensors]]
        id = 10
        device_id = 1
        pin = "D4"
        sensor_type = "temperature"
        name = "dht22"
    "#;

    fn config(dir: &Path) -> AppConfig {
        let fleet_file = dir.join("fleet.toml");
        std::fs::write(&fleet_file, FLEET).unwrap();
        AppConfig {
            data_directory: dir.join("data").display().to_string(),
            fleet_file: fleet_file.display().to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn ingest_batch_accepts_type_tag() {
        let batch: IngestBatch = serde_json::from_str(
            r#"{"device_id": 3, "readings": [{"pin": "A0", "type": "humidity", "raw_value": 41.5}]}"#,
        )
        .unwrap();
        assert_eq!(batch.device_id, 3);
        assert_eq!(batch.readings[0].sensor_type, "humidity");
        assert_eq!(batch.readings[0].raw_value, Some(41.5));
    }

    #[test]
    fn missing_fleet_file_gives_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            fleet_file: dir.path().join("absent.toml").display().to_string(),
            data_directory: dir.path().display().to_string(),
            ..Default::default()
        };
        let store = seeded_store(&config, Arc::new(SystemClock)).unwrap();
        assert!(store.devices().unwrap().is_empty());
    }

    #[test]
    fn recorded_readings_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());

        {
            let store = open_store(&config, Arc::new(SystemClock), true).unwrap();
            for value in [20.5, 21.0] {
                tokio_test::block_on(store.insert_reading(NewReading {
                    device_id: 1,
                    pin: "D4".to_string(),
                    sensor_type: "temperature".to_string(),
                    raw_value: value,
                    processed_value: value,
                    timestamp: chrono::Utc::now(),
                    metadata: HashMap::new(),
                }))
                .unwrap();
            }
        }

        let reopened = open_store(&config, Arc::new(SystemClock), false).unwrap();
        assert_eq!(reopened.reading_count().unwrap(), 2);
        assert_eq!(reopened.devices().unwrap()[0].name, "greenhouse");
        assert_eq!(journal_readings(&config).unwrap().len(), 2);
    }
}
