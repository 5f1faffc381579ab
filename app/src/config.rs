//! Application configuration

use fieldwatch_sensors::{
    calibration::CalibrationOptions, CalibrationConfig, EscalationConfig, EvaluatorConfig,
    NotificationDispatcher,
};
use fieldwatch_store::NotificationMethod;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the reading journal inside the data directory
pub const JOURNAL_FILE: &str = "readings.jsonl";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration in {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("cannot render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding the reading journal
    #[serde(default = "default_data_dir")]
    pub data_directory: String,

    /// Devices, sensors and rules to load at startup
    #[serde(default = "default_fleet_file")]
    pub fleet_file: String,

    /// Append every stored reading to the journal
    #[serde(default = "default_true")]
    pub journal_readings: bool,

    /// Escalation scheduler period in seconds
    #[serde(default = "default_escalation_interval")]
    pub escalation_interval_secs: u64,

    /// How long rule sets are cached
    #[serde(default = "default_rule_cache_ttl")]
    pub rule_cache_ttl_secs: u64,

    /// Window in which repeat violations fold into the open alert
    #[serde(default = "default_dedup_window")]
    pub dedup_window_secs: u64,

    /// How long calibration results are cached
    #[serde(default = "default_calibration_cache_ttl")]
    pub calibration_cache_ttl_secs: u64,

    /// Recalibrate all sensors this often; 0 disables the job
    #[serde(default = "default_calibration_interval")]
    pub calibration_interval_hours: u64,

    /// Per-channel delivery timeout
    #[serde(default = "default_notification_timeout")]
    pub notification_timeout_secs: u64,

    /// Channels the daemon registers
    #[serde(default = "default_notification_methods")]
    pub notification_methods: Vec<NotificationMethod>,

    /// Tracing filter used when RUST_LOG is unset
    #[serde(default)]
    pub log_filter: Option<String>,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    #[serde(default)]
    pub calibration: CalibrationOptions,

    /// Path to config file (for reference)
    #[serde(skip)]
    pub config_path: PathBuf,
}

fn default_data_dir() -> String { "/var/lib/fieldwatch".to_string() }
fn default_fleet_file() -> String { "/etc/fieldwatch/fleet.toml".to_string() }
fn default_true() -> bool { true }
fn default_escalation_interval() -> u64 { 60 }
fn default_rule_cache_ttl() -> u64 { 300 }
fn default_dedup_window() -> u64 { 300 }
fn default_calibration_cache_ttl() -> u64 { 3600 }
fn default_calibration_interval() -> u64 { 24 }
fn default_notification_timeout() -> u64 { 10 }
fn default_notification_methods() -> Vec<NotificationMethod> {
    vec![
        NotificationMethod::Email,
        NotificationMethod::Sms,
        NotificationMethod::Chat,
        NotificationMethod::Push,
        NotificationMethod::Webhook,
    ]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_directory: default_data_dir(),
            fleet_file: default_fleet_file(),
            journal_readings: true,
            escalation_interval_secs: default_escalation_interval(),
            rule_cache_ttl_secs: default_rule_cache_ttl(),
            dedup_window_secs: default_dedup_window(),
            calibration_cache_ttl_secs: default_calibration_cache_ttl(),
            calibration_interval_hours: default_calibration_interval(),
            notification_timeout_secs: default_notification_timeout(),
            notification_methods: default_notification_methods(),
            log_filter: None,
            log_json: false,
            calibration: CalibrationOptions::default(),
            config_path: PathBuf::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from standard paths
    pub fn load() -> Result<Self, ConfigError> {
        let mut config_paths = vec![PathBuf::from("/etc/fieldwatch/config.toml")];
        if let Some(dir) = dirs::config_dir() {
            config_paths.push(dir.join("fieldwatch/config.toml"));
        }
        config_paths.push(PathBuf::from("./config.toml"));

        for path in &config_paths {
            if path.exists() {
                return Self::load_from(path);
            }
        }

        tracing::warn!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: AppConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.config_path = path.to_path_buf();
        Ok(config)
    }

    /// Explicit path wins over the search path.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load_from(path),
            None => Self::load(),
        }
    }

    pub fn journal_path(&self) -> PathBuf {
        Path::new(&self.data_directory).join(JOURNAL_FILE)
    }

    pub fn evaluator_config(&self) -> EvaluatorConfig {
        EvaluatorConfig {
            rule_cache_ttl: seconds(self.rule_cache_ttl_secs),
            dedup_window: seconds(self.dedup_window_secs),
        }
    }

    pub fn escalation_config(&self) -> EscalationConfig {
        EscalationConfig {
            // A zero period would make tokio's interval panic
            interval: Duration::from_secs(self.escalation_interval_secs.max(1)),
        }
    }

    pub fn calibration_config(&self) -> CalibrationConfig {
        CalibrationConfig {
            cache_ttl: seconds(self.calibration_cache_ttl_secs),
            options: self.calibration.clone(),
        }
    }

    pub fn calibration_interval(&self) -> Option<Duration> {
        (self.calibration_interval_hours > 0)
            .then(|| Duration::from_secs(self.calibration_interval_hours.saturating_mul(3600)))
    }

    /// Dispatcher with a logging channel per configured method
    pub fn dispatcher(&self) -> NotificationDispatcher {
        NotificationDispatcher::logging(
            &self.notification_methods,
            Duration::from_secs(self.notification_timeout_secs),
        )
    }

    /// Generate example configuration
    pub fn example() -> Result<String, ConfigError> {
        let config = Self {
            data_directory: "/var/lib/fieldwatch".to_string(),
            fleet_file: "/etc/fieldwatch/fleet.toml".to_string(),
            log_filter: Some("info,fieldwatch_sensors=debug".to_string()),
            ..Default::default()
        };

        let body = toml::to_string_pretty(&config)?;
        Ok(format!(
            "# FieldWatch Configuration File\n#\n\
             # Copy this file to /etc/fieldwatch/config.toml or ~/.config/fieldwatch/config.toml\n\n{}",
            body
        ))
    }
}

fn seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::from_std(Duration::from_secs(secs))
        .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
}

/// Helper for getting config directories
mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}
