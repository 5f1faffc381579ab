//! Tracing setup shared by both binaries

use crate::config::AppConfig;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const DAEMON_FILTER: &str = "info,fieldwatch=debug,fieldwatch_store=debug,fieldwatch_sensors=debug";
pub const CLI_FILTER: &str = "warn";

/// `RUST_LOG` wins, then the configured `log_filter`, then `fallback`.
pub fn filter(config: &AppConfig, fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directives = config.log_filter.as_deref().unwrap_or(fallback);
        EnvFilter::try_new(directives).unwrap_or_else(|e| {
            eprintln!("Ignoring invalid log_filter {:?}: {}", directives, e);
            EnvFilter::new(fallback)
        })
    })
}

pub fn init(config: &AppConfig, fallback: &str, writer: BoxMakeWriter) {
    let registry = tracing_subscriber::registry().with(filter(config, fallback));

    if config.log_json {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(writer))
            .init();
    } else {
        registry
            .with(fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_writer(writer))
            .init();
    }
}
