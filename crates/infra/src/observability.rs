//! Tracing subscriber setup and structured logger construction.

use reindex_adapters::log_sink::LogSink;
use reindex_adapters::logger::JsonLogger;
use reindex_adapters::telemetry::JsonTelemetry;
use reindex_config::{LogFormat, LogLevelSetting, LoggingConfig};
use reindex_ports::{LogFields, LogLevel};
use reindex_shared::{ErrorCode, ErrorEnvelope};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::InfraResult;

/// Filter used when `RUST_LOG` is unset: the configured level for this
/// workspace's crates, warnings for dependencies.
pub fn default_filter(level: LogLevelSetting) -> String {
    let level = level.as_str();
    format!("warn,reindex_app={level},reindex_infra={level},reindex_adapters={level}")
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. Fails when a subscriber is
/// already installed.
pub fn init_tracing(config: &LoggingConfig) -> InfraResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(config.min_level)));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .try_init(),
    };
    installed.map_err(|error| {
        ErrorEnvelope::expected(
            ErrorCode::new("infra", "tracing_init"),
            format!("tracing subscriber already installed: {error}"),
        )
    })
}

/// Map the configured level onto the logger port level.
pub const fn log_level(level: LogLevelSetting) -> LogLevel {
    match level {
        LogLevelSetting::Debug => LogLevel::Debug,
        LogLevelSetting::Info => LogLevel::Info,
        LogLevelSetting::Warn => LogLevel::Warn,
        LogLevelSetting::Error => LogLevel::Error,
    }
}

/// JSON logger and telemetry sharing one sink.
pub fn json_observability(
    config: &LoggingConfig,
    sink: Arc<dyn LogSink>,
) -> (Arc<JsonLogger>, Arc<JsonTelemetry>) {
    let mut fields = LogFields::new();
    fields.insert("component".into(), "reindex".into());
    let logger = JsonLogger::new(Arc::clone(&sink))
        .with_base_fields(fields)
        .with_min_level(log_level(config.min_level));
    (Arc::new(logger), Arc::new(JsonTelemetry::new(sink)))
}
