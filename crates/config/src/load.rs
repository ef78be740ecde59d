//! Config loading helpers (env + file + overrides).
//!
//! The loader is responsible for deterministic merge order and surfacing
//! user-facing errors as typed `ErrorEnvelope`s.

use crate::{
    LogFormat, LogLevelSetting, OutboxProvider, ReindexConfig, ReindexEnv,
    ValidatedReindexConfig, apply_env_overrides,
};
use reindex_shared::{ErrorClass, ErrorCode, ErrorEnvelope};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Json,
    Toml,
}

/// Load the reindex config from sources using a deterministic precedence order.
///
/// Precedence (highest wins):
/// - env overrides (`ReindexEnv`)
/// - overrides JSON (partial config)
/// - config JSON (file content)
/// - defaults (`ReindexConfig::default()`)
pub fn load_reindex_config_from_sources(
    config_json: Option<&str>,
    overrides_json: Option<&str>,
    env: &ReindexEnv,
) -> Result<ValidatedReindexConfig, ErrorEnvelope> {
    let config = match config_json {
        None => ReindexConfig::default(),
        Some(input) => parse_config_unvalidated(input, ConfigFormat::Json)?,
    };
    finish(config, overrides_json, env)
}

/// Load the reindex config from an optional file path (`.json` or `.toml`).
pub fn load_reindex_config_from_path(
    config_path: Option<&Path>,
    overrides_json: Option<&str>,
    env: &ReindexEnv,
) -> Result<ValidatedReindexConfig, ErrorEnvelope> {
    let config = match config_path {
        None => ReindexConfig::default(),
        Some(path) => {
            let format = detect_config_format(path)?;
            let config_text = read_config_file(path)?;
            parse_config_unvalidated(&config_text, format)?
        },
    };
    finish(config, overrides_json, env)
}

/// Load the reindex config from std env and an optional file path.
pub fn load_reindex_config_std_env(
    config_path: Option<&Path>,
    overrides_json: Option<&str>,
) -> Result<ValidatedReindexConfig, ErrorEnvelope> {
    let env = ReindexEnv::from_std_env().map_err(ErrorEnvelope::from)?;
    load_reindex_config_from_path(config_path, overrides_json, &env)
}

/// Serialize the config as deterministic pretty JSON (with trailing newline).
pub fn to_pretty_json(config: &ReindexConfig) -> Result<String, ErrorEnvelope> {
    let mut output = serde_json::to_string_pretty(config).map_err(|error| {
        ErrorEnvelope::unexpected(
            ErrorCode::internal(),
            format!("failed to serialize config: {error}"),
            ErrorClass::NonRetriable,
        )
    })?;
    output.push('\n');
    Ok(output)
}

/// Serialize the config as deterministic pretty TOML (with trailing newline).
pub fn to_pretty_toml(config: &ReindexConfig) -> Result<String, ErrorEnvelope> {
    let mut output = toml::to_string_pretty(config).map_err(|error| {
        ErrorEnvelope::unexpected(
            ErrorCode::new("config", "serialize_toml"),
            format!("failed to serialize config TOML: {error}"),
            ErrorClass::NonRetriable,
        )
    })?;
    output.push('\n');
    Ok(output)
}

fn finish(
    mut config: ReindexConfig,
    overrides_json: Option<&str>,
    env: &ReindexEnv,
) -> Result<ValidatedReindexConfig, ErrorEnvelope> {
    if let Some(input) = overrides_json {
        let overrides = parse_overrides_json(input)?;
        overrides.apply(&mut config);
    }

    // env is applied last and also validates/normalizes the resulting config.
    apply_env_overrides(config, env)
}

fn parse_config_unvalidated(
    input: &str,
    format: ConfigFormat,
) -> Result<ReindexConfig, ErrorEnvelope> {
    match format {
        ConfigFormat::Json => serde_json::from_str(input).map_err(|error| {
            ErrorEnvelope::expected(
                ErrorCode::new("config", "invalid_json"),
                format!("invalid config JSON: {error}"),
            )
            .with_metadata("source", "config")
        }),
        ConfigFormat::Toml => toml::from_str(input).map_err(|error| {
            ErrorEnvelope::expected(
                ErrorCode::new("config", "invalid_toml"),
                format!("invalid config TOML: {error}"),
            )
            .with_metadata("source", "config")
        }),
    }
}

fn parse_overrides_json(input: &str) -> Result<ReindexConfigOverrides, ErrorEnvelope> {
    serde_json::from_str(input).map_err(|error| {
        ErrorEnvelope::expected(
            ErrorCode::new("config", "invalid_json"),
            format!("invalid overrides JSON: {error}"),
        )
        .with_metadata("source", "overrides")
    })
}

fn read_config_file(path: &Path) -> Result<String, ErrorEnvelope> {
    std::fs::read_to_string(path).map_err(|error| {
        let code = match error.kind() {
            std::io::ErrorKind::NotFound => ErrorCode::new("config", "config_file_not_found"),
            std::io::ErrorKind::PermissionDenied => {
                ErrorCode::new("config", "config_file_permission_denied")
            },
            _ => ErrorCode::new("config", "config_file_io"),
        };

        ErrorEnvelope::expected(code, format!("failed to read config file: {error}"))
            .with_metadata("path", path.to_string_lossy().to_string())
    })
}

fn detect_config_format(path: &Path) -> Result<ConfigFormat, ErrorEnvelope> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        None | Some("json") => Ok(ConfigFormat::Json),
        Some("toml") => Ok(ConfigFormat::Toml),
        Some(other) => Err(ErrorEnvelope::expected(
            ErrorCode::new("config", "unsupported_format"),
            "unsupported config format; use .json or .toml",
        )
        .with_metadata("extension", other.to_owned())),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
struct ReindexConfigOverrides {
    version: Option<u32>,
    scheduler: SchedulerConfigOverrides,
    retry: RetryConfigOverrides,
    outbox: OutboxConfigOverrides,
    logging: LoggingConfigOverrides,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
struct SchedulerConfigOverrides {
    worker_concurrency: Option<u32>,
    wait_timeout_ms: Option<u64>,
    failed_queue_capacity: Option<u32>,
    cancel_data_on_delete: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
struct RetryConfigOverrides {
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    jitter_ratio_pct: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
struct OutboxConfigOverrides {
    provider: Option<OutboxProvider>,
    sqlite_path: Option<Box<str>>,
    purge_completed: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
struct LoggingConfigOverrides {
    min_level: Option<LogLevelSetting>,
    format: Option<LogFormat>,
}

impl ReindexConfigOverrides {
    fn apply(self, config: &mut ReindexConfig) {
        override_with(&mut config.version, self.version);

        let scheduler = &mut config.scheduler;
        override_with(&mut scheduler.worker_concurrency, self.scheduler.worker_concurrency);
        override_with(&mut scheduler.wait_timeout_ms, self.scheduler.wait_timeout_ms);
        override_with(
            &mut scheduler.failed_queue_capacity,
            self.scheduler.failed_queue_capacity,
        );
        override_with(
            &mut scheduler.cancel_data_on_delete,
            self.scheduler.cancel_data_on_delete,
        );

        let retry = &mut config.retry;
        override_with(&mut retry.max_attempts, self.retry.max_attempts);
        override_with(&mut retry.base_delay_ms, self.retry.base_delay_ms);
        override_with(&mut retry.max_delay_ms, self.retry.max_delay_ms);
        override_with(&mut retry.jitter_ratio_pct, self.retry.jitter_ratio_pct);

        override_with(&mut config.outbox.provider, self.outbox.provider);
        if self.outbox.sqlite_path.is_some() {
            config.outbox.sqlite_path = self.outbox.sqlite_path;
        }
        override_with(&mut config.outbox.purge_completed, self.outbox.purge_completed);

        override_with(&mut config.logging.min_level, self.logging.min_level);
        override_with(&mut config.logging.format, self.logging.format);
    }
}

fn override_with<T>(field: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *field = value;
    }
}
