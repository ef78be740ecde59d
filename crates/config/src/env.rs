//! Environment variable parsing and env-to-config merging.
//!
//! Env parsing is strict: a present but empty or malformed value fails
//! instead of falling back to the file/default value.

use crate::schema::{
    LogFormat, LogLevelSetting, OutboxProvider, ReindexConfig, ValidatedReindexConfig,
};
use reindex_shared::{ErrorCode, ErrorEnvelope, REDACTED, is_secret_key};
use std::collections::BTreeMap;
use std::fmt;

/// Env var: scheduler worker concurrency.
pub const ENV_WORKER_CONCURRENCY: &str = "REINDEX_WORKER_CONCURRENCY";
/// Env var: wait deadline in milliseconds.
pub const ENV_WAIT_TIMEOUT_MS: &str = "REINDEX_WAIT_TIMEOUT_MS";
/// Env var: failed queue capacity.
pub const ENV_FAILED_QUEUE_CAPACITY: &str = "REINDEX_FAILED_QUEUE_CAPACITY";
/// Env var: cancel queued DATA actions on type deletion.
pub const ENV_CANCEL_DATA_ON_DELETE: &str = "REINDEX_CANCEL_DATA_ON_DELETE";
/// Env var: retry max attempts.
pub const ENV_RETRY_MAX_ATTEMPTS: &str = "REINDEX_RETRY_MAX_ATTEMPTS";
/// Env var: retry base delay in ms.
pub const ENV_RETRY_BASE_DELAY_MS: &str = "REINDEX_RETRY_BASE_DELAY_MS";
/// Env var: retry max delay in ms.
pub const ENV_RETRY_MAX_DELAY_MS: &str = "REINDEX_RETRY_MAX_DELAY_MS";
/// Env var: retry jitter ratio percent.
pub const ENV_RETRY_JITTER_RATIO_PCT: &str = "REINDEX_RETRY_JITTER_RATIO_PCT";
/// Env var: outbox provider (`memory` | `sqlite`).
pub const ENV_OUTBOX_PROVIDER: &str = "REINDEX_OUTBOX_PROVIDER";
/// Env var: outbox SQLite database path.
pub const ENV_OUTBOX_SQLITE_PATH: &str = "REINDEX_OUTBOX_SQLITE_PATH";
/// Env var: purge completed outbox jobs.
pub const ENV_OUTBOX_PURGE_COMPLETED: &str = "REINDEX_OUTBOX_PURGE_COMPLETED";
/// Env var: minimum log level.
pub const ENV_LOG_LEVEL: &str = "REINDEX_LOG_LEVEL";
/// Env var: log format (`json` | `pretty`).
pub const ENV_LOG_FORMAT: &str = "REINDEX_LOG_FORMAT";

const ALL_ENV_VARS: [&str; 13] = [
    ENV_WORKER_CONCURRENCY,
    ENV_WAIT_TIMEOUT_MS,
    ENV_FAILED_QUEUE_CAPACITY,
    ENV_CANCEL_DATA_ON_DELETE,
    ENV_RETRY_MAX_ATTEMPTS,
    ENV_RETRY_BASE_DELAY_MS,
    ENV_RETRY_MAX_DELAY_MS,
    ENV_RETRY_JITTER_RATIO_PCT,
    ENV_OUTBOX_PROVIDER,
    ENV_OUTBOX_SQLITE_PATH,
    ENV_OUTBOX_PURGE_COMPLETED,
    ENV_LOG_LEVEL,
    ENV_LOG_FORMAT,
];

/// Typed env-derived overrides for `ReindexConfig`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReindexEnv {
    /// Override for `scheduler.workerConcurrency`.
    pub worker_concurrency: Option<u32>,
    /// Override for `scheduler.waitTimeoutMs`.
    pub wait_timeout_ms: Option<u64>,
    /// Override for `scheduler.failedQueueCapacity`.
    pub failed_queue_capacity: Option<u32>,
    /// Override for `scheduler.cancelDataOnDelete`.
    pub cancel_data_on_delete: Option<bool>,
    /// Override for `retry.maxAttempts`.
    pub retry_max_attempts: Option<u32>,
    /// Override for `retry.baseDelayMs`.
    pub retry_base_delay_ms: Option<u64>,
    /// Override for `retry.maxDelayMs`.
    pub retry_max_delay_ms: Option<u64>,
    /// Override for `retry.jitterRatioPct`.
    pub retry_jitter_ratio_pct: Option<u32>,
    /// Override for `outbox.provider`.
    pub outbox_provider: Option<OutboxProvider>,
    /// Override for `outbox.sqlitePath`.
    pub outbox_sqlite_path: Option<Box<str>>,
    /// Override for `outbox.purgeCompleted`.
    pub outbox_purge_completed: Option<bool>,
    /// Override for `logging.minLevel`.
    pub log_level: Option<LogLevelSetting>,
    /// Override for `logging.format`.
    pub log_format: Option<LogFormat>,
}

impl ReindexEnv {
    /// Parse env overrides from a key/value map (useful for tests and fixtures).
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self, EnvParseError> {
        Ok(Self {
            worker_concurrency: parse_optional_u32(map, ENV_WORKER_CONCURRENCY)?,
            wait_timeout_ms: parse_optional_u64(map, ENV_WAIT_TIMEOUT_MS)?,
            failed_queue_capacity: parse_optional_u32(map, ENV_FAILED_QUEUE_CAPACITY)?,
            cancel_data_on_delete: parse_optional_bool(map, ENV_CANCEL_DATA_ON_DELETE)?,
            retry_max_attempts: parse_optional_u32(map, ENV_RETRY_MAX_ATTEMPTS)?,
            retry_base_delay_ms: parse_optional_u64(map, ENV_RETRY_BASE_DELAY_MS)?,
            retry_max_delay_ms: parse_optional_u64(map, ENV_RETRY_MAX_DELAY_MS)?,
            retry_jitter_ratio_pct: parse_optional_u32(map, ENV_RETRY_JITTER_RATIO_PCT)?,
            outbox_provider: parse_optional_enum(map, ENV_OUTBOX_PROVIDER, OutboxProvider::parse)?,
            outbox_sqlite_path: parse_optional_trimmed_string(map, ENV_OUTBOX_SQLITE_PATH)?,
            outbox_purge_completed: parse_optional_bool(map, ENV_OUTBOX_PURGE_COMPLETED)?,
            log_level: parse_optional_enum(map, ENV_LOG_LEVEL, LogLevelSetting::parse)?,
            log_format: parse_optional_enum(map, ENV_LOG_FORMAT, LogFormat::parse)?,
        })
    }

    /// Parse env overrides from the current process environment.
    pub fn from_std_env() -> Result<Self, EnvParseError> {
        let mut map = BTreeMap::new();
        for name in ALL_ENV_VARS {
            if let Ok(value) = std::env::var(name) {
                map.insert(name.to_owned(), value);
            }
        }
        Self::from_map(&map)
    }

    /// Returns true when no override is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Apply env overrides to a base config (env wins over file/default values).
pub fn apply_env_overrides(
    base: ReindexConfig,
    env: &ReindexEnv,
) -> Result<ValidatedReindexConfig, ErrorEnvelope> {
    let mut config = base;
    let mapper = EnvConfigMapper::new(&mut config);
    mapper.apply_scheduler(env);
    let mapper = EnvConfigMapper::new(&mut config);
    mapper.apply_retry(env);
    let mapper = EnvConfigMapper::new(&mut config);
    mapper.apply_outbox_and_logging(env);

    config.validate_and_normalize().map_err(Into::into)
}

struct EnvConfigMapper<'a> {
    config: &'a mut ReindexConfig,
}

impl<'a> EnvConfigMapper<'a> {
    const fn new(config: &'a mut ReindexConfig) -> Self {
        Self { config }
    }

    fn apply_scheduler(self, env: &ReindexEnv) {
        let scheduler = &mut self.config.scheduler;
        set(&mut scheduler.worker_concurrency, env.worker_concurrency);
        set(&mut scheduler.wait_timeout_ms, env.wait_timeout_ms);
        set(&mut scheduler.failed_queue_capacity, env.failed_queue_capacity);
        set(&mut scheduler.cancel_data_on_delete, env.cancel_data_on_delete);
    }

    fn apply_retry(self, env: &ReindexEnv) {
        let retry = &mut self.config.retry;
        set(&mut retry.max_attempts, env.retry_max_attempts);
        set(&mut retry.base_delay_ms, env.retry_base_delay_ms);
        set(&mut retry.max_delay_ms, env.retry_max_delay_ms);
        set(&mut retry.jitter_ratio_pct, env.retry_jitter_ratio_pct);
    }

    fn apply_outbox_and_logging(self, env: &ReindexEnv) {
        set(&mut self.config.outbox.provider, env.outbox_provider);
        if let Some(path) = env.outbox_sqlite_path.as_deref() {
            self.config.outbox.sqlite_path = Some(path.to_owned().into_boxed_str());
        }
        set(
            &mut self.config.outbox.purge_completed,
            env.outbox_purge_completed,
        );
        set(&mut self.config.logging.min_level, env.log_level);
        set(&mut self.config.logging.format, env.log_format);
    }
}

fn set<T>(field: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *field = value;
    }
}

/// Validation failures when parsing env variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvParseError {
    /// An env var was present but empty after trimming.
    EmptyValue {
        /// Env var name.
        var: &'static str,
    },
    /// Boolean env var had an invalid value.
    InvalidBool {
        /// Env var name.
        var: &'static str,
        /// Raw input value.
        value: String,
    },
    /// Integer env var had an invalid value.
    InvalidInt {
        /// Env var name.
        var: &'static str,
        /// Raw input value.
        value: String,
    },
    /// Enum env var had an invalid value.
    InvalidEnum {
        /// Env var name.
        var: &'static str,
        /// Raw input value.
        value: String,
    },
}

impl EnvParseError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::EmptyValue { .. } => ErrorCode::new("config", "empty_env_var"),
            Self::InvalidBool { .. } => ErrorCode::new("config", "invalid_env_bool"),
            Self::InvalidInt { .. } => ErrorCode::new("config", "invalid_env_int"),
            Self::InvalidEnum { .. } => ErrorCode::new("config", "invalid_env_enum"),
        }
    }
}

impl fmt::Display for EnvParseError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyValue { var } => write!(formatter, "{var} must be non-empty"),
            Self::InvalidBool { var, .. } => write!(formatter, "{var} must be a boolean"),
            Self::InvalidInt { var, .. } => write!(formatter, "{var} must be an integer"),
            Self::InvalidEnum { var, .. } => write!(formatter, "{var} has an unsupported value"),
        }
    }
}

impl std::error::Error for EnvParseError {}

impl From<EnvParseError> for ErrorEnvelope {
    fn from(error: EnvParseError) -> Self {
        let envelope = Self::expected(error.error_code(), error.to_string());
        match error {
            EnvParseError::EmptyValue { var } => envelope.with_metadata("env_var", var),
            EnvParseError::InvalidBool { var, value }
            | EnvParseError::InvalidInt { var, value }
            | EnvParseError::InvalidEnum { var, value } => envelope
                .with_metadata("env_var", var)
                .with_metadata("value", redact_value(var, &value)),
        }
    }
}

fn raw_value<'m>(
    map: &'m BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<(&'m String, &'m str)>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptyValue { var });
    }
    Ok(Some((raw, trimmed)))
}

fn parse_optional_trimmed_string(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<Box<str>>, EnvParseError> {
    Ok(raw_value(map, var)?.map(|(_, trimmed)| trimmed.to_owned().into_boxed_str()))
}

fn parse_optional_u64(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<u64>, EnvParseError> {
    let Some((raw, trimmed)) = raw_value(map, var)? else {
        return Ok(None);
    };
    trimmed
        .parse::<u64>()
        .map(Some)
        .map_err(|_| EnvParseError::InvalidInt {
            var,
            value: raw.clone(),
        })
}

fn parse_optional_u32(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<u32>, EnvParseError> {
    let Some((raw, trimmed)) = raw_value(map, var)? else {
        return Ok(None);
    };
    trimmed
        .parse::<u32>()
        .map(Some)
        .map_err(|_| EnvParseError::InvalidInt {
            var,
            value: raw.clone(),
        })
}

fn parse_optional_bool(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<bool>, EnvParseError> {
    let Some((raw, trimmed)) = raw_value(map, var)? else {
        return Ok(None);
    };
    match trimmed.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(Some(true)),
        "false" | "0" | "no" | "off" => Ok(Some(false)),
        _ => Err(EnvParseError::InvalidBool {
            var,
            value: raw.clone(),
        }),
    }
}

fn parse_optional_enum<T>(
    map: &BTreeMap<String, String>,
    var: &'static str,
    parse: fn(&str) -> Option<T>,
) -> Result<Option<T>, EnvParseError> {
    let Some((raw, trimmed)) = raw_value(map, var)? else {
        return Ok(None);
    };
    parse(trimmed)
        .map(Some)
        .ok_or_else(|| EnvParseError::InvalidEnum {
            var,
            value: raw.clone(),
        })
}

fn redact_value(var: &str, value: &str) -> String {
    if is_secret_key(var) {
        REDACTED.to_owned()
    } else {
        value.to_owned()
    }
}
