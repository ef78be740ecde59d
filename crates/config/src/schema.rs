//! Reindex pipeline configuration schema, defaults and validation.
//!
//! - Deserialization uses `serde` (JSON or TOML).
//! - Validation is manual and returns typed errors mapped to `ErrorEnvelope`.
//! - Numeric settings are carried as bounded values in [`ConfigLimits`].

use reindex_shared::{BoundedU32, BoundedU64, ErrorCode, ErrorEnvelope, RetryPolicy};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current supported configuration schema version.
pub const CURRENT_CONFIG_VERSION: u32 = 1;

const WORKER_CONCURRENCY_MIN: u32 = 1;
const WORKER_CONCURRENCY_MAX: u32 = 256;
const WAIT_TIMEOUT_MIN_MS: u64 = 10;
const WAIT_TIMEOUT_MAX_MS: u64 = 3_600_000;
const FAILED_QUEUE_CAPACITY_MIN: u32 = 1;
const FAILED_QUEUE_CAPACITY_MAX: u32 = 100_000;

const RETRY_MAX_ATTEMPTS_MIN: u32 = 1;
const RETRY_MAX_ATTEMPTS_MAX: u32 = 10;
const RETRY_BASE_DELAY_MIN_MS: u64 = 1;
const RETRY_BASE_DELAY_MAX_MS: u64 = 60_000;
const RETRY_MAX_DELAY_MIN_MS: u64 = 1;
const RETRY_MAX_DELAY_MAX_MS: u64 = 600_000;
const RETRY_JITTER_RATIO_PCT_MIN: u32 = 0;
const RETRY_JITTER_RATIO_PCT_MAX: u32 = 100;

/// Top-level reindex configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct ReindexConfig {
    /// Schema version for forward-compatible migrations.
    pub version: u32,
    /// Index job scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Retry policy for index backend calls.
    pub retry: RetryConfig,
    /// Pending-action store settings.
    pub outbox: OutboxConfig,
    /// Structured logging settings.
    pub logging: LoggingConfig,
}

impl Default for ReindexConfig {
    fn default() -> Self {
        Self {
            version: CURRENT_CONFIG_VERSION,
            scheduler: SchedulerConfig::default(),
            retry: RetryConfig::default(),
            outbox: OutboxConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ReindexConfig {
    /// Validate and normalize the config.
    pub fn validate_and_normalize(mut self) -> Result<ValidatedReindexConfig, ConfigSchemaError> {
        if self.version != CURRENT_CONFIG_VERSION {
            return Err(ConfigSchemaError::UnsupportedVersion {
                found: self.version,
                supported: CURRENT_CONFIG_VERSION,
            });
        }

        self.retry.validate()?;
        self.outbox.normalize_and_validate()?;

        let limits = ConfigLimits::new(&self)?;
        Ok(ValidatedReindexConfig { raw: self, limits })
    }
}

/// Validated config wrapper carrying bounded numeric values.
#[derive(Debug, Clone)]
pub struct ValidatedReindexConfig {
    raw: ReindexConfig,
    limits: ConfigLimits,
}

impl ValidatedReindexConfig {
    /// Access validated numeric bounds.
    #[must_use]
    pub const fn limits(&self) -> &ConfigLimits {
        &self.limits
    }

    /// Borrow the raw config.
    #[must_use]
    pub const fn as_ref(&self) -> &ReindexConfig {
        &self.raw
    }

    /// Consume the wrapper and return the raw config.
    #[must_use]
    pub fn into_inner(self) -> ReindexConfig {
        self.raw
    }

    /// Retry policy for index backend calls.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        self.raw.retry.to_policy()
    }
}

impl AsRef<ReindexConfig> for ValidatedReindexConfig {
    fn as_ref(&self) -> &ReindexConfig {
        &self.raw
    }
}

impl std::ops::Deref for ValidatedReindexConfig {
    type Target = ReindexConfig;

    fn deref(&self) -> &Self::Target {
        &self.raw
    }
}

/// Validated numeric limits derived from the config.
#[derive(Debug, Clone, Copy)]
pub struct ConfigLimits {
    /// Worker pool size.
    pub worker_concurrency: BoundedU32<WORKER_CONCURRENCY_MIN, WORKER_CONCURRENCY_MAX>,
    /// Deadline of the blocking wait helpers (ms).
    pub wait_timeout_ms: BoundedU64<WAIT_TIMEOUT_MIN_MS, WAIT_TIMEOUT_MAX_MS>,
    /// Failed jobs kept for operators.
    pub failed_queue_capacity: BoundedU32<FAILED_QUEUE_CAPACITY_MIN, FAILED_QUEUE_CAPACITY_MAX>,
}

impl ConfigLimits {
    fn new(config: &ReindexConfig) -> Result<Self, ConfigSchemaError> {
        Ok(Self {
            worker_concurrency: bounded_u32(
                "scheduler",
                "workerConcurrency",
                config.scheduler.worker_concurrency,
            )?,
            wait_timeout_ms: BoundedU64::try_new(config.scheduler.wait_timeout_ms).map_err(
                |error| ConfigSchemaError::TimeoutOutOfRange {
                    section: "scheduler",
                    field: "waitTimeoutMs",
                    value_ms: error.value,
                    min_ms: error.min,
                    max_ms: error.max,
                },
            )?,
            failed_queue_capacity: bounded_u32(
                "scheduler",
                "failedQueueCapacity",
                config.scheduler.failed_queue_capacity,
            )?,
        })
    }
}

/// Parse a config from a JSON string, applying validation and normalization.
pub fn parse_reindex_config_json(input: &str) -> Result<ValidatedReindexConfig, ErrorEnvelope> {
    let config: ReindexConfig = serde_json::from_str(input).map_err(|error| {
        ErrorEnvelope::expected(
            ErrorCode::new("config", "invalid_json"),
            format!("invalid config JSON: {error}"),
        )
    })?;

    config.validate_and_normalize().map_err(Into::into)
}

/// Parse a config from a TOML string, applying validation and normalization.
pub fn parse_reindex_config_toml(input: &str) -> Result<ValidatedReindexConfig, ErrorEnvelope> {
    let config: ReindexConfig = toml::from_str(input).map_err(|error| {
        ErrorEnvelope::expected(
            ErrorCode::new("config", "invalid_toml"),
            format!("invalid config TOML: {error}"),
        )
    })?;

    config.validate_and_normalize().map_err(Into::into)
}

/// Index job scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct SchedulerConfig {
    /// Entity types processed in parallel.
    pub worker_concurrency: u32,
    /// Deadline of `waitForWorkToBeFinished` / `waitForIndexToBeStable` (ms).
    pub wait_timeout_ms: u64,
    /// Failed jobs kept for inspection; the oldest are dropped beyond this.
    pub failed_queue_capacity: u32,
    /// Cancel queued DATA actions of a type when its METADATA DELETE is scheduled.
    pub cancel_data_on_delete: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: 4,
            wait_timeout_ms: 60_000,
            failed_queue_capacity: 1_000,
            cancel_data_on_delete: true,
        }
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct RetryConfig {
    /// Maximum attempts (including the first attempt).
    pub max_attempts: u32,
    /// Base delay for exponential backoff (ms).
    pub base_delay_ms: u64,
    /// Maximum delay cap for backoff (ms).
    pub max_delay_ms: u64,
    /// Jitter ratio as a percentage (0..=100).
    pub jitter_ratio_pct: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
            jitter_ratio_pct: 20,
        }
    }
}

impl RetryConfig {
    /// Runtime policy.
    #[must_use]
    pub const fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
            jitter_ratio_pct: self.jitter_ratio_pct,
        }
    }

    fn validate(&self) -> Result<(), ConfigSchemaError> {
        validate_limit(
            "retry",
            "maxAttempts",
            u64::from(self.max_attempts),
            u64::from(RETRY_MAX_ATTEMPTS_MIN),
            u64::from(RETRY_MAX_ATTEMPTS_MAX),
        )?;
        validate_timeout_ms(
            "retry",
            "baseDelayMs",
            self.base_delay_ms,
            RETRY_BASE_DELAY_MIN_MS,
            RETRY_BASE_DELAY_MAX_MS,
        )?;
        validate_timeout_ms(
            "retry",
            "maxDelayMs",
            self.max_delay_ms,
            RETRY_MAX_DELAY_MIN_MS,
            RETRY_MAX_DELAY_MAX_MS,
        )?;
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigSchemaError::LimitOutOfRange {
                section: "retry",
                field: "maxDelayMs",
                value: self.max_delay_ms,
                min: self.base_delay_ms,
                max: RETRY_MAX_DELAY_MAX_MS,
            });
        }
        validate_limit(
            "retry",
            "jitterRatioPct",
            u64::from(self.jitter_ratio_pct),
            u64::from(RETRY_JITTER_RATIO_PCT_MIN),
            u64::from(RETRY_JITTER_RATIO_PCT_MAX),
        )
    }
}

/// Outbox storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutboxProvider {
    /// In-process store; pending actions are lost on restart.
    #[default]
    Memory,
    /// SQLite database file.
    Sqlite,
}

impl OutboxProvider {
    /// Stable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite => "sqlite",
        }
    }

    /// Parse a provider name (case-insensitive).
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }
}

impl fmt::Display for OutboxProvider {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Outbox configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct OutboxConfig {
    /// Storage backend.
    pub provider: OutboxProvider,
    /// Database file, required for `sqlite`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<Box<str>>,
    /// Delete completed jobs after they are applied.
    pub purge_completed: bool,
}

impl OutboxConfig {
    fn normalize_and_validate(&mut self) -> Result<(), ConfigSchemaError> {
        if let Some(path) = self.sqlite_path.take() {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                self.sqlite_path = Some(trimmed.into());
            }
        }
        if self.provider == OutboxProvider::Sqlite && self.sqlite_path.is_none() {
            return Err(ConfigSchemaError::MissingField {
                section: "outbox",
                field: "sqlitePath",
                reason: "required when provider is sqlite",
            });
        }
        Ok(())
    }
}

/// Minimum level written by the logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogLevelSetting {
    /// Everything.
    Debug,
    /// Info and above.
    #[default]
    Info,
    /// Warnings and errors.
    Warn,
    /// Errors only.
    Error,
}

impl LogLevelSetting {
    /// Stable name, also accepted by tracing filters.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Parse a level name (case-insensitive).
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human-readable text.
    Pretty,
}

impl LogFormat {
    /// Parse a format name (case-insensitive).
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" | "text" => Some(Self::Pretty),
            _ => None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct LoggingConfig {
    /// Minimum level.
    pub min_level: LogLevelSetting,
    /// Output format.
    pub format: LogFormat,
}

/// Configuration validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSchemaError {
    /// The config version is not supported.
    UnsupportedVersion {
        /// Version found in the config.
        found: u32,
        /// Version supported by this crate.
        supported: u32,
    },
    /// A timeout or delay is out of bounds.
    TimeoutOutOfRange {
        /// Schema section (e.g. `scheduler`).
        section: &'static str,
        /// Field name in the config file (e.g. `waitTimeoutMs`).
        field: &'static str,
        /// Value provided (ms).
        value_ms: u64,
        /// Minimum allowed value (ms).
        min_ms: u64,
        /// Maximum allowed value (ms).
        max_ms: u64,
    },
    /// A numeric limit is out of bounds.
    LimitOutOfRange {
        /// Schema section.
        section: &'static str,
        /// Field name in the config file.
        field: &'static str,
        /// Value provided.
        value: u64,
        /// Minimum allowed value.
        min: u64,
        /// Maximum allowed value.
        max: u64,
    },
    /// A field required by another setting is absent.
    MissingField {
        /// Schema section.
        section: &'static str,
        /// Field name in the config file.
        field: &'static str,
        /// Why it is required.
        reason: &'static str,
    },
}

impl ConfigSchemaError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::UnsupportedVersion { .. } => ErrorCode::new("config", "unsupported_version"),
            Self::TimeoutOutOfRange { .. } => ErrorCode::new("config", "invalid_timeout"),
            Self::LimitOutOfRange { .. } => ErrorCode::new("config", "invalid_limit"),
            Self::MissingField { .. } => ErrorCode::new("config", "missing_field"),
        }
    }
}

impl fmt::Display for ConfigSchemaError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedVersion { found, supported } => write!(
                formatter,
                "unsupported config version: {found} (supported: {supported})"
            ),
            Self::TimeoutOutOfRange {
                section,
                field,
                value_ms,
                min_ms,
                max_ms,
            } => write!(
                formatter,
                "{section}.{field} must be within [{min_ms}, {max_ms}] ms (got {value_ms})"
            ),
            Self::LimitOutOfRange {
                section,
                field,
                value,
                min,
                max,
            } => write!(
                formatter,
                "{section}.{field} must be within [{min}, {max}] (got {value})"
            ),
            Self::MissingField {
                section,
                field,
                reason,
            } => write!(formatter, "{section}.{field} is {reason}"),
        }
    }
}

impl std::error::Error for ConfigSchemaError {}

impl From<ConfigSchemaError> for ErrorEnvelope {
    fn from(error: ConfigSchemaError) -> Self {
        let envelope = Self::expected(error.error_code(), error.to_string());
        match error {
            ConfigSchemaError::UnsupportedVersion { found, supported } => envelope
                .with_metadata("found", found.to_string())
                .with_metadata("supported", supported.to_string()),
            ConfigSchemaError::TimeoutOutOfRange {
                section,
                field,
                value_ms,
                min_ms,
                max_ms,
            } => envelope
                .with_metadata("section", section)
                .with_metadata("field", field)
                .with_metadata("value_ms", value_ms.to_string())
                .with_metadata("min_ms", min_ms.to_string())
                .with_metadata("max_ms", max_ms.to_string()),
            ConfigSchemaError::LimitOutOfRange {
                section,
                field,
                value,
                min,
                max,
            } => envelope
                .with_metadata("section", section)
                .with_metadata("field", field)
                .with_metadata("value", value.to_string())
                .with_metadata("min", min.to_string())
                .with_metadata("max", max.to_string()),
            ConfigSchemaError::MissingField { section, field, .. } => envelope
                .with_metadata("section", section)
                .with_metadata("field", field),
        }
    }
}

const fn validate_timeout_ms(
    section: &'static str,
    field: &'static str,
    value_ms: u64,
    min_ms: u64,
    max_ms: u64,
) -> Result<(), ConfigSchemaError> {
    if value_ms < min_ms || value_ms > max_ms {
        return Err(ConfigSchemaError::TimeoutOutOfRange {
            section,
            field,
            value_ms,
            min_ms,
            max_ms,
        });
    }
    Ok(())
}

const fn validate_limit(
    section: &'static str,
    field: &'static str,
    value: u64,
    min: u64,
    max: u64,
) -> Result<(), ConfigSchemaError> {
    if value < min || value > max {
        return Err(ConfigSchemaError::LimitOutOfRange {
            section,
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

fn bounded_u32<const MIN: u32, const MAX: u32>(
    section: &'static str,
    field: &'static str,
    value: u32,
) -> Result<BoundedU32<MIN, MAX>, ConfigSchemaError> {
    BoundedU32::try_new(value).map_err(|error| ConfigSchemaError::LimitOutOfRange {
        section,
        field,
        value: u64::from(error.value),
        min: u64::from(error.min),
        max: u64::from(error.max),
    })
}
