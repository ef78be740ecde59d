//! # reindex-config
//!
//! Configuration schema, validation, env overrides and file loading for the
//! reindex pipeline. This crate depends on `shared` only.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

/// Environment variable parsing and merging.
pub mod env;
/// Config loading helpers (env + file + overrides).
pub mod load;
/// Configuration schema types and helpers.
pub mod schema;
/// JSON Schema export.
pub mod schema_export;

pub use schema::{
    CURRENT_CONFIG_VERSION, ConfigLimits, ConfigSchemaError, LogFormat, LogLevelSetting,
    LoggingConfig, OutboxConfig, OutboxProvider, ReindexConfig, RetryConfig, SchedulerConfig,
    ValidatedReindexConfig, parse_reindex_config_json, parse_reindex_config_toml,
};

pub use env::{EnvParseError, ReindexEnv, apply_env_overrides};
pub use load::{
    load_reindex_config_from_path, load_reindex_config_from_sources, load_reindex_config_std_env,
    to_pretty_json, to_pretty_toml,
};
pub use schema_export::reindex_config_schema;

/// Returns the config crate version.
#[must_use]
pub const fn config_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
