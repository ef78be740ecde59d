//! # reindex-infra
//!
//! Runtime composition for the reindex pipeline: config loading, adapter
//! selection, tracing setup and the [`ReindexRuntime`] facade.
//! This crate depends on `app`, `adapters`, `config`, and `shared`.

/// Config loading helpers.
pub mod config_check;
/// Environment validation helpers.
pub mod env_check;
/// Tracing subscriber and structured logger setup.
pub mod observability;
/// Composition root.
pub mod runtime;

pub use config_check::load_effective_config_json;
pub use env_check::{InfraError, InfraResult, validate_env_parsing};
pub use observability::{default_filter, init_tracing, json_observability, log_level};
pub use runtime::{ReindexRuntime, RuntimeParts, build_outbox_store, scheduler_settings};

// Re-export redaction utilities for log boundary sanitization
pub use reindex_shared::{is_secret_key, redact_if_secret};

/// Returns the infra crate version.
#[must_use]
pub const fn infra_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
