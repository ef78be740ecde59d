//! # reindex-adapters
//!
//! Adapter implementations for ports: an in-memory metadata store, an
//! in-memory search index, memory and SQLite outboxes, and JSON-line
//! logger/telemetry sinks.
//! This crate depends on `ports`, `domain`, and `shared`.

pub mod log_sink;
pub mod logger;
pub mod metadata;
pub mod outbox;
pub mod search;
pub mod telemetry;

/// Returns the adapters crate version.
#[must_use]
pub const fn adapters_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
