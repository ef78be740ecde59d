//! # reindex-ports
//!
//! Port traits for the reindex pipeline hexagonal architecture.
//!
//! - `RepositoryCollectionPort` / `RepositoryPort`: the metadata store
//! - `SearchServicePort`: the search index
//! - `ReindexActionStorePort`: the transactional outbox
//! - `LoggerPort` / `TelemetryPort`: observability
//!
//! This crate depends only on `domain` and `shared`.

use std::future::Future;
use std::pin::Pin;

/// Boxed future used by port traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Returns the ports crate version.
#[must_use]
pub const fn ports_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub mod logger;
pub mod outbox;
pub mod repository;
pub mod search;
pub mod telemetry;

pub use logger::*;
pub use outbox::*;
pub use repository::*;
pub use search::*;
pub use telemetry::*;

// Domain types used in port signatures, so adapters can implement ports
// without depending on `reindex-domain` directly.
pub use reindex_domain::{
    ActionStatus, Attribute, AttributeName, Entity, EntityId, EntityType, EntityTypeId,
    IndexDocument, JobId, JobState, Mapping, Query, ReindexActionRecord, ReindexJob,
};
