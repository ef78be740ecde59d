//! # reindex-domain
//!
//! Domain model of the metadata-change to search-index reindexing pipeline.
//!
//! - **Primitives** - `EntityTypeId`, `EntityId`, `AttributeName`, `JobId`
//! - **Actions** - `ReindexAction`, `ReindexJob`, outbox records
//! - **Metadata** - `EntityType`, `Attribute`, `Mapping` and mapping diffs
//! - **Documents** - rows, index documents, equality queries
//! - **System indexes** - entity type and attribute metadata documents
//! - **State** - job state machine and progress
//!
//! ## Dependency Rules
//!
//! - Depends only on `shared` crate
//! - No infrastructure or adapter dependencies
//! - Pure domain logic with no I/O

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub use reindex_shared::shared_crate_version;

// =============================================================================
// DOMAIN MODULES
// =============================================================================

pub mod action;
pub mod document;
pub mod errors;
pub mod metadata;
pub mod primitives;
pub mod states;
pub mod system;

pub use action::{ActionStatus, CudType, DataType, ReindexAction, ReindexActionRecord, ReindexJob};
pub use document::{Entity, FieldValues, IndexDocument, Query, QueryRule};
pub use errors::ReindexError;
pub use metadata::{
    Attribute, AttributeType, EntityType, FieldChange, FieldKind, Mapping, MappingDiff,
    MappingField,
};
pub use primitives::{
    AttributeName, EntityId, EntityTypeId, JobId, PrimitiveError, derive_attribute_document_id,
};
pub use states::{JobFailure, JobProgress, JobState};
pub use system::{ATTRIBUTE_METADATA, ENTITY_TYPE_METADATA, is_system_index};

/// Returns the domain crate version.
#[must_use]
pub const fn domain_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
