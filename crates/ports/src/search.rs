//! Search backend boundary contract.
//!
//! Every mutation is idempotent: `create_mapping` and `index` are upserts,
//! `delete_mapping` and `remove_from_index` succeed when nothing is there.
//! Transient backend failures are reported as retriable envelopes with the
//! `reindex:index_backend` code.

use crate::BoxFuture;
use reindex_domain::{EntityId, EntityTypeId, IndexDocument, Mapping, Query};
use reindex_shared::{RequestContext, Result};

/// Boundary contract for the search index.
pub trait SearchServicePort: Send + Sync {
    /// Create or replace the mapping; existing documents are kept only when
    /// they still fit the new mapping.
    fn create_mapping(&self, ctx: &RequestContext, mapping: Mapping) -> BoxFuture<'_, Result<()>>;

    /// Drop the index of an entity type, documents included.
    fn delete_mapping(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
    ) -> BoxFuture<'_, Result<()>>;

    /// Returns true when an index exists for the entity type.
    fn has_index(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
    ) -> BoxFuture<'_, Result<bool>>;

    /// Current mapping of an entity type.
    fn mapping(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
    ) -> BoxFuture<'_, Result<Option<Mapping>>>;

    /// Upsert one document.
    fn index(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
        document: IndexDocument,
    ) -> BoxFuture<'_, Result<()>>;

    /// Remove one document.
    fn remove_from_index(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
        entity_id: EntityId,
    ) -> BoxFuture<'_, Result<()>>;

    /// Count documents matching `query`; zero when the index is missing.
    fn count(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
        query: Query,
    ) -> BoxFuture<'_, Result<u64>>;

    /// Ids of every existing index, sorted.
    fn index_names(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<Vec<EntityTypeId>>>;
}
