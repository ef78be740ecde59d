//! Metadata store boundary: a collection of typed repositories.

use crate::BoxFuture;
use reindex_domain::{Attribute, AttributeName, Entity, EntityId, EntityType, EntityTypeId};
use reindex_shared::{RequestContext, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Capabilities advertised by a repository collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RepositoryCapability {
    /// Rows can be written.
    Writable,
    /// Repositories can be created and deleted, attributes altered.
    Manageable,
    /// Changes are reflected in the search index.
    Indexable,
}

impl fmt::Display for RepositoryCapability {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Writable => "writable",
            Self::Manageable => "manageable",
            Self::Indexable => "indexable",
        })
    }
}

/// Rows of one entity type.
pub trait RepositoryPort: Send + Sync {
    /// Entity type id of this repository.
    fn entity_type_id(&self) -> &EntityTypeId;

    /// Current definition of the entity type.
    fn entity_type(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<EntityType>>;

    /// Every row, in id order.
    fn find_all(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<Vec<Entity>>>;

    /// One row by id.
    fn find_one(&self, ctx: &RequestContext, id: EntityId) -> BoxFuture<'_, Result<Option<Entity>>>;

    /// Row count.
    fn count(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<u64>>;

    /// Insert a row; fails with a conflict when the id exists.
    fn add(&self, ctx: &RequestContext, entity: Entity) -> BoxFuture<'_, Result<()>>;

    /// Replace an existing row; fails with not-found when missing.
    fn update(&self, ctx: &RequestContext, entity: Entity) -> BoxFuture<'_, Result<()>>;

    /// Remove a row; fails with not-found when missing.
    fn delete(&self, ctx: &RequestContext, id: EntityId) -> BoxFuture<'_, Result<()>>;
}

/// Boundary contract for the metadata store's repository collection.
///
/// Mutations change the schema; everything else is read-only.
pub trait RepositoryCollectionPort: Send + Sync {
    /// Collection name (backend identifier).
    fn name(&self) -> &str;

    /// Advertised capabilities.
    fn capabilities(&self) -> BTreeSet<RepositoryCapability>;

    /// Create the repository for a new entity type.
    fn create_repository(
        &self,
        ctx: &RequestContext,
        entity_type: EntityType,
    ) -> BoxFuture<'_, Result<Arc<dyn RepositoryPort>>>;

    /// Delete an entity type and all of its rows.
    fn delete_repository(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
    ) -> BoxFuture<'_, Result<()>>;

    /// Add an attribute to an existing entity type.
    fn add_attribute(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
        attribute: Attribute,
    ) -> BoxFuture<'_, Result<()>>;

    /// Replace the attribute called `name` with `updated`.
    fn update_attribute(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
        name: AttributeName,
        updated: Attribute,
    ) -> BoxFuture<'_, Result<()>>;

    /// Remove an attribute (and, for compounds, every nested attribute).
    fn delete_attribute(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
        name: AttributeName,
    ) -> BoxFuture<'_, Result<()>>;

    /// Repository lookup.
    fn get_repository(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
    ) -> BoxFuture<'_, Result<Option<Arc<dyn RepositoryPort>>>>;

    /// Returns true when the entity type exists.
    fn has_repository(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
    ) -> BoxFuture<'_, Result<bool>>;

    /// Ids of every entity type, sorted.
    fn entity_names(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<Vec<EntityTypeId>>>;

    /// Every repository, sorted by entity type id.
    fn repositories(
        &self,
        ctx: &RequestContext,
    ) -> BoxFuture<'_, Result<Vec<Arc<dyn RepositoryPort>>>>;
}
