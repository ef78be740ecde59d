//! In-process metadata store: entity types, attributes and rows.

use reindex_domain::ReindexError;
use reindex_domain::system::{attribute_metadata, entity_type_metadata};
use reindex_ports::{
    Attribute, AttributeName, BoxFuture, Entity, EntityId, EntityType, EntityTypeId,
    RepositoryCapability, RepositoryCollectionPort, RepositoryPort,
};
use reindex_shared::{ErrorCode, ErrorEnvelope, RequestContext, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

const COLLECTION_NAME: &str = "memory";

/// Rows of one entity type, plus its current definition.
#[derive(Debug)]
pub struct InMemoryRepository {
    entity_type_id: EntityTypeId,
    entity_type: RwLock<EntityType>,
    rows: RwLock<BTreeMap<EntityId, Entity>>,
}

impl InMemoryRepository {
    fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type_id: entity_type.id.clone(),
            entity_type: RwLock::new(entity_type),
            rows: RwLock::new(BTreeMap::new()),
        }
    }

    async fn check_values(&self, entity: &Entity) -> Result<()> {
        let entity_type = self.entity_type.read().await;
        for name in entity.values.keys() {
            let known = entity_type
                .attributes
                .iter()
                .any(|attribute| attribute.name.as_str() == name.as_ref());
            if !known {
                return Err(ErrorEnvelope::expected(
                    ErrorCode::invalid_input(),
                    format!("{} has no attribute {name}", self.entity_type_id),
                )
                .with_metadata("entityTypeId", self.entity_type_id.as_str())
                .with_metadata("attribute", name.as_ref()));
            }
        }
        Ok(())
    }

    /// Apply a schema change and keep stored values consistent with it.
    async fn alter(&self, updated: EntityType, renamed: Option<(&AttributeName, &AttributeName)>) {
        let mapping = updated.mapping().ok();
        let mut rows = self.rows.write().await;
        for row in rows.values_mut() {
            if let Some((from, to)) = renamed
                && let Some(value) = row.values.remove(from.as_str())
            {
                row.values.insert(to.as_str().into(), value);
            }
            if let Some(mapping) = &mapping {
                row.values.retain(|name, value| {
                    mapping
                        .field(name)
                        .is_some_and(|field| field.kind.accepts(value))
                });
            }
        }
        *self.entity_type.write().await = updated;
    }
}

impl RepositoryPort for InMemoryRepository {
    fn entity_type_id(&self) -> &EntityTypeId {
        &self.entity_type_id
    }

    fn entity_type(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<EntityType>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("repository.entity_type")?;
            Ok(self.entity_type.read().await.clone())
        })
    }

    fn find_all(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<Vec<Entity>>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("repository.find_all")?;
            Ok(self.rows.read().await.values().cloned().collect())
        })
    }

    fn find_one(&self, ctx: &RequestContext, id: EntityId) -> BoxFuture<'_, Result<Option<Entity>>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("repository.find_one")?;
            Ok(self.rows.read().await.get(&id).cloned())
        })
    }

    fn count(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<u64>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("repository.count")?;
            let len = self.rows.read().await.len();
            Ok(u64::try_from(len).unwrap_or(u64::MAX))
        })
    }

    fn add(&self, ctx: &RequestContext, entity: Entity) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("repository.add")?;
            self.check_values(&entity).await?;
            let mut rows = self.rows.write().await;
            if rows.contains_key(&entity.id) {
                return Err(row_error(ErrorCode::conflict(), &self.entity_type_id, &entity.id, "already exists"));
            }
            rows.insert(entity.id.clone(), entity);
            Ok(())
        })
    }

    fn update(&self, ctx: &RequestContext, entity: Entity) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("repository.update")?;
            self.check_values(&entity).await?;
            let mut rows = self.rows.write().await;
            let Some(slot) = rows.get_mut(&entity.id) else {
                return Err(row_error(ErrorCode::not_found(), &self.entity_type_id, &entity.id, "does not exist"));
            };
            *slot = entity;
            Ok(())
        })
    }

    fn delete(&self, ctx: &RequestContext, id: EntityId) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("repository.delete")?;
            if self.rows.write().await.remove(&id).is_none() {
                return Err(row_error(ErrorCode::not_found(), &self.entity_type_id, &id, "does not exist"));
            }
            Ok(())
        })
    }
}

/// Metadata store keeping every repository in memory.
///
/// Starts with the two system types describing entity types and attributes;
/// those cannot be deleted or altered.
#[derive(Debug, Clone)]
pub struct InMemoryRepositoryCollection {
    repositories: Arc<RwLock<BTreeMap<EntityTypeId, Arc<InMemoryRepository>>>>,
}

impl InMemoryRepositoryCollection {
    /// Collection holding only the system types.
    pub fn new() -> Result<Self> {
        let mut repositories = BTreeMap::new();
        for system in [entity_type_metadata()?, attribute_metadata()?] {
            repositories.insert(system.id.clone(), Arc::new(InMemoryRepository::new(system)));
        }
        Ok(Self {
            repositories: Arc::new(RwLock::new(repositories)),
        })
    }

    async fn existing(&self, entity_type_id: &EntityTypeId) -> Result<Arc<InMemoryRepository>> {
        self.repositories
            .read()
            .await
            .get(entity_type_id)
            .cloned()
            .ok_or_else(|| type_not_found(entity_type_id))
    }

    async fn mutable(&self, entity_type_id: &EntityTypeId) -> Result<(Arc<InMemoryRepository>, EntityType)> {
        let repository = self.existing(entity_type_id).await?;
        let entity_type = repository.entity_type.read().await.clone();
        if entity_type.system {
            return Err(system_type_error(entity_type_id));
        }
        Ok((repository, entity_type))
    }
}

impl RepositoryCollectionPort for InMemoryRepositoryCollection {
    fn name(&self) -> &str {
        COLLECTION_NAME
    }

    fn capabilities(&self) -> BTreeSet<RepositoryCapability> {
        BTreeSet::from([RepositoryCapability::Writable, RepositoryCapability::Manageable])
    }

    fn create_repository(
        &self,
        ctx: &RequestContext,
        entity_type: EntityType,
    ) -> BoxFuture<'_, Result<Arc<dyn RepositoryPort>>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("collection.create_repository")?;
            entity_type.mapping().map_err(invalid_schema)?;
            let mut repositories = self.repositories.write().await;
            if repositories.contains_key(&entity_type.id) {
                return Err(ErrorEnvelope::expected(
                    ErrorCode::conflict(),
                    format!("entity type {} already exists", entity_type.id),
                )
                .with_metadata("entityTypeId", entity_type.id.as_str()));
            }
            let repository = Arc::new(InMemoryRepository::new(entity_type));
            repositories.insert(repository.entity_type_id.clone(), Arc::clone(&repository));
            let repository: Arc<dyn RepositoryPort> = repository;
            Ok(repository)
        })
    }

    fn delete_repository(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
    ) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("collection.delete_repository")?;
            self.mutable(&entity_type_id).await?;
            self.repositories.write().await.remove(&entity_type_id);
            Ok(())
        })
    }

    fn add_attribute(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
        attribute: Attribute,
    ) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("collection.add_attribute")?;
            let (repository, mut entity_type) = self.mutable(&entity_type_id).await?;
            if entity_type.attribute(&attribute.name).is_some() {
                return Err(ErrorEnvelope::expected(
                    ErrorCode::conflict(),
                    format!("{entity_type_id} already has attribute {}", attribute.name),
                )
                .with_metadata("entityTypeId", entity_type_id.as_str())
                .with_metadata("attribute", attribute.name.as_str()));
            }
            entity_type.attributes.push(attribute);
            entity_type.mapping().map_err(invalid_schema)?;
            repository.alter(entity_type, None).await;
            Ok(())
        })
    }

    fn update_attribute(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
        name: AttributeName,
        updated: Attribute,
    ) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("collection.update_attribute")?;
            let (repository, mut entity_type) = self.mutable(&entity_type_id).await?;
            let Some(position) = entity_type
                .attributes
                .iter()
                .position(|attribute| attribute.name == name)
            else {
                return Err(attribute_not_found(&entity_type_id, &name));
            };

            let renamed = updated.name.clone();
            if renamed != name {
                for attribute in &mut entity_type.attributes {
                    if attribute.parent.as_ref() == Some(&name) {
                        attribute.parent = Some(renamed.clone());
                    }
                }
                if entity_type.id_attribute == name {
                    entity_type.id_attribute = renamed.clone();
                }
            }
            if let Some(slot) = entity_type.attributes.get_mut(position) {
                *slot = updated;
            }
            entity_type.mapping().map_err(invalid_schema)?;

            let rename = (renamed != name).then_some((&name, &renamed));
            repository.alter(entity_type, rename).await;
            Ok(())
        })
    }

    fn delete_attribute(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
        name: AttributeName,
    ) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("collection.delete_attribute")?;
            let (repository, mut entity_type) = self.mutable(&entity_type_id).await?;
            let removed = entity_type.subtree(&name);
            if removed.is_empty() {
                return Err(attribute_not_found(&entity_type_id, &name));
            }
            if removed.contains(&entity_type.id_attribute) {
                return Err(ErrorEnvelope::expected(
                    ErrorCode::invalid_input(),
                    format!("cannot delete id attribute {name} of {entity_type_id}"),
                )
                .with_metadata("entityTypeId", entity_type_id.as_str())
                .with_metadata("attribute", name.as_str()));
            }
            entity_type
                .attributes
                .retain(|attribute| !removed.contains(&attribute.name));
            repository.alter(entity_type, None).await;
            Ok(())
        })
    }

    fn get_repository(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
    ) -> BoxFuture<'_, Result<Option<Arc<dyn RepositoryPort>>>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("collection.get_repository")?;
            Ok(self
                .repositories
                .read()
                .await
                .get(&entity_type_id)
                .map(as_port))
        })
    }

    fn has_repository(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
    ) -> BoxFuture<'_, Result<bool>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("collection.has_repository")?;
            Ok(self.repositories.read().await.contains_key(&entity_type_id))
        })
    }

    fn entity_names(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<Vec<EntityTypeId>>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("collection.entity_names")?;
            Ok(self.repositories.read().await.keys().cloned().collect())
        })
    }

    fn repositories(
        &self,
        ctx: &RequestContext,
    ) -> BoxFuture<'_, Result<Vec<Arc<dyn RepositoryPort>>>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("collection.repositories")?;
            Ok(self
                .repositories
                .read()
                .await
                .values()
                .map(as_port)
                .collect())
        })
    }
}

fn as_port(repository: &Arc<InMemoryRepository>) -> Arc<dyn RepositoryPort> {
    Arc::<InMemoryRepository>::clone(repository)
}

fn invalid_schema(error: ReindexError) -> ErrorEnvelope {
    let envelope = ErrorEnvelope::expected(ErrorCode::invalid_input(), error.to_string());
    match error {
        ReindexError::SchemaConflict {
            entity_type_id,
            attribute,
            ..
        } => {
            let envelope = envelope.with_metadata("entityTypeId", entity_type_id.as_str());
            match attribute {
                Some(attribute) => envelope.with_metadata("attribute", attribute.as_str()),
                None => envelope,
            }
        },
        _ => envelope,
    }
}

fn type_not_found(entity_type_id: &EntityTypeId) -> ErrorEnvelope {
    ErrorEnvelope::expected(
        ErrorCode::not_found(),
        format!("unknown entity type {entity_type_id}"),
    )
    .with_metadata("entityTypeId", entity_type_id.as_str())
}

fn system_type_error(entity_type_id: &EntityTypeId) -> ErrorEnvelope {
    ErrorEnvelope::expected(
        ErrorCode::invalid_input(),
        format!("system entity type {entity_type_id} cannot be altered"),
    )
    .with_metadata("entityTypeId", entity_type_id.as_str())
}

fn attribute_not_found(entity_type_id: &EntityTypeId, name: &AttributeName) -> ErrorEnvelope {
    ErrorEnvelope::expected(
        ErrorCode::not_found(),
        format!("{entity_type_id} has no attribute {name}"),
    )
    .with_metadata("entityTypeId", entity_type_id.as_str())
    .with_metadata("attribute", name.as_str())
}

fn row_error(code: ErrorCode, entity_type_id: &EntityTypeId, id: &EntityId, what: &str) -> ErrorEnvelope {
    ErrorEnvelope::expected(code, format!("{entity_type_id}[{id}] {what}"))
        .with_metadata("entityTypeId", entity_type_id.as_str())
        .with_metadata("entityId", id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reindex_domain::{AttributeType, ENTITY_TYPE_METADATA};
    use std::error::Error;

    fn book() -> Result<EntityType, Box<dyn Error>> {
        Ok(
            EntityType::new(EntityTypeId::parse("Book")?, AttributeName::parse("id")?)
                .with_attribute(Attribute::new(AttributeName::parse("meta")?, AttributeType::Compound))
                .with_attribute(
                    Attribute::new(AttributeName::parse("isbn")?, AttributeType::String)
                        .with_parent(AttributeName::parse("meta")?),
                )
                .with_attribute(Attribute::new(AttributeName::parse("pages")?, AttributeType::Int)),
        )
    }

    #[tokio::test]
    async fn create_and_list_repositories() -> Result<(), Box<dyn Error>> {
        let ctx = RequestContext::new_request();
        let collection = InMemoryRepositoryCollection::new()?;
        let book = book()?;
        collection.create_repository(&ctx, book.clone()).await?;

        assert!(collection.has_repository(&ctx, book.id.clone()).await?);
        let names = collection.entity_names(&ctx).await?;
        assert_eq!(names.len(), 3);
        assert!(names.contains(&EntityTypeId::parse(ENTITY_TYPE_METADATA)?));

        let error = collection
            .create_repository(&ctx, book)
            .await
            .err()
            .ok_or_else(|| std::io::Error::other("expected conflict"))?;
        assert_eq!(error.code, ErrorCode::conflict());
        Ok(())
    }

    #[tokio::test]
    async fn system_types_cannot_be_deleted() -> Result<(), Box<dyn Error>> {
        let ctx = RequestContext::new_request();
        let collection = InMemoryRepositoryCollection::new()?;
        let error = collection
            .delete_repository(&ctx, EntityTypeId::parse(ENTITY_TYPE_METADATA)?)
            .await
            .err()
            .ok_or_else(|| std::io::Error::other("expected rejection"))?;
        assert_eq!(error.code, ErrorCode::invalid_input());
        Ok(())
    }

    #[tokio::test]
    async fn deleting_a_compound_removes_its_children() -> Result<(), Box<dyn Error>> {
        let ctx = RequestContext::new_request();
        let collection = InMemoryRepositoryCollection::new()?;
        let book = book()?;
        let repository = collection.create_repository(&ctx, book.clone()).await?;
        repository
            .add(
                &ctx,
                Entity::new(EntityId::parse("b1")?)
                    .with_value("id", "b1")
                    .with_value("isbn", "978-3")
                    .with_value("pages", 120),
            )
            .await?;

        collection
            .delete_attribute(&ctx, book.id.clone(), AttributeName::parse("meta")?)
            .await?;

        let current = repository.entity_type(&ctx).await?;
        let names: Vec<_> = current.attributes.iter().map(|a| a.name.as_str().to_owned()).collect();
        assert_eq!(names, vec!["id".to_owned(), "pages".to_owned()]);
        let row = repository
            .find_one(&ctx, EntityId::parse("b1")?)
            .await?
            .ok_or("row vanished")?;
        assert!(row.get("isbn").is_none());
        assert_eq!(row.get("pages"), Some(&serde_json::Value::from(120)));
        Ok(())
    }

    #[tokio::test]
    async fn retyping_drops_values_that_no_longer_fit() -> Result<(), Box<dyn Error>> {
        let ctx = RequestContext::new_request();
        let collection = InMemoryRepositoryCollection::new()?;
        let book = book()?;
        let repository = collection.create_repository(&ctx, book.clone()).await?;
        repository
            .add(&ctx, Entity::new(EntityId::parse("b1")?).with_value("pages", 120))
            .await?;

        let pages = AttributeName::parse("pages")?;
        collection
            .update_attribute(
                &ctx,
                book.id.clone(),
                pages.clone(),
                Attribute::new(pages, AttributeType::Bool),
            )
            .await?;

        let row = repository
            .find_one(&ctx, EntityId::parse("b1")?)
            .await?
            .ok_or("row vanished")?;
        assert!(row.get("pages").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn row_mutations_report_missing_rows() -> Result<(), Box<dyn Error>> {
        let ctx = RequestContext::new_request();
        let collection = InMemoryRepositoryCollection::new()?;
        let repository = collection.create_repository(&ctx, book()?).await?;

        let error = repository
            .delete(&ctx, EntityId::parse("nope")?)
            .await
            .err()
            .ok_or_else(|| std::io::Error::other("expected not found"))?;
        assert_eq!(error.code, ErrorCode::not_found());
        assert_eq!(error.metadata_value("entityId"), Some("nope"));

        let error = repository
            .add(&ctx, Entity::new(EntityId::parse("x")?).with_value("colour", "red"))
            .await
            .err()
            .ok_or_else(|| std::io::Error::other("expected invalid input"))?;
        assert_eq!(error.code, ErrorCode::invalid_input());
        Ok(())
    }
}
