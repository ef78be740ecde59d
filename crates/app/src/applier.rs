//! Applies single reindex actions to the search index.
//!
//! Every step is an upsert or an idempotent delete, so replaying an action
//! (after a retry or a crash) converges on the same index state. Besides the
//! per-type index, `METADATA` actions keep the two system metadata indexes in
//! sync with the schema.

use reindex_domain::system::{
    attribute_document_id, attribute_documents, attribute_metadata, entity_type_document,
    entity_type_metadata,
};
use reindex_domain::{
    ATTRIBUTE_METADATA, CudType, DataType, ENTITY_TYPE_METADATA, EntityType, ReindexAction,
};
use reindex_ports::{
    EntityId, EntityTypeId, IndexDocument, Mapping, RepositoryCollectionPort, RepositoryPort,
    SearchServicePort,
};
use reindex_shared::{ErrorCode, ErrorEnvelope, RequestContext, Result};
use std::sync::Arc;

/// What applying an action did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The index was updated.
    Applied,
    /// Nothing to do: the entity type no longer exists.
    Skipped,
}

/// Executes reindex actions against the search service.
#[derive(Clone)]
pub struct IndexActionApplier {
    collection: Arc<dyn RepositoryCollectionPort>,
    search: Arc<dyn SearchServicePort>,
}

impl IndexActionApplier {
    /// Applier reading current state from `collection`.
    pub fn new(
        collection: Arc<dyn RepositoryCollectionPort>,
        search: Arc<dyn SearchServicePort>,
    ) -> Self {
        Self { collection, search }
    }

    /// Search service the applier writes to.
    pub fn search(&self) -> &Arc<dyn SearchServicePort> {
        &self.search
    }

    /// Apply one action.
    pub async fn apply(&self, ctx: &RequestContext, action: &ReindexAction) -> Result<ApplyOutcome> {
        ctx.ensure_not_cancelled("applier.apply")?;
        let entity_type_id = action.entity_type_id.clone();
        match (action.data_type, action.cud_type, &action.entity_id) {
            (DataType::Metadata, CudType::Create, _) => self.create_index(ctx, entity_type_id).await,
            (DataType::Metadata, CudType::Update, _) => self.update_index(ctx, entity_type_id).await,
            (DataType::Metadata, CudType::Delete, _) => self.delete_index(ctx, entity_type_id).await,
            (DataType::Data, CudType::Delete, Some(entity_id)) => {
                self.remove_document(ctx, entity_type_id, entity_id.clone())
                    .await
            },
            (DataType::Data, _, Some(entity_id)) => {
                self.upsert_document(ctx, entity_type_id, entity_id.clone())
                    .await
            },
            (DataType::Data, _, None) => Err(ErrorEnvelope::invariant(
                ErrorCode::invalid_input(),
                format!("data action {action} has no entity id"),
            )
            .with_metadata("entityTypeId", action.entity_type_id.as_str())),
        }
    }

    async fn repository(
        &self,
        ctx: &RequestContext,
        entity_type_id: &EntityTypeId,
    ) -> Result<Option<Arc<dyn RepositoryPort>>> {
        self.collection
            .get_repository(ctx, entity_type_id.clone())
            .await
    }

    async fn create_index(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
    ) -> Result<ApplyOutcome> {
        let Some(repository) = self.repository(ctx, &entity_type_id).await? else {
            return Ok(ApplyOutcome::Skipped);
        };
        let entity_type = repository.entity_type(ctx).await?;
        let mapping = entity_type.mapping()?;
        self.search.create_mapping(ctx, mapping.clone()).await?;
        self.index_rows(ctx, repository.as_ref(), &mapping).await?;
        self.write_metadata_docs(ctx, &entity_type, None).await?;
        Ok(ApplyOutcome::Applied)
    }

    async fn update_index(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
    ) -> Result<ApplyOutcome> {
        let Some(repository) = self.repository(ctx, &entity_type_id).await? else {
            return Ok(ApplyOutcome::Skipped);
        };
        let entity_type = repository.entity_type(ctx).await?;
        let mapping = entity_type.mapping()?;
        let previous = self.search.mapping(ctx, entity_type_id.clone()).await?;

        let Some(previous) = previous else {
            self.search.create_mapping(ctx, mapping.clone()).await?;
            self.index_rows(ctx, repository.as_ref(), &mapping).await?;
            self.write_metadata_docs(ctx, &entity_type, None).await?;
            return Ok(ApplyOutcome::Applied);
        };

        let diff = mapping.diff(&previous);
        if diff.requires_rebuild() {
            self.search.delete_mapping(ctx, entity_type_id).await?;
            self.search.create_mapping(ctx, mapping.clone()).await?;
            self.index_rows(ctx, repository.as_ref(), &mapping).await?;
        } else if !diff.is_empty() {
            self.search.create_mapping(ctx, mapping.clone()).await?;
            if diff.requires_reindex() {
                self.index_rows(ctx, repository.as_ref(), &mapping).await?;
            }
        }
        self.write_metadata_docs(ctx, &entity_type, Some(&previous))
            .await?;
        Ok(ApplyOutcome::Applied)
    }

    async fn delete_index(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
    ) -> Result<ApplyOutcome> {
        let previous = self.search.mapping(ctx, entity_type_id.clone()).await?;
        self.search
            .delete_mapping(ctx, entity_type_id.clone())
            .await?;

        self.ensure_system_indexes(ctx).await?;
        let entity_type_doc = EntityId::parse(entity_type_id.as_str())?;
        self.search
            .remove_from_index(ctx, EntityTypeId::parse(ENTITY_TYPE_METADATA)?, entity_type_doc)
            .await?;
        if let Some(previous) = previous {
            self.remove_attribute_docs(ctx, &entity_type_id, previous.fields.keys())
                .await?;
        }
        Ok(ApplyOutcome::Applied)
    }

    async fn upsert_document(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
        entity_id: EntityId,
    ) -> Result<ApplyOutcome> {
        let Some(repository) = self.repository(ctx, &entity_type_id).await? else {
            return Ok(ApplyOutcome::Skipped);
        };
        let Some(row) = repository.find_one(ctx, entity_id.clone()).await? else {
            return self.remove_document(ctx, entity_type_id, entity_id).await;
        };
        let mapping = repository.entity_type(ctx).await?.mapping()?;
        if !self.search.has_index(ctx, entity_type_id.clone()).await? {
            self.search.create_mapping(ctx, mapping.clone()).await?;
        }
        self.search
            .index(ctx, entity_type_id, IndexDocument::from_entity(&row, &mapping))
            .await?;
        Ok(ApplyOutcome::Applied)
    }

    async fn remove_document(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
        entity_id: EntityId,
    ) -> Result<ApplyOutcome> {
        if !self.search.has_index(ctx, entity_type_id.clone()).await? {
            return Ok(ApplyOutcome::Skipped);
        }
        self.search
            .remove_from_index(ctx, entity_type_id, entity_id)
            .await?;
        Ok(ApplyOutcome::Applied)
    }

    async fn index_rows(
        &self,
        ctx: &RequestContext,
        repository: &dyn RepositoryPort,
        mapping: &Mapping,
    ) -> Result<()> {
        for row in repository.find_all(ctx).await? {
            ctx.ensure_not_cancelled("applier.index_rows")?;
            self.search
                .index(
                    ctx,
                    mapping.entity_type_id.clone(),
                    IndexDocument::from_entity(&row, mapping),
                )
                .await?;
        }
        Ok(())
    }

    async fn ensure_system_indexes(&self, ctx: &RequestContext) -> Result<()> {
        for system in [entity_type_metadata()?, attribute_metadata()?] {
            if !self.search.has_index(ctx, system.id.clone()).await? {
                self.search.create_mapping(ctx, system.mapping()?).await?;
            }
        }
        Ok(())
    }

    /// Upsert the entity type and attribute docs, dropping docs of attributes
    /// that only exist in `previous`.
    async fn write_metadata_docs(
        &self,
        ctx: &RequestContext,
        entity_type: &EntityType,
        previous: Option<&Mapping>,
    ) -> Result<()> {
        if entity_type.system {
            return Ok(());
        }
        self.ensure_system_indexes(ctx).await?;
        self.search
            .index(
                ctx,
                EntityTypeId::parse(ENTITY_TYPE_METADATA)?,
                entity_type_document(entity_type)?,
            )
            .await?;

        if let Some(previous) = previous {
            let removed = previous
                .fields
                .keys()
                .filter(|name| entity_type.attribute(name).is_none());
            self.remove_attribute_docs(ctx, &entity_type.id, removed)
                .await?;
        }

        let attribute_index = EntityTypeId::parse(ATTRIBUTE_METADATA)?;
        for document in attribute_documents(entity_type)? {
            self.search
                .index(ctx, attribute_index.clone(), document)
                .await?;
        }
        Ok(())
    }

    async fn remove_attribute_docs<'a>(
        &self,
        ctx: &RequestContext,
        entity_type_id: &EntityTypeId,
        names: impl Iterator<Item = &'a reindex_ports::AttributeName>,
    ) -> Result<()> {
        let attribute_index = EntityTypeId::parse(ATTRIBUTE_METADATA)?;
        for name in names {
            self.search
                .remove_from_index(
                    ctx,
                    attribute_index.clone(),
                    attribute_document_id(entity_type_id, name)?,
                )
                .await?;
        }
        Ok(())
    }
}
