//! In-process search index keyed by entity type.

use reindex_domain::ReindexError;
use reindex_ports::{
    BoxFuture, EntityId, EntityTypeId, IndexDocument, Mapping, Query, SearchServicePort,
};
use reindex_shared::{ErrorEnvelope, RequestContext, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct IndexState {
    mapping: Mapping,
    documents: BTreeMap<EntityId, IndexDocument>,
}

/// Search service holding every index in memory.
///
/// Documents are validated against the mapping on write, so a value that does
/// not fit its field is a schema conflict rather than silent data loss.
#[derive(Debug, Clone, Default)]
pub struct InMemorySearchService {
    indexes: Arc<RwLock<BTreeMap<EntityTypeId, IndexState>>>,
}

impl InMemorySearchService {
    /// Empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Documents of an index, in id order (empty when missing).
    pub async fn documents(&self, entity_type_id: &EntityTypeId) -> Vec<IndexDocument> {
        self.indexes
            .read()
            .await
            .get(entity_type_id)
            .map(|state| state.documents.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl SearchServicePort for InMemorySearchService {
    fn create_mapping(&self, ctx: &RequestContext, mapping: Mapping) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("search.create_mapping")?;
            let mut indexes = self.indexes.write().await;
            match indexes.get_mut(&mapping.entity_type_id) {
                Some(state) => {
                    state
                        .documents
                        .retain(|_, document| mapping.check_document(document).is_ok());
                    state.mapping = mapping;
                },
                None => {
                    indexes.insert(
                        mapping.entity_type_id.clone(),
                        IndexState {
                            mapping,
                            documents: BTreeMap::new(),
                        },
                    );
                },
            }
            Ok(())
        })
    }

    fn delete_mapping(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
    ) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("search.delete_mapping")?;
            self.indexes.write().await.remove(&entity_type_id);
            Ok(())
        })
    }

    fn has_index(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
    ) -> BoxFuture<'_, Result<bool>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("search.has_index")?;
            Ok(self.indexes.read().await.contains_key(&entity_type_id))
        })
    }

    fn mapping(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
    ) -> BoxFuture<'_, Result<Option<Mapping>>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("search.mapping")?;
            Ok(self
                .indexes
                .read()
                .await
                .get(&entity_type_id)
                .map(|state| state.mapping.clone()))
        })
    }

    fn index(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
        document: IndexDocument,
    ) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("search.index")?;
            let mut indexes = self.indexes.write().await;
            let Some(state) = indexes.get_mut(&entity_type_id) else {
                return Err(ErrorEnvelope::from(ReindexError::SchemaConflict {
                    entity_type_id,
                    attribute: None,
                    reason: "no index exists for the entity type".to_owned(),
                }));
            };
            state.mapping.check_document(&document)?;
            state.documents.insert(document.id.clone(), document);
            Ok(())
        })
    }

    fn remove_from_index(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
        entity_id: EntityId,
    ) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("search.remove_from_index")?;
            if let Some(state) = self.indexes.write().await.get_mut(&entity_type_id) {
                state.documents.remove(&entity_id);
            }
            Ok(())
        })
    }

    fn count(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
        query: Query,
    ) -> BoxFuture<'_, Result<u64>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("search.count")?;
            let indexes = self.indexes.read().await;
            let matched = indexes.get(&entity_type_id).map_or(0, |state| {
                state
                    .documents
                    .values()
                    .filter(|document| query.matches(document))
                    .count()
            });
            Ok(u64::try_from(matched).unwrap_or(u64::MAX))
        })
    }

    fn index_names(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<Vec<EntityTypeId>>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("search.index_names")?;
            Ok(self.indexes.read().await.keys().cloned().collect())
        })
    }
}
