//! Search service wrapper that injects failures and latency.

use crate::errors::{index_backend_error, schema_conflict_error};
use reindex_ports::{
    BoxFuture, EntityId, EntityTypeId, IndexDocument, Mapping, Query, SearchServicePort,
};
use reindex_shared::{RequestContext, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How a targeted entity type misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// The first `failures` mutations fail with a retriable backend error.
    Transient {
        /// Number of failing calls before the backend recovers.
        failures: u32,
    },
    /// Every mapping or document write fails with a schema conflict.
    SchemaConflict,
}

/// One mutation observed by the wrapper, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCall {
    /// `create_mapping`, `delete_mapping`, `index` or `remove_from_index`.
    pub operation: &'static str,
    /// Target index.
    pub entity_type_id: EntityTypeId,
    /// Target document, for document operations.
    pub entity_id: Option<EntityId>,
}

#[derive(Debug)]
struct Fault {
    mode: FailureMode,
    remaining: AtomicU32,
}

/// Delegating search service with per-entity-type faults and delays.
pub struct FlakySearchService {
    inner: Arc<dyn SearchServicePort>,
    faults: BTreeMap<EntityTypeId, Fault>,
    delays: BTreeMap<EntityTypeId, Duration>,
    failures: AtomicU32,
    calls: Mutex<Vec<SearchCall>>,
}

impl FlakySearchService {
    /// Wrap `inner` without any fault.
    pub fn new(inner: Arc<dyn SearchServicePort>) -> Self {
        Self {
            inner,
            faults: BTreeMap::new(),
            delays: BTreeMap::new(),
            failures: AtomicU32::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Make mutations on `entity_type_id` fail according to `mode`.
    #[must_use]
    pub fn failing(mut self, entity_type_id: EntityTypeId, mode: FailureMode) -> Self {
        let remaining = match mode {
            FailureMode::Transient { failures } => failures,
            FailureMode::SchemaConflict => u32::MAX,
        };
        self.faults.insert(
            entity_type_id,
            Fault {
                mode,
                remaining: AtomicU32::new(remaining),
            },
        );
        self
    }

    /// Sleep before every mutation on `entity_type_id`.
    #[must_use]
    pub fn with_delay(mut self, entity_type_id: EntityTypeId, delay: Duration) -> Self {
        self.delays.insert(entity_type_id, delay);
        self
    }

    /// Number of injected failures so far.
    pub fn injected_failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Mutations that reached the wrapper, failed ones included.
    pub fn calls(&self) -> Vec<SearchCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    async fn before(
        &self,
        operation: &'static str,
        entity_type_id: &EntityTypeId,
        entity_id: Option<&EntityId>,
    ) -> Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(SearchCall {
                operation,
                entity_type_id: entity_type_id.clone(),
                entity_id: entity_id.cloned(),
            });
        }
        if let Some(delay) = self.delays.get(entity_type_id) {
            tokio::time::sleep(*delay).await;
        }
        let Some(fault) = self.faults.get(entity_type_id) else {
            return Ok(());
        };
        match fault.mode {
            FailureMode::SchemaConflict if operation == "remove_from_index" => Ok(()),
            FailureMode::SchemaConflict if operation == "delete_mapping" => Ok(()),
            FailureMode::SchemaConflict => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                Err(schema_conflict_error(entity_type_id))
            },
            FailureMode::Transient { .. } => {
                let took = fault
                    .remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                    .is_ok();
                if took {
                    self.failures.fetch_add(1, Ordering::SeqCst);
                    return Err(index_backend_error(operation));
                }
                Ok(())
            },
        }
    }
}

impl SearchServicePort for FlakySearchService {
    fn create_mapping(&self, ctx: &RequestContext, mapping: Mapping) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            self.before("create_mapping", &mapping.entity_type_id, None)
                .await?;
            self.inner.create_mapping(&ctx, mapping).await
        })
    }

    fn delete_mapping(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
    ) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            self.before("delete_mapping", &entity_type_id, None).await?;
            self.inner.delete_mapping(&ctx, entity_type_id).await
        })
    }

    fn has_index(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
    ) -> BoxFuture<'_, Result<bool>> {
        self.inner.has_index(ctx, entity_type_id)
    }

    fn mapping(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
    ) -> BoxFuture<'_, Result<Option<Mapping>>> {
        self.inner.mapping(ctx, entity_type_id)
    }

    fn index(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
        document: IndexDocument,
    ) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            self.before("index", &entity_type_id, Some(&document.id))
                .await?;
            self.inner.index(&ctx, entity_type_id, document).await
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
            self.before("remove_from_index", &entity_type_id, Some(&entity_id))
                .await?;
            self.inner
                .remove_from_index(&ctx, entity_type_id, entity_id)
                .await
        })
    }

    fn count(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
        query: Query,
    ) -> BoxFuture<'_, Result<u64>> {
        self.inner.count(ctx, entity_type_id, query)
    }

    fn index_names(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<Vec<EntityTypeId>>> {
        self.inner.index_names(ctx)
    }
}
