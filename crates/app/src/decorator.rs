//! Repository collection decorator that registers reindex actions.
//!
//! Every mutation is checked against the bound transaction first, delegated,
//! and registered only when the delegate succeeded. Reads pass through.
//! Before the first change to an entity type the decorator stores its
//! pre-image on the transaction; [`ReindexActionRepositoryCollectionDecorator::rollback`]
//! puts those back.

use crate::register::{ReindexActionRegisterService, TransactionHandle, TypeSnapshot};
use reindex_domain::{CudType, DataType};
use reindex_ports::{
    Attribute, AttributeName, BoxFuture, Entity, EntityId, EntityType, EntityTypeId,
    RepositoryCapability, RepositoryCollectionPort, RepositoryPort,
};
use reindex_shared::{RequestContext, Result};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Reindex-aware wrapper around a metadata store.
#[derive(Clone)]
pub struct ReindexActionRepositoryCollectionDecorator {
    delegate: Arc<dyn RepositoryCollectionPort>,
    register: ReindexActionRegisterService,
    tx: Option<TransactionHandle>,
}

impl ReindexActionRepositoryCollectionDecorator {
    /// Decorator without a transaction; mutations fail until one is bound.
    pub fn new(
        delegate: Arc<dyn RepositoryCollectionPort>,
        register: ReindexActionRegisterService,
    ) -> Self {
        Self {
            delegate,
            register,
            tx: None,
        }
    }

    /// Copy of this decorator registering into `tx`.
    #[must_use]
    pub fn with_transaction(&self, tx: &TransactionHandle) -> Self {
        Self {
            delegate: Arc::clone(&self.delegate),
            register: self.register.clone(),
            tx: Some(tx.clone()),
        }
    }

    /// The wrapped store.
    pub fn delegate(&self) -> &Arc<dyn RepositoryCollectionPort> {
        &self.delegate
    }

    fn wrap(&self, repository: Arc<dyn RepositoryPort>) -> Arc<dyn RepositoryPort> {
        Arc::new(ReindexActionRepositoryDecorator {
            delegate: repository,
            register: self.register.clone(),
            tx: self.tx.clone(),
        })
    }

    /// Check the transaction and capture the pre-image of `entity_type_id`.
    async fn prepare(&self, ctx: &RequestContext, entity_type_id: &EntityTypeId) -> Result<()> {
        let tx = ReindexActionRegisterService::ensure_active(self.tx.as_ref())?;
        if tx.has_snapshot(entity_type_id) {
            return Ok(());
        }
        let snapshot = match self
            .delegate
            .get_repository(ctx, entity_type_id.clone())
            .await?
        {
            Some(repository) => Some(snapshot_of(ctx, repository.as_ref()).await?),
            None => None,
        };
        tx.remember(entity_type_id.clone(), snapshot);
        Ok(())
    }

    /// Roll `tx` back: drop its actions and restore every entity type it
    /// changed to its pre-image. Returns the number of types restored.
    ///
    /// A committed transaction is left alone.
    pub async fn rollback(&self, ctx: &RequestContext, tx: &TransactionHandle) -> Result<usize> {
        self.register.rollback(tx);
        let mut restored = 0;
        for (entity_type_id, snapshot) in tx.take_snapshots() {
            if self.restore(ctx, entity_type_id, snapshot).await? {
                restored += 1;
            }
        }
        Ok(restored)
    }

    async fn restore(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
        snapshot: Option<TypeSnapshot>,
    ) -> Result<bool> {
        let current = self
            .delegate
            .get_repository(ctx, entity_type_id.clone())
            .await?;
        let current = match current {
            Some(repository) => Some(snapshot_of(ctx, repository.as_ref()).await?),
            None => None,
        };
        if current == snapshot {
            return Ok(false);
        }
        if current.is_some() {
            self.delegate
                .delete_repository(ctx, entity_type_id.clone())
                .await?;
        }
        if let Some(snapshot) = snapshot {
            let repository = self
                .delegate
                .create_repository(ctx, snapshot.entity_type)
                .await?;
            for row in snapshot.rows {
                repository.add(ctx, row).await?;
            }
        }
        Ok(true)
    }

    fn register_metadata(&self, entity_type_id: EntityTypeId, cud_type: CudType) -> Result<()> {
        self.register
            .register(self.tx.as_ref(), entity_type_id, cud_type, DataType::Metadata, None)
            .map(|_| ())
    }
}

impl RepositoryCollectionPort for ReindexActionRepositoryCollectionDecorator {
    fn name(&self) -> &str {
        self.delegate.name()
    }

    fn capabilities(&self) -> BTreeSet<RepositoryCapability> {
        self.delegate.capabilities()
    }

    fn create_repository(
        &self,
        ctx: &RequestContext,
        entity_type: EntityType,
    ) -> BoxFuture<'_, Result<Arc<dyn RepositoryPort>>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            let entity_type_id = entity_type.id.clone();
            self.prepare(&ctx, &entity_type_id).await?;
            let repository = self.delegate.create_repository(&ctx, entity_type).await?;
            self.register_metadata(entity_type_id, CudType::Create)?;
            Ok(self.wrap(repository))
        })
    }

    fn delete_repository(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
    ) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            self.prepare(&ctx, &entity_type_id).await?;
            self.delegate
                .delete_repository(&ctx, entity_type_id.clone())
                .await?;
            self.register_metadata(entity_type_id, CudType::Delete)
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
            self.prepare(&ctx, &entity_type_id).await?;
            self.delegate
                .add_attribute(&ctx, entity_type_id.clone(), attribute)
                .await?;
            self.register_metadata(entity_type_id, CudType::Update)
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
            self.prepare(&ctx, &entity_type_id).await?;
            self.delegate
                .update_attribute(&ctx, entity_type_id.clone(), name, updated)
                .await?;
            self.register_metadata(entity_type_id, CudType::Update)
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
            self.prepare(&ctx, &entity_type_id).await?;
            self.delegate
                .delete_attribute(&ctx, entity_type_id.clone(), name)
                .await?;
            self.register_metadata(entity_type_id, CudType::Update)
        })
    }

    fn get_repository(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
    ) -> BoxFuture<'_, Result<Option<Arc<dyn RepositoryPort>>>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            let repository = self.delegate.get_repository(&ctx, entity_type_id).await?;
            Ok(repository.map(|repository| self.wrap(repository)))
        })
    }

    fn has_repository(
        &self,
        ctx: &RequestContext,
        entity_type_id: EntityTypeId,
    ) -> BoxFuture<'_, Result<bool>> {
        self.delegate.has_repository(ctx, entity_type_id)
    }

    fn entity_names(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<Vec<EntityTypeId>>> {
        self.delegate.entity_names(ctx)
    }

    fn repositories(
        &self,
        ctx: &RequestContext,
    ) -> BoxFuture<'_, Result<Vec<Arc<dyn RepositoryPort>>>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            let repositories = self.delegate.repositories(&ctx).await?;
            Ok(repositories
                .into_iter()
                .map(|repository| self.wrap(repository))
                .collect())
        })
    }
}

/// Repository wrapper registering `DATA` actions for row writes.
pub struct ReindexActionRepositoryDecorator {
    delegate: Arc<dyn RepositoryPort>,
    register: ReindexActionRegisterService,
    tx: Option<TransactionHandle>,
}

impl ReindexActionRepositoryDecorator {
    async fn prepare(&self, ctx: &RequestContext) -> Result<()> {
        let tx = ReindexActionRegisterService::ensure_active(self.tx.as_ref())?;
        let entity_type_id = self.delegate.entity_type_id();
        if !tx.has_snapshot(entity_type_id) {
            let snapshot = snapshot_of(ctx, self.delegate.as_ref()).await?;
            tx.remember(entity_type_id.clone(), Some(snapshot));
        }
        Ok(())
    }

    fn register_row(&self, cud_type: CudType, entity_id: EntityId) -> Result<()> {
        self.register
            .register(
                self.tx.as_ref(),
                self.delegate.entity_type_id().clone(),
                cud_type,
                DataType::Data,
                Some(entity_id),
            )
            .map(|_| ())
    }
}

impl RepositoryPort for ReindexActionRepositoryDecorator {
    fn entity_type_id(&self) -> &EntityTypeId {
        self.delegate.entity_type_id()
    }

    fn entity_type(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<EntityType>> {
        self.delegate.entity_type(ctx)
    }

    fn find_all(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<Vec<Entity>>> {
        self.delegate.find_all(ctx)
    }

    fn find_one(&self, ctx: &RequestContext, id: EntityId) -> BoxFuture<'_, Result<Option<Entity>>> {
        self.delegate.find_one(ctx, id)
    }

    fn count(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<u64>> {
        self.delegate.count(ctx)
    }

    fn add(&self, ctx: &RequestContext, entity: Entity) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            self.prepare(&ctx).await?;
            let entity_id = entity.id.clone();
            self.delegate.add(&ctx, entity).await?;
            self.register_row(CudType::Create, entity_id)
        })
    }

    fn update(&self, ctx: &RequestContext, entity: Entity) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            self.prepare(&ctx).await?;
            let entity_id = entity.id.clone();
            self.delegate.update(&ctx, entity).await?;
            self.register_row(CudType::Update, entity_id)
        })
    }

    fn delete(&self, ctx: &RequestContext, id: EntityId) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            self.prepare(&ctx).await?;
            self.delegate.delete(&ctx, id.clone()).await?;
            self.register_row(CudType::Delete, id)
        })
    }
}

async fn snapshot_of(ctx: &RequestContext, repository: &dyn RepositoryPort) -> Result<TypeSnapshot> {
    Ok(TypeSnapshot {
        entity_type: repository.entity_type(ctx).await?,
        rows: repository.find_all(ctx).await?,
    })
}
