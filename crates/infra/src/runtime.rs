//! Composition root wiring config, adapters and use cases together.

use crate::InfraResult;
use crate::observability::json_observability;
use reindex_adapters::log_sink::StderrLogSink;
use reindex_adapters::metadata::InMemoryRepositoryCollection;
use reindex_adapters::outbox::{InMemoryReindexActionStore, SqliteReindexActionStore};
use reindex_adapters::search::InMemorySearchService;
use reindex_app::{
    ConsistencyChecker, ConsistencyReport, IndexActionApplier, IndexJobScheduler,
    IndexJobSchedulerDeps, ReindexActionRegisterService, ReindexActionRepositoryCollectionDecorator,
    SchedulerSettings, TransactionHandle,
};
use reindex_config::{OutboxProvider, ValidatedReindexConfig};
use reindex_ports::{
    EntityTypeId, LogFields, LoggerPort, ReindexActionStorePort, RepositoryCollectionPort,
    SearchServicePort, TelemetryPort,
};
use reindex_shared::{ErrorCode, ErrorEnvelope, RequestContext, Result};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Explicit collaborators for [`ReindexRuntime::from_parts`].
pub struct RuntimeParts {
    /// Metadata store to decorate.
    pub collection: Arc<dyn RepositoryCollectionPort>,
    /// Search index kept in sync.
    pub search: Arc<dyn SearchServicePort>,
    /// Outbox of registered actions.
    pub store: Arc<dyn ReindexActionStorePort>,
    /// Structured logger.
    pub logger: Arc<dyn LoggerPort>,
    /// Metrics sink.
    pub telemetry: Arc<dyn TelemetryPort>,
}

/// Scheduler tunables derived from validated config.
pub fn scheduler_settings(config: &ValidatedReindexConfig) -> SchedulerSettings {
    let limits = config.limits();
    SchedulerSettings {
        worker_concurrency: usize::try_from(limits.worker_concurrency.get()).unwrap_or(1),
        wait_timeout: Duration::from_millis(limits.wait_timeout_ms.get()),
        failed_queue_capacity: usize::try_from(limits.failed_queue_capacity.get())
            .unwrap_or(usize::MAX),
        cancel_data_on_delete: config.scheduler.cancel_data_on_delete,
        retry: config.retry_policy(),
    }
}

/// Outbox store selected by `outbox.provider`.
pub fn build_outbox_store(
    config: &ValidatedReindexConfig,
) -> InfraResult<Arc<dyn ReindexActionStorePort>> {
    match config.outbox.provider {
        OutboxProvider::Memory => Ok(Arc::new(InMemoryReindexActionStore::new())),
        OutboxProvider::Sqlite => {
            let path = config.outbox.sqlite_path.as_deref().ok_or_else(|| {
                ErrorEnvelope::expected(
                    ErrorCode::invalid_input(),
                    "outbox.sqlitePath is required for the sqlite provider",
                )
            })?;
            Ok(Arc::new(SqliteReindexActionStore::new(path)))
        },
    }
}

/// Running reindex pipeline: decorated metadata store, outbox and scheduler.
pub struct ReindexRuntime {
    config: ValidatedReindexConfig,
    collection: Arc<dyn RepositoryCollectionPort>,
    search: Arc<dyn SearchServicePort>,
    store: Arc<dyn ReindexActionStorePort>,
    register: ReindexActionRegisterService,
    decorator: ReindexActionRepositoryCollectionDecorator,
    scheduler: IndexJobScheduler,
    checker: ConsistencyChecker,
    logger: Arc<dyn LoggerPort>,
}

impl ReindexRuntime {
    /// Runtime over in-memory metadata and search, logging JSON to stderr.
    pub fn in_memory(config: ValidatedReindexConfig) -> InfraResult<Self> {
        let (logger, telemetry) = json_observability(&config.logging, Arc::new(StderrLogSink));
        let parts = RuntimeParts {
            collection: Arc::new(InMemoryRepositoryCollection::new()?),
            search: Arc::new(InMemorySearchService::new()),
            store: build_outbox_store(&config)?,
            logger,
            telemetry,
        };
        Self::from_parts(config, parts)
    }

    /// Runtime over the given collaborators.
    pub fn from_parts(config: ValidatedReindexConfig, parts: RuntimeParts) -> InfraResult<Self> {
        let RuntimeParts {
            collection,
            search,
            store,
            logger,
            telemetry,
        } = parts;
        let register = ReindexActionRegisterService::new(Arc::clone(&store));
        let decorator =
            ReindexActionRepositoryCollectionDecorator::new(Arc::clone(&collection), register.clone());
        let scheduler = IndexJobScheduler::new(
            IndexJobSchedulerDeps {
                applier: IndexActionApplier::new(Arc::clone(&collection), Arc::clone(&search)),
                store: Arc::clone(&store),
                logger: Arc::clone(&logger),
                telemetry,
            },
            scheduler_settings(&config),
        )?;
        let checker = ConsistencyChecker::new(Arc::clone(&collection), Arc::clone(&search));

        let mut fields = LogFields::new();
        fields.insert("outbox".into(), json!(config.outbox.provider.as_str()));
        fields.insert("collection".into(), json!(collection.name()));
        fields.insert(
            "workerConcurrency".into(),
            json!(config.limits().worker_concurrency.get()),
        );
        logger.info("reindex.runtime.started", "Reindex runtime ready", Some(fields));

        Ok(Self {
            config,
            collection,
            search,
            store,
            register,
            decorator,
            scheduler,
            checker,
            logger,
        })
    }

    /// Run `work` against the metadata store inside one transaction.
    ///
    /// On success the registered actions are committed to the outbox and
    /// scheduled. On error, or when the outbox rejects the job, nothing is
    /// registered and every entity type `work` changed is restored.
    pub async fn run_in_transaction<T, F, Fut>(&self, ctx: &RequestContext, work: F) -> Result<T>
    where
        F: FnOnce(ReindexActionRepositoryCollectionDecorator) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let tx = self.register.begin()?;
        let value = match work(self.decorator.with_transaction(&tx)).await {
            Ok(value) => value,
            Err(error) => {
                self.abandon(ctx, &tx, tx.actions().len()).await;
                return Err(error);
            },
        };

        let registered = tx.actions().len();
        let job = match self.register.commit(ctx, &tx).await {
            Ok(job) => job,
            Err(error) => {
                self.abandon(ctx, &tx, registered).await;
                return Err(error);
            },
        };
        if let Some(job) = job {
            tracing::debug!(job_id = %job.job_id(), actions = job.len(), "transaction committed");
            self.scheduler.schedule(ctx, job).await?;
        }
        Ok(value)
    }

    async fn abandon(&self, ctx: &RequestContext, tx: &TransactionHandle, discarded: usize) {
        let mut fields = LogFields::new();
        fields.insert("jobId".into(), json!(tx.job_id().as_str()));
        fields.insert("discardedActions".into(), json!(discarded));
        match self.decorator.rollback(ctx, tx).await {
            Ok(restored) => {
                fields.insert("restoredTypes".into(), json!(restored));
                self.logger.warn(
                    "reindex.transaction.rolled_back",
                    "Transaction failed; reindex actions discarded",
                    Some(fields),
                );
            },
            Err(error) => self.logger.error(
                "reindex.transaction.restore_failed",
                "Transaction failed and the metadata store could not be restored",
                Some(fields),
                &error,
            ),
        }
    }

    /// Requeue and schedule jobs left pending by a previous process.
    pub async fn recover_pending(&self, ctx: &RequestContext) -> Result<usize> {
        self.scheduler.recover_pending(ctx).await
    }

    /// Block until every scheduled action was applied.
    pub async fn wait_for_work_to_be_finished(&self, ctx: &RequestContext) -> Result<()> {
        self.scheduler.wait_for_work_to_be_finished(ctx).await?;
        self.purge_if_configured(ctx).await
    }

    /// Block until every scheduled action of `entity_type_id` was applied.
    pub async fn wait_for_index_to_be_stable(
        &self,
        ctx: &RequestContext,
        entity_type_id: &EntityTypeId,
    ) -> Result<()> {
        self.scheduler
            .wait_for_index_to_be_stable(ctx, entity_type_id)
            .await
    }

    /// Compare the metadata store with the search index.
    pub async fn consistency_report(&self, ctx: &RequestContext) -> Result<ConsistencyReport> {
        self.checker.report(ctx).await
    }

    /// Stop scheduling and drain running lanes.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.logger
            .info("reindex.runtime.stopped", "Reindex runtime stopped", None);
    }

    async fn purge_if_configured(&self, ctx: &RequestContext) -> Result<()> {
        if !self.config.outbox.purge_completed {
            return Ok(());
        }
        let purged = self.store.purge_completed(ctx).await?;
        if purged > 0 {
            let mut fields = LogFields::new();
            fields.insert("actions".into(), json!(purged));
            self.logger
                .debug("reindex.outbox.purged", "Purged completed jobs", Some(fields));
        }
        Ok(())
    }

    /// Effective config.
    pub const fn config(&self) -> &ValidatedReindexConfig {
        &self.config
    }

    /// Undecorated metadata store, for reads.
    pub fn collection(&self) -> &Arc<dyn RepositoryCollectionPort> {
        &self.collection
    }

    /// Search index.
    pub fn search(&self) -> &Arc<dyn SearchServicePort> {
        &self.search
    }

    /// Outbox store.
    pub fn store(&self) -> &Arc<dyn ReindexActionStorePort> {
        &self.store
    }

    /// Scheduler, for progress and failed-job inspection.
    pub const fn scheduler(&self) -> &IndexJobScheduler {
        &self.scheduler
    }

    /// Consistency checker.
    pub const fn consistency(&self) -> &ConsistencyChecker {
        &self.checker
    }
}
