// Allow missing docs in integration test.
#![allow(missing_docs)]

use reindex_adapters::metadata::InMemoryRepositoryCollection;
use reindex_adapters::outbox::SqliteReindexActionStore;
use reindex_adapters::search::InMemorySearchService;
use reindex_app::{ReindexActionRegisterService, ReindexActionRepositoryCollectionDecorator};
use reindex_config::{ReindexEnv, ValidatedReindexConfig, load_reindex_config_from_sources};
use reindex_infra::{ReindexRuntime, RuntimeParts, build_outbox_store};
use reindex_ports::{
    EntityTypeId, JobState, ReindexActionStorePort, RepositoryCollectionPort, SearchServicePort,
};
use reindex_shared::RequestContext;
use reindex_testkit::fixtures::{row, simple_type};
use reindex_testkit::in_memory::{NoopTelemetry, RecordingLogger};
use serde_json::json;
use std::collections::BTreeMap;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

type TestResult = Result<(), Box<dyn Error>>;

struct TempDb {
    dir: PathBuf,
}

impl TempDb {
    fn new() -> Self {
        let dir = std::env::temp_dir().join(format!("reindex-outbox-{}", Uuid::new_v4()));
        Self { dir }
    }

    fn path(&self) -> PathBuf {
        self.dir.join("outbox.db")
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn sqlite_config(path: &Path) -> Result<ValidatedReindexConfig, Box<dyn Error>> {
    let env = ReindexEnv::from_map(&BTreeMap::new())?;
    let overrides = json!({
        "scheduler": { "waitTimeoutMs": 5000 },
        "outbox": { "provider": "sqlite", "sqlitePath": path.display().to_string() }
    })
    .to_string();
    Ok(load_reindex_config_from_sources(None, Some(&overrides), &env)?)
}

/// Shared metadata and search, standing in for the durable stores that
/// outlive a process restart.
struct Backends {
    collection: Arc<InMemoryRepositoryCollection>,
    search: Arc<InMemorySearchService>,
}

impl Backends {
    fn new() -> Result<Self, Box<dyn Error>> {
        Ok(Self {
            collection: Arc::new(InMemoryRepositoryCollection::new()?),
            search: Arc::new(InMemorySearchService::new()),
        })
    }

    fn runtime(
        &self,
        config: ValidatedReindexConfig,
        logger: RecordingLogger,
    ) -> Result<ReindexRuntime, Box<dyn Error>> {
        let parts = RuntimeParts {
            collection: self.collection.clone(),
            search: self.search.clone(),
            store: build_outbox_store(&config)?,
            logger: Arc::new(logger),
            telemetry: Arc::new(NoopTelemetry),
        };
        Ok(ReindexRuntime::from_parts(config, parts)?)
    }
}

/// Commit a job to the outbox and stop before it is scheduled.
async fn commit_without_scheduling(
    ctx: &RequestContext,
    backends: &Backends,
    store: Arc<SqliteReindexActionStore>,
) -> Result<reindex_ports::ReindexJob, Box<dyn Error>> {
    let register = ReindexActionRegisterService::new(store);
    let decorator =
        ReindexActionRepositoryCollectionDecorator::new(backends.collection.clone(), register.clone());
    let tx = register.begin()?;
    let repository = decorator
        .with_transaction(&tx)
        .create_repository(ctx, simple_type("Foo")?)
        .await?;
    repository.add(ctx, row("1", &[("label", json!("one"))])?).await?;
    let job = register.commit(ctx, &tx).await?.ok_or("nothing registered")?;
    Ok(job)
}

#[tokio::test]
async fn committed_job_is_recovered_after_restart() -> TestResult {
    let ctx = RequestContext::new_request();
    let db = TempDb::new();
    let backends = Backends::new()?;
    let job = commit_without_scheduling(
        &ctx,
        &backends,
        Arc::new(SqliteReindexActionStore::new(db.path())),
    )
    .await?;
    let foo = EntityTypeId::parse("Foo")?;
    assert!(!backends.search.has_index(&ctx, foo.clone()).await?);

    let logger = RecordingLogger::new();
    let runtime = backends.runtime(sqlite_config(&db.path())?, logger.clone())?;
    assert_eq!(runtime.recover_pending(&ctx).await?, 1);
    runtime.wait_for_work_to_be_finished(&ctx).await?;

    assert!(backends.search.has_index(&ctx, foo).await?);
    assert_eq!(
        runtime.store().job_status(&ctx, job.job_id().clone()).await?,
        Some(JobState::Success)
    );
    assert_eq!(logger.events_named("reindex.recovery.scheduled").len(), 1);
    assert!(runtime.consistency_report(&ctx).await?.is_consistent());

    // Nothing is left for a second restart.
    assert_eq!(runtime.recover_pending(&ctx).await?, 0);
    runtime.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn claimed_but_unfinished_job_is_requeued() -> TestResult {
    let ctx = RequestContext::new_request();
    let db = TempDb::new();
    let backends = Backends::new()?;
    let store = Arc::new(SqliteReindexActionStore::new(db.path()));
    let job = commit_without_scheduling(&ctx, &backends, Arc::clone(&store)).await?;

    // The previous process claimed the job and died mid-run.
    assert!(store.claim_job(&ctx, job.job_id().clone()).await?);
    assert!(store.pending_jobs(&ctx).await?.is_empty());

    let runtime = backends.runtime(sqlite_config(&db.path())?, RecordingLogger::new())?;
    assert_eq!(runtime.recover_pending(&ctx).await?, 1);
    runtime.wait_for_work_to_be_finished(&ctx).await?;

    assert_eq!(
        runtime.store().job_status(&ctx, job.job_id().clone()).await?,
        Some(JobState::Success)
    );
    assert!(
        backends
            .search
            .has_index(&ctx, EntityTypeId::parse("Foo")?)
            .await?
    );
    Ok(())
}
