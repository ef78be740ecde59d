// Allow missing docs in integration test.
#![allow(missing_docs)]

use reindex_adapters::metadata::InMemoryRepositoryCollection;
use reindex_adapters::outbox::InMemoryReindexActionStore;
use reindex_adapters::search::InMemorySearchService;
use reindex_app::{
    IndexActionApplier, IndexJobScheduler, IndexJobSchedulerDeps,
    ReindexActionRegisterService, ReindexActionRepositoryCollectionDecorator, SchedulerSettings,
    TransactionHandle,
};
use reindex_domain::{ActionStatus, Attribute, AttributeName, AttributeType, JobState, ReindexError};
use reindex_ports::{
    EntityId, EntityTypeId, JobId, Query, ReindexActionStorePort, RepositoryCollectionPort,
    SearchServicePort,
};
use reindex_shared::{RequestContext, RetryPolicy};
use reindex_testkit::fixtures::{row, simple_type};
use reindex_testkit::flaky::{FailureMode, FlakySearchService};
use reindex_testkit::in_memory::{RecordingLogger, RecordingTelemetry};
use serde_json::json;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

type TestResult<T = ()> = Result<T, Box<dyn Error>>;

struct Harness {
    ctx: RequestContext,
    #[allow(dead_code, reason = "harness keeps the collection alive alongside the decorator")]
    collection: Arc<InMemoryRepositoryCollection>,
    search: Arc<dyn SearchServicePort>,
    store: Arc<InMemoryReindexActionStore>,
    register: ReindexActionRegisterService,
    decorator: ReindexActionRepositoryCollectionDecorator,
    scheduler: IndexJobScheduler,
    logger: RecordingLogger,
    telemetry: Arc<RecordingTelemetry>,
}

impl Harness {
    fn new(search: Arc<dyn SearchServicePort>, settings: SchedulerSettings) -> TestResult<Self> {
        let collection = Arc::new(InMemoryRepositoryCollection::new()?);
        let store = Arc::new(InMemoryReindexActionStore::new());
        Self::with_parts(collection, store, search, settings)
    }

    fn with_parts(
        collection: Arc<InMemoryRepositoryCollection>,
        store: Arc<InMemoryReindexActionStore>,
        search: Arc<dyn SearchServicePort>,
        settings: SchedulerSettings,
    ) -> TestResult<Self> {
        let register = ReindexActionRegisterService::new(store.clone());
        let decorator =
            ReindexActionRepositoryCollectionDecorator::new(collection.clone(), register.clone());
        let logger = RecordingLogger::new();
        let telemetry = Arc::new(RecordingTelemetry::new());
        let scheduler = IndexJobScheduler::new(
            IndexJobSchedulerDeps {
                applier: IndexActionApplier::new(collection.clone(), search.clone()),
                store: store.clone(),
                logger: Arc::new(logger.clone()),
                telemetry: telemetry.clone(),
            },
            settings,
        )?;
        Ok(Self {
            ctx: RequestContext::new_request(),
            collection,
            search,
            store,
            register,
            decorator,
            scheduler,
            logger,
            telemetry,
        })
    }

    fn transaction(&self) -> TestResult<(TransactionHandle, ReindexActionRepositoryCollectionDecorator)> {
        let tx = self.register.begin()?;
        let metadata = self.decorator.with_transaction(&tx);
        Ok((tx, metadata))
    }

    async fn schedule(&self, tx: &TransactionHandle) -> TestResult<JobId> {
        let job = self
            .register
            .commit(&self.ctx, tx)
            .await?
            .ok_or("transaction registered nothing")?;
        let job_id = job.job_id().clone();
        assert!(self.scheduler.schedule(&self.ctx, job).await?);
        Ok(job_id)
    }

    async fn create(&self, id: &str) -> TestResult<JobId> {
        let (tx, metadata) = self.transaction()?;
        metadata.create_repository(&self.ctx, simple_type(id)?).await?;
        self.schedule(&tx).await
    }

    async fn has_index(&self, id: &str) -> TestResult<bool> {
        Ok(self
            .search
            .has_index(&self.ctx, EntityTypeId::parse(id)?)
            .await?)
    }
}

fn settings() -> SchedulerSettings {
    SchedulerSettings {
        worker_concurrency: 4,
        wait_timeout: Duration::from_secs(5),
        failed_queue_capacity: 8,
        cancel_data_on_delete: true,
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter_ratio_pct: 0,
        },
    }
}

fn memory_search() -> Arc<InMemorySearchService> {
    Arc::new(InMemorySearchService::new())
}

#[tokio::test]
async fn created_entity_type_is_indexed_after_wait() -> TestResult {
    let harness = Harness::new(memory_search(), settings())?;
    let job_id = harness.create("Foo").await?;

    harness
        .scheduler
        .wait_for_work_to_be_finished(&harness.ctx)
        .await?;

    assert!(harness.has_index("Foo").await?);
    let progress = harness.scheduler.job_progress(&job_id).ok_or("progress")?;
    assert_eq!(progress.state, JobState::Success);
    assert_eq!(progress.done, progress.total);
    assert_eq!(
        harness.store.job_status(&harness.ctx, job_id).await?,
        Some(JobState::Success)
    );
    assert_eq!(harness.logger.events_named("reindex.job.succeeded").len(), 1);
    assert!(harness.telemetry.counter("reindex.actions.applied") >= 1);
    assert!(harness.scheduler.is_idle());
    Ok(())
}

#[tokio::test]
async fn actions_of_one_type_are_applied_in_order() -> TestResult {
    let flaky = Arc::new(FlakySearchService::new(memory_search()));
    let harness = Harness::new(flaky.clone(), settings())?;
    let foo = EntityTypeId::parse("Foo")?;

    let (tx, metadata) = harness.transaction()?;
    let repository = metadata
        .create_repository(&harness.ctx, simple_type("Foo")?)
        .await?;
    for id in ["1", "2", "3"] {
        repository
            .add(&harness.ctx, row(id, &[("label", json!(id))])?)
            .await?;
    }
    harness.schedule(&tx).await?;

    let (tx, metadata) = harness.transaction()?;
    let repository = metadata
        .get_repository(&harness.ctx, foo.clone())
        .await?
        .ok_or("repository")?;
    repository
        .update(&harness.ctx, row("2", &[("label", json!("two"))])?)
        .await?;
    repository
        .delete(&harness.ctx, EntityId::parse("1")?)
        .await?;
    harness.schedule(&tx).await?;

    harness
        .scheduler
        .wait_for_index_to_be_stable(&harness.ctx, &foo)
        .await?;

    let calls: Vec<_> = flaky
        .calls()
        .into_iter()
        .filter(|call| call.entity_type_id == foo)
        .collect();
    assert_eq!(calls.first().map(|call| call.operation), Some("create_mapping"));
    let last_touch_of_1 = calls
        .iter()
        .rev()
        .find(|call| call.entity_id.as_ref().map(EntityId::as_str) == Some("1"))
        .ok_or("row 1 touched")?;
    assert_eq!(last_touch_of_1.operation, "remove_from_index");

    let relabelled = harness
        .search
        .count(&harness.ctx, foo.clone(), Query::eq("label", "two"))
        .await?;
    assert_eq!(relabelled, 1);
    let documents = harness
        .search
        .count(&harness.ctx, foo, Query::all())
        .await?;
    assert_eq!(documents, 2);
    Ok(())
}

#[tokio::test]
async fn slow_type_does_not_block_other_types() -> TestResult {
    let flaky = Arc::new(
        FlakySearchService::new(memory_search())
            .with_delay(EntityTypeId::parse("Slow")?, Duration::from_millis(300)),
    );
    let harness = Harness::new(flaky, settings())?;

    harness.create("Slow").await?;
    harness.create("Fast").await?;
    harness
        .scheduler
        .wait_for_index_to_be_stable(&harness.ctx, &EntityTypeId::parse("Fast")?)
        .await?;

    assert!(harness.has_index("Fast").await?);
    assert!(!harness.scheduler.is_idle());

    harness
        .scheduler
        .wait_for_work_to_be_finished(&harness.ctx)
        .await?;
    assert!(harness.has_index("Slow").await?);
    Ok(())
}

#[tokio::test]
async fn transient_backend_failures_are_retried() -> TestResult {
    let flaky = Arc::new(
        FlakySearchService::new(memory_search())
            .failing(EntityTypeId::parse("Foo")?, FailureMode::Transient { failures: 2 }),
    );
    let harness = Harness::new(flaky.clone(), settings())?;
    let job_id = harness.create("Foo").await?;

    harness
        .scheduler
        .wait_for_work_to_be_finished(&harness.ctx)
        .await?;

    assert!(harness.has_index("Foo").await?);
    assert_eq!(flaky.injected_failures(), 2);
    assert_eq!(harness.telemetry.counter("reindex.actions.retried"), 2);
    assert_eq!(harness.logger.events_named("reindex.action.retry").len(), 2);
    assert_eq!(
        harness.scheduler.job_progress(&job_id).map(|p| p.state),
        Some(JobState::Success)
    );
    Ok(())
}

#[tokio::test]
async fn schema_conflicts_fail_the_job_without_retry() -> TestResult {
    let flaky = Arc::new(
        FlakySearchService::new(memory_search())
            .failing(EntityTypeId::parse("Foo")?, FailureMode::SchemaConflict),
    );
    let harness = Harness::new(flaky.clone(), settings())?;
    let job_id = harness.create("Foo").await?;

    harness
        .scheduler
        .wait_for_work_to_be_finished(&harness.ctx)
        .await?;

    assert_eq!(flaky.injected_failures(), 1);
    let progress = harness.scheduler.job_progress(&job_id).ok_or("progress")?;
    assert_eq!(progress.state, JobState::Failed);
    let failure = progress.failure.ok_or("failure")?;
    assert_eq!(failure.error.code, ReindexError::schema_conflict_code());
    assert_eq!(failure.entity_type_id.as_str(), "Foo");

    assert_eq!(harness.scheduler.failed_jobs().len(), 1);
    assert_eq!(
        harness.store.job_status(&harness.ctx, job_id.clone()).await?,
        Some(JobState::Failed)
    );
    let records = harness.store.records(&harness.ctx, Some(job_id)).await?;
    assert!(records.iter().all(|record| record.status == ActionStatus::Failed));
    assert_eq!(harness.logger.events_named("reindex.job.failed").len(), 1);
    assert_eq!(harness.telemetry.counter("reindex.jobs.failed"), 1);
    Ok(())
}

#[tokio::test]
async fn failed_jobs_can_be_rescheduled() -> TestResult {
    let flaky = Arc::new(
        FlakySearchService::new(memory_search())
            .failing(EntityTypeId::parse("Foo")?, FailureMode::Transient { failures: 1 }),
    );
    let no_retry = SchedulerSettings {
        retry: RetryPolicy::NO_RETRY,
        ..settings()
    };
    let harness = Harness::new(flaky, no_retry)?;
    let job_id = harness.create("Foo").await?;
    harness
        .scheduler
        .wait_for_work_to_be_finished(&harness.ctx)
        .await?;
    assert_eq!(harness.scheduler.failed_jobs().len(), 1);
    assert!(!harness.has_index("Foo").await?);

    assert!(
        harness
            .scheduler
            .reschedule_failed(&harness.ctx, &job_id)
            .await?
    );
    harness
        .scheduler
        .wait_for_work_to_be_finished(&harness.ctx)
        .await?;

    assert!(harness.has_index("Foo").await?);
    assert!(harness.scheduler.failed_jobs().is_empty());
    assert_eq!(
        harness.store.job_status(&harness.ctx, job_id.clone()).await?,
        Some(JobState::Success)
    );
    assert!(
        !harness
            .scheduler
            .reschedule_failed(&harness.ctx, &job_id)
            .await?
    );
    Ok(())
}

#[tokio::test]
async fn failed_queue_keeps_the_latest_jobs() -> TestResult {
    let flaky = Arc::new(
        FlakySearchService::new(memory_search())
            .failing(EntityTypeId::parse("Foo")?, FailureMode::SchemaConflict),
    );
    let bounded = SchedulerSettings {
        failed_queue_capacity: 1,
        ..settings()
    };
    let harness = Harness::new(flaky, bounded)?;
    let foo = EntityTypeId::parse("Foo")?;

    harness.create("Foo").await?;
    let (tx, metadata) = harness.transaction()?;
    metadata
        .add_attribute(
            &harness.ctx,
            foo,
            Attribute::new(AttributeName::parse("extra")?, AttributeType::Text),
        )
        .await?;
    let second = harness.schedule(&tx).await?;

    harness
        .scheduler
        .wait_for_work_to_be_finished(&harness.ctx)
        .await?;

    let failed = harness.scheduler.failed_jobs();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed.first().map(|p| p.job_id.clone()), Some(second));
    Ok(())
}

#[tokio::test]
async fn deleting_a_type_cancels_its_queued_data_actions() -> TestResult {
    let foo = EntityTypeId::parse("Foo")?;
    let flaky = Arc::new(
        FlakySearchService::new(memory_search()).with_delay(foo.clone(), Duration::from_millis(100)),
    );
    let harness = Harness::new(flaky, settings())?;
    harness.create("Foo").await?;
    harness
        .scheduler
        .wait_for_work_to_be_finished(&harness.ctx)
        .await?;

    // Keep the lane busy with a schema change.
    let (tx, metadata) = harness.transaction()?;
    metadata
        .add_attribute(
            &harness.ctx,
            foo.clone(),
            Attribute::new(AttributeName::parse("extra")?, AttributeType::Text),
        )
        .await?;
    harness.schedule(&tx).await?;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (tx, metadata) = harness.transaction()?;
    let repository = metadata
        .get_repository(&harness.ctx, foo.clone())
        .await?
        .ok_or("repository")?;
    repository.add(&harness.ctx, row("1", &[])?).await?;
    repository.add(&harness.ctx, row("2", &[])?).await?;
    let data_job = harness.schedule(&tx).await?;

    let (tx, metadata) = harness.transaction()?;
    metadata.delete_repository(&harness.ctx, foo.clone()).await?;
    harness.schedule(&tx).await?;

    harness
        .scheduler
        .wait_for_work_to_be_finished(&harness.ctx)
        .await?;

    let records = harness
        .store
        .records(&harness.ctx, Some(data_job.clone()))
        .await?;
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|record| record.status == ActionStatus::Cancelled));
    assert_eq!(harness.telemetry.counter("reindex.actions.cancelled"), 2);
    assert_eq!(
        harness.scheduler.job_progress(&data_job).map(|p| p.state),
        Some(JobState::Success)
    );
    assert!(!harness.has_index("Foo").await?);
    Ok(())
}

#[tokio::test]
async fn waits_time_out_while_work_is_pending() -> TestResult {
    let flaky = Arc::new(
        FlakySearchService::new(memory_search())
            .with_delay(EntityTypeId::parse("Foo")?, Duration::from_millis(500)),
    );
    let impatient = SchedulerSettings {
        wait_timeout: Duration::from_millis(20),
        ..settings()
    };
    let harness = Harness::new(flaky, impatient)?;
    harness.create("Foo").await?;

    let error = harness
        .scheduler
        .wait_for_work_to_be_finished(&harness.ctx)
        .await
        .err()
        .ok_or_else(|| std::io::Error::other("expected timeout"))?;
    assert_eq!(error.code, ReindexError::timeout_code());

    let error = harness
        .scheduler
        .wait_for_index_to_be_stable(&harness.ctx, &EntityTypeId::parse("Foo")?)
        .await
        .err()
        .ok_or_else(|| std::io::Error::other("expected timeout"))?;
    assert_eq!(error.code, ReindexError::timeout_code());
    Ok(())
}

#[tokio::test]
async fn recovery_schedules_committed_but_unscheduled_jobs() -> TestResult {
    let collection = Arc::new(InMemoryRepositoryCollection::new()?);
    let store = Arc::new(InMemoryReindexActionStore::new());
    let search = memory_search();

    let crashed = Harness::with_parts(collection.clone(), store.clone(), search.clone(), settings())?;
    let (tx, metadata) = crashed.transaction()?;
    metadata
        .create_repository(&crashed.ctx, simple_type("Foo")?)
        .await?;
    let job = crashed
        .register
        .commit(&crashed.ctx, &tx)
        .await?
        .ok_or("job")?;
    // Claimed, then the process died before applying anything.
    assert!(store.claim_job(&crashed.ctx, job.job_id().clone()).await?);

    let restarted = Harness::with_parts(collection, store, search, settings())?;
    assert_eq!(restarted.scheduler.recover_pending(&restarted.ctx).await?, 1);
    restarted
        .scheduler
        .wait_for_work_to_be_finished(&restarted.ctx)
        .await?;

    assert!(restarted.has_index("Foo").await?);
    assert_eq!(
        restarted
            .store
            .job_status(&restarted.ctx, job.job_id().clone())
            .await?,
        Some(JobState::Success)
    );
    assert_eq!(restarted.scheduler.recover_pending(&restarted.ctx).await?, 0);
    Ok(())
}

#[tokio::test]
async fn jobs_are_claimed_once() -> TestResult {
    let harness = Harness::new(memory_search(), settings())?;
    let (tx, metadata) = harness.transaction()?;
    metadata
        .create_repository(&harness.ctx, simple_type("Foo")?)
        .await?;
    let job = harness
        .register
        .commit(&harness.ctx, &tx)
        .await?
        .ok_or("job")?;

    assert!(harness.scheduler.schedule(&harness.ctx, job.clone()).await?);
    assert!(!harness.scheduler.schedule(&harness.ctx, job).await?);
    harness
        .scheduler
        .wait_for_work_to_be_finished(&harness.ctx)
        .await?;
    assert_eq!(harness.logger.events_named("reindex.job.scheduled").len(), 1);
    Ok(())
}

#[tokio::test]
async fn recovery_leaves_running_jobs_alone() -> TestResult {
    let foo = EntityTypeId::parse("Foo")?;
    let flaky = Arc::new(
        FlakySearchService::new(memory_search()).with_delay(foo.clone(), Duration::from_millis(50)),
    );
    let harness = Harness::new(flaky.clone(), settings())?;
    let (tx, metadata) = harness.transaction()?;
    let repository = metadata
        .create_repository(&harness.ctx, simple_type("Foo")?)
        .await?;
    for id in ["1", "2", "3"] {
        repository.add(&harness.ctx, row(id, &[])?).await?;
    }
    let job_id = harness.schedule(&tx).await?;
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(harness.scheduler.recover_pending(&harness.ctx).await?, 0);
    harness
        .scheduler
        .wait_for_work_to_be_finished(&harness.ctx)
        .await?;

    let mappings = flaky
        .calls()
        .iter()
        .filter(|call| call.operation == "create_mapping" && call.entity_type_id == foo)
        .count();
    assert_eq!(mappings, 1);
    assert_eq!(harness.logger.events_named("reindex.job.scheduled").len(), 1);
    assert_eq!(
        harness.store.job_status(&harness.ctx, job_id).await?,
        Some(JobState::Success)
    );
    assert!(harness.store.pending_jobs(&harness.ctx).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn finished_job_progress_is_bounded() -> TestResult {
    let bounded = SchedulerSettings {
        failed_queue_capacity: 2,
        ..settings()
    };
    let harness = Harness::new(memory_search(), bounded)?;
    let mut jobs = Vec::new();
    for id in ["TypeA", "TypeB", "TypeC", "TypeD", "TypeE"] {
        jobs.push(harness.create(id).await?);
        harness
            .scheduler
            .wait_for_work_to_be_finished(&harness.ctx)
            .await?;
    }

    let retained: Vec<bool> = jobs
        .iter()
        .map(|job_id| harness.scheduler.job_progress(job_id).is_some())
        .collect();
    assert_eq!(retained, vec![false, false, false, true, true]);
    Ok(())
}

#[tokio::test]
async fn jobs_scheduled_after_shutdown_stay_pending() -> TestResult {
    let harness = Harness::new(memory_search(), settings())?;
    harness.scheduler.shutdown().await;

    let (tx, metadata) = harness.transaction()?;
    metadata
        .create_repository(&harness.ctx, simple_type("Foo")?)
        .await?;
    let job = harness
        .register
        .commit(&harness.ctx, &tx)
        .await?
        .ok_or("job")?;
    let job_id = job.job_id().clone();

    assert!(harness.scheduler.schedule(&harness.ctx, job).await.is_err());
    assert!(harness.scheduler.is_idle());
    assert_eq!(harness.scheduler.queued_actions(), 0);
    assert!(harness.scheduler.job_progress(&job_id).is_none());
    harness
        .scheduler
        .wait_for_work_to_be_finished(&harness.ctx)
        .await?;

    let pending = harness.store.pending_jobs(&harness.ctx).await?;
    assert_eq!(pending.first().map(|job| job.job_id().clone()), Some(job_id.clone()));
    assert_eq!(
        harness.store.job_status(&harness.ctx, job_id).await?,
        Some(JobState::Pending)
    );
    assert_eq!(harness.logger.events_named("reindex.scheduler.rejected").len(), 1);
    Ok(())
}
