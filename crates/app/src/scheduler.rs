//! Index job scheduler.
//!
//! Each entity type owns a lane: a FIFO of queued actions with at most one
//! worker draining it. Lanes of different types run in parallel on a bounded
//! [`WorkerPool`], so a slow or failing type never holds up the others while
//! actions of one type are always applied in the order they were scheduled.

use crate::applier::{ApplyOutcome, IndexActionApplier};
use reindex_domain::{JobFailure, JobProgress, ReindexAction, ReindexError};
use reindex_ports::{
    ActionStatus, EntityTypeId, JobId, JobState, LogFields, LoggerPort, ReindexActionStorePort,
    ReindexJob, TelemetryPort, TelemetryTags,
};
use reindex_shared::{
    ErrorClass, ErrorCode, ErrorEnvelope, RequestContext, Result, RetryPolicy, WorkerPool,
    retry_async_with_observer, timeout_with_context,
};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;

/// Tunables of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Lanes running at the same time.
    pub worker_concurrency: usize,
    /// Deadline of the wait helpers.
    pub wait_timeout: Duration,
    /// Failed jobs kept for inspection, and finished jobs whose progress
    /// stays readable; the oldest are evicted first.
    pub failed_queue_capacity: usize,
    /// Whether a type deletion cancels that type's earlier queued data actions.
    pub cancel_data_on_delete: bool,
    /// Backoff for retriable index failures.
    pub retry: RetryPolicy,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            worker_concurrency: 4,
            wait_timeout: Duration::from_secs(60),
            failed_queue_capacity: 1000,
            cancel_data_on_delete: true,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 250,
                max_delay_ms: 5000,
                jitter_ratio_pct: 20,
            },
        }
    }
}

/// Collaborators of the scheduler.
#[derive(Clone)]
pub struct IndexJobSchedulerDeps {
    /// Applies actions to the search index.
    pub applier: IndexActionApplier,
    /// Outbox receiving status updates.
    pub store: Arc<dyn ReindexActionStorePort>,
    /// Structured logger.
    pub logger: Arc<dyn LoggerPort>,
    /// Metrics sink.
    pub telemetry: Arc<dyn TelemetryPort>,
}

#[derive(Debug, Clone)]
struct QueuedAction {
    job_id: JobId,
    action: ReindexAction,
}

#[derive(Debug, Default)]
struct Lane {
    queue: VecDeque<QueuedAction>,
    active: bool,
}

#[derive(Debug, Default)]
struct SchedulerState {
    lanes: BTreeMap<EntityTypeId, Lane>,
    jobs: HashMap<JobId, JobProgress>,
    failed: VecDeque<JobProgress>,
    finished: VecDeque<JobId>,
}

impl SchedulerState {
    fn queued(&self) -> usize {
        self.lanes.values().map(|lane| lane.queue.len()).sum()
    }

    /// Count one finished action; returns the progress when the job completed.
    fn advance(&mut self, job_id: &JobId, now_ms: u64) -> Option<JobProgress> {
        let progress = self.jobs.get_mut(job_id)?;
        if progress.state == JobState::Failed {
            return None;
        }
        progress.start(now_ms).ok()?;
        progress.advance();
        if progress.done < progress.total {
            return None;
        }
        progress.succeed(now_ms).ok()?;
        Some(progress.clone())
    }

    /// Returns true when the job is queued or running in this process.
    fn is_live(&self, job_id: &JobId) -> bool {
        self.jobs
            .get(job_id)
            .is_some_and(|progress| !progress.state.is_terminal())
    }

    fn live_jobs(&self) -> Vec<JobId> {
        self.jobs
            .values()
            .filter(|progress| !progress.state.is_terminal())
            .map(|progress| progress.job_id.clone())
            .collect()
    }

    /// Put back the progress a failed claim displaced.
    fn restore(&mut self, job_id: &JobId, previous: Option<JobProgress>) {
        match previous {
            Some(progress) => {
                self.jobs.insert(job_id.clone(), progress);
            },
            None => {
                self.jobs.remove(job_id);
            },
        }
    }

    /// Remember a finished job; progress of the oldest beyond `capacity` is dropped.
    fn retire(&mut self, job_id: &JobId, capacity: usize) {
        self.finished.retain(|finished| finished != job_id);
        self.finished.push_back(job_id.clone());
        while self.finished.len() > capacity {
            let Some(oldest) = self.finished.pop_front() else {
                break;
            };
            if !self.is_live(&oldest) {
                self.jobs.remove(&oldest);
            }
        }
    }
}

enum JobPhase {
    Started,
    Running,
    Failed,
}

struct SchedulerInner {
    deps: IndexJobSchedulerDeps,
    settings: SchedulerSettings,
    pool: WorkerPool,
    ctx: RequestContext,
    state: Mutex<SchedulerState>,
    changes: watch::Sender<u64>,
}

/// Applies committed jobs to the search index in the background.
#[derive(Clone)]
pub struct IndexJobScheduler {
    inner: Arc<SchedulerInner>,
}

impl IndexJobScheduler {
    /// Scheduler running at most `settings.worker_concurrency` lanes at once.
    pub fn new(deps: IndexJobSchedulerDeps, settings: SchedulerSettings) -> Result<Self> {
        let pool = WorkerPool::new(settings.worker_concurrency)?;
        let (changes, _) = watch::channel(0);
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                deps,
                settings,
                pool,
                ctx: RequestContext::new_request(),
                state: Mutex::new(SchedulerState::default()),
                changes,
            }),
        })
    }

    /// Configured tunables.
    pub fn settings(&self) -> SchedulerSettings {
        self.inner.settings
    }

    /// Claim `job` in the outbox and queue its actions.
    ///
    /// Returns immediately; false when the job was already claimed or is
    /// still running in this process.
    #[tracing::instrument(name = "reindex.schedule", skip_all, fields(job_id = %job.job_id(), actions = job.len()))]
    pub async fn schedule(&self, ctx: &RequestContext, job: ReindexJob) -> Result<bool> {
        ctx.ensure_not_cancelled("scheduler.schedule")?;
        let inner = &self.inner;
        let job_id = job.job_id().clone();
        let previous = {
            let mut state = inner.lock_state();
            if state.is_live(&job_id) {
                tracing::debug!("job already running");
                return Ok(false);
            }
            let total = u64::try_from(job.len()).unwrap_or(u64::MAX);
            state
                .jobs
                .insert(job_id.clone(), JobProgress::pending(job_id.clone(), total))
        };
        match inner.deps.store.claim_job(ctx, job_id.clone()).await {
            Ok(true) => {},
            Ok(false) => {
                inner.lock_state().restore(&job_id, previous);
                tracing::debug!("job already claimed");
                return Ok(false);
            },
            Err(error) => {
                inner.lock_state().restore(&job_id, previous);
                return Err(error);
            },
        }
        inner.deps.logger.info(
            "reindex.job.scheduled",
            "Reindex job scheduled",
            Some(job_fields(job.job_id(), job.len())),
        );
        self.enqueue(ctx, job).await?;
        Ok(true)
    }

    /// Requeue work left behind by a previous process and schedule it.
    pub async fn recover_pending(&self, ctx: &RequestContext) -> Result<usize> {
        let store = &self.inner.deps.store;
        let in_flight = self.inner.lock_state().live_jobs();
        let requeued = store.requeue_claimed(ctx, in_flight).await?;
        let mut scheduled = 0usize;
        for job in store.pending_jobs(ctx).await? {
            if self.schedule(ctx, job).await? {
                scheduled += 1;
            }
        }
        if scheduled > 0 || requeued > 0 {
            let mut fields = LogFields::new();
            fields.insert("jobs".into(), json!(scheduled));
            fields.insert("requeuedActions".into(), json!(requeued));
            self.inner
                .deps
                .logger
                .info("reindex.recovery.scheduled", "Recovered pending reindex jobs", Some(fields));
        }
        Ok(scheduled)
    }

    /// Block until no action is queued or running, for any type.
    pub async fn wait_for_work_to_be_finished(&self, ctx: &RequestContext) -> Result<()> {
        self.wait_until(ctx, "scheduler.wait_for_work_to_be_finished", |state| {
            state.lanes.is_empty()
        })
        .await
    }

    /// Block until no action of `entity_type_id` is queued or running.
    pub async fn wait_for_index_to_be_stable(
        &self,
        ctx: &RequestContext,
        entity_type_id: &EntityTypeId,
    ) -> Result<()> {
        let entity_type_id = entity_type_id.clone();
        self.wait_until(ctx, "scheduler.wait_for_index_to_be_stable", move |state| {
            !state.lanes.contains_key(&entity_type_id)
        })
        .await
    }

    /// Progress of a job scheduled by this process.
    pub fn job_progress(&self, job_id: &JobId) -> Option<JobProgress> {
        self.inner.lock_state().jobs.get(job_id).cloned()
    }

    /// Failed jobs, oldest first.
    pub fn failed_jobs(&self) -> Vec<JobProgress> {
        self.inner.lock_state().failed.iter().cloned().collect()
    }

    /// Actions waiting in any lane.
    pub fn queued_actions(&self) -> usize {
        self.inner.lock_state().queued()
    }

    /// Returns true when nothing is queued or running.
    pub fn is_idle(&self) -> bool {
        self.inner.lock_state().lanes.is_empty()
    }

    /// Queue the unfinished actions of a failed job again.
    ///
    /// Returns false when the job is not in the failed queue.
    pub async fn reschedule_failed(&self, ctx: &RequestContext, job_id: &JobId) -> Result<bool> {
        ctx.ensure_not_cancelled("scheduler.reschedule_failed")?;
        let failed = {
            let mut state = self.inner.lock_state();
            let position = state
                .failed
                .iter()
                .position(|progress| &progress.job_id == job_id);
            let Some(failed) = position.and_then(|index| state.failed.remove(index)) else {
                return Ok(false);
            };
            // Live from here on, so recovery leaves its claimed actions alone.
            state
                .jobs
                .insert(job_id.clone(), JobProgress::pending(job_id.clone(), 0));
            failed
        };

        let reclaimed = self.reclaim_failed(ctx, job_id).await;
        let actions = match reclaimed {
            Ok(actions) => actions,
            Err(error) => {
                let mut state = self.inner.lock_state();
                state.jobs.insert(job_id.clone(), failed.clone());
                state.failed.push_front(failed);
                return Err(error);
            },
        };
        let job = ReindexJob::new(job_id.clone(), actions)?;
        self.inner.deps.logger.info(
            "reindex.job.rescheduled",
            "Failed reindex job rescheduled",
            Some(job_fields(job.job_id(), job.len())),
        );
        self.enqueue(ctx, job).await?;
        Ok(true)
    }

    /// Stop accepting work and wait for running lanes to drain.
    pub async fn shutdown(&self) {
        self.inner.pool.shutdown().await;
    }

    /// Claim the unfinished actions of a failed job again.
    async fn reclaim_failed(&self, ctx: &RequestContext, job_id: &JobId) -> Result<Vec<ReindexAction>> {
        let store = &self.inner.deps.store;
        let actions: Vec<ReindexAction> = store
            .records(ctx, Some(job_id.clone()))
            .await?
            .into_iter()
            .filter(|record| !matches!(record.status, ActionStatus::Done | ActionStatus::Cancelled))
            .map(|record| record.action)
            .collect();
        for action in &actions {
            store
                .set_action_status(ctx, job_id.clone(), action.action_order, ActionStatus::Claimed)
                .await?;
        }
        store
            .set_job_status(ctx, job_id.clone(), JobState::Pending)
            .await?;
        Ok(actions)
    }

    async fn enqueue(&self, ctx: &RequestContext, job: ReindexJob) -> Result<()> {
        let inner = &self.inner;
        let job_id = job.job_id().clone();
        let total = u64::try_from(job.len()).unwrap_or(u64::MAX);
        let mut cancelled = Vec::new();
        let mut completed = Vec::new();
        let mut to_start = Vec::new();
        {
            let mut state = inner.lock_state();
            state
                .jobs
                .insert(job_id.clone(), JobProgress::pending(job_id.clone(), total));
            if job.is_empty() {
                completed.extend(state.advance(&job_id, now_ms()));
            }

            for action in job.into_actions() {
                let entity_type_id = action.entity_type_id.clone();
                let lane = state.lanes.entry(entity_type_id.clone()).or_default();
                if inner.settings.cancel_data_on_delete && action.is_type_deletion() {
                    let (dropped, kept): (VecDeque<_>, VecDeque<_>) = lane
                        .queue
                        .drain(..)
                        .partition(|queued| !queued.action.is_metadata());
                    lane.queue = kept;
                    cancelled.extend(dropped);
                }
                lane.queue.push_back(QueuedAction {
                    job_id: job_id.clone(),
                    action,
                });
                if !lane.active {
                    lane.active = true;
                    to_start.push(entity_type_id);
                }
            }

            let now = now_ms();
            for queued in &cancelled {
                completed.extend(state.advance(&queued.job_id, now));
            }
            inner.record_queue_depth(&state);
        }

        for queued in cancelled {
            inner.action_cancelled(ctx, queued).await;
        }
        for progress in completed {
            inner.job_succeeded(ctx, &progress).await;
        }
        for (index, entity_type_id) in to_start.iter().enumerate() {
            if let Err(error) = inner.start_lane(entity_type_id.clone()) {
                let stranded = to_start.get(index..).unwrap_or_default();
                inner.release_lanes(ctx, stranded).await;
                inner.notify();
                return Err(error);
            }
        }
        inner.notify();
        Ok(())
    }

    async fn wait_until<F>(&self, ctx: &RequestContext, operation: &'static str, done: F) -> Result<()>
    where
        F: Fn(&SchedulerState) -> bool + Send + Sync,
    {
        let timeout = self.inner.settings.wait_timeout;
        let mut changes = self.inner.changes.subscribe();
        let waited = timeout_with_context(ctx, timeout, operation, async {
            loop {
                let finished = done(&self.inner.lock_state());
                if finished {
                    return Ok(());
                }
                changes.changed().await.map_err(|_| {
                    ErrorEnvelope::unexpected(
                        ErrorCode::internal(),
                        "scheduler dropped while waiting",
                        ErrorClass::NonRetriable,
                    )
                })?;
            }
        })
        .await;

        waited.map_err(|error| {
            if error.code == ErrorCode::timeout() {
                ReindexError::Timeout {
                    operation,
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }
                .into()
            } else {
                error
            }
        })
    }
}

impl SchedulerInner {
    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.changes.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    fn record_queue_depth(&self, state: &SchedulerState) {
        let depth = u64::try_from(state.queued()).unwrap_or(u64::MAX);
        self.deps
            .telemetry
            .record_gauge("reindex.queue.depth", depth, None);
    }

    fn start_lane(self: &Arc<Self>, entity_type_id: EntityTypeId) -> Result<()> {
        let inner = Arc::clone(self);
        self.pool.spawn(run_lane(inner, entity_type_id))
    }

    /// Drop lanes no worker will ever drain and hand their jobs back to the
    /// outbox as `PENDING`, so the next recovery picks them up.
    async fn release_lanes(&self, ctx: &RequestContext, stranded: &[EntityTypeId]) {
        let (released, jobs) = {
            let mut state = self.lock_state();
            let mut released = Vec::new();
            for entity_type_id in stranded {
                if let Some(lane) = state.lanes.remove(entity_type_id) {
                    released.extend(lane.queue);
                }
            }
            let jobs: BTreeSet<JobId> = released.iter().map(|queued| queued.job_id.clone()).collect();
            for lane in state.lanes.values_mut() {
                let (mine, others): (VecDeque<_>, VecDeque<_>) = lane
                    .queue
                    .drain(..)
                    .partition(|queued| jobs.contains(&queued.job_id));
                lane.queue = others;
                released.extend(mine);
            }
            for job_id in &jobs {
                if state.is_live(job_id) {
                    state.jobs.remove(job_id);
                }
            }
            self.record_queue_depth(&state);
            (released, jobs)
        };

        for queued in &released {
            self.update_action(ctx, &queued.job_id, &queued.action, ActionStatus::Pending)
                .await;
        }
        for job_id in &jobs {
            self.update_job(ctx, job_id, JobState::Pending).await;
        }
        tracing::warn!(jobs = jobs.len(), actions = released.len(), "worker pool closed; jobs left pending");
        let mut fields = LogFields::new();
        fields.insert("jobs".into(), json!(jobs.len()));
        fields.insert("releasedActions".into(), json!(released.len()));
        self.deps.logger.warn(
            "reindex.scheduler.rejected",
            "Worker pool closed; reindex jobs left pending",
            Some(fields),
        );
    }

    fn mark_running(&self, job_id: &JobId) -> JobPhase {
        let mut state = self.lock_state();
        let Some(progress) = state.jobs.get_mut(job_id) else {
            return JobPhase::Running;
        };
        match progress.state {
            JobState::Failed => JobPhase::Failed,
            JobState::Pending => match progress.start(now_ms()) {
                Ok(()) => JobPhase::Started,
                Err(_) => JobPhase::Running,
            },
            JobState::Running | JobState::Success => JobPhase::Running,
        }
    }

    async fn process(&self, queued: QueuedAction) {
        let QueuedAction { job_id, action } = queued;
        let ctx = &self.ctx;

        match self.mark_running(&job_id) {
            JobPhase::Failed => {
                self.update_action(ctx, &job_id, &action, ActionStatus::Failed)
                    .await;
                return;
            },
            JobPhase::Started => {
                self.update_job(ctx, &job_id, JobState::Running).await;
                self.deps.logger.debug(
                    "reindex.job.started",
                    "Reindex job started",
                    Some(job_fields(&job_id, 0)),
                );
            },
            JobPhase::Running => {},
        }

        tracing::debug!(job_id = %job_id, action = %action, "applying reindex action");
        let tags = entity_tags(&action.entity_type_id);
        let timer = self
            .deps
            .telemetry
            .start_timer("reindex.action.apply_ms", Some(&tags));
        let applier = &self.deps.applier;
        let action_ref = &action;
        let mut apply = || applier.apply(ctx, action_ref);
        let result = retry_async_with_observer(
            ctx,
            self.settings.retry,
            "reindex.apply_action",
            &mut apply,
            |attempt, error, delay| {
                tracing::warn!(attempt, delay_ms = %delay.as_millis(), error = %error, "retrying reindex action");
                let mut fields = action_fields(&job_id, action_ref);
                fields.insert("attempt".into(), json!(attempt));
                fields.insert("delayMs".into(), json!(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)));
                fields.insert("errorCode".into(), json!(error.code.to_string()));
                self.deps
                    .logger
                    .warn("reindex.action.retry", "Retrying reindex action", Some(fields));
                self.deps
                    .telemetry
                    .increment_counter("reindex.actions.retried", 1, Some(&tags));
            },
        )
        .await;
        timer.stop();

        match result {
            Ok(outcome) => {
                let counter = match outcome {
                    ApplyOutcome::Applied => "reindex.actions.applied",
                    ApplyOutcome::Skipped => "reindex.actions.skipped",
                };
                self.deps.telemetry.increment_counter(counter, 1, Some(&tags));
                self.update_action(ctx, &job_id, &action, ActionStatus::Done)
                    .await;
                let completed = self.lock_state().advance(&job_id, now_ms());
                if let Some(progress) = completed {
                    self.job_succeeded(ctx, &progress).await;
                }
            },
            Err(error) => self.job_failed(ctx, job_id, action, error).await,
        }
    }

    async fn job_succeeded(&self, ctx: &RequestContext, progress: &JobProgress) {
        self.lock_state()
            .retire(&progress.job_id, self.settings.failed_queue_capacity);
        self.update_job(ctx, &progress.job_id, JobState::Success)
            .await;
        let mut fields = job_fields(&progress.job_id, 0);
        fields.insert("actions".into(), json!(progress.total));
        if let Some(running_ms) = progress.running_time_ms(now_ms()) {
            fields.insert("runningTimeMs".into(), json!(running_ms));
        }
        self.deps
            .logger
            .info("reindex.job.succeeded", "Reindex job finished", Some(fields));
        self.deps
            .telemetry
            .increment_counter("reindex.jobs.succeeded", 1, None);
    }

    async fn job_failed(
        &self,
        ctx: &RequestContext,
        job_id: JobId,
        action: ReindexAction,
        error: ErrorEnvelope,
    ) {
        let dropped = {
            let mut state = self.lock_state();
            let failure = JobFailure {
                entity_type_id: action.entity_type_id.clone(),
                action: action.clone(),
                error: error.clone(),
            };
            let Some(progress) = state.jobs.get_mut(&job_id) else {
                return;
            };
            let first_failure = progress.fail(now_ms(), failure).is_ok();
            let snapshot = progress.clone();

            let mut dropped = Vec::new();
            if first_failure {
                for lane in state.lanes.values_mut() {
                    let (mine, others): (VecDeque<_>, VecDeque<_>) = lane
                        .queue
                        .drain(..)
                        .partition(|queued| queued.job_id == job_id);
                    lane.queue = others;
                    dropped.extend(mine);
                }
                state.failed.push_back(snapshot);
                while state.failed.len() > self.settings.failed_queue_capacity {
                    state.failed.pop_front();
                }
                state.retire(&job_id, self.settings.failed_queue_capacity);
                self.record_queue_depth(&state);
            }
            first_failure.then_some(dropped)
        };

        self.update_action(ctx, &job_id, &action, ActionStatus::Failed)
            .await;
        let Some(dropped) = dropped else {
            return;
        };
        for queued in &dropped {
            self.update_action(ctx, &job_id, &queued.action, ActionStatus::Failed)
                .await;
        }
        self.update_job(ctx, &job_id, JobState::Failed).await;

        tracing::error!(job_id = %job_id, action = %action, error = %error, "reindex job failed");
        let mut fields = action_fields(&job_id, &action);
        fields.insert("abandonedActions".into(), json!(dropped.len()));
        if let Some(attempts) = error.metadata_value("attempts") {
            fields.insert("attempts".into(), json!(attempts));
        }
        self.deps.logger.error(
            "reindex.job.failed",
            "Reindex job failed",
            Some(fields),
            &error,
        );
        self.deps
            .telemetry
            .increment_counter("reindex.jobs.failed", 1, Some(&entity_tags(&action.entity_type_id)));
    }

    async fn action_cancelled(&self, ctx: &RequestContext, queued: QueuedAction) {
        self.update_action(ctx, &queued.job_id, &queued.action, ActionStatus::Cancelled)
            .await;
        self.deps.logger.debug(
            "reindex.action.cancelled",
            "Data action cancelled by entity type deletion",
            Some(action_fields(&queued.job_id, &queued.action)),
        );
        self.deps.telemetry.increment_counter(
            "reindex.actions.cancelled",
            1,
            Some(&entity_tags(&queued.action.entity_type_id)),
        );
    }

    async fn update_action(
        &self,
        ctx: &RequestContext,
        job_id: &JobId,
        action: &ReindexAction,
        status: ActionStatus,
    ) {
        let result = self
            .deps
            .store
            .set_action_status(ctx, job_id.clone(), action.action_order, status)
            .await;
        if let Err(error) = result {
            self.deps.logger.error(
                "reindex.outbox.update_failed",
                "Could not record action status",
                Some(action_fields(job_id, action)),
                &error,
            );
        }
    }

    async fn update_job(&self, ctx: &RequestContext, job_id: &JobId, state: JobState) {
        let result = self
            .deps
            .store
            .set_job_status(ctx, job_id.clone(), state)
            .await;
        if let Err(error) = result {
            self.deps.logger.error(
                "reindex.outbox.update_failed",
                "Could not record job state",
                Some(job_fields(job_id, 0)),
                &error,
            );
        }
    }
}

async fn run_lane(inner: Arc<SchedulerInner>, entity_type_id: EntityTypeId) {
    loop {
        let next = {
            let mut state = inner.lock_state();
            let next = state
                .lanes
                .get_mut(&entity_type_id)
                .and_then(|lane| lane.queue.pop_front());
            if next.is_none() {
                state.lanes.remove(&entity_type_id);
            }
            inner.record_queue_depth(&state);
            next
        };
        let Some(queued) = next else {
            inner.notify();
            return;
        };
        inner.process(queued).await;
        inner.notify();
    }
}

fn job_fields(job_id: &JobId, actions: usize) -> LogFields {
    let mut fields = LogFields::new();
    fields.insert("jobId".into(), json!(job_id.as_str()));
    if actions > 0 {
        fields.insert("actions".into(), json!(actions));
    }
    fields
}

fn action_fields(job_id: &JobId, action: &ReindexAction) -> LogFields {
    let mut fields = job_fields(job_id, 0);
    fields.insert("entityTypeId".into(), json!(action.entity_type_id.as_str()));
    fields.insert("cudType".into(), json!(action.cud_type.as_str()));
    fields.insert("dataType".into(), json!(action.data_type.as_str()));
    fields.insert("actionOrder".into(), json!(action.action_order));
    if let Some(entity_id) = &action.entity_id {
        fields.insert("entityId".into(), json!(entity_id.as_str()));
    }
    fields
}

fn entity_tags(entity_type_id: &EntityTypeId) -> TelemetryTags {
    let mut tags = TelemetryTags::new();
    tags.insert("entityType".into(), entity_type_id.as_str().into());
    tags
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}
