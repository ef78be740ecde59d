//! Volatile outbox used by tests and single-process deployments.

use reindex_ports::{
    ActionStatus, BoxFuture, JobId, JobState, ReindexActionRecord, ReindexActionStorePort,
    ReindexJob,
};
use reindex_shared::{ErrorCode, ErrorEnvelope, RequestContext, Result};
use std::sync::Arc;
use tokio::sync::Mutex;

const PROVIDER: &str = "memory";

#[derive(Debug)]
struct StoredJob {
    job_id: JobId,
    state: JobState,
    records: Vec<ReindexActionRecord>,
}

impl StoredJob {
    fn is_complete(&self) -> bool {
        self.records
            .iter()
            .all(|record| matches!(record.status, ActionStatus::Done | ActionStatus::Cancelled))
    }
}

/// Outbox keeping jobs in append order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReindexActionStore {
    jobs: Arc<Mutex<Vec<StoredJob>>>,
}

impl InMemoryReindexActionStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReindexActionStorePort for InMemoryReindexActionStore {
    fn provider(&self) -> &str {
        PROVIDER
    }

    fn append_job(&self, ctx: &RequestContext, job: ReindexJob) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("outbox.append_job")?;
            let mut jobs = self.jobs.lock().await;
            if jobs.iter().any(|stored| &stored.job_id == job.job_id()) {
                return Err(ErrorEnvelope::expected(
                    ErrorCode::conflict(),
                    format!("job {} already stored", job.job_id()),
                )
                .with_metadata("jobId", job.job_id().as_str()));
            }
            let job_id = job.job_id().clone();
            let records = job
                .into_actions()
                .into_iter()
                .map(|action| ReindexActionRecord {
                    job_id: job_id.clone(),
                    action,
                    status: ActionStatus::Pending,
                })
                .collect();
            jobs.push(StoredJob {
                job_id,
                state: JobState::Pending,
                records,
            });
            Ok(())
        })
    }

    fn claim_job(&self, ctx: &RequestContext, job_id: JobId) -> BoxFuture<'_, Result<bool>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("outbox.claim_job")?;
            let mut jobs = self.jobs.lock().await;
            let mut claimed = false;
            for record in jobs
                .iter_mut()
                .filter(|stored| stored.job_id == job_id)
                .flat_map(|stored| stored.records.iter_mut())
                .filter(|record| record.status == ActionStatus::Pending)
            {
                record.status = ActionStatus::Claimed;
                claimed = true;
            }
            Ok(claimed)
        })
    }

    fn requeue_claimed(
        &self,
        ctx: &RequestContext,
        in_flight: Vec<JobId>,
    ) -> BoxFuture<'_, Result<u64>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("outbox.requeue_claimed")?;
            let mut jobs = self.jobs.lock().await;
            let mut changed = 0u64;
            for record in jobs
                .iter_mut()
                .filter(|stored| !in_flight.contains(&stored.job_id))
                .flat_map(|stored| stored.records.iter_mut())
                .filter(|record| record.status == ActionStatus::Claimed)
            {
                record.status = ActionStatus::Pending;
                changed += 1;
            }
            Ok(changed)
        })
    }

    fn set_action_status(
        &self,
        ctx: &RequestContext,
        job_id: JobId,
        action_order: u64,
        status: ActionStatus,
    ) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("outbox.set_action_status")?;
            let mut jobs = self.jobs.lock().await;
            let record = jobs
                .iter_mut()
                .filter(|stored| stored.job_id == job_id)
                .flat_map(|stored| stored.records.iter_mut())
                .find(|record| record.action.action_order == action_order)
                .ok_or_else(|| {
                    ErrorEnvelope::expected(
                        ErrorCode::not_found(),
                        format!("job {job_id} has no action #{action_order}"),
                    )
                    .with_metadata("jobId", job_id.as_str())
                    .with_metadata("actionOrder", action_order.to_string())
                })?;
            record.status = status;
            Ok(())
        })
    }

    fn set_job_status(
        &self,
        ctx: &RequestContext,
        job_id: JobId,
        state: JobState,
    ) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("outbox.set_job_status")?;
            let mut jobs = self.jobs.lock().await;
            let stored = jobs
                .iter_mut()
                .find(|stored| stored.job_id == job_id)
                .ok_or_else(|| job_not_found(&job_id))?;
            stored.state = state;
            Ok(())
        })
    }

    fn job_status(
        &self,
        ctx: &RequestContext,
        job_id: JobId,
    ) -> BoxFuture<'_, Result<Option<JobState>>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("outbox.job_status")?;
            let jobs = self.jobs.lock().await;
            Ok(jobs
                .iter()
                .find(|stored| stored.job_id == job_id)
                .map(|stored| stored.state))
        })
    }

    fn pending_jobs(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<Vec<ReindexJob>>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("outbox.pending_jobs")?;
            let jobs = self.jobs.lock().await;
            let mut pending = Vec::new();
            for stored in jobs.iter() {
                let actions: Vec<_> = stored
                    .records
                    .iter()
                    .filter(|record| record.status == ActionStatus::Pending)
                    .map(|record| record.action.clone())
                    .collect();
                if !actions.is_empty() {
                    pending.push(ReindexJob::new(stored.job_id.clone(), actions)?);
                }
            }
            Ok(pending)
        })
    }

    fn records(
        &self,
        ctx: &RequestContext,
        job_id: Option<JobId>,
    ) -> BoxFuture<'_, Result<Vec<ReindexActionRecord>>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("outbox.records")?;
            let jobs = self.jobs.lock().await;
            Ok(jobs
                .iter()
                .filter(|stored| job_id.as_ref().is_none_or(|id| &stored.job_id == id))
                .flat_map(|stored| stored.records.iter().cloned())
                .collect())
        })
    }

    fn purge_completed(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<u64>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("outbox.purge_completed")?;
            let mut jobs = self.jobs.lock().await;
            let mut removed = 0usize;
            jobs.retain(|stored| {
                if stored.is_complete() {
                    removed += stored.records.len();
                    false
                } else {
                    true
                }
            });
            Ok(u64::try_from(removed).unwrap_or(u64::MAX))
        })
    }
}

pub(super) fn job_not_found(job_id: &JobId) -> ErrorEnvelope {
    ErrorEnvelope::expected(ErrorCode::not_found(), format!("job {job_id} was never stored"))
        .with_metadata("jobId", job_id.as_str())
}
