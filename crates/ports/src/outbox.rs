//! Durable pending-action store (transactional outbox).
//!
//! Schema: `(jobId, entityTypeId, cudType, dataType, entityId, actionOrder, status)`.

use crate::BoxFuture;
use reindex_domain::{ActionStatus, JobId, JobState, ReindexActionRecord, ReindexJob};
use reindex_shared::{RequestContext, Result};

/// Boundary contract for the outbox.
pub trait ReindexActionStorePort: Send + Sync {
    /// Provider name, for logs.
    fn provider(&self) -> &str;

    /// Persist every action of `job` as `PENDING`, all or nothing.
    ///
    /// Fails with `core:conflict` when the job id is already stored.
    fn append_job(&self, ctx: &RequestContext, job: ReindexJob) -> BoxFuture<'_, Result<()>>;

    /// Move the job's `PENDING` actions to `CLAIMED`.
    ///
    /// Returns false when nothing was pending, so a job is claimed at most once.
    fn claim_job(&self, ctx: &RequestContext, job_id: JobId) -> BoxFuture<'_, Result<bool>>;

    /// Move `CLAIMED` actions back to `PENDING`; returns rows changed.
    ///
    /// Actions of the jobs in `in_flight` stay claimed: their owner is still
    /// running them.
    fn requeue_claimed(
        &self,
        ctx: &RequestContext,
        in_flight: Vec<JobId>,
    ) -> BoxFuture<'_, Result<u64>>;

    /// Update the status of one action.
    fn set_action_status(
        &self,
        ctx: &RequestContext,
        job_id: JobId,
        action_order: u64,
        status: ActionStatus,
    ) -> BoxFuture<'_, Result<()>>;

    /// Record the lifecycle state of a job.
    ///
    /// Fails with `core:not_found` when the job was never appended.
    fn set_job_status(
        &self,
        ctx: &RequestContext,
        job_id: JobId,
        state: JobState,
    ) -> BoxFuture<'_, Result<()>>;

    /// Last recorded lifecycle state of a job.
    fn job_status(
        &self,
        ctx: &RequestContext,
        job_id: JobId,
    ) -> BoxFuture<'_, Result<Option<JobState>>>;

    /// Jobs with at least one `PENDING` action, oldest first, pending actions only.
    fn pending_jobs(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<Vec<ReindexJob>>>;

    /// Stored records, optionally restricted to one job.
    fn records(
        &self,
        ctx: &RequestContext,
        job_id: Option<JobId>,
    ) -> BoxFuture<'_, Result<Vec<ReindexActionRecord>>>;

    /// Delete jobs whose actions are all `DONE` or `CANCELLED`; returns rows removed.
    fn purge_completed(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<u64>>;
}
