//! Durable outbox backed by a SQLite file.
//!
//! Each call opens its own connection on the blocking pool; WAL mode plus a
//! busy timeout lets scheduler workers update statuses concurrently.

use super::OutboxStoreError;
use super::memory::job_not_found;
use reindex_domain::{CudType, DataType, ReindexAction};
use reindex_ports::{
    ActionStatus, BoxFuture, EntityId, EntityTypeId, JobId, JobState, ReindexActionRecord,
    ReindexActionStorePort, ReindexJob,
};
use reindex_shared::{ErrorCode, ErrorEnvelope, RequestContext, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::spawn_blocking;

const PROVIDER: &str = "sqlite";
const SCHEMA_VERSION: i64 = 1;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const RECORD_COLUMNS: &str =
    "a.job_id, a.entity_type_id, a.cud_type, a.data_type, a.entity_id, a.action_order, a.status";

/// Outbox persisted in the `reindex_action` and `reindex_job` tables.
#[derive(Debug, Clone)]
pub struct SqliteReindexActionStore {
    path: PathBuf,
}

impl SqliteReindexActionStore {
    /// Store at `path`; the file and its parent directory are created on first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Database file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        let value = spawn_blocking(move || {
            let mut conn = open_connection(&path)?;
            op(&mut conn)
        })
        .await
        .map_err(OutboxStoreError::from)??;
        Ok(value)
    }
}

impl ReindexActionStorePort for SqliteReindexActionStore {
    fn provider(&self) -> &str {
        PROVIDER
    }

    fn append_job(&self, ctx: &RequestContext, job: ReindexJob) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("outbox.append_job")?;
            self.run(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(OutboxStoreError::sqlite("begin"))?;
                let exists = tx
                    .query_row(
                        "SELECT 1 FROM reindex_job WHERE job_id = ?1",
                        [job.job_id().as_str()],
                        |_| Ok(()),
                    )
                    .optional()
                    .map_err(OutboxStoreError::sqlite("append_job"))?
                    .is_some();
                if exists {
                    return Err(ErrorEnvelope::expected(
                        ErrorCode::conflict(),
                        format!("job {} already stored", job.job_id()),
                    )
                    .with_metadata("jobId", job.job_id().as_str()));
                }

                tx.execute(
                    "INSERT INTO reindex_job (job_id, state) VALUES (?1, ?2)",
                    params![job.job_id().as_str(), JobState::Pending.as_str()],
                )
                .map_err(OutboxStoreError::sqlite("append_job"))?;
                {
                    let mut insert = tx
                        .prepare(
                            "INSERT INTO reindex_action (job_id, entity_type_id, cud_type, data_type, entity_id, action_order, status) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        )
                        .map_err(OutboxStoreError::sqlite("append_job"))?;
                    for action in job.actions() {
                        let action_order = sql_order(action.action_order)?;
                        insert
                            .execute(params![
                                job.job_id().as_str(),
                                action.entity_type_id.as_str(),
                                action.cud_type.as_str(),
                                action.data_type.as_str(),
                                action.entity_id.as_ref().map(EntityId::as_str),
                                action_order,
                                ActionStatus::Pending.as_str(),
                            ])
                            .map_err(OutboxStoreError::sqlite("append_job"))?;
                    }
                }
                tx.commit().map_err(OutboxStoreError::sqlite("commit"))?;
                Ok(())
            })
            .await
        })
    }

    fn claim_job(&self, ctx: &RequestContext, job_id: JobId) -> BoxFuture<'_, Result<bool>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("outbox.claim_job")?;
            self.run(move |conn| {
                let changed = conn
                    .execute(
                        "UPDATE reindex_action SET status = ?1 WHERE job_id = ?2 AND status = ?3",
                        params![
                            ActionStatus::Claimed.as_str(),
                            job_id.as_str(),
                            ActionStatus::Pending.as_str()
                        ],
                    )
                    .map_err(OutboxStoreError::sqlite("claim_job"))?;
                Ok(changed > 0)
            })
            .await
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
            self.run(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(OutboxStoreError::sqlite("begin"))?;
                let claimed: Vec<String> = {
                    let mut statement = tx
                        .prepare("SELECT DISTINCT job_id FROM reindex_action WHERE status = ?1")
                        .map_err(OutboxStoreError::sqlite("requeue_claimed"))?;
                    let rows = statement
                        .query_map(params![ActionStatus::Claimed.as_str()], |row| row.get(0))
                        .map_err(OutboxStoreError::sqlite("requeue_claimed"))?;
                    rows.collect::<std::result::Result<_, _>>()
                        .map_err(OutboxStoreError::sqlite("requeue_claimed"))?
                };
                let mut changed = 0usize;
                for job_id in claimed
                    .iter()
                    .filter(|job_id| !in_flight.iter().any(|live| live.as_str() == job_id.as_str()))
                {
                    changed += tx
                        .execute(
                            "UPDATE reindex_action SET status = ?1 WHERE job_id = ?2 AND status = ?3",
                            params![
                                ActionStatus::Pending.as_str(),
                                job_id,
                                ActionStatus::Claimed.as_str()
                            ],
                        )
                        .map_err(OutboxStoreError::sqlite("requeue_claimed"))?;
                }
                tx.commit().map_err(OutboxStoreError::sqlite("requeue_claimed"))?;
                Ok(u64::try_from(changed).unwrap_or(u64::MAX))
            })
            .await
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
            self.run(move |conn| {
                let changed = conn
                    .execute(
                        "UPDATE reindex_action SET status = ?1 WHERE job_id = ?2 AND action_order = ?3",
                        params![status.as_str(), job_id.as_str(), sql_order(action_order)?],
                    )
                    .map_err(OutboxStoreError::sqlite("set_action_status"))?;
                if changed == 0 {
                    return Err(ErrorEnvelope::expected(
                        ErrorCode::not_found(),
                        format!("job {job_id} has no action #{action_order}"),
                    )
                    .with_metadata("jobId", job_id.as_str())
                    .with_metadata("actionOrder", action_order.to_string()));
                }
                Ok(())
            })
            .await
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
            self.run(move |conn| {
                let changed = conn
                    .execute(
                        "UPDATE reindex_job SET state = ?1 WHERE job_id = ?2",
                        params![state.as_str(), job_id.as_str()],
                    )
                    .map_err(OutboxStoreError::sqlite("set_job_status"))?;
                if changed == 0 {
                    return Err(job_not_found(&job_id));
                }
                Ok(())
            })
            .await
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
            self.run(move |conn| {
                let state: Option<String> = conn
                    .query_row(
                        "SELECT state FROM reindex_job WHERE job_id = ?1",
                        [job_id.as_str()],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(OutboxStoreError::sqlite("job_status"))?;
                state
                    .map(|state| JobState::parse(&state).map_err(corrupt))
                    .transpose()
                    .map_err(ErrorEnvelope::from)
            })
            .await
        })
    }

    fn pending_jobs(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<Vec<ReindexJob>>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("outbox.pending_jobs")?;
            self.run(move |conn| {
                let sql = format!(
                    "SELECT {RECORD_COLUMNS} FROM reindex_action a JOIN reindex_job j ON j.job_id = a.job_id WHERE a.status = ?1 ORDER BY j.seq, a.action_order"
                );
                let records = query_records(conn, &sql, [ActionStatus::Pending.as_str()])?;

                let mut order: Vec<JobId> = Vec::new();
                let mut grouped: BTreeMap<JobId, Vec<ReindexAction>> = BTreeMap::new();
                for record in records {
                    if !grouped.contains_key(&record.job_id) {
                        order.push(record.job_id.clone());
                    }
                    grouped.entry(record.job_id).or_default().push(record.action);
                }
                let mut jobs = Vec::with_capacity(order.len());
                for job_id in order {
                    let actions = grouped.remove(&job_id).unwrap_or_default();
                    jobs.push(ReindexJob::new(job_id, actions)?);
                }
                Ok(jobs)
            })
            .await
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
            self.run(move |conn| {
                let base = format!(
                    "SELECT {RECORD_COLUMNS} FROM reindex_action a JOIN reindex_job j ON j.job_id = a.job_id"
                );
                let records = match job_id {
                    Some(job_id) => query_records(
                        conn,
                        &format!("{base} WHERE a.job_id = ?1 ORDER BY a.action_order"),
                        [job_id.as_str()],
                    )?,
                    None => query_records(conn, &format!("{base} ORDER BY j.seq, a.action_order"), [])?,
                };
                Ok(records)
            })
            .await
        })
    }

    fn purge_completed(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<u64>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("outbox.purge_completed")?;
            self.run(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(OutboxStoreError::sqlite("begin"))?;
                let open = "SELECT job_id FROM reindex_action WHERE status NOT IN (?1, ?2)";
                let removed = tx
                    .execute(
                        &format!("DELETE FROM reindex_action WHERE job_id NOT IN ({open})"),
                        params![ActionStatus::Done.as_str(), ActionStatus::Cancelled.as_str()],
                    )
                    .map_err(OutboxStoreError::sqlite("purge_completed"))?;
                tx.execute(
                    "DELETE FROM reindex_job WHERE job_id NOT IN (SELECT job_id FROM reindex_action)",
                    [],
                )
                .map_err(OutboxStoreError::sqlite("purge_completed"))?;
                tx.commit().map_err(OutboxStoreError::sqlite("commit"))?;
                Ok(u64::try_from(removed).unwrap_or(u64::MAX))
            })
            .await
        })
    }
}

fn query_records<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> std::result::Result<Vec<ReindexActionRecord>, OutboxStoreError> {
    let mut statement = conn
        .prepare(sql)
        .map_err(OutboxStoreError::sqlite("query"))?;
    let rows = statement
        .query_map(params, RawRecord::from_row)
        .map_err(OutboxStoreError::sqlite("query"))?;
    let mut records = Vec::new();
    for row in rows {
        let raw = row.map_err(OutboxStoreError::sqlite("query"))?;
        records.push(raw.decode()?);
    }
    Ok(records)
}

struct RawRecord {
    job_id: String,
    entity_type_id: String,
    cud_type: String,
    data_type: String,
    entity_id: Option<String>,
    action_order: i64,
    status: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            job_id: row.get(0)?,
            entity_type_id: row.get(1)?,
            cud_type: row.get(2)?,
            data_type: row.get(3)?,
            entity_id: row.get(4)?,
            action_order: row.get(5)?,
            status: row.get(6)?,
        })
    }

    fn decode(self) -> std::result::Result<ReindexActionRecord, OutboxStoreError> {
        let entity_id = self
            .entity_id
            .map(EntityId::parse)
            .transpose()
            .map_err(corrupt)?;
        Ok(ReindexActionRecord {
            job_id: JobId::parse(&self.job_id).map_err(corrupt)?,
            action: ReindexAction {
                entity_type_id: EntityTypeId::parse(&self.entity_type_id).map_err(corrupt)?,
                cud_type: CudType::parse(&self.cud_type).map_err(corrupt)?,
                data_type: DataType::parse(&self.data_type).map_err(corrupt)?,
                entity_id,
                action_order: u64::try_from(self.action_order).map_err(corrupt)?,
            },
            status: ActionStatus::parse(&self.status).map_err(corrupt)?,
        })
    }
}

/// SQLite integers are signed.
fn sql_order(action_order: u64) -> std::result::Result<i64, OutboxStoreError> {
    i64::try_from(action_order).map_err(corrupt)
}

fn corrupt(error: impl std::fmt::Display) -> OutboxStoreError {
    OutboxStoreError::Corrupt(error.to_string())
}

fn open_connection(path: &Path) -> std::result::Result<Connection, OutboxStoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path).map_err(OutboxStoreError::sqlite("open"))?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .map_err(OutboxStoreError::sqlite("busy_timeout"))?;
    conn.execute_batch("PRAGMA journal_mode = WAL;")
        .map_err(OutboxStoreError::sqlite("pragma"))?;

    init_schema(&conn)?;

    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(OutboxStoreError::sqlite("version"))?;
    if version == 0 {
        conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))
            .map_err(OutboxStoreError::sqlite("version"))?;
    } else if version != SCHEMA_VERSION {
        return Err(OutboxStoreError::UnsupportedVersion {
            found: version,
            supported: SCHEMA_VERSION,
        });
    }

    Ok(conn)
}

fn init_schema(conn: &Connection) -> std::result::Result<(), OutboxStoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS reindex_job (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id TEXT NOT NULL UNIQUE,
            state TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS reindex_action (
            job_id TEXT NOT NULL,
            entity_type_id TEXT NOT NULL,
            cud_type TEXT NOT NULL,
            data_type TEXT NOT NULL,
            entity_id TEXT,
            action_order INTEGER NOT NULL,
            status TEXT NOT NULL,
            PRIMARY KEY (job_id, action_order)
         );
         CREATE INDEX IF NOT EXISTS reindex_action_status ON reindex_action (status);",
    )
    .map_err(OutboxStoreError::sqlite("schema"))
}
