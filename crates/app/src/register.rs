//! Transactional registration of reindex actions.
//!
//! Actions are buffered on an explicit [`TransactionHandle`] and only reach the
//! outbox when the transaction commits. The handle also keeps the pre-image of
//! every entity type the transaction touched, so a rolled back transaction
//! leaves no trace in the metadata store either.

use reindex_domain::{CudType, DataType, ReindexAction, ReindexError};
use reindex_ports::{
    Entity, EntityId, EntityType, EntityTypeId, JobId, ReindexActionStorePort, ReindexJob,
};
use reindex_shared::{ErrorCode, ErrorEnvelope, RequestContext, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionStatus {
    Active,
    Committed,
    RolledBack,
}

impl TransactionStatus {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        }
    }
}

/// State of one entity type before a transaction first changed it.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeSnapshot {
    /// Definition at capture time.
    pub entity_type: EntityType,
    /// Rows at capture time, sorted by id.
    pub rows: Vec<Entity>,
}

#[derive(Debug)]
struct TransactionState {
    status: TransactionStatus,
    actions: Vec<ReindexAction>,
    /// `None` marks a type that did not exist yet.
    snapshots: BTreeMap<EntityTypeId, Option<TypeSnapshot>>,
}

/// Unit of work collecting the actions of one job.
///
/// Clones share the same buffer, so a handle can be passed to decorators and
/// still be committed by its owner.
#[derive(Clone)]
pub struct TransactionHandle {
    job_id: JobId,
    state: Arc<Mutex<TransactionState>>,
}

impl TransactionHandle {
    fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            state: Arc::new(Mutex::new(TransactionState {
                status: TransactionStatus::Active,
                actions: Vec::new(),
                snapshots: BTreeMap::new(),
            })),
        }
    }

    /// Id the job will carry once committed.
    pub const fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Returns true until commit or rollback.
    pub fn is_active(&self) -> bool {
        self.lock().status == TransactionStatus::Active
    }

    /// Actions registered so far.
    pub fn actions(&self) -> Vec<ReindexAction> {
        self.lock().actions.clone()
    }

    /// Returns true once a pre-image of `entity_type_id` is held.
    pub fn has_snapshot(&self, entity_type_id: &EntityTypeId) -> bool {
        self.lock().snapshots.contains_key(entity_type_id)
    }

    /// Keep the pre-image of `entity_type_id`; the first capture wins.
    pub fn remember(&self, entity_type_id: EntityTypeId, snapshot: Option<TypeSnapshot>) {
        let mut state = self.lock();
        if state.status == TransactionStatus::Active {
            state.snapshots.entry(entity_type_id).or_insert(snapshot);
        }
    }

    /// Hand over the pre-images of a transaction that did not commit.
    pub fn take_snapshots(&self) -> BTreeMap<EntityTypeId, Option<TypeSnapshot>> {
        let mut state = self.lock();
        if state.status == TransactionStatus::Committed {
            return BTreeMap::new();
        }
        std::mem::take(&mut state.snapshots)
    }

    fn lock(&self) -> MutexGuard<'_, TransactionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_active(&self) -> Result<()> {
        let status = self.lock().status;
        if status == TransactionStatus::Active {
            return Ok(());
        }
        Err(registration_error(&format!(
            "transaction {} is {}",
            self.job_id,
            status.as_str()
        )))
    }
}

impl fmt::Debug for TransactionHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        formatter
            .debug_struct("TransactionHandle")
            .field("job_id", &self.job_id)
            .field("status", &state.status)
            .field("actions", &state.actions.len())
            .finish()
    }
}

/// Records reindex actions against a transaction and persists them on commit.
#[derive(Clone)]
pub struct ReindexActionRegisterService {
    store: Arc<dyn ReindexActionStorePort>,
}

impl ReindexActionRegisterService {
    /// Service writing committed jobs to `store`.
    pub fn new(store: Arc<dyn ReindexActionStorePort>) -> Self {
        Self { store }
    }

    /// Outbox the service commits to.
    pub fn store(&self) -> &Arc<dyn ReindexActionStorePort> {
        &self.store
    }

    /// Open a transaction with a fresh job id.
    pub fn begin(&self) -> Result<TransactionHandle> {
        let job_id = JobId::parse(uuid::Uuid::new_v4().to_string())?;
        Ok(TransactionHandle::new(job_id))
    }

    /// Fail unless `tx` is present and active.
    pub fn ensure_active(tx: Option<&TransactionHandle>) -> Result<&TransactionHandle> {
        let tx = tx.ok_or_else(|| registration_error("no active transaction"))?;
        tx.ensure_active()?;
        Ok(tx)
    }

    /// Append an action to the transaction's job with the next `actionOrder`.
    ///
    /// `DATA` actions need the row id; `METADATA` actions must not carry one.
    pub fn register(
        &self,
        tx: Option<&TransactionHandle>,
        entity_type_id: EntityTypeId,
        cud_type: CudType,
        data_type: DataType,
        entity_id: Option<EntityId>,
    ) -> Result<ReindexAction> {
        let tx = Self::ensure_active(tx)?;
        let mut state = tx.lock();
        if state.status != TransactionStatus::Active {
            return Err(registration_error(&format!(
                "transaction {} is {}",
                tx.job_id,
                state.status.as_str()
            )));
        }

        let action_order = u64::try_from(state.actions.len()).unwrap_or(u64::MAX);
        let action = match (data_type, entity_id) {
            (DataType::Metadata, None) => ReindexAction::metadata(entity_type_id, cud_type, action_order),
            (DataType::Data, Some(entity_id)) => {
                ReindexAction::data(entity_type_id, cud_type, entity_id, action_order)
            },
            (DataType::Metadata, Some(_)) => {
                return Err(invalid_action(&entity_type_id, "metadata actions do not target a row"));
            },
            (DataType::Data, None) => {
                return Err(invalid_action(&entity_type_id, "data actions need an entity id"));
            },
        };
        state.actions.push(action.clone());
        Ok(action)
    }

    /// Persist the transaction's job atomically.
    ///
    /// Returns `None` when nothing was registered. A failed append discards the
    /// actions, the same as a rollback.
    pub async fn commit(
        &self,
        ctx: &RequestContext,
        tx: &TransactionHandle,
    ) -> Result<Option<ReindexJob>> {
        let actions = {
            let mut state = tx.lock();
            if state.status != TransactionStatus::Active {
                return Err(registration_error(&format!(
                    "transaction {} is {}",
                    tx.job_id,
                    state.status.as_str()
                )));
            }
            state.status = TransactionStatus::Committed;
            std::mem::take(&mut state.actions)
        };
        if actions.is_empty() {
            tx.lock().snapshots.clear();
            return Ok(None);
        }

        let job = ReindexJob::new(tx.job_id.clone(), actions);
        let appended = match job {
            Ok(job) => self.store.append_job(ctx, job.clone()).await.map(|()| job),
            Err(error) => Err(error.into()),
        };
        match appended {
            Ok(job) => {
                tx.lock().snapshots.clear();
                Ok(Some(job))
            },
            Err(error) => {
                tx.lock().status = TransactionStatus::RolledBack;
                Err(error)
            },
        }
    }

    /// Discard the transaction's actions. Finished transactions are left alone.
    ///
    /// Pre-images stay on the handle for the metadata store to restore.
    pub fn rollback(&self, tx: &TransactionHandle) {
        let mut state = tx.lock();
        if state.status == TransactionStatus::Active {
            state.status = TransactionStatus::RolledBack;
            state.actions.clear();
        }
    }
}

impl fmt::Debug for ReindexActionRegisterService {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ReindexActionRegisterService")
            .field("store", &self.store.provider())
            .finish()
    }
}

fn registration_error(reason: &str) -> ErrorEnvelope {
    ReindexError::Registration {
        reason: reason.to_owned(),
    }
    .into()
}

fn invalid_action(entity_type_id: &EntityTypeId, reason: &str) -> ErrorEnvelope {
    ErrorEnvelope::expected(ErrorCode::invalid_input(), reason)
        .with_metadata("entityTypeId", entity_type_id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reindex_adapters::outbox::InMemoryReindexActionStore;
    use std::error::Error;

    fn service() -> (ReindexActionRegisterService, Arc<InMemoryReindexActionStore>) {
        let store = Arc::new(InMemoryReindexActionStore::new());
        (ReindexActionRegisterService::new(store.clone()), store)
    }

    #[test]
    fn register_without_transaction_is_rejected() -> Result<(), Box<dyn Error>> {
        let (service, _) = service();
        let error = service
            .register(
                None,
                EntityTypeId::parse("Foo")?,
                CudType::Create,
                DataType::Metadata,
                None,
            )
            .err()
            .ok_or_else(|| std::io::Error::other("expected registration error"))?;
        assert_eq!(error.code, ReindexError::registration_code());
        Ok(())
    }

    #[tokio::test]
    async fn commit_persists_actions_in_order() -> Result<(), Box<dyn Error>> {
        let ctx = RequestContext::new_request();
        let (service, store) = service();
        let tx = service.begin()?;
        let foo = EntityTypeId::parse("Foo")?;
        service.register(Some(&tx), foo.clone(), CudType::Create, DataType::Metadata, None)?;
        service.register(
            Some(&tx),
            foo,
            CudType::Create,
            DataType::Data,
            Some(EntityId::parse("1")?),
        )?;

        let job = service.commit(&ctx, &tx).await?.ok_or("job expected")?;
        let orders: Vec<u64> = job.actions().iter().map(|a| a.action_order).collect();
        assert_eq!(orders, vec![0, 1]);
        assert_eq!(store.records(&ctx, Some(job.job_id().clone())).await?.len(), 2);
        assert!(!tx.is_active());

        let error = service
            .register(Some(&tx), EntityTypeId::parse("Bar")?, CudType::Delete, DataType::Metadata, None)
            .err()
            .ok_or_else(|| std::io::Error::other("expected registration error"))?;
        assert_eq!(error.code, ReindexError::registration_code());
        Ok(())
    }

    #[tokio::test]
    async fn rollback_leaves_the_outbox_empty() -> Result<(), Box<dyn Error>> {
        let ctx = RequestContext::new_request();
        let (service, store) = service();
        let tx = service.begin()?;
        service.register(
            Some(&tx),
            EntityTypeId::parse("Foo")?,
            CudType::Update,
            DataType::Metadata,
            None,
        )?;
        service.rollback(&tx);

        assert!(store.records(&ctx, None).await?.is_empty());
        assert!(service.commit(&ctx, &tx).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn empty_transactions_commit_to_nothing() -> Result<(), Box<dyn Error>> {
        let ctx = RequestContext::new_request();
        let (service, store) = service();
        let tx = service.begin()?;
        assert!(service.commit(&ctx, &tx).await?.is_none());
        assert!(store.records(&ctx, None).await?.is_empty());
        Ok(())
    }

    #[test]
    fn data_actions_need_a_row_id() -> Result<(), Box<dyn Error>> {
        let (service, _) = service();
        let tx = service.begin()?;
        let error = service
            .register(Some(&tx), EntityTypeId::parse("Foo")?, CudType::Create, DataType::Data, None)
            .err()
            .ok_or_else(|| std::io::Error::other("expected invalid input"))?;
        assert_eq!(error.code, ErrorCode::invalid_input());
        assert!(tx.actions().is_empty());
        Ok(())
    }
}
