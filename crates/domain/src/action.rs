//! Reindex actions and the jobs that group them.

use crate::{EntityId, EntityTypeId, JobId, PrimitiveError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of mutation that produced an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CudType {
    /// Something was created.
    Create,
    /// Something was changed.
    Update,
    /// Something was removed.
    Delete,
}

impl CudType {
    /// Stable wire/storage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    /// Parse a stored name.
    pub fn parse(input: &str) -> Result<Self, PrimitiveError> {
        match input {
            "CREATE" => Ok(Self::Create),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(PrimitiveError::UnknownVariant {
                field: "cudType",
                input: other.to_owned(),
            }),
        }
    }
}

impl fmt::Display for CudType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Whether an action targets rows or the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    /// A single row changed.
    Data,
    /// The entity type definition changed.
    Metadata,
}

impl DataType {
    /// Stable wire/storage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Data => "DATA",
            Self::Metadata => "METADATA",
        }
    }

    /// Parse a stored name.
    pub fn parse(input: &str) -> Result<Self, PrimitiveError> {
        match input {
            "DATA" => Ok(Self::Data),
            "METADATA" => Ok(Self::Metadata),
            other => Err(PrimitiveError::UnknownVariant {
                field: "dataType",
                input: other.to_owned(),
            }),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// One pending index side effect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReindexAction {
    /// Affected entity type.
    pub entity_type_id: EntityTypeId,
    /// Mutation kind.
    pub cud_type: CudType,
    /// Row or schema change.
    pub data_type: DataType,
    /// Affected row, absent for schema-level actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<EntityId>,
    /// Apply order within the owning job.
    pub action_order: u64,
}

impl ReindexAction {
    /// Schema-level action.
    #[must_use]
    pub const fn metadata(entity_type_id: EntityTypeId, cud_type: CudType, action_order: u64) -> Self {
        Self {
            entity_type_id,
            cud_type,
            data_type: DataType::Metadata,
            entity_id: None,
            action_order,
        }
    }

    /// Row-level action.
    #[must_use]
    pub const fn data(
        entity_type_id: EntityTypeId,
        cud_type: CudType,
        entity_id: EntityId,
        action_order: u64,
    ) -> Self {
        Self {
            entity_type_id,
            cud_type,
            data_type: DataType::Data,
            entity_id: Some(entity_id),
            action_order,
        }
    }

    /// Returns true for schema-level actions.
    #[must_use]
    pub const fn is_metadata(&self) -> bool {
        matches!(self.data_type, DataType::Metadata)
    }

    /// Returns true for a schema-level delete of the whole entity type.
    #[must_use]
    pub const fn is_type_deletion(&self) -> bool {
        self.is_metadata() && matches!(self.cud_type, CudType::Delete)
    }
}

impl fmt::Display for ReindexAction {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "#{} {}/{} {}",
            self.action_order, self.cud_type, self.data_type, self.entity_type_id
        )?;
        if let Some(entity_id) = &self.entity_id {
            write!(formatter, "[{entity_id}]")?;
        }
        Ok(())
    }
}

/// A committed batch of actions from one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReindexJob {
    job_id: JobId,
    actions: Vec<ReindexAction>,
}

impl ReindexJob {
    /// Build a job, checking that `actionOrder` strictly increases.
    pub fn new(job_id: JobId, actions: Vec<ReindexAction>) -> Result<Self, PrimitiveError> {
        for pair in actions.windows(2) {
            if let [previous, next] = pair
                && next.action_order <= previous.action_order
            {
                return Err(PrimitiveError::ActionOrderNotIncreasing {
                    previous: previous.action_order,
                    next: next.action_order,
                });
            }
        }
        Ok(Self { job_id, actions })
    }

    /// Job identifier.
    #[must_use]
    pub const fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Actions in apply order.
    #[must_use]
    pub fn actions(&self) -> &[ReindexAction] {
        &self.actions
    }

    /// Number of actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns true when the job has no actions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Split into per-entity-type segments, each kept in `actionOrder`.
    #[must_use]
    pub fn segments(&self) -> BTreeMap<EntityTypeId, Vec<ReindexAction>> {
        let mut segments: BTreeMap<EntityTypeId, Vec<ReindexAction>> = BTreeMap::new();
        for action in &self.actions {
            segments
                .entry(action.entity_type_id.clone())
                .or_default()
                .push(action.clone());
        }
        segments
    }

    /// Consume the job into its actions.
    #[must_use]
    pub fn into_actions(self) -> Vec<ReindexAction> {
        self.actions
    }
}

/// Outbox status of a persisted action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    /// Committed, not yet claimed by the scheduler.
    Pending,
    /// Owned by the scheduler.
    Claimed,
    /// Applied to the index.
    Done,
    /// Could not be applied.
    Failed,
    /// Superseded by a later deletion of its entity type.
    Cancelled,
}

impl ActionStatus {
    /// Stable storage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Claimed => "CLAIMED",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parse a stored name.
    pub fn parse(input: &str) -> Result<Self, PrimitiveError> {
        match input {
            "PENDING" => Ok(Self::Pending),
            "CLAIMED" => Ok(Self::Claimed),
            "DONE" => Ok(Self::Done),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(PrimitiveError::UnknownVariant {
                field: "status",
                input: other.to_owned(),
            }),
        }
    }

    /// Returns true once no further processing will happen.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// One row of the outbox: `(jobId, entityTypeId, cudType, dataType, entityId, actionOrder, status)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReindexActionRecord {
    /// Owning job.
    pub job_id: JobId,
    /// The action itself.
    #[serde(flatten)]
    pub action: ReindexAction,
    /// Current outbox status.
    pub status: ActionStatus,
}
