//! Reindex pipeline error taxonomy.

use crate::{AttributeName, EntityTypeId};
use reindex_shared::{ErrorClass, ErrorCode, ErrorEnvelope};
use std::fmt;

/// Failures raised by the reindex pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReindexError {
    /// `register` was called without an active transaction.
    Registration {
        /// Why the transaction is unusable.
        reason: String,
    },
    /// Transient failure talking to the search backend.
    IndexBackend {
        /// Backend operation that failed.
        operation: &'static str,
        /// Backend message.
        message: String,
    },
    /// Metadata the index cannot represent.
    SchemaConflict {
        /// Entity type being indexed.
        entity_type_id: EntityTypeId,
        /// Offending attribute, when known.
        attribute: Option<AttributeName>,
        /// What is wrong.
        reason: String,
    },
    /// A blocking wait exceeded its deadline; index state is unknown.
    Timeout {
        /// Wait operation.
        operation: &'static str,
        /// Deadline that elapsed.
        timeout_ms: u64,
    },
}

impl ReindexError {
    /// Code namespace shared by all reindex errors.
    pub const NAMESPACE: &'static str = "reindex";

    /// Stable code for this error.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::Registration { .. } => "registration",
            Self::IndexBackend { .. } => "index_backend",
            Self::SchemaConflict { .. } => "schema_conflict",
            Self::Timeout { .. } => "timeout",
        };
        ErrorCode::new(Self::NAMESPACE, code)
    }

    /// Code of [`ReindexError::Registration`].
    pub fn registration_code() -> ErrorCode {
        ErrorCode::new(Self::NAMESPACE, "registration")
    }

    /// Code of [`ReindexError::IndexBackend`].
    pub fn index_backend_code() -> ErrorCode {
        ErrorCode::new(Self::NAMESPACE, "index_backend")
    }

    /// Code of [`ReindexError::SchemaConflict`].
    pub fn schema_conflict_code() -> ErrorCode {
        ErrorCode::new(Self::NAMESPACE, "schema_conflict")
    }

    /// Code of [`ReindexError::Timeout`].
    pub fn timeout_code() -> ErrorCode {
        ErrorCode::new(Self::NAMESPACE, "timeout")
    }

    /// Retry classification.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::IndexBackend { .. } | Self::Timeout { .. } => ErrorClass::Retriable,
            Self::Registration { .. } | Self::SchemaConflict { .. } => ErrorClass::NonRetriable,
        }
    }
}

impl fmt::Display for ReindexError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registration { reason } => {
                write!(formatter, "cannot register reindex action: {reason}")
            },
            Self::IndexBackend { operation, message } => {
                write!(formatter, "index backend failed during {operation}: {message}")
            },
            Self::SchemaConflict {
                entity_type_id,
                attribute: Some(attribute),
                reason,
            } => write!(
                formatter,
                "schema conflict on {entity_type_id}.{attribute}: {reason}"
            ),
            Self::SchemaConflict {
                entity_type_id,
                attribute: None,
                reason,
            } => write!(formatter, "schema conflict on {entity_type_id}: {reason}"),
            Self::Timeout {
                operation,
                timeout_ms,
            } => write!(formatter, "{operation} did not finish within {timeout_ms}ms"),
        }
    }
}

impl std::error::Error for ReindexError {}

impl From<ReindexError> for ErrorEnvelope {
    fn from(error: ReindexError) -> Self {
        let code = error.error_code();
        let class = error.class();
        let message = error.to_string();
        match error {
            ReindexError::Registration { .. } => Self::expected(code, message),
            ReindexError::IndexBackend { operation, .. } => {
                Self::unexpected(code, message, class).with_metadata("operation", operation)
            },
            ReindexError::SchemaConflict {
                entity_type_id,
                attribute,
                ..
            } => {
                let envelope = Self::invariant(code, message)
                    .with_metadata("entityTypeId", entity_type_id.as_str());
                match attribute {
                    Some(attribute) => envelope.with_metadata("attribute", attribute.as_str()),
                    None => envelope,
                }
            },
            ReindexError::Timeout {
                operation,
                timeout_ms,
            } => Self::expected_with_class(code, message, class)
                .with_metadata("operation", operation)
                .with_metadata("timeoutMs", timeout_ms.to_string()),
        }
    }
}
