use reindex_shared::{ErrorClass, ErrorCode, ErrorEnvelope};
use thiserror::Error;

/// Failures raised by the durable outbox.
#[derive(Debug, Error)]
pub enum OutboxStoreError {
    /// A statement failed.
    #[error("outbox {operation} failed: {source}")]
    Sqlite {
        /// Store operation.
        operation: &'static str,
        /// Driver error.
        #[source]
        source: rusqlite::Error,
    },
    /// The database directory could not be prepared.
    #[error("outbox directory setup failed: {0}")]
    Io(#[from] std::io::Error),
    /// The blocking worker panicked or was cancelled.
    #[error("outbox task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    /// The file was written by a newer schema.
    #[error("outbox schema version {found} is not supported (expected {supported})")]
    UnsupportedVersion {
        /// Version read from `PRAGMA user_version`.
        found: i64,
        /// Version this build writes.
        supported: i64,
    },
    /// A stored row does not decode.
    #[error("outbox row is corrupt: {0}")]
    Corrupt(String),
}

impl OutboxStoreError {
    pub(super) fn sqlite(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| Self::Sqlite { operation, source }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Sqlite { .. } => "sqlite",
            Self::Io(_) => "io",
            Self::Task(_) => "task",
            Self::UnsupportedVersion { .. } => "unsupported_version",
            Self::Corrupt(_) => "corrupt_row",
        }
    }
}

impl From<OutboxStoreError> for ErrorEnvelope {
    fn from(error: OutboxStoreError) -> Self {
        let code = ErrorCode::new("outbox", error.code());
        match &error {
            OutboxStoreError::UnsupportedVersion { found, supported } => {
                Self::invariant(code, error.to_string())
                    .with_metadata("found", found.to_string())
                    .with_metadata("supported", supported.to_string())
            },
            OutboxStoreError::Corrupt(_) => Self::invariant(code, error.to_string()),
            OutboxStoreError::Sqlite { operation, .. } => {
                Self::unexpected(code, error.to_string(), ErrorClass::Retriable)
                    .with_metadata("operation", *operation)
            },
            OutboxStoreError::Io(_) | OutboxStoreError::Task(_) => {
                Self::unexpected(code, error.to_string(), ErrorClass::NonRetriable)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_mismatch_is_an_invariant_with_context() {
        let envelope = ErrorEnvelope::from(OutboxStoreError::UnsupportedVersion {
            found: 9,
            supported: 1,
        });
        assert_eq!(envelope.code, ErrorCode::new("outbox", "unsupported_version"));
        assert_eq!(envelope.metadata_value("found"), Some("9"));
        assert!(!envelope.is_retriable());
    }

    #[test]
    fn statement_failures_are_retriable() {
        let envelope = ErrorEnvelope::from(OutboxStoreError::sqlite("append_job")(
            rusqlite::Error::InvalidQuery,
        ));
        assert!(envelope.is_retriable());
        assert_eq!(envelope.metadata_value("operation"), Some("append_job"));
    }
}
