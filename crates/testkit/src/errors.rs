//! Test fixtures for shared error codes and envelopes.

use reindex_domain::{EntityTypeId, ReindexError};
use reindex_shared::{ErrorCode, ErrorEnvelope};

/// Return a list of common error codes used in tests.
pub fn common_error_codes() -> Vec<ErrorCode> {
    vec![
        ErrorCode::cancelled(),
        ErrorCode::invalid_input(),
        ErrorCode::not_found(),
        ErrorCode::timeout(),
        ReindexError::registration_code(),
        ReindexError::index_backend_code(),
        ReindexError::schema_conflict_code(),
        ReindexError::timeout_code(),
    ]
}

/// A cancellation error fixture.
pub fn cancelled_error() -> ErrorEnvelope {
    ErrorEnvelope::cancelled("cancelled")
}

/// A retriable search backend failure.
pub fn index_backend_error(operation: &'static str) -> ErrorEnvelope {
    ReindexError::IndexBackend {
        operation,
        message: "backend unavailable".into(),
    }
    .into()
}

/// A non-retriable mapping conflict.
pub fn schema_conflict_error(entity_type_id: &EntityTypeId) -> ErrorEnvelope {
    ReindexError::SchemaConflict {
        entity_type_id: entity_type_id.clone(),
        attribute: None,
        reason: "mapping rejected by backend".into(),
    }
    .into()
}
