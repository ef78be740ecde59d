//! Environment validation helpers.

use reindex_config::{ReindexConfig, ReindexEnv, apply_env_overrides};
use reindex_shared::ErrorEnvelope;
use std::collections::BTreeMap;

/// Infra-level error type (shared error envelope).
pub type InfraError = ErrorEnvelope;

/// Infra-level result type.
pub type InfraResult<T> = Result<T, InfraError>;

/// Validate that the provided `REINDEX_*` overrides parse and merge into a
/// valid config.
pub fn validate_env_parsing(env: &BTreeMap<String, String>) -> InfraResult<()> {
    let parsed = ReindexEnv::from_map(env).map_err(ErrorEnvelope::from)?;
    let _ = apply_env_overrides(ReindexConfig::default(), &parsed)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reindex_shared::ErrorCode;

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect()
    }

    #[test]
    fn accepts_well_formed_overrides() -> InfraResult<()> {
        validate_env_parsing(&env(&[
            ("REINDEX_WORKER_CONCURRENCY", "8"),
            ("REINDEX_OUTBOX_PROVIDER", "memory"),
        ]))
    }

    #[test]
    fn rejects_out_of_range_concurrency() {
        let error = validate_env_parsing(&env(&[("REINDEX_WORKER_CONCURRENCY", "0")]));
        assert!(error.is_err());
    }

    #[test]
    fn rejects_malformed_numbers() -> Result<(), InfraError> {
        let error = validate_env_parsing(&env(&[("REINDEX_WAIT_TIMEOUT_MS", "soon")]))
            .err()
            .ok_or_else(|| {
                ErrorEnvelope::expected(ErrorCode::internal(), "expected malformed env to fail")
            })?;
        assert_ne!(error.code, ErrorCode::internal());
        assert!(error.message.contains("REINDEX_WAIT_TIMEOUT_MS"));
        Ok(())
    }
}
