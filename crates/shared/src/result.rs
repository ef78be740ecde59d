//! Result alias and error-context helpers.

use crate::errors::ErrorEnvelope;

/// Shared result type used across the workspace.
pub type Result<T, E = ErrorEnvelope> = std::result::Result<T, E>;

/// Adds diagnostic context to envelope errors without touching the success path.
pub trait ResultExt<T> {
    /// Attach a metadata entry when the result is an error.
    fn with_error_metadata(self, key: &str, value: impl Into<String>) -> Result<T>;

    /// Attach a metadata entry computed lazily when the result is an error.
    fn with_error_metadata_fn<F>(self, key: &str, value: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_error_metadata(self, key: &str, value: impl Into<String>) -> Result<T> {
        self.map_err(|error| error.with_metadata(key, value))
    }

    fn with_error_metadata_fn<F>(self, key: &str, value: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|error| error.with_metadata(key, value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;

    #[test]
    fn success_is_untouched() {
        let value: Result<u8> = Ok(7);
        assert!(matches!(value.with_error_metadata("k", "v"), Ok(7)));
    }

    #[test]
    fn lazy_metadata_is_only_built_on_error() {
        let mut built = false;
        let value: Result<u8> = Ok(1);
        let _ = value.with_error_metadata_fn("k", || {
            built = true;
            String::new()
        });
        assert!(!built);

        let failed: Result<u8> = Err(ErrorEnvelope::expected(ErrorCode::not_found(), "missing"));
        let error = failed
            .with_error_metadata_fn("entityTypeId", || "Foo".to_owned())
            .err();
        assert_eq!(
            error.as_ref().and_then(|e| e.metadata_value("entityTypeId")),
            Some("Foo")
        );
    }
}
