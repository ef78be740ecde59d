//! Secret detection for log fields and error metadata.

/// Placeholder written instead of a secret value.
pub const REDACTED: &str = "[REDACTED]";

const SECRET_MARKERS: [&str; 6] = ["KEY", "TOKEN", "SECRET", "PASSWORD", "CREDENTIAL", "AUTH"];

/// Returns true when a key or variable name likely refers to a secret.
///
/// ```
/// use reindex_shared::is_secret_key;
///
/// assert!(is_secret_key("searchApiKey"));
/// assert!(is_secret_key("REINDEX_SEARCH_PASSWORD"));
/// assert!(!is_secret_key("entityTypeId"));
/// ```
pub fn is_secret_key(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    SECRET_MARKERS.iter().any(|marker| upper.contains(marker))
}

/// Returns [`REDACTED`] for secret keys and the value otherwise.
pub fn redact_if_secret(key: &str, value: &str) -> String {
    if is_secret_key(key) {
        REDACTED.to_owned()
    } else {
        value.to_owned()
    }
}
