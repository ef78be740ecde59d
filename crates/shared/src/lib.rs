//! # reindex-shared
//!
//! Shared building blocks for the reindex pipeline workspace.
//!
//! - Result alias and the structured `ErrorEnvelope`
//! - Retry with bounded exponential backoff
//! - Timeouts that honour request cancellation
//! - Request context and the worker pool used by the index scheduler
//!
//! This crate has no workspace dependencies.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

// =============================================================================
// RESULT + ERROR ENVELOPE
// =============================================================================

pub mod errors;
pub mod result;

// =============================================================================
// RUNTIME HELPERS
// =============================================================================

pub mod concurrency;
pub mod invariants;
pub mod redaction;
pub mod retry;
pub mod timeout;

pub use concurrency::{CancellationToken, CorrelationId, RequestContext, WorkerPool};
pub use errors::{ErrorClass, ErrorCode, ErrorEnvelope, ErrorKind, ErrorMetadata};
pub use invariants::{BoundedU32, BoundedU64, BoundsError, Validated};
pub use redaction::{REDACTED, is_secret_key, redact_if_secret};
pub use result::{Result, ResultExt};
pub use retry::{RetryPolicy, retry_async, retry_async_with_observer};
pub use timeout::timeout_with_context;

/// Returns the shared crate version.
#[must_use]
pub const fn shared_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// =============================================================================
// TESTS
// =============================================================================
