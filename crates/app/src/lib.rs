//! # reindex-app
//!
//! Use cases keeping the search index in step with metadata changes:
//! registering reindex actions inside a transaction, scheduling committed jobs
//! and verifying the resulting index state.
//! This crate depends on `ports`, `domain`, and `shared`.

pub mod applier;
pub mod consistency;
pub mod decorator;
pub mod register;
pub mod scheduler;

pub use applier::{ApplyOutcome, IndexActionApplier};
pub use consistency::{ConsistencyChecker, ConsistencyReport, CountMismatch, IndexState};
pub use decorator::{ReindexActionRepositoryCollectionDecorator, ReindexActionRepositoryDecorator};
pub use register::{ReindexActionRegisterService, TransactionHandle, TypeSnapshot};
pub use scheduler::{IndexJobScheduler, IndexJobSchedulerDeps, SchedulerSettings};

/// Returns the app crate version.
#[must_use]
pub const fn app_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
