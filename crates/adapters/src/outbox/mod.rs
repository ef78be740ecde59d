//! Transactional outbox stores.

mod error;
mod memory;
mod sqlite;

pub use error::OutboxStoreError;
pub use memory::InMemoryReindexActionStore;
pub use sqlite::SqliteReindexActionStore;
