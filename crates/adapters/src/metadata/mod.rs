//! Metadata store adapters.

mod memory;

pub use memory::{InMemoryRepository, InMemoryRepositoryCollection};
