//! # reindex-testkit
//!
//! Test helpers: recording and no-op observability adapters, a fault
//! injecting search service, and entity type fixtures.
//! This crate depends on `ports`, `domain`, and `shared`.

pub mod errors;
pub mod fixtures;
pub mod flaky;
pub mod in_memory;

/// Returns the testkit crate version.
#[must_use]
pub const fn testkit_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;
    use reindex_ports::ports_crate_version;
    use reindex_shared::shared_crate_version;

    #[test]
    fn testkit_can_use_ports_and_shared() {
        assert!(!testkit_crate_version().is_empty());
        assert!(!ports_crate_version().is_empty());
        assert!(!shared_crate_version().is_empty());
    }

    #[test]
    fn error_fixtures_are_classified() {
        let codes = errors::common_error_codes();
        assert!(!codes.is_empty());
        assert!(errors::index_backend_error("index").is_retriable());
    }

    #[test]
    fn fixtures_build_valid_mappings() {
        for entity_type in [
            fixtures::simple_type("Foo").unwrap(),
            fixtures::dynamic_type("Person").unwrap(),
            fixtures::compound_type("Place").unwrap(),
        ] {
            entity_type.mapping().unwrap();
        }
    }
}
