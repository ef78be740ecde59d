//! Correctness oracle comparing the metadata store with the search index.

use reindex_domain::is_system_index;
use reindex_ports::{EntityTypeId, Query, RepositoryCollectionPort, SearchServicePort};
use reindex_shared::{RequestContext, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Derived state of one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexState {
    /// Whether a mapping exists.
    pub has_index: bool,
    /// Documents in the index; zero without one.
    pub document_count: u64,
}

/// Row and document counts that disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountMismatch {
    /// Entity type checked.
    pub entity_type_id: EntityTypeId,
    /// Rows in the metadata store.
    pub rows: u64,
    /// Documents in the index.
    pub documents: u64,
}

/// Differences between the metadata store and the index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyReport {
    /// Entity types without an index.
    pub missing_mappings: Vec<EntityTypeId>,
    /// Indexes whose entity type no longer exists.
    pub dangling_mappings: Vec<EntityTypeId>,
    /// Indexes whose mapping differs from the entity type's current one.
    pub stale_mappings: Vec<EntityTypeId>,
    /// Entity types whose document count differs from the row count.
    pub count_mismatches: Vec<CountMismatch>,
}

impl ConsistencyReport {
    /// Returns true when no difference was found.
    pub fn is_consistent(&self) -> bool {
        self.missing_mappings.is_empty()
            && self.dangling_mappings.is_empty()
            && self.stale_mappings.is_empty()
            && self.count_mismatches.is_empty()
    }
}

/// Reads both sides and compares them.
#[derive(Clone)]
pub struct ConsistencyChecker {
    collection: Arc<dyn RepositoryCollectionPort>,
    search: Arc<dyn SearchServicePort>,
}

impl ConsistencyChecker {
    /// Checker over the given store and index.
    pub fn new(
        collection: Arc<dyn RepositoryCollectionPort>,
        search: Arc<dyn SearchServicePort>,
    ) -> Self {
        Self { collection, search }
    }

    /// Index state of one entity type.
    pub async fn index_state(
        &self,
        ctx: &RequestContext,
        entity_type_id: &EntityTypeId,
    ) -> Result<IndexState> {
        ctx.ensure_not_cancelled("consistency.index_state")?;
        let has_index = self.search.has_index(ctx, entity_type_id.clone()).await?;
        let document_count = if has_index {
            self.search
                .count(ctx, entity_type_id.clone(), Query::all())
                .await?
        } else {
            0
        };
        Ok(IndexState {
            has_index,
            document_count,
        })
    }

    /// Evaluate `expected` against the index state of `entity_type_id`.
    pub async fn verify<P>(
        &self,
        ctx: &RequestContext,
        entity_type_id: &EntityTypeId,
        expected: P,
    ) -> Result<bool>
    where
        P: FnOnce(&IndexState) -> bool + Send,
    {
        let state = self.index_state(ctx, entity_type_id).await?;
        Ok(expected(&state))
    }

    /// Compare every entity type with every index; system indexes are skipped.
    pub async fn report(&self, ctx: &RequestContext) -> Result<ConsistencyReport> {
        ctx.ensure_not_cancelled("consistency.report")?;
        let types: BTreeSet<EntityTypeId> = self
            .collection
            .entity_names(ctx)
            .await?
            .into_iter()
            .filter(|id| !is_system_index(id))
            .collect();
        let indexes: BTreeSet<EntityTypeId> = self
            .search
            .index_names(ctx)
            .await?
            .into_iter()
            .filter(|id| !is_system_index(id))
            .collect();

        let mut report = ConsistencyReport {
            missing_mappings: types.difference(&indexes).cloned().collect(),
            dangling_mappings: indexes.difference(&types).cloned().collect(),
            ..ConsistencyReport::default()
        };

        for entity_type_id in types.intersection(&indexes) {
            let Some(repository) = self
                .collection
                .get_repository(ctx, entity_type_id.clone())
                .await?
            else {
                continue;
            };
            let expected = repository.entity_type(ctx).await?.mapping()?;
            let current = self.search.mapping(ctx, entity_type_id.clone()).await?;
            if current.as_ref() != Some(&expected) {
                report.stale_mappings.push(entity_type_id.clone());
            }

            let rows = repository.count(ctx).await?;
            let documents = self
                .search
                .count(ctx, entity_type_id.clone(), Query::all())
                .await?;
            if rows != documents {
                report.count_mismatches.push(CountMismatch {
                    entity_type_id: entity_type_id.clone(),
                    rows,
                    documents,
                });
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applier::IndexActionApplier;
    use reindex_adapters::metadata::InMemoryRepositoryCollection;
    use reindex_adapters::search::InMemorySearchService;
    use reindex_domain::{CudType, ReindexAction};
    use reindex_testkit::fixtures::{row, simple_type};
    use serde_json::json;
    use std::error::Error;

    fn parts() -> Result<(Arc<InMemoryRepositoryCollection>, Arc<InMemorySearchService>)> {
        Ok((
            Arc::new(InMemoryRepositoryCollection::new()?),
            Arc::new(InMemorySearchService::new()),
        ))
    }

    #[tokio::test]
    async fn report_flags_missing_and_counts() -> Result<(), Box<dyn Error>> {
        let ctx = RequestContext::new_request();
        let (collection, search) = parts()?;
        let checker = ConsistencyChecker::new(collection.clone(), search.clone());

        let foo = simple_type("Foo")?;
        let repository = collection.create_repository(&ctx, foo.clone()).await?;
        repository
            .add(&ctx, row("1", &[("label", json!("one"))])?)
            .await?;

        let report = checker.report(&ctx).await?;
        assert_eq!(report.missing_mappings, vec![foo.id.clone()]);
        assert!(!report.is_consistent());

        let applier = IndexActionApplier::new(collection.clone(), search.clone());
        applier
            .apply(&ctx, &ReindexAction::metadata(foo.id.clone(), CudType::Create, 0))
            .await?;
        let report = checker.report(&ctx).await?;
        assert!(report.is_consistent(), "{report:?}");

        assert!(
            checker
                .verify(&ctx, &foo.id, |state| state.has_index && state.document_count == 1)
                .await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn report_flags_dangling_index() -> Result<(), Box<dyn Error>> {
        let ctx = RequestContext::new_request();
        let (collection, search) = parts()?;
        let checker = ConsistencyChecker::new(collection.clone(), search.clone());

        let bar = simple_type("Bar")?;
        search.create_mapping(&ctx, bar.mapping()?).await?;

        let report = checker.report(&ctx).await?;
        assert_eq!(report.dangling_mappings, vec![bar.id.clone()]);
        assert!(report.missing_mappings.is_empty());
        assert!(
            checker
                .verify(&ctx, &EntityTypeId::parse("Missing")?, |state| !state.has_index)
                .await?
        );
        Ok(())
    }
}
