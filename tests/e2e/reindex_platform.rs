// Allow missing docs in integration test.
#![allow(missing_docs)]

use reindex_adapters::metadata::InMemoryRepositoryCollection;
use reindex_adapters::outbox::InMemoryReindexActionStore;
use reindex_adapters::search::InMemorySearchService;
use reindex_config::{ReindexEnv, ValidatedReindexConfig, load_reindex_config_from_sources};
use reindex_domain::{ATTRIBUTE_METADATA, ENTITY_TYPE_METADATA, is_system_index};
use reindex_infra::{ReindexRuntime, RuntimeParts};
use reindex_ports::{
    Attribute, AttributeName, EntityTypeId, JobState, Query, RepositoryCollectionPort,
};
use reindex_shared::{ErrorCode, ErrorEnvelope, RequestContext};
use reindex_testkit::fixtures::{attribute, compound_type, dynamic_type, row, simple_type};
use reindex_testkit::in_memory::{NoopTelemetry, RecordingLogger};
use serde_json::json;
use std::collections::BTreeMap;
use std::error::Error;
use std::sync::Arc;

type TestResult = Result<(), Box<dyn Error>>;

fn config() -> Result<ValidatedReindexConfig, Box<dyn Error>> {
    let env = ReindexEnv::from_map(&BTreeMap::new())?;
    let overrides = json!({
        "scheduler": { "waitTimeoutMs": 5000 },
        "retry": { "maxAttempts": 3, "baseDelayMs": 1, "maxDelayMs": 5 }
    })
    .to_string();
    Ok(load_reindex_config_from_sources(None, Some(&overrides), &env)?)
}

fn runtime(logger: RecordingLogger) -> Result<ReindexRuntime, Box<dyn Error>> {
    let parts = RuntimeParts {
        collection: Arc::new(InMemoryRepositoryCollection::new()?),
        search: Arc::new(InMemorySearchService::new()),
        store: Arc::new(InMemoryReindexActionStore::new()),
        logger: Arc::new(logger),
        telemetry: Arc::new(NoopTelemetry),
    };
    Ok(ReindexRuntime::from_parts(config()?, parts)?)
}

async fn create_types(
    ctx: &RequestContext,
    runtime: &ReindexRuntime,
    ids: &[&'static str],
) -> TestResult {
    let ids = ids.to_vec();
    runtime
        .run_in_transaction(ctx, |metadata| {
            let ctx = ctx.clone();
            async move {
                for id in ids {
                    metadata.create_repository(&ctx, simple_type(id)?).await?;
                }
                Ok::<(), ErrorEnvelope>(())
            }
        })
        .await?;
    Ok(())
}

async fn attribute_docs(
    ctx: &RequestContext,
    runtime: &ReindexRuntime,
    query: Query,
) -> Result<u64, Box<dyn Error>> {
    let index = EntityTypeId::parse(ATTRIBUTE_METADATA)?;
    Ok(runtime.search().count(ctx, index, query).await?)
}

#[tokio::test]
async fn created_type_gets_an_index_and_metadata_documents() -> TestResult {
    let ctx = RequestContext::new_request();
    let runtime = runtime(RecordingLogger::new())?;

    create_types(&ctx, &runtime, &["Foo"]).await?;
    let foo = EntityTypeId::parse("Foo")?;
    runtime.wait_for_index_to_be_stable(&ctx, &foo).await?;

    assert!(runtime.search().has_index(&ctx, foo).await?);
    let entity_types = EntityTypeId::parse(ENTITY_TYPE_METADATA)?;
    assert_eq!(
        runtime
            .search()
            .count(&ctx, entity_types, Query::eq("id", "Foo"))
            .await?,
        1
    );
    assert_eq!(attribute_docs(&ctx, &runtime, Query::eq("entity", "Foo")).await?, 2);
    runtime.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn index_names_follow_entity_types() -> TestResult {
    let ctx = RequestContext::new_request();
    let runtime = runtime(RecordingLogger::new())?;

    create_types(&ctx, &runtime, &["Foo", "Bar", "Baz"]).await?;
    runtime
        .run_in_transaction(&ctx, |metadata| {
            let ctx = ctx.clone();
            async move {
                metadata
                    .delete_repository(&ctx, EntityTypeId::parse("Bar")?)
                    .await
            }
        })
        .await?;
    runtime.wait_for_work_to_be_finished(&ctx).await?;

    let user_types = |ids: Vec<EntityTypeId>| {
        ids.into_iter()
            .filter(|id| !is_system_index(id))
            .collect::<Vec<_>>()
    };
    let indexes = user_types(runtime.search().index_names(&ctx).await?);
    let entity_types = user_types(runtime.collection().entity_names(&ctx).await?);
    assert_eq!(indexes, entity_types);
    assert!(
        !runtime
            .search()
            .has_index(&ctx, EntityTypeId::parse("Bar")?)
            .await?
    );
    assert!(runtime.consistency_report(&ctx).await?.is_consistent());
    Ok(())
}

#[tokio::test]
async fn attribute_type_change_is_visible_in_attribute_metadata() -> TestResult {
    let ctx = RequestContext::new_request();
    let runtime = runtime(RecordingLogger::new())?;
    let people = dynamic_type("People")?;

    let created = people.clone();
    runtime
        .run_in_transaction(&ctx, |metadata| {
            let ctx = ctx.clone();
            async move {
                let repository = metadata.create_repository(&ctx, created).await?;
                repository
                    .add(
                        &ctx,
                        row("p1", &[("name", json!("Ada")), ("email", json!("ada@example.org"))])?,
                    )
                    .await
            }
        })
        .await?;
    runtime.wait_for_work_to_be_finished(&ctx).await?;
    assert_eq!(
        attribute_docs(
            &ctx,
            &runtime,
            Query::eq("id", "People.email").and("type", "email")
        )
        .await?,
        1
    );

    let mut as_string = attribute(&people, "email")?;
    as_string.attr_type = reindex_domain::AttributeType::String;
    runtime
        .run_in_transaction(&ctx, |metadata| {
            let ctx = ctx.clone();
            async move {
                metadata
                    .update_attribute(
                        &ctx,
                        EntityTypeId::parse("People")?,
                        AttributeName::parse("email")?,
                        as_string,
                    )
                    .await
            }
        })
        .await?;
    runtime
        .wait_for_index_to_be_stable(&ctx, &people.id)
        .await?;

    assert_eq!(
        attribute_docs(
            &ctx,
            &runtime,
            Query::eq("id", "People.email").and("type", "string")
        )
        .await?,
        1
    );
    assert_eq!(
        attribute_docs(
            &ctx,
            &runtime,
            Query::eq("id", "People.email").and("type", "email")
        )
        .await?,
        0
    );
    assert_eq!(
        runtime
            .search()
            .count(&ctx, people.id.clone(), Query::eq("email", "ada@example.org"))
            .await?,
        1
    );
    assert!(runtime.consistency_report(&ctx).await?.is_consistent());
    Ok(())
}

#[tokio::test]
async fn compound_attribute_delete_and_restore() -> TestResult {
    let ctx = RequestContext::new_request();
    let runtime = runtime(RecordingLogger::new())?;
    let place = compound_type("Place")?;
    let address = attribute(&place, "address")?;
    let street = attribute(&place, "street")?;

    let created = place.clone();
    runtime
        .run_in_transaction(&ctx, |metadata| {
            let ctx = ctx.clone();
            async move {
                metadata.create_repository(&ctx, created).await?;
                Ok::<(), ErrorEnvelope>(())
            }
        })
        .await?;
    runtime
        .run_in_transaction(&ctx, |metadata| {
            let ctx = ctx.clone();
            async move {
                metadata
                    .delete_attribute(
                        &ctx,
                        EntityTypeId::parse("Place")?,
                        AttributeName::parse("address")?,
                    )
                    .await
            }
        })
        .await?;
    runtime.wait_for_index_to_be_stable(&ctx, &place.id).await?;

    for id in ["Place.address", "Place.street"] {
        assert_eq!(attribute_docs(&ctx, &runtime, Query::eq("id", id)).await?, 0);
    }
    let mapping = runtime
        .search()
        .mapping(&ctx, place.id.clone())
        .await?
        .ok_or("mapping missing")?;
    assert!(mapping.field("street").is_none());

    let restored: [Attribute; 2] = [address, street];
    runtime
        .run_in_transaction(&ctx, |metadata| {
            let ctx = ctx.clone();
            async move {
                let entity_type_id = EntityTypeId::parse("Place")?;
                for attribute in restored {
                    metadata
                        .add_attribute(&ctx, entity_type_id.clone(), attribute)
                        .await?;
                }
                Ok::<(), ErrorEnvelope>(())
            }
        })
        .await?;
    runtime.wait_for_index_to_be_stable(&ctx, &place.id).await?;

    for id in ["Place.address", "Place.street"] {
        assert_eq!(attribute_docs(&ctx, &runtime, Query::eq("id", id)).await?, 1);
    }
    assert!(runtime.consistency_report(&ctx).await?.is_consistent());
    Ok(())
}

#[tokio::test]
async fn rolled_back_transaction_leaves_index_untouched() -> TestResult {
    let ctx = RequestContext::new_request();
    let logger = RecordingLogger::new();
    let runtime = runtime(logger.clone())?;

    let outcome = runtime
        .run_in_transaction(&ctx, |metadata| {
            let ctx = ctx.clone();
            async move {
                metadata.create_repository(&ctx, simple_type("Ghost")?).await?;
                Err::<(), ErrorEnvelope>(ErrorEnvelope::expected(
                    ErrorCode::invalid_input(),
                    "caller aborted",
                ))
            }
        })
        .await;
    assert!(outcome.is_err());
    runtime.wait_for_work_to_be_finished(&ctx).await?;

    assert!(
        !runtime
            .search()
            .has_index(&ctx, EntityTypeId::parse("Ghost")?)
            .await?
    );
    assert!(runtime.store().records(&ctx, None).await?.is_empty());
    assert!(
        !runtime
            .collection()
            .has_repository(&ctx, EntityTypeId::parse("Ghost")?)
            .await?
    );
    let report = runtime.consistency_report(&ctx).await?;
    assert!(report.is_consistent(), "{report:?}");
    assert_eq!(logger.events_named("reindex.transaction.rolled_back").len(), 1);
    Ok(())
}

#[tokio::test]
async fn rolled_back_schema_and_row_changes_are_restored() -> TestResult {
    let ctx = RequestContext::new_request();
    let runtime = runtime(RecordingLogger::new())?;
    create_types(&ctx, &runtime, &["Foo", "Bar"]).await?;
    runtime
        .run_in_transaction(&ctx, |metadata| {
            let ctx = ctx.clone();
            async move {
                let repository = metadata
                    .get_repository(&ctx, EntityTypeId::parse("Foo")?)
                    .await?
                    .ok_or_else(|| {
                        ErrorEnvelope::expected(ErrorCode::not_found(), "Foo missing")
                    })?;
                repository.add(&ctx, row("1", &[("label", json!("one"))])?).await
            }
        })
        .await?;
    runtime.wait_for_work_to_be_finished(&ctx).await?;

    let outcome = runtime
        .run_in_transaction(&ctx, |metadata| {
            let ctx = ctx.clone();
            async move {
                let foo = EntityTypeId::parse("Foo")?;
                metadata
                    .delete_attribute(&ctx, foo.clone(), AttributeName::parse("label")?)
                    .await?;
                let repository = metadata.get_repository(&ctx, foo).await?.ok_or_else(|| {
                    ErrorEnvelope::expected(ErrorCode::not_found(), "Foo missing")
                })?;
                repository.add(&ctx, row("2", &[])?).await?;
                metadata
                    .delete_repository(&ctx, EntityTypeId::parse("Bar")?)
                    .await?;
                Err::<(), ErrorEnvelope>(ErrorEnvelope::expected(
                    ErrorCode::invalid_input(),
                    "caller aborted",
                ))
            }
        })
        .await;
    assert!(outcome.is_err());
    runtime.wait_for_work_to_be_finished(&ctx).await?;

    let foo = EntityTypeId::parse("Foo")?;
    let repository = runtime
        .collection()
        .get_repository(&ctx, foo.clone())
        .await?
        .ok_or("Foo missing")?;
    assert_eq!(repository.entity_type(&ctx).await?, simple_type("Foo")?);
    assert_eq!(repository.count(&ctx).await?, 1);
    assert!(
        runtime
            .collection()
            .has_repository(&ctx, EntityTypeId::parse("Bar")?)
            .await?
    );
    assert_eq!(
        runtime
            .search()
            .count(&ctx, foo, Query::eq("label", "one"))
            .await?,
        1
    );
    let report = runtime.consistency_report(&ctx).await?;
    assert!(report.is_consistent(), "{report:?}");
    Ok(())
}

#[tokio::test]
async fn committed_jobs_end_successful_in_the_outbox() -> TestResult {
    let ctx = RequestContext::new_request();
    let runtime = runtime(RecordingLogger::new())?;

    create_types(&ctx, &runtime, &["Foo"]).await?;
    runtime
        .run_in_transaction(&ctx, |metadata| {
            let ctx = ctx.clone();
            async move {
                let repository = metadata
                    .get_repository(&ctx, EntityTypeId::parse("Foo")?)
                    .await?
                    .ok_or_else(|| {
                        ErrorEnvelope::expected(ErrorCode::not_found(), "Foo missing")
                    })?;
                repository.add(&ctx, row("1", &[("label", json!("one"))])?).await?;
                repository.add(&ctx, row("2", &[("label", json!("two"))])?).await
            }
        })
        .await?;
    runtime.wait_for_work_to_be_finished(&ctx).await?;

    let records = runtime.store().records(&ctx, None).await?;
    assert!(!records.is_empty());
    for record in &records {
        assert_eq!(
            runtime
                .store()
                .job_status(&ctx, record.job_id.clone())
                .await?,
            Some(JobState::Success)
        );
    }
    assert_eq!(
        runtime
            .search()
            .count(&ctx, EntityTypeId::parse("Foo")?, Query::all())
            .await?,
        2
    );
    let report = runtime.consistency_report(&ctx).await?;
    assert!(report.is_consistent(), "{report:?}");
    Ok(())
}
