//! Integration coverage for primitives, actions and jobs.

use reindex_domain::{
    CudType, EntityId, EntityTypeId, JobId, PrimitiveError, ReindexAction, ReindexJob,
};
use reindex_shared::ErrorEnvelope;

#[test]
fn primitive_errors_map_into_error_envelopes() -> Result<(), PrimitiveError> {
    let Err(error) = EntityTypeId::parse("bad-name") else {
        return Err(PrimitiveError::InvalidEntityTypeId {
            input: "bad-name".to_owned(),
        });
    };

    let envelope: ErrorEnvelope = error.into();
    assert_eq!(envelope.code.namespace(), "domain");
    assert_eq!(envelope.code.code(), "invalid_entity_type_id");
    assert_eq!(envelope.metadata_value("input"), Some("bad-name"));

    let Err(error) = EntityId::parse("  ") else {
        return Err(PrimitiveError::InvalidEntityId { input_length: 2 });
    };
    let envelope: ErrorEnvelope = error.into();
    assert_eq!(envelope.code.code(), "invalid_entity_id");
    assert_eq!(envelope.metadata_value("input_length"), Some("2"));
    Ok(())
}

#[test]
fn job_serialization_shape() -> Result<(), Box<dyn std::error::Error>> {
    let foo = EntityTypeId::parse("Foo")?;
    let job = ReindexJob::new(
        JobId::parse("job-9")?,
        vec![
            ReindexAction::metadata(foo.clone(), CudType::Create, 0),
            ReindexAction::data(foo, CudType::Create, EntityId::parse("1")?, 1),
        ],
    )?;

    let value = serde_json::to_value(&job)?;
    let expected = serde_json::json!({
        "jobId": "job-9",
        "actions": [
            {
                "entityTypeId": "Foo",
                "cudType": "CREATE",
                "dataType": "METADATA",
                "actionOrder": 0
            },
            {
                "entityTypeId": "Foo",
                "cudType": "CREATE",
                "dataType": "DATA",
                "entityId": "1",
                "actionOrder": 1
            }
        ]
    });
    assert_eq!(value, expected);

    let decoded: ReindexJob = serde_json::from_value(value)?;
    assert_eq!(decoded, job);
    Ok(())
}

#[test]
fn type_deletion_is_recognised() -> Result<(), PrimitiveError> {
    let foo = EntityTypeId::parse("Foo")?;
    assert!(ReindexAction::metadata(foo.clone(), CudType::Delete, 0).is_type_deletion());
    assert!(!ReindexAction::metadata(foo.clone(), CudType::Update, 0).is_type_deletion());
    assert!(!ReindexAction::data(foo, CudType::Delete, EntityId::parse("1")?, 0).is_type_deletion());
    Ok(())
}
