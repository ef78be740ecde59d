//! System metadata indexes.
//!
//! Besides one index per entity type, the search backend holds two system
//! indexes describing the schema itself: one document per entity type and one
//! per attribute. Callers query them to verify that schema changes reached the
//! index (e.g. counting attribute docs with `type == "string"`).

use crate::{
    Attribute, AttributeName, AttributeType, EntityId, EntityType, EntityTypeId, IndexDocument,
    PrimitiveError, derive_attribute_document_id,
};
use serde_json::Value;

/// Index holding one document per entity type.
pub const ENTITY_TYPE_METADATA: &str = "sys_md_EntityType";

/// Index holding one document per attribute.
pub const ATTRIBUTE_METADATA: &str = "sys_md_Attribute";

/// Returns true for the ids of the two system metadata indexes.
#[must_use]
pub fn is_system_index(entity_type_id: &EntityTypeId) -> bool {
    matches!(entity_type_id.as_str(), ENTITY_TYPE_METADATA | ATTRIBUTE_METADATA)
}

fn attr(name: &str, attr_type: AttributeType) -> Result<Attribute, PrimitiveError> {
    Ok(Attribute::new(AttributeName::parse(name)?, attr_type))
}

/// Definition of the entity type metadata index.
pub fn entity_type_metadata() -> Result<EntityType, PrimitiveError> {
    Ok(EntityType::new(
        EntityTypeId::parse(ENTITY_TYPE_METADATA)?,
        AttributeName::parse("id")?,
    )
    .with_package("sys_md")
    .with_label("Entity type")
    .with_attribute(attr("package", AttributeType::String)?)
    .with_attribute(attr("label", AttributeType::String)?)
    .with_attribute(attr("isSystem", AttributeType::Bool)?)
    .as_system())
}

/// Definition of the attribute metadata index.
pub fn attribute_metadata() -> Result<EntityType, PrimitiveError> {
    Ok(EntityType::new(
        EntityTypeId::parse(ATTRIBUTE_METADATA)?,
        AttributeName::parse("id")?,
    )
    .with_package("sys_md")
    .with_label("Attribute")
    .with_attribute(attr("entity", AttributeType::String)?)
    .with_attribute(attr("name", AttributeType::String)?)
    .with_attribute(attr("type", AttributeType::Enum)?)
    .with_attribute(attr("parent", AttributeType::String)?)
    .with_attribute(attr("label", AttributeType::String)?)
    .as_system())
}

/// Entity type metadata document for `entity_type`.
pub fn entity_type_document(entity_type: &EntityType) -> Result<IndexDocument, PrimitiveError> {
    let package = entity_type
        .package
        .as_deref()
        .map_or(Value::Null, Value::from);
    Ok(IndexDocument::new(EntityId::parse(entity_type.id.as_str())?)
        .with_field("id", entity_type.id.as_str())
        .with_field("package", package)
        .with_field("label", entity_type.label.as_ref())
        .with_field("isSystem", entity_type.system))
}

/// Attribute metadata document id.
pub fn attribute_document_id(
    entity_type_id: &EntityTypeId,
    attribute: &AttributeName,
) -> Result<EntityId, PrimitiveError> {
    derive_attribute_document_id(entity_type_id, attribute)
}

/// One attribute metadata document per attribute of `entity_type`.
pub fn attribute_documents(entity_type: &EntityType) -> Result<Vec<IndexDocument>, PrimitiveError> {
    entity_type
        .attributes
        .iter()
        .map(|attribute| {
            let id = attribute_document_id(&entity_type.id, &attribute.name)?;
            let parent = attribute
                .parent
                .as_ref()
                .map_or(Value::Null, |parent| Value::from(parent.as_str()));
            let label = attribute
                .label
                .as_deref()
                .map_or(Value::Null, Value::from);
            Ok(IndexDocument::new(id.clone())
                .with_field("id", id.as_str())
                .with_field("entity", entity_type.id.as_str())
                .with_field("name", attribute.name.as_str())
                .with_field("type", attribute.attr_type.value_string())
                .with_field("parent", parent)
                .with_field("label", label))
        })
        .collect()
}
