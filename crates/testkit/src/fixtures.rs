//! Entity type and row builders shared by scenario tests.

use reindex_domain::{Attribute, AttributeName, AttributeType, EntityType, EntityTypeId, PrimitiveError};
use reindex_ports::{Entity, EntityId};
use serde_json::Value;

fn name(input: &str) -> Result<AttributeName, PrimitiveError> {
    AttributeName::parse(input)
}

/// `id` plus a string `label`.
pub fn simple_type(id: &str) -> Result<EntityType, PrimitiveError> {
    Ok(EntityType::new(EntityTypeId::parse(id)?, name("id")?)
        .with_package("test")
        .with_attribute(Attribute::new(name("label")?, AttributeType::String)))
}

/// `id`, a string `name` and an `email` attribute.
pub fn dynamic_type(id: &str) -> Result<EntityType, PrimitiveError> {
    Ok(EntityType::new(EntityTypeId::parse(id)?, name("id")?)
        .with_package("test")
        .with_attribute(Attribute::new(name("name")?, AttributeType::String))
        .with_attribute(Attribute::new(name("email")?, AttributeType::Email)))
}

/// `id`, a compound `address` and its `street` child.
pub fn compound_type(id: &str) -> Result<EntityType, PrimitiveError> {
    Ok(EntityType::new(EntityTypeId::parse(id)?, name("id")?)
        .with_package("test")
        .with_attribute(Attribute::new(name("address")?, AttributeType::Compound))
        .with_attribute(
            Attribute::new(name("street")?, AttributeType::String).with_parent(name("address")?),
        ))
}

/// Attribute lookup that fails loudly in tests.
pub fn attribute(entity_type: &EntityType, attribute: &str) -> Result<Attribute, PrimitiveError> {
    let wanted = name(attribute)?;
    entity_type
        .attribute(&wanted)
        .cloned()
        .ok_or_else(|| PrimitiveError::UnknownVariant {
            field: "attribute",
            input: attribute.to_owned(),
        })
}

/// Row whose id attribute is named `id`.
pub fn row(id: &str, values: &[(&str, Value)]) -> Result<Entity, PrimitiveError> {
    let mut entity = Entity::new(EntityId::parse(id)?).with_value("id", id);
    for (key, value) in values {
        entity = entity.with_value(key, value.clone());
    }
    Ok(entity)
}
