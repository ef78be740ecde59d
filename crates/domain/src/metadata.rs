//! Entity type metadata and the index mapping derived from it.
//!
//! An [`EntityType`] describes a collection in the metadata store. Its
//! [`Mapping`] is what the search backend needs to index rows of that type;
//! diffing two mappings decides whether a schema update can be applied in
//! place or forces a rebuild.

use crate::{AttributeName, EntityTypeId, PrimitiveError, ReindexError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Attribute data types known to the metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    /// `true`/`false`.
    Bool,
    /// Reference rendered as a pick list.
    Categorical,
    /// Multi-reference rendered as a pick list.
    CategoricalMref,
    /// Grouping of child attributes, holds no value itself.
    Compound,
    /// Calendar date.
    Date,
    /// Date with time.
    #[serde(rename = "datetime")]
    DateTime,
    /// Floating point number.
    Decimal,
    /// E-mail address.
    Email,
    /// One of a fixed set of strings.
    Enum,
    /// Reference to a stored file.
    File,
    /// HTML markup.
    Html,
    /// URL.
    Hyperlink,
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    Long,
    /// Multi-reference.
    Mref,
    /// Inverse side of a one-to-many relation.
    OneToMany,
    /// Script source.
    Script,
    /// Short string.
    String,
    /// Long text.
    Text,
    /// Single reference.
    Xref,
}

impl AttributeType {
    /// Every attribute type, in declaration order.
    pub const ALL: [Self; 20] = [
        Self::Bool,
        Self::Categorical,
        Self::CategoricalMref,
        Self::Compound,
        Self::Date,
        Self::DateTime,
        Self::Decimal,
        Self::Email,
        Self::Enum,
        Self::File,
        Self::Html,
        Self::Hyperlink,
        Self::Int,
        Self::Long,
        Self::Mref,
        Self::OneToMany,
        Self::Script,
        Self::String,
        Self::Text,
        Self::Xref,
    ];

    /// Lower-case name stored in the attribute metadata index.
    #[must_use]
    pub const fn value_string(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Categorical => "categorical",
            Self::CategoricalMref => "categorical_mref",
            Self::Compound => "compound",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Decimal => "decimal",
            Self::Email => "email",
            Self::Enum => "enum",
            Self::File => "file",
            Self::Html => "html",
            Self::Hyperlink => "hyperlink",
            Self::Int => "int",
            Self::Long => "long",
            Self::Mref => "mref",
            Self::OneToMany => "one_to_many",
            Self::Script => "script",
            Self::String => "string",
            Self::Text => "text",
            Self::Xref => "xref",
        }
    }

    /// Parse a value string, case-insensitively.
    pub fn parse(input: &str) -> Result<Self, PrimitiveError> {
        let lower = input.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.value_string() == lower)
            .ok_or_else(|| PrimitiveError::UnknownVariant {
                field: "attributeType",
                input: input.to_owned(),
            })
    }

    /// Index field kind for values of this type.
    #[must_use]
    pub const fn field_kind(self) -> FieldKind {
        match self {
            Self::Bool => FieldKind::Boolean,
            Self::Categorical
            | Self::Email
            | Self::Enum
            | Self::File
            | Self::Hyperlink
            | Self::String
            | Self::Xref => FieldKind::Keyword,
            Self::CategoricalMref | Self::Mref | Self::OneToMany => FieldKind::KeywordList,
            Self::Compound => FieldKind::Group,
            Self::Date => FieldKind::Date,
            Self::DateTime => FieldKind::DateTime,
            Self::Decimal => FieldKind::Double,
            Self::Html | Self::Script | Self::Text => FieldKind::Text,
            Self::Int => FieldKind::Integer,
            Self::Long => FieldKind::Long,
        }
    }

    /// Returns true for types that point at another entity type.
    #[must_use]
    pub const fn is_reference(self) -> bool {
        matches!(
            self,
            Self::Categorical | Self::CategoricalMref | Self::Mref | Self::OneToMany | Self::Xref
        )
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.value_string())
    }
}

/// How the search backend stores a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Exact-match string.
    Keyword,
    /// List of exact-match strings.
    KeywordList,
    /// Full-text string.
    Text,
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    Long,
    /// Floating point.
    Double,
    /// Boolean.
    Boolean,
    /// ISO date string.
    Date,
    /// ISO date-time string.
    DateTime,
    /// Structural grouping, never holds a value.
    Group,
}

impl FieldKind {
    /// Returns true when `value` can be stored in a field of this kind.
    #[must_use]
    pub fn accepts(self, value: &serde_json::Value) -> bool {
        use serde_json::Value;

        match (self, value) {
            (Self::Group, _) => false,
            (_, Value::Null) => true,
            (Self::Keyword | Self::Text | Self::Date | Self::DateTime, Value::String(_)) => true,
            (Self::Integer, Value::Number(number)) => number
                .as_i64()
                .is_some_and(|n| i32::try_from(n).is_ok()),
            (Self::Long, Value::Number(number)) => number.is_i64(),
            (Self::Double, Value::Number(_)) | (Self::Boolean, Value::Bool(_)) => true,
            (Self::KeywordList, Value::Array(items)) => items.iter().all(Value::is_string),
            _ => false,
        }
    }
}

/// One attribute of an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    /// Attribute name.
    pub name: AttributeName,
    /// Data type.
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    /// Owning compound attribute, if nested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<AttributeName>,
    /// Referenced entity type for reference attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_entity_type: Option<EntityTypeId>,
    /// Display label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<Box<str>>,
}

impl Attribute {
    /// Top-level attribute without a reference target.
    #[must_use]
    pub const fn new(name: AttributeName, attr_type: AttributeType) -> Self {
        Self {
            name,
            attr_type,
            parent: None,
            ref_entity_type: None,
            label: None,
        }
    }

    /// Nest under a compound attribute.
    #[must_use]
    pub fn with_parent(mut self, parent: AttributeName) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Point at a referenced entity type.
    #[must_use]
    pub fn with_ref_entity_type(mut self, ref_entity_type: EntityTypeId) -> Self {
        self.ref_entity_type = Some(ref_entity_type);
        self
    }

    /// Set a display label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<Box<str>>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Definition of a collection in the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityType {
    /// Identifier, also used as index name.
    pub id: EntityTypeId,
    /// Owning package.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<Box<str>>,
    /// Display label.
    pub label: Box<str>,
    /// Attribute holding the row id.
    pub id_attribute: AttributeName,
    /// Attributes in declaration order.
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    /// Built-in type that cannot be deleted.
    #[serde(default)]
    pub system: bool,
}

impl EntityType {
    /// Entity type whose id attribute is a string named `id_attribute`.
    #[must_use]
    pub fn new(id: EntityTypeId, id_attribute: AttributeName) -> Self {
        let label = id.as_str().into();
        let attributes = vec![Attribute::new(id_attribute.clone(), AttributeType::String)];
        Self {
            id,
            package: None,
            label,
            id_attribute,
            attributes,
            system: false,
        }
    }

    /// Set the owning package.
    #[must_use]
    pub fn with_package(mut self, package: impl Into<Box<str>>) -> Self {
        self.package = Some(package.into());
        self
    }

    /// Set the display label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<Box<str>>) -> Self {
        self.label = label.into();
        self
    }

    /// Append an attribute (no validation; see [`EntityType::mapping`]).
    #[must_use]
    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Mark as a system type.
    #[must_use]
    pub const fn as_system(mut self) -> Self {
        self.system = true;
        self
    }

    /// Look up an attribute by name.
    #[must_use]
    pub fn attribute(&self, name: &AttributeName) -> Option<&Attribute> {
        self.attributes.iter().find(|attr| &attr.name == name)
    }

    /// Names of `name` and every attribute nested below it.
    #[must_use]
    pub fn subtree(&self, name: &AttributeName) -> BTreeSet<AttributeName> {
        let mut found = BTreeSet::new();
        if self.attribute(name).is_none() {
            return found;
        }
        found.insert(name.clone());
        loop {
            let before = found.len();
            for attr in &self.attributes {
                if attr.parent.as_ref().is_some_and(|p| found.contains(p)) {
                    found.insert(attr.name.clone());
                }
            }
            if found.len() == before {
                return found;
            }
        }
    }

    /// Derive the index mapping, rejecting shapes the index cannot represent.
    pub fn mapping(&self) -> Result<Mapping, ReindexError> {
        let conflict = |attribute: Option<&AttributeName>, reason: String| {
            ReindexError::SchemaConflict {
                entity_type_id: self.id.clone(),
                attribute: attribute.cloned(),
                reason,
            }
        };

        let mut fields = BTreeMap::new();
        for attr in &self.attributes {
            let field = MappingField {
                attr_type: attr.attr_type,
                kind: attr.attr_type.field_kind(),
                parent: attr.parent.clone(),
            };
            if fields.insert(attr.name.clone(), field).is_some() {
                return Err(conflict(Some(&attr.name), "duplicate attribute name".into()));
            }
            if attr.attr_type.is_reference() && attr.ref_entity_type.is_none() {
                return Err(conflict(
                    Some(&attr.name),
                    format!("{} attribute without referenced entity type", attr.attr_type),
                ));
            }
        }

        for attr in &self.attributes {
            let Some(parent) = &attr.parent else { continue };
            match fields.get(parent) {
                Some(field) if field.kind == FieldKind::Group => {},
                Some(field) => {
                    return Err(conflict(
                        Some(&attr.name),
                        format!("parent {parent} is {} not compound", field.attr_type),
                    ));
                },
                None => {
                    return Err(conflict(Some(&attr.name), format!("parent {parent} does not exist")));
                },
            }
        }

        match fields.get(&self.id_attribute) {
            None => Err(conflict(
                Some(&self.id_attribute),
                "id attribute does not exist".into(),
            )),
            Some(field) if !matches!(field.kind, FieldKind::Keyword | FieldKind::Integer | FieldKind::Long) => {
                Err(conflict(
                    Some(&self.id_attribute),
                    format!("{} cannot be used as id attribute", field.attr_type),
                ))
            },
            Some(_) => Ok(Mapping {
                entity_type_id: self.id.clone(),
                fields,
            }),
        }
    }
}

/// One field of an index mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingField {
    /// Source attribute type.
    pub attr_type: AttributeType,
    /// Storage kind.
    pub kind: FieldKind,
    /// Owning compound field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<AttributeName>,
}

/// The search backend's schema for one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
    /// Indexed entity type.
    pub entity_type_id: EntityTypeId,
    /// Fields keyed by attribute name.
    pub fields: BTreeMap<AttributeName, MappingField>,
}

impl Mapping {
    /// Field lookup by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&MappingField> {
        self.fields
            .iter()
            .find_map(|(field_name, field)| (field_name.as_str() == name).then_some(field))
    }

    /// Changes needed to go from `previous` to `self`.
    #[must_use]
    pub fn diff(&self, previous: &Self) -> MappingDiff {
        let mut diff = MappingDiff::default();
        for (name, field) in &self.fields {
            match previous.fields.get(name) {
                None => diff.added.push(name.clone()),
                Some(old) if old.attr_type != field.attr_type || old.parent != field.parent => {
                    diff.changed.push(FieldChange {
                        name: name.clone(),
                        from: old.attr_type,
                        to: field.attr_type,
                    });
                },
                Some(_) => {},
            }
        }
        diff.removed = previous
            .fields
            .keys()
            .filter(|name| !self.fields.contains_key(*name))
            .cloned()
            .collect();
        diff
    }

    /// Reject documents with unknown fields or values of the wrong kind.
    pub fn check_document(&self, document: &crate::IndexDocument) -> Result<(), ReindexError> {
        for (name, value) in &document.fields {
            let Some(field) = self.field(name) else {
                return Err(ReindexError::SchemaConflict {
                    entity_type_id: self.entity_type_id.clone(),
                    attribute: AttributeName::parse(name.as_ref()).ok(),
                    reason: format!("field {name} is not mapped"),
                });
            };
            if !field.kind.accepts(value) {
                return Err(ReindexError::SchemaConflict {
                    entity_type_id: self.entity_type_id.clone(),
                    attribute: AttributeName::parse(name.as_ref()).ok(),
                    reason: format!("value {value} does not fit a {} field", field.attr_type),
                });
            }
        }
        Ok(())
    }
}

/// A field whose attribute type (or nesting) changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    /// Field name.
    pub name: AttributeName,
    /// Previous type.
    pub from: AttributeType,
    /// New type.
    pub to: AttributeType,
}

/// Result of [`Mapping::diff`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingDiff {
    /// Fields only in the new mapping.
    pub added: Vec<AttributeName>,
    /// Fields only in the old mapping.
    pub removed: Vec<AttributeName>,
    /// Fields present in both with a different type.
    pub changed: Vec<FieldChange>,
}

impl MappingDiff {
    /// Returns true when the mappings are identical.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// A changed type cannot be altered in place; the index must be rebuilt.
    #[must_use]
    pub fn requires_rebuild(&self) -> bool {
        !self.changed.is_empty()
    }

    /// Stored documents still carry values for removed fields.
    #[must_use]
    pub fn requires_reindex(&self) -> bool {
        self.requires_rebuild() || !self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn name(value: &str) -> AttributeName {
        AttributeName::parse(value).unwrap_or_else(|_| unreachable!())
    }

    fn person() -> EntityType {
        EntityType::new(
            EntityTypeId::parse("Person").unwrap_or_else(|_| unreachable!()),
            name("id"),
        )
        .with_attribute(Attribute::new(name("email"), AttributeType::Email))
        .with_attribute(Attribute::new(name("address"), AttributeType::Compound))
        .with_attribute(Attribute::new(name("street"), AttributeType::String).with_parent(name("address")))
    }

    #[test]
    fn value_strings_parse_back() -> Result<(), PrimitiveError> {
        for attr_type in AttributeType::ALL {
            assert_eq!(AttributeType::parse(attr_type.value_string())?, attr_type);
        }
        assert_eq!(AttributeType::parse("STRING")?, AttributeType::String);
        Ok(())
    }

    #[test]
    fn mapping_includes_nested_fields() -> Result<(), ReindexError> {
        let mapping = person().mapping()?;
        assert_eq!(mapping.fields.len(), 4);
        assert_eq!(mapping.field("address").map(|f| f.kind), Some(FieldKind::Group));
        assert_eq!(
            mapping.field("street").and_then(|f| f.parent.clone()),
            Some(name("address"))
        );
        Ok(())
    }

    #[test]
    fn mapping_rejects_unrepresentable_shapes() {
        let orphan = person()
            .with_attribute(Attribute::new(name("zip"), AttributeType::String).with_parent(name("nope")));
        assert!(matches!(orphan.mapping(), Err(ReindexError::SchemaConflict { .. })));

        let dangling_ref = person().with_attribute(Attribute::new(name("friend"), AttributeType::Xref));
        assert!(matches!(dangling_ref.mapping(), Err(ReindexError::SchemaConflict { .. })));

        let duplicate = person().with_attribute(Attribute::new(name("email"), AttributeType::Text));
        assert!(matches!(duplicate.mapping(), Err(ReindexError::SchemaConflict { .. })));

        let mut compound_id = person();
        compound_id.id_attribute = name("address");
        assert!(matches!(compound_id.mapping(), Err(ReindexError::SchemaConflict { .. })));
    }

    #[test]
    fn diff_detects_type_change_as_rebuild() -> Result<(), ReindexError> {
        let before = person().mapping()?;
        let mut changed = person();
        for attr in &mut changed.attributes {
            if attr.name.as_str() == "email" {
                attr.attr_type = AttributeType::String;
            }
        }
        let diff = changed.mapping()?.diff(&before);
        assert!(diff.requires_rebuild());
        assert_eq!(
            diff.changed,
            vec![FieldChange {
                name: name("email"),
                from: AttributeType::Email,
                to: AttributeType::String,
            }]
        );
        Ok(())
    }

    #[test]
    fn diff_reports_added_and_removed() -> Result<(), ReindexError> {
        let before = person().mapping()?;
        let mut after = person().with_attribute(Attribute::new(name("age"), AttributeType::Int));
        after.attributes.retain(|attr| attr.name.as_str() != "email");
        let diff = after.mapping()?.diff(&before);

        assert_eq!(diff.added, vec![name("age")]);
        assert_eq!(diff.removed, vec![name("email")]);
        assert!(!diff.requires_rebuild());
        assert!(diff.requires_reindex());
        assert!(after.mapping()?.diff(&after.mapping()?).is_empty());
        Ok(())
    }

    #[test]
    fn subtree_collects_nested_children() {
        let entity = person()
            .with_attribute(Attribute::new(name("geo"), AttributeType::Compound).with_parent(name("address")))
            .with_attribute(Attribute::new(name("lat"), AttributeType::Decimal).with_parent(name("geo")));
        let subtree = entity.subtree(&name("address"));
        let names: Vec<&str> = subtree.iter().map(AttributeName::as_str).collect();
        assert_eq!(names, vec!["address", "geo", "lat", "street"]);
        assert!(entity.subtree(&name("missing")).is_empty());
    }

    #[test]
    fn field_kinds_check_values() {
        assert!(FieldKind::Keyword.accepts(&json!("a@b.org")));
        assert!(FieldKind::Integer.accepts(&json!(5)));
        assert!(!FieldKind::Integer.accepts(&json!(5_000_000_000_i64)));
        assert!(FieldKind::Long.accepts(&json!(5_000_000_000_i64)));
        assert!(FieldKind::KeywordList.accepts(&json!(["a", "b"])));
        assert!(!FieldKind::Boolean.accepts(&json!("true")));
        assert!(FieldKind::Double.accepts(&serde_json::Value::Null));
        assert!(!FieldKind::Group.accepts(&serde_json::Value::Null));
    }
}
