//! Rows, index documents and the equality queries used to count them.

use crate::{EntityId, Mapping};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Field values keyed by attribute name.
pub type FieldValues = BTreeMap<Box<str>, Value>;

/// A row stored in the metadata store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Row id.
    pub id: EntityId,
    /// Attribute values.
    #[serde(default)]
    pub values: FieldValues,
}

impl Entity {
    /// Row without values.
    #[must_use]
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            values: FieldValues::new(),
        }
    }

    /// Set one attribute value.
    #[must_use]
    pub fn with_value(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Attribute value lookup.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

/// A document as stored in the search index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDocument {
    /// Document id (row id).
    pub id: EntityId,
    /// Indexed field values.
    #[serde(default)]
    pub fields: FieldValues,
}

impl IndexDocument {
    /// Empty document.
    #[must_use]
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            fields: FieldValues::new(),
        }
    }

    /// Set one field value.
    #[must_use]
    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Project a row onto `mapping`: unmapped values and compound groups are dropped.
    #[must_use]
    pub fn from_entity(entity: &Entity, mapping: &Mapping) -> Self {
        let fields = entity
            .values
            .iter()
            .filter(|(name, _)| {
                mapping
                    .field(name)
                    .is_some_and(|field| field.kind != crate::FieldKind::Group)
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Self {
            id: entity.id.clone(),
            fields,
        }
    }
}

/// One `field == value` condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRule {
    /// Field name.
    pub field: Box<str>,
    /// Expected value.
    pub value: Value,
}

/// Conjunction of equality rules; no rules matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Rules combined with AND.
    pub rules: Vec<QueryRule>,
}

impl Query {
    /// Query matching every document.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Query with a single equality rule.
    #[must_use]
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::all().and(field, value)
    }

    /// Add an equality rule.
    #[must_use]
    pub fn and(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.rules.push(QueryRule {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Returns true when every rule holds for `document`.
    #[must_use]
    pub fn matches(&self, document: &IndexDocument) -> bool {
        self.rules
            .iter()
            .all(|rule| document.fields.get(&rule.field) == Some(&rule.value))
    }
}
