//! Domain primitives with validated constructors.

use crate::JobState;
use reindex_shared::{ErrorCode, ErrorEnvelope};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Validation failures for domain primitives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimitiveError {
    /// `EntityTypeId` is empty after trimming.
    EmptyEntityTypeId {
        /// Length of the raw input before trimming.
        input_length: usize,
    },
    /// `EntityTypeId` violates the allowed pattern.
    InvalidEntityTypeId {
        /// Trimmed identifier that failed validation.
        input: String,
    },
    /// `EntityId` is empty after trimming.
    InvalidEntityId {
        /// Length of the raw input before trimming.
        input_length: usize,
    },
    /// `AttributeName` is empty after trimming.
    InvalidAttributeName {
        /// Length of the raw input before trimming.
        input_length: usize,
    },
    /// `JobId` is empty after trimming.
    InvalidJobId {
        /// Length of the raw input before trimming.
        input_length: usize,
    },
    /// A string did not name a known enum variant.
    UnknownVariant {
        /// Enum being parsed (e.g. `cudType`).
        field: &'static str,
        /// Rejected input.
        input: String,
    },
    /// Actions of a job must carry strictly increasing `actionOrder` values.
    ActionOrderNotIncreasing {
        /// Order of the preceding action.
        previous: u64,
        /// Order that failed to increase.
        next: u64,
    },
    /// Job state machine transition not allowed.
    InvalidJobTransition {
        /// Current state.
        from: JobState,
        /// Requested state.
        to: JobState,
    },
    /// Derived document id is invalid (invariant violation).
    DerivedDocumentIdInvalid {
        /// Candidate id that failed validation.
        candidate: String,
    },
}

impl PrimitiveError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::EmptyEntityTypeId { .. } | Self::InvalidEntityTypeId { .. } => {
                ErrorCode::new("domain", "invalid_entity_type_id")
            },
            Self::InvalidEntityId { .. } | Self::DerivedDocumentIdInvalid { .. } => {
                ErrorCode::new("domain", "invalid_entity_id")
            },
            Self::InvalidAttributeName { .. } => ErrorCode::new("domain", "invalid_attribute_name"),
            Self::InvalidJobId { .. } => ErrorCode::new("domain", "invalid_job_id"),
            Self::UnknownVariant { .. } => ErrorCode::new("domain", "unknown_variant"),
            Self::ActionOrderNotIncreasing { .. } => ErrorCode::new("domain", "invalid_action_order"),
            Self::InvalidJobTransition { .. } => ErrorCode::new("domain", "invalid_job_transition"),
        }
    }

    const fn is_invariant(&self) -> bool {
        matches!(
            self,
            Self::DerivedDocumentIdInvalid { .. } | Self::InvalidJobTransition { .. }
        )
    }
}

impl fmt::Display for PrimitiveError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyEntityTypeId { .. } => formatter.write_str("EntityTypeId must be non-empty"),
            Self::InvalidEntityTypeId { .. } => {
                formatter.write_str("EntityTypeId must match /^[a-zA-Z][a-zA-Z0-9_#]*$/")
            },
            Self::InvalidEntityId { .. } => formatter.write_str("EntityId must be non-empty"),
            Self::InvalidAttributeName { .. } => {
                formatter.write_str("AttributeName must be non-empty")
            },
            Self::InvalidJobId { .. } => formatter.write_str("JobId must be non-empty"),
            Self::UnknownVariant { field, input } => {
                write!(formatter, "unknown {field} value: {input}")
            },
            Self::ActionOrderNotIncreasing { previous, next } => write!(
                formatter,
                "actionOrder must increase within a job ({next} follows {previous})"
            ),
            Self::InvalidJobTransition { from, to } => {
                write!(formatter, "job cannot move from {from} to {to}")
            },
            Self::DerivedDocumentIdInvalid { .. } => {
                formatter.write_str("Derived document id is invalid (this is a bug).")
            },
        }
    }
}

impl std::error::Error for PrimitiveError {}

impl From<PrimitiveError> for ErrorEnvelope {
    fn from(error: PrimitiveError) -> Self {
        let envelope = if error.is_invariant() {
            Self::invariant(error.error_code(), error.to_string())
        } else {
            Self::expected(error.error_code(), error.to_string())
        };

        match error {
            PrimitiveError::EmptyEntityTypeId { input_length }
            | PrimitiveError::InvalidEntityId { input_length }
            | PrimitiveError::InvalidAttributeName { input_length }
            | PrimitiveError::InvalidJobId { input_length } => {
                envelope.with_metadata("input_length", input_length.to_string())
            },
            PrimitiveError::InvalidEntityTypeId { input } => envelope.with_metadata("input", input),
            PrimitiveError::UnknownVariant { field, input } => envelope
                .with_metadata("field", field)
                .with_metadata("input", input),
            PrimitiveError::ActionOrderNotIncreasing { previous, next } => envelope
                .with_metadata("previous", previous.to_string())
                .with_metadata("next", next.to_string()),
            PrimitiveError::InvalidJobTransition { from, to } => envelope
                .with_metadata("from", from.as_str())
                .with_metadata("to", to.as_str()),
            PrimitiveError::DerivedDocumentIdInvalid { candidate } => {
                envelope.with_metadata("candidate", candidate)
            },
        }
    }
}

fn trimmed_non_empty(input: &str) -> Option<&str> {
    let trimmed = input.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn is_valid_entity_type_id(input: &str) -> bool {
    let mut chars = input.chars();
    chars.next().is_some_and(|first| first.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '#')
}

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident, $error:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Box<str>);

        impl $name {
            /// Parse from user input, trimming whitespace.
            pub fn parse(input: impl AsRef<str>) -> Result<Self, PrimitiveError> {
                let raw = input.as_ref();
                let Some(trimmed) = trimmed_non_empty(raw) else {
                    return Err(PrimitiveError::$error {
                        input_length: raw.len(),
                    });
                };
                Ok(Self(trimmed.into()))
            }

            /// Access the underlying string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the underlying string.
            #[must_use]
            pub fn into_inner(self) -> Box<str> {
                self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str(self.as_str())
            }
        }
    };
}

string_id!(
    /// Identifier of one row within an entity type.
    EntityId,
    InvalidEntityId
);
string_id!(
    /// Name of an attribute, unique within its entity type.
    AttributeName,
    InvalidAttributeName
);
string_id!(
    /// Identifier of one reindex job (one committed transaction).
    JobId,
    InvalidJobId
);

/// Identifier of an entity type; doubles as its index name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityTypeId(Box<str>);

impl EntityTypeId {
    /// Parse an entity type id (`[a-zA-Z][a-zA-Z0-9_#]*`).
    pub fn parse(input: impl AsRef<str>) -> Result<Self, PrimitiveError> {
        let raw = input.as_ref();
        let Some(trimmed) = trimmed_non_empty(raw) else {
            return Err(PrimitiveError::EmptyEntityTypeId {
                input_length: raw.len(),
            });
        };
        if !is_valid_entity_type_id(trimmed) {
            return Err(PrimitiveError::InvalidEntityTypeId {
                input: trimmed.to_owned(),
            });
        }
        Ok(Self(trimmed.into()))
    }

    /// Access the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the underlying string.
    #[must_use]
    pub fn into_inner(self) -> Box<str> {
        self.0
    }
}

impl TryFrom<String> for EntityTypeId {
    type Error = PrimitiveError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<EntityTypeId> for String {
    fn from(value: EntityTypeId) -> Self {
        value.0.into_string()
    }
}

impl AsRef<str> for EntityTypeId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for EntityTypeId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Document id of an attribute in the attribute metadata index: `{entityType}.{attribute}`.
pub fn derive_attribute_document_id(
    entity_type_id: &EntityTypeId,
    attribute: &AttributeName,
) -> Result<EntityId, PrimitiveError> {
    let candidate = format!("{entity_type_id}.{attribute}");
    EntityId::parse(candidate.as_str())
        .map_err(|_| PrimitiveError::DerivedDocumentIdInvalid { candidate })
}
