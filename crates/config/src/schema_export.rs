//! JSON Schema export for the reindex config file.

use crate::schema::ReindexConfig;
use schemars::{Schema, schema_for};

/// JSON Schema describing `ReindexConfig` (for editors and CI validation).
#[must_use]
pub fn reindex_config_schema() -> Schema {
    schema_for!(ReindexConfig)
}
