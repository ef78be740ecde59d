//! Effective config rendering.

use crate::InfraResult;
use reindex_config::{ReindexEnv, load_reindex_config_from_path, to_pretty_json};
use reindex_shared::ErrorEnvelope;
use std::collections::BTreeMap;
use std::path::Path;

/// Load and validate the effective config, returning deterministic pretty JSON.
pub fn load_effective_config_json(
    env: &BTreeMap<String, String>,
    config_path: Option<&Path>,
    overrides_json: Option<&str>,
) -> InfraResult<String> {
    let env = ReindexEnv::from_map(env).map_err(ErrorEnvelope::from)?;
    let config = load_reindex_config_from_path(config_path, overrides_json, &env)?;
    to_pretty_json(&config)
}
