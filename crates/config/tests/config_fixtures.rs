//! File-based config fixtures.

use reindex_config::{
    LogFormat, LogLevelSetting, OutboxProvider, ReindexEnv, load_reindex_config_from_path,
};
use std::error::Error;
use std::path::PathBuf;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

#[test]
fn toml_fixture_loads_every_section() -> Result<(), Box<dyn Error>> {
    let path = fixture("reindex.toml");
    let config = load_reindex_config_from_path(Some(&path), None, &ReindexEnv::default())?;

    assert_eq!(config.limits().worker_concurrency.get(), 6);
    assert_eq!(config.limits().wait_timeout_ms.get(), 120_000);
    assert_eq!(config.limits().failed_queue_capacity.get(), 50);
    assert_eq!(config.retry_policy().max_attempts, 4);
    assert_eq!(config.outbox.provider, OutboxProvider::Sqlite);
    assert!(!config.outbox.purge_completed);
    assert_eq!(config.logging.min_level, LogLevelSetting::Debug);
    assert_eq!(config.logging.format, LogFormat::Pretty);
    Ok(())
}

#[test]
fn json_fixture_fills_defaults() -> Result<(), Box<dyn Error>> {
    let path = fixture("reindex.json");
    let env = ReindexEnv {
        worker_concurrency: Some(3),
        ..ReindexEnv::default()
    };
    let config = load_reindex_config_from_path(Some(&path), Some(r#"{"retry":{"maxAttempts":2}}"#), &env)?;

    assert_eq!(config.scheduler.worker_concurrency, 3);
    assert_eq!(config.retry.max_attempts, 2);
    assert_eq!(config.scheduler.wait_timeout_ms, 60_000);
    assert!(config.scheduler.cancel_data_on_delete);
    Ok(())
}
