//! Loading `swapguard.toml` from disk

use pretty_assertions::assert_eq;
use std::io::Write;
use swapguard_node::{ConfigError, NodeConfig};
use swapguard_supervisor::SupervisionStrategy;

#[test]
fn shipped_sample_matches_defaults() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../swapguard.toml");
    let config = NodeConfig::load(path).unwrap();
    assert_eq!(config, NodeConfig::default());
}

#[test]
fn file_overrides_are_applied() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[supervisor]\nstrategy = \"one_for_all\"\ntree_max_restarts = 2\n\n[logging]\njson = true"
    )
    .unwrap();

    let config = NodeConfig::load(file.path()).unwrap();
    assert_eq!(config.supervisor.strategy, SupervisionStrategy::OneForAll);
    assert_eq!(config.supervisor_config("node").tree_budget.max_restarts, 2);
    assert!(config.logging.json);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn missing_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let err = NodeConfig::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
    assert!(err.to_string().contains("absent.toml"));
}

#[test]
fn invalid_file_rejected_on_load() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[retry]\nbase_delay_ms = 5000\nmax_delay_ms = 100").unwrap();
    let err = NodeConfig::load(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}
