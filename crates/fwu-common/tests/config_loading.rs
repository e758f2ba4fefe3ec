//! ---
//! fwu_section: "01-core-functionality"
//! fwu_subsection: "tests"
//! fwu_type: "source"
//! fwu_scope: "code"
//! fwu_description: "Configuration loading integration tests."
//! fwu_version: "v0.1.0"
//! fwu_owner: "tbd"
//! ---
use std::fs;
use std::time::Duration;

use fwu_common::config::{AppConfig, LoggingConfig};
use fwu_common::init_tracing;
use tempfile::tempdir;

#[test]
fn loads_first_existing_candidate() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("missing.toml");
    let present = dir.path().join("fwu.toml");
    fs::write(
        &present,
        r#"
        [upgrade]
        command_timeout = 5

        [journal]
        enabled = true
        path = "ops.jsonl"
        "#,
    )
    .unwrap();

    let loaded = AppConfig::load_with_source(&[missing, present.clone()]).unwrap();
    assert_eq!(loaded.source, present);
    assert_eq!(loaded.config.upgrade.command_timeout, Duration::from_secs(5));
    assert!(loaded.config.journal.enabled);
}

#[test]
fn missing_candidates_fall_back_to_defaults() {
    let dir = tempdir().unwrap();
    let config = AppConfig::load_or_default(&[dir.path().join("nope.toml")]).unwrap();
    assert_eq!(config.upgrade.max_attempts, 5);
    assert!(AppConfig::load(&[dir.path().join("nope.toml")]).is_err());
}

#[test]
fn tracing_initialises_into_directory() {
    let dir = tempdir().unwrap();
    let config = LoggingConfig {
        directory: dir.path().join("logs"),
        file_prefix: Some("fleet".to_owned()),
        ..LoggingConfig::default()
    };
    assert!(config.operation_log);
    init_tracing("fwu-test", &config).unwrap();
    assert!(config.directory.is_dir());

    let prefix = fwu_common::log_file_prefix("fwu-test", &config);
    let files: Vec<String> = fs::read_dir(&config.directory)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(files
        .iter()
        .any(|name| name.starts_with(&format!("{prefix}-fwu-test.log"))));
    assert!(files
        .iter()
        .any(|name| name.starts_with(&format!("{prefix}-operations.log"))));
}

#[test]
fn operation_log_can_be_disabled() {
    let config: AppConfig = "[logging]\noperation_log = false\n".parse().unwrap();
    assert!(!config.logging.operation_log);
    assert!(AppConfig::default().logging.operation_log);
}
