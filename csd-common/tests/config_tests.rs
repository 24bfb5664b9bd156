//! Tests for bootstrap configuration loading
//!
//! Tests that manipulate CSD_RELAY_ROOT are marked #[serial] so they never
//! race on the process environment.

use csd_common::config::{
    load_toml_file, load_toml_or_default, resolve_root_folder, LoggingConfig, ROOT_FOLDER_ENV,
};
use serde::Deserialize;
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
struct SampleConfig {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    logging: LoggingConfig,
}

#[test]
#[serial]
fn test_env_root_folder_used_without_cli() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/csd-relay-env-root");

    let resolved = resolve_root_folder(None, Some(Path::new("/from/toml")));

    env::remove_var(ROOT_FOLDER_ENV);
    assert_eq!(resolved, PathBuf::from("/tmp/csd-relay-env-root"));
}

#[test]
#[serial]
fn test_toml_root_folder_used_without_env() {
    env::remove_var(ROOT_FOLDER_ENV);

    let resolved = resolve_root_folder(None, Some(Path::new("/from/toml")));

    assert_eq!(resolved, PathBuf::from("/from/toml"));
}

#[test]
fn test_load_toml_file_with_logging_section() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relay.toml");
    std::fs::write(
        &path,
        r#"
name = "relay"

[logging]
level = "debug"
file = "/var/log/relay.log"
"#,
    )
    .unwrap();

    let config: SampleConfig = load_toml_file(&path).unwrap();

    assert_eq!(config.name.as_deref(), Some("relay"));
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.file, Some(PathBuf::from("/var/log/relay.log")));
}

#[test]
fn test_logging_section_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relay.toml");
    std::fs::write(&path, "name = \"relay\"\n").unwrap();

    let config: SampleConfig = load_toml_file(&path).unwrap();

    assert_eq!(config.logging, LoggingConfig::default());
}

#[test]
fn test_invalid_toml_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "name = [unterminated").unwrap();

    let err = load_toml_file::<SampleConfig>(&path).unwrap_err();

    assert!(matches!(err, csd_common::Error::Config(_)));
}

#[test]
fn test_explicit_missing_file_is_error() {
    let result = load_toml_or_default::<SampleConfig>(
        Some(Path::new("/nonexistent/csd-relay.toml")),
        "csd-relay.toml",
    );

    assert!(result.is_err());
}
