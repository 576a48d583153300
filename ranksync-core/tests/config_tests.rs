//! Config load / bootstrap integration tests against a scratch home.

use assert_fs::prelude::*;
use ranksync_core::{
    config::{self, config_path_at, DEFAULT_TABLE},
    ConfigError,
};

#[test]
fn load_missing_config_returns_not_found() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
}

#[test]
fn load_or_init_writes_defaults_once() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let first = config::load_or_init_at(home.path()).expect("init");
    home.child(".ranksync/config.yaml").assert(predicates::path::exists());
    assert_eq!(first.database.table, DEFAULT_TABLE);

    let mut edited = first.clone();
    edited.debug = true;
    config::save_at(home.path(), &edited).expect("save");

    let second = config::load_or_init_at(home.path()).expect("reload");
    assert!(second.debug, "existing config must not be overwritten by defaults");
}

#[test]
fn missing_optional_fields_take_defaults() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".ranksync/config.yaml")
        .write_str("database:\n  url: sqlite:///tmp/ranks.db\n")
        .expect("write");

    let loaded = config::load_at(home.path()).expect("load");
    assert_eq!(loaded.database.table, DEFAULT_TABLE);
    assert_eq!(loaded.database.max_connections, config::DEFAULT_MAX_CONNECTIONS);
    assert_eq!(loaded.database.query_timeout_ms, config::DEFAULT_QUERY_TIMEOUT_MS);
    assert!(!loaded.debug);
}

#[test]
fn corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".ranksync/config.yaml")
        .write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
}

#[test]
fn unsafe_table_name_is_rejected() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".ranksync/config.yaml")
        .write_str("database:\n  url: sqlite:///tmp/ranks.db\n  table: \"ranks; DROP TABLE users\"\n")
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)), "got: {err}");
}

#[test]
fn no_tmp_file_left_after_save() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    config::load_or_init_at(home.path()).expect("init");
    let tmp = config_path_at(home.path()).with_file_name("config.yaml.tmp");
    assert!(!tmp.exists(), "tmp file should be removed after atomic rename");
}
