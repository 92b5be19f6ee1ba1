//! Configuration loading and override priority
//!
//! Tests that touch ROSTER_* environment variables are marked #[serial]
//! so they never run in parallel.

use roster_common::config::{BIND_ADDR_ENV, DATA_FOLDER_ENV};
use roster_common::{EngineConfig, Error};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

fn clear_env() {
    env::remove_var(DATA_FOLDER_ENV);
    env::remove_var(BIND_ADDR_ENV);
}

#[test]
#[serial]
fn test_explicit_file_is_loaded() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("roster.toml");
    std::fs::write(
        &path,
        "data_folder = \"/srv/roster\"\nledger_capacity = 50\ndefault_session_cap = 24\n",
    )
    .unwrap();

    let config = EngineConfig::load(Some(&path)).unwrap();
    assert_eq!(config.data_folder, PathBuf::from("/srv/roster"));
    assert_eq!(config.ledger_capacity, 50);
    assert_eq!(config.default_session_cap, 24);
    assert_eq!(config.balance_retry_limit, 5);
    assert_eq!(config.database_path(), PathBuf::from("/srv/roster/roster.db"));
}

#[test]
#[serial]
fn test_missing_explicit_file_is_an_error() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let err = EngineConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("roster.toml");
    std::fs::write(
        &path,
        "data_folder = \"/srv/roster\"\nbind_addr = \"127.0.0.1:6000\"\n",
    )
    .unwrap();

    env::set_var(DATA_FOLDER_ENV, "/var/lib/roster");
    env::set_var(BIND_ADDR_ENV, "0.0.0.0:7000");
    let config = EngineConfig::load(Some(&path)).unwrap();
    clear_env();

    assert_eq!(config.data_folder, PathBuf::from("/var/lib/roster"));
    assert_eq!(config.bind_addr, "0.0.0.0:7000");
}

#[test]
#[serial]
fn test_blank_environment_value_ignored() {
    clear_env();
    env::set_var(BIND_ADDR_ENV, "   ");
    let mut config = EngineConfig::default();
    config.apply_env_overrides();
    clear_env();

    assert_eq!(config.bind_addr, "127.0.0.1:5780");
}

#[test]
fn test_invalid_retry_limit_rejected() {
    let err = EngineConfig::from_toml_str("balance_retry_limit = 0\n").unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}
