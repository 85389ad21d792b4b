//! Integration tests for configuration loader
//!
//! Tests the end-to-end behavior of loading configuration from files and
//! feeding it into the client.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use conduit_domain::ConduitError;
use conduit_infra::{config, ConduitClient};
use tempfile::NamedTempFile;

fn write_config(contents: &str, extension: &str) -> PathBuf {
    let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
    temp_file.write_all(contents.as_bytes()).expect("Failed to write to temp file");

    let path = temp_file.path().with_extension(extension);
    std::fs::copy(temp_file.path(), &path).expect("Failed to copy file");
    path
}

#[test]
fn test_load_config_from_toml_file() {
    let path = write_config(
        r#"
token = "toml-token"

[rest]
api_base_url = "https://api.example.test/v10"
max_retries = 3
rate_limit_retries = 2
backoff_base = 500
backoff_cap = 8000
global_requests_per_second = 40

[gateway]
url = "wss://gateway.example.test"
intents = 513
shard = [0, 2]
handshake_timeout = 15000
jitter_first_heartbeat = false

[logging]
level = "debug"
json = true
"#,
        "toml",
    );

    let config = config::load_from_file(Some(path.clone())).expect("Failed to load TOML config");

    assert_eq!(config.token, "toml-token");
    assert_eq!(config.rest.api_base_url, "https://api.example.test/v10");
    assert_eq!(config.rest.max_retries, 3);
    assert_eq!(config.rest.rate_limit_retries, 2);
    assert_eq!(config.rest.backoff_base, Duration::from_millis(500));
    assert_eq!(config.rest.backoff_cap, Duration::from_secs(8));
    assert_eq!(config.rest.global_requests_per_second, Some(40));
    assert_eq!(config.gateway.url.as_deref(), Some("wss://gateway.example.test"));
    assert_eq!(config.gateway.intents, 513);
    assert_eq!(config.gateway.shard, Some([0, 2]));
    assert_eq!(config.gateway.handshake_timeout, Duration::from_secs(15));
    assert!(!config.gateway.jitter_first_heartbeat);
    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.json);
    assert!(config.validate().is_ok());

    std::fs::remove_file(path).ok();
}

#[test]
fn test_load_config_with_minimal_fields() {
    let path = write_config(r#"{ "token": "only-token" }"#, "json");

    let config = config::load_from_file(Some(path.clone())).expect("Failed to load JSON config");

    assert_eq!(config.token, "only-token");
    assert_eq!(config.rest.max_retries, 5);
    assert_eq!(config.rest.rate_limit_retries, 1);
    assert_eq!(config.gateway.url, None);
    assert_eq!(config.gateway.large_threshold, 50);
    assert_eq!(config.logging.level, "info");

    std::fs::remove_file(path).ok();
}

#[test]
fn test_loaded_config_builds_a_client() {
    let path = write_config(
        r#"
token = "Bot client-token"

[gateway]
url = "wss://gateway.example.test"
"#,
        "toml",
    );

    let config = config::load_from_file(Some(path.clone())).expect("config");
    let client = ConduitClient::from_config(config).expect("client");

    assert_eq!(client.config().gateway.url.as_deref(), Some("wss://gateway.example.test"));

    std::fs::remove_file(path).ok();
}

#[test]
fn test_load_config_from_nonexistent_file() {
    let result = config::load_from_file(Some("/nonexistent/path/conduit.toml".into()));

    match result {
        Err(ConduitError::Config(msg)) => {
            assert!(msg.contains("not found"), "Error message should mention 'not found'");
        }
        other => panic!("Expected Config error, got {other:?}"),
    }
}

#[test]
fn test_load_config_with_invalid_format() {
    let path = write_config(r#"{ "token": "x", "rest": { "max_retries": "many" } }"#, "json");

    match config::load_from_file(Some(path.clone())) {
        Err(ConduitError::Config(msg)) => {
            assert!(msg.contains("invalid JSON"), "Error message should mention invalid JSON");
        }
        other => panic!("Expected Config error, got {other:?}"),
    }

    std::fs::remove_file(path).ok();
}
