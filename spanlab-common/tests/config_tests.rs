//! Integration tests for configuration resolution
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate SPANLAB_* variables are marked with #[serial].

use serial_test::serial;
use spanlab_common::config::{
    EditorConfig, OrderingPolicy, API_TOKEN_ENV_VAR, API_URL_ENV_VAR, CONFIG_ENV_VAR,
};
use spanlab_common::Error;
use std::env;
use std::io::Write;
use std::path::Path;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

fn clear_env() {
    env::remove_var(CONFIG_ENV_VAR);
    env::remove_var(API_URL_ENV_VAR);
    env::remove_var(API_TOKEN_ENV_VAR);
}

#[test]
#[serial]
fn test_explicit_path_is_used() {
    clear_env();
    let file = write_config(
        r#"
        [api]
        base_url = "https://labels.example.com"

        [submission]
        min_busy_ms = 100
        max_wait_ms = 2000

        [store]
        ordering = "prepend_to_start"
        carry_non_interactive_predictions = true
        "#,
    );

    let config = EditorConfig::load(Some(file.path())).expect("config loads");
    assert_eq!(config.api.base_url, "https://labels.example.com");
    assert_eq!(config.submission.min_busy_ms, 100);
    assert_eq!(config.submission.max_wait_ms, 2000);
    assert_eq!(config.store.ordering, OrderingPolicy::PrependToStart);
    assert!(config.store.carry_non_interactive_predictions);
}

#[test]
#[serial]
fn test_missing_explicit_path_is_error() {
    clear_env();
    let err = EditorConfig::load(Some(Path::new("/nonexistent/spanlab/editor.toml"))).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[test]
#[serial]
fn test_env_var_config_path() {
    clear_env();
    let file = write_config("[events]\ncapacity = 32\n");
    env::set_var(CONFIG_ENV_VAR, file.path());

    let config = EditorConfig::load(None).expect("config loads");
    assert_eq!(config.events.capacity, 32);

    clear_env();
}

#[test]
#[serial]
fn test_broken_env_config_falls_back_to_defaults() {
    clear_env();
    let file = write_config("this is = not [valid toml");
    env::set_var(CONFIG_ENV_VAR, file.path());

    let config = EditorConfig::load(None).expect("degrades to defaults");
    assert_eq!(config.events.capacity, EditorConfig::default().events.capacity);

    clear_env();
}

#[test]
#[serial]
fn test_api_env_overrides_win_over_file() {
    clear_env();
    let file = write_config("[api]\nbase_url = \"http://from-file\"\n");
    env::set_var(API_URL_ENV_VAR, "http://from-env:9000");
    env::set_var(API_TOKEN_ENV_VAR, "secret-token");

    let config = EditorConfig::load(Some(file.path())).expect("config loads");
    assert_eq!(config.api.base_url, "http://from-env:9000");
    assert_eq!(config.api.token.as_deref(), Some("secret-token"));

    clear_env();
}
