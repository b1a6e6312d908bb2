//! Configuration loading from the environment.
//!
//! These tests mutate process environment variables and run serially.

use serial_test::serial;
use vitality_store::config::{StoreConfig, DEFAULT_QUOTA_BYTES};
use vitality_store::AuthCheckPolicy;

const VARS: &[&str] = &[
    "VITALITY__LOCAL__QUOTA_BYTES",
    "VITALITY__LOCAL__IN_MEMORY",
    "VITALITY__REMOTE__URL",
    "VITALITY__REMOTE__ANON_KEY",
    "VITALITY__AUTH_POLICY",
    "VITALITY__DEV__MOCK_SESSION",
    "VITALITY__LOGGING__LEVEL",
];

fn clear_env() {
    for var in VARS {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_defaults_without_environment() {
    clear_env();

    let config = StoreConfig::load().expect("load");
    assert_eq!(config.local.quota_bytes, DEFAULT_QUOTA_BYTES);
    assert!(!config.local.in_memory);
    assert!(config.remote.url.is_none());
    assert_eq!(config.remote.timeout_secs, 10);
    assert_eq!(config.auth_policy, AuthCheckPolicy::FailOpenToLocal);
    assert!(!config.dev.mock_session);
    assert_eq!(config.logging.level, "info");
}

#[test]
#[serial]
fn test_environment_overrides() {
    clear_env();
    std::env::set_var("VITALITY__LOCAL__QUOTA_BYTES", "2048");
    std::env::set_var("VITALITY__LOCAL__IN_MEMORY", "true");
    std::env::set_var("VITALITY__REMOTE__URL", "https://project.example.co");
    std::env::set_var("VITALITY__REMOTE__ANON_KEY", "public-anon-key");
    std::env::set_var("VITALITY__AUTH_POLICY", "fail_closed");
    std::env::set_var("VITALITY__DEV__MOCK_SESSION", "true");
    std::env::set_var("VITALITY__LOGGING__LEVEL", "debug");

    let config = StoreConfig::load().expect("load");
    clear_env();

    assert_eq!(config.local.quota_bytes, 2048);
    assert!(config.local.in_memory);
    assert_eq!(config.remote.url.as_deref(), Some("https://project.example.co"));
    assert_eq!(config.remote.anon_key.as_deref(), Some("public-anon-key"));
    assert_eq!(config.auth_policy, AuthCheckPolicy::FailClosed);
    assert!(config.dev.mock_session);
    assert_eq!(config.logging.level, "debug");
}

#[test]
#[serial]
fn test_invalid_environment_fails_validation() {
    clear_env();
    std::env::set_var("VITALITY__REMOTE__URL", "not a url");

    let err = StoreConfig::load().expect_err("invalid url and missing key");
    clear_env();

    let message = err.to_string();
    assert!(message.contains("Configuration validation failed"));
    assert!(message.contains("remote.url"));
    assert!(message.contains("VITALITY__REMOTE__ANON_KEY"));

    // The unchecked loader still returns the raw values
    std::env::set_var("VITALITY__REMOTE__URL", "not a url");
    let raw = StoreConfig::load_unchecked().expect("unchecked");
    clear_env();
    assert_eq!(raw.remote.url.as_deref(), Some("not a url"));
}
