//! Unit tests for control-plane credential loading.
//!
//! Covers the untagged no-op path, the env-var fallback when the keychain
//! has no entry, and the error raised when neither source has a password.
//!
//! NOTE: These tests mutate process-global env vars and must run serially.

use agent_backbone::config::{GlobalConfig, PASSWORD_ENV};
use agent_backbone::AppError;

fn config_with_tag(tag: &str) -> GlobalConfig {
    let toml = format!(
        r#"
[control_plane]
addrs = ["controller.internal:17070"]
ca_cert_path = "/tmp/ca.pem"
tag = "{tag}"
"#
    );
    GlobalConfig::from_toml_str(&toml).expect("config parses")
}

#[tokio::test]
#[serial_test::serial]
async fn untagged_config_loads_no_credential() {
    std::env::set_var(PASSWORD_ENV, "ignored");

    let mut config = config_with_tag("");
    config.load_credentials().await.expect("no-op succeeds");
    assert!(config.control_plane.password.is_empty());

    std::env::remove_var(PASSWORD_ENV);
}

/// The keychain service is absent in CI/test environments, so the env var
/// supplies the password.
#[tokio::test]
#[serial_test::serial]
async fn env_var_supplies_password_when_keychain_is_empty() {
    std::env::set_var(PASSWORD_ENV, "s3cret");

    let mut config = config_with_tag("machine-test-env-fallback");
    config.load_credentials().await.expect("env fallback succeeds");
    assert_eq!(config.control_plane.password, "s3cret");

    std::env::remove_var(PASSWORD_ENV);
}

#[tokio::test]
#[serial_test::serial]
async fn missing_credential_names_the_tag_and_env_var() {
    std::env::remove_var(PASSWORD_ENV);

    let mut config = config_with_tag("machine-test-missing");
    let err = config
        .load_credentials()
        .await
        .expect_err("no credential available");

    match err {
        AppError::Config(msg) => {
            assert!(msg.contains("machine-test-missing"), "message: {msg}");
            assert!(msg.contains(PASSWORD_ENV), "message: {msg}");
        }
        other => panic!("expected config error, got {other:?}"),
    }
}

#[tokio::test]
#[serial_test::serial]
async fn empty_env_var_is_treated_as_missing() {
    std::env::set_var(PASSWORD_ENV, "");

    let mut config = config_with_tag("machine-test-empty");
    let result = config.load_credentials().await;
    assert!(matches!(result, Err(AppError::Config(_))));

    std::env::remove_var(PASSWORD_ENV);
}
