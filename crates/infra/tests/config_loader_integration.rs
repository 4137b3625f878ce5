//! Integration tests for configuration loader
//!
//! Tests the end-to-end behavior of loading configuration from files.

use std::io::Write;

use meridian_domain::MeridianError;
use meridian_infra::config;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).expect("Failed to create config file");
    file.write_all(contents.as_bytes()).expect("Failed to write config file");
    path
}

#[test]
fn test_load_config_from_toml_file() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = write(
        &dir,
        "meridian.toml",
        r#"
[auth]
issuer = "https://id.example.com/realms/meridian"
client_id = "meridian-desktop"
redirect_uri = "http://127.0.0.1:8765/callback"
post_logout_redirect_uri = "http://127.0.0.1:8765/"
scopes = ["openid", "profile"]

[auth.endpoints]
authorization_endpoint = "https://id.example.com/authorize"
token_endpoint = "https://id.example.com/token"

[api]
base_url = "https://api.example.com/v1"
timeout_ms = 5000

[api.retry]
max_retries = 5
base_delay_ms = 250

[poller]
interval_ms = 3000
max_concurrency = 2
"#,
    );

    let config = config::load_from_file(Some(path))?;

    assert_eq!(config.auth.client_id, "meridian-desktop");
    assert_eq!(config.auth.scopes, vec!["openid", "profile"]);
    let endpoints = config.auth.endpoints.ok_or_else(|| anyhow::anyhow!("endpoints should be set"))?;
    assert_eq!(endpoints.token_endpoint, "https://id.example.com/token");
    assert!(endpoints.end_session_endpoint.is_none());

    assert_eq!(config.api.timeout_ms, 5_000);
    assert_eq!(config.api.retry.max_retries, 5);
    assert_eq!(config.api.retry.base_delay_ms, 250);
    assert_eq!(config.api.retry.max_delay_ms, 10_000);
    assert_eq!(config.poller.interval_ms, 3_000);
    assert_eq!(config.poller.max_concurrency, 2);
    Ok(())
}

#[test]
fn test_load_config_from_json_file() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = write(
        &dir,
        "meridian.json",
        r#"{
            "auth": {
                "issuer": "https://id.example.com",
                "client_id": "meridian-web",
                "redirect_uri": "https://app.example.com/callback",
                "post_logout_redirect_uri": "https://app.example.com/"
            },
            "api": {
                "base_url": "https://api.example.com",
                "trace_header": "x-correlation-id"
            }
        }"#,
    );

    let config = config::load_from_file(Some(path))?;

    assert_eq!(config.api.trace_header, "x-correlation-id");
    assert_eq!(config.auth.renew_threshold_secs, 60);
    assert_eq!(config.poller.max_concurrency, 5);
    Ok(())
}

#[test]
fn test_invalid_values_fail_validation() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = write(
        &dir,
        "meridian.toml",
        r#"
[auth]
issuer = "https://id.example.com"
client_id = "meridian-web"
redirect_uri = "https://app.example.com/callback"
post_logout_redirect_uri = "https://app.example.com/"

[api]
base_url = "https://api.example.com"

[poller]
max_concurrency = 0
"#,
    );

    let err = config::load_from_file(Some(path)).unwrap_err();
    assert!(matches!(err, MeridianError::Config(ref m) if m.contains("max_concurrency")));
}

#[test]
fn test_missing_required_section_is_rejected() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = write(&dir, "meridian.toml", "[api]\nbase_url = \"https://api.example.com\"\n");

    assert!(matches!(config::load_from_file(Some(path)), Err(MeridianError::Config(_))));
}

#[test]
fn test_missing_file_is_a_config_error() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let result = config::load_from_file(Some(dir.path().join("absent.toml")));
    assert!(matches!(result, Err(MeridianError::Config(_))));
}
