//! Configuration loader
//!
//! Loads client configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. Environment variables, when every required one is set
//! 2. Otherwise the first config file found by [`probe_config_paths`]
//! 3. JSON or TOML, chosen by file extension
//!
//! The result is always validated before it is returned.
//!
//! ## Environment Variables
//! Required:
//! - `MERIDIAN_ISSUER`: identity provider issuer URL
//! - `MERIDIAN_CLIENT_ID`: OAuth client id
//! - `MERIDIAN_REDIRECT_URI`: login callback URL
//! - `MERIDIAN_POST_LOGOUT_REDIRECT_URI`: where the provider sends the user
//!   after logout
//! - `MERIDIAN_API_BASE_URL`: API gateway base URL
//!
//! Optional:
//! - `MERIDIAN_SCOPES`: space or comma separated scopes
//! - `MERIDIAN_TRACE_HEADER`: response header carrying the trace id
//! - `MERIDIAN_POLL_INTERVAL_MS`: job poll interval
//! - `MERIDIAN_POLL_CONCURRENCY`: concurrent status fetches per round
//!
//! ## File Locations
//! `meridian.toml` or `meridian.json` in the working directory, its parent
//! and grandparent, then next to the executable.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use meridian_domain::{ApiConfig, AuthConfig, Config, MeridianError, PollerConfig, Result};
use tracing::{debug, info};

const FILE_NAMES: [&str; 2] = ["meridian.toml", "meridian.json"];

/// Load configuration from the environment, falling back to a file.
///
/// # Errors
/// Returns `MeridianError::Config` if neither source yields a valid
/// configuration.
pub fn load() -> Result<Config> {
    match load_from_env() {
        Ok(config) => {
            info!("Configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            debug!(error = %e, "Environment configuration incomplete, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from `MERIDIAN_*` environment variables.
///
/// # Errors
/// Returns `MeridianError::Config` if a required variable is missing or a
/// value is invalid.
pub fn load_from_env() -> Result<Config> {
    let mut auth = AuthConfig {
        issuer: env_var("MERIDIAN_ISSUER")?,
        client_id: env_var("MERIDIAN_CLIENT_ID")?,
        redirect_uri: env_var("MERIDIAN_REDIRECT_URI")?,
        post_logout_redirect_uri: env_var("MERIDIAN_POST_LOGOUT_REDIRECT_URI")?,
        scopes: Vec::new(),
        renew_threshold_secs: meridian_domain::constants::DEFAULT_RENEW_THRESHOLD_SECS,
        endpoints: None,
    };
    auth.scopes = match std::env::var("MERIDIAN_SCOPES") {
        Ok(raw) => parse_scopes(&raw),
        Err(_) => meridian_domain::constants::DEFAULT_SCOPES.iter().map(|s| (*s).to_owned()).collect(),
    };

    let mut api = ApiConfig {
        base_url: env_var("MERIDIAN_API_BASE_URL")?,
        trace_header: meridian_domain::constants::DEFAULT_TRACE_HEADER.to_owned(),
        timeout_ms: meridian_domain::constants::DEFAULT_REQUEST_TIMEOUT_MS,
        retry: meridian_domain::RetrySettings::default(),
    };
    if let Ok(header) = std::env::var("MERIDIAN_TRACE_HEADER") {
        api.trace_header = header;
    }

    let defaults = PollerConfig::default();
    let poller = PollerConfig {
        interval_ms: env_parse("MERIDIAN_POLL_INTERVAL_MS")?.unwrap_or(defaults.interval_ms),
        max_concurrency: env_parse("MERIDIAN_POLL_CONCURRENCY")?
            .unwrap_or(defaults.max_concurrency),
    };

    let config = Config { auth, api, poller };
    config.validate()?;
    Ok(config)
}

/// Load configuration from a file.
///
/// If `path` is `None`, probes the standard locations.
///
/// # Errors
/// Returns `MeridianError::Config` if the file is missing, malformed or
/// fails validation.
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(MeridianError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            MeridianError::Config("No meridian.toml or meridian.json found".to_string())
        })?,
    };

    info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| MeridianError::Config(format!("Failed to read config file: {e}")))?;

    let config = parse_config(&contents, &config_path)?;
    config.validate()?;
    Ok(config)
}

fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| MeridianError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| MeridianError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(MeridianError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// First existing config file in the standard locations.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut dirs = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        dirs.extend(cwd.ancestors().take(3).map(Path::to_path_buf));
    }
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            dirs.push(exe_dir.to_path_buf());
        }
    }

    dirs.iter()
        .flat_map(|dir| FILE_NAMES.iter().map(move |name| dir.join(name)))
        .find(|path| path.is_file())
}

fn parse_scopes(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|scope| !scope.is_empty())
        .map(str::to_owned)
        .collect()
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| {
        MeridianError::Config(format!("Missing required environment variable: {key}"))
    })
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| MeridianError::Config(format!("Invalid {key} ({raw}): {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use once_cell::sync::Lazy;

    use super::*;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    const REQUIRED: [(&str, &str); 5] = [
        ("MERIDIAN_ISSUER", "https://id.example.com/realms/meridian"),
        ("MERIDIAN_CLIENT_ID", "meridian-web"),
        ("MERIDIAN_REDIRECT_URI", "https://app.example.com/callback"),
        ("MERIDIAN_POST_LOGOUT_REDIRECT_URI", "https://app.example.com/"),
        ("MERIDIAN_API_BASE_URL", "https://api.example.com"),
    ];

    const OPTIONAL: [&str; 4] = [
        "MERIDIAN_SCOPES",
        "MERIDIAN_TRACE_HEADER",
        "MERIDIAN_POLL_INTERVAL_MS",
        "MERIDIAN_POLL_CONCURRENCY",
    ];

    fn set_required() {
        for (key, value) in REQUIRED {
            std::env::set_var(key, value);
        }
    }

    fn clear_all() {
        for (key, _) in REQUIRED {
            std::env::remove_var(key);
        }
        for key in OPTIONAL {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_load_from_env_with_defaults() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_all();
        set_required();

        let config = load_from_env().unwrap();
        assert_eq!(config.auth.client_id, "meridian-web");
        assert_eq!(config.auth.scopes, vec!["openid", "profile", "email", "offline_access"]);
        assert_eq!(config.api.trace_header, "x-trace-id");
        assert_eq!(config.poller, PollerConfig::default());

        clear_all();
    }

    #[test]
    fn test_load_from_env_optional_overrides() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_all();
        set_required();
        std::env::set_var("MERIDIAN_SCOPES", "openid, profile jobs:write");
        std::env::set_var("MERIDIAN_TRACE_HEADER", "x-correlation-id");
        std::env::set_var("MERIDIAN_POLL_INTERVAL_MS", "2500");
        std::env::set_var("MERIDIAN_POLL_CONCURRENCY", "2");

        let config = load_from_env().unwrap();
        assert_eq!(config.auth.scopes, vec!["openid", "profile", "jobs:write"]);
        assert_eq!(config.api.trace_header, "x-correlation-id");
        assert_eq!(config.poller.interval_ms, 2_500);
        assert_eq!(config.poller.max_concurrency, 2);

        clear_all();
    }

    #[test]
    fn test_load_from_env_missing_var() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_all();
        set_required();
        std::env::remove_var("MERIDIAN_CLIENT_ID");

        let err = load_from_env().unwrap_err();
        assert!(matches!(err, MeridianError::Config(ref m) if m.contains("MERIDIAN_CLIENT_ID")));

        clear_all();
    }

    #[test]
    fn test_load_from_env_rejects_invalid_values() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_all();
        set_required();

        std::env::set_var("MERIDIAN_POLL_CONCURRENCY", "many");
        assert!(matches!(load_from_env(), Err(MeridianError::Config(_))));

        std::env::set_var("MERIDIAN_POLL_CONCURRENCY", "0");
        assert!(matches!(load_from_env(), Err(MeridianError::Config(_))));

        clear_all();
    }

    #[test]
    fn test_parse_config_by_extension() {
        let toml_content = r#"
[auth]
issuer = "https://id.example.com"
client_id = "meridian-web"
redirect_uri = "https://app.example.com/callback"
post_logout_redirect_uri = "https://app.example.com/"

[api]
base_url = "https://api.example.com"
"#;
        let config = parse_config(toml_content, Path::new("meridian.toml")).unwrap();
        assert_eq!(config.api.base_url, "https://api.example.com");

        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(parse_config(&json, Path::new("meridian.json")).unwrap(), config);

        assert!(parse_config(toml_content, Path::new("meridian.yaml")).is_err());
    }

    #[test]
    fn test_scopes_split_on_commas_and_whitespace() {
        assert_eq!(parse_scopes(" openid,,profile\temail "), vec!["openid", "profile", "email"]);
        assert!(parse_scopes("").is_empty());
    }
}
