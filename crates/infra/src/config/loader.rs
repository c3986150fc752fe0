//! Configuration loader
//!
//! Loads engine configuration from environment variables or a TOML file.
//!
//! ## Loading Strategy
//! 1. Attempts to load from environment variables (after `.env` expansion)
//! 2. Falls back to a TOML file probed from the working directory
//!
//! ## Environment Variables
//! - `CALSYNC_DB_PATH`: database file path (required for env loading)
//! - `CALSYNC_DB_POOL_SIZE`: connection pool size
//! - `CALSYNC_SYNC_WORKERS`: bounded worker count for fan-out
//! - `CALSYNC_CONFLICT_PROXIMITY_SECS`: conflict proximity window
//! - `CALSYNC_REFRESH_MARGIN_SECS`: token refresh safety margin
//! - `CALSYNC_PAGE_SIZE`: events per provider page
//! - `CALSYNC_HTTP_TIMEOUT_SECS`: per-call HTTP timeout
//! - `CALSYNC_GOOGLE_CLIENT_ID` / `CALSYNC_GOOGLE_CLIENT_SECRET`
//! - `CALSYNC_OUTLOOK_CLIENT_ID` / `CALSYNC_OUTLOOK_CLIENT_SECRET`
//!
//! ## File Locations
//! `./calsync.toml`, `./config.toml`, then the same names one directory up.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use calsync_domain::{Config, DatabaseConfig, ProviderConfig, Result, SyncConfig, SyncEngineError};
use tracing::{debug, info};

/// Load configuration with the environment-first fallback strategy.
pub fn load() -> Result<Config> {
    dotenvy::dotenv().ok();

    match load_from_env() {
        Ok(config) => {
            info!("configuration loaded from environment variables");
            Ok(config)
        }
        Err(env_error) => {
            debug!(error = %env_error, "environment configuration incomplete, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables.
pub fn load_from_env() -> Result<Config> {
    from_lookup(|key| std::env::var(key).ok())
}

/// Load configuration from a TOML file, probing known locations when no
/// path is given.
pub fn load_from_file(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => probe_config_paths()
            .ok_or_else(|| SyncEngineError::Config("no configuration file found".into()))?,
    };

    let raw = std::fs::read_to_string(&path).map_err(|error| {
        SyncEngineError::Config(format!("failed to read {}: {error}", path.display()))
    })?;
    let config: Config = toml::from_str(&raw).map_err(|error| {
        SyncEngineError::Config(format!("failed to parse {}: {error}", path.display()))
    })?;

    info!(path = %path.display(), "configuration loaded from file");
    Ok(config)
}

fn probe_config_paths() -> Option<PathBuf> {
    ["calsync.toml", "config.toml", "../calsync.toml", "../config.toml"]
        .iter()
        .map(PathBuf::from)
        .find(|candidate| candidate.is_file())
}

/// Build a config from a key lookup. Factored out of [`load_from_env`] so
/// tests can drive it without touching process environment.
fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
    let path = lookup("CALSYNC_DB_PATH")
        .ok_or_else(|| SyncEngineError::Config("CALSYNC_DB_PATH not set".into()))?;

    let mut database = DatabaseConfig { path, ..DatabaseConfig::default() };
    if let Some(value) = lookup("CALSYNC_DB_POOL_SIZE") {
        database.pool_size = parse_field("CALSYNC_DB_POOL_SIZE", &value)?;
    }

    let mut sync = SyncConfig::default();
    if let Some(value) = lookup("CALSYNC_SYNC_WORKERS") {
        sync.workers = parse_field("CALSYNC_SYNC_WORKERS", &value)?;
    }
    if let Some(value) = lookup("CALSYNC_CONFLICT_PROXIMITY_SECS") {
        sync.conflict_proximity_secs = parse_field("CALSYNC_CONFLICT_PROXIMITY_SECS", &value)?;
    }
    if let Some(value) = lookup("CALSYNC_REFRESH_MARGIN_SECS") {
        sync.refresh_margin_secs = parse_field("CALSYNC_REFRESH_MARGIN_SECS", &value)?;
    }
    if let Some(value) = lookup("CALSYNC_PAGE_SIZE") {
        sync.page_size = parse_field("CALSYNC_PAGE_SIZE", &value)?;
    }
    if let Some(value) = lookup("CALSYNC_HTTP_TIMEOUT_SECS") {
        sync.http_timeout_secs = parse_field("CALSYNC_HTTP_TIMEOUT_SECS", &value)?;
    }

    let mut providers = Vec::new();
    for name in ["google", "outlook"] {
        let upper = name.to_uppercase();
        if let Some(client_id) = lookup(&format!("CALSYNC_{upper}_CLIENT_ID")) {
            providers.push(ProviderConfig {
                provider: name.to_string(),
                client_id,
                client_secret: lookup(&format!("CALSYNC_{upper}_CLIENT_SECRET")),
                api_base_url: None,
                token_url: None,
            });
        }
    }

    Ok(Config { database, sync, providers })
}

fn parse_field<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|error| SyncEngineError::Config(format!("invalid {key} '{value}': {error}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn env_loading_requires_the_database_path() {
        let error = from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(error, SyncEngineError::Config(_)));
    }

    #[test]
    fn env_loading_fills_defaults_and_providers() {
        let config = from_lookup(lookup_from(&[
            ("CALSYNC_DB_PATH", "/tmp/cal.db"),
            ("CALSYNC_SYNC_WORKERS", "8"),
            ("CALSYNC_GOOGLE_CLIENT_ID", "gcid"),
            ("CALSYNC_GOOGLE_CLIENT_SECRET", "gsecret"),
        ]))
        .unwrap();

        assert_eq!(config.database.path, "/tmp/cal.db");
        assert_eq!(config.database.pool_size, 4);
        assert_eq!(config.sync.workers, 8);
        assert_eq!(config.sync.page_size, 50);
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].provider, "google");
        assert_eq!(config.providers[0].client_secret.as_deref(), Some("gsecret"));
    }

    #[test]
    fn invalid_numeric_values_are_reported() {
        let error = from_lookup(lookup_from(&[
            ("CALSYNC_DB_PATH", "/tmp/cal.db"),
            ("CALSYNC_SYNC_WORKERS", "many"),
        ]))
        .unwrap_err();
        assert!(error.to_string().contains("CALSYNC_SYNC_WORKERS"));
    }

    #[test]
    fn file_loading_parses_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calsync.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"
            [database]
            path = "/tmp/from-file.db"

            [sync]
            conflict_proximity_secs = 600

            [[providers]]
            provider = "outlook"
            client_id = "ocid"
            "#
        )
        .unwrap();

        let config = load_from_file(Some(&path)).unwrap();
        assert_eq!(config.database.path, "/tmp/from-file.db");
        assert_eq!(config.sync.conflict_proximity_secs, 600);
        assert_eq!(config.providers[0].provider, "outlook");
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let error = load_from_file(Some(Path::new("/nonexistent/calsync.toml"))).unwrap_err();
        assert!(matches!(error, SyncEngineError::Config(_)));
    }
}
