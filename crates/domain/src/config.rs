//! Engine configuration structures
//!
//! Plain data loaded by the infrastructure config loader (environment
//! variables with TOML file fallback). Durations are stored as integer
//! seconds/milliseconds so the structs stay serde-friendly.

use serde::{Deserialize, Serialize};

use crate::constants;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    /// One entry per configured provider ("google", "outlook", ...).
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

/// SQLite storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file path.
    pub path: String,
    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "calsync.db".to_string(), pool_size: default_pool_size() }
    }
}

fn default_pool_size() -> u32 {
    4
}

/// Tuning for the sync pipeline and resilience layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Bounded worker count for `sync_all_calendars` fan-out.
    pub workers: usize,
    /// Conflict proximity window in seconds (see reconciler docs).
    pub conflict_proximity_secs: i64,
    /// Token refresh safety margin in seconds.
    pub refresh_margin_secs: i64,
    /// Events requested per provider page.
    pub page_size: u32,
    /// Per-call HTTP timeout in seconds.
    pub http_timeout_secs: u64,
    /// Retry attempts per provider call (including the first).
    pub retry_max_attempts: u32,
    /// First retry backoff delay, milliseconds.
    pub retry_base_delay_ms: u64,
    /// Backoff ceiling, milliseconds.
    pub retry_max_delay_ms: u64,
    /// Consecutive failures before a provider circuit opens.
    pub breaker_failure_threshold: u32,
    /// Open-circuit cooldown in seconds.
    pub breaker_recovery_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: constants::DEFAULT_SYNC_WORKERS,
            conflict_proximity_secs: constants::DEFAULT_CONFLICT_PROXIMITY_SECS,
            refresh_margin_secs: constants::DEFAULT_REFRESH_MARGIN_SECS,
            page_size: constants::DEFAULT_PAGE_SIZE,
            http_timeout_secs: constants::DEFAULT_HTTP_TIMEOUT_SECS,
            retry_max_attempts: constants::DEFAULT_RETRY_MAX_ATTEMPTS,
            retry_base_delay_ms: constants::DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: constants::DEFAULT_RETRY_MAX_DELAY_MS,
            breaker_failure_threshold: constants::DEFAULT_BREAKER_FAILURE_THRESHOLD,
            breaker_recovery_timeout_secs: constants::DEFAULT_BREAKER_RECOVERY_TIMEOUT_SECS,
        }
    }
}

/// Per-provider client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider identifier ("google", "outlook").
    pub provider: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Override for the provider API base URL. Primarily a test hook.
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Override for the OAuth token endpoint.
    #[serde(default)]
    pub token_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_defaults_match_constants() {
        let cfg = SyncConfig::default();
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.conflict_proximity_secs, 300);
        assert_eq!(cfg.refresh_margin_secs, 120);
        assert_eq!(cfg.retry_max_delay_ms, 2_000);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [database]
            path = "/tmp/cal.db"

            [sync]
            workers = 8

            [[providers]]
            provider = "google"
            client_id = "cid"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.database.path, "/tmp/cal.db");
        assert_eq!(cfg.database.pool_size, 4);
        assert_eq!(cfg.sync.workers, 8);
        assert_eq!(cfg.sync.page_size, 50);
        assert_eq!(cfg.providers.len(), 1);
        assert!(cfg.providers[0].client_secret.is_none());
    }
}
