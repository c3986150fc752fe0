//! Provider clients and factory
//!
//! One reqwest-based client per external calendar service, all implementing
//! the `ProviderClient` port. Response statuses are mapped to the engine's
//! error taxonomy here, so nothing downstream needs provider-specific
//! knowledge to decide retryability.

pub mod google;
pub mod outlook;

use std::sync::Arc;
use std::time::Duration;

use calsync_core::{ProviderClient, ProviderRegistry};
use calsync_domain::{
    ProviderConfig, ProviderErrorClass, Result, SyncEngineError, TokenGrant,
};
pub use google::GoogleProvider;
pub use outlook::OutlookProvider;
use reqwest::StatusCode;
use serde::Deserialize;

/// Build the shared HTTP client with the engine-wide per-call timeout.
pub fn build_http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|error| SyncEngineError::Config(format!("failed to build http client: {error}")))
}

/// Create a provider client by identifier.
///
/// Adding a provider means one new implementation plus one arm here; the
/// orchestrator and token manager never change.
pub fn create_provider(
    config: &ProviderConfig,
    http: reqwest::Client,
    page_size: u32,
) -> Result<Arc<dyn ProviderClient>> {
    match config.provider.as_str() {
        "google" => Ok(Arc::new(GoogleProvider::new(config, http, page_size))),
        "outlook" => Ok(Arc::new(OutlookProvider::new(config, http, page_size))),
        other => Err(SyncEngineError::InvalidInput(format!("unknown provider: {other}"))),
    }
}

/// Build the full registry from configuration.
pub fn build_registry(
    configs: &[ProviderConfig],
    http: &reqwest::Client,
    page_size: u32,
) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    for config in configs {
        let client = create_provider(config, http.clone(), page_size)?;
        registry.insert(config.provider.clone(), client);
    }
    Ok(registry)
}

/// Map a non-success API status onto the error taxonomy.
pub(crate) fn map_status(provider: &str, status: StatusCode, message: &str) -> SyncEngineError {
    match status.as_u16() {
        401 | 403 => SyncEngineError::Auth(format!(
            "{provider} rejected the access token ({status}): {message}"
        )),
        404 | 410 => SyncEngineError::NotFound(format!("{provider} resource gone: {message}")),
        429 => SyncEngineError::Provider {
            class: ProviderErrorClass::RateLimited,
            message: format!("{provider} rate limited: {message}"),
        },
        code if (400..500).contains(&code) => SyncEngineError::Provider {
            class: ProviderErrorClass::Client,
            message: format!("{provider} request rejected ({status}): {message}"),
        },
        _ => SyncEngineError::Provider {
            class: ProviderErrorClass::Server,
            message: format!("{provider} server error ({status}): {message}"),
        },
    }
}

pub(crate) fn transport_error(provider: &str, error: reqwest::Error) -> SyncEngineError {
    SyncEngineError::Network(format!("{provider} request failed: {error}"))
}

/// Parse a success body, or map the failure status.
pub(crate) async fn handle_response<T: serde::de::DeserializeOwned>(
    provider: &str,
    response: reqwest::Response,
) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response.json::<T>().await.map_err(|error| {
            SyncEngineError::InvalidInput(format!("failed to parse {provider} response: {error}"))
        });
    }
    let message = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
    Err(map_status(provider, status, &message))
}

/// Accept any success status, discarding the body (deletes return 204).
pub(crate) async fn expect_no_content(provider: &str, response: reqwest::Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let message = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
    Err(map_status(provider, status, &message))
}

/// Parse an RFC 3339 instant from a provider payload.
pub(crate) fn parse_rfc3339(
    provider: &str,
    field: &str,
    value: &str,
) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|error| {
            SyncEngineError::InvalidInput(format!(
                "invalid {field} timestamp '{value}' from {provider}: {error}"
            ))
        })
}

/// Parse an all-day date (YYYY-MM-DD) as midnight UTC.
pub(crate) fn parse_all_day_date(
    provider: &str,
    field: &str,
    value: &str,
) -> Result<chrono::DateTime<chrono::Utc>> {
    let date = chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|error| {
        SyncEngineError::InvalidInput(format!(
            "invalid all-day {field} date '{value}' from {provider}: {error}"
        ))
    })?;
    let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(|| {
        SyncEngineError::InvalidInput(format!(
            "invalid all-day {field} date '{value}' from {provider}"
        ))
    })?;
    Ok(midnight.and_utc())
}

/// OAuth token endpoint response (RFC 6749 shape, shared by providers).
#[derive(Debug, Deserialize)]
pub(crate) struct WireTokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

impl From<WireTokenResponse> for TokenGrant {
    fn from(wire: WireTokenResponse) -> Self {
        TokenGrant {
            access_token: wire.access_token,
            refresh_token: wire.refresh_token,
            expires_in: wire.expires_in,
        }
    }
}

/// Parse a token endpoint response. Token endpoints signal revoked or
/// invalid grants with 4xx statuses, which must surface as auth errors so
/// the token manager routes them to re-authentication instead of retry.
pub(crate) async fn handle_token_response(
    provider: &str,
    response: reqwest::Response,
) -> Result<TokenGrant> {
    let status = response.status();
    if status.is_success() {
        let wire: WireTokenResponse = response.json().await.map_err(|error| {
            SyncEngineError::Auth(format!("failed to parse {provider} token response: {error}"))
        })?;
        return Ok(wire.into());
    }

    let message = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
    match status.as_u16() {
        429 => Err(SyncEngineError::Provider {
            class: ProviderErrorClass::RateLimited,
            message: format!("{provider} token endpoint rate limited: {message}"),
        }),
        code if (400..500).contains(&code) => Err(SyncEngineError::Auth(format!(
            "{provider} token request rejected ({status}): {message}"
        ))),
        _ => Err(SyncEngineError::Provider {
            class: ProviderErrorClass::Server,
            message: format!("{provider} token endpoint error ({status}): {message}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_the_taxonomy() {
        assert!(matches!(
            map_status("google", StatusCode::UNAUTHORIZED, "expired"),
            SyncEngineError::Auth(_)
        ));
        assert!(matches!(
            map_status("google", StatusCode::NOT_FOUND, "gone"),
            SyncEngineError::NotFound(_)
        ));
        assert!(matches!(
            map_status("google", StatusCode::TOO_MANY_REQUESTS, "slow down"),
            SyncEngineError::Provider { class: ProviderErrorClass::RateLimited, .. }
        ));
        assert!(matches!(
            map_status("google", StatusCode::BAD_REQUEST, "bad"),
            SyncEngineError::Provider { class: ProviderErrorClass::Client, .. }
        ));
        assert!(matches!(
            map_status("google", StatusCode::BAD_GATEWAY, "down"),
            SyncEngineError::Provider { class: ProviderErrorClass::Server, .. }
        ));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config = ProviderConfig {
            provider: "caldav".into(),
            client_id: "cid".into(),
            client_secret: None,
            api_base_url: None,
            token_url: None,
        };
        let http = reqwest::Client::new();
        assert!(matches!(
            create_provider(&config, http, 50),
            Err(SyncEngineError::InvalidInput(_))
        ));
    }
}
