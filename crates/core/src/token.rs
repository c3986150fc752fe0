//! Token manager: cached access tokens with coalesced refresh
//!
//! Manages the OAuth token lifecycle for every (user, provider) pair:
//! - Serves the stored access token while its expiry is more than a safety
//!   margin away
//! - Refreshes through the resilience layer and persists the new credential
//! - Collapses concurrent refreshes for the same pair into a single provider
//!   call (parallel refreshes are a known way to get a refresh token
//!   invalidated by the provider)
//! - Marks the credential invalidated when the refresh token itself is
//!   rejected, so every later call fails fast with
//!   `ReauthenticationRequired` until an interactive login stores new tokens

use std::sync::Arc;

use calsync_common::{RetryConfig, RetryExecutor};
use calsync_domain::{Credential, Result, SyncEngineError, TokenGrant};
use dashmap::DashMap;
use tracing::{debug, info, instrument, warn};

use crate::ports::{CredentialStore, ProviderClient, ProviderRegistry};
use crate::resilience::{flatten_retry, ProviderRetryPolicy};

type RefreshKey = (String, String);

/// Token manager for all configured providers.
pub struct TokenManager {
    credentials: Arc<dyn CredentialStore>,
    providers: Arc<ProviderRegistry>,
    retry: RetryExecutor<ProviderRetryPolicy>,
    refresh_margin_secs: i64,
    refresh_locks: DashMap<RefreshKey, Arc<tokio::sync::Mutex<()>>>,
}

impl TokenManager {
    /// Create a new token manager.
    ///
    /// # Arguments
    /// * `credentials` - credential persistence port
    /// * `providers` - provider clients keyed by identifier
    /// * `retry_config` - backoff applied to refresh calls
    /// * `refresh_margin_secs` - refresh tokens expiring within this margin
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        providers: Arc<ProviderRegistry>,
        retry_config: RetryConfig,
        refresh_margin_secs: i64,
    ) -> Self {
        Self {
            credentials,
            providers,
            retry: RetryExecutor::new(retry_config, ProviderRetryPolicy),
            refresh_margin_secs,
            refresh_locks: DashMap::new(),
        }
    }

    /// Return a currently valid access token for the pair, refreshing if
    /// needed.
    #[instrument(skip(self), fields(user_id, provider))]
    pub async fn get_valid_token(&self, user_id: &str, provider: &str) -> Result<String> {
        let credential = self.load(user_id, provider).await?;
        Self::reject_invalidated(&credential)?;
        if !credential.is_expired(self.refresh_margin_secs) {
            return Ok(credential.access_token);
        }

        // One in-flight refresh per (user, provider); everyone else waits on
        // its result instead of racing the provider.
        let lock = self.refresh_lock(user_id, provider);
        let _guard = lock.lock().await;

        // Re-check under the lock: the refresh may already have happened.
        let credential = self.load(user_id, provider).await?;
        Self::reject_invalidated(&credential)?;
        if !credential.is_expired(self.refresh_margin_secs) {
            debug!(user_id, provider, "token refreshed by concurrent caller");
            return Ok(credential.access_token);
        }

        self.refresh(credential).await
    }

    /// Persist tokens obtained from an interactive authentication flow.
    ///
    /// Clears any invalidated flag; a grant without a refresh token keeps
    /// the previously stored one.
    #[instrument(skip(self, grant), fields(user_id, provider))]
    pub async fn store_tokens(
        &self,
        user_id: &str,
        provider: &str,
        grant: TokenGrant,
    ) -> Result<()> {
        let credential = match self.credentials.load_credential(user_id, provider).await? {
            Some(mut existing) => {
                existing.apply_grant(&grant);
                existing
            }
            None => grant.into_credential(user_id, provider),
        };
        self.credentials.save_credential(&credential).await?;
        info!(user_id, provider, "stored provider tokens");
        Ok(())
    }

    async fn load(&self, user_id: &str, provider: &str) -> Result<Credential> {
        self.credentials.load_credential(user_id, provider).await?.ok_or_else(|| {
            SyncEngineError::NoCredential(format!("user {user_id} has no {provider} credential"))
        })
    }

    fn reject_invalidated(credential: &Credential) -> Result<()> {
        if credential.invalidated {
            return Err(SyncEngineError::ReauthenticationRequired(format!(
                "{} credential for user {} was invalidated",
                credential.provider, credential.user_id
            )));
        }
        Ok(())
    }

    fn refresh_lock(&self, user_id: &str, provider: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.refresh_locks
            .entry((user_id.to_string(), provider.to_string()))
            .or_default()
            .value()
            .clone()
    }

    fn provider_client(&self, provider: &str) -> Result<Arc<dyn ProviderClient>> {
        self.providers.get(provider).cloned().ok_or_else(|| {
            SyncEngineError::Config(format!("no client configured for provider {provider}"))
        })
    }

    async fn refresh(&self, mut credential: Credential) -> Result<String> {
        let client = self.provider_client(&credential.provider)?;
        let refresh_token = credential.refresh_token.clone().ok_or_else(|| {
            SyncEngineError::ReauthenticationRequired(format!(
                "no refresh token stored for user {} on {}",
                credential.user_id, credential.provider
            ))
        })?;

        let outcome = self
            .retry
            .execute(|| {
                let client = Arc::clone(&client);
                let refresh_token = refresh_token.clone();
                async move { client.refresh_token(&refresh_token).await }
            })
            .await;

        match outcome {
            Ok(grant) => {
                credential.apply_grant(&grant);
                self.credentials.save_credential(&credential).await?;
                info!(
                    user_id = %credential.user_id,
                    provider = %credential.provider,
                    "refreshed access token"
                );
                Ok(credential.access_token)
            }
            Err(retry_error) => {
                let error = flatten_retry(retry_error);
                if error.is_auth() {
                    // Refresh token revoked: remember it so later calls fail
                    // fast instead of hammering the provider.
                    credential.invalidated = true;
                    if let Err(save_error) = self.credentials.save_credential(&credential).await {
                        warn!(
                            user_id = %credential.user_id,
                            provider = %credential.provider,
                            error = %save_error,
                            "failed to persist invalidated credential"
                        );
                    }
                    warn!(
                        user_id = %credential.user_id,
                        provider = %credential.provider,
                        kind = error.kind(),
                        "refresh token rejected; interactive re-authentication required"
                    );
                    Err(SyncEngineError::ReauthenticationRequired(format!(
                        "refresh rejected for user {} on {}: {}",
                        credential.user_id, credential.provider, error
                    )))
                } else {
                    warn!(
                        user_id = %credential.user_id,
                        provider = %credential.provider,
                        kind = error.kind(),
                        error = %error,
                        "token refresh failed"
                    );
                    Err(error)
                }
            }
        }
    }
}
