//! Provider credentials and token grants

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Stored OAuth credential for one (user, provider) pair.
///
/// Owned by the token manager: refreshed proactively before expiry and
/// reactively on authentication failure. `invalidated` is set when the
/// refresh token itself is rejected, at which point only an interactive
/// re-authentication (out of scope here) can revive the credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub user_id: String,
    pub provider: String,
    pub access_token: String,
    /// Some providers stop issuing refresh tokens on re-consent.
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub invalidated: bool,
}

impl Credential {
    /// Whether the access token is expired or expires within the margin.
    pub fn is_expired(&self, margin_secs: i64) -> bool {
        Utc::now() + Duration::seconds(margin_secs) >= self.expires_at
    }

    /// Fold a refresh response into this credential. A grant without a
    /// rotated refresh token keeps the existing one.
    pub fn apply_grant(&mut self, grant: &TokenGrant) {
        self.access_token = grant.access_token.clone();
        if let Some(refresh) = &grant.refresh_token {
            self.refresh_token = Some(refresh.clone());
        }
        self.expires_at = grant.expires_at();
        self.invalidated = false;
    }
}

/// Token material returned by a provider's authenticate/refresh endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

impl TokenGrant {
    /// Absolute expiry instant, computed from now.
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc::now() + Duration::seconds(self.expires_in)
    }

    /// Build the credential persisted after interactive authentication.
    pub fn into_credential(self, user_id: &str, provider: &str) -> Credential {
        let expires_at = self.expires_at();
        Credential {
            user_id: user_id.to_string(),
            provider: provider.to_string(),
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            invalidated: false,
        }
    }
}
