//! Error types used throughout the sync engine

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// HTTP-equivalent classification of a provider failure.
///
/// Carried on every provider error so the resilience layer can decide
/// retryability without provider-specific knowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorClass {
    /// 4xx-style failure (bad request, validation, gone). Never retried.
    Client,
    /// 5xx-style failure. Retried with backoff.
    Server,
    /// 429-style throttling. Retried with backoff.
    RateLimited,
}

impl ProviderErrorClass {
    /// Whether the resilience layer should retry a failure of this class.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Server | Self::RateLimited)
    }
}

impl fmt::Display for ProviderErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::RateLimited => write!(f, "rate_limited"),
        }
    }
}

/// Main error type for the sync engine
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum SyncEngineError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Provider error ({class}): {message}")]
    Provider {
        class: ProviderErrorClass,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Circuit open for provider: {0}")]
    CircuitOpen(String),

    #[error("Re-authentication required: {0}")]
    ReauthenticationRequired(String),

    #[error("No credential stored: {0}")]
    NoCredential(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncEngineError {
    /// Whether the generic resilience layer may retry this error.
    ///
    /// Server-class and rate-limited provider failures and transport errors
    /// are transient. Auth errors are never retried here; they are routed to
    /// the token manager instead.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { class, .. } => class.is_retryable(),
            Self::Network(_) => true,
            _ => false,
        }
    }

    /// Whether this error indicates invalid or expired credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::ReauthenticationRequired(_))
    }

    /// Short stable label for structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Provider { .. } => "provider",
            Self::Network(_) => "network",
            Self::NotFound(_) => "not_found",
            Self::CircuitOpen(_) => "circuit_open",
            Self::ReauthenticationRequired(_) => "reauthentication_required",
            Self::NoCredential(_) => "no_credential",
            Self::Cancelled(_) => "cancelled",
            Self::Database(_) => "database",
            Self::Config(_) => "config",
            Self::InvalidInput(_) => "invalid_input",
            Self::Internal(_) => "internal",
        }
    }
}

/// Result type alias for sync engine operations
pub type Result<T> = std::result::Result<T, SyncEngineError>;
