//! Engine-specific glue onto the generic resilience layer

use calsync_common::{BreakerError, RetryError, RetryPolicy};
use calsync_domain::SyncEngineError;

/// Retry policy for provider calls: retries what the error taxonomy marks
/// transient (server-class, rate-limited, transport), never auth or other
/// client-side failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderRetryPolicy;

impl RetryPolicy<SyncEngineError> for ProviderRetryPolicy {
    fn should_retry(&self, error: &SyncEngineError, _attempt: u32) -> bool {
        error.is_retryable()
    }
}

/// Flatten a retry outcome back into the engine error, unchanged where one
/// was observed.
pub fn flatten_retry(error: RetryError<SyncEngineError>) -> SyncEngineError {
    match error {
        RetryError::Exhausted(e) | RetryError::NotRetryable(e) => e,
        RetryError::Cancelled => SyncEngineError::Cancelled("retry aborted".to_string()),
    }
}

/// Flatten a breaker outcome, naming the provider whose circuit rejected the
/// call.
pub fn flatten_breaker(
    provider: &str,
    error: BreakerError<RetryError<SyncEngineError>>,
) -> SyncEngineError {
    match error {
        BreakerError::Open => SyncEngineError::CircuitOpen(provider.to_string()),
        BreakerError::Operation(inner) => flatten_retry(inner),
    }
}

#[cfg(test)]
mod tests {
    use calsync_domain::ProviderErrorClass;

    use super::*;

    #[test]
    fn policy_matches_error_taxonomy() {
        let policy = ProviderRetryPolicy;
        let server = SyncEngineError::Provider {
            class: ProviderErrorClass::Server,
            message: "500".into(),
        };
        assert!(policy.should_retry(&server, 1));
        assert!(!policy.should_retry(&SyncEngineError::Auth("401".into()), 1));
        assert!(!policy.should_retry(&SyncEngineError::NotFound("gone".into()), 1));
    }

    #[test]
    fn flattening_preserves_the_original_error() {
        let original = SyncEngineError::Provider {
            class: ProviderErrorClass::RateLimited,
            message: "429".into(),
        };
        let flattened = flatten_retry(RetryError::Exhausted(original.clone()));
        assert_eq!(flattened.to_string(), original.to_string());

        let open = flatten_breaker("google", BreakerError::Open);
        assert!(matches!(open, SyncEngineError::CircuitOpen(p) if p == "google"));
    }
}
