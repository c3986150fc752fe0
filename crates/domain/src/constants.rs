//! Named defaults for engine tuning
//!
//! Every value here is a default, not a hard limit; all of them are
//! overridable through [`crate::config::Config`].

/// Refresh an access token when it expires within this many seconds.
pub const DEFAULT_REFRESH_MARGIN_SECS: i64 = 120;

/// Local and remote edits within this window of each other are surfaced as
/// conflicts instead of being auto-resolved by timestamp.
pub const DEFAULT_CONFLICT_PROXIMITY_SECS: i64 = 300;

/// Concurrent per-calendar sync workers in `sync_all_calendars`.
pub const DEFAULT_SYNC_WORKERS: usize = 4;

/// Events requested per provider page.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Timeout applied to every provider HTTP call.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Retry attempts per provider call (including the first).
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;

/// First retry backoff delay.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 100;

/// Backoff ceiling.
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 2_000;

/// Consecutive failures before a provider circuit opens.
pub const DEFAULT_BREAKER_FAILURE_THRESHOLD: u32 = 5;

/// How long an open circuit rejects calls before probing again.
pub const DEFAULT_BREAKER_RECOVERY_TIMEOUT_SECS: u64 = 60;
