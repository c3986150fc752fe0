//! Port interfaces for the sync engine
//!
//! These traits define the boundaries between core business logic and
//! infrastructure implementations. The engine never talks to a database or
//! an HTTP API directly; it goes through these ports.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use calsync_domain::{
    Calendar, ConflictRecord, ConflictResolutionState, Credential, Event, EventMutation,
    ExternalCalendar, ExternalEvent, ExternalEventPage, Result, SyncResult, TokenGrant,
};
use chrono::{DateTime, Utc};

/// Trait for persisting calendars, events, sync history, and conflicts.
///
/// Implementations must report missing records as
/// [`calsync_domain::SyncEngineError::NotFound`], distinctly from other
/// failures.
#[async_trait]
pub trait CalendarStore: Send + Sync {
    /// Get a calendar by id.
    async fn get_calendar(&self, calendar_id: &str) -> Result<Calendar>;

    /// All calendars belonging to a user.
    async fn list_calendars_for_user(&self, user_id: &str) -> Result<Vec<Calendar>>;

    /// All local events of a calendar, tombstones included.
    async fn list_events(&self, calendar_id: &str) -> Result<Vec<Event>>;

    /// Get a single event by id.
    async fn get_event(&self, event_id: &str) -> Result<Event>;

    /// Insert or update an event.
    async fn upsert_event(&self, event: &Event) -> Result<()>;

    /// Soft-delete an event (tombstone).
    async fn delete_event(&self, event_id: &str) -> Result<()>;

    /// Record the start instant of the last non-failed sync pass.
    async fn update_last_sync(&self, calendar_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Apply one pass's local mutations and the last-sync update atomically:
    /// either all of them land or none do. Mutations without a local write
    /// (the push variants) are skipped here.
    async fn apply_mutations(
        &self,
        calendar_id: &str,
        mutations: &[EventMutation],
        last_sync: DateTime<Utc>,
    ) -> Result<()>;

    /// Persist a sync result (and its conflict records) for history.
    async fn save_sync_result(&self, result: &SyncResult) -> Result<()>;

    /// Load a stored conflict by id.
    async fn get_conflict(&self, conflict_id: &str) -> Result<ConflictRecord>;

    /// Record the resolution of a conflict.
    async fn mark_conflict_resolved(
        &self,
        conflict_id: &str,
        state: ConflictResolutionState,
    ) -> Result<()>;
}

/// Trait for credential persistence.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the credential for a (user, provider) pair, if any.
    async fn load_credential(&self, user_id: &str, provider: &str) -> Result<Option<Credential>>;

    /// Insert or update a credential.
    async fn save_credential(&self, credential: &Credential) -> Result<()>;
}

/// Trait for calendar provider operations.
///
/// One implementation per external service, selected by provider identifier.
/// Implementations own no state beyond per-call credentials and never mutate
/// local storage. Provider failures carry an HTTP-equivalent class
/// (client/server/rate-limited) so the resilience layer can decide
/// retryability generically.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Provider identifier this client serves ("google", "outlook", ...).
    fn provider(&self) -> &str;

    /// Exchange an interactive authorization code for tokens.
    async fn authenticate(&self, authorization_code: &str) -> Result<TokenGrant>;

    /// Obtain a fresh access token from a refresh token.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant>;

    /// List the calendars visible to the token's account.
    async fn list_calendars(&self, access_token: &str) -> Result<Vec<ExternalCalendar>>;

    /// One page of events modified since `since`. Callers must keep calling
    /// with the returned cursor while `has_more` is set; a single page is
    /// never assumed to be complete.
    async fn list_events_since(
        &self,
        access_token: &str,
        calendar_id: &str,
        since: Option<DateTime<Utc>>,
        cursor: Option<&str>,
    ) -> Result<ExternalEventPage>;

    /// Create an event on the provider, returning the provider's snapshot.
    async fn create_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event: &Event,
    ) -> Result<ExternalEvent>;

    /// Update the provider copy of an event (`event.provider_event_id` must
    /// be set), returning the provider's snapshot.
    async fn update_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event: &Event,
    ) -> Result<ExternalEvent>;

    /// Delete an event on the provider.
    async fn delete_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        provider_event_id: &str,
    ) -> Result<()>;
}

/// Provider clients keyed by provider identifier.
///
/// Adding a provider means inserting one entry here; the orchestrator never
/// changes.
pub type ProviderRegistry = HashMap<String, Arc<dyn ProviderClient>>;
