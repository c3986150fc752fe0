//! Sync orchestrator
//!
//! Entry point of the engine. One pass per calendar: token → paginated
//! fetch (through the resilience layer) → reconcile → atomic local apply →
//! per-event pushes → result assembly. `sync_all_calendars` fans passes out
//! with a bounded worker count so one calendar's failure never blocks the
//! others.
//!
//! Result state machine: `Pending → InProgress → {Success | Partial |
//! Failed}`. A pass goes `Failed` when nothing was written locally (token
//! acquisition, lookup, or page fetch failed, or the pass was cancelled);
//! it goes `Partial` when the reconciled batch landed but individual pushes
//! or write-backs failed. On any non-failed outcome the calendar's
//! last-sync instant was advanced - atomically with the batch - to the
//! pass's start time, so events modified during a long pass are re-fetched
//! next time.

use std::sync::Arc;
use std::time::Duration;

use calsync_common::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, RetryConfig, RetryExecutor,
};
use calsync_domain::{
    Calendar, ConflictResolution, ConflictResolutionState, Event, EventMutation, ExternalEvent,
    Result, SyncConfig, SyncEngineError, SyncErrorRecord, SyncResult, SyncStatus,
};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::ports::{CalendarStore, ProviderClient, ProviderRegistry};
use crate::reconcile::{reconcile, ReconcilerConfig};
use crate::resilience::{flatten_breaker, ProviderRetryPolicy};
use crate::token::TokenManager;

enum PushKind {
    Created,
    Updated,
    Deleted,
}

/// The sync engine's orchestrator service.
///
/// Constructed with explicit dependencies - no ambient globals. Provider
/// clients are selected from the registry by each calendar's provider
/// identifier, so adding a provider never touches this type.
pub struct SyncService {
    store: Arc<dyn CalendarStore>,
    tokens: Arc<TokenManager>,
    providers: Arc<ProviderRegistry>,
    breakers: CircuitBreakerRegistry,
    retry: RetryExecutor<ProviderRetryPolicy>,
    reconciler: ReconcilerConfig,
    workers: usize,
    cancel: CancellationToken,
}

impl SyncService {
    /// Create a new sync service.
    ///
    /// `cancel` aborts in-flight passes promptly: backoff sleeps are
    /// interrupted and in-progress results are finalized as `Failed` with a
    /// cancelled error rather than left in progress.
    pub fn new(
        store: Arc<dyn CalendarStore>,
        tokens: Arc<TokenManager>,
        providers: Arc<ProviderRegistry>,
        config: &SyncConfig,
        cancel: CancellationToken,
    ) -> Self {
        let retry_config = RetryConfig {
            max_attempts: config.retry_max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            jitter: false,
        };
        let breaker_config = CircuitBreakerConfig {
            failure_threshold: config.breaker_failure_threshold.max(1),
            recovery_timeout: Duration::from_secs(config.breaker_recovery_timeout_secs),
            ..CircuitBreakerConfig::default()
        };

        Self {
            store,
            tokens,
            providers,
            breakers: CircuitBreakerRegistry::new(breaker_config),
            retry: RetryExecutor::new(retry_config, ProviderRetryPolicy),
            reconciler: ReconcilerConfig {
                proximity_window_secs: config.conflict_proximity_secs,
            },
            workers: config.workers.max(1),
            cancel,
        }
    }

    /// Run one sync pass for a calendar and return its (persisted) result.
    #[instrument(skip(self))]
    pub async fn sync_calendar(&self, calendar_id: &str) -> SyncResult {
        let started_at = Utc::now();
        let mut result = SyncResult::begin(calendar_id, started_at);
        info!(calendar_id, "starting sync pass");

        if let Err(save_error) = self.store.save_sync_result(&result).await {
            warn!(calendar_id, error = %save_error, "failed to persist in-progress sync result");
        }

        if let Err(pass_error) = self.run_pass(&mut result).await {
            error!(
                calendar_id,
                kind = pass_error.kind(),
                error = %pass_error,
                "sync pass failed"
            );
            result.fail(&pass_error);
        }

        result.finished_at = Some(Utc::now());
        if let Err(save_error) = self.store.save_sync_result(&result).await {
            warn!(calendar_id, error = %save_error, "failed to persist finished sync result");
        }

        info!(
            calendar_id,
            status = ?result.status,
            processed = result.events_processed,
            created = result.events_created,
            updated = result.events_updated,
            deleted = result.events_deleted,
            conflicts = result.conflicts.len(),
            errors = result.errors.len(),
            "sync pass finished"
        );
        result
    }

    /// Sync every enabled calendar of a user, bounded-concurrently.
    ///
    /// Failures are isolated per calendar: each returned result carries its
    /// own terminal status.
    #[instrument(skip(self))]
    pub async fn sync_all_calendars(&self, user_id: &str) -> Result<Vec<SyncResult>> {
        let calendars = self.store.list_calendars_for_user(user_id).await?;
        let enabled: Vec<Calendar> =
            calendars.into_iter().filter(|calendar| calendar.sync_enabled).collect();
        info!(user_id, calendars = enabled.len(), workers = self.workers, "fanning out sync");

        let results = stream::iter(enabled)
            .map(|calendar| async move { self.sync_calendar(&calendar.id).await })
            .buffer_unordered(self.workers)
            .collect::<Vec<_>>()
            .await;

        Ok(results)
    }

    /// Apply an external decision to a stored conflict.
    #[instrument(skip(self, resolution))]
    pub async fn resolve_conflict(
        &self,
        conflict_id: &str,
        resolution: ConflictResolution,
    ) -> Result<()> {
        let conflict = self.store.get_conflict(conflict_id).await?;
        let event = self.store.get_event(&conflict.event_id).await?;
        let calendar = self.store.get_calendar(&event.calendar_id).await?;

        match resolution {
            ConflictResolution::RemoteWins => {
                let mut updated = event;
                updated.apply_external(&conflict.remote);
                self.store.upsert_event(&updated).await?;
                self.store
                    .mark_conflict_resolved(conflict_id, ConflictResolutionState::RemoteWins)
                    .await?;
            }
            ConflictResolution::LocalWins => {
                self.push_event_state(&calendar, event).await?;
                self.store
                    .mark_conflict_resolved(conflict_id, ConflictResolutionState::LocalWins)
                    .await?;
            }
            ConflictResolution::Merged(merged) => {
                // The merged payload supplies the fields; identity and the
                // provider link stay those of the conflicted record.
                let mut merged = merged;
                merged.id = event.id.clone();
                merged.calendar_id = event.calendar_id.clone();
                merged.provider_event_id = event.provider_event_id.clone();
                self.store.upsert_event(&merged).await?;
                self.push_event_state(&calendar, merged).await?;
                self.store
                    .mark_conflict_resolved(conflict_id, ConflictResolutionState::Merged)
                    .await?;
            }
        }

        info!(conflict_id, "conflict resolved");
        Ok(())
    }

    async fn run_pass(&self, result: &mut SyncResult) -> Result<()> {
        self.ensure_not_cancelled()?;

        let calendar = self.store.get_calendar(&result.calendar_id).await?;
        if !calendar.sync_enabled {
            debug!(calendar_id = %calendar.id, "sync disabled; skipping pass");
            result.status = SyncStatus::Success;
            return Ok(());
        }

        let provider_client = self.provider_client(&calendar.provider)?;
        let token = self.tokens.get_valid_token(&calendar.user_id, &calendar.provider).await?;
        let breaker = self.breakers.get(&calendar.provider);

        // Fetch the complete remote page set before touching local state. A
        // failure anywhere in here aborts the pass with no local writes and
        // an unchanged last-sync instant, so the next run re-fetches from
        // the same point.
        let remote_events = self.fetch_remote_events(&calendar, &provider_client, &token, &breaker).await?;
        result.events_processed = remote_events.len();

        let local_events = self.store.list_events(&calendar.id).await?;
        let outcome = reconcile(
            &calendar,
            &local_events,
            &remote_events,
            calendar.last_synced_at,
            &self.reconciler,
        );
        result.conflicts = outcome.conflicts;

        let (local_mutations, push_mutations): (Vec<_>, Vec<_>) =
            outcome.mutations.into_iter().partition(EventMutation::is_local);

        self.ensure_not_cancelled()?;

        // One transaction: the reconciled batch and the last-sync advance
        // (to the pass's *start* instant) land together or not at all.
        self.store
            .apply_mutations(&calendar.id, &local_mutations, result.started_at)
            .await?;
        for mutation in &local_mutations {
            match mutation {
                EventMutation::Create(_) => result.events_created += 1,
                EventMutation::Update(_) => result.events_updated += 1,
                _ => {}
            }
        }

        // Pushes run per event: a failure is captured and the pass moves on.
        for push in push_mutations {
            if self.cancel.is_cancelled() {
                warn!(calendar_id = %calendar.id, "cancelled mid-push; remaining pushes skipped");
                return Err(SyncEngineError::Cancelled(
                    "sync cancelled before remaining pushes".into(),
                ));
            }

            let event_id = push_event_id(&push);
            match self.execute_push(&calendar, &provider_client, &token, &breaker, push).await {
                Ok(PushKind::Created) => result.events_created += 1,
                Ok(PushKind::Updated) => result.events_updated += 1,
                Ok(PushKind::Deleted) => result.events_deleted += 1,
                Err(push_error) => {
                    warn!(
                        calendar_id = %calendar.id,
                        event_id = %event_id,
                        provider = %calendar.provider,
                        kind = push_error.kind(),
                        error = %push_error,
                        "push failed; continuing with next event"
                    );
                    result
                        .errors
                        .push(SyncErrorRecord::from_error(Some(event_id), &push_error));
                }
            }
        }

        result.status =
            if result.errors.is_empty() { SyncStatus::Success } else { SyncStatus::Partial };
        Ok(())
    }

    async fn fetch_remote_events(
        &self,
        calendar: &Calendar,
        provider_client: &Arc<dyn ProviderClient>,
        token: &str,
        breaker: &CircuitBreaker,
    ) -> Result<Vec<ExternalEvent>> {
        let mut remote_events: Vec<ExternalEvent> = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            self.ensure_not_cancelled()?;

            let page = self
                .provider_call(&calendar.provider, breaker, || {
                    let client = Arc::clone(provider_client);
                    let token = token.to_string();
                    let calendar_id = calendar.provider_calendar_id.clone();
                    let since = calendar.last_synced_at;
                    let cursor = cursor.clone();
                    async move {
                        client
                            .list_events_since(&token, &calendar_id, since, cursor.as_deref())
                            .await
                    }
                })
                .await?;

            debug!(
                calendar_id = %calendar.id,
                page_events = page.events.len(),
                has_more = page.has_more,
                "fetched provider page"
            );
            remote_events.extend(page.events);

            if !page.has_more {
                break;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => {
                    warn!(
                        calendar_id = %calendar.id,
                        "provider reported more pages without a cursor; stopping pagination"
                    );
                    break;
                }
            }
        }

        Ok(remote_events)
    }

    async fn execute_push(
        &self,
        calendar: &Calendar,
        provider_client: &Arc<dyn ProviderClient>,
        token: &str,
        breaker: &CircuitBreaker,
        push: EventMutation,
    ) -> Result<PushKind> {
        match push {
            EventMutation::PushCreate(event) => {
                let snapshot = self
                    .provider_call(&calendar.provider, breaker, || {
                        let client = Arc::clone(provider_client);
                        let token = token.to_string();
                        let calendar_id = calendar.provider_calendar_id.clone();
                        let event = event.clone();
                        async move { client.create_event(&token, &calendar_id, &event).await }
                    })
                    .await?;

                // Confirmed push: link the provider id and adopt its etag.
                let mut updated = event;
                updated.provider_event_id = Some(snapshot.id);
                updated.etag = Some(snapshot.etag);
                self.store.upsert_event(&updated).await?;
                Ok(PushKind::Created)
            }
            EventMutation::PushUpdate(event) => {
                let snapshot = self
                    .provider_call(&calendar.provider, breaker, || {
                        let client = Arc::clone(provider_client);
                        let token = token.to_string();
                        let calendar_id = calendar.provider_calendar_id.clone();
                        let event = event.clone();
                        async move { client.update_event(&token, &calendar_id, &event).await }
                    })
                    .await?;

                let mut updated = event;
                updated.etag = Some(snapshot.etag);
                self.store.upsert_event(&updated).await?;
                Ok(PushKind::Updated)
            }
            EventMutation::PushDelete { event_id, provider_event_id } => {
                let deletion = self
                    .provider_call(&calendar.provider, breaker, || {
                        let client = Arc::clone(provider_client);
                        let token = token.to_string();
                        let calendar_id = calendar.provider_calendar_id.clone();
                        let provider_event_id = provider_event_id.clone();
                        async move {
                            client.delete_event(&token, &calendar_id, &provider_event_id).await
                        }
                    })
                    .await;

                match deletion {
                    Ok(()) => {}
                    // Already gone remotely: the tombstone's job is done.
                    Err(SyncEngineError::NotFound(_)) => {
                        debug!(event_id = %event_id, "remote copy already deleted");
                    }
                    Err(delete_error) => return Err(delete_error),
                }

                // Unlink the provider id so the tombstone is not re-pushed
                // on the next pass.
                let mut event = self.store.get_event(&event_id).await?;
                event.provider_event_id = None;
                self.store.upsert_event(&event).await?;
                Ok(PushKind::Deleted)
            }
            EventMutation::Create(_) | EventMutation::Update(_) => Err(SyncEngineError::Internal(
                "local mutation routed to the push executor".into(),
            )),
        }
    }

    /// Push the given local state to the provider and adopt the returned
    /// etag (used by conflict resolution).
    async fn push_event_state(&self, calendar: &Calendar, event: Event) -> Result<()> {
        let provider_client = self.provider_client(&calendar.provider)?;
        let token = self.tokens.get_valid_token(&calendar.user_id, &calendar.provider).await?;
        let breaker = self.breakers.get(&calendar.provider);

        let snapshot = self
            .provider_call(&calendar.provider, &breaker, || {
                let client = Arc::clone(&provider_client);
                let token = token.clone();
                let calendar_id = calendar.provider_calendar_id.clone();
                let event = event.clone();
                async move { client.update_event(&token, &calendar_id, &event).await }
            })
            .await?;

        let mut updated = event;
        updated.etag = Some(snapshot.etag);
        self.store.upsert_event(&updated).await?;
        Ok(())
    }

    /// Run a provider operation under the circuit breaker, which wraps the
    /// retry executor: a provider outage opens the breaker only after
    /// retries were exhausted at least once.
    async fn provider_call<T, F, Fut>(
        &self,
        provider: &str,
        breaker: &CircuitBreaker,
        operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        breaker
            .execute(|| self.retry.execute_cancellable(&self.cancel, operation))
            .await
            .map_err(|breaker_error| flatten_breaker(provider, breaker_error))
    }

    fn provider_client(&self, provider: &str) -> Result<Arc<dyn ProviderClient>> {
        self.providers.get(provider).cloned().ok_or_else(|| {
            SyncEngineError::Config(format!("no client configured for provider {provider}"))
        })
    }

    fn ensure_not_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(SyncEngineError::Cancelled("sync cancelled".into()));
        }
        Ok(())
    }
}

fn push_event_id(push: &EventMutation) -> String {
    match push {
        EventMutation::Create(event)
        | EventMutation::Update(event)
        | EventMutation::PushCreate(event)
        | EventMutation::PushUpdate(event) => event.id.clone(),
        EventMutation::PushDelete { event_id, .. } => event_id.clone(),
    }
}
