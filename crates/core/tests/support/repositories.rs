//! In-memory mocks for the store ports.
//!
//! Deterministic stand-ins for the SQLite implementations, designed for
//! orchestrator and token manager tests. Failure injection flags mimic
//! storage faults.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use calsync_core::{CalendarStore, CredentialStore};
use calsync_domain::{
    Calendar, ConflictRecord, ConflictResolutionState, Credential, Event, EventMutation,
    Result as DomainResult, SyncEngineError, SyncResult,
};
use chrono::{DateTime, Utc};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory `CalendarStore`.
#[derive(Default)]
pub struct MockCalendarStore {
    calendars: Mutex<HashMap<String, Calendar>>,
    events: Mutex<HashMap<String, Event>>,
    sync_results: Mutex<Vec<SyncResult>>,
    conflicts: Mutex<HashMap<String, ConflictRecord>>,
    /// When set, `apply_mutations` fails without writing anything.
    pub fail_apply: AtomicBool,
    /// When set, `upsert_event` fails.
    pub fail_upserts: AtomicBool,
}

impl MockCalendarStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_calendar(self, calendar: Calendar) -> Self {
        lock(&self.calendars).insert(calendar.id.clone(), calendar);
        self
    }

    pub fn with_event(self, event: Event) -> Self {
        lock(&self.events).insert(event.id.clone(), event);
        self
    }

    pub fn calendar(&self, calendar_id: &str) -> Option<Calendar> {
        lock(&self.calendars).get(calendar_id).cloned()
    }

    pub fn event(&self, event_id: &str) -> Option<Event> {
        lock(&self.events).get(event_id).cloned()
    }

    pub fn events_for(&self, calendar_id: &str) -> Vec<Event> {
        lock(&self.events)
            .values()
            .filter(|event| event.calendar_id == calendar_id)
            .cloned()
            .collect()
    }

    pub fn saved_results(&self) -> Vec<SyncResult> {
        lock(&self.sync_results).clone()
    }

    pub fn conflict_by_id(&self, conflict_id: &str) -> Option<ConflictRecord> {
        lock(&self.conflicts).get(conflict_id).cloned()
    }

    pub fn conflict_ids(&self) -> Vec<String> {
        lock(&self.conflicts).keys().cloned().collect()
    }
}

#[async_trait]
impl CalendarStore for MockCalendarStore {
    async fn get_calendar(&self, calendar_id: &str) -> DomainResult<Calendar> {
        lock(&self.calendars)
            .get(calendar_id)
            .cloned()
            .ok_or_else(|| SyncEngineError::NotFound(format!("calendar {calendar_id}")))
    }

    async fn list_calendars_for_user(&self, user_id: &str) -> DomainResult<Vec<Calendar>> {
        Ok(lock(&self.calendars)
            .values()
            .filter(|calendar| calendar.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_events(&self, calendar_id: &str) -> DomainResult<Vec<Event>> {
        Ok(self.events_for(calendar_id))
    }

    async fn get_event(&self, event_id: &str) -> DomainResult<Event> {
        lock(&self.events)
            .get(event_id)
            .cloned()
            .ok_or_else(|| SyncEngineError::NotFound(format!("event {event_id}")))
    }

    async fn upsert_event(&self, event: &Event) -> DomainResult<()> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(SyncEngineError::Database("injected upsert failure".into()));
        }
        lock(&self.events).insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn delete_event(&self, event_id: &str) -> DomainResult<()> {
        let mut events = lock(&self.events);
        match events.get_mut(event_id) {
            Some(event) => {
                event.deleted = true;
                event.updated_at = Utc::now();
                Ok(())
            }
            None => Err(SyncEngineError::NotFound(format!("event {event_id}"))),
        }
    }

    async fn update_last_sync(&self, calendar_id: &str, at: DateTime<Utc>) -> DomainResult<()> {
        let mut calendars = lock(&self.calendars);
        match calendars.get_mut(calendar_id) {
            Some(calendar) => {
                calendar.last_synced_at = Some(at);
                Ok(())
            }
            None => Err(SyncEngineError::NotFound(format!("calendar {calendar_id}"))),
        }
    }

    async fn apply_mutations(
        &self,
        calendar_id: &str,
        mutations: &[EventMutation],
        last_sync: DateTime<Utc>,
    ) -> DomainResult<()> {
        if self.fail_apply.load(Ordering::SeqCst) {
            return Err(SyncEngineError::Database("injected batch failure".into()));
        }

        {
            let mut events = lock(&self.events);
            for mutation in mutations {
                match mutation {
                    EventMutation::Create(event) | EventMutation::Update(event) => {
                        events.insert(event.id.clone(), event.clone());
                    }
                    // Push variants carry no local write.
                    _ => {}
                }
            }
        }
        self.update_last_sync(calendar_id, last_sync).await
    }

    async fn save_sync_result(&self, result: &SyncResult) -> DomainResult<()> {
        lock(&self.sync_results).push(result.clone());
        let mut conflicts = lock(&self.conflicts);
        for conflict in &result.conflicts {
            conflicts.insert(conflict.id.clone(), conflict.clone());
        }
        Ok(())
    }

    async fn get_conflict(&self, conflict_id: &str) -> DomainResult<ConflictRecord> {
        lock(&self.conflicts)
            .get(conflict_id)
            .cloned()
            .ok_or_else(|| SyncEngineError::NotFound(format!("conflict {conflict_id}")))
    }

    async fn mark_conflict_resolved(
        &self,
        conflict_id: &str,
        state: ConflictResolutionState,
    ) -> DomainResult<()> {
        let mut conflicts = lock(&self.conflicts);
        match conflicts.get_mut(conflict_id) {
            Some(conflict) => {
                conflict.resolution = state;
                Ok(())
            }
            None => Err(SyncEngineError::NotFound(format!("conflict {conflict_id}"))),
        }
    }
}

/// In-memory `CredentialStore`.
#[derive(Default)]
pub struct MockCredentialStore {
    credentials: Mutex<HashMap<(String, String), Credential>>,
    pub save_count: AtomicU32,
}

impl MockCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(self, credential: Credential) -> Self {
        lock(&self.credentials).insert(
            (credential.user_id.clone(), credential.provider.clone()),
            credential,
        );
        self
    }

    pub fn credential(&self, user_id: &str, provider: &str) -> Option<Credential> {
        lock(&self.credentials).get(&(user_id.to_string(), provider.to_string())).cloned()
    }
}

#[async_trait]
impl CredentialStore for MockCredentialStore {
    async fn load_credential(
        &self,
        user_id: &str,
        provider: &str,
    ) -> DomainResult<Option<Credential>> {
        Ok(self.credential(user_id, provider))
    }

    async fn save_credential(&self, credential: &Credential) -> DomainResult<()> {
        self.save_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.credentials).insert(
            (credential.user_id.clone(), credential.provider.clone()),
            credential.clone(),
        );
        Ok(())
    }
}
