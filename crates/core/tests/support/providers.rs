//! Scripted in-memory provider client.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use calsync_core::ProviderClient;
use calsync_domain::{
    Event, ExternalCalendar, ExternalEvent, ExternalEventPage, Result as DomainResult,
    SyncEngineError, TokenGrant,
};
use chrono::{DateTime, Utc};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Provider client whose responses are scripted by the test.
///
/// `list_events_since` pops queued responses in order and serves an empty
/// final page once the queue is drained; mutations are recorded for
/// assertions. Refresh responses can be queued the same way, with an
/// optional artificial delay to widen coalescing race windows.
pub struct MockProvider {
    name: String,
    pages: Mutex<VecDeque<DomainResult<ExternalEventPage>>>,
    refresh_responses: Mutex<VecDeque<DomainResult<TokenGrant>>>,
    refresh_delay: Mutex<Option<Duration>>,
    create_errors: Mutex<VecDeque<SyncEngineError>>,
    pub list_calls: AtomicU32,
    pub refresh_calls: AtomicU32,
    pub created: Mutex<Vec<Event>>,
    pub updated: Mutex<Vec<Event>>,
    pub deleted: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            pages: Mutex::new(VecDeque::new()),
            refresh_responses: Mutex::new(VecDeque::new()),
            refresh_delay: Mutex::new(None),
            create_errors: Mutex::new(VecDeque::new()),
            list_calls: AtomicU32::new(0),
            refresh_calls: AtomicU32::new(0),
            created: Mutex::new(Vec::new()),
            updated: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub fn queue_page(&self, page: DomainResult<ExternalEventPage>) {
        lock(&self.pages).push_back(page);
    }

    pub fn queue_refresh(&self, response: DomainResult<TokenGrant>) {
        lock(&self.refresh_responses).push_back(response);
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *lock(&self.refresh_delay) = Some(delay);
    }

    pub fn queue_create_error(&self, error: SyncEngineError) {
        lock(&self.create_errors).push_back(error);
    }

    pub fn created_count(&self) -> usize {
        lock(&self.created).len()
    }

    pub fn updated_count(&self) -> usize {
        lock(&self.updated).len()
    }

    pub fn deleted_ids(&self) -> Vec<String> {
        lock(&self.deleted).clone()
    }
}

/// Remote event fixture.
pub fn external_event(id: &str, etag: &str, updated_at: DateTime<Utc>) -> ExternalEvent {
    ExternalEvent {
        id: id.to_string(),
        title: format!("Remote {id}"),
        description: None,
        location: None,
        start: updated_at,
        end: updated_at + chrono::Duration::hours(1),
        all_day: false,
        updated_at,
        etag: etag.to_string(),
    }
}

#[async_trait]
impl ProviderClient for MockProvider {
    fn provider(&self) -> &str {
        &self.name
    }

    async fn authenticate(&self, _authorization_code: &str) -> DomainResult<TokenGrant> {
        Ok(TokenGrant {
            access_token: "interactive-token".into(),
            refresh_token: Some("interactive-refresh".into()),
            expires_in: 3_600,
        })
    }

    async fn refresh_token(&self, _refresh_token: &str) -> DomainResult<TokenGrant> {
        let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *lock(&self.refresh_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match lock(&self.refresh_responses).pop_front() {
            Some(response) => response,
            None => Ok(TokenGrant {
                access_token: format!("refreshed-{call}"),
                refresh_token: None,
                expires_in: 3_600,
            }),
        }
    }

    async fn list_calendars(&self, _access_token: &str) -> DomainResult<Vec<ExternalCalendar>> {
        Ok(vec![ExternalCalendar { id: "primary".into(), name: "Primary".into(), primary: true }])
    }

    async fn list_events_since(
        &self,
        _access_token: &str,
        _calendar_id: &str,
        _since: Option<DateTime<Utc>>,
        _cursor: Option<&str>,
    ) -> DomainResult<ExternalEventPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        match lock(&self.pages).pop_front() {
            Some(page) => page,
            None => Ok(ExternalEventPage::last(Vec::new())),
        }
    }

    async fn create_event(
        &self,
        _access_token: &str,
        _calendar_id: &str,
        event: &Event,
    ) -> DomainResult<ExternalEvent> {
        if let Some(error) = lock(&self.create_errors).pop_front() {
            return Err(error);
        }
        let mut created = lock(&self.created);
        created.push(event.clone());
        let n = created.len();
        Ok(ExternalEvent {
            id: format!("ext-{n}"),
            title: event.title.clone(),
            description: event.description.clone(),
            location: event.location.clone(),
            start: event.start,
            end: event.end,
            all_day: event.all_day,
            updated_at: Utc::now(),
            etag: format!("etag-c{n}"),
        })
    }

    async fn update_event(
        &self,
        _access_token: &str,
        _calendar_id: &str,
        event: &Event,
    ) -> DomainResult<ExternalEvent> {
        let mut updated = lock(&self.updated);
        updated.push(event.clone());
        let n = updated.len();
        Ok(ExternalEvent {
            id: event.provider_event_id.clone().unwrap_or_else(|| format!("ext-{n}")),
            title: event.title.clone(),
            description: event.description.clone(),
            location: event.location.clone(),
            start: event.start,
            end: event.end,
            all_day: event.all_day,
            updated_at: Utc::now(),
            etag: format!("etag-u{n}"),
        })
    }

    async fn delete_event(
        &self,
        _access_token: &str,
        _calendar_id: &str,
        provider_event_id: &str,
    ) -> DomainResult<()> {
        lock(&self.deleted).push(provider_event_id.to_string());
        Ok(())
    }
}
