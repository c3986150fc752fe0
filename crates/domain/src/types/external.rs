//! Provider-side snapshots
//!
//! The shapes a provider client returns after translating its wire format.
//! These are read-only snapshots owned transiently by one reconciliation
//! pass; they never reach storage directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A calendar as listed by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalCalendar {
    pub id: String,
    pub name: String,
    pub primary: bool,
}

/// The provider's view of one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalEvent {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
    /// Last modification instant on the provider side.
    pub updated_at: DateTime<Utc>,
    /// Opaque version token.
    pub etag: String,
}

/// One page of a `list_events_since` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalEventPage {
    pub events: Vec<ExternalEvent>,
    /// Cursor for the next page when `has_more` is set.
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl ExternalEventPage {
    /// Final page holding the given events.
    pub fn last(events: Vec<ExternalEvent>) -> Self {
        Self { events, next_cursor: None, has_more: false }
    }
}
