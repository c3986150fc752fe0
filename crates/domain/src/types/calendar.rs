//! Locally stored calendars and events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::external::ExternalEvent;

/// One provider-linked calendar owned by one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Calendar {
    pub id: String,
    pub user_id: String,
    /// Provider identifier ("google", "outlook").
    pub provider: String,
    /// The calendar's id on the provider side.
    pub provider_calendar_id: String,
    /// Start instant of the last non-failed sync pass. `None` until the
    /// first successful pass; sync fetches everything when unset.
    pub last_synced_at: Option<DateTime<Utc>>,
    pub sync_enabled: bool,
}

/// Locally stored calendar event.
///
/// Created either by the user (push-only until the first sync assigns a
/// `provider_event_id`) or by the reconciler when pulled from a provider.
/// Never hard-deleted: `deleted` is a tombstone so the reconciler can tell
/// "deleted locally since last sync" apart from "never existed".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub calendar_id: String,
    /// Provider-side event id; `None` until first pushed.
    pub provider_event_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
    /// Last modification instant as known locally.
    pub updated_at: DateTime<Utc>,
    /// Opaque provider version token. Once set it changes only when the
    /// reconciler accepts a remote update or a local write is confirmed as
    /// pushed to the provider.
    pub etag: Option<String>,
    /// Tombstone flag.
    pub deleted: bool,
}

impl Event {
    /// Build a new local record from a provider snapshot (remote create).
    pub fn from_external(calendar_id: &str, remote: &ExternalEvent) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            calendar_id: calendar_id.to_string(),
            provider_event_id: Some(remote.id.clone()),
            title: remote.title.clone(),
            description: remote.description.clone(),
            location: remote.location.clone(),
            start: remote.start,
            end: remote.end,
            all_day: remote.all_day,
            updated_at: remote.updated_at,
            etag: Some(remote.etag.clone()),
            deleted: false,
        }
    }

    /// Overwrite local fields from a provider snapshot (remote update wins).
    pub fn apply_external(&mut self, remote: &ExternalEvent) {
        self.title = remote.title.clone();
        self.description = remote.description.clone();
        self.location = remote.location.clone();
        self.start = remote.start;
        self.end = remote.end;
        self.all_day = remote.all_day;
        self.updated_at = remote.updated_at;
        self.etag = Some(remote.etag.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> ExternalEvent {
        ExternalEvent {
            id: "ext-1".into(),
            title: "Standup".into(),
            description: Some("daily".into()),
            location: None,
            start: "2024-03-01T09:00:00Z".parse().unwrap(),
            end: "2024-03-01T09:15:00Z".parse().unwrap(),
            all_day: false,
            updated_at: "2024-03-01T08:00:00Z".parse().unwrap(),
            etag: "v2".into(),
        }
    }

    #[test]
    fn from_external_links_provider_id_and_etag() {
        let event = Event::from_external("cal-1", &remote());
        assert_eq!(event.calendar_id, "cal-1");
        assert_eq!(event.provider_event_id.as_deref(), Some("ext-1"));
        assert_eq!(event.etag.as_deref(), Some("v2"));
        assert!(!event.deleted);
    }

    #[test]
    fn apply_external_overwrites_fields_and_etag() {
        let mut event = Event::from_external("cal-1", &remote());
        event.etag = Some("v1".into());
        event.title = "stale".into();

        let snapshot = remote();
        event.apply_external(&snapshot);

        assert_eq!(event.title, "Standup");
        assert_eq!(event.etag.as_deref(), Some("v2"));
        assert_eq!(event.updated_at, snapshot.updated_at);
    }
}
