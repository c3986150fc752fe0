//! In-memory test doubles and fixtures for the engine's ports.
#![allow(dead_code)]

pub mod providers;
pub mod repositories;

use calsync_domain::{Calendar, Credential, Event};
use chrono::{DateTime, Duration, Utc};
pub use providers::{external_event, MockProvider};
pub use repositories::{MockCalendarStore, MockCredentialStore};

/// Fixed reference instant used by the fixtures.
pub fn t0() -> DateTime<Utc> {
    "2024-03-01T12:00:00Z".parse().unwrap()
}

/// Enabled calendar whose last sync finished ten minutes before [`t0`].
pub fn calendar(id: &str, user_id: &str, provider: &str) -> Calendar {
    Calendar {
        id: id.to_string(),
        user_id: user_id.to_string(),
        provider: provider.to_string(),
        provider_calendar_id: "primary".to_string(),
        last_synced_at: Some(t0() - Duration::minutes(10)),
        sync_enabled: true,
    }
}

/// Credential valid for another hour.
pub fn valid_credential(user_id: &str, provider: &str) -> Credential {
    Credential {
        user_id: user_id.to_string(),
        provider: provider.to_string(),
        access_token: "cached-token".to_string(),
        refresh_token: Some("refresh-token".to_string()),
        expires_at: Utc::now() + Duration::hours(1),
        invalidated: false,
    }
}

/// Credential already past its expiry.
pub fn expired_credential(user_id: &str, provider: &str) -> Credential {
    Credential {
        expires_at: Utc::now() - Duration::seconds(30),
        ..valid_credential(user_id, provider)
    }
}

/// Local event fixture.
pub fn local_event(
    id: &str,
    calendar_id: &str,
    provider_event_id: Option<&str>,
    etag: Option<&str>,
    updated_at: DateTime<Utc>,
) -> Event {
    Event {
        id: id.to_string(),
        calendar_id: calendar_id.to_string(),
        provider_event_id: provider_event_id.map(String::from),
        title: format!("Local {id}"),
        description: None,
        location: None,
        start: updated_at,
        end: updated_at + Duration::hours(1),
        all_day: false,
        updated_at,
        etag: etag.map(String::from),
        deleted: false,
    }
}
