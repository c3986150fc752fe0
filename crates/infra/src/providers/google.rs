//! Google Calendar provider implementation
//!
//! Talks a Google-Calendar-v3-shaped API: camelCase events under `items`,
//! `nextPageToken` pagination, `updatedMin` incremental fetches, and a
//! `dateTime`/`date` split for timed versus all-day events.

use async_trait::async_trait;
use calsync_core::ProviderClient;
use calsync_domain::{
    Event, ExternalCalendar, ExternalEvent, ExternalEventPage, ProviderConfig, Result,
    SyncEngineError, TokenGrant,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use super::{
    expect_no_content, handle_response, handle_token_response, parse_all_day_date, parse_rfc3339,
    transport_error,
};

const GOOGLE_API_BASE: &str = "https://www.googleapis.com/calendar/v3";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const PROVIDER: &str = "google";

/// Google Calendar provider.
pub struct GoogleProvider {
    http: reqwest::Client,
    client_id: String,
    client_secret: Option<String>,
    api_base: String,
    token_url: String,
    page_size: u32,
}

impl GoogleProvider {
    pub fn new(config: &ProviderConfig, http: reqwest::Client, page_size: u32) -> Self {
        Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            api_base: config
                .api_base_url
                .clone()
                .unwrap_or_else(|| GOOGLE_API_BASE.to_string()),
            token_url: config.token_url.clone().unwrap_or_else(|| GOOGLE_TOKEN_URL.to_string()),
            page_size,
        }
    }

    fn token_form<'a>(&'a self, extra: &[(&'a str, &'a str)]) -> Vec<(&'a str, &'a str)> {
        let mut form: Vec<(&str, &str)> = vec![("client_id", self.client_id.as_str())];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.as_str()));
        }
        form.extend_from_slice(extra);
        form
    }
}

#[async_trait]
impl ProviderClient for GoogleProvider {
    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn authenticate(&self, authorization_code: &str) -> Result<TokenGrant> {
        let form =
            self.token_form(&[("code", authorization_code), ("grant_type", "authorization_code")]);
        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|error| transport_error(PROVIDER, error))?;
        handle_token_response(PROVIDER, response).await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant> {
        let form =
            self.token_form(&[("refresh_token", refresh_token), ("grant_type", "refresh_token")]);
        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|error| transport_error(PROVIDER, error))?;
        handle_token_response(PROVIDER, response).await
    }

    async fn list_calendars(&self, access_token: &str) -> Result<Vec<ExternalCalendar>> {
        let url = format!("{}/users/me/calendarList", self.api_base);
        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|error| transport_error(PROVIDER, error))?;
        let body: GoogleCalendarListResponse = handle_response(PROVIDER, response).await?;
        Ok(body
            .items
            .into_iter()
            .map(|calendar| ExternalCalendar {
                id: calendar.id,
                name: calendar.summary.unwrap_or_default(),
                primary: calendar.primary,
            })
            .collect())
    }

    #[instrument(skip(self, access_token), fields(calendar_id))]
    async fn list_events_since(
        &self,
        access_token: &str,
        calendar_id: &str,
        since: Option<DateTime<Utc>>,
        cursor: Option<&str>,
    ) -> Result<ExternalEventPage> {
        let mut query: Vec<(&str, String)> = vec![
            ("singleEvents", "true".to_string()),
            ("maxResults", self.page_size.to_string()),
            ("showDeleted", "false".to_string()),
        ];
        if let Some(since) = since {
            query.push(("updatedMin", since.to_rfc3339()));
        }
        if let Some(cursor) = cursor {
            query.push(("pageToken", cursor.to_string()));
        }

        let url = format!("{}/calendars/{}/events", self.api_base, calendar_id);
        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&query)
            .send()
            .await
            .map_err(|error| transport_error(PROVIDER, error))?;

        let body: GoogleEventsResponse = handle_response(PROVIDER, response).await?;
        let events = body
            .items
            .into_iter()
            .map(external_event_from_google)
            .collect::<Result<Vec<_>>>()?;

        debug!(events = events.len(), has_more = body.next_page_token.is_some(), "fetched page");
        let has_more = body.next_page_token.is_some();
        Ok(ExternalEventPage { events, next_cursor: body.next_page_token, has_more })
    }

    async fn create_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event: &Event,
    ) -> Result<ExternalEvent> {
        let url = format!("{}/calendars/{}/events", self.api_base, calendar_id);
        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(&google_event_body(event))
            .send()
            .await
            .map_err(|error| transport_error(PROVIDER, error))?;
        let created: GoogleEvent = handle_response(PROVIDER, response).await?;
        external_event_from_google(created)
    }

    async fn update_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event: &Event,
    ) -> Result<ExternalEvent> {
        let provider_event_id = event.provider_event_id.as_deref().ok_or_else(|| {
            SyncEngineError::InvalidInput(format!("event {} was never pushed", event.id))
        })?;

        let url =
            format!("{}/calendars/{}/events/{}", self.api_base, calendar_id, provider_event_id);
        let mut request = self.http.patch(&url).bearer_auth(access_token);
        if let Some(etag) = &event.etag {
            request = request.header("If-Match", etag);
        }
        let response = request
            .json(&google_event_body(event))
            .send()
            .await
            .map_err(|error| transport_error(PROVIDER, error))?;
        let updated: GoogleEvent = handle_response(PROVIDER, response).await?;
        external_event_from_google(updated)
    }

    async fn delete_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        provider_event_id: &str,
    ) -> Result<()> {
        let url =
            format!("{}/calendars/{}/events/{}", self.api_base, calendar_id, provider_event_id);
        let response = self
            .http
            .delete(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|error| transport_error(PROVIDER, error))?;
        expect_no_content(PROVIDER, response).await
    }
}

fn google_event_body(event: &Event) -> serde_json::Value {
    let (start, end) = if event.all_day {
        (
            json!({ "date": event.start.date_naive().to_string() }),
            json!({ "date": event.end.date_naive().to_string() }),
        )
    } else {
        (
            json!({ "dateTime": event.start.to_rfc3339() }),
            json!({ "dateTime": event.end.to_rfc3339() }),
        )
    };

    let mut body = json!({
        "summary": event.title,
        "start": start,
        "end": end,
    });
    if let Some(description) = &event.description {
        body["description"] = json!(description);
    }
    if let Some(location) = &event.location {
        body["location"] = json!(location);
    }
    body
}

fn external_event_from_google(event: GoogleEvent) -> Result<ExternalEvent> {
    let (start, all_day) = parse_event_time(event.start, "start")?;
    let (end, _) = parse_event_time(event.end, "end")?;
    let updated_at = match event.updated.as_deref() {
        Some(updated) => parse_rfc3339(PROVIDER, "updated", updated)?,
        None => start,
    };

    Ok(ExternalEvent {
        id: event.id,
        title: event.summary.unwrap_or_default(),
        description: event.description,
        location: event.location,
        start,
        end,
        all_day,
        updated_at,
        etag: event.etag.unwrap_or_default(),
    })
}

fn parse_event_time(
    time: Option<GoogleEventTime>,
    field: &str,
) -> Result<(DateTime<Utc>, bool)> {
    let time = time.ok_or_else(|| {
        SyncEngineError::InvalidInput(format!("google event missing {field} time"))
    })?;
    if let Some(date_time) = time.date_time.as_deref() {
        return Ok((parse_rfc3339(PROVIDER, field, date_time)?, false));
    }
    if let Some(date) = time.date.as_deref() {
        return Ok((parse_all_day_date(PROVIDER, field, date)?, true));
    }
    Err(SyncEngineError::InvalidInput(format!("google event {field} has no dateTime or date")))
}

#[derive(Debug, Deserialize)]
struct GoogleEventsResponse {
    #[serde(default)]
    items: Vec<GoogleEvent>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleEvent {
    id: String,
    etag: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    start: Option<GoogleEventTime>,
    end: Option<GoogleEventTime>,
    updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleEventTime {
    #[serde(rename = "dateTime")]
    date_time: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleCalendarListResponse {
    #[serde(default)]
    items: Vec<GoogleCalendarListEntry>,
}

#[derive(Debug, Deserialize)]
struct GoogleCalendarListEntry {
    id: String,
    summary: Option<String>,
    #[serde(default)]
    primary: bool,
}
