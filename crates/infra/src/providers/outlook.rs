//! Outlook (Microsoft Graph) provider implementation
//!
//! Talks a Microsoft-Graph-shaped API: events under `value`,
//! `@odata.nextLink` pagination (absolute URLs used verbatim as cursors),
//! `@odata.etag` version tokens, and `Prefer` headers pinning event times to
//! UTC.

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
    expect_no_content, handle_response, handle_token_response, parse_rfc3339, transport_error,
};

const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";
const GRAPH_TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";
const OUTLOOK_SCOPE: &str = "Calendars.ReadWrite offline_access";
const OUTLOOK_TIMEZONE_HEADER: &str = r#"outlook.timezone="UTC""#;
const PROVIDER: &str = "outlook";

/// Outlook calendar provider.
pub struct OutlookProvider {
    http: reqwest::Client,
    client_id: String,
    client_secret: Option<String>,
    api_base: String,
    token_url: String,
    page_size: u32,
}

impl OutlookProvider {
    pub fn new(config: &ProviderConfig, http: reqwest::Client, page_size: u32) -> Self {
        Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            api_base: config
                .api_base_url
                .clone()
                .unwrap_or_else(|| GRAPH_API_BASE.to_string()),
            token_url: config.token_url.clone().unwrap_or_else(|| GRAPH_TOKEN_URL.to_string()),
            page_size,
        }
    }

    fn token_form<'a>(&'a self, extra: &[(&'a str, &'a str)]) -> Vec<(&'a str, &'a str)> {
        let mut form: Vec<(&str, &str)> =
            vec![("client_id", self.client_id.as_str()), ("scope", OUTLOOK_SCOPE)];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.as_str()));
        }
        form.extend_from_slice(extra);
        form
    }
}

#[async_trait]
impl ProviderClient for OutlookProvider {
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
        let url = format!("{}/me/calendars", self.api_base);
        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|error| transport_error(PROVIDER, error))?;
        let body: GraphCalendarsResponse = handle_response(PROVIDER, response).await?;
        Ok(body
            .value
            .into_iter()
            .map(|calendar| ExternalCalendar {
                id: calendar.id,
                name: calendar.name.unwrap_or_default(),
                primary: calendar.is_default,
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
        // Graph pagination cursors are absolute URLs; follow them verbatim.
        let request = match cursor {
            Some(next_link) => self.http.get(next_link),
            None => {
                let url = format!("{}/me/calendars/{}/events", self.api_base, calendar_id);
                let mut query: Vec<(&str, String)> = vec![
                    ("$top", self.page_size.to_string()),
                    ("$orderby", "lastModifiedDateTime".to_string()),
                ];
                if let Some(since) = since {
                    query.push((
                        "$filter",
                        format!("lastModifiedDateTime ge {}", since.to_rfc3339()),
                    ));
                }
                self.http.get(&url).query(&query)
            }
        };

        let response = request
            .bearer_auth(access_token)
            .header("Prefer", OUTLOOK_TIMEZONE_HEADER)
            .send()
            .await
            .map_err(|error| transport_error(PROVIDER, error))?;

        let body: GraphEventsResponse = handle_response(PROVIDER, response).await?;
        let events = body
            .value
            .into_iter()
            .map(external_event_from_graph)
            .collect::<Result<Vec<_>>>()?;

        debug!(events = events.len(), has_more = body.next_link.is_some(), "fetched page");
        let has_more = body.next_link.is_some();
        Ok(ExternalEventPage { events, next_cursor: body.next_link, has_more })
    }

    async fn create_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event: &Event,
    ) -> Result<ExternalEvent> {
        let url = format!("{}/me/calendars/{}/events", self.api_base, calendar_id);
        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(&graph_event_body(event))
            .send()
            .await
            .map_err(|error| transport_error(PROVIDER, error))?;
        let created: GraphEvent = handle_response(PROVIDER, response).await?;
        external_event_from_graph(created)
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
            format!("{}/me/calendars/{}/events/{}", self.api_base, calendar_id, provider_event_id);
        let mut request = self.http.patch(&url).bearer_auth(access_token);
        if let Some(etag) = &event.etag {
            request = request.header("If-Match", etag);
        }
        let response = request
            .json(&graph_event_body(event))
            .send()
            .await
            .map_err(|error| transport_error(PROVIDER, error))?;
        let updated: GraphEvent = handle_response(PROVIDER, response).await?;
        external_event_from_graph(updated)
    }

    async fn delete_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        provider_event_id: &str,
    ) -> Result<()> {
        let url =
            format!("{}/me/calendars/{}/events/{}", self.api_base, calendar_id, provider_event_id);
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

fn graph_event_body(event: &Event) -> serde_json::Value {
    let mut body = json!({
        "subject": event.title,
        "isAllDay": event.all_day,
        "start": { "dateTime": event.start.to_rfc3339(), "timeZone": "UTC" },
        "end": { "dateTime": event.end.to_rfc3339(), "timeZone": "UTC" },
    });
    if let Some(description) = &event.description {
        body["body"] = json!({ "contentType": "text", "content": description });
    }
    if let Some(location) = &event.location {
        body["location"] = json!({ "displayName": location });
    }
    body
}

fn external_event_from_graph(event: GraphEvent) -> Result<ExternalEvent> {
    let start = parse_graph_time(event.start, "start")?;
    let end = parse_graph_time(event.end, "end")?;
    let updated_at = match event.last_modified.as_deref() {
        Some(modified) => parse_rfc3339(PROVIDER, "lastModifiedDateTime", modified)?,
        None => start,
    };

    Ok(ExternalEvent {
        id: event.id,
        title: event.subject.unwrap_or_default(),
        description: event.body_preview,
        location: event.location.and_then(|location| location.display_name),
        start,
        end,
        all_day: event.is_all_day,
        updated_at,
        etag: event.etag.unwrap_or_default(),
    })
}

fn parse_graph_time(time: Option<GraphDateTime>, field: &str) -> Result<DateTime<Utc>> {
    let time = time.ok_or_else(|| {
        SyncEngineError::InvalidInput(format!("graph event missing {field} time"))
    })?;
    parse_rfc3339(PROVIDER, field, &normalise_graph_time(&time))
}

/// Graph omits the UTC suffix when the `Prefer` header pins the timezone;
/// restore it so the value parses as RFC 3339.
fn normalise_graph_time(time: &GraphDateTime) -> String {
    let value = time.date_time.trim();
    let has_offset = value.ends_with('Z')
        || value
            .rfind('T')
            .is_some_and(|idx| value[idx + 1..].chars().any(|c| matches!(c, '+' | '-')));
    if has_offset {
        value.to_string()
    } else {
        format!("{value}Z")
    }
}

#[derive(Debug, Deserialize)]
struct GraphEventsResponse {
    #[serde(default)]
    value: Vec<GraphEvent>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphEvent {
    id: String,
    #[serde(rename = "@odata.etag")]
    etag: Option<String>,
    subject: Option<String>,
    #[serde(rename = "bodyPreview")]
    body_preview: Option<String>,
    location: Option<GraphLocation>,
    start: Option<GraphDateTime>,
    end: Option<GraphDateTime>,
    #[serde(rename = "isAllDay", default)]
    is_all_day: bool,
    #[serde(rename = "lastModifiedDateTime")]
    last_modified: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphDateTime {
    #[serde(rename = "dateTime")]
    date_time: String,
    #[serde(rename = "timeZone")]
    #[allow(dead_code)]
    time_zone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphLocation {
    #[serde(rename = "displayName")]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphCalendarsResponse {
    #[serde(default)]
    value: Vec<GraphCalendar>,
}

#[derive(Debug, Deserialize)]
struct GraphCalendar {
    id: String,
    name: Option<String>,
    #[serde(rename = "isDefaultCalendar", default)]
    is_default: bool,
}
