//! Calendar REST collaborator (Google Calendar v3 wire shape).
//!
//! Instants cross this boundary as RFC3339 UTC with the `Z` marker. A 401
//! from the API means the stored credentials no longer refresh; everything
//! else non-success is an upstream diagnostic. No retries: the read queries
//! are safe for the model to re-ask, and event creation must never be
//! silently repeated.

use chrono::{DateTime, NaiveDate, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{CalvoxError, Result};
use crate::timeutil;

use super::{CalendarCredentials, CalendarService, EventData, EventTime, NewEvent, TimeInterval};

pub struct GoogleCalendar {
    http: reqwest::Client,
    base: String,
}

impl GoogleCalendar {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.into(),
        }
    }

    fn events_url(&self) -> String {
        format!("{}/calendars/primary/events", self.base)
    }
}

#[async_trait::async_trait]
impl CalendarService for GoogleCalendar {
    async fn list_events(
        &self,
        creds: &CalendarCredentials,
        interval: &TimeInterval,
    ) -> Result<Vec<EventData>> {
        let response = self
            .http
            .get(self.events_url())
            .bearer_auth(&creds.access_token)
            .query(&[
                ("timeMin", timeutil::to_api_instant(interval.start())),
                ("timeMax", timeutil::to_api_instant(interval.end())),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
            ])
            .send()
            .await
            .map_err(|e| CalvoxError::Upstream(format!("calendar request failed: {e}")))?;

        let body = check_status(response).await?;
        let events = parse_event_list(&body)?;
        debug!(count = events.len(), "calendar list query");
        Ok(events)
    }

    async fn insert_event(
        &self,
        creds: &CalendarCredentials,
        event: &NewEvent,
    ) -> Result<EventData> {
        let mut body = json!({
            "summary": event.summary,
            "start": {
                "dateTime": timeutil::to_api_instant(event.start),
                "timeZone": "UTC",
            },
            "end": {
                "dateTime": timeutil::to_api_instant(event.end),
                "timeZone": "UTC",
            },
        });
        if let Some(description) = &event.description {
            body["description"] = json!(description);
        }

        let response = self
            .http
            .post(self.events_url())
            .bearer_auth(&creds.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| CalvoxError::Upstream(format!("calendar request failed: {e}")))?;

        let body = check_status(response).await?;
        parse_created_event(&body)
    }
}

async fn check_status(response: reqwest::Response) -> Result<String> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| CalvoxError::Upstream(format!("calendar response unreadable: {e}")))?;

    if status == StatusCode::UNAUTHORIZED {
        return Err(CalvoxError::CredentialsExpired);
    }
    if !status.is_success() {
        let snippet: String = body.chars().take(200).collect();
        return Err(CalvoxError::Upstream(format!(
            "calendar API returned {status}: {snippet}"
        )));
    }
    Ok(body)
}

#[derive(Deserialize)]
struct WireEventList {
    #[serde(default)]
    items: Vec<WireEvent>,
}

#[derive(Deserialize)]
struct WireEvent {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    start: Option<WireEventTime>,
    end: Option<WireEventTime>,
}

#[derive(Deserialize)]
struct WireEventTime {
    #[serde(rename = "dateTime")]
    date_time: Option<String>,
    date: Option<String>,
}

impl WireEventTime {
    fn parse(self) -> Result<EventTime> {
        if let Some(dt) = self.date_time {
            let parsed: DateTime<Utc> = DateTime::parse_from_rfc3339(&dt)
                .map_err(|e| CalvoxError::Upstream(format!("bad event timestamp '{dt}': {e}")))?
                .with_timezone(&Utc);
            return Ok(EventTime::At(parsed));
        }
        if let Some(d) = self.date {
            let parsed = NaiveDate::parse_from_str(&d, "%Y-%m-%d")
                .map_err(|e| CalvoxError::Upstream(format!("bad event date '{d}': {e}")))?;
            return Ok(EventTime::AllDay(parsed));
        }
        Err(CalvoxError::Upstream("event without a timestamp".into()))
    }
}

impl WireEvent {
    fn parse(self) -> Result<EventData> {
        let start = self
            .start
            .ok_or_else(|| CalvoxError::Upstream("event without a start".into()))?
            .parse()?;
        let end = self
            .end
            .ok_or_else(|| CalvoxError::Upstream("event without an end".into()))?
            .parse()?;
        Ok(EventData {
            summary: self.summary.unwrap_or_else(|| "Unnamed event".into()),
            start,
            end,
        })
    }
}

fn parse_event_list(body: &str) -> Result<Vec<EventData>> {
    let list: WireEventList = serde_json::from_str(body)?;
    list.items.into_iter().map(WireEvent::parse).collect()
}

fn parse_created_event(body: &str) -> Result<EventData> {
    let event: WireEvent = serde_json::from_str(body)?;
    if event.id.is_none() {
        return Err(CalvoxError::Upstream(
            "event creation returned no event id".into(),
        ));
    }
    event.parse()
}
