//! Calendar domain: data model, collaborator traits and the tool engine.
//!
//! The engine (`CalendarToolEngine`) owns the domain algorithms (free/busy
//! checks, gap-finding, event creation) and talks to two collaborators it
//! does not own: a [`CredentialStore`] that resolves a user's stored calendar
//! credentials, and a [`CalendarService`] that fronts the remote calendar
//! API. Both are traits so tests can swap in fakes.

mod engine;
mod google;

pub use engine::CalendarToolEngine;
pub use google::GoogleCalendar;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CalvoxError, Result};
use crate::timeutil;

/// A validated closed-open time interval `[start, end)`, `end > start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeInterval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeInterval {
    /// Build an interval, rejecting `end <= start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end <= start {
            return Err(CalvoxError::InvalidInterval);
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }
}

/// An event boundary as the calendar reports it: a timed instant, or a bare
/// date for all-day events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTime {
    At(DateTime<Utc>),
    AllDay(NaiveDate),
}

impl EventTime {
    /// The boundary as an absolute instant (all-day boundaries resolve to
    /// midnight UTC, which is how the calendar API orders them).
    pub fn instant(&self) -> DateTime<Utc> {
        match self {
            EventTime::At(t) => *t,
            EventTime::AllDay(d) => d
                .and_hms_opt(0, 0, 0)
                .unwrap()
                .and_utc(),
        }
    }

    /// Speakable rendering in the user's display offset.
    pub fn speakable(&self, offset: chrono::FixedOffset) -> String {
        match self {
            EventTime::At(t) => timeutil::speakable_datetime(*t, offset),
            EventTime::AllDay(d) => timeutil::speakable_date(*d),
        }
    }
}

/// One event as returned by the calendar collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventData {
    pub summary: String,
    pub start: EventTime,
    pub end: EventTime,
}

/// An event to be inserted, already converted to UTC.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub summary: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Stored OAuth material for a user's calendar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarCredentials {
    pub access_token: String,
    pub refresh_token: String,
}

/// Remote calendar API collaborator. Instants cross this boundary in UTC.
#[async_trait]
pub trait CalendarService: Send + Sync {
    /// Events overlapping `interval`, in the calendar's chronological order.
    async fn list_events(
        &self,
        creds: &CalendarCredentials,
        interval: &TimeInterval,
    ) -> Result<Vec<EventData>>;

    /// Insert a new event into the user's primary calendar.
    async fn insert_event(
        &self,
        creds: &CalendarCredentials,
        event: &NewEvent,
    ) -> Result<EventData>;
}

/// Calendar credential store collaborator.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Resolve a user's stored credentials, or `CredentialsNotFound`.
    async fn calendar_credentials(&self, user_id: &str) -> Result<CalendarCredentials>;
}

/// File-backed credential store: one JSON document per user under the data
/// directory. Credential issuance is the login flow's concern; this store
/// only reads what that flow wrote.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    fn user_file(&self, user_id: &str) -> PathBuf {
        let sanitized =
            user_id.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.path.join(format!("{sanitized}.json"))
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn calendar_credentials(&self, user_id: &str) -> Result<CalendarCredentials> {
        let file = self.user_file(user_id);
        if !file.exists() {
            return Err(CalvoxError::CredentialsNotFound(user_id.to_string()));
        }
        let content = tokio::fs::read_to_string(&file).await?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_interval_rejects_reversed_bounds() {
        let a = Utc.with_ymd_and_hms(2026, 1, 30, 10, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 1, 30, 11, 0, 0).unwrap();
        assert!(TimeInterval::new(a, b).is_ok());
        assert!(matches!(
            TimeInterval::new(b, a),
            Err(CalvoxError::InvalidInterval)
        ));
        assert!(matches!(
            TimeInterval::new(a, a),
            Err(CalvoxError::InvalidInterval)
        ));
    }

    #[test]
    fn test_all_day_boundary_resolves_to_midnight_utc() {
        let t = EventTime::AllDay(NaiveDate::from_ymd_opt(2026, 1, 30).unwrap());
        assert_eq!(
            t.instant(),
            Utc.with_ymd_and_hms(2026, 1, 30, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_file_credential_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path().to_path_buf()).unwrap();

        let creds = CalendarCredentials {
            access_token: "at-123".into(),
            refresh_token: "rt-456".into(),
        };
        std::fs::write(
            dir.path().join("alice.json"),
            serde_json::to_string(&creds).unwrap(),
        )
        .unwrap();

        let loaded = store.calendar_credentials("alice").await.unwrap();
        assert_eq!(loaded.access_token, "at-123");
        assert_eq!(loaded.refresh_token, "rt-456");
    }

    #[tokio::test]
    async fn test_file_credential_store_missing_user() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path().to_path_buf()).unwrap();
        let err = store.calendar_credentials("nobody").await.unwrap_err();
        assert!(matches!(err, CalvoxError::CredentialsNotFound(_)));
    }

    #[tokio::test]
    async fn test_file_credential_store_sanitizes_user_ids() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path().to_path_buf()).unwrap();
        // A user id with path separators must not escape the store directory.
        let err = store.calendar_credentials("../../etc/passwd").await.unwrap_err();
        assert!(matches!(err, CalvoxError::CredentialsNotFound(_)));
    }
}
