//! The four calendar operations behind the tool boundary.
//!
//! Each operation resolves the user's stored credentials, calls the remote
//! calendar collaborator, and renders a speakable text result. Naive
//! timestamps are wall-clock time in the user's offset everywhere
//! (`timeutil::localize`); instants cross the service boundary in UTC.

use std::sync::Arc;

use chrono::{Duration, FixedOffset, NaiveDateTime, NaiveTime, Timelike, Utc};
use tracing::{debug, warn};

use crate::error::Result;
use crate::timeutil;

use super::{CalendarService, CredentialStore, NewEvent, TimeInterval};

/// Business-window bounds applied when a slot query carries only dates.
const BUSINESS_DAY_START: (u32, u32) = (9, 0);
const BUSINESS_DAY_END: (u32, u32) = (17, 0);

/// Calendar domain operations shared by both loop types.
pub struct CalendarToolEngine {
    credentials: Arc<dyn CredentialStore>,
    service: Arc<dyn CalendarService>,
}

impl CalendarToolEngine {
    pub fn new(credentials: Arc<dyn CredentialStore>, service: Arc<dyn CalendarService>) -> Self {
        Self {
            credentials,
            service,
        }
    }

    /// List events overlapping `[start, end)` and report either a distinct
    /// "free" outcome or the conflicts in the calendar's own order.
    pub async fn check_availability(
        &self,
        user_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
        offset: FixedOffset,
    ) -> Result<String> {
        let interval = TimeInterval::new(
            timeutil::localize(start, offset),
            timeutil::localize(end, offset),
        )?;
        let creds = self.credentials.calendar_credentials(user_id).await?;
        let events = self.service.list_events(&creds, &interval).await?;
        debug!(user_id, count = events.len(), "availability query");

        if events.is_empty() {
            return Ok(format!(
                "You are free from {} to {}.",
                timeutil::speakable_naive(start),
                timeutil::speakable_naive(end)
            ));
        }

        let mut lines = Vec::with_capacity(events.len());
        for event in &events {
            lines.push(format!(
                "  • {} ({} → {})",
                event.summary,
                event.start.speakable(offset),
                event.end.speakable(offset)
            ));
        }
        Ok(format!(
            "You have {} conflicting event(s) during this time:\n{}",
            events.len(),
            lines.join("\n")
        ))
    }

    /// Find free slots of at least `duration_minutes` between `start` and
    /// `end`. Date-only bounds widen to the 09:00–17:00 business window.
    ///
    /// One cursor scans the events in chronological order; each gap wide
    /// enough yields exactly one duration-sized slot at the gap's start.
    /// Gaps are never tiled with every slot that would fit.
    pub async fn find_available_slots(
        &self,
        user_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
        duration_minutes: i64,
        offset: FixedOffset,
    ) -> Result<String> {
        let midnight = NaiveTime::from_hms_opt(0, 0, 0).unwrap();
        let start = if start.time() == midnight {
            start
                .date()
                .and_hms_opt(BUSINESS_DAY_START.0, BUSINESS_DAY_START.1, 0)
                .unwrap()
        } else {
            start
        };
        let end = if end.time() == midnight {
            end.date()
                .and_hms_opt(BUSINESS_DAY_END.0, BUSINESS_DAY_END.1, 0)
                .unwrap()
        } else {
            end
        };

        let interval = TimeInterval::new(
            timeutil::localize(start, offset),
            timeutil::localize(end, offset),
        )?;
        let creds = self.credentials.calendar_credentials(user_id).await?;
        let events = self.service.list_events(&creds, &interval).await?;

        let duration = Duration::minutes(duration_minutes);
        let mut slots = Vec::new();
        let mut cursor = interval.start();

        for event in &events {
            if event.start.instant() - cursor >= duration {
                slots.push((cursor, cursor + duration));
            }
            cursor = cursor.max(event.end.instant());
        }
        if interval.end() - cursor >= duration {
            slots.push((cursor, cursor + duration));
        }

        if slots.is_empty() {
            return Ok(format!(
                "No available {duration_minutes}-minute slots found between {} and {}.",
                timeutil::speakable_naive(start),
                timeutil::speakable_naive(end)
            ));
        }

        let lines: Vec<String> = slots
            .iter()
            .map(|(s, e)| {
                format!(
                    "  • {} → {}",
                    timeutil::speakable_datetime(*s, offset),
                    timeutil::speakable_datetime(*e, offset)
                )
            })
            .collect();
        Ok(format!(
            "Available {duration_minutes}-minute slots:\n{}",
            lines.join("\n")
        ))
    }

    /// Create an event. `start` and `end` are the user's wall clock; they
    /// are localized with the user's offset and submitted in UTC. A start in
    /// the past is allowed (the assistant does not silently refuse user
    /// intent) but logged as a warning.
    pub async fn create_event(
        &self,
        user_id: &str,
        title: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
        description: Option<&str>,
        offset: FixedOffset,
    ) -> Result<String> {
        let interval = TimeInterval::new(
            timeutil::localize(start, offset),
            timeutil::localize(end, offset),
        )?;

        if interval.start() < Utc::now() {
            warn!(
                user_id,
                start = %interval.start(),
                "event start time is in the past; creating anyway"
            );
        }

        let creds = self.credentials.calendar_credentials(user_id).await?;
        let event = NewEvent {
            summary: title.to_string(),
            description: description
                .filter(|d| !d.is_empty())
                .map(|d| d.to_string()),
            start: interval.start(),
            end: interval.end(),
        };
        let created = self.service.insert_event(&creds, &event).await?;
        debug!(user_id, summary = %created.summary, "event created");

        // Confirm with the wall-clock time the user asked for, re-rendered in
        // 12-hour form. The response is read aloud; the UTC instant is not.
        Ok(format!(
            "I've scheduled {} for {} from {} to {}.",
            title,
            timeutil::speakable_date(start.date()),
            timeutil::speakable_time(start.time().hour(), start.time().minute()),
            timeutil::speakable_time(end.time().hour(), end.time().minute()),
        ))
    }

    /// Events in `[now, now + horizon_hours]`, rendered in the user's offset.
    pub async fn upcoming_events(
        &self,
        user_id: &str,
        horizon_hours: i64,
        offset: FixedOffset,
    ) -> Result<String> {
        let now = Utc::now();
        let interval = TimeInterval::new(now, now + Duration::hours(horizon_hours.max(1)))?;
        let creds = self.credentials.calendar_credentials(user_id).await?;
        let events = self.service.list_events(&creds, &interval).await?;

        if events.is_empty() {
            return Ok(format!(
                "No upcoming events in the next {horizon_hours} hours."
            ));
        }

        let lines: Vec<String> = events
            .iter()
            .map(|e| format!("{} on {}", e.summary, e.start.speakable(offset)))
            .collect();
        Ok(format!("Upcoming events:\n{}", lines.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{
        CalendarCredentials, EventData, EventTime,
    };
    use crate::error::CalvoxError;
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use std::sync::Mutex;

    struct FakeCredentials {
        missing: bool,
    }

    #[async_trait]
    impl CredentialStore for FakeCredentials {
        async fn calendar_credentials(&self, user_id: &str) -> Result<CalendarCredentials> {
            if self.missing {
                return Err(CalvoxError::CredentialsNotFound(user_id.to_string()));
            }
            Ok(CalendarCredentials {
                access_token: "at".into(),
                refresh_token: "rt".into(),
            })
        }
    }

    struct FakeCalendar {
        events: Vec<EventData>,
        inserted: Mutex<Vec<NewEvent>>,
        fail_with_expired: bool,
    }

    impl FakeCalendar {
        fn with_events(events: Vec<EventData>) -> Self {
            Self {
                events,
                inserted: Mutex::new(Vec::new()),
                fail_with_expired: false,
            }
        }

        fn empty() -> Self {
            Self::with_events(Vec::new())
        }
    }

    #[async_trait]
    impl CalendarService for FakeCalendar {
        async fn list_events(
            &self,
            _creds: &CalendarCredentials,
            _interval: &TimeInterval,
        ) -> Result<Vec<EventData>> {
            if self.fail_with_expired {
                return Err(CalvoxError::CredentialsExpired);
            }
            Ok(self.events.clone())
        }

        async fn insert_event(
            &self,
            _creds: &CalendarCredentials,
            event: &NewEvent,
        ) -> Result<EventData> {
            self.inserted.lock().unwrap().push(event.clone());
            Ok(EventData {
                summary: event.summary.clone(),
                start: EventTime::At(event.start),
                end: EventTime::At(event.end),
            })
        }
    }

    fn engine(service: FakeCalendar) -> (CalendarToolEngine, Arc<FakeCalendar>) {
        let service = Arc::new(service);
        let engine = CalendarToolEngine::new(
            Arc::new(FakeCredentials { missing: false }),
            Arc::clone(&service) as Arc<dyn CalendarService>,
        );
        (engine, service)
    }

    fn naive(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    fn utc_event(summary: &str, start: NaiveDateTime, end: NaiveDateTime) -> EventData {
        EventData {
            summary: summary.into(),
            start: EventTime::At(start.and_utc()),
            end: EventTime::At(end.and_utc()),
        }
    }

    #[tokio::test]
    async fn test_check_availability_free_outcome() {
        let (engine, _) = engine(FakeCalendar::empty());
        let result = engine
            .check_availability(
                "alice",
                naive(2026, 1, 30, 14, 0),
                naive(2026, 1, 30, 15, 0),
                timeutil::parse_offset(None),
            )
            .await
            .unwrap();
        assert!(result.starts_with("You are free"));
        assert!(result.contains("2:00 PM"));
    }

    #[tokio::test]
    async fn test_check_availability_lists_conflicts_in_order() {
        let (engine, _) = engine(FakeCalendar::with_events(vec![
            utc_event("Standup", naive(2026, 1, 30, 14, 0), naive(2026, 1, 30, 14, 15)),
            utc_event("Review", naive(2026, 1, 30, 14, 30), naive(2026, 1, 30, 15, 0)),
        ]));
        let result = engine
            .check_availability(
                "alice",
                naive(2026, 1, 30, 14, 0),
                naive(2026, 1, 30, 15, 0),
                timeutil::parse_offset(None),
            )
            .await
            .unwrap();
        assert!(result.contains("2 conflicting event(s)"));
        let standup = result.find("Standup").unwrap();
        let review = result.find("Review").unwrap();
        assert!(standup < review);
    }

    #[tokio::test]
    async fn test_free_never_conflated_with_error() {
        // A zero-event answer is "free"; a collaborator failure is an error.
        let (engine, _) = engine(FakeCalendar::empty());
        let free = engine
            .check_availability(
                "alice",
                naive(2026, 1, 30, 14, 0),
                naive(2026, 1, 30, 15, 0),
                timeutil::parse_offset(None),
            )
            .await;
        assert!(free.is_ok());

        let mut failing = FakeCalendar::empty();
        failing.fail_with_expired = true;
        let (engine, _) = engine_from(failing);
        let err = engine
            .check_availability(
                "alice",
                naive(2026, 1, 30, 14, 0),
                naive(2026, 1, 30, 15, 0),
                timeutil::parse_offset(None),
            )
            .await;
        assert!(matches!(err, Err(CalvoxError::CredentialsExpired)));
    }

    fn engine_from(service: FakeCalendar) -> (CalendarToolEngine, Arc<FakeCalendar>) {
        engine(service)
    }

    #[tokio::test]
    async fn test_find_slots_one_per_gap() {
        // 09:00–17:00 window, one 30-minute busy block at 10:00. Exactly two
        // slots come back: the first gap's opening half hour and the half
        // hour right after the event, not a tiling of every fit.
        let (engine, _) = engine(FakeCalendar::with_events(vec![utc_event(
            "Busy",
            naive(2026, 1, 30, 10, 0),
            naive(2026, 1, 30, 10, 30),
        )]));
        let result = engine
            .find_available_slots(
                "alice",
                naive(2026, 1, 30, 9, 0),
                naive(2026, 1, 30, 17, 0),
                30,
                timeutil::parse_offset(None),
            )
            .await
            .unwrap();

        let bullets = result.matches("•").count();
        assert_eq!(bullets, 2, "expected exactly two slots in:\n{result}");
        assert!(result.contains("9:00 AM → January 30 at 9:30 AM"));
        assert!(result.contains("10:30 AM → January 30 at 11:00 AM"));
    }

    #[tokio::test]
    async fn test_find_slots_widens_date_only_bounds() {
        let (engine, _) = engine(FakeCalendar::empty());
        let result = engine
            .find_available_slots(
                "alice",
                naive(2026, 1, 30, 0, 0),
                naive(2026, 1, 30, 0, 0),
                30,
                timeutil::parse_offset(None),
            )
            .await
            .unwrap();
        // Widened to 09:00–17:00; the single gap yields one slot at 9 AM.
        assert_eq!(result.matches("•").count(), 1);
        assert!(result.contains("9:00 AM"));
    }

    #[tokio::test]
    async fn test_find_slots_none_when_window_is_packed() {
        let (engine, _) = engine(FakeCalendar::with_events(vec![utc_event(
            "All morning",
            naive(2026, 1, 30, 9, 0),
            naive(2026, 1, 30, 16, 45),
        )]));
        let result = engine
            .find_available_slots(
                "alice",
                naive(2026, 1, 30, 9, 0),
                naive(2026, 1, 30, 17, 0),
                30,
                timeutil::parse_offset(None),
            )
            .await
            .unwrap();
        assert!(result.starts_with("No available 30-minute slots"));
    }

    #[tokio::test]
    async fn test_find_slots_overlapping_events_never_move_cursor_backwards() {
        let (engine, _) = engine(FakeCalendar::with_events(vec![
            utc_event("Long", naive(2026, 1, 30, 9, 0), naive(2026, 1, 30, 12, 0)),
            utc_event("Nested", naive(2026, 1, 30, 10, 0), naive(2026, 1, 30, 10, 30)),
        ]));
        let result = engine
            .find_available_slots(
                "alice",
                naive(2026, 1, 30, 9, 0),
                naive(2026, 1, 30, 13, 0),
                30,
                timeutil::parse_offset(None),
            )
            .await
            .unwrap();
        // Only the gap after the long event counts.
        assert_eq!(result.matches("•").count(), 1);
        assert!(result.contains("12:00 PM"));
    }

    #[tokio::test]
    async fn test_create_event_converts_to_utc() {
        let (engine, service) = engine(FakeCalendar::empty());
        let offset = timeutil::parse_offset(Some("+05:30"));
        let result = engine
            .create_event(
                "alice",
                "Dentist",
                naive(2030, 1, 30, 12, 0),
                naive(2030, 1, 30, 13, 0),
                None,
                offset,
            )
            .await
            .unwrap();

        let inserted = service.inserted.lock().unwrap();
        assert_eq!(inserted.len(), 1);
        assert_eq!(
            inserted[0].start,
            Utc.with_ymd_and_hms(2030, 1, 30, 6, 30, 0).unwrap()
        );
        assert_eq!(
            inserted[0].end,
            Utc.with_ymd_and_hms(2030, 1, 30, 7, 30, 0).unwrap()
        );

        // Confirmation speaks the requested wall clock, not the UTC instant.
        assert_eq!(
            result,
            "I've scheduled Dentist for January 30, 2030 from 12:00 PM to 1:00 PM."
        );
    }

    #[tokio::test]
    async fn test_create_event_round_trips_wall_clock() {
        let (engine, service) = engine(FakeCalendar::empty());
        let offset = timeutil::parse_offset(Some("-08:00"));
        let start = naive(2030, 6, 1, 9, 15);
        let end = naive(2030, 6, 1, 10, 45);
        engine
            .create_event("alice", "Sync", start, end, None, offset)
            .await
            .unwrap();

        let inserted = service.inserted.lock().unwrap();
        assert_eq!(inserted[0].start.with_timezone(&offset).naive_local(), start);
        assert_eq!(inserted[0].end.with_timezone(&offset).naive_local(), end);
    }

    #[tokio::test]
    async fn test_create_event_rejects_reversed_interval() {
        let (engine, service) = engine(FakeCalendar::empty());
        let err = engine
            .create_event(
                "alice",
                "Backwards",
                naive(2030, 1, 30, 13, 0),
                naive(2030, 1, 30, 12, 0),
                None,
                timeutil::parse_offset(None),
            )
            .await;
        assert!(matches!(err, Err(CalvoxError::InvalidInterval)));
        assert!(service.inserted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_event_in_the_past_is_allowed() {
        let (engine, service) = engine(FakeCalendar::empty());
        let result = engine
            .create_event(
                "alice",
                "Backfill",
                naive(2020, 1, 1, 10, 0),
                naive(2020, 1, 1, 11, 0),
                Some("logged after the fact"),
                timeutil::parse_offset(None),
            )
            .await;
        assert!(result.is_ok());
        assert_eq!(service.inserted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upcoming_events_rendered_in_user_offset() {
        let start = Utc.with_ymd_and_hms(2026, 1, 30, 18, 30, 0).unwrap();
        let (engine, _) = engine(FakeCalendar::with_events(vec![EventData {
            summary: "Flight".into(),
            start: EventTime::At(start),
            end: EventTime::At(start + Duration::hours(2)),
        }]));
        let result = engine
            .upcoming_events("alice", 24, timeutil::parse_offset(Some("-05:00")))
            .await
            .unwrap();
        // 18:30 UTC is 1:30 PM at -05:00.
        assert!(result.contains("Flight on January 30 at 1:30 PM"));
    }

    #[tokio::test]
    async fn test_upcoming_events_empty_horizon_message() {
        let (engine, _) = engine(FakeCalendar::empty());
        let result = engine
            .upcoming_events("alice", 24, timeutil::parse_offset(None))
            .await
            .unwrap();
        assert_eq!(result, "No upcoming events in the next 24 hours.");
    }

    #[tokio::test]
    async fn test_all_day_events_render_as_dates() {
        let day = NaiveDate::from_ymd_opt(2026, 2, 14).unwrap();
        let (engine, _) = engine(FakeCalendar::with_events(vec![EventData {
            summary: "Company holiday".into(),
            start: EventTime::AllDay(day),
            end: EventTime::AllDay(day.succ_opt().unwrap()),
        }]));
        let result = engine
            .upcoming_events("alice", 48, timeutil::parse_offset(Some("+02:00")))
            .await
            .unwrap();
        assert!(result.contains("Company holiday on February 14, 2026"));
    }

    #[tokio::test]
    async fn test_missing_credentials_propagate() {
        let engine = CalendarToolEngine::new(
            Arc::new(FakeCredentials { missing: true }),
            Arc::new(FakeCalendar::empty()),
        );
        let err = engine
            .upcoming_events("ghost", 24, timeutil::parse_offset(None))
            .await;
        assert!(matches!(err, Err(CalvoxError::CredentialsNotFound(_))));
    }
}
