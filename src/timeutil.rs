//! Timestamp parsing, formatting and offset conversion.
//!
//! Every tool that accepts a start/end time runs through the same rule: a
//! timestamp with no offset is wall-clock time in the *user's* offset, not
//! UTC. `localize` is that rule; applying it anywhere else differently would
//! put created events at the wrong wall-clock time for the user.

use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Timelike,
    Utc,
};
use tracing::warn;

use crate::error::{CalvoxError, Result};

/// Parse a timezone offset string ("+05:30", "-05:00") into a fixed offset.
///
/// Absent, empty or literal "UTC" input means UTC. Malformed input also
/// degrades to UTC with a warning rather than failing; a bad offset header
/// must never take down a turn.
pub fn parse_offset(offset_str: Option<&str>) -> FixedOffset {
    let s = match offset_str {
        None => return utc_offset(),
        Some(s) if s.is_empty() || s == "UTC" => return utc_offset(),
        Some(s) => s,
    };

    match try_parse_offset(s) {
        Some(offset) => offset,
        None => {
            warn!(offset = %s, "invalid timezone offset, falling back to UTC");
            utc_offset()
        }
    }
}

fn utc_offset() -> FixedOffset {
    FixedOffset::east_opt(0).unwrap()
}

fn try_parse_offset(s: &str) -> Option<FixedOffset> {
    let (sign, rest) = match s.split_at_checked(1)? {
        ("+", rest) => (1i32, rest),
        ("-", rest) => (-1i32, rest),
        _ => return None,
    };

    let mut parts = rest.split(':');
    let hours: i32 = parts.next()?.parse().ok()?;
    let minutes: i32 = match parts.next() {
        Some(m) => m.parse().ok()?,
        None => 0,
    };
    if !(0..=23).contains(&hours) || !(0..=59).contains(&minutes) {
        return None;
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Format an instant for the calendar API: RFC3339 UTC with a literal `Z`
/// marker. The downstream API rejects the equivalent `+00:00` spelling.
pub fn to_api_instant(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Interpret a naive timestamp as wall-clock time in `offset` and convert to
/// UTC.
pub fn localize(naive: NaiveDateTime, offset: FixedOffset) -> DateTime<Utc> {
    // Fixed offsets have no DST folds, so the local interpretation is unique.
    match naive.and_local_timezone(offset).single() {
        Some(dt) => dt.with_timezone(&Utc),
        None => Utc.from_utc_datetime(&naive),
    }
}

/// Parse a timestamp as the model supplies it: `YYYY-MM-DDTHH:MM:SS`, the
/// same without seconds, or a bare `YYYY-MM-DD` (midnight).
pub fn parse_model_timestamp(s: &str) -> Result<NaiveDateTime> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M") {
        return Ok(dt);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(d.and_hms_opt(0, 0, 0).unwrap());
    }
    Err(CalvoxError::Tool(format!(
        "invalid timestamp '{s}' (expected YYYY-MM-DDTHH:MM:SS or YYYY-MM-DD)"
    )))
}

/// Current date/time context in UTC, shared by the system prompt and the
/// `get_current_time` tool so the two can never disagree.
#[derive(Debug, Clone)]
pub struct NowInfo {
    pub date: String,
    pub time: String,
    pub full: String,
    pub iso: String,
    pub weekday: String,
    pub year: String,
    pub month: String,
    pub day: u32,
}

impl NowInfo {
    pub fn capture() -> Self {
        Self::at(Utc::now())
    }

    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            date: now.format("%Y-%m-%d").to_string(),
            time: now.format("%H:%M:%S UTC").to_string(),
            full: format!(
                "{}, {} at {} UTC",
                now.format("%A"),
                speakable_date(now.date_naive()),
                speakable_time(now.hour(), now.minute())
            ),
            iso: to_api_instant(now),
            weekday: now.format("%A").to_string(),
            year: now.year().to_string(),
            month: now.format("%B").to_string(),
            day: now.day(),
        }
    }
}

/// 12-hour wall-clock rendering with the leading zero stripped ("3:05 PM").
/// Responses are read aloud, so raw machine timestamps never reach the user.
pub fn speakable_time(hour: u32, minute: u32) -> String {
    let (h12, meridiem) = match hour {
        0 => (12, "AM"),
        1..=11 => (hour, "AM"),
        12 => (12, "PM"),
        _ => (hour - 12, "PM"),
    };
    format!("{h12}:{minute:02} {meridiem}")
}

/// "January 30, 2026"
pub fn speakable_date(date: NaiveDate) -> String {
    format!("{} {}, {}", date.format("%B"), date.day(), date.year())
}

/// "January 30 at 2:30 PM" for a wall-clock timestamp that is already in
/// the user's offset.
pub fn speakable_naive(naive: NaiveDateTime) -> String {
    format!(
        "{} {} at {}",
        naive.format("%B"),
        naive.day(),
        speakable_time(naive.hour(), naive.minute())
    )
}

/// "January 30 at 2:30 PM" in the given display offset.
pub fn speakable_datetime(t: DateTime<Utc>, offset: FixedOffset) -> String {
    let local = t.with_timezone(&offset);
    format!(
        "{} {} at {}",
        local.format("%B"),
        local.day(),
        speakable_time(local.hour(), local.minute())
    )
}
