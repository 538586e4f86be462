use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime, UtcOffset};

use crate::models::TimeGrain;

const NANOS_PER_MILLI: i128 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarDateError {
    /// Input does not have the literal `YYYY-MM-DD` shape.
    Shape,
    /// Shape is right but the day does not exist (e.g. `2021-02-30`).
    OutOfRange,
}

impl CalendarDateError {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Shape => "expected literal YYYY-MM-DD",
            Self::OutOfRange => "date does not exist in the calendar",
        }
    }
}

fn calendar_date_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$").unwrap_or_else(|error| {
            panic!("calendar date regex must compile: {error}");
        })
    })
}

/// Parses a strict `YYYY-MM-DD` literal. No time component, no offset,
/// no surrounding whitespace.
pub fn parse_calendar_date(raw: &str) -> Result<Date, CalendarDateError> {
    if !calendar_date_regex().is_match(raw) {
        return Err(CalendarDateError::Shape);
    }

    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .map_err(|_| CalendarDateError::OutOfRange)
}

#[must_use]
pub fn format_calendar_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// First calendar day of the bucket containing `date`.
///
/// Weeks start on Monday (ISO 8601). Dates are UTC calendar dates; callers
/// convert instants to UTC before bucketing.
#[must_use]
pub fn bucket_start(date: Date, grain: TimeGrain) -> Date {
    match grain {
        TimeGrain::Day => date,
        TimeGrain::Week => {
            let offset = date.weekday().number_days_from_monday();
            date.saturating_sub(Duration::days(i64::from(offset)))
        }
        TimeGrain::Month => date.saturating_sub(Duration::days(i64::from(date.day()) - 1)),
    }
}

#[must_use]
pub fn unix_timestamp_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

#[must_use]
pub fn format_unix_ms(timestamp_unix_ms: u64) -> String {
    let nanos = i128::from(timestamp_unix_ms)
        .checked_mul(NANOS_PER_MILLI)
        .unwrap_or(i128::MAX);
    let dt = OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
        .to_offset(UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        dt.year(),
        u8::from(dt.month()),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        dt.millisecond()
    )
}
