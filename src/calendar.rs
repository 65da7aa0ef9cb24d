/// Calendar primitives shared by availability, sessions and seminars
///
/// Times of day are zero-padded `HH:MM` strings on the wire; calendar dates are
/// `YYYY-MM-DD` taken in the institution's fixed offset.
use crate::error::{PortalError, PortalResult};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

const MINUTES_PER_DAY: u16 = 24 * 60;

const DAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// Time of day with minute resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime {
    minutes: u16,
}

impl ClockTime {
    /// Parse a strict `HH:MM` string
    pub fn parse(field: &str, value: &str) -> PortalResult<Self> {
        let bytes = value.as_bytes();
        let well_formed = bytes.len() == 5
            && bytes[2] == b':'
            && bytes[..2].iter().all(u8::is_ascii_digit)
            && bytes[3..].iter().all(u8::is_ascii_digit);
        if !well_formed {
            return Err(PortalError::Validation(format!(
                "{} must use HH:MM format, got '{}'",
                field, value
            )));
        }

        let hour: u16 = value[..2].parse().unwrap_or(99);
        let minute: u16 = value[3..].parse().unwrap_or(99);
        if hour > 23 || minute > 59 {
            return Err(PortalError::Validation(format!(
                "{} is not a valid time of day: '{}'",
                field, value
            )));
        }

        Ok(Self {
            minutes: hour * 60 + minute,
        })
    }

    pub fn from_minutes(minutes: u16) -> Option<Self> {
        (minutes < MINUTES_PER_DAY).then_some(Self { minutes })
    }

    pub fn minutes(&self) -> u16 {
        self.minutes
    }

    /// Add a duration; `None` when the result would pass midnight
    pub fn checked_add_minutes(&self, duration: u32) -> Option<Self> {
        let total = u32::from(self.minutes) + duration;
        u16::try_from(total).ok().and_then(Self::from_minutes)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.minutes / 60, self.minutes % 60)
    }
}

impl Serialize for ClockTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClockTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ClockTime::parse("time", &raw).map_err(serde::de::Error::custom)
    }
}

/// Half-open `[start, end)` interval within one day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub start_time: ClockTime,
    pub end_time: ClockTime,
}

impl TimeRange {
    pub fn new(start_time: ClockTime, end_time: ClockTime) -> PortalResult<Self> {
        if start_time >= end_time {
            return Err(PortalError::Validation(
                "Start time must be before end time".to_string(),
            ));
        }
        Ok(Self {
            start_time,
            end_time,
        })
    }

    /// Parse both ends from `HH:MM` strings
    pub fn parse(start: &str, end: &str) -> PortalResult<Self> {
        let start_time = ClockTime::parse("Start time", start)?;
        let end_time = ClockTime::parse("End time", end)?;
        Self::new(start_time, end_time)
    }

    /// Build from a start and a duration in minutes
    pub fn starting_at(start_time: ClockTime, duration_minutes: u32) -> PortalResult<Self> {
        if duration_minutes == 0 {
            return Err(PortalError::Validation(
                "Duration must be positive".to_string(),
            ));
        }
        let end_time = start_time.checked_add_minutes(duration_minutes).ok_or_else(|| {
            PortalError::Validation("Session must end before midnight".to_string())
        })?;
        Self::new(start_time, end_time)
    }

    /// Standard half-open overlap test
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start_time < other.end_time && self.end_time > other.start_time
    }

    /// Whether `other` lies entirely inside this range
    pub fn contains(&self, other: &TimeRange) -> bool {
        self.start_time <= other.start_time && other.end_time <= self.end_time
    }

    pub fn duration_minutes(&self) -> u32 {
        u32::from(self.end_time.minutes() - self.start_time.minutes())
    }
}

/// Parse a calendar date.
///
/// Accepts `YYYY-MM-DD`, or an RFC 3339 timestamp which is first converted to
/// the institution offset so that e.g. `2025-06-30T23:30:00Z` lands on the
/// local day rather than on whatever zone the client happened to use.
pub fn parse_date(value: &str, tz: &FixedOffset) -> PortalResult<NaiveDate> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Ok(timestamp.with_timezone(tz).date_naive());
    }
    Err(PortalError::Validation(format!(
        "Date must use YYYY-MM-DD format, got '{}'",
        value
    )))
}

/// Storage form of a calendar date
pub fn format_date(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Day of week with Sunday = 0
pub fn day_of_week(date: &NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

pub fn day_name(day: u8) -> Option<&'static str> {
    DAY_NAMES.get(usize::from(day)).copied()
}

/// Current date and time of day in the institution zone
pub fn local_now(tz: &FixedOffset) -> (NaiveDate, ClockTime) {
    let now = Utc::now().with_timezone(tz);
    let minutes = now.time().format("%H:%M").to_string();
    let time = ClockTime::parse("now", &minutes).unwrap_or(ClockTime { minutes: 0 });
    (now.date_naive(), time)
}
