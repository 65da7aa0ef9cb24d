/// Session ledger
///
/// Source of truth for therapy sessions and the only place the no-double-booking
/// rule is enforced: for one psychologist and one date, no two `scheduled`
/// sessions may overlap.

mod ledger;
mod locks;

pub use ledger::SessionLedger;
pub use locks::BookingLocks;

use crate::{
    calendar::{ClockTime, TimeRange},
    error::{PortalError, PortalResult},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Session status; any status may be set from any other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    Scheduled,
    Completed,
    Cancelled,
    NoShow,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 4] = [
        SessionStatus::Scheduled,
        SessionStatus::Completed,
        SessionStatus::Cancelled,
        SessionStatus::NoShow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::NoShow => "no-show",
        }
    }

    pub fn from_str(s: &str) -> PortalResult<Self> {
        match s {
            "scheduled" => Ok(SessionStatus::Scheduled),
            "completed" => Ok(SessionStatus::Completed),
            "cancelled" => Ok(SessionStatus::Cancelled),
            "no-show" => Ok(SessionStatus::NoShow),
            _ => Err(PortalError::Validation(format!(
                "Invalid status '{}'; expected one of scheduled, completed, cancelled, no-show",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    Individual,
    Group,
    Emergency,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Individual => "individual",
            SessionType::Group => "group",
            SessionType::Emergency => "emergency",
        }
    }

    pub fn from_str(s: &str) -> PortalResult<Self> {
        match s {
            "individual" => Ok(SessionType::Individual),
            "group" => Ok(SessionType::Group),
            "emergency" => Ok(SessionType::Emergency),
            _ => Err(PortalError::Validation(format!(
                "Invalid session type '{}'; expected one of individual, group, emergency",
                s
            ))),
        }
    }
}

/// Student feedback on a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
    pub rating: u8,
    #[serde(default)]
    #[validate(length(max = 2000, message = "Comments must be at most 2000 characters"))]
    pub comments: Option<String>,
}

/// A therapy session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    /// Account id of the psychologist
    pub psychologist_id: String,
    /// Account id of the student
    pub student_id: String,
    pub date: NaiveDate,
    pub start_time: ClockTime,
    pub end_time: ClockTime,
    pub duration_minutes: u32,
    #[serde(rename = "type")]
    pub session_type: SessionType,
    pub status: SessionStatus,
    pub notes: Option<String>,
    pub feedback: Option<Feedback>,
    pub cancellation_reason: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn range(&self) -> TimeRange {
        TimeRange {
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

/// How much a booking is checked beyond the overlap rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingPolicy {
    /// Student self-booking: the interval must sit inside a published free slot
    EnforceAvailability,
    /// Psychologist or admin booking: only the overlap rule applies
    OverlapOnly,
}

impl BookingPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingPolicy::EnforceAvailability => "enforce_availability",
            BookingPolicy::OverlapOnly => "overlap_only",
        }
    }
}

/// Booking request.
///
/// Either `startTime` (with `endTime` or `duration`) or the older
/// `time` + `duration` pair is accepted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    #[serde(default)]
    pub student_id: Option<String>,
    #[serde(default)]
    pub psychologist_id: Option<String>,
    pub date: String,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default, rename = "type")]
    pub session_type: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl SessionRequest {
    /// Resolve the requested interval
    pub fn interval(&self, default_minutes: u32) -> PortalResult<TimeRange> {
        let start = self
            .start_time
            .as_deref()
            .or(self.time.as_deref())
            .ok_or_else(|| PortalError::Validation("startTime is required".to_string()))?;
        let start = ClockTime::parse("Start time", start)?;

        match (&self.end_time, self.duration) {
            (Some(end), _) => TimeRange::new(start, ClockTime::parse("End time", end)?),
            (None, Some(duration)) => TimeRange::starting_at(start, duration),
            (None, None) => TimeRange::starting_at(start, default_minutes),
        }
    }

    pub fn kind(&self) -> PortalResult<SessionType> {
        self.session_type
            .as_deref()
            .map(SessionType::from_str)
            .unwrap_or(Ok(SessionType::Individual))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleRequest {
    pub date: String,
    #[serde(alias = "startTime")]
    pub time: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NotesUpdate {
    #[validate(length(max = 10000, message = "Notes must be at most 10000 characters"))]
    pub notes: String,
}

/// Which half of a participant's sessions to list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionView {
    /// Scheduled and not yet over
    Upcoming,
    /// Everything else
    Past,
}
