/// Availability model
///
/// A psychologist publishes a weekly recurring schedule plus date-specific
/// exceptions. Bookable slots for a date are derived from whichever of the two
/// applies, minus anything already taken by a scheduled session.

mod manager;

pub use manager::AvailabilityManager;
pub(crate) use manager::slots_on;

use crate::{
    calendar::{self, ClockTime, TimeRange},
    error::{PortalError, PortalResult},
};
use chrono::{FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

/// One slot of a schedule or exception
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilitySlot {
    pub start_time: ClockTime,
    pub end_time: ClockTime,
    pub is_available: bool,
}

impl AvailabilitySlot {
    pub fn range(&self) -> TimeRange {
        TimeRange {
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

/// Recurring entry for one day of the week
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaySchedule {
    /// 0 = Sunday .. 6 = Saturday
    pub day_of_week: u8,
    pub slots: Vec<AvailabilitySlot>,
}

/// Date-specific override of the recurring schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityException {
    pub date: NaiveDate,
    pub is_available: bool,
    pub slots: Vec<AvailabilitySlot>,
}

/// Schedule and exceptions of one psychologist
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    pub psychologist_id: String,
    pub schedule: Vec<DaySchedule>,
    pub exceptions: Vec<AvailabilityException>,
}

/// Unvalidated slot as received from a client
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotInput {
    pub start_time: String,
    pub end_time: String,
    #[serde(default = "default_true")]
    pub is_available: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayScheduleInput {
    pub day_of_week: i64,
    #[serde(default)]
    pub slots: Vec<SlotInput>,
}

/// Body of `PUT /psychologists/availability`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleInput {
    #[serde(rename = "availabilitySchedule", alias = "schedule")]
    pub schedule: Vec<DayScheduleInput>,
}

/// Body of `POST /psychologists/availability-exceptions`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionInput {
    pub date: String,
    pub is_available: bool,
    #[serde(default)]
    pub slots: Vec<SlotInput>,
}

fn default_true() -> bool {
    true
}

impl SlotInput {
    pub fn new(start_time: &str, end_time: &str) -> Self {
        Self {
            start_time: start_time.to_string(),
            end_time: end_time.to_string(),
            is_available: true,
        }
    }
}

/// Validate a single slot
pub fn validate_slot(input: &SlotInput) -> PortalResult<AvailabilitySlot> {
    let range = TimeRange::parse(&input.start_time, &input.end_time)?;
    Ok(AvailabilitySlot {
        start_time: range.start_time,
        end_time: range.end_time,
        is_available: input.is_available,
    })
}

pub fn validate_slots(inputs: &[SlotInput]) -> PortalResult<Vec<AvailabilitySlot>> {
    inputs.iter().map(validate_slot).collect()
}

/// Validate a whole weekly schedule; the first violation fails the lot
pub fn validate_schedule(inputs: &[DayScheduleInput]) -> PortalResult<Vec<DaySchedule>> {
    inputs
        .iter()
        .map(|day| {
            if !(0..=6).contains(&day.day_of_week) {
                return Err(PortalError::Validation(format!(
                    "dayOfWeek must be an integer between 0 and 6, got {}",
                    day.day_of_week
                )));
            }
            Ok(DaySchedule {
                day_of_week: day.day_of_week as u8,
                slots: validate_slots(&day.slots)?,
            })
        })
        .collect()
}

pub fn validate_exception(
    input: &ExceptionInput,
    tz: &FixedOffset,
) -> PortalResult<AvailabilityException> {
    Ok(AvailabilityException {
        date: calendar::parse_date(&input.date, tz)?,
        is_available: input.is_available,
        slots: validate_slots(&input.slots)?,
    })
}

/// Candidate slots for a date before booked time is removed.
///
/// A matching exception wins over the recurring schedule; a blocked exception
/// yields nothing. The first recurring entry for the weekday is used.
pub fn candidate_slots(
    schedule: &[DaySchedule],
    exception: Option<&AvailabilityException>,
    date: &NaiveDate,
) -> Vec<AvailabilitySlot> {
    let base: &[AvailabilitySlot] = match exception {
        Some(exception) if !exception.is_available => return Vec::new(),
        Some(exception) => &exception.slots,
        None => {
            let weekday = calendar::day_of_week(date);
            match schedule.iter().find(|day| day.day_of_week == weekday) {
                Some(day) => &day.slots,
                None => return Vec::new(),
            }
        }
    };

    base.iter().filter(|slot| slot.is_available).copied().collect()
}

/// Remove candidates overlapping booked ranges; result is sorted and flagged available
pub fn subtract_booked(candidates: Vec<AvailabilitySlot>, booked: &[TimeRange]) -> Vec<AvailabilitySlot> {
    let mut free: Vec<AvailabilitySlot> = candidates
        .into_iter()
        .filter(|slot| !booked.iter().any(|taken| taken.overlaps(&slot.range())))
        .map(|slot| AvailabilitySlot {
            is_available: true,
            ..slot
        })
        .collect();
    free.sort_by_key(|slot| (slot.start_time, slot.end_time));
    free
}
