use chrono::{Local, NaiveDate, NaiveTime, Timelike};

use crate::model::{CarReservation, RoomReservation, Slot};

use super::EngineError;

/// Server-local calendar day, the reference point for the conflict gate and
/// for availability flips.
pub(crate) fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Server-local wall-clock time, truncated to whole minutes (wire format).
pub(crate) fn now_hm() -> NaiveTime {
    let now = Local::now().time();
    NaiveTime::from_hms_opt(now.hour(), now.minute(), 0).expect("in-range clock time")
}

/// When temporal exclusivity is enforced for a candidate reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Only candidates dated "today" are checked; past and future dates
    /// bypass the conflict check entirely.
    #[default]
    SameDayOnly,
    /// Every candidate is checked against the full ledger regardless of date.
    AllDates,
}

impl ConflictPolicy {
    pub fn checks(&self, candidate: NaiveDate, today: NaiveDate) -> bool {
        match self {
            ConflictPolicy::SameDayOnly => candidate == today,
            ConflictPolicy::AllDates => true,
        }
    }
}

impl std::str::FromStr for ConflictPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "same-day" => Ok(ConflictPolicy::SameDayOnly),
            "all-dates" => Ok(ConflictPolicy::AllDates),
            _ => Err(()),
        }
    }
}

pub(crate) fn validate_slot(start: NaiveTime, end: NaiveTime) -> Result<Slot, EngineError> {
    if start >= end {
        return Err(EngineError::Validation("startTime must be before endTime"));
    }
    Ok(Slot::new(start, end))
}

/// Room rule: two reservations on the same room and date conflict iff their
/// half-open slots `[s1, e1)` and `[s2, e2)` satisfy `s1 < e2 && s2 < e1`.
/// A slot ending exactly where another starts does not conflict.
pub(crate) fn check_room_slot(
    existing: &[RoomReservation],
    date: NaiveDate,
    slot: &Slot,
) -> Result<(), EngineError> {
    for r in existing {
        if r.date == date && r.slot().overlaps(slot) {
            return Err(EngineError::Conflict("room already reserved for this time slot"));
        }
    }
    Ok(())
}

/// Car rule: at most one active (unreturned) reservation per car and date,
/// regardless of time window.
pub(crate) fn check_car_free(
    existing: &[CarReservation],
    date: NaiveDate,
) -> Result<(), EngineError> {
    for r in existing {
        if r.date == date && r.is_active() {
            return Err(EngineError::Conflict("car already reserved for this date"));
        }
    }
    Ok(())
}
