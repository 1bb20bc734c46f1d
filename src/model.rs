use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// Entity id — sequential per entity kind, starting at 1.
pub type Id = u32;

/// `HH:MM` wire format for times, matching the clients' payloads.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let s = String::deserialize(d)?;
        NaiveTime::parse_from_str(&s, FORMAT).map_err(de::Error::custom)
    }
}

/// `HH:MM` or null, for nullable time columns (car end/return times).
pub mod hhmm_opt {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(t: &Option<NaiveTime>, s: S) -> Result<S::Ok, S::Error> {
        match t {
            Some(t) => s.serialize_some(&t.format(super::hhmm::FORMAT).to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(s) => NaiveTime::parse_from_str(&s, super::hhmm::FORMAT)
                .map(Some)
                .map_err(de::Error::custom),
            None => Ok(None),
        }
    }
}

/// Half-open time slot `[start, end)` within one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Slot {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "Slot start must be before end");
        Self { start, end }
    }

    pub fn overlaps(&self, other: &Slot) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ── Entities ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Id,
    pub name: String,
    pub email: String,
    /// Stored verbatim; never serialized to clients (see [`UserInfo`]).
    pub password: String,
    pub is_admin: bool,
    pub driver_license: Option<String>,
    pub license_expiry: Option<NaiveDate>,
}

/// Client-facing view of a [`User`] with the password stripped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: Id,
    pub name: String,
    pub email: String,
    pub is_admin: bool,
    pub driver_license: Option<String>,
    pub license_expiry: Option<NaiveDate>,
}

impl From<&User> for UserInfo {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            name: u.name.clone(),
            email: u.email.clone(),
            is_admin: u.is_admin,
            driver_license: u.driver_license.clone(),
            license_expiry: u.license_expiry,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: Id,
    pub name: String,
    /// Free-text, e.g. "10 people".
    pub capacity: String,
    pub is_available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Car {
    pub id: Id,
    pub model: String,
    pub plate: String,
    pub is_available: bool,
    /// Percent, 0–100.
    pub fuel_level: u8,
    pub odometer: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomReservation {
    pub id: Id,
    pub room_id: Id,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub user_id: Id,
}

impl RoomReservation {
    pub fn slot(&self) -> Slot {
        Slot::new(self.start_time, self.end_time)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarReservation {
    pub id: Id,
    pub car_id: Id,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    /// Null until the car is returned (unless supplied up front).
    #[serde(with = "hhmm_opt", default)]
    pub end_time: Option<NaiveTime>,
    pub destination: String,
    pub purpose: String,
    pub user_id: Id,
    pub returned: bool,
    #[serde(with = "hhmm_opt", default)]
    pub return_time: Option<NaiveTime>,
    pub fuel_level_return: Option<u8>,
    pub final_odometer: Option<u32>,
    pub notes: Option<String>,
}

impl CarReservation {
    /// Active = checked out and not yet returned.
    pub fn is_active(&self) -> bool {
        !self.returned
    }
}

// ── WAL record format ────────────────────────────────────────────

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserAdded {
        user: User,
    },
    UserUpdated {
        id: Id,
        patch: UserPatch,
    },
    UserRemoved {
        id: Id,
    },
    RoomAdded {
        room: Room,
    },
    CarAdded {
        car: Car,
    },
    RoomBooked {
        reservation: RoomReservation,
    },
    CarBooked {
        reservation: CarReservation,
    },
    CarReturned {
        reservation_id: Id,
        car_id: Id,
        #[serde(with = "hhmm")]
        return_time: NaiveTime,
        #[serde(with = "hhmm")]
        end_time: NaiveTime,
        fuel_level: Option<u8>,
        odometer: Option<u32>,
        notes: String,
    },
}

/// Explicit partial update for a [`User`] — the only mutable fields.
/// `None` means "leave unchanged"; there are no field-clearing semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub is_admin: Option<bool>,
    pub driver_license: Option<String>,
    pub license_expiry: Option<NaiveDate>,
}

// ── Request payloads ─────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub driver_license: Option<String>,
    #[serde(default)]
    pub license_expiry: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRoomReservation {
    pub room_id: Id,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub user_id: Id,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCarReservation {
    pub car_id: Id,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm_opt", default)]
    pub end_time: Option<NaiveTime>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
    pub user_id: Id,
}

/// Return request: an explicit reservation id, or — when absent — the latest
/// active reservation of `car_id`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarReturnRequest {
    #[serde(default)]
    pub reservation_id: Option<Id>,
    #[serde(default)]
    pub car_id: Option<Id>,
    #[serde(with = "hhmm_opt", default)]
    pub return_time: Option<NaiveTime>,
    #[serde(with = "hhmm_opt", default)]
    pub end_time: Option<NaiveTime>,
    #[serde(default)]
    pub fuel_level: Option<u8>,
    #[serde(default)]
    pub final_odometer: Option<u32>,
    #[serde(default)]
    pub notes: Option<String>,
}

// ── Ledger read filters ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomReservationFilter {
    pub date: Option<NaiveDate>,
    pub room_id: Option<Id>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarReservationFilter {
    pub date: Option<NaiveDate>,
    pub car_id: Option<Id>,
    pub user_id: Option<Id>,
}
