use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::window::{ClockTime, Window, WindowError};

/// Unix milliseconds, used for record timestamps.
pub type Ms = i64;

/// Calendar day a reservation belongs to. Time-of-day never survives conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Day(NaiveDate);

impl Day {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl From<NaiveDate> for Day {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

impl From<NaiveDateTime> for Day {
    fn from(at: NaiveDateTime) -> Self {
        Self(at.date())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDayError(pub String);

impl fmt::Display for ParseDayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid date {:?}: expected YYYY-MM-DD", self.0)
    }
}

impl std::error::Error for ParseDayError {}

impl FromStr for Day {
    type Err = ParseDayError;

    /// Accepts a bare date, a naive date-time, or RFC 3339. With an offset, the
    /// literal wall-clock date is kept; no zone conversion happens.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Ok(Self(date));
        }
        if let Ok(at) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
            return Ok(at.into());
        }
        DateTime::parse_from_rfc3339(s)
            .map(|at| Self(at.naive_local().date()))
            .map_err(|_| ParseDayError(s.to_string()))
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

/// Conflict and locking key: one space on one day.
pub type SlotKey = (Ulid, Day);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpaceKind {
    Room,
    Court,
    Table,
}

/// Catalog entry. The engine only reads `id` and `active`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Space {
    pub id: Ulid,
    pub name: String,
    pub kind: SpaceKind,
    pub capacity: u32,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Admin,
}

/// Authenticated caller, supplied per call by whoever validated the credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Ulid,
    pub role: Role,
}

impl Actor {
    pub fn user(id: Ulid) -> Self {
        Self { id, role: Role::User }
    }

    pub fn admin(id: Ulid) -> Self {
        Self { id, role: Role::Admin }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    /// Only reachable through an explicit patch.
    Pending,
    Confirmed,
    /// Never blocks admission and is never reported as occupied.
    Cancelled,
}

impl ReservationStatus {
    pub fn is_active(self) -> bool {
        !matches!(self, ReservationStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub space_id: Ulid,
    pub day: Day,
    pub window: Window,
    pub status: ReservationStatus,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Reservation {
    pub fn slot(&self) -> SlotKey {
        (self.space_id, self.day)
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Partial update. Absent fields keep their current value; the owner never changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationPatch {
    #[serde(default)]
    pub space_id: Option<Ulid>,
    #[serde(default)]
    pub day: Option<Day>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub status: Option<ReservationStatus>,
}

impl ReservationPatch {
    pub fn status(status: ReservationStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn window(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: Some(start.into()),
            end: Some(end.into()),
            ..Self::default()
        }
    }

    /// Build the patched record. Window text is parsed and the merged window revalidated.
    pub fn apply_to(&self, current: &Reservation, now: Ms) -> Result<Reservation, WindowError> {
        let start = match &self.start {
            Some(text) => text.parse::<ClockTime>()?,
            None => current.window.start(),
        };
        let end = match &self.end {
            Some(text) => text.parse::<ClockTime>()?,
            None => current.window.end(),
        };
        Ok(Reservation {
            space_id: self.space_id.unwrap_or(current.space_id),
            day: self.day.unwrap_or(current.day),
            window: Window::new(start, end)?,
            status: self.status.unwrap_or(current.status),
            updated_at: now,
            ..current.clone()
        })
    }
}

/// Log record format. One record per committed write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationInserted { reservation: Reservation },
    ReservationUpdated { reservation: Reservation },
    ReservationDeleted { id: Ulid, space_id: Ulid, day: Day },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> Day {
        s.parse().unwrap()
    }

    fn reservation() -> Reservation {
        Reservation {
            id: Ulid::new(),
            owner_id: Ulid::new(),
            space_id: Ulid::new(),
            day: day("2025-03-14"),
            window: Window::parse("09:00", "10:00").unwrap(),
            status: ReservationStatus::Confirmed,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[test]
    fn day_discards_time_of_day() {
        let midnight = day("2025-03-14");
        assert_eq!(day("2025-03-14T18:45:10"), midnight);
        assert_eq!(day("2025-03-14T00:00:00.250"), midnight);
        assert_eq!(day("2025-03-14T23:30:00+05:00"), midnight); // literal wall-clock date
        assert_eq!(day("2025-03-14T00:10:00Z"), midnight);
        assert_eq!(midnight.to_string(), "2025-03-14");
    }

    #[test]
    fn day_rejects_garbage() {
        assert!("14/03/2025".parse::<Day>().is_err());
        assert!("2025-02-30".parse::<Day>().is_err());
        assert!("".parse::<Day>().is_err());
    }

    #[test]
    fn cancelled_is_the_only_inactive_status() {
        assert!(ReservationStatus::Pending.is_active());
        assert!(ReservationStatus::Confirmed.is_active());
        assert!(!ReservationStatus::Cancelled.is_active());
    }

    #[test]
    fn empty_patch_keeps_everything_but_timestamp() {
        let current = reservation();
        let next = ReservationPatch::default().apply_to(&current, 99).unwrap();
        assert_eq!(next.updated_at, 99);
        assert_eq!(Reservation { updated_at: 1, ..next }, current);
    }

    #[test]
    fn patch_merges_one_end_of_the_window() {
        let current = reservation();
        let patch = ReservationPatch {
            end: Some("11:30".into()),
            ..Default::default()
        };
        let next = patch.apply_to(&current, 2).unwrap();
        assert_eq!(next.window, Window::parse("09:00", "11:30").unwrap());
        assert_eq!(next.id, current.id);
        assert_eq!(next.owner_id, current.owner_id);
    }

    #[test]
    fn patch_revalidates_merged_window() {
        let current = reservation();
        let patch = ReservationPatch {
            start: Some("10:00".into()),
            ..Default::default()
        };
        assert!(matches!(patch.apply_to(&current, 2), Err(WindowError::Inverted { .. })));

        let malformed = ReservationPatch::window("nine", "10:00");
        assert!(matches!(malformed.apply_to(&current, 2), Err(WindowError::Malformed(_))));
    }

    #[test]
    fn space_deserializes_with_default_active() {
        let json = r#"{"id":"01ARZ3NDEKTSV4RRFFQ69G5FAV","name":"Court 1","kind":"COURT","capacity":4}"#;
        let space: Space = serde_json::from_str(json).unwrap();
        assert!(space.active);
        assert_eq!(space.kind, SpaceKind::Court);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationInserted { reservation: reservation() };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
