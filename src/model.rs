use chrono::{NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};
use ulid::Ulid;
use uuid::Uuid;

/// A space is addressed by the restaurant that owns it plus its own id.
pub type SpaceKey = (Ulid, Uuid);

pub const DEFAULT_STATUS: &str = "CONFIRMED";

/// Half-open interval `[start, end)` of wall-clock date-times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Span {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    pub fn duration_minutes(&self) -> i64 {
        self.duration().num_minutes()
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Space {
    pub id: Uuid,
    pub name: String,
    pub min_capacity: u32,
    pub max_capacity: u32,
    /// `None` falls back to the process-wide defaults.
    pub operating_start: Option<NaiveTime>,
    pub operating_end: Option<NaiveTime>,
    pub slot_minutes: Option<u32>,
}

impl Space {
    /// Materialize a draft under a freshly generated id.
    pub fn from_draft(draft: SpaceDraft) -> Self {
        Self::with_id(Uuid::new_v4(), draft)
    }

    pub fn with_id(id: Uuid, draft: SpaceDraft) -> Self {
        Self {
            id,
            name: draft.name,
            min_capacity: draft.min_capacity,
            max_capacity: draft.max_capacity,
            operating_start: draft.operating_start,
            operating_end: draft.operating_end,
            slot_minutes: draft.slot_minutes,
        }
    }

    #[cfg(test)]
    pub fn for_tests(name: &str, min_capacity: u32, max_capacity: u32) -> Self {
        Self::from_draft(SpaceDraft::new(name, min_capacity, max_capacity))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restaurant {
    pub id: Ulid,
    pub name: String,
    pub address: String,
    pub cuisine_type: String,
    /// Informational only; never checked against the spaces.
    pub capacity: u32,
    pub spaces: Vec<Space>,
}

impl Restaurant {
    pub fn space(&self, space_id: &Uuid) -> Option<&Space> {
        self.spaces.iter().find(|s| s.id == *space_id)
    }

    pub fn has_space(&self, space_id: &Uuid) -> bool {
        self.space(space_id).is_some()
    }

    pub fn space_keys(&self) -> impl Iterator<Item = SpaceKey> + '_ {
        self.spaces.iter().map(|s| (self.id, s.id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub restaurant_id: Ulid,
    pub space_id: Uuid,
    pub customer_email: String,
    pub span: Span,
    pub party_size: u32,
    pub status: String,
}

impl Reservation {
    pub fn key(&self) -> SpaceKey {
        (self.restaurant_id, self.space_id)
    }
}

// ── Drafts (unvalidated input) ───────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpaceDraft {
    pub name: String,
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub operating_start: Option<NaiveTime>,
    pub operating_end: Option<NaiveTime>,
    pub slot_minutes: Option<u32>,
}

impl SpaceDraft {
    pub fn new(name: impl Into<String>, min_capacity: u32, max_capacity: u32) -> Self {
        Self {
            name: name.into(),
            min_capacity,
            max_capacity,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RestaurantDraft {
    pub name: String,
    pub address: String,
    pub cuisine_type: String,
    pub capacity: u32,
    /// On replacement, `None` keeps the current spaces.
    pub spaces: Option<Vec<SpaceDraft>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationDraft {
    pub restaurant_id: Ulid,
    pub space_id: Uuid,
    pub customer_email: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub party_size: u32,
    pub status: Option<String>,
}

// ── Text formats ────────────────────────────────────────────────

const DATE_TIME_FORMATS: &[&str] = &[
    "%d-%m-%Y %H:%M",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Accepts `dd-MM-yyyy HH:mm` plus ISO-8601 with either `T` or a space separator.
pub fn parse_date_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    DATE_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

/// `HH:MM` or `HH:MM:SS`.
pub fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}

/// The client-facing rendering, matching what `parse_date_time` accepts first.
pub fn format_date_time(t: NaiveDateTime) -> String {
    t.format("%d-%m-%Y %H:%M").to_string()
}

// ── Per-space reservation ledger ────────────────────────────────

/// All reservations of one space, sorted by `span.start`.
#[derive(Debug, Clone, Default)]
pub struct SpaceLedger {
    pub reservations: Vec<Reservation>,
}

impl SpaceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }

    pub fn insert(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.span.start <= reservation.span.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    /// Reservations whose span overlaps `query`.
    /// Everything at or past the partition point starts at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }
}

/// WAL record format. One variant per state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RestaurantCreated {
        restaurant: Restaurant,
    },
    RestaurantReplaced {
        restaurant: Restaurant,
    },
    RestaurantDeleted {
        id: Ulid,
    },
    SpaceAdded {
        restaurant_id: Ulid,
        space: Space,
    },
    SpaceRemoved {
        restaurant_id: Ulid,
        space_id: Uuid,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationDeleted {
        id: Ulid,
        restaurant_id: Ulid,
        space_id: Uuid,
    },
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{NaiveDate, NaiveDateTime};

    /// `at(d, h, m)` is 2024-06-`d` `h`:`m`.
    pub fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }
}
