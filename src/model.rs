use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for audit timestamps and session expiry.
pub type Ms = i64;

pub type RoomId = u32;
pub type ReservationId = Ulid;
pub type RestrictionId = Ulid;

/// Half-open stay `[start, end)` in whole days. The checkout day is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Span {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn is_ordered(&self) -> bool {
        self.start < self.end
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.start <= day && day < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
}

/// Why a room is closed for a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestrictionKind {
    /// Backed by a committed reservation. The id is a lookup reference only.
    Reservation { reservation_id: ReservationId },
    /// Closed by the property owner.
    OwnerBlock,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRestriction {
    pub id: RestrictionId,
    pub room_id: RoomId,
    pub span: Span,
    pub kind: RestrictionKind,
}

impl RoomRestriction {
    pub fn reservation_id(&self) -> Option<ReservationId> {
        match self.kind {
            RestrictionKind::Reservation { reservation_id } => Some(reservation_id),
            RestrictionKind::OwnerBlock => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestContact {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

/// A committed reservation. Drafts never reach the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub room_id: RoomId,
    pub span: Span,
    pub guest: GuestContact,
    pub created_at: Ms,
    /// Set by an administrator once the booking has been handled.
    pub processed: bool,
}

/// Candidate handed to the booking transaction manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub room_id: RoomId,
    pub span: Span,
    pub guest: GuestContact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationFilter {
    #[default]
    All,
    /// Not yet processed by an administrator.
    New,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Occupancy {
    Reserved { reservation_id: ReservationId },
    Blocked { restriction_id: RestrictionId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayStatus {
    pub date: NaiveDate,
    pub occupancy: Option<Occupancy>,
}

/// One row of the admin calendar: a room and its month, day by day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomCalendar {
    pub room: Room,
    pub days: Vec<DayStatus>,
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Sorted by `span.start`. Never overlapping.
    pub restrictions: Vec<RoomRestriction>,
    pub reservations: HashMap<ReservationId, Reservation>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            restrictions: Vec::new(),
            reservations: HashMap::new(),
        }
    }

    /// Insert restriction maintaining sort order by span.start.
    pub fn insert_restriction(&mut self, restriction: RoomRestriction) {
        let pos = self
            .restrictions
            .binary_search_by_key(&restriction.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.restrictions.insert(pos, restriction);
    }

    pub fn remove_restriction(&mut self, id: RestrictionId) -> Option<RoomRestriction> {
        let pos = self.restrictions.iter().position(|r| r.id == id)?;
        Some(self.restrictions.remove(pos))
    }

    pub fn restriction(&self, id: RestrictionId) -> Option<&RoomRestriction> {
        self.restrictions.iter().find(|r| r.id == id)
    }

    /// Return only restrictions whose span overlaps the query window.
    /// Uses binary search to skip restrictions starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &RoomRestriction> {
        let right_bound = self
            .restrictions
            .partition_point(|r| r.span.start < query.end);
        self.restrictions[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }
}

/// The event types, flat, no nesting. A committed unit of work is a `Vec<Event>`
/// and is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    ReservationInserted {
        reservation: Reservation,
    },
    RestrictionInserted {
        restriction: RoomRestriction,
    },
    GuestUpdated {
        id: ReservationId,
        room_id: RoomId,
        guest: GuestContact,
    },
    ReservationProcessed {
        id: ReservationId,
        room_id: RoomId,
        processed: bool,
    },
    ReservationDeleted {
        id: ReservationId,
        room_id: RoomId,
    },
    RestrictionDeleted {
        id: RestrictionId,
        room_id: RoomId,
    },
}

impl Event {
    pub fn room_id(&self) -> RoomId {
        match self {
            Event::RoomCreated { room } => room.id,
            Event::ReservationInserted { reservation } => reservation.room_id,
            Event::RestrictionInserted { restriction } => restriction.room_id,
            Event::GuestUpdated { room_id, .. }
            | Event::ReservationProcessed { room_id, .. }
            | Event::ReservationDeleted { room_id, .. }
            | Event::RestrictionDeleted { room_id, .. } => *room_id,
        }
    }
}

#[cfg(test)]
pub(crate) fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

#[cfg(test)]
pub(crate) fn span(start: &str, end: &str) -> Span {
    Span::new(day(start), day(end))
}
