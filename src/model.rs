use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::calendar::{CalendarDay, DayRange};

/// Half-open stay `[check_in, check_out)` measured in nights.
///
/// The check-in night is occupied, the check-out day is not: a guest leaving
/// on the morning of day `d` frees the room for the night of `d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StayWindow {
    check_in: CalendarDay,
    check_out: CalendarDay,
}

/// The stay window of an existing reservation. Same shape and occupancy rule
/// as a candidate [`StayWindow`].
pub type ReservationWindow = StayWindow;

impl StayWindow {
    pub fn new(check_in: CalendarDay, check_out: CalendarDay) -> Result<Self, WindowError> {
        if check_in >= check_out {
            return Err(WindowError::NotAfterCheckIn { check_in, check_out });
        }
        Ok(Self { check_in, check_out })
    }

    pub fn check_in(&self) -> CalendarDay {
        self.check_in
    }

    pub fn check_out(&self) -> CalendarDay {
        self.check_out
    }

    /// Number of nights; always at least 1.
    pub fn nights(&self) -> u32 {
        self.check_in.days_until(self.check_out) as u32
    }

    /// Every night of the stay, check-in inclusive, check-out exclusive.
    pub fn days(&self) -> DayRange {
        self.check_in.range_to(self.check_out)
    }

    /// Whether this stay holds a room on the night of `day`.
    pub fn occupies(&self, day: CalendarDay) -> bool {
        self.check_in <= day && self.check_out > day
    }
}

impl fmt::Display for StayWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.check_in, self.check_out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    #[error("check-out {check_out} must be after check-in {check_in}")]
    NotAfterCheckIn {
        check_in: CalendarDay,
        check_out: CalendarDay,
    },
}

// ── Statuses ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    /// Held but not yet confirmed (cart, pending payment).
    Provisional,
    Confirmed,
    CheckedIn,
    CheckedOut,
    Cancelled,
    NoShow,
}

impl ReservationStatus {
    /// Statuses that consume a room for their stay window.
    pub const ACTIVE: [ReservationStatus; 3] = [
        ReservationStatus::Provisional,
        ReservationStatus::Confirmed,
        ReservationStatus::CheckedIn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Provisional => "provisional",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::CheckedIn => "checked_in",
            ReservationStatus::CheckedOut => "checked_out",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::NoShow => "no_show",
        }
    }

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationStatus::CheckedOut | ReservationStatus::Cancelled | ReservationStatus::NoShow
        )
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "provisional" | "held" | "pending" => Ok(ReservationStatus::Provisional),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "checked_in" => Ok(ReservationStatus::CheckedIn),
            "checked_out" => Ok(ReservationStatus::CheckedOut),
            "cancelled" | "canceled" => Ok(ReservationStatus::Cancelled),
            "no_show" => Ok(ReservationStatus::NoShow),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomStatus {
    Available,
    Occupied,
    Cleaning,
    Maintenance,
    Retired,
}

impl RoomStatus {
    /// Rooms that physically exist and are in rotation.
    pub const COUNTABLE: [RoomStatus; 3] = [RoomStatus::Available, RoomStatus::Occupied, RoomStatus::Cleaning];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Available => "available",
            RoomStatus::Occupied => "occupied",
            RoomStatus::Cleaning => "cleaning",
            RoomStatus::Maintenance => "maintenance",
            RoomStatus::Retired => "retired",
        }
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "available" => Ok(RoomStatus::Available),
            "occupied" => Ok(RoomStatus::Occupied),
            "cleaning" => Ok(RoomStatus::Cleaning),
            "maintenance" => Ok(RoomStatus::Maintenance),
            "retired" => Ok(RoomStatus::Retired),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status: {0}")]
pub struct UnknownStatus(pub String);

// ── Inventory entities ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyInfo {
    pub id: Ulid,
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomTypeInfo {
    pub id: Ulid,
    pub property_id: Ulid,
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub room_type_id: Ulid,
    pub number: String,
    pub status: RoomStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub room_type_id: Ulid,
    pub window: ReservationWindow,
    pub status: ReservationStatus,
}

/// Rooms and reservations of one room type.
#[derive(Debug, Clone)]
pub struct RoomTypeState {
    pub info: RoomTypeInfo,
    pub rooms: Vec<Room>,
    /// Sorted by `window.check_in`.
    pub reservations: Vec<Reservation>,
}

impl RoomTypeState {
    pub fn new(info: RoomTypeInfo) -> Self {
        Self {
            info,
            rooms: Vec::new(),
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by check-in.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.window.check_in() <= reservation.window.check_in());
        self.reservations.insert(pos, reservation);
    }

    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    pub fn room_mut(&mut self, id: Ulid) -> Option<&mut Room> {
        self.rooms.iter_mut().find(|r| r.id == id)
    }

    pub fn count_rooms(&self, statuses: &[RoomStatus]) -> u32 {
        self.rooms.iter().filter(|r| statuses.contains(&r.status)).count() as u32
    }

    /// Reservations with a status in `statuses` that intersect `window`.
    /// Skips everything checking in on or after `window.check_out()` by binary search.
    pub fn overlapping<'a>(
        &'a self,
        window: &'a StayWindow,
        statuses: &'a [ReservationStatus],
    ) -> impl Iterator<Item = &'a Reservation> + 'a {
        let right_bound = self
            .reservations
            .partition_point(|r| r.window.check_in() < window.check_out());
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| statuses.contains(&r.status))
            .filter(move |r| crate::engine::intersects(window, &r.window))
    }
}

/// WAL record: one event per inventory change. A reservation batch is a
/// single record so it replays whole or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    PropertyCreated {
        id: Ulid,
        name: String,
        active: bool,
    },
    PropertyDeactivated {
        id: Ulid,
    },
    RoomTypeCreated {
        id: Ulid,
        property_id: Ulid,
        name: String,
        active: bool,
    },
    RoomTypeDeactivated {
        id: Ulid,
    },
    RoomAdded {
        id: Ulid,
        room_type_id: Ulid,
        number: String,
        status: RoomStatus,
    },
    RoomStatusChanged {
        id: Ulid,
        room_type_id: Ulid,
        status: RoomStatus,
    },
    ReservationRecorded {
        id: Ulid,
        room_type_id: Ulid,
        window: ReservationWindow,
        status: ReservationStatus,
    },
    ReservationStatusChanged {
        id: Ulid,
        room_type_id: Ulid,
        status: ReservationStatus,
    },
    ReservationsRecorded {
        reservations: Vec<Reservation>,
    },
}

// ── Availability results ─────────────────────────────────────────

/// Rooms of one type already taken on one night.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NightBucket {
    pub date: CalendarDay,
    pub booked_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NightAvailability {
    pub date: CalendarDay,
    pub available_rooms: u32,
    pub total_rooms: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilityResult {
    pub per_night: Vec<NightAvailability>,
    pub min_available_rooms: u32,
    pub is_available: bool,
    pub nights: u32,
}
