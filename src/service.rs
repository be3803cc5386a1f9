use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::calendar::CalendarDay;
use crate::engine::{compute_availability, EngineError};
use crate::limits::MAX_STAY_NIGHTS;
use crate::model::*;

// ── Collaborators ────────────────────────────────────────────────

/// Read access to properties, room types and room counts.
#[async_trait]
pub trait InventorySource: Send + Sync {
    async fn property(&self, id: Ulid) -> Result<Option<PropertyInfo>, EngineError>;

    /// The room type, only if it belongs to `property_id`.
    async fn room_type(&self, property_id: Ulid, id: Ulid) -> Result<Option<RoomTypeInfo>, EngineError>;

    /// Rooms of the type whose status is one of `statuses`.
    async fn count_rooms(
        &self,
        property_id: Ulid,
        room_type_id: Ulid,
        statuses: &[RoomStatus],
    ) -> Result<u32, EngineError>;
}

/// Stay windows of reservations that hold a room during a candidate stay.
#[async_trait]
pub trait ReservationSource: Send + Sync {
    /// Every reservation of the room type with a status in `statuses` that
    /// intersects `window`, each exactly once.
    async fn select_overlapping(
        &self,
        property_id: Ulid,
        room_type_id: Ulid,
        window: &StayWindow,
        statuses: &[ReservationStatus],
    ) -> Result<Vec<ReservationWindow>, EngineError>;
}

// ── Request validation ───────────────────────────────────────────

/// Raw request fields as they arrive, unvalidated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvailabilityFilters {
    pub property_id: Option<String>,
    pub room_type_id: Option<String>,
    pub check_in: Option<String>,
    pub check_out: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilityRequest {
    pub property_id: Ulid,
    pub room_type_id: Ulid,
    pub window: StayWindow,
}

fn required<'a>(
    value: &'a Option<String>,
    field: &'static str,
    errors: &mut Vec<FieldError>,
) -> Option<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Some(v),
        _ => {
            errors.push(FieldError::new(field, "is required"));
            None
        }
    }
}

fn parse_id(value: &Option<String>, field: &'static str, errors: &mut Vec<FieldError>) -> Option<Ulid> {
    let raw = required(value, field, errors)?;
    match Ulid::from_string(raw) {
        Ok(id) => Some(id),
        Err(_) => {
            errors.push(FieldError::new(field, format!("'{raw}' is not a valid id")));
            None
        }
    }
}

fn parse_day(value: &Option<String>, field: &'static str, errors: &mut Vec<FieldError>) -> Option<CalendarDay> {
    let raw = required(value, field, errors)?;
    match CalendarDay::parse(raw) {
        Ok(day) => Some(day),
        Err(e) => {
            errors.push(FieldError::new(field, e.to_string()));
            None
        }
    }
}

impl AvailabilityRequest {
    /// Validate raw filters. Every failing field is reported, not just the first.
    ///
    /// `today` is the UTC calendar day of now; a check-in before it is rejected.
    pub fn parse(filters: &AvailabilityFilters, today: CalendarDay) -> Result<Self, CheckError> {
        let mut errors = Vec::new();
        let property_id = parse_id(&filters.property_id, "property_id", &mut errors);
        let room_type_id = parse_id(&filters.room_type_id, "room_type_id", &mut errors);
        let check_in = parse_day(&filters.check_in, "check_in", &mut errors);
        let check_out = parse_day(&filters.check_out, "check_out", &mut errors);

        if let Some(ci) = check_in
            && ci < today
        {
            errors.push(FieldError::new("check_in", format!("{ci} is in the past")));
        }

        let mut window = None;
        if let (Some(ci), Some(co)) = (check_in, check_out) {
            match StayWindow::new(ci, co) {
                Ok(w) if w.nights() > MAX_STAY_NIGHTS => errors.push(FieldError::new(
                    "check_out",
                    format!("stay of {} nights exceeds {MAX_STAY_NIGHTS}", w.nights()),
                )),
                Ok(w) => window = Some(w),
                Err(e) => errors.push(FieldError::new("check_out", e.to_string())),
            }
        }

        match (property_id, room_type_id, window) {
            (Some(property_id), Some(room_type_id), Some(window)) if errors.is_empty() => Ok(Self {
                property_id,
                room_type_id,
                window,
            }),
            _ => Err(CheckError::InvalidInput(errors)),
        }
    }
}

// ── Outcomes ─────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("invalid input: {}", join_fields(.0))]
    InvalidInput(Vec<FieldError>),
    #[error("property not found: {0}")]
    PropertyNotFound(Ulid),
    #[error("room type not found: {0}")]
    RoomTypeNotFound(Ulid),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<EngineError> for CheckError {
    fn from(e: EngineError) -> Self {
        CheckError::Storage(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilityReport {
    pub property_id: Ulid,
    pub room_type_id: Ulid,
    pub check_in: CalendarDay,
    pub check_out: CalendarDay,
    pub result: AvailabilityResult,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvailabilityOutcome {
    Computed(AvailabilityReport),
    /// The room type exists but has no countable rooms. Distinct from fully booked.
    NoRoomsOfType {
        property_id: Ulid,
        room_type_id: Ulid,
        check_in: CalendarDay,
        check_out: CalendarDay,
    },
}

impl AvailabilityOutcome {
    pub fn message(&self) -> String {
        match self {
            AvailabilityOutcome::Computed(report) => report.message.clone(),
            AvailabilityOutcome::NoRoomsOfType { room_type_id, .. } => {
                format!("no rooms of this type: room type {room_type_id} has no rooms in service")
            }
        }
    }

    /// Short label: `available`, `fully_booked` or `no_rooms`.
    pub fn label(&self) -> &'static str {
        match self {
            AvailabilityOutcome::Computed(report) if report.result.is_available => "available",
            AvailabilityOutcome::Computed(_) => "fully_booked",
            AvailabilityOutcome::NoRoomsOfType { .. } => "no_rooms",
        }
    }
}

fn summary_message(window: &StayWindow, result: &AvailabilityResult) -> String {
    if result.is_available {
        format!(
            "{} room(s) available on every night of {window}; min_available_rooms = {}",
            result.min_available_rooms, result.min_available_rooms
        )
    } else {
        format!(
            "fully booked: at least one night of {window} has no rooms left; min_available_rooms = {}",
            result.min_available_rooms
        )
    }
}

// ── Orchestration ────────────────────────────────────────────────

/// Answer "can this room type be booked for the whole stay".
///
/// Looks up the property and room type, counts rooms in service, fetches the
/// overlapping active reservations in one call and runs the per-night engine.
/// A failed fetch aborts the check; nothing is computed from partial data.
pub async fn check_availability<I, R>(
    inventory: &I,
    reservations: &R,
    request: &AvailabilityRequest,
) -> Result<AvailabilityOutcome, CheckError>
where
    I: InventorySource + ?Sized,
    R: ReservationSource + ?Sized,
{
    let result = run_check(inventory, reservations, request).await;
    let label = match &result {
        Ok(outcome) => outcome.label(),
        Err(CheckError::InvalidInput(_)) => "invalid_input",
        Err(CheckError::PropertyNotFound(_) | CheckError::RoomTypeNotFound(_)) => "not_found",
        Err(CheckError::Storage(_)) => "storage_error",
    };
    metrics::counter!(crate::observability::AVAILABILITY_CHECKS_TOTAL, "outcome" => label).increment(1);
    result
}

async fn run_check<I, R>(
    inventory: &I,
    reservations: &R,
    request: &AvailabilityRequest,
) -> Result<AvailabilityOutcome, CheckError>
where
    I: InventorySource + ?Sized,
    R: ReservationSource + ?Sized,
{
    let AvailabilityRequest {
        property_id,
        room_type_id,
        window,
    } = *request;

    match inventory.property(property_id).await? {
        Some(p) if p.active => {}
        _ => return Err(CheckError::PropertyNotFound(property_id)),
    }
    match inventory.room_type(property_id, room_type_id).await? {
        Some(rt) if rt.active => {}
        _ => return Err(CheckError::RoomTypeNotFound(room_type_id)),
    }

    let total_rooms = inventory
        .count_rooms(property_id, room_type_id, &RoomStatus::COUNTABLE)
        .await?;
    if total_rooms == 0 {
        debug!("room type {room_type_id} has no countable rooms");
        return Ok(AvailabilityOutcome::NoRoomsOfType {
            property_id,
            room_type_id,
            check_in: window.check_in(),
            check_out: window.check_out(),
        });
    }

    let overlapping = reservations
        .select_overlapping(property_id, room_type_id, &window, &ReservationStatus::ACTIVE)
        .await
        .map_err(|e| {
            warn!("overlap fetch failed for room type {room_type_id}: {e}");
            CheckError::Storage(e.to_string())
        })?;

    let result = compute_availability(&window, total_rooms, &overlapping);
    debug!(
        "room type {room_type_id} {window}: {} overlapping, min available {}",
        overlapping.len(),
        result.min_available_rooms
    );
    let message = summary_message(&window, &result);
    Ok(AvailabilityOutcome::Computed(AvailabilityReport {
        property_id,
        room_type_id,
        check_in: window.check_in(),
        check_out: window.check_out(),
        result,
        message,
    }))
}
