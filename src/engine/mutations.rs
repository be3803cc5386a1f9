use std::collections::HashSet;

use tokio::sync::oneshot;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{apply_to_room_type, Engine, EngineError, WalCommand};

fn validate_name(name: &str, what: &'static str) -> Result<(), EngineError> {
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn validate_stay(window: &StayWindow) -> Result<(), EngineError> {
    if window.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(())
}

impl Engine {
    pub async fn create_property(&self, id: Ulid, name: String, active: bool) -> Result<(), EngineError> {
        let _permit = self.write_permit().await;
        if self.properties.len() >= MAX_PROPERTIES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many properties"));
        }
        validate_name(&name, "property name too long")?;
        if self.properties.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::PropertyCreated { id, name, active };
        self.wal_append(&event).await?;
        self.apply_event(&event);
        info!("created property {id}");
        Ok(())
    }

    /// Mark a property inactive. Its room types stay in place but availability
    /// checks against it report not-found.
    pub async fn deactivate_property(&self, id: Ulid) -> Result<(), EngineError> {
        let _permit = self.write_permit().await;
        let active = self
            .properties
            .get(&id)
            .map(|p| p.active)
            .ok_or(EngineError::NotFound(id))?;
        if !active {
            return Ok(());
        }

        let event = Event::PropertyDeactivated { id };
        self.wal_append(&event).await?;
        self.apply_event(&event);
        info!("deactivated property {id}");
        Ok(())
    }

    pub async fn create_room_type(
        &self,
        id: Ulid,
        property_id: Ulid,
        name: String,
        active: bool,
    ) -> Result<(), EngineError> {
        let _permit = self.write_permit().await;
        if self.room_types.len() >= MAX_ROOM_TYPES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many room types"));
        }
        validate_name(&name, "room type name too long")?;
        let property_active = self
            .properties
            .get(&property_id)
            .map(|p| p.active)
            .ok_or(EngineError::NotFound(property_id))?;
        if !property_active {
            return Err(EngineError::Inactive(property_id));
        }
        if self.room_types.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::RoomTypeCreated { id, property_id, name, active };
        self.wal_append(&event).await?;
        self.apply_event(&event);
        info!("created room type {id} for property {property_id}");
        Ok(())
    }

    pub async fn deactivate_room_type(&self, id: Ulid) -> Result<(), EngineError> {
        let _permit = self.write_permit().await;
        let rt = self.get_room_type(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rt.write().await;
        if !guard.info.active {
            return Ok(());
        }
        let event = Event::RoomTypeDeactivated { id };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("deactivated room type {id}");
        Ok(())
    }

    pub async fn add_room(
        &self,
        id: Ulid,
        room_type_id: Ulid,
        number: String,
        status: RoomStatus,
    ) -> Result<(), EngineError> {
        let _permit = self.write_permit().await;
        validate_name(&number, "room number too long")?;
        if self.entity_to_room_type.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let rt = self
            .get_room_type(&room_type_id)
            .ok_or(EngineError::NotFound(room_type_id))?;
        let mut guard = rt.write().await;
        if !guard.info.active {
            return Err(EngineError::Inactive(room_type_id));
        }
        if guard.rooms.len() >= MAX_ROOMS_PER_ROOM_TYPE {
            return Err(EngineError::LimitExceeded("too many rooms in room type"));
        }

        let event = Event::RoomAdded { id, room_type_id, number, status };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn set_room_status(&self, id: Ulid, status: RoomStatus) -> Result<Ulid, EngineError> {
        let _permit = self.write_permit().await;
        let (room_type_id, mut guard) = self.resolve_entity_write(&id).await?;
        let current = guard
            .rooms
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.status)
            .ok_or(EngineError::NotFound(id))?;
        if current == status {
            return Ok(room_type_id);
        }

        let event = Event::RoomStatusChanged { id, room_type_id, status };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::debug!("room {id}: {current} -> {status}");
        Ok(room_type_id)
    }

    /// Record an existing reservation's stay. Capacity is not enforced here:
    /// the availability engine clamps overbooking to zero.
    pub async fn record_reservation(
        &self,
        id: Ulid,
        room_type_id: Ulid,
        window: StayWindow,
        status: ReservationStatus,
    ) -> Result<(), EngineError> {
        let _permit = self.write_permit().await;
        validate_stay(&window)?;
        if self.entity_to_room_type.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let rt = self
            .get_room_type(&room_type_id)
            .ok_or(EngineError::NotFound(room_type_id))?;
        let mut guard = rt.write().await;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_ROOM_TYPE {
            return Err(EngineError::LimitExceeded("too many reservations in room type"));
        }

        let event = Event::ReservationRecorded { id, room_type_id, window, status };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Record several reservations, all or none. Rows may target different room
    /// types; the batch is one WAL record, so a failed write keeps every row out.
    pub async fn batch_record_reservations(
        &self,
        reservations: Vec<(Ulid, Ulid, StayWindow, ReservationStatus)>,
    ) -> Result<(), EngineError> {
        let _permit = self.write_permit().await;
        if reservations.is_empty() {
            return Ok(());
        }
        if reservations.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        let mut seen = HashSet::with_capacity(reservations.len());
        for (id, _, window, _) in &reservations {
            validate_stay(window)?;
            if !seen.insert(*id) || self.entity_to_room_type.contains_key(id) {
                return Err(EngineError::AlreadyExists(*id));
            }
        }

        // Acquire write locks in sorted order to prevent deadlocks.
        let mut room_type_ids: Vec<Ulid> = reservations.iter().map(|(_, rt, _, _)| *rt).collect();
        room_type_ids.sort();
        room_type_ids.dedup();

        let mut guards = Vec::with_capacity(room_type_ids.len());
        for rt_id in &room_type_ids {
            let rt = self.get_room_type(rt_id).ok_or(EngineError::NotFound(*rt_id))?;
            let guard = rt.write_owned().await;
            let incoming = reservations.iter().filter(|(_, r, _, _)| r == rt_id).count();
            if guard.reservations.len() + incoming > MAX_RESERVATIONS_PER_ROOM_TYPE {
                return Err(EngineError::LimitExceeded("too many reservations in room type"));
            }
            guards.push(guard);
        }

        let count = reservations.len();
        let event = Event::ReservationsRecorded {
            reservations: reservations
                .into_iter()
                .map(|(id, room_type_id, window, status)| Reservation { id, room_type_id, window, status })
                .collect(),
        };
        self.wal_append(&event).await?;
        for guard in &mut guards {
            apply_to_room_type(guard, &event, &self.entity_to_room_type);
        }
        info!("recorded batch of {count} reservations");
        Ok(())
    }

    /// Move a reservation to a new status. Terminal statuses are final.
    pub async fn set_reservation_status(&self, id: Ulid, status: ReservationStatus) -> Result<Ulid, EngineError> {
        let _permit = self.write_permit().await;
        let (room_type_id, mut guard) = self.resolve_entity_write(&id).await?;
        let current = guard
            .reservations
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.status)
            .ok_or(EngineError::NotFound(id))?;
        if current == status {
            return Ok(room_type_id);
        }
        if current.is_terminal() {
            return Err(EngineError::InvalidTransition { id, from: current, to: status });
        }

        let event = Event::ReservationStatusChanged { id, room_type_id, status };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::debug!("reservation {id}: {current} -> {status}");
        Ok(room_type_id)
    }

    /// Rewrite the WAL with only the events needed to recreate the current state.
    /// Writers wait until the rewritten log is in place.
    pub async fn compact_wal(&self) -> Result<usize, EngineError> {
        let _exclusive = self.compaction_gate.write().await;
        let events = self.snapshot_events().await;
        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        Ok(count)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
