use async_trait::async_trait;
use ulid::Ulid;

use crate::model::*;
use crate::service::InventorySource;

use super::{Engine, EngineError};

impl Engine {
    pub fn property_info(&self, id: &Ulid) -> Option<PropertyInfo> {
        self.properties.get(id).map(|p| p.value().clone())
    }

    pub async fn room_type_info(&self, id: &Ulid) -> Option<RoomTypeInfo> {
        let rt = self.get_room_type(id)?;
        let guard = rt.read().await;
        Some(guard.info.clone())
    }

    pub fn list_properties(&self) -> Vec<PropertyInfo> {
        let mut properties: Vec<PropertyInfo> = self.properties.iter().map(|e| e.value().clone()).collect();
        properties.sort_by_key(|p| p.id);
        properties
    }

    pub async fn list_room_types(&self, property_id: Option<Ulid>) -> Vec<RoomTypeInfo> {
        let handles: Vec<_> = self.room_types.iter().map(|e| e.value().clone()).collect();
        let mut infos = Vec::with_capacity(handles.len());
        for rt in handles {
            let guard = rt.read().await;
            if property_id.is_none_or(|pid| guard.info.property_id == pid) {
                infos.push(guard.info.clone());
            }
        }
        infos.sort_by_key(|i| i.id);
        infos
    }

    pub async fn list_rooms(&self, room_type_id: Ulid) -> Result<Vec<Room>, EngineError> {
        let rt = self
            .get_room_type(&room_type_id)
            .ok_or(EngineError::NotFound(room_type_id))?;
        let guard = rt.read().await;
        Ok(guard.rooms.clone())
    }

    /// Reservations of a room type in check-in order, every status included.
    pub async fn list_reservations(&self, room_type_id: Ulid) -> Result<Vec<Reservation>, EngineError> {
        let rt = self
            .get_room_type(&room_type_id)
            .ok_or(EngineError::NotFound(room_type_id))?;
        let guard = rt.read().await;
        Ok(guard.reservations.clone())
    }

    /// Minimal event list that recreates the current state on replay:
    /// properties, then each room type followed by its rooms and reservations.
    pub async fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();

        for property in self.list_properties() {
            events.push(Event::PropertyCreated {
                id: property.id,
                name: property.name,
                active: property.active,
            });
        }

        let mut handles: Vec<_> = self
            .room_types
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        handles.sort_by_key(|(id, _)| *id);

        for (_, rt) in handles {
            let guard = rt.read().await;
            let info = &guard.info;
            events.push(Event::RoomTypeCreated {
                id: info.id,
                property_id: info.property_id,
                name: info.name.clone(),
                active: info.active,
            });
            for room in &guard.rooms {
                events.push(Event::RoomAdded {
                    id: room.id,
                    room_type_id: info.id,
                    number: room.number.clone(),
                    status: room.status,
                });
            }
            for reservation in &guard.reservations {
                events.push(Event::ReservationRecorded {
                    id: reservation.id,
                    room_type_id: info.id,
                    window: reservation.window,
                    status: reservation.status,
                });
            }
        }

        events
    }
}

#[async_trait]
impl InventorySource for Engine {
    async fn property(&self, id: Ulid) -> Result<Option<PropertyInfo>, EngineError> {
        Ok(self.property_info(&id))
    }

    async fn room_type(&self, property_id: Ulid, id: Ulid) -> Result<Option<RoomTypeInfo>, EngineError> {
        Ok(self
            .room_type_info(&id)
            .await
            .filter(|info| info.property_id == property_id))
    }

    async fn count_rooms(
        &self,
        property_id: Ulid,
        room_type_id: Ulid,
        statuses: &[RoomStatus],
    ) -> Result<u32, EngineError> {
        let rt = self
            .get_room_type(&room_type_id)
            .ok_or(EngineError::NotFound(room_type_id))?;
        let guard = rt.read().await;
        if guard.info.property_id != property_id {
            return Err(EngineError::NotFound(room_type_id));
        }
        Ok(guard.count_rooms(statuses))
    }
}
