mod availability;
mod error;
mod mutations;
mod overlap;
mod queries;

pub use availability::{compute_availability, occupancy_histogram};
pub use error::EngineError;
pub use overlap::{intersects, OverlapShape};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedRoomTypeState = Arc<RwLock<RoomTypeState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                while let Ok(next) = rx.try_recv() {
                    match next {
                        WalCommand::Append { event, response } => batch.push((event, response)),
                        other => {
                            // Flush what we have before handling the non-append command
                            deferred = Some(other);
                            break;
                        }
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for batch of {}: {e}", batch.len());
    }
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            // Every sender in the batch is told it failed, so none of it may land.
            wal.discard_pending();
            return Err(e);
        }
    }
    wal.flush_sync()
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// In-memory inventory of one tenant: properties, room types, and each room
/// type's rooms and reservations. Every mutation is durably appended to the
/// WAL before it becomes visible.
pub struct Engine {
    properties: DashMap<Ulid, PropertyInfo>,
    room_types: DashMap<Ulid, SharedRoomTypeState>,
    /// Reverse lookup: entity (room/reservation) id → room type id
    entity_to_room_type: DashMap<Ulid, Ulid>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Writers share it from WAL append until the event is applied; compaction
    /// takes it exclusively, so its snapshot holds every acknowledged write.
    compaction_gate: RwLock<()>,
}

/// Apply an event to a room type's state. The caller holds its write lock.
fn apply_to_room_type(rt: &mut RoomTypeState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::RoomTypeDeactivated { .. } => {
            rt.info.active = false;
        }
        Event::RoomAdded {
            id,
            room_type_id,
            number,
            status,
        } => {
            rt.rooms.push(Room {
                id: *id,
                room_type_id: *room_type_id,
                number: number.clone(),
                status: *status,
            });
            entity_map.insert(*id, *room_type_id);
        }
        Event::RoomStatusChanged { id, status, .. } => {
            if let Some(room) = rt.room_mut(*id) {
                room.status = *status;
            }
        }
        Event::ReservationRecorded {
            id,
            room_type_id,
            window,
            status,
        } => {
            rt.insert_reservation(Reservation {
                id: *id,
                room_type_id: *room_type_id,
                window: *window,
                status: *status,
            });
            entity_map.insert(*id, *room_type_id);
        }
        Event::ReservationStatusChanged { id, status, .. } => {
            if let Some(reservation) = rt.reservation_mut(*id) {
                reservation.status = *status;
            }
        }
        Event::ReservationsRecorded { reservations } => {
            let own_id = rt.info.id;
            for reservation in reservations.iter().filter(|r| r.room_type_id == own_id) {
                entity_map.insert(reservation.id, reservation.room_type_id);
                rt.insert_reservation(reservation.clone());
            }
        }
        // Property events and RoomTypeCreated are handled at the DashMap level, not here
        Event::PropertyCreated { .. } | Event::PropertyDeactivated { .. } | Event::RoomTypeCreated { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            properties: DashMap::new(),
            room_types: DashMap::new(),
            entity_to_room_type: DashMap::new(),
            wal_tx,
            compaction_gate: RwLock::new(()),
        };

        // Replay events. We're the sole owner of these Arcs, so try_write
        // always succeeds instantly. Never use blocking_write here because this
        // may run inside an async context (e.g. lazy tenant creation).
        for event in &events {
            engine.apply_event(event);
        }
        tracing::info!("replayed {} events from {}", events.len(), wal_path.display());

        Ok(engine)
    }

    /// Apply an already-persisted event to in-memory state.
    fn apply_event(&self, event: &Event) {
        match event {
            Event::PropertyCreated { id, name, active } => {
                self.properties.insert(
                    *id,
                    PropertyInfo {
                        id: *id,
                        name: name.clone(),
                        active: *active,
                    },
                );
            }
            Event::PropertyDeactivated { id } => {
                if let Some(mut property) = self.properties.get_mut(id) {
                    property.active = false;
                }
            }
            Event::RoomTypeCreated {
                id,
                property_id,
                name,
                active,
            } => {
                let rt = RoomTypeState::new(RoomTypeInfo {
                    id: *id,
                    property_id: *property_id,
                    name: name.clone(),
                    active: *active,
                });
                self.room_types.insert(*id, Arc::new(RwLock::new(rt)));
            }
            Event::ReservationsRecorded { reservations } => {
                let mut room_type_ids: Vec<Ulid> = reservations.iter().map(|r| r.room_type_id).collect();
                room_type_ids.sort();
                room_type_ids.dedup();
                for room_type_id in room_type_ids {
                    self.apply_replayed(room_type_id, event);
                }
            }
            other => {
                if let Some(room_type_id) = event_room_type_id(other) {
                    self.apply_replayed(room_type_id, other);
                }
            }
        }
    }

    fn apply_replayed(&self, room_type_id: Ulid, event: &Event) {
        let Some(rt_arc) = self.get_room_type(&room_type_id) else {
            return;
        };
        match rt_arc.try_write() {
            Ok(mut guard) => apply_to_room_type(&mut guard, event, &self.entity_to_room_type),
            Err(_) => tracing::error!("replay: room type {room_type_id} unexpectedly locked"),
        }
    }

    /// Held by every mutation across its WAL append and apply.
    async fn write_permit(&self) -> tokio::sync::RwLockReadGuard<'_, ()> {
        self.compaction_gate.read().await
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_room_type(&self, id: &Ulid) -> Option<SharedRoomTypeState> {
        self.room_types.get(id).map(|e| e.value().clone())
    }

    pub fn get_room_type_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_room_type.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply in one call.
    async fn persist_and_apply(&self, rt: &mut RoomTypeState, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room_type(rt, event, &self.entity_to_room_type);
        Ok(())
    }

    /// Lookup entity → room type, get room type, acquire write lock.
    async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<RoomTypeState>), EngineError> {
        let room_type_id = self
            .get_room_type_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let rt = self
            .get_room_type(&room_type_id)
            .ok_or(EngineError::NotFound(room_type_id))?;
        let guard = rt.write_owned().await;
        Ok((room_type_id, guard))
    }
}

/// Extract the room type id from an event scoped to one room type.
fn event_room_type_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::RoomTypeDeactivated { id } => Some(*id),
        Event::RoomAdded { room_type_id, .. }
        | Event::RoomStatusChanged { room_type_id, .. }
        | Event::ReservationRecorded { room_type_id, .. }
        | Event::ReservationStatusChanged { room_type_id, .. } => Some(*room_type_id),
        Event::PropertyCreated { .. }
        | Event::PropertyDeactivated { .. }
        | Event::RoomTypeCreated { .. }
        | Event::ReservationsRecorded { .. } => None,
    }
}
