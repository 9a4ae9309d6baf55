use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::wal::Wal;
use super::{Occupant, Store, StoreError};

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
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
/// 2. Drain all immediately available Appends (the batch window).
/// 3. Single sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.push(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so buffered bytes don't leak into the next batch.
    let flush_err = wal.sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
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
            let _ = response.send(wal.rewrite(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Apply an event to one room (no locking — caller holds the lock).
fn apply_to_room(rs: &mut RoomState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::RecurringClassAdded { class } => {
            rs.classes.push(class.clone());
            entity_map.insert(class.id, class.room_id);
        }
        Event::RecurringClassRemoved { id, .. } => {
            rs.remove_class(*id);
            entity_map.remove(id);
        }
        Event::ReservationInserted { reservation } => {
            rs.insert_reservation(reservation.clone());
            entity_map.insert(reservation.id, reservation.room_id);
        }
        Event::ReservationReplaced { reservation, .. } => {
            rs.remove_reservation(reservation.id);
            if rs.room.id == reservation.room_id {
                rs.insert_reservation(reservation.clone());
                entity_map.insert(reservation.id, reservation.room_id);
            }
        }
        Event::ReservationDeleted { id, .. } => {
            rs.remove_reservation(*id);
            entity_map.remove(id);
        }
        // Directory events are handled at the map level.
        Event::BuildingCreated { .. } | Event::RoomCreated { .. } => {}
    }
}

/// Storage-layer overlap constraint for approved reservations.
fn check_no_conflict(rs: &RoomState, reservation: &Reservation) -> Result<(), StoreError> {
    if !reservation.is_approved() {
        return Ok(());
    }
    if let Some(class) = rs.class_conflict(&reservation.span) {
        return Err(StoreError::Conflict(Occupant::RecurringClass(class.id)));
    }
    if let Some(other) = rs
        .overlapping(&reservation.span)
        .find(|r| r.id != reservation.id && r.is_approved())
    {
        return Err(StoreError::Conflict(Occupant::Reservation(other.id)));
    }
    Ok(())
}

/// In-memory store made durable by a group-committed write-ahead log.
pub struct WalStore {
    rooms: DashMap<Ulid, SharedRoomState>,
    buildings: DashMap<Ulid, Building>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: reservation/class id → room id
    entity_to_room: DashMap<Ulid, Ulid>,
    /// Held by building/room creation across append and insert, and by compaction.
    directory: Mutex<()>,
}

impl WalStore {
    /// Replay `wal_path` and start the writer task. Must run inside a Tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            rooms: DashMap::new(),
            buildings: DashMap::new(),
            wal_tx,
            entity_to_room: DashMap::new(),
            directory: Mutex::new(()),
        };

        // Sole owner of every Arc here, so try_write never contends. Never use
        // blocking_write: this may run inside an async context.
        for event in &events {
            match event {
                Event::BuildingCreated { building } => {
                    store.buildings.insert(building.id, building.clone());
                }
                Event::RoomCreated { room } => {
                    store
                        .rooms
                        .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
                }
                other => {
                    for room_id in other.room_ids() {
                        if let Some(entry) = store.rooms.get(&room_id) {
                            let rs = entry.value().clone();
                            let mut guard = rs.try_write().expect("replay: uncontended write");
                            apply_to_room(&mut guard, other, &store.entity_to_room);
                        }
                    }
                }
            }
        }

        info!(
            "store opened: {} events replayed, {} rooms",
            events.len(),
            store.rooms.len()
        );
        Ok(store)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    fn room_state(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    fn all_rooms(&self) -> Vec<SharedRoomState> {
        self.rooms.iter().map(|e| e.value().clone()).collect()
    }

    /// WAL-append then apply, with the room lock held throughout.
    async fn persist_and_apply(&self, rs: &mut RoomState, event: &Event) -> Result<(), StoreError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.entity_to_room);
        Ok(())
    }

    /// Lookup entity → room, acquire the room's write lock.
    async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<RoomState>), StoreError> {
        let room_id = self
            .entity_to_room
            .get(entity_id)
            .map(|e| *e.value())
            .ok_or(StoreError::NotFound(*entity_id))?;
        let rs = self
            .room_state(&room_id)
            .ok_or(StoreError::NotFound(room_id))?;
        Ok((room_id, rs.write_owned().await))
    }

    /// Rewrite the WAL with only the events needed to recreate the current state.
    ///
    /// The directory lock and a read lock on every room are held until the
    /// writer has swapped the file, so no write can be acknowledged into the
    /// log being replaced. Room locks are taken in id order, like two-room updates.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _directory = self.directory.lock().await;

        let mut rooms: Vec<(Ulid, SharedRoomState)> = self
            .rooms
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        rooms.sort_by_key(|(id, _)| *id);
        let mut guards = Vec::with_capacity(rooms.len());
        for (_, rs) in rooms {
            guards.push(rs.read_owned().await);
        }

        let mut buildings: Vec<Building> =
            self.buildings.iter().map(|e| e.value().clone()).collect();
        buildings.sort_by_key(|b| b.id);
        let mut events: Vec<Event> = buildings
            .into_iter()
            .map(|building| Event::BuildingCreated { building })
            .collect();
        for guard in &guards {
            events.push(Event::RoomCreated {
                room: guard.room.clone(),
            });
            events.extend(guard.classes.iter().map(|c| Event::RecurringClassAdded {
                class: c.clone(),
            }));
            events.extend(guard.reservations.iter().map(|r| Event::ReservationInserted {
                reservation: r.clone(),
            }));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()));
        drop(guards);
        result
    }

    pub async fn appends_since_compact(&self) -> u64 {
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

#[async_trait]
impl Store for WalStore {
    async fn list_buildings(&self) -> Result<Vec<Building>, StoreError> {
        let mut out: Vec<Building> = self.buildings.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn list_rooms(&self, building_id: Ulid) -> Result<Vec<Room>, StoreError> {
        let mut out = Vec::new();
        for rs in self.all_rooms() {
            let guard = rs.read().await;
            if guard.room.building_id == building_id {
                out.push(guard.room.clone());
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn get_room(&self, room_id: Ulid) -> Result<Option<Room>, StoreError> {
        match self.room_state(&room_id) {
            Some(rs) => Ok(Some(rs.read().await.room.clone())),
            None => Ok(None),
        }
    }

    async fn list_recurring_classes(
        &self,
        room_id: Ulid,
    ) -> Result<Vec<RecurringClass>, StoreError> {
        let Some(rs) = self.room_state(&room_id) else {
            return Ok(vec![]);
        };
        let mut out = rs.read().await.classes.clone();
        out.sort_by_key(|c| (c.weekday.num_days_from_monday(), c.start));
        Ok(out)
    }

    async fn list_reservations_by_room(
        &self,
        room_id: Ulid,
        window: Span,
    ) -> Result<Vec<Reservation>, StoreError> {
        let Some(rs) = self.room_state(&room_id) else {
            return Ok(vec![]);
        };
        let guard = rs.read().await;
        Ok(guard.overlapping(&window).cloned().collect())
    }

    async fn list_reservations_by_owner(
        &self,
        owner_id: Ulid,
    ) -> Result<Vec<Reservation>, StoreError> {
        let mut out = Vec::new();
        for rs in self.all_rooms() {
            let guard = rs.read().await;
            out.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| r.owner_id == owner_id)
                    .cloned(),
            );
        }
        out.sort_by(|a, b| b.span.start.cmp(&a.span.start));
        Ok(out)
    }

    async fn get_reservation(&self, id: Ulid) -> Result<Option<Reservation>, StoreError> {
        let Some(room_id) = self.entity_to_room.get(&id).map(|e| *e.value()) else {
            return Ok(None);
        };
        let Some(rs) = self.room_state(&room_id) else {
            return Ok(None);
        };
        let guard = rs.read().await;
        Ok(guard.reservations.iter().find(|r| r.id == id).cloned())
    }

    async fn insert_reservation(&self, reservation: Reservation) -> Result<(), StoreError> {
        if self.entity_to_room.contains_key(&reservation.id) {
            return Err(StoreError::AlreadyExists(reservation.id));
        }
        if reservation.note.as_ref().is_some_and(|n| n.len() > MAX_NOTE_LEN) {
            return Err(StoreError::LimitExceeded("note too long"));
        }
        let rs = self
            .room_state(&reservation.room_id)
            .ok_or(StoreError::NotFound(reservation.room_id))?;
        let mut guard = rs.write().await;
        check_no_conflict(&guard, &reservation)?;

        let id = reservation.id;
        let event = Event::ReservationInserted { reservation };
        self.persist_and_apply(&mut guard, &event).await?;
        debug!("reservation {id} stored");
        Ok(())
    }

    async fn update_reservation(&self, reservation: Reservation) -> Result<(), StoreError> {
        if reservation.note.as_ref().is_some_and(|n| n.len() > MAX_NOTE_LEN) {
            return Err(StoreError::LimitExceeded("note too long"));
        }
        let previous_room_id = self
            .entity_to_room
            .get(&reservation.id)
            .map(|e| *e.value())
            .ok_or(StoreError::NotFound(reservation.id))?;
        let new_room_id = reservation.room_id;
        let new_rs = self
            .room_state(&new_room_id)
            .ok_or(StoreError::NotFound(new_room_id))?;

        if previous_room_id == new_room_id {
            let mut guard = new_rs.write().await;
            if !guard.reservations.iter().any(|r| r.id == reservation.id) {
                return Err(StoreError::NotFound(reservation.id));
            }
            check_no_conflict(&guard, &reservation)?;
            let event = Event::ReservationReplaced {
                previous_room_id,
                reservation,
            };
            return self.persist_and_apply(&mut guard, &event).await;
        }

        // Moving rooms: lock both in id order to avoid deadlocks.
        let old_rs = self
            .room_state(&previous_room_id)
            .ok_or(StoreError::NotFound(previous_room_id))?;
        let (mut old_guard, mut new_guard) = if previous_room_id < new_room_id {
            let old = old_rs.write_owned().await;
            (old, new_rs.write_owned().await)
        } else {
            let new = new_rs.write_owned().await;
            (old_rs.write_owned().await, new)
        };
        if !old_guard.reservations.iter().any(|r| r.id == reservation.id) {
            return Err(StoreError::NotFound(reservation.id));
        }
        check_no_conflict(&new_guard, &reservation)?;

        let event = Event::ReservationReplaced {
            previous_room_id,
            reservation,
        };
        self.wal_append(&event).await?;
        apply_to_room(&mut old_guard, &event, &self.entity_to_room);
        apply_to_room(&mut new_guard, &event, &self.entity_to_room);
        Ok(())
    }

    async fn delete_reservation(&self, id: Ulid) -> Result<(), StoreError> {
        let (room_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.reservations.iter().any(|r| r.id == id) {
            return Err(StoreError::NotFound(id));
        }
        let event = Event::ReservationDeleted { id, room_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    async fn insert_recurring_class(
        &self,
        class: RecurringClass,
        from: Instant,
    ) -> Result<(), StoreError> {
        if self.entity_to_room.contains_key(&class.id) {
            return Err(StoreError::AlreadyExists(class.id));
        }
        if class.name.len() > MAX_NAME_LEN {
            return Err(StoreError::LimitExceeded("class name too long"));
        }
        let rs = self
            .room_state(&class.room_id)
            .ok_or(StoreError::NotFound(class.room_id))?;
        let mut guard = rs.write().await;
        if let Some(r) = guard.reservation_clash(&class, from) {
            return Err(StoreError::Conflict(Occupant::Reservation(r.id)));
        }
        let event = Event::RecurringClassAdded { class };
        self.persist_and_apply(&mut guard, &event).await
    }

    async fn delete_recurring_class(&self, id: Ulid) -> Result<(), StoreError> {
        let (room_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.classes.iter().any(|c| c.id == id) {
            return Err(StoreError::NotFound(id));
        }
        let event = Event::RecurringClassRemoved { id, room_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    async fn insert_building(&self, building: Building) -> Result<(), StoreError> {
        let _directory = self.directory.lock().await;
        if self.buildings.contains_key(&building.id) {
            return Err(StoreError::AlreadyExists(building.id));
        }
        if building.name.len() > MAX_NAME_LEN {
            return Err(StoreError::LimitExceeded("building name too long"));
        }
        let event = Event::BuildingCreated {
            building: building.clone(),
        };
        self.wal_append(&event).await?;
        self.buildings.insert(building.id, building);
        Ok(())
    }

    async fn insert_room(&self, room: Room) -> Result<(), StoreError> {
        let _directory = self.directory.lock().await;
        if self.rooms.contains_key(&room.id) {
            return Err(StoreError::AlreadyExists(room.id));
        }
        if !self.buildings.contains_key(&room.building_id) {
            return Err(StoreError::NotFound(room.building_id));
        }
        if room.name.len() > MAX_NAME_LEN {
            return Err(StoreError::LimitExceeded("room name too long"));
        }
        if room.capacity == 0 || room.capacity > MAX_ROOM_CAPACITY {
            return Err(StoreError::LimitExceeded("room capacity out of range"));
        }
        let event = Event::RoomCreated { room: room.clone() };
        self.wal_append(&event).await?;
        self.rooms
            .insert(room.id, Arc::new(RwLock::new(RoomState::new(room))));
        Ok(())
    }
}
