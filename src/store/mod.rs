//! Persistence collaborator: the data-access operations the booking core needs,
//! plus a write-ahead-logged in-memory implementation.

mod engine;
mod wal;

pub use engine::WalStore;
pub use wal::Wal;

use async_trait::async_trait;
use thiserror::Error;
use ulid::Ulid;

use crate::model::{Building, Instant, RecurringClass, Reservation, Room, Span};

/// What a refused write collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occupant {
    Reservation(Ulid),
    RecurringClass(Ulid),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("overlaps existing {0:?}")]
    Conflict(Occupant),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    Wal(String),
}

/// Abstract data store. Every call is an independent async round-trip; callers
/// get no ordering guarantee between concurrent calls.
#[async_trait]
pub trait Store: Send + Sync {
    async fn list_buildings(&self) -> Result<Vec<Building>, StoreError>;
    async fn list_rooms(&self, building_id: Ulid) -> Result<Vec<Room>, StoreError>;
    async fn get_room(&self, room_id: Ulid) -> Result<Option<Room>, StoreError>;

    async fn list_recurring_classes(&self, room_id: Ulid)
    -> Result<Vec<RecurringClass>, StoreError>;

    /// Reservations on `room_id` whose interval overlaps `window`, sorted by start.
    async fn list_reservations_by_room(
        &self,
        room_id: Ulid,
        window: Span,
    ) -> Result<Vec<Reservation>, StoreError>;

    /// Newest first.
    async fn list_reservations_by_owner(&self, owner_id: Ulid)
    -> Result<Vec<Reservation>, StoreError>;

    async fn get_reservation(&self, id: Ulid) -> Result<Option<Reservation>, StoreError>;

    async fn insert_reservation(&self, reservation: Reservation) -> Result<(), StoreError>;
    /// Full replace by id. The room may change.
    async fn update_reservation(&self, reservation: Reservation) -> Result<(), StoreError>;
    async fn delete_reservation(&self, id: Ulid) -> Result<(), StoreError>;

    /// Refused with `Conflict` if an occurrence would overlap an approved
    /// reservation that has not ended by `from`.
    async fn insert_recurring_class(
        &self,
        class: RecurringClass,
        from: Instant,
    ) -> Result<(), StoreError>;
    async fn delete_recurring_class(&self, id: Ulid) -> Result<(), StoreError>;

    async fn insert_building(&self, building: Building) -> Result<(), StoreError>;
    async fn insert_room(&self, room: Room) -> Result<(), StoreError>;
}
