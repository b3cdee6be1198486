mod catalog;
mod durable;
mod memory;

pub use catalog::InMemoryCatalog;
pub use durable::WalStore;
pub use memory::InMemoryStore;

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::{Day, Reservation, ReservationStatus, Space};
use crate::window::Window;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A conditional write found an active reservation overlapping the record.
    Overlap { reservation_id: Ulid, window: Window },
    NotFound(Ulid),
    AlreadyExists(Ulid),
    Io(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Overlap { reservation_id, window } => {
                write!(f, "overlaps reservation {reservation_id} at {window}")
            }
            StoreError::NotFound(id) => write!(f, "reservation not found: {id}"),
            StoreError::AlreadyExists(id) => write!(f, "reservation already exists: {id}"),
            StoreError::Io(e) => write!(f, "storage I/O error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Read-only view of the space catalog.
#[async_trait]
pub trait SpaceCatalog: Send + Sync {
    async fn get_space(&self, id: Ulid) -> Result<Option<Space>, StoreError>;
}

/// Reservation persistence.
///
/// `insert` and `update_by_id` are conditional writes: when the record being
/// written is active, they fail with [`StoreError::Overlap`] if another active
/// record on the same space and day overlaps its window. This is the last line
/// of defence against two writers that both passed a read-only scan.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn find_by_space_and_day(
        &self,
        space_id: Ulid,
        day: Day,
        status_not_in: &[ReservationStatus],
    ) -> Result<Vec<Reservation>, StoreError>;

    async fn find_by_id(&self, id: Ulid) -> Result<Option<Reservation>, StoreError>;

    /// All reservations, or only those owned by `owner_id`.
    async fn find_all(&self, owner_id: Option<Ulid>) -> Result<Vec<Reservation>, StoreError>;

    async fn insert(&self, reservation: Reservation) -> Result<Reservation, StoreError>;

    /// Replace the stored record with the same id. The record may move to a
    /// different space or day.
    async fn update_by_id(&self, reservation: Reservation) -> Result<Reservation, StoreError>;

    async fn delete_by_id(&self, id: Ulid) -> Result<Reservation, StoreError>;
}
