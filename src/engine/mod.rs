mod access;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use access::authorize_access;
pub use conflict::first_conflict;
pub use error::EngineError;

use std::sync::Arc;

use serde::Serialize;
use ulid::Ulid;

use crate::locks::{KeyGuard, KeyedLocks};
use crate::model::*;
use crate::store::{ReservationStore, SpaceCatalog};
use crate::window::Window;

/// A window that passed admission for one space on one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Admission {
    pub space_id: Ulid,
    pub day: Day,
    pub window: Window,
}

/// Reservation admission engine: the only path through which reservations are
/// created or changed.
///
/// Admission for one (space, day) runs under that slot's lock, so the
/// availability scan and the write behave as one critical section. Reads take
/// no lock.
pub struct Engine {
    catalog: Arc<dyn SpaceCatalog>,
    store: Arc<dyn ReservationStore>,
    admission: KeyedLocks<SlotKey>,
}

impl Engine {
    pub fn new(catalog: Arc<dyn SpaceCatalog>, store: Arc<dyn ReservationStore>) -> Self {
        Self {
            catalog,
            store,
            admission: KeyedLocks::new(),
        }
    }

    /// Space must exist and accept reservations.
    pub(super) async fn resolve_active_space(&self, space_id: Ulid) -> Result<Space, EngineError> {
        let space = self
            .catalog
            .get_space(space_id)
            .await?
            .ok_or(EngineError::SpaceNotFound(space_id))?;
        if !space.active {
            return Err(EngineError::SpaceInactive(space_id));
        }
        Ok(space)
    }

    pub(super) async fn load(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(EngineError::NotFound(id))
    }

    /// Lock the slot holding `id` (plus `extra`) and load the record under it,
    /// retrying if it moved while we waited.
    pub(super) async fn lock_reservation(
        &self,
        id: Ulid,
        extra: Option<SlotKey>,
    ) -> Result<(Reservation, Vec<KeyGuard<SlotKey>>), EngineError> {
        loop {
            let slot = self.load(id).await?.slot();
            let mut keys = vec![slot];
            keys.extend(extra);
            let guards = self.admission.lock_all(keys).await;
            let current = self.load(id).await?;
            if current.slot() == slot {
                return Ok((current, guards));
            }
        }
    }

    /// Active reservations for one slot.
    pub(super) async fn active_in_slot(
        &self,
        space_id: Ulid,
        day: Day,
    ) -> Result<Vec<Reservation>, EngineError> {
        Ok(self
            .store
            .find_by_space_and_day(space_id, day, &[ReservationStatus::Cancelled])
            .await?)
    }

    /// Fail with `Conflict` on the first active reservation overlapping `window`.
    pub(super) async fn scan_slot(
        &self,
        space_id: Ulid,
        day: Day,
        window: &Window,
        exclude: Option<Ulid>,
    ) -> Result<(), EngineError> {
        let existing = self.active_in_slot(space_id, day).await?;
        match first_conflict(window, &existing, exclude) {
            Some(hit) => Err(EngineError::Conflict {
                reservation_id: hit.id,
                window: hit.window,
            }),
            None => Ok(()),
        }
    }
}
