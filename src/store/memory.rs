use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::engine::first_conflict;
use crate::model::*;

use super::{ReservationStore, StoreError};

/// Conditional writes hold the record's `index` entry for their whole
/// duration and take slot entries only inside it, so a write and a delete of
/// the same id never interleave. Reads never hold both maps at once.
pub struct InMemoryStore {
    /// Reservations per (space, day), sorted by window start.
    slots: DashMap<SlotKey, Vec<Reservation>>,
    /// Reverse lookup: reservation id → slot.
    index: DashMap<Ulid, SlotKey>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Insert keeping the slot sorted by start; replaces any record with the same id.
fn place(slot: &mut Vec<Reservation>, reservation: Reservation) {
    slot.retain(|r| r.id != reservation.id);
    let pos = slot.partition_point(|r| r.window.start() <= reservation.window.start());
    slot.insert(pos, reservation);
}

fn ensure_free(slot: &[Reservation], candidate: &Reservation) -> Result<(), StoreError> {
    if !candidate.is_active() {
        return Ok(());
    }
    match first_conflict(&candidate.window, slot, Some(candidate.id)) {
        Some(existing) => Err(StoreError::Overlap {
            reservation_id: existing.id,
            window: existing.window,
        }),
        None => Ok(()),
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            index: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn slot_of(&self, id: &Ulid) -> Option<SlotKey> {
        self.index.get(id).map(|e| *e.value())
    }

    pub fn get(&self, id: &Ulid) -> Option<Reservation> {
        let key = self.slot_of(id)?;
        self.slots.get(&key)?.iter().find(|r| r.id == *id).cloned()
    }

    pub fn slot(&self, key: &SlotKey) -> Vec<Reservation> {
        self.slots
            .get(key)
            .map(|slot| slot.value().clone())
            .unwrap_or_default()
    }

    pub fn all(&self) -> Vec<Reservation> {
        self.slots
            .iter()
            .flat_map(|slot| slot.value().clone())
            .collect()
    }

    /// Would writing `candidate` keep its slot free of overlapping active records?
    pub fn check(&self, candidate: &Reservation) -> Result<(), StoreError> {
        match self.slots.get(&candidate.slot()) {
            Some(slot) => ensure_free(&slot, candidate),
            None => Ok(()),
        }
    }

    /// Unconditional write. Used for replay, and by callers that already ran
    /// `check` under their own lock.
    pub fn apply(&self, event: &Event) {
        match event {
            Event::ReservationInserted { reservation } | Event::ReservationUpdated { reservation } => {
                self.put(reservation.clone());
            }
            Event::ReservationDeleted { id, .. } => {
                self.remove(id);
            }
        }
    }

    fn put(&self, reservation: Reservation) {
        let id = reservation.id;
        let key = reservation.slot();
        if let Some(old) = self.slot_of(&id)
            && old != key {
                self.detach(&old, &id);
            }
        place(&mut self.slots.entry(key).or_default(), reservation);
        self.index.insert(id, key);
    }

    fn remove(&self, id: &Ulid) -> Option<Reservation> {
        match self.index.entry(*id) {
            Entry::Occupied(entry) => {
                let removed = self.detach(entry.get(), id);
                entry.remove();
                removed
            }
            Entry::Vacant(_) => None,
        }
    }

    fn detach(&self, key: &SlotKey, id: &Ulid) -> Option<Reservation> {
        let removed = self.slots.get_mut(key).and_then(|mut slot| {
            let pos = slot.iter().position(|r| r.id == *id)?;
            Some(slot.remove(pos))
        });
        self.slots.remove_if(key, |_, slot| slot.is_empty());
        removed
    }

    /// Check and write while holding the slot's map entry, so no other writer
    /// can slip in between.
    fn write_checked(&self, reservation: &Reservation) -> Result<(), StoreError> {
        let key = reservation.slot();
        let result = {
            let mut slot = self.slots.entry(key).or_default();
            ensure_free(&slot, reservation).map(|()| place(&mut slot, reservation.clone()))
        };
        if result.is_err() {
            self.slots.remove_if(&key, |_, slot| slot.is_empty());
        }
        result
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn find_by_space_and_day(
        &self,
        space_id: Ulid,
        day: Day,
        status_not_in: &[ReservationStatus],
    ) -> Result<Vec<Reservation>, StoreError> {
        let mut found = self.slot(&(space_id, day));
        found.retain(|r| !status_not_in.contains(&r.status));
        Ok(found)
    }

    async fn find_by_id(&self, id: Ulid) -> Result<Option<Reservation>, StoreError> {
        Ok(self.get(&id))
    }

    async fn find_all(&self, owner_id: Option<Ulid>) -> Result<Vec<Reservation>, StoreError> {
        let mut found = self.all();
        if let Some(owner_id) = owner_id {
            found.retain(|r| r.owner_id == owner_id);
        }
        Ok(found)
    }

    async fn insert(&self, reservation: Reservation) -> Result<Reservation, StoreError> {
        match self.index.entry(reservation.id) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(reservation.id)),
            Entry::Vacant(entry) => {
                self.write_checked(&reservation)?;
                entry.insert(reservation.slot());
                Ok(reservation)
            }
        }
    }

    async fn update_by_id(&self, reservation: Reservation) -> Result<Reservation, StoreError> {
        let id = reservation.id;
        let Entry::Occupied(mut entry) = self.index.entry(id) else {
            return Err(StoreError::NotFound(id));
        };
        let old = *entry.get();
        self.write_checked(&reservation)?;
        if old != reservation.slot() {
            self.detach(&old, &id);
        }
        entry.insert(reservation.slot());
        Ok(reservation)
    }

    async fn delete_by_id(&self, id: Ulid) -> Result<Reservation, StoreError> {
        self.remove(&id).ok_or(StoreError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::Window;
    use std::sync::{Arc, Barrier};

    fn reservation(space_id: Ulid, day: &str, start: &str, end: &str) -> Reservation {
        Reservation {
            id: Ulid::new(),
            owner_id: Ulid::new(),
            space_id,
            day: day.parse().unwrap(),
            window: Window::parse(start, end).unwrap(),
            status: ReservationStatus::Confirmed,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn insert_rejects_overlap_in_same_slot() {
        let store = InMemoryStore::new();
        let space = Ulid::new();
        let first = store.insert(reservation(space, "2025-05-01", "09:00", "10:00")).await.unwrap();

        let err = store
            .insert(reservation(space, "2025-05-01", "09:30", "10:30"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::Overlap {
                reservation_id: first.id,
                window: first.window
            }
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn adjacent_other_day_and_other_space_are_free() {
        let store = InMemoryStore::new();
        let space = Ulid::new();
        store.insert(reservation(space, "2025-05-01", "09:00", "10:00")).await.unwrap();
        store.insert(reservation(space, "2025-05-01", "10:00", "11:00")).await.unwrap();
        store.insert(reservation(space, "2025-05-02", "09:00", "10:00")).await.unwrap();
        store.insert(reservation(Ulid::new(), "2025-05-01", "09:00", "10:00")).await.unwrap();
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn failed_insert_leaves_no_empty_slot() {
        let store = InMemoryStore::new();
        let space = Ulid::new();
        store.insert(reservation(space, "2025-05-01", "09:00", "10:00")).await.unwrap();
        let _ = store.insert(reservation(space, "2025-05-01", "09:00", "10:00")).await;
        assert_eq!(store.slots.len(), 1);
        assert_eq!(store.all().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_records_neither_block_nor_are_blocked() {
        let store = InMemoryStore::new();
        let space = Ulid::new();
        let mut first = store.insert(reservation(space, "2025-05-01", "09:00", "10:00")).await.unwrap();
        first.status = ReservationStatus::Cancelled;
        store.update_by_id(first.clone()).await.unwrap();

        store.insert(reservation(space, "2025-05-01", "09:30", "10:30")).await.unwrap();

        // Writing a cancelled record into a busy window is fine too.
        let mut ghost = reservation(space, "2025-05-01", "09:00", "10:00");
        ghost.status = ReservationStatus::Cancelled;
        store.insert(ghost).await.unwrap();

        let active = store
            .find_by_space_and_day(space, first.day, &[ReservationStatus::Cancelled])
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].window, Window::parse("09:30", "10:30").unwrap());
    }

    #[tokio::test]
    async fn update_does_not_conflict_with_itself() {
        let store = InMemoryStore::new();
        let space = Ulid::new();
        let mut r = store.insert(reservation(space, "2025-05-01", "09:00", "10:00")).await.unwrap();
        r.window = Window::parse("09:30", "10:30").unwrap();
        store.update_by_id(r.clone()).await.unwrap();
        assert_eq!(store.get(&r.id).unwrap().window, r.window);
    }

    #[tokio::test]
    async fn update_moves_between_slots() {
        let store = InMemoryStore::new();
        let space = Ulid::new();
        let mut r = store.insert(reservation(space, "2025-05-01", "09:00", "10:00")).await.unwrap();
        let old_slot = r.slot();
        r.day = "2025-05-03".parse().unwrap();
        store.update_by_id(r.clone()).await.unwrap();

        assert!(store.slot(&old_slot).is_empty());
        assert_eq!(store.slot(&r.slot()), vec![r.clone()]);
        assert_eq!(store.slot_of(&r.id), Some(r.slot()));
    }

    #[tokio::test]
    async fn rejected_update_keeps_original() {
        let store = InMemoryStore::new();
        let space = Ulid::new();
        store.insert(reservation(space, "2025-05-02", "09:00", "10:00")).await.unwrap();
        let mut r = store.insert(reservation(space, "2025-05-01", "09:00", "10:00")).await.unwrap();
        let original = r.clone();
        r.day = "2025-05-02".parse().unwrap();
        assert!(matches!(store.update_by_id(r).await, Err(StoreError::Overlap { .. })));
        assert_eq!(store.get(&original.id), Some(original));
    }

    #[tokio::test]
    async fn delete_and_missing_ids() {
        let store = InMemoryStore::new();
        let r = store.insert(reservation(Ulid::new(), "2025-05-01", "09:00", "10:00")).await.unwrap();
        assert_eq!(store.delete_by_id(r.id).await.unwrap(), r);
        assert_eq!(store.delete_by_id(r.id).await, Err(StoreError::NotFound(r.id)));
        assert_eq!(store.find_by_id(r.id).await.unwrap(), None);
        assert!(store.is_empty());
        assert!(matches!(store.update_by_id(r).await, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn update_racing_delete_never_brings_the_record_back() {
        let store = Arc::new(InMemoryStore::new());
        let space = Ulid::new();
        for _ in 0..2000 {
            let r = tokio_test::block_on(store.insert(reservation(space, "2025-05-01", "09:00", "10:00")))
                .unwrap();
            let barrier = Arc::new(Barrier::new(2));
            let deleter = {
                let store = store.clone();
                let barrier = barrier.clone();
                let id = r.id;
                std::thread::spawn(move || {
                    barrier.wait();
                    tokio_test::block_on(store.delete_by_id(id))
                })
            };
            let mut pending = r.clone();
            pending.status = ReservationStatus::Pending;
            barrier.wait();
            let updated = tokio_test::block_on(store.update_by_id(pending));
            let deleted = deleter.join().unwrap();

            assert!(deleted.is_ok());
            assert!(matches!(updated, Ok(_) | Err(StoreError::NotFound(_))));
            assert_eq!(store.get(&r.id), None);
            assert!(store.slot(&r.slot()).is_empty());
            assert!(store.is_empty());
        }
    }

    #[tokio::test]
    async fn find_all_filters_by_owner() {
        let store = InMemoryStore::new();
        let space = Ulid::new();
        let mine = store.insert(reservation(space, "2025-05-01", "09:00", "10:00")).await.unwrap();
        store.insert(reservation(space, "2025-05-01", "11:00", "12:00")).await.unwrap();
        assert_eq!(store.find_all(None).await.unwrap().len(), 2);
        assert_eq!(store.find_all(Some(mine.owner_id)).await.unwrap(), vec![mine]);
    }

    #[test]
    fn apply_keeps_slot_sorted() {
        let store = InMemoryStore::new();
        let space = Ulid::new();
        for (s, e) in [("15:00", "16:00"), ("08:00", "09:00"), ("11:00", "12:00")] {
            store.apply(&Event::ReservationInserted {
                reservation: reservation(space, "2025-05-01", s, e),
            });
        }
        let starts: Vec<String> = store
            .slot(&(space, "2025-05-01".parse().unwrap()))
            .iter()
            .map(|r| r.window.start().to_string())
            .collect();
        assert_eq!(starts, ["08:00", "11:00", "15:00"]);
    }

    #[test]
    fn apply_delete_is_idempotent() {
        let store = InMemoryStore::new();
        let r = reservation(Ulid::new(), "2025-05-01", "09:00", "10:00");
        store.apply(&Event::ReservationInserted { reservation: r.clone() });
        let delete = Event::ReservationDeleted { id: r.id, space_id: r.space_id, day: r.day };
        store.apply(&delete);
        store.apply(&delete);
        assert!(store.is_empty());
        assert!(store.check(&r).is_ok());
    }
}
