use std::time::Instant;

use tracing::{debug, info};
use ulid::Ulid;

use crate::model::*;
use crate::observability;
use crate::window::Window;

use super::access::ensure_access;
use super::conflict::now_ms;
use super::{Admission, Engine, EngineError};

fn record_admission(result: &Result<Reservation, EngineError>, started: Instant) {
    let outcome = match result {
        Ok(_) => "admitted",
        Err(e) => observability::error_label(e),
    };
    metrics::counter!(observability::ADMISSIONS_TOTAL, "outcome" => outcome).increment(1);
    metrics::histogram!(observability::ADMISSION_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = result {
        debug!("admission rejected: {e}");
    }
}

impl Engine {
    /// Decide whether `start..end` could be booked on this space and day.
    ///
    /// Read-only: the verdict can go stale as soon as it is returned. `create`
    /// repeats the same check under the slot lock.
    pub async fn check_availability(
        &self,
        space_id: Ulid,
        day: impl Into<Day>,
        start: &str,
        end: &str,
    ) -> Result<Admission, EngineError> {
        let day = day.into();
        self.resolve_active_space(space_id).await?;
        let window = Window::parse(start, end)?;
        self.scan_slot(space_id, day, &window, None).await?;
        Ok(Admission { space_id, day, window })
    }

    /// Admit and persist a new confirmed reservation owned by `actor`.
    pub async fn create(
        &self,
        actor: &Actor,
        space_id: Ulid,
        day: impl Into<Day>,
        start: &str,
        end: &str,
    ) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self.admit_new(actor, space_id, day.into(), start, end).await;
        record_admission(&result, started);
        result
    }

    async fn admit_new(
        &self,
        actor: &Actor,
        space_id: Ulid,
        day: Day,
        start: &str,
        end: &str,
    ) -> Result<Reservation, EngineError> {
        let _slot = self.admission.lock((space_id, day)).await;
        let admission = self.check_availability(space_id, day, start, end).await?;

        let now = now_ms();
        let reservation = self
            .store
            .insert(Reservation {
                id: Ulid::new(),
                owner_id: actor.id,
                space_id: admission.space_id,
                day: admission.day,
                window: admission.window,
                status: ReservationStatus::Confirmed,
                created_at: now,
                updated_at: now,
            })
            .await?;
        info!(
            "reservation {} admitted: space {space_id} on {day} at {}",
            reservation.id, reservation.window
        );
        Ok(reservation)
    }

    /// Apply `patch` to a reservation the actor may access.
    ///
    /// Runs under the lock of the slot the record sits in, and of the slot it
    /// moves to. Moving the reservation (space, day or window) or re-activating
    /// a cancelled one goes through admission again, ignoring its own record.
    pub async fn update(
        &self,
        actor: &Actor,
        id: Ulid,
        patch: ReservationPatch,
    ) -> Result<Reservation, EngineError> {
        let mut target = None;
        loop {
            let (current, _slots) = self.lock_reservation(id, target).await?;
            ensure_access(actor, &current)?;
            let next = patch.apply_to(&current, now_ms())?;
            if next.slot() != current.slot() && target != Some(next.slot()) {
                target = Some(next.slot());
                continue;
            }

            let moved = next.slot() != current.slot() || next.window != current.window;
            let reactivated = !current.is_active() && next.is_active();
            if !moved && !reactivated {
                let updated = self.store.update_by_id(next).await?;
                if updated.status != current.status {
                    info!(
                        "reservation {id} status {:?} -> {:?}",
                        current.status, updated.status
                    );
                }
                return Ok(updated);
            }

            let started = Instant::now();
            let result = self.readmit(next).await;
            record_admission(&result, started);
            return result;
        }
    }

    /// Caller holds the locks of both the old and the new slot.
    async fn readmit(&self, next: Reservation) -> Result<Reservation, EngineError> {
        self.resolve_active_space(next.space_id).await?;
        if next.is_active() {
            self.scan_slot(next.space_id, next.day, &next.window, Some(next.id))
                .await?;
        }
        let updated = self.store.update_by_id(next).await?;
        info!(
            "reservation {} re-admitted: space {} on {} at {}",
            updated.id, updated.space_id, updated.day, updated.window
        );
        Ok(updated)
    }

    pub async fn cancel(&self, actor: &Actor, id: Ulid) -> Result<Reservation, EngineError> {
        self.update(actor, id, ReservationPatch::status(ReservationStatus::Cancelled))
            .await
    }

    /// Remove the record outright. Returns what was removed.
    pub async fn delete(&self, actor: &Actor, id: Ulid) -> Result<Reservation, EngineError> {
        let (current, _slot) = self.lock_reservation(id, None).await?;
        ensure_access(actor, &current)?;
        let removed = self.store.delete_by_id(id).await?;
        metrics::counter!(observability::RESERVATIONS_DELETED_TOTAL).increment(1);
        info!("reservation {id} deleted by {}", actor.id);
        Ok(removed)
    }
}
