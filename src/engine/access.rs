use crate::model::{Actor, Reservation, Role};

use super::EngineError;

/// Admins reach every reservation; users only their own.
pub fn authorize_access(actor: &Actor, reservation: &Reservation) -> bool {
    match actor.role {
        Role::Admin => true,
        Role::User => reservation.owner_id == actor.id,
    }
}

pub(super) fn ensure_access(actor: &Actor, reservation: &Reservation) -> Result<(), EngineError> {
    if authorize_access(actor, reservation) {
        Ok(())
    } else {
        Err(EngineError::Forbidden(reservation.id))
    }
}
