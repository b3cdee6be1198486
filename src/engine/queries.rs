use ulid::Ulid;

use crate::model::*;
use crate::window::Window;

use super::access::{authorize_access, ensure_access};
use super::{Engine, EngineError};

impl Engine {
    /// Windows taken by active reservations, without saying whose they are.
    pub async fn occupied_windows(
        &self,
        space_id: Ulid,
        day: impl Into<Day>,
    ) -> Result<Vec<Window>, EngineError> {
        Ok(self
            .active_in_slot(space_id, day.into())
            .await?
            .into_iter()
            .map(|r| r.window)
            .collect())
    }

    pub async fn get(&self, actor: &Actor, id: Ulid) -> Result<Reservation, EngineError> {
        let reservation = self.load(id).await?;
        ensure_access(actor, &reservation)?;
        Ok(reservation)
    }

    /// Everything the actor may see, ordered by day then start.
    pub async fn list(&self, actor: &Actor) -> Result<Vec<Reservation>, EngineError> {
        let owner = match actor.role {
            Role::Admin => None,
            Role::User => Some(actor.id),
        };
        let mut found = self.store.find_all(owner).await?;
        found.retain(|r| authorize_access(actor, r));
        found.sort_by_key(|r| (r.day, r.window.start(), r.id));
        Ok(found)
    }

    /// Active reservations whose space is unknown to the catalog or inactive.
    /// They stay on record but can no longer be moved or re-activated.
    pub async fn stranded(&self) -> Result<Vec<Reservation>, EngineError> {
        let mut found = Vec::new();
        for r in self.store.find_all(None).await? {
            if !r.is_active() {
                continue;
            }
            let usable = self
                .catalog
                .get_space(r.space_id)
                .await?
                .is_some_and(|space| space.active);
            if !usable {
                found.push(r);
            }
        }
        found.sort_by_key(|r| (r.day, r.window.start(), r.id));
        Ok(found)
    }
}
