use std::io;
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::Space;

use super::{SpaceCatalog, StoreError};

/// Space catalog held in memory, optionally seeded from a JSON array file.
pub struct InMemoryCatalog {
    spaces: DashMap<Ulid, Space>,
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            spaces: DashMap::new(),
        }
    }

    pub fn from_spaces(spaces: impl IntoIterator<Item = Space>) -> Self {
        let catalog = Self::new();
        for space in spaces {
            catalog.insert(space);
        }
        catalog
    }

    pub fn from_json_file(path: &Path) -> io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let spaces: Vec<Space> = serde_json::from_slice(&bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Self::from_spaces(spaces))
    }

    pub fn insert(&self, space: Space) {
        self.spaces.insert(space.id, space);
    }

    /// Returns false when the space is unknown.
    pub fn set_active(&self, id: Ulid, active: bool) -> bool {
        match self.spaces.get_mut(&id) {
            Some(mut space) => {
                space.active = active;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }
}

#[async_trait]
impl SpaceCatalog for InMemoryCatalog {
    async fn get_space(&self, id: Ulid) -> Result<Option<Space>, StoreError> {
        Ok(self.spaces.get(&id).map(|e| e.value().clone()))
    }
}
