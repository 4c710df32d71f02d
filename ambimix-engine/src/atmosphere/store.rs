//! Atmosphere persistence seam
//!
//! The engine only needs to load, save and delete definitions; where they
//! live is up to the host. `MemoryAtmosphereStore` keeps them in process
//! and backs the binary and the tests.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use ambimix_common::{AtmosphereDefinition, AtmosphereId};
use tracing::debug;

use crate::error::{Error, Result};

/// Persistence for atmosphere definitions
pub trait AtmosphereStore: Send + Sync {
    fn load(&self, id: AtmosphereId) -> Result<AtmosphereDefinition>;

    /// Validate and persist a definition, assigning an id when it has none
    fn save(&self, definition: AtmosphereDefinition) -> Result<AtmosphereId>;

    fn delete(&self, id: AtmosphereId) -> Result<()>;

    /// Every stored definition, ordered by id
    fn list(&self) -> Vec<AtmosphereDefinition>;
}

/// In-process store
#[derive(Default)]
pub struct MemoryAtmosphereStore {
    inner: RwLock<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    definitions: BTreeMap<AtmosphereId, AtmosphereDefinition>,
    next_id: AtmosphereId,
}

impl MemoryAtmosphereStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AtmosphereStore for MemoryAtmosphereStore {
    fn load(&self, id: AtmosphereId) -> Result<AtmosphereDefinition> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .definitions
            .get(&id)
            .cloned()
            .ok_or(Error::AtmosphereNotFound(id))
    }

    fn save(&self, mut definition: AtmosphereDefinition) -> Result<AtmosphereId> {
        definition
            .validate()
            .map_err(|e| Error::InvalidDefinition(e.to_string()))?;

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let id = match definition.id {
            Some(id) => id,
            None => inner.next_id + 1,
        };
        inner.next_id = inner.next_id.max(id);
        definition.id = Some(id);

        debug!(atmosphere_id = id, name = %definition.name, "Atmosphere saved");
        inner.definitions.insert(id, definition);
        Ok(id)
    }

    fn delete(&self, id: AtmosphereId) -> Result<()> {
        let removed = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .definitions
            .remove(&id);
        match removed {
            Some(_) => {
                debug!(atmosphere_id = id, "Atmosphere deleted");
                Ok(())
            }
            None => Err(Error::AtmosphereNotFound(id)),
        }
    }

    fn list(&self) -> Vec<AtmosphereDefinition> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .definitions
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ambimix_common::Membership;

    #[test]
    fn test_save_assigns_ids() {
        let store = MemoryAtmosphereStore::new();
        let a = store.save(AtmosphereDefinition::new("Forest")).unwrap();
        let b = store.save(AtmosphereDefinition::new("Storm")).unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(store.load(b).unwrap().name, "Storm");
    }

    #[test]
    fn test_explicit_id_advances_counter() {
        let store = MemoryAtmosphereStore::new();
        store.save(AtmosphereDefinition::new("Cave").with_id(10)).unwrap();
        assert_eq!(store.save(AtmosphereDefinition::new("Beach")).unwrap(), 11);
    }

    #[test]
    fn test_save_rejects_duplicate_channels() {
        let store = MemoryAtmosphereStore::new();
        let def = AtmosphereDefinition::new("Dup")
            .with_membership(Membership::new(1, 0.5))
            .with_membership(Membership::new(1, 0.3));
        assert!(matches!(store.save(def), Err(Error::InvalidDefinition(_))));
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_delete_missing() {
        let store = MemoryAtmosphereStore::new();
        assert!(matches!(store.delete(4), Err(Error::AtmosphereNotFound(4))));
    }
}
