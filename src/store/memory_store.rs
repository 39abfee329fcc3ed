use super::{LedgerEntry, Ledger, MigrationBackend, SchemaStore, StoreSession};
use crate::migration::MigrationId;
use crate::schema::{validate_collection, Collection, SchemaError};
use chrono::{DateTime, Utc};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    collections: Vec<Collection>,
    ledger: BTreeMap<MigrationId, DateTime<Utc>>,
}

/// In-process store. Sessions work on a copy of the state which replaces
/// the original only when the session succeeds.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collections(collections: Vec<Collection>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                collections,
                ledger: BTreeMap::new(),
            }),
        }
    }
}

impl MigrationBackend for MemoryBackend {
    fn atomically<T, E>(&self, f: impl FnOnce(&dyn StoreSession) -> Result<T, E>) -> Result<T, E>
    where
        E: From<SchemaError>,
    {
        let mut state = self
            .state
            .lock()
            .map_err(|_| SchemaError::Store(anyhow::anyhow!("Memory store lock poisoned")))?;
        let session = MemorySession {
            state: RefCell::new(state.clone()),
        };
        let value = f(&session)?;
        *state = session.state.into_inner();
        Ok(value)
    }
}

struct MemorySession {
    state: RefCell<MemoryState>,
}

impl SchemaStore for MemorySession {
    fn get_collection(&self, name_or_id: &str) -> Result<Option<Collection>, SchemaError> {
        let state = self.state.borrow();
        let by_id = state.collections.iter().find(|c| c.id == name_or_id);
        Ok(by_id
            .or_else(|| state.collections.iter().find(|c| c.name == name_or_id))
            .cloned())
    }

    fn list_collections(&self) -> Result<Vec<Collection>, SchemaError> {
        Ok(self.state.borrow().collections.clone())
    }

    fn create_collection(&self, def: &Collection) -> Result<Collection, SchemaError> {
        validate_collection(def)?;
        let mut state = self.state.borrow_mut();
        if let Some(existing) = state
            .collections
            .iter()
            .find(|c| c.id == def.id || c.name == def.name)
        {
            return Err(SchemaError::Conflict(format!(
                "collection '{}' ({}) clashes with existing collection '{}' ({})",
                def.name, def.id, existing.name, existing.id
            )));
        }
        state.collections.push(def.clone());
        Ok(def.clone())
    }

    fn save_collection(&self, collection: &Collection) -> Result<(), SchemaError> {
        validate_collection(collection)?;
        let mut state = self.state.borrow_mut();
        if let Some(other) = state
            .collections
            .iter()
            .find(|c| c.name == collection.name && c.id != collection.id)
        {
            return Err(SchemaError::Conflict(format!(
                "collection name '{}' is already used by {}",
                collection.name, other.id
            )));
        }
        let slot = state
            .collections
            .iter_mut()
            .find(|c| c.id == collection.id)
            .ok_or_else(|| {
                SchemaError::NotFound(format!("collection '{}' ({})", collection.name, collection.id))
            })?;
        *slot = collection.clone();
        Ok(())
    }

    fn delete_collection(&self, collection: &Collection) -> Result<(), SchemaError> {
        let mut state = self.state.borrow_mut();
        let before = state.collections.len();
        state.collections.retain(|c| c.id != collection.id);
        if state.collections.len() == before {
            return Err(SchemaError::NotFound(format!(
                "collection '{}' ({})",
                collection.name, collection.id
            )));
        }
        Ok(())
    }
}

impl Ledger for MemorySession {
    fn is_applied(&self, id: MigrationId) -> Result<bool, SchemaError> {
        Ok(self.state.borrow().ledger.contains_key(&id))
    }

    fn mark_applied(&self, id: MigrationId, applied_at: DateTime<Utc>) -> Result<(), SchemaError> {
        self.state
            .borrow_mut()
            .ledger
            .entry(id)
            .or_insert(applied_at);
        Ok(())
    }

    fn mark_reverted(&self, id: MigrationId) -> Result<(), SchemaError> {
        self.state.borrow_mut().ledger.remove(&id);
        Ok(())
    }

    fn applied_ids(&self) -> Result<Vec<MigrationId>, SchemaError> {
        Ok(self.state.borrow().ledger.keys().copied().collect())
    }

    fn entries(&self) -> Result<Vec<LedgerEntry>, SchemaError> {
        Ok(self
            .state
            .borrow()
            .ledger
            .iter()
            .map(|(id, applied_at)| LedgerEntry {
                migration_id: *id,
                applied_at: *applied_at,
            })
            .collect())
    }
}
