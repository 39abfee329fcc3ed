//! Storage boundary of the engine.
//!
//! The engine never touches the underlying storage directly: schema changes
//! go through [`SchemaStore`], bookkeeping through [`Ledger`], and both are
//! only reachable from inside [`MigrationBackend::atomically`], which gives
//! exclusive, all-or-nothing access to the store.

mod memory_store;
mod schema;
mod sqlite_store;

pub use memory_store::MemoryBackend;
pub use schema::STORE_VERSIONED_SCHEMAS;
pub use sqlite_store::{SqliteBackend, SqliteSession};

use crate::migration::MigrationId;
use crate::schema::{Collection, FieldDef, FieldRef, SchemaError};
use chrono::{DateTime, Utc};

/// A ledger record: migration `migration_id` was applied at `applied_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub migration_id: MigrationId,
    pub applied_at: DateTime<Utc>,
}

/// Collection level CRUD primitives exposed by the store.
pub trait SchemaStore {
    /// Looks a collection up by name or by id.
    fn get_collection(&self, name_or_id: &str) -> Result<Option<Collection>, SchemaError>;
    fn list_collections(&self) -> Result<Vec<Collection>, SchemaError>;
    /// Fails with a conflict if a collection with the same id or name exists.
    fn create_collection(&self, def: &Collection) -> Result<Collection, SchemaError>;
    /// Replaces the stored schema of an existing collection, matched by id.
    fn save_collection(&self, collection: &Collection) -> Result<(), SchemaError>;
    fn delete_collection(&self, collection: &Collection) -> Result<(), SchemaError>;

    fn find_field(
        &self,
        collection: &str,
        field: &FieldRef,
    ) -> Result<Option<FieldDef>, SchemaError> {
        let Some(collection) = self.get_collection(collection)? else {
            return Ok(None);
        };
        match field.resolve(&collection) {
            Ok(index) => Ok(Some(collection.fields[index].clone())),
            Err(SchemaError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Durable record of the applied migrations.
pub trait Ledger {
    fn is_applied(&self, id: MigrationId) -> Result<bool, SchemaError>;
    /// Records `id` as applied, recording it twice is a no-op.
    fn mark_applied(&self, id: MigrationId, applied_at: DateTime<Utc>) -> Result<(), SchemaError>;
    /// Forgets `id`, forgetting an unknown id is a no-op.
    fn mark_reverted(&self, id: MigrationId) -> Result<(), SchemaError>;
    /// Applied ids in ascending order.
    fn applied_ids(&self) -> Result<Vec<MigrationId>, SchemaError>;
    /// Ledger entries in ascending id order.
    fn entries(&self) -> Result<Vec<LedgerEntry>, SchemaError>;
}

/// Everything a migration step can touch.
pub trait StoreSession: SchemaStore + Ledger {}

impl<T: SchemaStore + Ledger> StoreSession for T {}

pub trait MigrationBackend: Send + Sync {
    /// Runs `f` holding an exclusive lock on the store. Changes made through
    /// the session are committed when `f` returns `Ok` and discarded
    /// otherwise; the lock is released on every path.
    fn atomically<T, E>(&self, f: impl FnOnce(&dyn StoreSession) -> Result<T, E>) -> Result<T, E>
    where
        E: From<SchemaError>;
}
