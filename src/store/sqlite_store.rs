use super::schema::STORE_VERSIONED_SCHEMAS;
use super::{LedgerEntry, Ledger, MigrationBackend, SchemaStore, StoreSession};
use crate::migration::MigrationId;
use crate::schema::{validate_collection, Collection, CollectionType, SchemaError};
use crate::sqlite_persistence::{get_db_version, set_db_version};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

const COLLECTION_COLUMNS: &str = "id, name, type, system, schema, indexes, options";

/// SQLite backed store, collections and ledger live in the same file so a
/// migration step and its ledger update share one transaction.
#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    pub fn new<P: AsRef<Path>>(db_path: P, busy_timeout: Duration) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let mut conn = Connection::open(path)
            .with_context(|| format!("Failed to open schema database {:?}", path))?;
        conn.busy_timeout(busy_timeout)?;
        Self::prepare(&mut conn)
            .with_context(|| format!("Failed to prepare schema database {:?}", path))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        Self::prepare(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn prepare(conn: &mut Connection) -> Result<()> {
        let latest = STORE_VERSIONED_SCHEMAS
            .last()
            .ok_or_else(|| anyhow!("No internal schema defined"))?;

        let Some(db_version) = get_db_version(conn)? else {
            let table_count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table'",
                [],
                |row| row.get(0),
            )?;
            if table_count > 0 {
                bail!("Database is not empty and was not created by this tool");
            }
            info!("Creating internal tables (version {})", latest.version);
            let tx = conn.transaction()?;
            latest.create(&tx)?;
            tx.commit()?;
            return Ok(());
        };

        let schema = STORE_VERSIONED_SCHEMAS
            .iter()
            .find(|s| s.version == db_version)
            .with_context(|| format!("Unknown internal schema version {}", db_version))?;
        schema
            .validate(conn)
            .with_context(|| format!("Internal schema validation failed for version {}", db_version))?;

        if db_version < latest.version {
            info!(
                "Upgrading internal tables from version {} to {}",
                db_version, latest.version
            );
            let tx = conn.transaction()?;
            for schema in STORE_VERSIONED_SCHEMAS.iter().filter(|s| s.version > db_version) {
                if let Some(migration_fn) = schema.migration {
                    migration_fn(&tx).with_context(|| {
                        format!("Failed to upgrade internal tables to version {}", schema.version)
                    })?;
                }
            }
            set_db_version(&tx, latest.version)?;
            tx.commit()?;
        }
        Ok(())
    }
}

impl MigrationBackend for SqliteBackend {
    fn atomically<T, E>(&self, f: impl FnOnce(&dyn StoreSession) -> Result<T, E>) -> Result<T, E>
    where
        E: From<SchemaError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| SchemaError::Store(anyhow!("Schema store lock poisoned")))?;
        // IMMEDIATE takes the database write lock up front, so a second
        // process running migrations waits (up to busy_timeout) instead of
        // interleaving with us.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin transaction")
            .map_err(SchemaError::from)?;

        match f(&SqliteSession { conn: &tx }) {
            Ok(value) => {
                tx.commit()
                    .context("Failed to commit transaction")
                    .map_err(SchemaError::from)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!("Failed to roll back transaction: {}", rollback_err);
                }
                Err(e)
            }
        }
    }
}

/// Store view bound to one open transaction.
pub struct SqliteSession<'a> {
    conn: &'a Connection,
}

fn json_column<T: serde::de::DeserializeOwned>(row: &rusqlite::Row, index: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(index)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

fn row_to_collection(row: &rusqlite::Row) -> rusqlite::Result<Collection> {
    let type_str: String = row.get(2)?;
    let collection_type = CollectionType::parse(&type_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            format!("unknown collection type '{}'", type_str).into(),
        )
    })?;

    Ok(Collection {
        id: row.get(0)?,
        name: row.get(1)?,
        collection_type,
        system: row.get::<_, i32>(3)? != 0,
        fields: json_column(row, 4)?,
        indexes: json_column(row, 5)?,
        options: json_column(row, 6)?,
    })
}

struct CollectionJson {
    fields: String,
    indexes: String,
    options: String,
}

impl CollectionJson {
    fn encode(collection: &Collection) -> Result<Self> {
        Ok(Self {
            fields: serde_json::to_string(&collection.fields)?,
            indexes: serde_json::to_string(&collection.indexes)?,
            options: serde_json::to_string(&collection.options)?,
        })
    }
}

impl SqliteSession<'_> {
    fn find_clash(&self, id: &str, name: &str) -> Result<Option<(String, String)>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name FROM _collections WHERE id = ?1 OR name = ?2 LIMIT 1",
                params![id, name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?)
    }
}

impl SchemaStore for SqliteSession<'_> {
    fn get_collection(&self, name_or_id: &str) -> Result<Option<Collection>, SchemaError> {
        let collection = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM _collections WHERE id = ?1 OR name = ?1
                     ORDER BY (id = ?1) DESC LIMIT 1",
                    COLLECTION_COLUMNS
                ),
                params![name_or_id],
                row_to_collection,
            )
            .optional()
            .with_context(|| format!("Failed to load collection '{}'", name_or_id))?;
        Ok(collection)
    }

    fn list_collections(&self) -> Result<Vec<Collection>, SchemaError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM _collections ORDER BY rowid",
                COLLECTION_COLUMNS
            ))
            .context("Failed to list collections")?;
        let collections = stmt
            .query_map([], row_to_collection)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .context("Failed to list collections")?;
        Ok(collections)
    }

    fn create_collection(&self, def: &Collection) -> Result<Collection, SchemaError> {
        validate_collection(def)?;
        if let Some((id, name)) = self.find_clash(&def.id, &def.name)? {
            return Err(SchemaError::Conflict(format!(
                "collection '{}' ({}) clashes with existing collection '{}' ({})",
                def.name, def.id, name, id
            )));
        }

        let json = CollectionJson::encode(def)?;
        self.conn
            .execute(
                &format!(
                    "INSERT INTO _collections ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    COLLECTION_COLUMNS
                ),
                params![
                    def.id,
                    def.name,
                    def.collection_type.as_str(),
                    def.system as i32,
                    json.fields,
                    json.indexes,
                    json.options
                ],
            )
            .with_context(|| format!("Failed to create collection '{}'", def.name))?;
        debug!("Created collection '{}' ({})", def.name, def.id);
        Ok(def.clone())
    }

    fn save_collection(&self, collection: &Collection) -> Result<(), SchemaError> {
        validate_collection(collection)?;
        let name_taken: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM _collections WHERE name = ?1 AND id != ?2",
                params![collection.name, collection.id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to check collection name")?;
        if let Some(other_id) = name_taken {
            return Err(SchemaError::Conflict(format!(
                "collection name '{}' is already used by {}",
                collection.name, other_id
            )));
        }

        let json = CollectionJson::encode(collection)?;
        let updated = self
            .conn
            .execute(
                "UPDATE _collections
                 SET name = ?2, type = ?3, system = ?4, schema = ?5, indexes = ?6, options = ?7
                 WHERE id = ?1",
                params![
                    collection.id,
                    collection.name,
                    collection.collection_type.as_str(),
                    collection.system as i32,
                    json.fields,
                    json.indexes,
                    json.options
                ],
            )
            .with_context(|| format!("Failed to save collection '{}'", collection.name))?;
        if updated == 0 {
            return Err(SchemaError::NotFound(format!(
                "collection '{}' ({})",
                collection.name, collection.id
            )));
        }
        debug!("Saved collection '{}' ({})", collection.name, collection.id);
        Ok(())
    }

    fn delete_collection(&self, collection: &Collection) -> Result<(), SchemaError> {
        let deleted = self
            .conn
            .execute("DELETE FROM _collections WHERE id = ?1", params![collection.id])
            .with_context(|| format!("Failed to delete collection '{}'", collection.name))?;
        if deleted == 0 {
            return Err(SchemaError::NotFound(format!(
                "collection '{}' ({})",
                collection.name, collection.id
            )));
        }
        debug!("Deleted collection '{}' ({})", collection.name, collection.id);
        Ok(())
    }
}

impl Ledger for SqliteSession<'_> {
    fn is_applied(&self, id: MigrationId) -> Result<bool, SchemaError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM _migrations WHERE id = ?1",
                params![id],
                |_| Ok(()),
            )
            .optional()
            .context("Failed to read migrations ledger")?;
        Ok(found.is_some())
    }

    fn mark_applied(&self, id: MigrationId, applied_at: DateTime<Utc>) -> Result<(), SchemaError> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO _migrations (id, applied_at) VALUES (?1, ?2)",
                params![id, applied_at.to_rfc3339()],
            )
            .with_context(|| format!("Failed to record migration {}", id))?;
        Ok(())
    }

    fn mark_reverted(&self, id: MigrationId) -> Result<(), SchemaError> {
        self.conn
            .execute("DELETE FROM _migrations WHERE id = ?1", params![id])
            .with_context(|| format!("Failed to remove migration {} from the ledger", id))?;
        Ok(())
    }

    fn applied_ids(&self) -> Result<Vec<MigrationId>, SchemaError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM _migrations ORDER BY id ASC")
            .context("Failed to read migrations ledger")?;
        let ids = stmt
            .query_map([], |row| row.get(0))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<MigrationId>>>())
            .context("Failed to read migrations ledger")?;
        Ok(ids)
    }

    fn entries(&self) -> Result<Vec<LedgerEntry>, SchemaError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, applied_at FROM _migrations ORDER BY id ASC")
            .context("Failed to read migrations ledger")?;
        let entries = stmt
            .query_map([], |row| {
                let applied_at: String = row.get(1)?;
                let applied_at = DateTime::parse_from_rfc3339(&applied_at)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?
                    .with_timezone(&Utc);
                Ok(LedgerEntry {
                    migration_id: row.get(0)?,
                    applied_at,
                })
            })
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .context("Failed to read migrations ledger")?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::ChangeSet;
    use crate::schema::{FieldDef, FieldType};
    use tempfile::TempDir;

    struct TestStore {
        backend: SqliteBackend,
        db_path: std::path::PathBuf,
        _temp_dir: TempDir, // Keep temp dir alive
    }

    fn create_test_store() -> TestStore {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("data.db");
        let backend = SqliteBackend::new(&db_path, Duration::from_millis(500)).unwrap();
        TestStore {
            backend,
            db_path,
            _temp_dir: temp_dir,
        }
    }

    fn accounts() -> Collection {
        Collection::new("4qaxoe6y9o4jgpo", "accounts")
            .with_field(FieldDef::with_id("x3p8pzcm", "username", FieldType::Email).options(
                serde_json::json!({"exceptDomains": null, "onlyDomains": null}),
            ))
            .with_field(FieldDef::with_id("6vz0ekeq", "password", FieldType::Text))
    }

    #[test]
    fn test_collection_crud() {
        let test = create_test_store();
        let backend = &test.backend;

        backend
            .atomically(|s| s.create_collection(&accounts()))
            .unwrap();

        let by_name = backend
            .atomically(|s| s.get_collection("accounts"))
            .unwrap();
        let by_id = backend
            .atomically(|s| s.get_collection("4qaxoe6y9o4jgpo"))
            .unwrap();
        assert_eq!(by_name, Some(accounts()));
        assert_eq!(by_id, Some(accounts()));

        let mut renamed = accounts();
        renamed.fields[0].name = "email".to_string();
        backend.atomically(|s| s.save_collection(&renamed)).unwrap();
        let stored = backend
            .atomically(|s| s.get_collection("accounts"))
            .unwrap()
            .unwrap();
        assert_eq!(stored.field_names(), vec!["email", "password"]);

        backend.atomically(|s| s.delete_collection(&stored)).unwrap();
        assert!(backend
            .atomically(|s| s.list_collections())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_create_duplicate_collection_is_conflict() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .atomically(|s| s.create_collection(&accounts()))
            .unwrap();

        let same_name = Collection::new("otherid00000000", "accounts");
        let err = backend
            .atomically(|s| s.create_collection(&same_name))
            .unwrap_err();
        assert!(matches!(err, SchemaError::Conflict(_)));
    }

    #[test]
    fn test_save_and_delete_missing_collection() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let err = backend
            .atomically(|s| s.save_collection(&accounts()))
            .unwrap_err();
        assert!(matches!(err, SchemaError::NotFound(_)));

        let err = backend
            .atomically(|s| s.delete_collection(&accounts()))
            .unwrap_err();
        assert!(matches!(err, SchemaError::NotFound(_)));
    }

    #[test]
    fn test_ledger() {
        let test = create_test_store();
        let backend = &test.backend;
        let now = Utc::now();

        backend
            .atomically(|s| {
                s.mark_applied(1732052023, now)?;
                s.mark_applied(1732051822, now)?;
                // Recording twice is harmless
                s.mark_applied(1732051822, now)
            })
            .unwrap();

        let ids = backend.atomically(|s| s.applied_ids()).unwrap();
        assert_eq!(ids, vec![1732051822, 1732052023]);
        assert!(backend.atomically(|s| s.is_applied(1732052023)).unwrap());

        let entries = backend.atomically(|s| s.entries()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].applied_at.timestamp(), now.timestamp());

        backend
            .atomically(|s| {
                s.mark_reverted(1732052023)?;
                s.mark_reverted(42)
            })
            .unwrap();
        let ids = backend.atomically(|s| s.applied_ids()).unwrap();
        assert_eq!(ids, vec![1732051822]);
    }

    #[test]
    fn test_failed_session_rolls_back() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let result: Result<(), SchemaError> = backend.atomically(|s| {
            s.create_collection(&accounts())?;
            s.mark_applied(1, Utc::now())?;
            Err(SchemaError::Conflict("boom".to_string()))
        });
        assert!(result.is_err());

        assert!(backend
            .atomically(|s| s.list_collections())
            .unwrap()
            .is_empty());
        assert!(backend.atomically(|s| s.applied_ids()).unwrap().is_empty());
    }

    #[test]
    fn test_recreate_collection_under_new_id() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .atomically(|s| s.create_collection(&accounts()))
            .unwrap();

        let replacement = Collection::new("newid0000000001", "accounts")
            .with_field(FieldDef::with_id("nm000001", "nickname", FieldType::Text));
        let recreate = ChangeSet::new("accounts")
            .delete_collection()
            .create_collection(replacement.clone());
        assert!(backend.atomically(|s| recreate.execute(s)).unwrap());

        let collections = backend.atomically(|s| s.list_collections()).unwrap();
        assert_eq!(collections, vec![replacement]);
    }

    #[test]
    fn test_reopen_keeps_state() {
        let test = create_test_store();
        test.backend
            .atomically(|s| {
                s.create_collection(&accounts())?;
                s.mark_applied(1732051822, Utc::now())
            })
            .unwrap();

        let reopened = SqliteBackend::new(&test.db_path, Duration::from_millis(500)).unwrap();
        assert_eq!(
            reopened.atomically(|s| s.get_collection("accounts")).unwrap(),
            Some(accounts())
        );
        assert_eq!(
            reopened.atomically(|s| s.applied_ids()).unwrap(),
            vec![1732051822]
        );
    }

    #[test]
    fn test_refuses_foreign_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("foreign.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute("CREATE TABLE users (id INTEGER PRIMARY KEY)", [])
                .unwrap();
        }

        let err = SqliteBackend::new(&db_path, Duration::from_millis(500))
            .err()
            .unwrap();
        assert!(format!("{:#}", err).contains("not created by this tool"));
    }
}
