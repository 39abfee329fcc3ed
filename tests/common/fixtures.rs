//! Test fixtures: the accounts migrations built in code and SQLite databases
//! living in temporary directories.

#![allow(dead_code)]

use super::constants::*;
use schema_migrate::store::{MigrationBackend, SqliteBackend};
use schema_migrate::{ChangeSet, Collection, FieldDef, FieldRef, FieldType, Migration};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// The four migrations shipped in `pb_migrations/`, built in code.
pub fn accounts_migrations() -> Vec<Migration> {
    let accounts = Collection::new(ACCOUNTS_ID, ACCOUNTS_NAME)
        .with_field(
            FieldDef::with_id(EMAIL_FIELD_ID, "username", FieldType::Email)
                .options(json!({"exceptDomains": null, "onlyDomains": null})),
        )
        .with_field(
            FieldDef::with_id(PASSWORD_FIELD_ID, "password", FieldType::Text)
                .options(json!({"min": null, "max": null, "pattern": ""})),
        );

    let migrations = [
        Migration::reversible(
            CREATED_ACCOUNTS,
            "created_accounts",
            ChangeSet::new(ACCOUNTS_ID).create_collection(accounts),
        ),
        Migration::reversible(
            RENAMED_USERNAME,
            "updated_accounts",
            ChangeSet::new(ACCOUNTS_ID)
                .rename_field(FieldRef::new(EMAIL_FIELD_ID, "username"), "email"),
        ),
        Migration::reversible(
            ADDED_IS_ADMIN,
            "updated_accounts",
            ChangeSet::new(ACCOUNTS_ID).add_field(FieldDef::with_id(
                IS_ADMIN_FIELD_ID,
                "isAdmin",
                FieldType::Bool,
            )),
        ),
        Migration::reversible(
            RENAMED_IS_ADMIN,
            "updated_accounts",
            ChangeSet::new(ACCOUNTS_ID)
                .rename_field(FieldRef::new(IS_ADMIN_FIELD_ID, "isAdmin"), "is_admin"),
        ),
    ];
    migrations
        .into_iter()
        .map(|m| m.expect("accounts migrations are reversible"))
        .collect()
}

/// Current accounts collection, `None` when it doesn't exist.
pub fn accounts_snapshot<B: MigrationBackend>(backend: &B) -> Option<Collection> {
    backend
        .atomically(|s| s.get_collection(ACCOUNTS_ID))
        .expect("Failed to read accounts collection")
}

pub fn bundled_migrations_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("pb_migrations")
}

/// Copies the bundled migration files into `dir` and returns their paths.
pub fn copy_bundled_migrations(dir: &Path) -> Vec<PathBuf> {
    fs::create_dir_all(dir).expect("Failed to create migrations dir");
    let mut copied = Vec::new();
    for entry in fs::read_dir(bundled_migrations_dir()).expect("Failed to list pb_migrations") {
        let path = entry.expect("Failed to read pb_migrations entry").path();
        let target = dir.join(path.file_name().expect("migration file name"));
        fs::copy(&path, &target).expect("Failed to copy migration file");
        copied.push(target);
    }
    copied.sort();
    copied
}

/// A SQLite backend on a file inside a temporary directory.
pub struct TestDb {
    pub backend: SqliteBackend,
    pub path: PathBuf,
    pub dir: TempDir,
}

impl TestDb {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("pb_data").join("data.db");
        let backend = SqliteBackend::new(&path, Duration::from_secs(5))
            .expect("Failed to open test database");
        TestDb { backend, path, dir }
    }

    /// Opens a second, independent connection to the same database file.
    pub fn reopen(&self) -> SqliteBackend {
        SqliteBackend::new(&self.path, Duration::from_secs(5))
            .expect("Failed to reopen test database")
    }
}
