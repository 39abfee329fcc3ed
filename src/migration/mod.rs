//! Migrations and the ordered set the runner works on.

mod discovery;

pub use discovery::{create_migration, load_dir, parse_file_name, write_migration, MigrationFile};

use crate::changeset::ChangeSet;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Sortable, globally unique migration identifier (a unix timestamp for
/// migrations created with `migrate create`).
pub type MigrationId = i64;

/// Errors raised while assembling a [`MigrationSet`].
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Duplicate migration id {id}: '{first}' and '{second}'")]
    DuplicateId {
        id: MigrationId,
        first: String,
        second: String,
    },

    #[error("Migration {id} ({name}) has no down change set and its up change set is not invertible")]
    NotReversible { id: MigrationId, name: String },

    #[error("Invalid migration file {path:?}: {reason}")]
    InvalidFile { path: PathBuf, reason: String },

    #[error("Invalid migration name '{0}'")]
    InvalidName(String),

    #[error("No migration id left after {0}")]
    IdExhausted(MigrationId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A named schema delta with both of its directions.
#[derive(Debug, Clone, PartialEq)]
pub struct Migration {
    pub id: MigrationId,
    pub name: String,
    pub up: ChangeSet,
    pub down: ChangeSet,
}

impl Migration {
    pub fn new(id: MigrationId, name: impl Into<String>, up: ChangeSet, down: ChangeSet) -> Self {
        Self {
            id,
            name: name.into(),
            up,
            down,
        }
    }

    /// Builds a migration whose down change set is the static inverse of `up`.
    pub fn reversible(id: MigrationId, name: impl Into<String>, up: ChangeSet) -> Result<Self, LoadError> {
        let name = name.into();
        let down = up
            .inverse()
            .ok_or_else(|| LoadError::NotReversible {
                id,
                name: name.clone(),
            })?;
        Ok(Self { id, name, up, down })
    }

    /// File stem used on disk, e.g. `1732051822_created_accounts`.
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.id, self.name)
    }
}

impl fmt::Display for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.name)
    }
}

/// Migrations sorted by ascending id, ids are unique.
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    migrations: Vec<Migration>,
}

impl MigrationSet {
    pub fn new(mut migrations: Vec<Migration>) -> Result<Self, LoadError> {
        let mut seen: HashMap<MigrationId, &str> = HashMap::new();
        for migration in &migrations {
            if let Some(first) = seen.insert(migration.id, &migration.name) {
                return Err(LoadError::DuplicateId {
                    id: migration.id,
                    first: first.to_string(),
                    second: migration.name.clone(),
                });
            }
        }
        // Stable, so registration order is kept among equal keys
        migrations.sort_by_key(|m| m.id);
        Ok(Self { migrations })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.iter()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn get(&self, id: MigrationId) -> Option<&Migration> {
        self.migrations
            .binary_search_by_key(&id, |m| m.id)
            .ok()
            .map(|index| &self.migrations[index])
    }

    pub fn contains(&self, id: MigrationId) -> bool {
        self.get(id).is_some()
    }

    pub fn max_id(&self) -> Option<MigrationId> {
        self.migrations.last().map(|m| m.id)
    }

    /// Migrations newer than every applied one, ascending.
    pub fn pending(&self, applied_ids: &[MigrationId]) -> Vec<&Migration> {
        match applied_ids.iter().max() {
            Some(max_applied) => self
                .migrations
                .iter()
                .filter(|m| m.id > *max_applied)
                .collect(),
            None => self.migrations.iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a MigrationSet {
    type Item = &'a Migration;
    type IntoIter = std::slice::Iter<'a, Migration>;

    fn into_iter(self) -> Self::IntoIter {
        self.migrations.iter()
    }
}
