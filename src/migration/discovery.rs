//! Migrations directory: one `<id>_<name>.json` file per migration.
//!
//! ```json
//! {
//!   "up":   { "collection": "accounts", "operations": [ ... ] },
//!   "down": { "collection": "accounts", "operations": [ ... ] }
//! }
//! ```
//!
//! `down` may be omitted when every `up` operation can be inverted on its
//! own (see [`ChangeSet::inverse`]).

use super::{LoadError, Migration, MigrationId, MigrationSet};
use crate::changeset::ChangeSet;
use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const MIGRATION_FILE_EXTENSION: &str = "json";

lazy_static! {
    static ref FILE_NAME_REGEX: Regex = Regex::new(r"^(\d+)_([A-Za-z0-9_]+)\.json$").unwrap();
    static ref NAME_SANITIZER: Regex = Regex::new(r"[^a-z0-9]+").unwrap();
}

/// On-disk representation of a migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationFile {
    pub up: ChangeSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down: Option<ChangeSet>,
}

/// Splits `1732051822_created_accounts.json` into its id and name.
pub fn parse_file_name(file_name: &str) -> Option<(MigrationId, String)> {
    let captures = FILE_NAME_REGEX.captures(file_name)?;
    let id = captures[1].parse::<MigrationId>().ok()?;
    Some((id, captures[2].to_string()))
}

fn load_file(path: &Path, id: MigrationId, name: String) -> Result<Migration, LoadError> {
    let content = fs::read_to_string(path)?;
    let file: MigrationFile =
        serde_json::from_str(&content).map_err(|e| LoadError::InvalidFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let migration = match file.down {
        Some(down) => Migration::new(id, name, file.up, down),
        None => Migration::reversible(id, name, file.up)?,
    };
    for change_set in [&migration.up, &migration.down] {
        change_set
            .validate()
            .map_err(|e| LoadError::InvalidFile {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
    }
    Ok(migration)
}

/// Loads every migration file found directly inside `dir`.
///
/// A missing directory yields an empty set. Other entries (subdirectories,
/// files with a different extension) are skipped, while a `.json` file
/// whose name doesn't follow `<id>_<name>.json` is an error.
pub fn load_dir(dir: &Path) -> Result<MigrationSet, LoadError> {
    if !dir.exists() {
        warn!("Migrations directory {:?} does not exist", dir);
        return MigrationSet::new(Vec::new());
    }

    let mut migrations = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        let path = entry.path();
        if !entry.file_type().is_file()
            || path.extension().and_then(|e| e.to_str()) != Some(MIGRATION_FILE_EXTENSION)
        {
            debug!("Skipping {:?}", path);
            continue;
        }

        let file_name = entry.file_name().to_string_lossy();
        let (id, name) = parse_file_name(&file_name).ok_or_else(|| LoadError::InvalidFile {
            path: path.to_path_buf(),
            reason: "expected a file name like <id>_<name>.json".to_string(),
        })?;
        migrations.push(load_file(path, id, name)?);
    }

    info!("Loaded {} migrations from {:?}", migrations.len(), dir);
    MigrationSet::new(migrations)
}

/// Writes `migration` into `dir` and returns the file path.
pub fn write_migration(dir: &Path, migration: &Migration) -> Result<PathBuf, LoadError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!(
        "{}.{}",
        migration.file_stem(),
        MIGRATION_FILE_EXTENSION
    ));
    let file = MigrationFile {
        up: migration.up.clone(),
        down: Some(migration.down.clone()),
    };
    let content = serde_json::to_string_pretty(&file).map_err(|e| LoadError::InvalidFile {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    fs::write(&path, content + "\n")?;
    Ok(path)
}

/// Scaffolds an empty up/down pair named after `name`.
///
/// The id is the current unix timestamp, bumped past the newest migration
/// in `existing` so the new one always sorts last.
pub fn create_migration(
    dir: &Path,
    name: &str,
    existing: &MigrationSet,
) -> Result<(Migration, PathBuf), LoadError> {
    let sanitized = NAME_SANITIZER
        .replace_all(&name.to_lowercase(), "_")
        .trim_matches('_')
        .to_string();
    if sanitized.is_empty() {
        return Err(LoadError::InvalidName(name.to_string()));
    }

    let now = Utc::now().timestamp();
    let id = match existing.max_id() {
        Some(max_id) if max_id >= now => max_id
            .checked_add(1)
            .ok_or(LoadError::IdExhausted(max_id))?,
        _ => now,
    };

    let migration = Migration::new(id, sanitized, ChangeSet::default(), ChangeSet::default());
    let path = write_migration(dir, &migration)?;
    info!("Created migration {} at {:?}", migration, path);
    Ok((migration, path))
}
