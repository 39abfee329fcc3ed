//! Embedded schema migration engine.
//!
//! Collections are described by [`schema::Collection`] snapshots, changed
//! through [`changeset::ChangeSet`]s grouped into [`migration::Migration`]s,
//! and moved forwards and backwards by [`runner::Runner`] on top of a
//! [`store::MigrationBackend`].

pub mod changeset;
pub mod config;
pub mod migration;
pub mod runner;
pub mod schema;
pub mod sqlite_persistence;
pub mod store;

// Re-export commonly used types for convenience
pub use changeset::{ChangeSet, ChangeSetError, Operation};
pub use migration::{LoadError, Migration, MigrationId, MigrationSet};
pub use runner::{DownTarget, RunError, RunOutcome, Runner};
pub use schema::{Collection, ErrorKind, FieldDef, FieldRef, FieldType, SchemaError};
pub use store::{MemoryBackend, MigrationBackend, SqliteBackend};
