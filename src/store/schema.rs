//! Internal tables of the SQLite backend.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Collections and migrations ledger
// =============================================================================

/// One row per collection, the field list is stored as JSON in `schema`
/// so field order and options round-trip unchanged.
const COLLECTIONS_TABLE_V1: Table = Table {
    name: "_collections",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!("type", &SqlType::Text, non_null = true),
        sqlite_column!(
            "system",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("schema", &SqlType::Text, non_null = true),
        sqlite_column!("indexes", &SqlType::Text, non_null = true),
        sqlite_column!("options", &SqlType::Text, non_null = true),
    ],
    indices: &[],
};

/// Applied migrations, `applied_at` is RFC 3339.
const MIGRATIONS_TABLE_V1: Table = Table {
    name: "_migrations",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("applied_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_migrations_applied_at", "applied_at")],
};

pub const STORE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[COLLECTIONS_TABLE_V1, MIGRATIONS_TABLE_V1],
    migration: None,
}];
