//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{accounts_migrations, TestDb};
//! use schema_migrate::{MigrationSet, Runner};
//!
//! #[test]
//! fn test_up() {
//!     let db = TestDb::new();
//!     let runner = Runner::new(db.backend.clone(), MigrationSet::new(accounts_migrations()).unwrap());
//!     runner.up(None).unwrap();
//! }
//! ```

mod constants;
mod fixtures;

pub use constants::*;
#[allow(unused_imports)]
pub use fixtures::{
    accounts_migrations, accounts_snapshot, bundled_migrations_dir, copy_bundled_migrations,
    TestDb,
};
