//! Runs migrations up and down against a [`crate::store::MigrationBackend`].

mod executor;
mod report;
mod state;

pub use executor::Runner;
pub use report::{
    Direction, DownTarget, MigrationFailure, MigrationStatus, RunError, RunOutcome, StatusEntry,
};
pub use state::{InvalidTransition, MigrationState};
