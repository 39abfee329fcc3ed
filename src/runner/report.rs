//! What a run reports back: outcomes, status lines and failures.

use super::state::InvalidTransition;
use crate::changeset::ChangeSetError;
use crate::migration::{Migration, MigrationId};
use crate::schema::{ErrorKind, SchemaError};
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Direction::Up => "applying",
            Direction::Down => "reverting",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which applied migrations `down` reverts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownTarget {
    /// The N most recently applied.
    Count(usize),
    /// Every applied migration with an id greater than this one.
    To(MigrationId),
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// There was nothing to apply or revert.
    NothingToDo,
    Completed {
        direction: Direction,
        /// Ids in execution order.
        migrations: Vec<MigrationId>,
    },
}

impl RunOutcome {
    pub fn is_noop(&self) -> bool {
        matches!(self, RunOutcome::NothingToDo)
    }

    pub fn migrations(&self) -> &[MigrationId] {
        match self {
            RunOutcome::NothingToDo => &[],
            RunOutcome::Completed { migrations, .. } => migrations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationStatus {
    Applied { at: DateTime<Utc> },
    Pending,
    /// Not applied, but older than the newest applied migration, so `up`
    /// won't pick it.
    Skipped,
    /// In the ledger without a registered migration.
    Unknown { at: DateTime<Utc> },
}

impl MigrationStatus {
    pub fn label(&self) -> &'static str {
        match self {
            MigrationStatus::Applied { .. } => "applied",
            MigrationStatus::Pending => "pending",
            MigrationStatus::Skipped => "skipped",
            MigrationStatus::Unknown { .. } => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub id: MigrationId,
    /// `None` for unknown ledger entries.
    pub name: Option<String>,
    pub status: MigrationStatus,
}

/// Details of the migration that stopped a run.
#[derive(Debug)]
pub struct MigrationFailure {
    pub direction: Direction,
    pub id: MigrationId,
    pub name: String,
    pub operation: Option<usize>,
    pub description: Option<String>,
    /// Migrations that completed in this run before the failure.
    pub completed: Vec<MigrationId>,
    pub source: SchemaError,
}

impl MigrationFailure {
    pub(super) fn new(
        direction: Direction,
        migration: &Migration,
        completed: Vec<MigrationId>,
        error: StepError,
    ) -> Self {
        let (operation, description, source) = match error {
            StepError::ChangeSet(e) => (e.operation, e.description, e.source),
            StepError::Store(e) => (None, None, e),
        };
        Self {
            direction,
            id: migration.id,
            name: migration.name.clone(),
            operation,
            description,
            completed,
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

impl fmt::Display for MigrationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Migration {} ({}) failed while {}",
            self.id,
            self.name,
            self.direction.verb()
        )?;
        if let Some(index) = self.operation {
            write!(f, " at operation #{}", index)?;
            if let Some(description) = &self.description {
                write!(f, " ({})", description)?;
            }
        }
        write!(f, ": [{}] {}", self.kind(), self.source)
    }
}

impl std::error::Error for MigrationFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Ledger references migrations that are not registered: {0:?} (run `migrate history-sync` to drop them)")]
    UnknownApplied(Vec<MigrationId>),

    #[error(transparent)]
    Failed(Box<MigrationFailure>),

    #[error(transparent)]
    Store(#[from] SchemaError),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

impl RunError {
    pub fn failure(&self) -> Option<&MigrationFailure> {
        match self {
            RunError::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Error of one migration step, before it's attributed to the migration.
#[derive(Debug)]
pub(super) enum StepError {
    ChangeSet(ChangeSetError),
    Store(SchemaError),
}

impl From<ChangeSetError> for StepError {
    fn from(e: ChangeSetError) -> Self {
        StepError::ChangeSet(e)
    }
}

impl From<SchemaError> for StepError {
    fn from(e: SchemaError) -> Self {
        StepError::Store(e)
    }
}
