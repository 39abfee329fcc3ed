use super::report::{
    Direction, DownTarget, MigrationFailure, MigrationStatus, RunError, RunOutcome, StatusEntry,
    StepError,
};
use super::state::MigrationState;
use crate::migration::{Migration, MigrationId, MigrationSet};
use crate::schema::SchemaError;
use crate::store::{LedgerEntry, MigrationBackend};
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// Applies and reverts a [`MigrationSet`] against a store.
///
/// Migrations run one at a time; each one executes its change set and
/// updates the ledger inside a single [`MigrationBackend::atomically`] call.
pub struct Runner<B: MigrationBackend> {
    backend: B,
    migrations: MigrationSet,
}

impl<B: MigrationBackend> Runner<B> {
    pub fn new(backend: B, migrations: MigrationSet) -> Self {
        Self {
            backend,
            migrations,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn migrations(&self) -> &MigrationSet {
        &self.migrations
    }

    fn ledger_entries(&self) -> Result<Vec<LedgerEntry>, RunError> {
        Ok(self.backend.atomically(|session| session.entries())?)
    }

    pub fn applied_ids(&self) -> Result<Vec<MigrationId>, RunError> {
        Ok(self.backend.atomically(|session| session.applied_ids())?)
    }

    fn check_ledger(&self, applied: &[MigrationId]) -> Result<(), RunError> {
        let unknown: Vec<MigrationId> = applied
            .iter()
            .copied()
            .filter(|id| !self.migrations.contains(*id))
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(RunError::UnknownApplied(unknown))
        }
    }

    /// Migrations `up` would apply, in order.
    pub fn pending(&self) -> Result<Vec<&Migration>, RunError> {
        let applied = self.applied_ids()?;
        Ok(self.migrations.pending(&applied))
    }

    pub fn status(&self) -> Result<Vec<StatusEntry>, RunError> {
        let applied: BTreeMap<MigrationId, _> = self
            .ledger_entries()?
            .into_iter()
            .map(|entry| (entry.migration_id, entry.applied_at))
            .collect();
        let max_applied = applied.keys().next_back().copied();

        let mut entries: Vec<StatusEntry> = self
            .migrations
            .iter()
            .map(|migration| {
                let status = match applied.get(&migration.id) {
                    Some(at) => MigrationStatus::Applied { at: *at },
                    None if max_applied.is_some_and(|max| migration.id < max) => {
                        MigrationStatus::Skipped
                    }
                    None => MigrationStatus::Pending,
                };
                StatusEntry {
                    id: migration.id,
                    name: Some(migration.name.clone()),
                    status,
                }
            })
            .collect();

        entries.extend(
            applied
                .iter()
                .filter(|(id, _)| !self.migrations.contains(**id))
                .map(|(id, at)| StatusEntry {
                    id: *id,
                    name: None,
                    status: MigrationStatus::Unknown { at: *at },
                }),
        );
        entries.sort_by_key(|entry| entry.id);
        Ok(entries)
    }

    /// Applies pending migrations in ascending id order, at most `limit`.
    ///
    /// Stops at the first failure; migrations applied before it stay applied.
    pub fn up(&self, limit: Option<usize>) -> Result<RunOutcome, RunError> {
        let applied = self.applied_ids()?;
        self.check_ledger(&applied)?;

        let mut pending = self.migrations.pending(&applied);
        if let Some(limit) = limit {
            pending.truncate(limit);
        }
        if pending.is_empty() {
            info!("No pending migrations");
            return Ok(RunOutcome::NothingToDo);
        }

        let mut completed = Vec::with_capacity(pending.len());
        for migration in pending {
            if self.run_step(migration, Direction::Up, &completed)? {
                completed.push(migration.id);
            }
        }
        Ok(Self::outcome(Direction::Up, completed))
    }

    /// Reverts applied migrations, newest first.
    ///
    /// Stops at the first failure; migrations reverted before it stay reverted.
    pub fn down(&self, target: DownTarget) -> Result<RunOutcome, RunError> {
        let applied = self.applied_ids()?;
        self.check_ledger(&applied)?;

        let newest_first = applied.iter().rev().copied();
        let targets: Vec<MigrationId> = match target {
            DownTarget::Count(count) => newest_first.take(count).collect(),
            DownTarget::To(id) => newest_first.filter(|applied| *applied > id).collect(),
            DownTarget::All => newest_first.collect(),
        };
        if targets.is_empty() {
            info!("No migrations to revert");
            return Ok(RunOutcome::NothingToDo);
        }

        let mut completed = Vec::with_capacity(targets.len());
        for id in targets {
            let migration = self
                .migrations
                .get(id)
                .ok_or_else(|| RunError::UnknownApplied(vec![id]))?;
            if self.run_step(migration, Direction::Down, &completed)? {
                completed.push(id);
            }
        }
        Ok(Self::outcome(Direction::Down, completed))
    }

    /// Drops ledger entries of migrations that are no longer registered.
    pub fn sync_history(&self) -> Result<Vec<MigrationId>, RunError> {
        let removed = self.backend.atomically(|session| {
            let mut removed = Vec::new();
            for id in session.applied_ids()? {
                if !self.migrations.contains(id) {
                    warn!("Removing unknown migration {} from the ledger", id);
                    session.mark_reverted(id)?;
                    removed.push(id);
                }
            }
            Ok::<_, SchemaError>(removed)
        })?;
        if removed.is_empty() {
            info!("Ledger already in sync with the registered migrations");
        }
        Ok(removed)
    }

    fn outcome(direction: Direction, completed: Vec<MigrationId>) -> RunOutcome {
        if completed.is_empty() {
            RunOutcome::NothingToDo
        } else {
            RunOutcome::Completed {
                direction,
                migrations: completed,
            }
        }
    }

    /// Runs one migration in one direction and records it in the ledger.
    /// Returns `false` when the ledger shows it was already in the target
    /// state.
    fn run_step(
        &self,
        migration: &Migration,
        direction: Direction,
        completed: &[MigrationId],
    ) -> Result<bool, RunError> {
        let (initial, working, done) = match direction {
            Direction::Up => (
                MigrationState::Pending,
                MigrationState::Applying,
                MigrationState::Applied,
            ),
            Direction::Down => (
                MigrationState::Applied,
                MigrationState::Reverting,
                MigrationState::Pending,
            ),
        };
        let state = initial.advance(working)?;
        info!("{} migration {}", capitalize(direction.verb()), migration);

        let result = self
            .backend
            .atomically(|session| -> Result<bool, StepError> {
                let applied = session.is_applied(migration.id)?;
                match direction {
                    Direction::Up if applied => return Ok(false),
                    Direction::Down if !applied => return Ok(false),
                    Direction::Up => {
                        migration.up.execute(session)?;
                        session.mark_applied(migration.id, Utc::now())?;
                    }
                    Direction::Down => {
                        migration.down.execute(session)?;
                        session.mark_reverted(migration.id)?;
                    }
                }
                Ok(true)
            });

        match result {
            Ok(executed) => {
                let state = state.advance(done)?;
                if executed {
                    debug!("Migration {} is now {}", migration, state);
                } else {
                    debug!("Migration {} was already {}, nothing to do", migration, state);
                }
                Ok(executed)
            }
            Err(e) => {
                state.advance(MigrationState::Failed)?;
                let failure = MigrationFailure::new(direction, migration, completed.to_vec(), e);
                error!("{}", failure);
                Err(RunError::Failed(Box::new(failure)))
            }
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
