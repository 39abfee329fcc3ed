use std::fmt;
use thiserror::Error;

/// Lifecycle of a single migration during a run.
///
/// ```text
/// Pending -> Applying -> Applied -> Reverting -> Pending
///               |                      |
///               +------> Failed <------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    Pending,
    Applying,
    Applied,
    Reverting,
    Failed,
}

#[derive(Debug, Error)]
#[error("Invalid migration state transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: MigrationState,
    pub to: MigrationState,
}

impl MigrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationState::Pending => "pending",
            MigrationState::Applying => "applying",
            MigrationState::Applied => "applied",
            MigrationState::Reverting => "reverting",
            MigrationState::Failed => "failed",
        }
    }

    pub fn can_advance_to(&self, next: MigrationState) -> bool {
        use MigrationState::*;
        matches!(
            (self, next),
            (Pending, Applying)
                | (Applying, Applied)
                | (Applying, Failed)
                | (Applied, Reverting)
                | (Reverting, Pending)
                | (Reverting, Failed)
        )
    }

    pub fn advance(self, next: MigrationState) -> Result<MigrationState, InvalidTransition> {
        if self.can_advance_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Failed migrations are reported, never retried within a run.
    pub fn is_terminal(&self) -> bool {
        *self == MigrationState::Failed
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
