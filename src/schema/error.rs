use std::fmt;
use thiserror::Error;

/// Errors surfaced by schema operations and the store adapters.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Malformed operation, e.g. a field reference with neither id nor name.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The target state doesn't match the expected precondition.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A collection or field required by the operation is absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Underlying persistence failure.
    #[error("Store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl SchemaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchemaError::Validation(_) => ErrorKind::Validation,
            SchemaError::Conflict(_) => ErrorKind::Conflict,
            SchemaError::NotFound(_) => ErrorKind::NotFound,
            SchemaError::Store(_) => ErrorKind::Store,
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        SchemaError::Validation(msg.into())
    }

    pub(crate) fn conflict(msg: impl Into<String>) -> Self {
        SchemaError::Conflict(msg.into())
    }

    pub(crate) fn not_found(msg: impl Into<String>) -> Self {
        SchemaError::NotFound(msg.into())
    }
}

/// The error kind, as reported to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Store,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Conflict => "ConflictError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::Store => "StoreError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
