//! Change sets: ordered groups of [`Operation`]s over one collection,
//! applied all-or-nothing.

mod operation;

pub use operation::Operation;

use crate::schema::{Collection, ErrorKind, FieldDef, FieldOptions, FieldRef, SchemaError};
use crate::store::SchemaStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// One direction of a migration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Name or id of the target collection.
    #[serde(default)]
    pub collection: String,
    #[serde(default)]
    pub operations: Vec<Operation>,
}

/// A change set failure, pointing at the operation that caused it.
#[derive(Debug)]
pub struct ChangeSetError {
    pub collection: String,
    /// Index of the failing operation, `None` when loading or persisting
    /// the collection failed.
    pub operation: Option<usize>,
    pub description: Option<String>,
    pub source: SchemaError,
}

impl ChangeSetError {
    fn at(collection: &str, index: usize, operation: &Operation, source: SchemaError) -> Self {
        Self {
            collection: collection.to_string(),
            operation: Some(index),
            description: Some(operation.to_string()),
            source,
        }
    }

    fn store(collection: &str, source: SchemaError) -> Self {
        Self {
            collection: collection.to_string(),
            operation: None,
            description: None,
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

impl fmt::Display for ChangeSetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.operation, &self.description) {
            (Some(index), Some(description)) => write!(
                f,
                "operation #{} ({}) on '{}' failed: {}",
                index, description, self.collection, self.source
            ),
            _ => write!(f, "change set on '{}' failed: {}", self.collection, self.source),
        }
    }
}

impl From<SchemaError> for ChangeSetError {
    fn from(source: SchemaError) -> Self {
        Self::store("", source)
    }
}

impl std::error::Error for ChangeSetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl ChangeSet {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            operations: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn push(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn create_collection(self, collection: Collection) -> Self {
        self.push(Operation::CreateCollection { collection })
    }

    pub fn delete_collection(self) -> Self {
        self.push(Operation::DeleteCollection)
    }

    pub fn add_field(self, field: FieldDef) -> Self {
        self.push(Operation::AddField {
            field,
            position: None,
        })
    }

    pub fn rename_field(self, field: FieldRef, to: impl Into<String>) -> Self {
        self.push(Operation::RenameField {
            field,
            to: to.into(),
        })
    }

    pub fn remove_field(self, field: FieldRef) -> Self {
        self.push(Operation::RemoveField { field })
    }

    pub fn set_field_options(self, field: FieldRef, options: FieldOptions) -> Self {
        self.push(Operation::SetFieldOptions {
            field,
            options,
            required: None,
            unique: None,
        })
    }

    pub fn validate(&self) -> Result<(), ChangeSetError> {
        if !self.operations.is_empty() && self.collection.trim().is_empty() {
            return Err(ChangeSetError::store(
                &self.collection,
                SchemaError::validation("change set has operations but no target collection"),
            ));
        }
        Ok(())
    }

    /// Applies every operation to `before` and returns the resulting
    /// snapshot. `before` is left untouched, a failure yields no snapshot.
    pub fn apply(&self, before: Option<&Collection>) -> Result<Option<Collection>, ChangeSetError> {
        self.validate()?;
        let mut current = before.cloned();
        for (index, operation) in self.operations.iter().enumerate() {
            current = operation
                .apply(&self.collection, current)
                .map_err(|e| ChangeSetError::at(&self.collection, index, operation, e))?;
        }
        Ok(current)
    }

    /// Applies the change set to the collection held by `store`.
    ///
    /// The new schema is computed first and then persisted with a single
    /// store call. Returns whether the store was modified.
    pub fn execute<S: SchemaStore + ?Sized>(&self, store: &S) -> Result<bool, ChangeSetError> {
        if self.operations.is_empty() {
            return Ok(false);
        }
        self.validate()?;

        let before = store
            .get_collection(&self.collection)
            .map_err(|e| ChangeSetError::store(&self.collection, e))?;
        let after = self.apply(before.as_ref())?;

        let persisted = match (before, after) {
            (None, None) => Ok(false),
            (None, Some(created)) => store.create_collection(&created).map(|_| true),
            (Some(before), Some(after)) if before == after => Ok(false),
            // Dropped and recreated under a new id
            (Some(before), Some(after)) if before.id != after.id => store
                .delete_collection(&before)
                .and_then(|_| store.create_collection(&after))
                .map(|_| true),
            (Some(_), Some(after)) => store.save_collection(&after).map(|_| true),
            (Some(before), None) => store.delete_collection(&before).map(|_| true),
        };
        let changed = persisted.map_err(|e| ChangeSetError::store(&self.collection, e))?;
        if !changed {
            debug!(
                "Change set on '{}' left the schema unchanged",
                self.collection
            );
        }
        Ok(changed)
    }

    /// Statically derived inverse, `None` if any operation isn't invertible
    /// on its own.
    pub fn inverse(&self) -> Option<ChangeSet> {
        let operations = self
            .operations
            .iter()
            .rev()
            .map(Operation::inverse)
            .collect::<Option<Vec<_>>>()?;
        Some(ChangeSet {
            collection: self.collection.clone(),
            operations,
        })
    }

    /// Inverse derived from the snapshot the change set will be applied to.
    pub fn invert_against(&self, before: Option<&Collection>) -> Result<ChangeSet, ChangeSetError> {
        self.validate()?;
        let mut current = before.cloned();
        let mut inverted = Vec::with_capacity(self.operations.len());
        for (index, operation) in self.operations.iter().enumerate() {
            let wrap = |e| ChangeSetError::at(&self.collection, index, operation, e);
            inverted.push(
                operation
                    .invert_against(&self.collection, current.as_ref())
                    .map_err(wrap)?,
            );
            current = operation.apply(&self.collection, current).map_err(wrap)?;
        }
        inverted.reverse();
        Ok(ChangeSet {
            collection: self.collection.clone(),
            operations: inverted,
        })
    }
}
