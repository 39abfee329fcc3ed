use crate::schema::{
    validate_collection, validate_field, validate_field_name, Collection, FieldDef, FieldOptions,
    FieldRef, SchemaError,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A primitive schema operation over one collection.
///
/// Operations are pure: `apply` takes the snapshot of the target collection
/// (`None` when it doesn't exist) and returns the new snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    CreateCollection {
        collection: Collection,
    },
    DeleteCollection,
    AddField {
        field: FieldDef,
        /// Insertion index, appended when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<usize>,
    },
    RenameField {
        field: FieldRef,
        to: String,
    },
    RemoveField {
        field: FieldRef,
    },
    SetFieldOptions {
        field: FieldRef,
        options: FieldOptions,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        required: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unique: Option<bool>,
    },
}

fn require(target: &str, snapshot: Option<Collection>) -> Result<Collection, SchemaError> {
    snapshot.ok_or_else(|| SchemaError::not_found(format!("collection '{}'", target)))
}

fn require_ref<'a>(target: &str, snapshot: Option<&'a Collection>) -> Result<&'a Collection, SchemaError> {
    snapshot.ok_or_else(|| SchemaError::not_found(format!("collection '{}'", target)))
}

impl Operation {
    pub fn apply(
        &self,
        target: &str,
        snapshot: Option<Collection>,
    ) -> Result<Option<Collection>, SchemaError> {
        match self {
            Operation::CreateCollection { collection } => {
                validate_collection(collection)?;
                if !collection.matches(target) {
                    return Err(SchemaError::validation(format!(
                        "collection '{}' ({}) created from a change set targeting '{}'",
                        collection.name, collection.id, target
                    )));
                }
                match snapshot {
                    None => Ok(Some(collection.clone())),
                    Some(existing) if existing == *collection => Ok(Some(existing)),
                    Some(existing) => Err(SchemaError::conflict(format!(
                        "collection '{}' ({}) already exists with a different schema",
                        existing.name, existing.id
                    ))),
                }
            }
            Operation::DeleteCollection => {
                require(target, snapshot)?;
                Ok(None)
            }
            Operation::AddField { field, position } => {
                let mut collection = require(target, snapshot)?;
                validate_field(field)?;
                if let Some(existing) = collection.field_by_id(&field.id) {
                    if existing == field {
                        return Ok(Some(collection));
                    }
                    return Err(SchemaError::conflict(format!(
                        "field id '{}' is already used by '{}' in collection '{}'",
                        field.id, existing.name, collection.name
                    )));
                }
                if collection.field_by_name(&field.name).is_some() {
                    return Err(SchemaError::conflict(format!(
                        "field '{}' already exists in collection '{}'",
                        field.name, collection.name
                    )));
                }
                let index = position
                    .unwrap_or(collection.fields.len())
                    .min(collection.fields.len());
                collection.fields.insert(index, field.clone());
                Ok(Some(collection))
            }
            Operation::RenameField { field, to } => {
                let mut collection = require(target, snapshot)?;
                validate_field_name(to)?;
                let index = field.resolve(&collection)?;
                if &collection.fields[index].name == to {
                    return Ok(Some(collection));
                }
                if collection.field_by_name(to).is_some() {
                    return Err(SchemaError::conflict(format!(
                        "can't rename {} to '{}', the name is taken in collection '{}'",
                        field, to, collection.name
                    )));
                }
                collection.fields[index].name = to.clone();
                Ok(Some(collection))
            }
            Operation::RemoveField { field } => {
                let mut collection = require(target, snapshot)?;
                let index = field.resolve(&collection)?;
                collection.fields.remove(index);
                Ok(Some(collection))
            }
            Operation::SetFieldOptions {
                field,
                options,
                required,
                unique,
            } => {
                let mut collection = require(target, snapshot)?;
                let index = field.resolve(&collection)?;
                let def = &mut collection.fields[index];
                def.options = options.clone();
                if let Some(required) = required {
                    def.required = *required;
                }
                if let Some(unique) = unique {
                    def.unique = *unique;
                }
                Ok(Some(collection))
            }
        }
    }

    /// Inverse derivable from the operation alone, `None` when the operation
    /// destroys information (removals, option changes).
    pub fn inverse(&self) -> Option<Operation> {
        match self {
            Operation::CreateCollection { .. } => Some(Operation::DeleteCollection),
            Operation::AddField { field, .. } => Some(Operation::RemoveField {
                field: FieldRef::by_id(field.id.clone()),
            }),
            Operation::RenameField { field, to } => {
                let old_name = field.name.clone()?;
                Some(Operation::RenameField {
                    field: FieldRef {
                        id: field.id.clone(),
                        name: Some(to.clone()),
                    },
                    to: old_name,
                })
            }
            Operation::DeleteCollection
            | Operation::RemoveField { .. }
            | Operation::SetFieldOptions { .. } => None,
        }
    }

    /// Inverse derived from the snapshot the operation is about to be applied to.
    pub fn invert_against(
        &self,
        target: &str,
        before: Option<&Collection>,
    ) -> Result<Operation, SchemaError> {
        match self {
            Operation::CreateCollection { .. } => Ok(Operation::DeleteCollection),
            Operation::DeleteCollection => Ok(Operation::CreateCollection {
                collection: require_ref(target, before)?.clone(),
            }),
            Operation::AddField { field, .. } => Ok(Operation::RemoveField {
                field: FieldRef::by_id(field.id.clone()),
            }),
            Operation::RenameField { field, to } => {
                let collection = require_ref(target, before)?;
                let current = &collection.fields[field.resolve(collection)?];
                Ok(Operation::RenameField {
                    field: FieldRef::new(current.id.clone(), to.clone()),
                    to: current.name.clone(),
                })
            }
            Operation::RemoveField { field } => {
                let collection = require_ref(target, before)?;
                let index = field.resolve(collection)?;
                Ok(Operation::AddField {
                    field: collection.fields[index].clone(),
                    position: Some(index),
                })
            }
            Operation::SetFieldOptions { field, .. } => {
                let collection = require_ref(target, before)?;
                let current = &collection.fields[field.resolve(collection)?];
                Ok(Operation::SetFieldOptions {
                    field: FieldRef::by_id(current.id.clone()),
                    options: current.options.clone(),
                    required: Some(current.required),
                    unique: Some(current.unique),
                })
            }
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::CreateCollection { collection } => {
                write!(f, "create collection '{}'", collection.name)
            }
            Operation::DeleteCollection => write!(f, "delete collection"),
            Operation::AddField { field, .. } => write!(
                f,
                "add {} field '{}' ({})",
                field.field_type.as_str(),
                field.name,
                field.id
            ),
            Operation::RenameField { field, to } => write!(f, "rename field {} to '{}'", field, to),
            Operation::RemoveField { field } => write!(f, "remove field {}", field),
            Operation::SetFieldOptions { field, .. } => write!(f, "set options of field {}", field),
        }
    }
}
