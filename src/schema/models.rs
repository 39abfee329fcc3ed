use super::error::SchemaError;
use super::validation::generate_field_id;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Free-form, type specific field options (e.g. `min`/`max` for text).
pub type FieldOptions = serde_json::Map<String, serde_json::Value>;

// =============================================================================
// Field types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Editor,
    Number,
    Bool,
    Email,
    Url,
    Date,
    Select,
    Json,
    File,
    Relation,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Editor => "editor",
            FieldType::Number => "number",
            FieldType::Bool => "bool",
            FieldType::Email => "email",
            FieldType::Url => "url",
            FieldType::Date => "date",
            FieldType::Select => "select",
            FieldType::Json => "json",
            FieldType::File => "file",
            FieldType::Relation => "relation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(FieldType::Text),
            "editor" => Some(FieldType::Editor),
            "number" => Some(FieldType::Number),
            "bool" => Some(FieldType::Bool),
            "email" => Some(FieldType::Email),
            "url" => Some(FieldType::Url),
            "date" => Some(FieldType::Date),
            "select" => Some(FieldType::Select),
            "json" => Some(FieldType::Json),
            "file" => Some(FieldType::File),
            "relation" => Some(FieldType::Relation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionType {
    #[default]
    Base,
    Auth,
    View,
}

impl CollectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionType::Base => "base",
            CollectionType::Auth => "auth",
            CollectionType::View => "view",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "base" => Some(CollectionType::Base),
            "auth" => Some(CollectionType::Auth),
            "view" => Some(CollectionType::View),
            _ => None,
        }
    }
}

// =============================================================================
// Field definitions
// =============================================================================

/// A single field of a collection schema.
///
/// `id` is the stable identity of the field and never changes; `name` is the
/// user facing label and can be renamed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    #[serde(default)]
    pub system: bool,
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub presentable: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub options: FieldOptions,
}

impl FieldDef {
    /// Creates a field with a freshly generated id.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self::with_id(generate_field_id(), name, field_type)
    }

    pub fn with_id(id: impl Into<String>, name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            system: false,
            id: id.into(),
            name: name.into(),
            field_type,
            required: false,
            presentable: false,
            unique: false,
            options: FieldOptions::new(),
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// Sets the options from a JSON value; non-object values are ignored.
    pub fn options(mut self, options: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = options {
            self.options = map;
        }
        self
    }

    pub fn field_ref(&self) -> FieldRef {
        FieldRef {
            id: Some(self.id.clone()),
            name: Some(self.name.clone()),
        }
    }
}

/// Reference to a field, resolved by id when one is given, by name otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl FieldRef {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: None,
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: Some(name.into()),
        }
    }

    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: Some(name.into()),
        }
    }

    /// Index of the referenced field inside `collection`.
    pub fn resolve(&self, collection: &Collection) -> Result<usize, SchemaError> {
        match (&self.id, &self.name) {
            (Some(id), _) => collection
                .fields
                .iter()
                .position(|f| &f.id == id)
                .ok_or_else(|| {
                    SchemaError::not_found(format!(
                        "field id '{}' in collection '{}'",
                        id, collection.name
                    ))
                }),
            (None, Some(name)) => collection
                .fields
                .iter()
                .position(|f| &f.name == name)
                .ok_or_else(|| {
                    SchemaError::not_found(format!(
                        "field '{}' in collection '{}'",
                        name, collection.name
                    ))
                }),
            (None, None) => Err(SchemaError::validation(
                "field reference requires an id or a name",
            )),
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.id, &self.name) {
            (Some(id), Some(name)) => write!(f, "{} ({})", name, id),
            (Some(id), None) => write!(f, "#{}", id),
            (None, Some(name)) => write!(f, "{}", name),
            (None, None) => write!(f, "<empty>"),
        }
    }
}

// =============================================================================
// Collections
// =============================================================================

/// Schema of one collection, as owned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub collection_type: CollectionType,
    #[serde(default)]
    pub system: bool,
    #[serde(rename = "schema", default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub indexes: Vec<String>,
    #[serde(default)]
    pub options: FieldOptions,
}

impl Collection {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            collection_type: CollectionType::Base,
            system: false,
            fields: Vec::new(),
            indexes: Vec::new(),
            options: FieldOptions::new(),
        }
    }

    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Whether `name_or_id` designates this collection.
    pub fn matches(&self, name_or_id: &str) -> bool {
        self.id == name_or_id || self.name == name_or_id
    }

    pub fn field_by_id(&self, id: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}
