//! Name and id checks shared by the operations.

use super::error::SchemaError;
use super::models::{Collection, FieldDef};
use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;

const FIELD_ID_LENGTH: usize = 8;
const FIELD_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Names managed by the backend itself, they can't be used for user fields.
pub const RESERVED_FIELD_NAMES: &[&str] = &[
    "id",
    "created",
    "updated",
    "collectionId",
    "collectionName",
    "expand",
];

lazy_static! {
    static ref NAME_REGEX: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
    static ref ID_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_]+$").unwrap();
}

/// Generates a random 8 chars field id, e.g. `x3p8pzcm`.
pub fn generate_field_id() -> String {
    let mut rng = rand::rng();
    (0..FIELD_ID_LENGTH)
        .map(|_| FIELD_ID_ALPHABET[rng.random_range(0..FIELD_ID_ALPHABET.len())] as char)
        .collect()
}

pub fn validate_field_name(name: &str) -> Result<(), SchemaError> {
    if !NAME_REGEX.is_match(name) {
        return Err(SchemaError::validation(format!(
            "invalid field name '{}'",
            name
        )));
    }
    if RESERVED_FIELD_NAMES.contains(&name) {
        return Err(SchemaError::validation(format!(
            "field name '{}' is reserved",
            name
        )));
    }
    Ok(())
}

pub fn validate_field(field: &FieldDef) -> Result<(), SchemaError> {
    if !ID_REGEX.is_match(&field.id) {
        return Err(SchemaError::validation(format!(
            "invalid id '{}' for field '{}'",
            field.id, field.name
        )));
    }
    validate_field_name(&field.name)
}

pub fn validate_collection(collection: &Collection) -> Result<(), SchemaError> {
    if !ID_REGEX.is_match(&collection.id) {
        return Err(SchemaError::validation(format!(
            "invalid collection id '{}'",
            collection.id
        )));
    }
    if !NAME_REGEX.is_match(&collection.name) {
        return Err(SchemaError::validation(format!(
            "invalid collection name '{}'",
            collection.name
        )));
    }
    for (index, field) in collection.fields.iter().enumerate() {
        validate_field(field)?;
        let clash = collection.fields[..index]
            .iter()
            .find(|other| other.id == field.id || other.name == field.name);
        if let Some(other) = clash {
            return Err(SchemaError::validation(format!(
                "collection '{}' defines field '{}' ({}) twice, clashes with '{}' ({})",
                collection.name, field.name, field.id, other.name, other.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;

    #[test]
    fn test_generated_ids_are_valid() {
        for _ in 0..32 {
            let id = generate_field_id();
            assert_eq!(id.len(), FIELD_ID_LENGTH);
            assert!(id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_field_names() {
        validate_field_name("is_admin").unwrap();
        validate_field_name("isAdmin").unwrap();
        validate_field_name("_private").unwrap();

        for bad in ["", "1st", "with space", "dash-ed", "id", "collectionName"] {
            let err = validate_field_name(bad).unwrap_err();
            assert!(matches!(err, SchemaError::Validation(_)), "{}", bad);
        }
    }

    #[test]
    fn test_validate_field_requires_id() {
        let field = FieldDef::with_id("", "email", FieldType::Email);
        assert!(matches!(
            validate_field(&field),
            Err(SchemaError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_collection_detects_duplicate_fields() {
        let collection = Collection::new("c1", "accounts")
            .with_field(FieldDef::with_id("aaaa1111", "email", FieldType::Email))
            .with_field(FieldDef::with_id("bbbb2222", "email", FieldType::Text));

        let err = validate_collection(&collection).unwrap_err();
        assert!(err.to_string().contains("twice"));
    }
}
