//! Collection schema model: collections, field definitions and the error
//! kinds shared by every layer of the engine.

mod error;
mod models;
mod validation;

pub use error::{ErrorKind, SchemaError};
pub use models::*;
pub use validation::{
    generate_field_id, validate_collection, validate_field, validate_field_name,
    RESERVED_FIELD_NAMES,
};
