//! Workspace schema: column kinds, table and kv declarations, validators.

mod column;
mod definition;
mod validator;

pub use column::{ColumnDefinition, ColumnKind, DateWithZone};
pub use definition::{is_valid_key, KvDefinition, TableDefinition};
pub use validator::{FieldError, FieldErrorKind, SchemaValidator};

pub(crate) use definition::check_key;
