//! Compiled schema validators.

use crate::schema::column::{ColumnDefinition, ColumnKind, DateWithZone};
use crate::schema::definition::TableDefinition;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tessera_codec::Value;

/// Why a cell failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldErrorKind {
    /// Required cell is absent.
    Missing,
    /// `null` in a non-nullable column.
    NullNotAllowed,
    /// Value has the wrong type.
    WrongType,
    /// Select value is not one of the options.
    UnknownOption,
    /// A tag is not text, or not one of the options.
    InvalidTag,
    /// Date text does not parse.
    InvalidDate,
}

/// A structured validation failure for one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Column that failed.
    pub column: String,
    /// Failure category.
    pub kind: FieldErrorKind,
    /// Human-readable description.
    pub message: String,
}

impl FieldError {
    fn new(column: &str, kind: FieldErrorKind, message: impl Into<String>) -> Self {
        Self {
            column: column.to_string(),
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.column, self.message)
    }
}

#[derive(Debug, Clone)]
enum Check {
    Id,
    Text,
    Integer,
    Real,
    Boolean,
    Date,
    Select(HashSet<String>),
    Tags(Option<HashSet<String>>),
}

#[derive(Debug, Clone)]
struct CompiledColumn {
    name: String,
    nullable: bool,
    check: Check,
}

impl CompiledColumn {
    fn compile(column: &ColumnDefinition) -> Self {
        let check = match &column.kind {
            ColumnKind::Id => Check::Id,
            ColumnKind::Text => Check::Text,
            ColumnKind::RichText => Check::Id,
            ColumnKind::Integer => Check::Integer,
            ColumnKind::Real => Check::Real,
            ColumnKind::Boolean => Check::Boolean,
            ColumnKind::Date => Check::Date,
            ColumnKind::Select { options } => Check::Select(options.iter().cloned().collect()),
            ColumnKind::Tags { options } => {
                Check::Tags(options.as_ref().map(|o| o.iter().cloned().collect()))
            }
        };
        Self {
            name: column.name.clone(),
            nullable: column.nullable,
            check,
        }
    }

    fn validate(&self, value: Option<&Value>, errors: &mut Vec<FieldError>) {
        let name = self.name.as_str();
        let value = match value {
            None if self.nullable => return,
            None => {
                errors.push(FieldError::new(name, FieldErrorKind::Missing, "required"));
                return;
            }
            Some(Value::Null) if self.nullable => return,
            Some(Value::Null) => {
                errors.push(FieldError::new(
                    name,
                    FieldErrorKind::NullNotAllowed,
                    "null is not allowed",
                ));
                return;
            }
            Some(v) => v,
        };

        let wrong_type = |expected: &str| {
            FieldError::new(
                name,
                FieldErrorKind::WrongType,
                format!("expected {expected}, found {}", value.type_name()),
            )
        };

        match &self.check {
            Check::Id => match value.as_text() {
                Some(s) if !s.is_empty() => {}
                Some(_) => errors.push(wrong_type("non-empty text")),
                None => errors.push(wrong_type("text")),
            },
            Check::Text => {
                if value.as_text().is_none() {
                    errors.push(wrong_type("text"));
                }
            }
            Check::Integer => {
                if value.as_integer().is_none() {
                    errors.push(wrong_type("integer"));
                }
            }
            Check::Real => {
                if !matches!(value, Value::Float(_) | Value::Integer(_)) {
                    errors.push(wrong_type("number"));
                }
            }
            Check::Boolean => {
                if value.as_bool().is_none() {
                    errors.push(wrong_type("boolean"));
                }
            }
            Check::Date => match value.as_text() {
                Some(text) => {
                    if let Err(reason) = DateWithZone::parse(text) {
                        errors.push(FieldError::new(name, FieldErrorKind::InvalidDate, reason));
                    }
                }
                None => errors.push(wrong_type("date text")),
            },
            Check::Select(options) => match value.as_text() {
                Some(s) if options.contains(s) => {}
                Some(s) => errors.push(FieldError::new(
                    name,
                    FieldErrorKind::UnknownOption,
                    format!("{s:?} is not an option"),
                )),
                None => errors.push(wrong_type("text")),
            },
            Check::Tags(options) => match value.as_array() {
                Some(items) => {
                    for item in items {
                        match (item.as_text(), options) {
                            (Some(tag), Some(allowed)) if !allowed.contains(tag) => {
                                errors.push(FieldError::new(
                                    name,
                                    FieldErrorKind::InvalidTag,
                                    format!("{tag:?} is not an option"),
                                ));
                            }
                            (Some(_), _) => {}
                            (None, _) => errors.push(FieldError::new(
                                name,
                                FieldErrorKind::InvalidTag,
                                format!("tag must be text, found {}", item.type_name()),
                            )),
                        }
                    }
                }
                None => errors.push(wrong_type("array of text")),
            },
        }
    }
}

/// Validator compiled once from a table or kv declaration.
///
/// Validation is linear in the number of declared columns. Cells that are
/// not declared are ignored, so rows written by peers on a newer schema stay
/// valid.
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    columns: Vec<CompiledColumn>,
}

impl SchemaValidator {
    /// Compiles the validator of a table.
    pub fn for_table(table: &TableDefinition) -> Self {
        Self {
            columns: table.columns.iter().map(CompiledColumn::compile).collect(),
        }
    }

    /// Compiles a single-column validator, used for kv entries.
    pub fn for_column(column: &ColumnDefinition) -> Self {
        Self {
            columns: vec![CompiledColumn::compile(column)],
        }
    }

    /// Validates a flattened row.
    pub fn validate(&self, cells: &BTreeMap<String, Value>) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        for column in &self.columns {
            column.validate(cells.get(&column.name), &mut errors);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validates one value against every compiled column.
    pub fn validate_value(&self, value: &Value) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        for column in &self.columns {
            column.validate(Some(value), &mut errors);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
