//! Table and KV declarations, and their build-time checks.

use crate::error::ConfigurationError;
use crate::schema::column::{ColumnDefinition, ColumnKind};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;

static KEY_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").ok());

/// Returns true if `name` is a valid table, column or kv key.
pub fn is_valid_key(name: &str) -> bool {
    KEY_PATTERN.as_ref().is_some_and(|re| re.is_match(name))
}

pub(crate) fn check_key(what: &'static str, name: &str) -> Result<(), ConfigurationError> {
    if is_valid_key(name) {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidKey {
            what,
            name: name.to_string(),
        })
    }
}

/// Declaration of one table.
///
/// Every table carries an [`id`](ColumnDefinition::id) column; [`new`](Self::new)
/// adds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    /// Table name.
    pub name: String,
    /// Columns, `id` first.
    pub columns: Vec<ColumnDefinition>,
}

impl TableDefinition {
    /// Creates a table with only the `id` column.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: vec![ColumnDefinition::id()],
        }
    }

    /// Adds a column.
    #[must_use]
    pub fn column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    /// Looks up a column by name.
    pub fn get_column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Checks names, duplicates and defaults.
    pub fn check(&self) -> Result<(), ConfigurationError> {
        check_key("table", &self.name)?;

        let mut seen = HashSet::new();
        for column in &self.columns {
            check_key("column", &column.name)?;
            if !seen.insert(column.name.as_str()) {
                return Err(ConfigurationError::DuplicateColumn {
                    table: self.name.clone(),
                    column: column.name.clone(),
                });
            }
            check_column(&self.name, column)?;
        }

        match self.get_column("id") {
            Some(c) if c.kind == ColumnKind::Id => Ok(()),
            _ => Err(ConfigurationError::InvalidColumn {
                owner: self.name.clone(),
                column: "id".into(),
                message: "every table needs an `id` column of kind id".into(),
            }),
        }
    }
}

/// Declaration of one workspace setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvDefinition {
    /// Setting key.
    pub key: String,
    /// Value type, nullability and default. `column.name` equals `key`.
    pub column: ColumnDefinition,
}

impl KvDefinition {
    /// Creates a setting from a column definition, renamed to `key`.
    pub fn new(key: impl Into<String>, mut column: ColumnDefinition) -> Self {
        let key = key.into();
        column.name = key.clone();
        Self { key, column }
    }

    /// Checks the key and default.
    pub fn check(&self) -> Result<(), ConfigurationError> {
        check_key("kv key", &self.key)?;
        check_column("kv", &self.column)
    }
}

fn check_column(owner: &str, column: &ColumnDefinition) -> Result<(), ConfigurationError> {
    let invalid = |message: String| ConfigurationError::InvalidColumn {
        owner: owner.to_string(),
        column: column.name.clone(),
        message,
    };

    if let ColumnKind::Select { options } = &column.kind {
        if options.is_empty() {
            return Err(invalid("select needs at least one option".into()));
        }
    }

    if let Some(default) = &column.default {
        let validator = crate::schema::SchemaValidator::for_column(column);
        if let Err(errors) = validator.validate_value(default) {
            let detail: Vec<_> = errors.iter().map(|e| e.message.as_str()).collect();
            return Err(invalid(format!("bad default: {}", detail.join("; "))));
        }
    }
    Ok(())
}
