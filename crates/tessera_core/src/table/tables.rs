//! The set of declared tables of one workspace.

use super::Table;
use crate::error::{ConfigurationError, CoreError, CoreResult};
use crate::schema::{SchemaValidator, TableDefinition};
use std::collections::BTreeMap;
use std::sync::Arc;
use tessera_doc::Doc;

/// Every declared table of a workspace, bound to one document.
#[derive(Clone, Debug)]
pub struct Tables {
    tables: Arc<BTreeMap<String, Table>>,
}

impl Tables {
    /// Checks the declarations, compiles one validator per table and binds
    /// the tables to `doc`. No container is created.
    pub fn new(doc: &Doc, definitions: &[TableDefinition]) -> CoreResult<Self> {
        let mut tables = BTreeMap::new();
        for definition in definitions {
            definition.check()?;
            if tables.contains_key(&definition.name) {
                return Err(ConfigurationError::DuplicateTable {
                    name: definition.name.clone(),
                }
                .into());
            }
            let validator = SchemaValidator::for_table(definition);
            let table = Table::new(doc, definition.clone(), validator)?;
            tables.insert(definition.name.clone(), table);
        }
        Ok(Self {
            tables: Arc::new(tables),
        })
    }

    /// Returns a table by name.
    pub fn get(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Returns a table by name, or [`CoreError::UnknownTable`].
    pub fn table(&self, name: &str) -> CoreResult<&Table> {
        self.get(name).ok_or_else(|| CoreError::unknown_table(name))
    }

    /// Tables in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    /// Table names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Number of declared tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns true if no table is declared.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDefinition;

    #[test]
    fn rejects_duplicates_and_bad_names() {
        let doc = Doc::new();
        let posts = TableDefinition::new("posts");
        let err = Tables::new(&doc, &[posts.clone(), posts]).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Configuration(ConfigurationError::DuplicateTable { .. })
        ));

        let bad = TableDefinition::new("9lives").column(ColumnDefinition::text("t"));
        assert!(Tables::new(&doc, &[bad]).unwrap_err().is_configuration());
    }

    #[test]
    fn lookup() {
        let doc = Doc::new();
        let tables = Tables::new(
            &doc,
            &[TableDefinition::new("posts"), TableDefinition::new("authors")],
        )
        .unwrap();
        assert_eq!(tables.names().collect::<Vec<_>>(), vec!["authors", "posts"]);
        assert!(tables.table("posts").is_ok());
        assert!(matches!(
            tables.table("nope"),
            Err(CoreError::UnknownTable { .. })
        ));
    }
}
