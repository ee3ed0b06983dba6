//! Rows as plain keyed cell maps.

use std::collections::BTreeMap;
use tessera_codec::Value;

/// A row: its id plus one value per column.
///
/// The id is also stored as the `id` cell, so a row flattens to exactly the
/// shape the table schema validates.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    id: String,
    cells: BTreeMap<String, Value>,
}

impl Row {
    /// Creates a row with only its `id` cell.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let mut cells = BTreeMap::new();
        cells.insert("id".to_string(), Value::Text(id.clone()));
        Self { id, cells }
    }

    /// Builds a row from flattened cells, taking the id from `id`.
    pub(crate) fn from_cells(id: impl Into<String>, cells: BTreeMap<String, Value>) -> Self {
        Self {
            id: id.into(),
            cells,
        }
    }

    /// Adds or replaces a cell.
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    /// Sets a cell. Setting `id` is ignored; the id is fixed at construction.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        if column != "id" {
            self.cells.insert(column, value.into());
        }
    }

    /// Row id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns one cell.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.cells.get(column)
    }

    /// Returns a text cell.
    pub fn get_text(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(Value::as_text)
    }

    /// Returns an integer cell.
    pub fn get_integer(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(Value::as_integer)
    }

    /// All cells, including `id`.
    pub fn cells(&self) -> &BTreeMap<String, Value> {
        &self.cells
    }

    /// Consumes the row, returning its cells.
    pub fn into_cells(self) -> BTreeMap<String, Value> {
        self.cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_a_cell_and_immutable() {
        let row = Row::new("p1").with("title", "Original").with("id", "other");
        assert_eq!(row.id(), "p1");
        assert_eq!(row.get_text("id"), Some("p1"));
        assert_eq!(row.get_text("title"), Some("Original"));
        assert_eq!(row.cells().len(), 2);
    }
}
