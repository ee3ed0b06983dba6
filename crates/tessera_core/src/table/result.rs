//! Read results and write outcomes of the table engine.

use crate::row::Row;
use crate::schema::FieldError;
use std::collections::BTreeMap;
use tessera_codec::Value;

/// A stored row that fails its table's schema.
///
/// Invalid rows are never dropped or coerced; they carry the raw cells so the
/// caller can repair or delete them.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidRow {
    /// Table the row belongs to.
    pub table: String,
    /// Row id.
    pub id: String,
    /// Raw cells as stored.
    pub cells: BTreeMap<String, Value>,
    /// Every failing column.
    pub errors: Vec<FieldError>,
}

/// Result of reading one row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowResult {
    /// The row exists and validates.
    Valid(Row),
    /// The row exists but fails validation.
    Invalid(InvalidRow),
    /// No row with this id exists locally.
    NotFound {
        /// Table that was read.
        table: String,
        /// Requested id.
        id: String,
    },
}

impl RowResult {
    /// Returns the row if it is valid.
    pub fn valid(&self) -> Option<&Row> {
        match self {
            RowResult::Valid(row) => Some(row),
            _ => None,
        }
    }

    /// Consumes the result, returning the row if it is valid.
    pub fn into_valid(self) -> Option<Row> {
        match self {
            RowResult::Valid(row) => Some(row),
            _ => None,
        }
    }

    /// Returns the invalid row, if any.
    pub fn invalid(&self) -> Option<&InvalidRow> {
        match self {
            RowResult::Invalid(row) => Some(row),
            _ => None,
        }
    }

    /// Returns true for `Valid`.
    pub fn is_valid(&self) -> bool {
        matches!(self, RowResult::Valid(_))
    }

    /// Returns true for `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RowResult::NotFound { .. })
    }

    /// Row id, whatever the state.
    pub fn id(&self) -> &str {
        match self {
            RowResult::Valid(row) => row.id(),
            RowResult::Invalid(row) => &row.id,
            RowResult::NotFound { id, .. } => id,
        }
    }
}

/// Outcome of a single `update` or `delete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The row existed and the write was recorded.
    Applied,
    /// The row is absent locally; nothing was written or propagated.
    NotFoundLocally,
}

impl WriteOutcome {
    /// Returns true for `Applied`.
    pub fn is_applied(self) -> bool {
        matches!(self, WriteOutcome::Applied)
    }
}

/// Outcome of a batched `update_many` or `delete_many`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every row existed.
    AllApplied {
        /// Ids written.
        ids: Vec<String>,
    },
    /// Some rows existed.
    PartiallyApplied {
        /// Ids written.
        applied: Vec<String>,
        /// Ids absent locally.
        not_found_locally: Vec<String>,
    },
    /// No row existed.
    NoneApplied {
        /// Ids absent locally.
        not_found_locally: Vec<String>,
    },
}

impl BatchOutcome {
    pub(crate) fn from_parts(applied: Vec<String>, not_found_locally: Vec<String>) -> Self {
        match (applied.is_empty(), not_found_locally.is_empty()) {
            (_, true) => BatchOutcome::AllApplied { ids: applied },
            (true, false) => BatchOutcome::NoneApplied { not_found_locally },
            (false, false) => BatchOutcome::PartiallyApplied {
                applied,
                not_found_locally,
            },
        }
    }

    /// Ids that were written.
    pub fn applied(&self) -> &[String] {
        match self {
            BatchOutcome::AllApplied { ids } => ids,
            BatchOutcome::PartiallyApplied { applied, .. } => applied,
            BatchOutcome::NoneApplied { .. } => &[],
        }
    }

    /// Ids absent locally.
    pub fn not_found_locally(&self) -> &[String] {
        match self {
            BatchOutcome::AllApplied { .. } => &[],
            BatchOutcome::PartiallyApplied {
                not_found_locally, ..
            }
            | BatchOutcome::NoneApplied { not_found_locally } => not_found_locally,
        }
    }
}

/// A classified per-row change delivered to `observe_changes` subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange {
    /// First notification for a newly created row.
    Add(RowResult),
    /// Later change to an existing row.
    Update(RowResult),
    /// The row was removed; its data is already gone.
    Delete,
}

impl RowChange {
    /// Row state carried by `Add` and `Update`.
    pub fn result(&self) -> Option<&RowResult> {
        match self {
            RowChange::Add(r) | RowChange::Update(r) => Some(r),
            RowChange::Delete => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn batch_outcome_classification() {
        assert_eq!(
            BatchOutcome::from_parts(ids(&["a"]), vec![]),
            BatchOutcome::AllApplied { ids: ids(&["a"]) }
        );
        assert_eq!(
            BatchOutcome::from_parts(vec![], ids(&["b"])),
            BatchOutcome::NoneApplied {
                not_found_locally: ids(&["b"])
            }
        );
        let partial = BatchOutcome::from_parts(ids(&["a"]), ids(&["b"]));
        assert_eq!(partial.applied(), ids(&["a"]).as_slice());
        assert_eq!(partial.not_found_locally(), ids(&["b"]).as_slice());
    }

    #[test]
    fn empty_batch_is_all_applied() {
        assert_eq!(
            BatchOutcome::from_parts(vec![], vec![]),
            BatchOutcome::AllApplied { ids: vec![] }
        );
    }
}
