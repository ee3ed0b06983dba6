//! Table engine.

mod observe;
mod result;
mod tables;

pub use observe::{ChangeSubscription, ObservationPhase};
pub use result::{BatchOutcome, InvalidRow, RowChange, RowResult, WriteOutcome};
pub use tables::Tables;

use crate::cache::RowCache;
use crate::cell_store::CellStore;
use crate::error::CoreResult;
use crate::row::Row;
use crate::schema::{SchemaValidator, TableDefinition};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tessera_codec::{to_canonical_cbor, Value};
use tessera_doc::{Content, Doc, MapRef, TransactionInfo, Txn};
use tracing::debug;

/// Name of the root map holding one container per table.
pub(crate) const TABLES_ROOT: &str = "tables";

/// A schema-typed collection of rows stored in the workspace document.
///
/// Rows live in a per-table map container (row id → cell sequence) under the
/// document's `tables` root. The container is created by the first write,
/// never eagerly, and is never deleted afterwards: [`clear`](Self::clear)
/// removes the rows but keeps the container so observers stay bound.
///
/// Every row is validated on read against a validator compiled once when the
/// workspace was built. Rows that fail are reported as
/// [`RowResult::Invalid`], never dropped.
///
/// # Example
///
/// ```rust
/// use tessera_core::{ColumnDefinition, Row, TableDefinition, Tables};
/// use tessera_doc::Doc;
///
/// let doc = Doc::new();
/// let posts = TableDefinition::new("posts").column(ColumnDefinition::text("title"));
/// let tables = Tables::new(&doc, &[posts]).unwrap();
/// let table = tables.get("posts").unwrap();
///
/// table.upsert(Row::new("p1").with("title", "Hello")).unwrap();
/// assert_eq!(table.count(), 1);
/// assert!(table.get("p1").is_valid());
/// ```
#[derive(Clone)]
pub struct Table {
    inner: Arc<TableInner>,
}

pub(crate) struct TableInner {
    definition: TableDefinition,
    validator: SchemaValidator,
    doc: Doc,
    root: MapRef,
    cache: Mutex<RowCache>,
}

impl TableInner {
    fn name(&self) -> &str {
        &self.definition.name
    }

    /// Current table container, if any replica has written to the table.
    fn container(&self) -> Option<MapRef> {
        self.root.get_map(&self.doc, self.name())
    }

    fn ensure_container(&self, txn: &Txn<'_>) -> CoreResult<MapRef> {
        match self.container() {
            Some(map) => Ok(map),
            None => {
                debug!(table = %self.name(), "creating table container");
                Ok(self.root.insert_map(txn, self.name())?)
            }
        }
    }

    /// Cached adapter for a row of `container`. A row that is gone loses
    /// its cached adapter.
    fn row_store(&self, container: &MapRef, id: &str) -> Option<Arc<CellStore>> {
        let Some(seq) = container.get_seq(&self.doc, id) else {
            self.invalidate(id);
            return None;
        };
        let mut cache = self.cache.lock();
        if let Some(store) = cache.get(id, seq.id()) {
            return Some(store);
        }
        let store = Arc::new(CellStore::new(seq));
        cache.insert(id, store.clone());
        Some(store)
    }

    fn read(&self, id: &str) -> RowResult {
        let store = self
            .container()
            .and_then(|container| self.row_store(&container, id));
        match store {
            Some(store) => self.classify(id, store.to_cells(&self.doc)),
            None => RowResult::NotFound {
                table: self.name().to_string(),
                id: id.to_string(),
            },
        }
    }

    fn classify(&self, id: &str, mut cells: BTreeMap<String, Value>) -> RowResult {
        for column in &self.definition.columns {
            if let Some(default) = &column.default {
                cells
                    .entry(column.name.clone())
                    .or_insert_with(|| default.clone());
            }
        }
        match self.validator.validate(&cells) {
            Ok(()) => RowResult::Valid(Row::from_cells(id, cells)),
            Err(errors) => RowResult::Invalid(InvalidRow {
                table: self.name().to_string(),
                id: id.to_string(),
                cells,
                errors,
            }),
        }
    }

    /// Ids of the rows present now. Adapters of rows deleted since the
    /// last scan are evicted.
    fn row_ids(&self) -> Vec<String> {
        let ids: Vec<String> = self
            .container()
            .map(|container| {
                container
                    .iter(&self.doc)
                    .into_iter()
                    .filter(|(_, content)| matches!(content, Content::Seq(_)))
                    .map(|(id, _)| id)
                    .collect()
            })
            .unwrap_or_default();
        let present: HashSet<&str> = ids.iter().map(String::as_str).collect();
        self.cache.lock().retain(|id| present.contains(id));
        ids
    }

    fn invalidate(&self, id: &str) {
        self.cache.lock().invalidate(id);
    }

    fn invalidate_all(&self) {
        self.cache.lock().invalidate_all();
    }
}

impl Table {
    pub(crate) fn new(
        doc: &Doc,
        definition: TableDefinition,
        validator: SchemaValidator,
    ) -> CoreResult<Self> {
        let root = doc.get_or_insert_map(TABLES_ROOT)?;
        Ok(Self {
            inner: Arc::new(TableInner {
                definition,
                validator,
                doc: doc.clone(),
                root,
                cache: Mutex::new(RowCache::new()),
            }),
        })
    }

    /// Table name.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Table declaration.
    pub fn definition(&self) -> &TableDefinition {
        &self.inner.definition
    }

    /// Document the table lives in.
    pub fn document(&self) -> &Doc {
        &self.inner.doc
    }

    /// Reads one row.
    pub fn get(&self, id: &str) -> RowResult {
        self.inner.read(id)
    }

    /// Reads every row, ordered by id.
    pub fn get_all(&self) -> Vec<RowResult> {
        self.inner
            .row_ids()
            .iter()
            .map(|id| self.inner.read(id))
            .collect()
    }

    /// Reads every valid row, ordered by id.
    pub fn get_all_valid(&self) -> Vec<Row> {
        self.get_all()
            .into_iter()
            .filter_map(RowResult::into_valid)
            .collect()
    }

    /// Reads every invalid row, ordered by id.
    pub fn get_all_invalid(&self) -> Vec<InvalidRow> {
        self.get_all()
            .into_iter()
            .filter_map(|r| match r {
                RowResult::Invalid(row) => Some(row),
                _ => None,
            })
            .collect()
    }

    /// Creates or replaces a row.
    ///
    /// Only cells that differ from the stored row are written, and stored
    /// cells missing from `row` are removed.
    pub fn upsert(&self, row: Row) -> CoreResult<()> {
        self.upsert_many([row])
    }

    /// Creates or replaces several rows in one transaction.
    pub fn upsert_many(&self, rows: impl IntoIterator<Item = Row>) -> CoreResult<()> {
        let rows = encodable(rows)?;
        let inner = &self.inner;
        inner.doc.transact(|txn| -> CoreResult<()> {
            let container = inner.ensure_container(txn)?;
            for row in rows {
                let id = row.id().to_string();
                let store = match inner.row_store(&container, &id) {
                    Some(store) => store,
                    None => {
                        let store = Arc::new(CellStore::new(container.insert_seq(txn, &id)?));
                        inner.cache.lock().insert(&id, store.clone());
                        store
                    }
                };

                let mut stale = store.to_cells(&inner.doc);
                for (column, value) in row.into_cells() {
                    if stale.remove(&column).as_ref() != Some(&value) {
                        store.set(txn, &column, value)?;
                    }
                }
                for column in stale.keys() {
                    store.delete(txn, column)?;
                }
            }
            Ok(())
        })
    }

    /// Merges `row`'s cells into an existing row.
    ///
    /// Never creates a row: if the id is absent locally nothing is written
    /// and [`WriteOutcome::NotFoundLocally`] is returned.
    pub fn update(&self, row: Row) -> CoreResult<WriteOutcome> {
        let outcome = self.update_many([row])?;
        Ok(if outcome.not_found_locally().is_empty() {
            WriteOutcome::Applied
        } else {
            WriteOutcome::NotFoundLocally
        })
    }

    /// Merges several partial rows in one transaction.
    pub fn update_many(&self, rows: impl IntoIterator<Item = Row>) -> CoreResult<BatchOutcome> {
        let rows = encodable(rows)?;
        let inner = &self.inner;
        let (applied, missing) = inner.doc.transact(|txn| -> CoreResult<_> {
            let mut applied = Vec::new();
            let mut missing = Vec::new();
            let container = inner.container();

            for row in rows {
                let id = row.id().to_string();
                let Some(store) = container
                    .as_ref()
                    .and_then(|c| inner.row_store(c, &id))
                else {
                    missing.push(id);
                    continue;
                };
                for (column, value) in row.into_cells() {
                    if store.get(&inner.doc, &column).as_ref() != Some(&value) {
                        store.set(txn, &column, value)?;
                    }
                }
                applied.push(id);
            }
            Ok((applied, missing))
        })?;

        if !missing.is_empty() {
            debug!(table = %self.name(), missing = missing.len(), "update skipped absent rows");
        }
        Ok(BatchOutcome::from_parts(applied, missing))
    }

    /// Deletes a row. Deleting an absent id is a local no-op.
    pub fn delete(&self, id: &str) -> CoreResult<WriteOutcome> {
        let outcome = self.delete_many([id])?;
        Ok(if outcome.applied().is_empty() {
            WriteOutcome::NotFoundLocally
        } else {
            WriteOutcome::Applied
        })
    }

    /// Deletes several rows in one transaction.
    pub fn delete_many<I, S>(&self, ids: I) -> CoreResult<BatchOutcome>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let inner = &self.inner;
        let (applied, missing) = inner.doc.transact(|txn| -> CoreResult<_> {
            let mut applied = Vec::new();
            let mut missing = Vec::new();
            let container = inner.container();

            for id in ids {
                let id = id.as_ref();
                let removed = match &container {
                    Some(c) => c.remove(txn, id)?,
                    None => false,
                };
                inner.invalidate(id);
                if removed {
                    applied.push(id.to_string());
                } else {
                    missing.push(id.to_string());
                }
            }
            Ok((applied, missing))
        })?;
        Ok(BatchOutcome::from_parts(applied, missing))
    }

    /// Returns true if a row with this id exists locally, valid or not.
    pub fn has(&self, id: &str) -> bool {
        self.inner
            .container()
            .is_some_and(|c| c.get_seq(&self.inner.doc, id).is_some())
    }

    /// Number of rows, valid or not.
    pub fn count(&self) -> usize {
        self.inner.row_ids().len()
    }

    /// Valid rows matching `predicate`.
    pub fn filter(&self, predicate: impl Fn(&Row) -> bool) -> Vec<Row> {
        self.get_all_valid()
            .into_iter()
            .filter(|row| predicate(row))
            .collect()
    }

    /// First valid row, in id order, matching `predicate`.
    pub fn find(&self, predicate: impl Fn(&Row) -> bool) -> Option<Row> {
        self.inner
            .row_ids()
            .iter()
            .filter_map(|id| self.inner.read(id).into_valid())
            .find(|row| predicate(row))
    }

    /// Deletes every row. The table container itself is kept.
    pub fn clear(&self) -> CoreResult<()> {
        let inner = &self.inner;
        inner.doc.transact(|txn| -> CoreResult<()> {
            if let Some(container) = inner.container() {
                for id in container.keys(&inner.doc) {
                    container.remove(txn, &id)?;
                }
            }
            Ok(())
        })?;
        inner.invalidate_all();
        Ok(())
    }

    /// Subscribes to batched, classified row changes.
    ///
    /// `callback` runs once per transaction that changed at least one row,
    /// after the transaction committed, with every changed row id mapped to
    /// its final classification. It observes local and remote transactions
    /// alike, and survives replacement of the table container by a
    /// concurrently created one.
    pub fn observe_changes<F>(&self, callback: F) -> ChangeSubscription
    where
        F: Fn(&BTreeMap<String, RowChange>, &TransactionInfo) + Send + Sync + 'static,
    {
        observe::subscribe(&self.inner, callback)
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

/// Collects rows, rejecting any cell the document could not encode (NaN)
/// before a transaction is opened.
fn encodable(rows: impl IntoIterator<Item = Row>) -> CoreResult<Vec<Row>> {
    let rows: Vec<Row> = rows.into_iter().collect();
    for row in &rows {
        for value in row.cells().values() {
            to_canonical_cbor(value)?;
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDefinition;
    use proptest::prelude::*;
    use tessera_doc::{ClientId, Origin};

    fn posts(doc: &Doc) -> Table {
        let def = TableDefinition::new("posts")
            .column(ColumnDefinition::text("title"))
            .column(ColumnDefinition::integer("views").default_value(0i64));
        let validator = SchemaValidator::for_table(&def);
        Table::new(doc, def, validator).unwrap()
    }

    fn post(id: &str, title: &str, views: i64) -> Row {
        Row::new(id).with("title", title).with("views", views)
    }

    #[test]
    fn empty_table_reads() {
        let doc = Doc::with_client_id(ClientId::new(1));
        let table = posts(&doc);
        assert!(table.get("p1").is_not_found());
        assert!(table.get_all().is_empty());
        assert_eq!(table.count(), 0);
        // Reads never create the container.
        assert!(table.inner.container().is_none());
    }

    #[test]
    fn upsert_is_idempotent() {
        let doc = Doc::with_client_id(ClientId::new(1));
        let table = posts(&doc);
        table.upsert(post("p1", "Hello", 1)).unwrap();
        let first = table.get("p1");
        let version = doc.state_vector();

        table.upsert(post("p1", "Hello", 1)).unwrap();
        assert_eq!(table.get("p1"), first);
        assert_eq!(doc.state_vector(), version);
    }

    #[test]
    fn upsert_replaces_cells() {
        let doc = Doc::with_client_id(ClientId::new(1));
        let table = posts(&doc);
        table
            .upsert(post("p1", "Hello", 1).with("extra", true))
            .unwrap();
        table.upsert(post("p1", "Bye", 1)).unwrap();

        let row = table.get("p1").into_valid().unwrap();
        assert_eq!(row.get_text("title"), Some("Bye"));
        assert!(row.get("extra").is_none());
    }

    #[test]
    fn defaults_fill_missing_cells() {
        let doc = Doc::with_client_id(ClientId::new(1));
        let table = posts(&doc);
        table.upsert(Row::new("p1").with("title", "Hi")).unwrap();
        let row = table.get("p1").into_valid().unwrap();
        assert_eq!(row.get_integer("views"), Some(0));
    }

    #[test]
    fn update_never_creates() {
        let doc = Doc::with_client_id(ClientId::new(1));
        let table = posts(&doc);
        let outcome = table.update(Row::new("p1").with("title", "x")).unwrap();
        assert_eq!(outcome, WriteOutcome::NotFoundLocally);
        assert!(table.get("p1").is_not_found());
        assert!(doc.state_vector().is_empty());
    }

    #[test]
    fn update_merges_cells() {
        let doc = Doc::with_client_id(ClientId::new(1));
        let table = posts(&doc);
        table.upsert(post("p1", "Hello", 1)).unwrap();
        let outcome = table
            .update_many([Row::new("p1").with("views", 5i64), Row::new("p2")])
            .unwrap();
        assert_eq!(
            outcome,
            BatchOutcome::PartiallyApplied {
                applied: vec!["p1".into()],
                not_found_locally: vec!["p2".into()],
            }
        );
        let row = table.get("p1").into_valid().unwrap();
        assert_eq!(row.get_text("title"), Some("Hello"));
        assert_eq!(row.get_integer("views"), Some(5));
    }

    #[test]
    fn delete_twice_is_a_no_op() {
        let doc = Doc::with_client_id(ClientId::new(1));
        let table = posts(&doc);
        table.upsert(post("p1", "Hello", 1)).unwrap();
        assert_eq!(table.delete("p1").unwrap(), WriteOutcome::Applied);
        assert_eq!(table.delete("p1").unwrap(), WriteOutcome::NotFoundLocally);
        assert!(!table.has("p1"));
        assert_eq!(
            table.delete_many(["p1", "p2"]).unwrap(),
            BatchOutcome::NoneApplied {
                not_found_locally: vec!["p1".into(), "p2".into()],
            }
        );
    }

    #[test]
    fn invalid_rows_are_kept_apart() {
        let doc = Doc::with_client_id(ClientId::new(1));
        let table = posts(&doc);
        table.upsert(post("p1", "Hello", 1)).unwrap();
        table
            .upsert(Row::new("p2").with("title", 42i64))
            .unwrap();

        assert_eq!(table.count(), 2);
        assert_eq!(table.get_all_valid().len(), 1);
        let invalid = table.get_all_invalid();
        assert_eq!(invalid.len(), 1);
        assert_eq!(invalid[0].id, "p2");
        assert_eq!(invalid[0].table, "posts");
        assert!(table.filter(|_| true).iter().all(|r| r.id() == "p1"));
    }

    #[test]
    fn filter_and_find_scan_valid_rows() {
        let doc = Doc::with_client_id(ClientId::new(1));
        let table = posts(&doc);
        table
            .upsert_many([post("a", "x", 1), post("b", "y", 10), post("c", "z", 20)])
            .unwrap();

        let popular = table.filter(|r| r.get_integer("views").unwrap_or(0) >= 10);
        assert_eq!(popular.len(), 2);
        let found = table.find(|r| r.get_text("title") == Some("z")).unwrap();
        assert_eq!(found.id(), "c");
        assert!(table.find(|_| false).is_none());
    }

    #[test]
    fn clear_keeps_container() {
        let doc = Doc::with_client_id(ClientId::new(1));
        let table = posts(&doc);
        table.upsert_many([post("a", "x", 1), post("b", "y", 2)]).unwrap();
        let container = table.inner.container().unwrap();

        table.clear().unwrap();
        assert_eq!(table.count(), 0);
        assert_eq!(table.inner.container(), Some(container));

        table.upsert(post("c", "z", 3)).unwrap();
        assert_eq!(table.count(), 1);
    }

    #[test]
    fn remote_deletes_evict_cached_rows() {
        let (doc_a, doc_b) = (
            Doc::with_client_id(ClientId::new(1)),
            Doc::with_client_id(ClientId::new(2)),
        );
        let (a, b) = (posts(&doc_a), posts(&doc_b));
        let sync = |from: &Doc, to: &Doc| {
            let update = from.encode_state_as_update(Some(&to.state_vector())).unwrap();
            to.apply_update(&update, Origin::Remote).unwrap();
        };

        let ids: Vec<String> = (0..100).map(|i| format!("p{i}")).collect();
        a.upsert_many(ids.iter().map(|id| post(id, "x", 1))).unwrap();
        sync(&doc_a, &doc_b);
        assert_eq!(b.get_all_valid().len(), 100);
        assert_eq!(b.inner.cache.lock().len(), 100);

        a.delete_many(&ids[..50]).unwrap();
        sync(&doc_a, &doc_b);
        assert!(b.get("p0").is_not_found());
        assert_eq!(b.inner.cache.lock().len(), 99);

        a.delete_many(&ids[50..]).unwrap();
        sync(&doc_a, &doc_b);
        assert_eq!(b.count(), 0);
        assert!(b.inner.cache.lock().is_empty());
    }

    #[test]
    fn nan_is_rejected_before_writing() {
        let doc = Doc::with_client_id(ClientId::new(1));
        let table = posts(&doc);
        let result = table.upsert_many([post("a", "x", 1), Row::new("b").with("score", f64::NAN)]);
        assert!(result.is_err());
        assert_eq!(table.count(), 0);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Upsert(bool, usize, i64),
        Update(bool, usize, i64),
        Delete(bool, usize),
        Sync,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            3 => (any::<bool>(), 0..4usize, 0..100i64).prop_map(|(a, id, n)| Step::Upsert(a, id, n)),
            3 => (any::<bool>(), 0..4usize, 0..100i64).prop_map(|(a, id, n)| Step::Update(a, id, n)),
            2 => (any::<bool>(), 0..4usize).prop_map(|(a, id)| Step::Delete(a, id)),
            2 => Just(Step::Sync),
        ]
    }

    proptest! {
        #[test]
        fn cached_reads_match_fresh_reads(steps in prop::collection::vec(step(), 1..40)) {
            let docs = [
                Doc::with_client_id(ClientId::new(1)),
                Doc::with_client_id(ClientId::new(2)),
            ];
            let tables = [posts(&docs[0]), posts(&docs[1])];
            let exchange = || {
                for (from, to) in [(0, 1), (1, 0)] {
                    let update = docs[from]
                        .encode_state_as_update(Some(&docs[to].state_vector()))
                        .unwrap();
                    docs[to].apply_update(&update, Origin::Remote).unwrap();
                }
            };

            for step in steps {
                match step {
                    Step::Upsert(a, id, n) => {
                        tables[usize::from(a)].upsert(post(&format!("p{id}"), "t", n)).unwrap();
                    }
                    Step::Update(a, id, n) => {
                        tables[usize::from(a)]
                            .update(Row::new(format!("p{id}")).with("views", n))
                            .unwrap();
                    }
                    Step::Delete(a, id) => {
                        tables[usize::from(a)].delete(&format!("p{id}")).unwrap();
                    }
                    Step::Sync => exchange(),
                }
                for (doc, table) in docs.iter().zip(&tables) {
                    let fresh = posts(doc);
                    prop_assert_eq!(table.get_all(), fresh.get_all());
                    let cached = table.inner.cache.lock().len();
                    prop_assert!(cached <= table.count());
                }
            }

            exchange();
            prop_assert_eq!(tables[0].get_all(), tables[1].get_all());
        }
    }
}
