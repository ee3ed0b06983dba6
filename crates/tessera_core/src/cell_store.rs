//! Cell-indexed row store.
//!
//! A row is a replicated sequence of `{ "key": column, "val": value }`
//! entries. Each cell is an independent entry, so concurrent edits to
//! different columns of one row merge without conflict. Concurrent edits to
//! the same column leave two entries for one key until the next write; reads
//! pick the entry with the greatest stamp, which is the last one in sequence
//! order.
//!
//! Lookups go through an index keyed by column, rebuilt lazily whenever the
//! sequence version changes.

use crate::error::CoreResult;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tessera_codec::Value;
use tessera_doc::{ContainerId, Doc, OpId, SeqEvent, SeqRef, Txn};
use tracing::debug;

const KEY: &str = "key";
const VAL: &str = "val";

#[derive(Debug)]
struct CellIndex {
    version: u64,
    /// Entries per column, in sequence order. The last one wins.
    cells: HashMap<String, Vec<(OpId, Value)>>,
}

impl CellIndex {
    fn build(version: u64, elements: Vec<(OpId, Value)>) -> Self {
        let mut cells: HashMap<String, Vec<(OpId, Value)>> = HashMap::new();
        for (id, entry) in elements {
            match decode_entry(entry) {
                Some((key, value)) => cells.entry(key).or_default().push((id, value)),
                None => debug!(element = %id, "skipping malformed cell entry"),
            }
        }
        Self { version, cells }
    }

    fn get(&self, key: &str) -> Option<&Value> {
        self.cells.get(key).and_then(|e| e.last()).map(|(_, v)| v)
    }
}

fn decode_entry(entry: Value) -> Option<(String, Value)> {
    let key = entry.get(KEY)?.as_text()?.to_string();
    let value = entry.get(VAL)?.clone();
    Some((key, value))
}

fn encode_entry(key: &str, value: Value) -> Value {
    Value::text_map([(KEY, Value::from(key)), (VAL, value)])
}

/// O(1) column access over one row's entry sequence.
#[derive(Debug)]
pub struct CellStore {
    seq: SeqRef,
    index: Mutex<Option<CellIndex>>,
}

impl CellStore {
    /// Wraps a row sequence.
    pub fn new(seq: SeqRef) -> Self {
        Self {
            seq,
            index: Mutex::new(None),
        }
    }

    /// The underlying sequence.
    pub fn seq(&self) -> &SeqRef {
        &self.seq
    }

    /// Container ID of the underlying sequence.
    pub fn container(&self) -> &ContainerId {
        self.seq.id()
    }

    /// Runs `f` on an index that matches the sequence's current version.
    ///
    /// The index lock is never held while the document is read, so a writer
    /// holding the document lock cannot deadlock against a reader here.
    fn with_index<R>(&self, doc: &Doc, f: impl FnOnce(&CellIndex) -> R) -> R {
        let current = self.seq.version(doc);
        {
            let guard = self.index.lock();
            if let Some(index) = guard.as_ref().filter(|i| i.version == current) {
                return f(index);
            }
        }

        let (version, elements) = self.seq.versioned_iter(doc);
        let index = CellIndex::build(version, elements);
        let result = f(&index);
        *self.index.lock() = Some(index);
        result
    }

    /// Returns the value of one column.
    pub fn get(&self, doc: &Doc, key: &str) -> Option<Value> {
        self.with_index(doc, |i| i.get(key).cloned())
    }

    /// Returns true if the column has a value.
    pub fn has(&self, doc: &Doc, key: &str) -> bool {
        self.with_index(doc, |i| i.get(key).is_some())
    }

    /// Writes one column, removing every older entry for it.
    pub fn set(&self, txn: &Txn<'_>, key: &str, value: impl Into<Value>) -> CoreResult<()> {
        let stale = self.entry_ids(txn.doc(), key);
        self.seq.push(txn, encode_entry(key, value.into()))?;
        for id in stale {
            self.seq.remove(txn, id)?;
        }
        Ok(())
    }

    /// Removes one column. Returns false if it had no value.
    pub fn delete(&self, txn: &Txn<'_>, key: &str) -> CoreResult<bool> {
        let stale = self.entry_ids(txn.doc(), key);
        if stale.is_empty() {
            return Ok(false);
        }
        for id in stale {
            self.seq.remove(txn, id)?;
        }
        Ok(true)
    }

    fn entry_ids(&self, doc: &Doc, key: &str) -> Vec<OpId> {
        self.with_index(doc, |i| {
            i.cells
                .get(key)
                .map(|e| e.iter().map(|(id, _)| *id).collect())
                .unwrap_or_default()
        })
    }

    /// Returns every column and its winning value, ordered by column.
    pub fn entries(&self, doc: &Doc) -> Vec<(String, Value)> {
        self.to_cells(doc).into_iter().collect()
    }

    /// Flattens the row to a plain keyed structure.
    pub fn to_cells(&self, doc: &Doc) -> BTreeMap<String, Value> {
        self.with_index(doc, |i| {
            i.cells
                .iter()
                .filter_map(|(k, e)| e.last().map(|(_, v)| (k.clone(), v.clone())))
                .collect()
        })
    }

    /// Number of columns with a value.
    pub fn len(&self, doc: &Doc) -> usize {
        self.with_index(doc, |i| i.cells.len())
    }

    /// Returns true if no column has a value.
    pub fn is_empty(&self, doc: &Doc) -> bool {
        self.len(doc) == 0
    }

    /// Columns touched by a sequence event.
    pub fn changed_keys(event: &SeqEvent) -> BTreeSet<String> {
        event
            .added
            .iter()
            .chain(event.removed.iter())
            .filter_map(|(_, entry)| entry.get(KEY).and_then(Value::as_text))
            .map(str::to_string)
            .collect()
    }
}
