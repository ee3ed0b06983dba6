//! Per-table cache of row adapters.
//!
//! Building a [`CellStore`] index is O(columns), so tables keep adapters
//! around between calls. The cache is an arena of generation-tagged slots: a
//! row id maps to a slot plus the generation it was filled at, and every
//! invalidation bumps the slot generation before the slot is reused. An adapter is only served when
//! both the generation and the row's current container match, so a row that
//! was deleted or whose table container was replaced never serves stale
//! cells.

use crate::cell_store::CellStore;
use std::collections::HashMap;
use std::sync::Arc;
use tessera_doc::ContainerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RowKey {
    slot: usize,
    generation: u64,
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    entry: Option<Entry>,
}

#[derive(Debug)]
struct Entry {
    row_id: String,
    container: ContainerId,
    store: Arc<CellStore>,
}

/// Generation-tagged arena of row adapters, keyed by row id.
#[derive(Debug, Default)]
pub struct RowCache {
    slots: Vec<Slot>,
    free: Vec<usize>,
    by_row: HashMap<String, RowKey>,
}

impl RowCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the adapter for `row_id` if it is bound to `container`.
    ///
    /// A cached adapter for another container is evicted.
    pub fn get(&mut self, row_id: &str, container: &ContainerId) -> Option<Arc<CellStore>> {
        let key = *self.by_row.get(row_id)?;
        match self.resolve(key) {
            Some(entry) if entry.row_id == row_id && &entry.container == container => {
                Some(entry.store.clone())
            }
            _ => {
                self.invalidate(row_id);
                None
            }
        }
    }

    fn resolve(&self, key: RowKey) -> Option<&Entry> {
        let slot = self.slots.get(key.slot)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    /// Caches an adapter for `row_id`, replacing any previous one.
    pub fn insert(&mut self, row_id: &str, store: Arc<CellStore>) {
        self.invalidate(row_id);
        let entry = Entry {
            row_id: row_id.to_string(),
            container: store.container().clone(),
            store,
        };

        let key = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.entry = Some(entry);
                RowKey {
                    slot: index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                RowKey {
                    slot: self.slots.len() - 1,
                    generation: 0,
                }
            }
        };
        self.by_row.insert(row_id.to_string(), key);
    }

    /// Drops the adapter for one row.
    pub fn invalidate(&mut self, row_id: &str) {
        if let Some(key) = self.by_row.remove(row_id) {
            if let Some(slot) = self.slots.get_mut(key.slot) {
                if slot.generation == key.generation {
                    slot.generation += 1;
                    slot.entry = None;
                    self.free.push(key.slot);
                }
            }
        }
    }

    /// Drops every adapter (table container replaced).
    pub fn invalidate_all(&mut self) {
        let rows: Vec<String> = self.by_row.keys().cloned().collect();
        for row in rows {
            self.invalidate(&row);
        }
    }

    /// Number of cached adapters.
    pub fn len(&self) -> usize {
        self.by_row.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.by_row.is_empty()
    }

    /// Drops the adapters of rows for which `keep` returns false.
    pub fn retain(&mut self, keep: impl Fn(&str) -> bool) {
        let gone: Vec<String> = self
            .by_row
            .keys()
            .filter(|row| !keep(row))
            .cloned()
            .collect();
        for row in gone {
            self.invalidate(&row);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_doc::{ClientId, Doc};

    fn store(doc: &Doc, name: &str) -> Arc<CellStore> {
        Arc::new(CellStore::new(doc.get_or_insert_seq(name).unwrap()))
    }

    #[test]
    fn serves_only_matching_container() {
        let doc = Doc::with_client_id(ClientId::new(1));
        let mut cache = RowCache::new();
        let first = store(&doc, "a");
        cache.insert("p1", first.clone());

        assert!(cache.get("p1", first.container()).is_some());
        let other = store(&doc, "b");
        assert!(cache.get("p1", other.container()).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn reused_slot_rejects_the_old_key() {
        let doc = Doc::with_client_id(ClientId::new(1));
        let mut cache = RowCache::new();
        cache.insert("p1", store(&doc, "a"));
        let old_key = cache.by_row["p1"];
        cache.invalidate("p1");
        cache.insert("p2", store(&doc, "b"));
        let new_key = cache.by_row["p2"];

        assert_eq!(old_key.slot, new_key.slot);
        assert_ne!(old_key, new_key);
        assert!(cache.resolve(old_key).is_none());
        assert_eq!(cache.resolve(new_key).map(|e| e.row_id.as_str()), Some("p2"));
    }

    #[test]
    fn retain_evicts_rows_that_are_gone() {
        let doc = Doc::with_client_id(ClientId::new(1));
        let mut cache = RowCache::new();
        cache.insert("p1", store(&doc, "a"));
        cache.insert("p2", store(&doc, "b"));
        cache.retain(|row| row == "p2");
        assert_eq!(cache.len(), 1);
        assert!(cache.by_row.contains_key("p2"));
    }

    #[test]
    fn invalidate_all_empties_cache() {
        let doc = Doc::with_client_id(ClientId::new(1));
        let mut cache = RowCache::new();
        cache.insert("p1", store(&doc, "a"));
        cache.insert("p2", store(&doc, "b"));
        cache.invalidate_all();
        assert_eq!(cache.len(), 0);
        assert!(cache.slots.iter().all(|s| s.entry.is_none()));
    }
}
