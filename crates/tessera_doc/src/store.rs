//! In-memory container state and the merge rules applied to it.

use crate::id::{ContainerId, ContainerKind, OpId, Stamp};
use crate::types::{MapRef, SeqRef};
use std::collections::{BTreeMap, HashMap, HashSet};
use tessera_codec::Value;

/// What a map key holds.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    /// A plain value.
    Value(Value),
    /// A nested map container.
    Map(ContainerId),
    /// A nested sequence container.
    Seq(ContainerId),
}

impl Content {
    /// Returns the plain value, if this is one.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Content::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the nested container ID, if this is a container.
    pub fn container(&self) -> Option<&ContainerId> {
        match self {
            Content::Map(id) | Content::Seq(id) => Some(id),
            Content::Value(_) => None,
        }
    }

    /// Returns a handle to the nested map, if this is one.
    pub fn as_map(&self) -> Option<MapRef> {
        match self {
            Content::Map(id) => Some(MapRef::new(id.clone())),
            _ => None,
        }
    }

    /// Returns a handle to the nested sequence, if this is one.
    pub fn as_seq(&self) -> Option<SeqRef> {
        match self {
            Content::Seq(id) => Some(SeqRef::new(id.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct MapEntry {
    stamp: Stamp,
    /// `None` is a tombstone left by a removal.
    content: Option<Content>,
}

/// Last-writer-wins map.
#[derive(Debug, Default)]
pub(crate) struct MapStore {
    entries: BTreeMap<String, MapEntry>,
}

impl MapStore {
    pub(crate) fn get(&self, key: &str) -> Option<&Content> {
        self.entries.get(key).and_then(|e| e.content.as_ref())
    }

    /// Applies a write (or a removal when `content` is `None`).
    ///
    /// Returns true if the write won against the current entry.
    pub(crate) fn apply(&mut self, key: &str, stamp: Stamp, content: Option<Content>) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) if entry.stamp >= stamp => false,
            Some(entry) => {
                entry.stamp = stamp;
                entry.content = content;
                true
            }
            None => {
                self.entries
                    .insert(key.to_string(), MapEntry { stamp, content });
                true
            }
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&String, &Content)> {
        self.entries
            .iter()
            .filter_map(|(k, e)| e.content.as_ref().map(|c| (k, c)))
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.values().filter(|e| e.content.is_some()).count()
    }
}

/// Append-only sequence ordered by [`Stamp`].
///
/// Removed element IDs are kept so that a removal which arrives before its
/// element still wins.
#[derive(Debug, Default)]
pub(crate) struct SeqStore {
    elements: BTreeMap<Stamp, (OpId, Value)>,
    index: HashMap<OpId, Stamp>,
    removed: HashSet<OpId>,
}

impl SeqStore {
    /// Inserts an element. Returns true if it is visible afterwards.
    pub(crate) fn insert(&mut self, id: OpId, stamp: Stamp, value: Value) -> bool {
        if self.removed.contains(&id) || self.index.contains_key(&id) {
            return false;
        }
        self.elements.insert(stamp, (id, value));
        self.index.insert(id, stamp);
        true
    }

    /// Removes an element, returning its value if it was visible.
    pub(crate) fn remove(&mut self, id: OpId) -> Option<Value> {
        self.removed.insert(id);
        let stamp = self.index.remove(&id)?;
        self.elements.remove(&stamp).map(|(_, v)| v)
    }

    pub(crate) fn get(&self, id: OpId) -> Option<&Value> {
        let stamp = self.index.get(&id)?;
        self.elements.get(stamp).map(|(_, v)| v)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (OpId, &Value)> {
        self.elements.values().map(|(id, v)| (*id, v))
    }

    pub(crate) fn len(&self) -> usize {
        self.elements.len()
    }
}

#[derive(Debug)]
pub(crate) enum Store {
    Map(MapStore),
    Seq(SeqStore),
}

/// One container plus the document-wide version of its last change.
#[derive(Debug)]
pub(crate) struct Container {
    pub(crate) store: Store,
    pub(crate) version: u64,
}

impl Container {
    pub(crate) fn new(kind: ContainerKind) -> Self {
        let store = match kind {
            ContainerKind::Map => Store::Map(MapStore::default()),
            ContainerKind::Seq => Store::Seq(SeqStore::default()),
        };
        Self { store, version: 0 }
    }

    pub(crate) fn kind(&self) -> ContainerKind {
        match self.store {
            Store::Map(_) => ContainerKind::Map,
            Store::Seq(_) => ContainerKind::Seq,
        }
    }

    pub(crate) fn as_map(&self) -> Option<&MapStore> {
        match &self.store {
            Store::Map(m) => Some(m),
            Store::Seq(_) => None,
        }
    }

    pub(crate) fn as_seq(&self) -> Option<&SeqStore> {
        match &self.store {
            Store::Seq(s) => Some(s),
            Store::Map(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ClientId;

    fn stamp(lamport: u64, client: u64) -> Stamp {
        Stamp::new(lamport, ClientId::new(client))
    }

    #[test]
    fn map_write_order_does_not_matter() {
        let writes = [
            (stamp(2, 1), Some(Content::Value(Value::from("a")))),
            (stamp(2, 2), Some(Content::Value(Value::from("b")))),
            (stamp(1, 9), None),
        ];

        let mut forward = MapStore::default();
        for (s, c) in writes.iter().cloned() {
            forward.apply("title", s, c);
        }
        let mut backward = MapStore::default();
        for (s, c) in writes.iter().rev().cloned() {
            backward.apply("title", s, c);
        }

        assert_eq!(forward.get("title"), Some(&Content::Value(Value::from("b"))));
        assert_eq!(forward.get("title"), backward.get("title"));
    }

    #[test]
    fn map_tombstone_hides_key() {
        let mut map = MapStore::default();
        map.apply("k", stamp(1, 1), Some(Content::Value(Value::Integer(1))));
        assert!(map.apply("k", stamp(2, 1), None));
        assert_eq!(map.get("k"), None);
        assert_eq!(map.len(), 0);
        assert_eq!(map.iter().count(), 0);
    }

    #[test]
    fn seq_orders_by_stamp() {
        let mut seq = SeqStore::default();
        let a = OpId::new(ClientId::new(2), 0);
        let b = OpId::new(ClientId::new(1), 0);
        seq.insert(a, stamp(5, 2), Value::from("late"));
        seq.insert(b, stamp(3, 1), Value::from("early"));

        let order: Vec<_> = seq.iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec![b, a]);
    }

    #[test]
    fn seq_remembers_early_removal() {
        let mut seq = SeqStore::default();
        let id = OpId::new(ClientId::new(1), 4);
        assert_eq!(seq.remove(id), None);
        assert!(!seq.insert(id, stamp(7, 1), Value::Null));
        assert_eq!(seq.len(), 0);
    }
}
