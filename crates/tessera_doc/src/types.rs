//! Typed handles to map and sequence containers.
//!
//! Handles are plain container IDs: writes take the open [`Txn`], reads take
//! the [`Doc`]. A handle stays valid for the lifetime of the document, even
//! after the key that referenced the container has been overwritten.

use crate::doc::{Doc, Txn};
use crate::error::DocResult;
use crate::event::{ContainerEvent, MapEvent, SeqEvent, TransactionInfo};
use crate::id::{ContainerId, ContainerKind, OpId};
use crate::observer::Subscription;
use crate::op::{NewContent, OpKind};
use crate::store::Content;
use tessera_codec::Value;

/// Handle to a last-writer-wins map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MapRef {
    id: ContainerId,
}

impl MapRef {
    pub(crate) fn new(id: ContainerId) -> Self {
        Self { id }
    }

    /// Container ID of this map.
    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Writes a plain value under `key`.
    pub fn insert(
        &self,
        txn: &Txn<'_>,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> DocResult<()> {
        txn.apply_local(
            &self.id,
            OpKind::MapSet {
                key: key.into(),
                content: NewContent::Value(value.into()),
            },
        )?;
        Ok(())
    }

    /// Creates a nested map under `key`.
    pub fn insert_map(&self, txn: &Txn<'_>, key: impl Into<String>) -> DocResult<MapRef> {
        let id = self.insert_container(txn, key.into(), ContainerKind::Map)?;
        Ok(MapRef::new(ContainerId::Op(id)))
    }

    /// Creates a nested sequence under `key`.
    pub fn insert_seq(&self, txn: &Txn<'_>, key: impl Into<String>) -> DocResult<SeqRef> {
        let id = self.insert_container(txn, key.into(), ContainerKind::Seq)?;
        Ok(SeqRef::new(ContainerId::Op(id)))
    }

    fn insert_container(
        &self,
        txn: &Txn<'_>,
        key: String,
        kind: ContainerKind,
    ) -> DocResult<OpId> {
        txn.apply_local(
            &self.id,
            OpKind::MapSet {
                key,
                content: NewContent::Container(kind),
            },
        )
    }

    /// Removes `key`. Returns false (and records nothing) if it is absent.
    pub fn remove(&self, txn: &Txn<'_>, key: &str) -> DocResult<bool> {
        if !self.contains_key(txn.doc(), key) {
            return Ok(false);
        }
        txn.apply_local(
            &self.id,
            OpKind::MapRemove {
                key: key.to_string(),
            },
        )?;
        Ok(true)
    }

    /// Returns the content under `key`.
    pub fn get(&self, doc: &Doc, key: &str) -> Option<Content> {
        doc.with_container(&self.id, |c| {
            c.and_then(|c| c.as_map()).and_then(|m| m.get(key).cloned())
        })
    }

    /// Returns the plain value under `key`.
    pub fn get_value(&self, doc: &Doc, key: &str) -> Option<Value> {
        match self.get(doc, key)? {
            Content::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the nested map under `key`.
    pub fn get_map(&self, doc: &Doc, key: &str) -> Option<MapRef> {
        self.get(doc, key).and_then(|c| c.as_map())
    }

    /// Returns the nested sequence under `key`.
    pub fn get_seq(&self, doc: &Doc, key: &str) -> Option<SeqRef> {
        self.get(doc, key).and_then(|c| c.as_seq())
    }

    /// Returns true if `key` holds content.
    pub fn contains_key(&self, doc: &Doc, key: &str) -> bool {
        doc.with_container(&self.id, |c| {
            c.and_then(|c| c.as_map()).is_some_and(|m| m.get(key).is_some())
        })
    }

    /// Returns the present keys in ascending order.
    pub fn keys(&self, doc: &Doc) -> Vec<String> {
        doc.with_container(&self.id, |c| {
            c.and_then(|c| c.as_map())
                .map(|m| m.iter().map(|(k, _)| k.clone()).collect())
                .unwrap_or_default()
        })
    }

    /// Returns every present entry in ascending key order.
    pub fn iter(&self, doc: &Doc) -> Vec<(String, Content)> {
        doc.with_container(&self.id, |c| {
            c.and_then(|c| c.as_map())
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default()
        })
    }

    /// Number of present keys.
    pub fn len(&self, doc: &Doc) -> usize {
        doc.with_container(&self.id, |c| c.and_then(|c| c.as_map()).map_or(0, |m| m.len()))
    }

    /// Returns true if no key is present.
    pub fn is_empty(&self, doc: &Doc) -> bool {
        self.len(doc) == 0
    }

    /// Observes key-level changes of this map.
    pub fn observe<F>(&self, doc: &Doc, f: F) -> Subscription
    where
        F: Fn(&TransactionInfo, &MapEvent) + Send + Sync + 'static,
    {
        doc.observe(&self.id, move |info, event| {
            if let ContainerEvent::Map(e) = event {
                f(info, e);
            }
        })
    }
}

/// Handle to an append-only sequence.
///
/// Elements are ordered by the [`Stamp`](crate::Stamp) of the push that
/// created them and are addressed by that push's [`OpId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeqRef {
    id: ContainerId,
}

impl SeqRef {
    pub(crate) fn new(id: ContainerId) -> Self {
        Self { id }
    }

    /// Container ID of this sequence.
    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    /// Appends a value, returning the new element's ID.
    pub fn push(&self, txn: &Txn<'_>, value: impl Into<Value>) -> DocResult<OpId> {
        txn.apply_local(
            &self.id,
            OpKind::SeqPush {
                value: value.into(),
            },
        )
    }

    /// Removes an element. Returns false (and records nothing) if it is not
    /// present.
    pub fn remove(&self, txn: &Txn<'_>, element: OpId) -> DocResult<bool> {
        if self.get(txn.doc(), element).is_none() {
            return Ok(false);
        }
        txn.apply_local(&self.id, OpKind::SeqRemove { element })?;
        Ok(true)
    }

    /// Returns one element's value.
    pub fn get(&self, doc: &Doc, element: OpId) -> Option<Value> {
        doc.with_container(&self.id, |c| {
            c.and_then(|c| c.as_seq()).and_then(|s| s.get(element).cloned())
        })
    }

    /// Returns every present element in sequence order.
    pub fn iter(&self, doc: &Doc) -> Vec<(OpId, Value)> {
        doc.with_container(&self.id, |c| {
            c.and_then(|c| c.as_seq())
                .map(|s| s.iter().map(|(id, v)| (id, v.clone())).collect())
                .unwrap_or_default()
        })
    }

    /// Number of present elements.
    pub fn len(&self, doc: &Doc) -> usize {
        doc.with_container(&self.id, |c| c.and_then(|c| c.as_seq()).map_or(0, |s| s.len()))
    }

    /// Returns true if no element is present.
    pub fn is_empty(&self, doc: &Doc) -> bool {
        self.len(doc) == 0
    }

    /// Document-wide version of this sequence's last change.
    ///
    /// Two reads with the same version see the same elements.
    pub fn version(&self, doc: &Doc) -> u64 {
        doc.with_container(&self.id, |c| c.map_or(0, |c| c.version))
    }

    /// Returns the version and the elements, read atomically.
    pub fn versioned_iter(&self, doc: &Doc) -> (u64, Vec<(OpId, Value)>) {
        doc.with_container(&self.id, |c| match c {
            Some(c) => {
                let elements = c
                    .as_seq()
                    .map(|s| s.iter().map(|(id, v)| (id, v.clone())).collect())
                    .unwrap_or_default();
                (c.version, elements)
            }
            None => (0, Vec::new()),
        })
    }

    /// Observes element-level changes of this sequence.
    pub fn observe<F>(&self, doc: &Doc, f: F) -> Subscription
    where
        F: Fn(&TransactionInfo, &SeqEvent) + Send + Sync + 'static,
    {
        doc.observe(&self.id, move |info, event| {
            if let ContainerEvent::Seq(e) = event {
                f(info, e);
            }
        })
    }
}
