//! Transaction metadata and the change events delivered to observers.

use crate::id::{ContainerId, OpId};
use crate::store::Content;
use std::collections::BTreeMap;
use tessera_codec::Value;

/// Where a transaction came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Mutations made through this replica's own API.
    Local,
    /// Operations received from another replica.
    Remote,
    /// A named actor, e.g. a capability writing back into the document.
    Named(String),
}

impl Origin {
    /// Creates a named origin.
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Returns true if the transaction was produced on this replica by its
    /// own API.
    pub fn is_local(&self) -> bool {
        matches!(self, Origin::Local)
    }
}

/// Read-only description of a committed transaction, handed to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    /// Origin the transaction was opened with.
    pub origin: Origin,
    /// Commit sequence on this replica (starts at 1, increases per commit).
    pub sequence: u64,
}

/// How one map key changed across a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryChange {
    /// Key was absent before and present now.
    Inserted(Content),
    /// Key was present before and after, with different content.
    Updated {
        /// Content at the start of the transaction.
        old: Content,
        /// Content at commit.
        new: Content,
    },
    /// Key was present before and absent now.
    Removed(Content),
}

impl EntryChange {
    /// Content after the transaction, if any.
    pub fn new_content(&self) -> Option<&Content> {
        match self {
            EntryChange::Inserted(c) | EntryChange::Updated { new: c, .. } => Some(c),
            EntryChange::Removed(_) => None,
        }
    }

    /// Content before the transaction, if any.
    pub fn old_content(&self) -> Option<&Content> {
        match self {
            EntryChange::Updated { old: c, .. } | EntryChange::Removed(c) => Some(c),
            EntryChange::Inserted(_) => None,
        }
    }
}

/// Key-level delta of one map container.
#[derive(Debug, Clone, PartialEq)]
pub struct MapEvent {
    /// Container that changed.
    pub container: ContainerId,
    /// Changed keys.
    pub keys: BTreeMap<String, EntryChange>,
}

/// Element-level delta of one sequence container.
#[derive(Debug, Clone, PartialEq)]
pub struct SeqEvent {
    /// Container that changed.
    pub container: ContainerId,
    /// Elements that became visible, in sequence order.
    pub added: Vec<(OpId, Value)>,
    /// Elements that were visible before and are removed now.
    pub removed: Vec<(OpId, Value)>,
}

/// The change delivered to a container observer.
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerEvent {
    /// A map changed.
    Map(MapEvent),
    /// A sequence changed.
    Seq(SeqEvent),
}

impl ContainerEvent {
    /// Container the event is about.
    pub fn container(&self) -> &ContainerId {
        match self {
            ContainerEvent::Map(e) => &e.container,
            ContainerEvent::Seq(e) => &e.container,
        }
    }

    /// Returns the map delta, if this is a map event.
    pub fn as_map(&self) -> Option<&MapEvent> {
        match self {
            ContainerEvent::Map(e) => Some(e),
            ContainerEvent::Seq(_) => None,
        }
    }

    /// Returns the sequence delta, if this is a sequence event.
    pub fn as_seq(&self) -> Option<&SeqEvent> {
        match self {
            ContainerEvent::Seq(e) => Some(e),
            ContainerEvent::Map(_) => None,
        }
    }
}
