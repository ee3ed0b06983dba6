//! Observer registry and subscription handles.

use crate::doc::DocInner;
use crate::event::{ContainerEvent, TransactionInfo};
use crate::id::ContainerId;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

pub(crate) type ContainerCallback = Arc<dyn Fn(&TransactionInfo, &ContainerEvent) + Send + Sync>;
pub(crate) type AfterTransactionCallback = Arc<dyn Fn(&TransactionInfo) + Send + Sync>;
pub(crate) type UpdateCallback = Arc<dyn Fn(&TransactionInfo, &[u8]) + Send + Sync>;

pub(crate) enum Observer {
    Container {
        container: ContainerId,
        callback: ContainerCallback,
    },
    AfterTransaction(AfterTransactionCallback),
    Update(UpdateCallback),
}

/// Callbacks registered on one document, keyed by registration order.
#[derive(Default)]
pub(crate) struct Observers {
    next_id: u64,
    entries: BTreeMap<u64, Observer>,
}

impl Observers {
    pub(crate) fn register(&mut self, observer: Observer) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, observer);
        id
    }

    /// Removes an observer. The caller must drop the returned value only after
    /// releasing the document state, since callbacks may own subscriptions.
    pub(crate) fn remove(&mut self, id: u64) -> Option<Observer> {
        self.entries.remove(&id)
    }

    pub(crate) fn is_live(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    pub(crate) fn take_all(&mut self) -> BTreeMap<u64, Observer> {
        std::mem::take(&mut self.entries)
    }

    pub(crate) fn container(&self, container: &ContainerId) -> Vec<(u64, ContainerCallback)> {
        self.entries
            .iter()
            .filter_map(|(id, o)| match o {
                Observer::Container {
                    container: c,
                    callback,
                } if c == container => Some((*id, callback.clone())),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn after_transaction(&self) -> Vec<(u64, AfterTransactionCallback)> {
        self.entries
            .iter()
            .filter_map(|(id, o)| match o {
                Observer::AfterTransaction(cb) => Some((*id, cb.clone())),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn update(&self) -> Vec<(u64, UpdateCallback)> {
        self.entries
            .iter()
            .filter_map(|(id, o)| match o {
                Observer::Update(cb) => Some((*id, cb.clone())),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn has_update_observers(&self) -> bool {
        self.entries
            .values()
            .any(|o| matches!(o, Observer::Update(_)))
    }
}

/// Keeps an observer registered. Dropping it unsubscribes.
///
/// Once dropped, the callback never runs again, including for a transaction
/// whose dispatch is already in progress.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    doc: Weak<DocInner>,
    id: u64,
}

impl Subscription {
    pub(crate) fn new(doc: Weak<DocInner>, id: u64) -> Self {
        Self { doc, id }
    }

    /// Unsubscribes explicitly.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.doc.upgrade() {
            let removed = inner.remove_observer(self.id);
            drop(removed);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
