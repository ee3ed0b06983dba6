//! Collects batched table notifications.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tessera_core::{ChangeSubscription, RowChange, Table};
use tessera_doc::Origin;

/// One delivered callback.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Classified change per row id.
    pub changes: BTreeMap<String, RowChange>,
    /// Origin of the transaction that produced the batch.
    pub origin: Origin,
}

impl Batch {
    /// `"add"`, `"update"` or `"delete"` per row id.
    pub fn kinds(&self) -> BTreeMap<&str, &'static str> {
        self.changes
            .iter()
            .map(|(id, change)| {
                let kind = match change {
                    RowChange::Add(_) => "add",
                    RowChange::Update(_) => "update",
                    RowChange::Delete => "delete",
                };
                (id.as_str(), kind)
            })
            .collect()
    }
}

/// Records every batch a table delivers while it is alive.
pub struct ChangeRecorder {
    batches: Arc<Mutex<Vec<Batch>>>,
    subscription: ChangeSubscription,
}

impl ChangeRecorder {
    /// Subscribes to `table`.
    pub fn attach(table: &Table) -> Self {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let sink = batches.clone();
        let subscription = table.observe_changes(move |changes, info| {
            sink.lock().push(Batch {
                changes: changes.clone(),
                origin: info.origin.clone(),
            });
        });
        Self {
            batches,
            subscription,
        }
    }

    /// Batches delivered so far.
    pub fn batches(&self) -> Vec<Batch> {
        self.batches.lock().clone()
    }

    /// Removes and returns the batches delivered so far.
    pub fn take(&self) -> Vec<Batch> {
        std::mem::take(&mut *self.batches.lock())
    }

    /// Number of batches delivered so far.
    pub fn len(&self) -> usize {
        self.batches.lock().len()
    }

    /// Returns true if nothing was delivered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The underlying subscription.
    pub fn subscription(&self) -> &ChangeSubscription {
        &self.subscription
    }

    /// Unsubscribes, keeping what was recorded.
    pub fn detach(self) -> Vec<Batch> {
        let Self {
            batches,
            subscription,
        } = self;
        subscription.unsubscribe();
        let recorded = batches.lock().clone();
        recorded
    }
}
