//! Batched row-change observation with container resync.
//!
//! A subscription binds one listener to the `tables` root (to notice the
//! table container appearing or being replaced), one to the table container
//! (rows added, replaced or removed) and one per row (cell changes). Events
//! are classified into a per-transaction buffer keyed by row id and flushed
//! from an after-transaction hook, so the user callback runs once per
//! transaction with the final state of every changed row.
//!
//! Lock order is always document first, then subscription state: listeners
//! run inside the document's dispatch, and subscription setup runs inside a
//! transaction. Subscriptions are dropped only after the state lock is
//! released.

use super::{RowChange, TableInner};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Weak};
use tessera_doc::{
    Content, ContainerId, EntryChange, MapEvent, MapRef, SeqRef, Subscription, TransactionInfo,
};
use tracing::{debug, info};

/// Where a change subscription currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservationPhase {
    /// The table container does not exist yet.
    Unattached,
    /// Bound to this table container.
    Attached(ContainerId),
    /// Tearing down listeners of a replaced container.
    Rebinding,
    /// Unsubscribed; nothing fires any more.
    Detached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Add,
    Update,
    Delete,
}

enum Phase {
    Unattached,
    Attached(MapRef),
    Rebinding,
    Detached,
}

struct RowBinding {
    container: ContainerId,
    subscription: Subscription,
}

struct ObserverState {
    phase: Phase,
    root: Option<Subscription>,
    container: Option<Subscription>,
    after: Option<Subscription>,
    rows: HashMap<String, RowBinding>,
    pending_add: HashSet<String>,
    buffer: BTreeMap<String, Pending>,
}

impl ObserverState {
    fn new() -> Self {
        Self {
            phase: Phase::Unattached,
            root: None,
            container: None,
            after: None,
            rows: HashMap::new(),
            pending_add: HashSet::new(),
            buffer: BTreeMap::new(),
        }
    }

    /// Records a classified change. Within one batch the last change wins;
    /// cell writes to a row added in the same batch keep it an add.
    fn record(&mut self, id: &str, change: Pending) {
        let merged = match (self.buffer.get(id), change) {
            (Some(Pending::Add), Pending::Update) => Pending::Add,
            _ => change,
        };
        self.buffer.insert(id.to_string(), merged);
    }

    fn is_detached(&self) -> bool {
        matches!(self.phase, Phase::Detached)
    }

    /// Removes every row listener and the container listener.
    fn unbind_container(&mut self, garbage: &mut Vec<Subscription>) {
        garbage.extend(self.container.take());
        garbage.extend(self.rows.drain().map(|(_, b)| b.subscription));
        self.pending_add.clear();
    }
}

/// Keeps a table change subscription alive. Dropping it detaches every
/// listener.
#[must_use = "dropping a ChangeSubscription unsubscribes immediately"]
pub struct ChangeSubscription {
    state: Arc<Mutex<ObserverState>>,
}

impl ChangeSubscription {
    /// Current phase of the subscription.
    pub fn phase(&self) -> ObservationPhase {
        match &self.state.lock().phase {
            Phase::Unattached => ObservationPhase::Unattached,
            Phase::Attached(map) => ObservationPhase::Attached(map.id().clone()),
            Phase::Rebinding => ObservationPhase::Rebinding,
            Phase::Detached => ObservationPhase::Detached,
        }
    }

    /// Number of rows with a bound listener.
    pub fn bound_rows(&self) -> usize {
        self.state.lock().rows.len()
    }

    /// Unsubscribes explicitly.
    pub fn unsubscribe(self) {}
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        let mut garbage = Vec::new();
        {
            let mut st = self.state.lock();
            st.phase = Phase::Detached;
            st.unbind_container(&mut garbage);
            garbage.extend(st.root.take());
            garbage.extend(st.after.take());
            st.buffer.clear();
        }
        drop(garbage);
    }
}

impl std::fmt::Debug for ChangeSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSubscription")
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

pub(super) fn subscribe<F>(table: &Arc<TableInner>, callback: F) -> ChangeSubscription
where
    F: Fn(&BTreeMap<String, RowChange>, &TransactionInfo) + Send + Sync + 'static,
{
    let state = Arc::new(Mutex::new(ObserverState::new()));
    let binder = Binder {
        table: Arc::downgrade(table),
        state: Arc::downgrade(&state),
    };
    let doc = &table.doc;

    doc.transact(|_| {
        let root = {
            let binder = binder.clone();
            table
                .root
                .observe(doc, move |_, event| binder.on_root(event))
        };
        let after = {
            let binder = binder.clone();
            doc.observe_after_transaction(move |info| binder.flush(info, &callback))
        };

        let mut garbage = Vec::new();
        {
            let mut st = state.lock();
            st.root = Some(root);
            st.after = Some(after);
            if let Some(container) = table.container() {
                binder.attach(table, &mut st, container, false, &mut garbage);
            }
        }
        drop(garbage);
    });

    ChangeSubscription { state }
}

/// Shared by every listener of one subscription.
#[derive(Clone)]
struct Binder {
    table: Weak<TableInner>,
    state: Weak<Mutex<ObserverState>>,
}

impl Binder {
    fn upgrade(&self) -> Option<(Arc<TableInner>, Arc<Mutex<ObserverState>>)> {
        Some((self.table.upgrade()?, self.state.upgrade()?))
    }

    fn on_root(&self, event: &MapEvent) {
        let Some((table, state)) = self.upgrade() else {
            return;
        };
        let Some(change) = event.keys.get(table.name()) else {
            return;
        };

        let mut garbage = Vec::new();
        {
            let mut st = state.lock();
            if st.is_detached() {
                return;
            }
            let new = change.new_content().and_then(Content::as_map);
            let current = match &st.phase {
                Phase::Attached(map) => Some(map.clone()),
                _ => None,
            };

            match (current, new) {
                (Some(old), Some(new)) if old == new => {}
                (Some(old), Some(new)) => {
                    info!(
                        table = %table.name(),
                        old = %old.id(),
                        new = %new.id(),
                        "table container replaced, resynchronising"
                    );
                    st.phase = Phase::Rebinding;
                    self.release(&table, &mut st, &old, &mut garbage);
                    self.attach(&table, &mut st, new, true, &mut garbage);
                }
                (None, Some(new)) => self.attach(&table, &mut st, new, true, &mut garbage),
                (Some(old), None) => {
                    self.release(&table, &mut st, &old, &mut garbage);
                    st.phase = Phase::Unattached;
                }
                (None, None) => {}
            }
        }
        drop(garbage);
    }

    /// Emits a delete for every row known under `old` and drops its listeners.
    fn release(
        &self,
        table: &TableInner,
        st: &mut ObserverState,
        old: &MapRef,
        garbage: &mut Vec<Subscription>,
    ) {
        let mut gone: HashSet<String> = st.rows.keys().cloned().collect();
        gone.extend(old.keys(&table.doc));
        for id in &gone {
            st.record(id, Pending::Delete);
        }
        st.unbind_container(garbage);
        table.invalidate_all();
    }

    /// Binds to a table container. With `announce`, rows already holding
    /// cells are reported as added and empty rows become pending adds.
    fn attach(
        &self,
        table: &TableInner,
        st: &mut ObserverState,
        container: MapRef,
        announce: bool,
        garbage: &mut Vec<Subscription>,
    ) {
        let doc = &table.doc;
        let listener = {
            let binder = self.clone();
            container.observe(doc, move |_, event| binder.on_container(event))
        };
        garbage.extend(st.container.replace(listener));

        let mut rows = 0usize;
        for (id, content) in container.iter(doc) {
            let Some(seq) = content.as_seq() else {
                continue;
            };
            rows += 1;
            if announce {
                if seq.is_empty(doc) {
                    st.pending_add.insert(id.clone());
                } else {
                    st.record(&id, Pending::Add);
                }
            }
            self.bind_row(table, st, &id, seq, garbage);
        }

        debug!(table = %table.name(), container = %container.id(), rows, "attached to table container");
        st.phase = Phase::Attached(container);
    }

    fn bind_row(
        &self,
        table: &TableInner,
        st: &mut ObserverState,
        id: &str,
        seq: SeqRef,
        garbage: &mut Vec<Subscription>,
    ) {
        let binder = self.clone();
        let row_id = id.to_string();
        let container = seq.id().clone();
        let bound = container.clone();
        let subscription = seq.observe(&table.doc, move |_, _| binder.on_row(&row_id, &bound));
        let previous = st.rows.insert(
            id.to_string(),
            RowBinding {
                container,
                subscription,
            },
        );
        garbage.extend(previous.map(|b| b.subscription));
    }

    fn on_container(&self, event: &MapEvent) {
        let Some((table, state)) = self.upgrade() else {
            return;
        };
        let mut garbage = Vec::new();
        {
            let mut st = state.lock();
            if !matches!(&st.phase, Phase::Attached(map) if map.id() == &event.container) {
                return;
            }

            for (id, change) in &event.keys {
                let seq = change.new_content().and_then(Content::as_seq);
                match (change, seq) {
                    (EntryChange::Inserted(_), Some(seq)) => {
                        if seq.is_empty(&table.doc) {
                            st.pending_add.insert(id.clone());
                        } else {
                            st.record(id, Pending::Add);
                        }
                        self.bind_row(&table, &mut st, id, seq, &mut garbage);
                    }
                    (EntryChange::Updated { .. }, Some(seq)) => {
                        // Concurrent creation of the same row id.
                        table.invalidate(id);
                        let populated = !seq.is_empty(&table.doc);
                        if st.pending_add.contains(id) {
                            if populated {
                                st.pending_add.remove(id);
                                st.record(id, Pending::Add);
                            }
                        } else {
                            st.record(id, Pending::Update);
                        }
                        self.bind_row(&table, &mut st, id, seq, &mut garbage);
                    }
                    (_, _) => {
                        table.invalidate(id);
                        st.pending_add.remove(id);
                        if let Some(binding) = st.rows.remove(id) {
                            garbage.push(binding.subscription);
                            st.record(id, Pending::Delete);
                        } else if matches!(change, EntryChange::Removed(Content::Seq(_))) {
                            st.record(id, Pending::Delete);
                        }
                    }
                }
            }
        }
        drop(garbage);
    }

    fn on_row(&self, id: &str, container: &ContainerId) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let mut st = state.lock();
        if st.is_detached() {
            return;
        }
        if st.rows.get(id).map(|b| &b.container) != Some(container) {
            return;
        }
        if st.pending_add.remove(id) {
            st.record(id, Pending::Add);
        } else {
            st.record(id, Pending::Update);
        }
    }

    fn flush<F>(&self, info: &TransactionInfo, callback: &F)
    where
        F: Fn(&BTreeMap<String, RowChange>, &TransactionInfo),
    {
        let Some((table, state)) = self.upgrade() else {
            return;
        };
        let buffer = {
            let mut st = state.lock();
            if st.is_detached() {
                return;
            }
            std::mem::take(&mut st.buffer)
        };
        if buffer.is_empty() {
            return;
        }

        let changes: BTreeMap<String, RowChange> = buffer
            .into_iter()
            .map(|(id, pending)| {
                let change = match pending {
                    Pending::Add => RowChange::Add(table.read(&id)),
                    Pending::Update => RowChange::Update(table.read(&id)),
                    Pending::Delete => RowChange::Delete,
                };
                (id, change)
            })
            .collect();

        if state.lock().is_detached() {
            return;
        }
        callback(&changes, info);
    }
}
