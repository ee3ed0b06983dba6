//! The replicated document and its transactions.

use crate::error::{DocError, DocResult};
use crate::event::{ContainerEvent, EntryChange, MapEvent, Origin, SeqEvent, TransactionInfo};
use crate::id::{ClientId, ContainerId, ContainerKind, OpId};
use crate::observer::{
    AfterTransactionCallback, ContainerCallback, Observer, Observers, Subscription, UpdateCallback,
};
use crate::op::{decode_ops, encode_ops, NewContent, Op, OpKind, MAX_LAMPORT};
use crate::state_vector::StateVector;
use crate::store::{Container, Content, Store};
use crate::types::{MapRef, SeqRef};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Weak};
use tessera_codec::{to_canonical_cbor, Value};
use tracing::{debug, warn};

/// A replicated document: named root containers holding nested last-writer-wins
/// maps and stamp-ordered sequences.
///
/// Cloning a `Doc` yields another handle to the same document.
///
/// ## Transactions
///
/// Every mutation happens inside [`Doc::transact`]. The document lock is held
/// for the whole transaction and for the observer dispatch that follows, so
/// there is one writer at a time. Nested `transact` calls on the same thread
/// join the outermost transaction; observers fire once, after it commits.
///
/// ## Replication
///
/// Each committed transaction produces an update (the CBOR-encoded list of its
/// operations). Updates are idempotent and commutative: applying the same set
/// of updates in any order on any replica yields the same state.
#[derive(Clone)]
pub struct Doc {
    inner: Arc<DocInner>,
}

/// Non-owning handle to a [`Doc`], for callbacks registered on the document
/// itself.
#[derive(Clone)]
pub struct WeakDoc {
    inner: Weak<DocInner>,
}

impl WeakDoc {
    /// Returns the document if it is still alive.
    pub fn upgrade(&self) -> Option<Doc> {
        self.inner.upgrade().map(|inner| Doc { inner })
    }
}

impl std::fmt::Debug for WeakDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakDoc").finish_non_exhaustive()
    }
}

pub(crate) struct DocInner {
    state: ReentrantMutex<RefCell<DocState>>,
}

impl DocInner {
    pub(crate) fn remove_observer(&self, id: u64) -> Option<Observer> {
        let guard = self.state.lock();
        let mut st = guard.borrow_mut();
        st.observers.remove(id)
    }
}

pub(crate) struct DocState {
    client: ClientId,
    lamport: u64,
    /// Bumped on every change to any container.
    version: u64,
    containers: HashMap<ContainerId, Container>,
    state_vector: StateVector,
    /// Every integrated operation, in integration order.
    log: Vec<Op>,
    /// Remote operations waiting for their dependencies.
    pending: Vec<Op>,
    txn: Option<TxnState>,
    observers: Observers,
    commits: u64,
}

struct TxnState {
    origin: Origin,
    ops: Vec<Op>,
    /// Map content at the first touch of each key in this transaction.
    map_before: BTreeMap<ContainerId, BTreeMap<String, Option<Content>>>,
    seq_added: BTreeMap<ContainerId, Vec<OpId>>,
    seq_removed: BTreeMap<ContainerId, Vec<(OpId, Value)>>,
}

impl TxnState {
    fn new(origin: Origin) -> Self {
        Self {
            origin,
            ops: Vec::new(),
            map_before: BTreeMap::new(),
            seq_added: BTreeMap::new(),
            seq_removed: BTreeMap::new(),
        }
    }
}

/// Everything needed to notify observers once the state borrow is released.
struct Dispatch {
    info: TransactionInfo,
    events: Vec<(ContainerEvent, Vec<(u64, ContainerCallback)>)>,
    after: Vec<(u64, AfterTransactionCallback)>,
    update: Option<(Vec<u8>, Vec<(u64, UpdateCallback)>)>,
}

/// Clears the open transaction if the closure unwinds.
struct TxnScope<'a> {
    state: &'a RefCell<DocState>,
}

impl Drop for TxnScope<'_> {
    fn drop(&mut self) {
        if let Ok(mut st) = self.state.try_borrow_mut() {
            st.txn = None;
        }
    }
}

/// Handle to the open transaction, passed to the closure given to
/// [`Doc::transact`].
pub struct Txn<'doc> {
    doc: &'doc Doc,
    origin: Origin,
}

impl<'doc> Txn<'doc> {
    /// Document this transaction mutates.
    pub fn doc(&self) -> &'doc Doc {
        self.doc
    }

    /// Origin of the outermost transaction.
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub(crate) fn apply_local(&self, target: &ContainerId, kind: OpKind) -> DocResult<OpId> {
        self.doc.with_state_mut(|st| st.local_op(target, kind))
    }
}

impl Doc {
    /// Creates an empty document with a random client ID.
    pub fn new() -> Self {
        Self::with_client_id(ClientId::random())
    }

    /// Creates an empty document with the given client ID.
    ///
    /// Two live replicas must never share a client ID.
    pub fn with_client_id(client: ClientId) -> Self {
        let state = DocState {
            client,
            lamport: 0,
            version: 0,
            containers: HashMap::new(),
            state_vector: StateVector::new(),
            log: Vec::new(),
            pending: Vec::new(),
            txn: None,
            observers: Observers::default(),
            commits: 0,
        };
        Self {
            inner: Arc::new(DocInner {
                state: ReentrantMutex::new(RefCell::new(state)),
            }),
        }
    }

    /// Returns this replica's client ID.
    pub fn client_id(&self) -> ClientId {
        self.with_state(|st| st.client)
    }

    /// Returns a non-owning handle to this document.
    pub fn downgrade(&self) -> WeakDoc {
        WeakDoc {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Returns true if both handles refer to the same document.
    pub fn ptr_eq(&self, other: &Doc) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Runs `f` in a local transaction.
    pub fn transact<R>(&self, f: impl FnOnce(&Txn<'_>) -> R) -> R {
        self.transact_with(Origin::Local, f)
    }

    /// Runs `f` in a transaction with the given origin.
    ///
    /// If a transaction is already open on this thread, `f` joins it and the
    /// outer origin is kept.
    pub fn transact_with<R>(&self, origin: Origin, f: impl FnOnce(&Txn<'_>) -> R) -> R {
        let guard = self.inner.state.lock();

        let outer_origin = {
            let mut st = guard.borrow_mut();
            match &st.txn {
                Some(open) => Some(open.origin.clone()),
                None => {
                    st.txn = Some(TxnState::new(origin.clone()));
                    None
                }
            }
        };

        if let Some(outer) = outer_origin {
            return f(&Txn {
                doc: self,
                origin: outer,
            });
        }

        let scope = TxnScope { state: &*guard };
        let result = f(&Txn { doc: self, origin });

        let txn = guard.borrow_mut().txn.take();
        let dispatch = txn.map(|txn| guard.borrow_mut().commit(txn));
        drop(scope);

        if let Some(dispatch) = dispatch {
            self.dispatch(dispatch);
        }
        result
    }

    /// Returns the root map with the given name, creating it locally if needed.
    ///
    /// Roots exist implicitly on every replica, so creating one produces no
    /// operation.
    pub fn get_or_insert_map(&self, name: &str) -> DocResult<MapRef> {
        self.root(name, ContainerKind::Map).map(MapRef::new)
    }

    /// Returns the root sequence with the given name, creating it locally if
    /// needed.
    pub fn get_or_insert_seq(&self, name: &str) -> DocResult<SeqRef> {
        self.root(name, ContainerKind::Seq).map(SeqRef::new)
    }

    fn root(&self, name: &str, kind: ContainerKind) -> DocResult<ContainerId> {
        let id = ContainerId::root(name);
        self.with_state_mut(|st| {
            let container = st
                .containers
                .entry(id.clone())
                .or_insert_with(|| Container::new(kind));
            if container.kind() != kind {
                return Err(DocError::KindMismatch {
                    container: id.clone(),
                    expected: kind,
                    actual: container.kind(),
                });
            }
            Ok(id.clone())
        })
    }

    /// Registers a callback for changes to one container.
    pub fn observe<F>(&self, container: &ContainerId, f: F) -> Subscription
    where
        F: Fn(&TransactionInfo, &ContainerEvent) + Send + Sync + 'static,
    {
        self.register(Observer::Container {
            container: container.clone(),
            callback: Arc::new(f),
        })
    }

    /// Registers a callback that fires once per committed transaction, after
    /// every container observer.
    pub fn observe_after_transaction<F>(&self, f: F) -> Subscription
    where
        F: Fn(&TransactionInfo) + Send + Sync + 'static,
    {
        self.register(Observer::AfterTransaction(Arc::new(f)))
    }

    /// Registers a callback receiving the encoded update of every transaction
    /// that integrated at least one operation.
    pub fn observe_update<F>(&self, f: F) -> Subscription
    where
        F: Fn(&TransactionInfo, &[u8]) + Send + Sync + 'static,
    {
        self.register(Observer::Update(Arc::new(f)))
    }

    fn register(&self, observer: Observer) -> Subscription {
        let id = self.with_state_mut(|st| st.observers.register(observer));
        Subscription::new(Arc::downgrade(&self.inner), id)
    }

    /// Returns what this replica has integrated.
    pub fn state_vector(&self) -> StateVector {
        self.with_state(|st| st.state_vector.clone())
    }

    /// Returns the encoded state vector.
    pub fn encode_state_vector(&self) -> DocResult<Vec<u8>> {
        self.state_vector().encode()
    }

    /// Encodes every operation not covered by `since` (all of them if `None`).
    ///
    /// Operations still waiting for dependencies are included, so a peer can
    /// complete them if it holds what is missing.
    pub fn encode_state_as_update(&self, since: Option<&StateVector>) -> DocResult<Vec<u8>> {
        self.with_state(|st| {
            let missing = |op: &&Op| since.map_or(true, |sv| !sv.contains(op.id));
            encode_ops(
                st.log
                    .iter()
                    .filter(missing)
                    .chain(st.pending.iter().filter(missing)),
            )
        })
    }

    /// Applies an update produced by another replica.
    ///
    /// Already integrated operations are skipped. Operations whose
    /// dependencies are missing wait in a pending queue and integrate as soon
    /// as a later update supplies them.
    pub fn apply_update(&self, update: &[u8], origin: Origin) -> DocResult<()> {
        let ops = decode_ops(update)?;
        self.transact_with(origin, |txn| {
            txn.doc.with_state_mut(|st| st.integrate_remote(ops))
        })
    }

    /// Number of remote operations waiting for their dependencies.
    pub fn pending_len(&self) -> usize {
        self.with_state(|st| st.pending.len())
    }

    /// Drops every observer registered on this document.
    pub fn dispose(&self) {
        let removed = self.with_state_mut(|st| st.observers.take_all());
        drop(removed);
    }

    fn with_state<R>(&self, f: impl FnOnce(&DocState) -> R) -> R {
        let guard = self.inner.state.lock();
        let st = guard.borrow();
        f(&st)
    }

    fn with_state_mut<R>(&self, f: impl FnOnce(&mut DocState) -> R) -> R {
        let guard = self.inner.state.lock();
        let mut st = guard.borrow_mut();
        f(&mut st)
    }

    pub(crate) fn with_container<R>(
        &self,
        id: &ContainerId,
        f: impl FnOnce(Option<&Container>) -> R,
    ) -> R {
        self.with_state(|st| f(st.containers.get(id)))
    }

    fn is_live(&self, observer: u64) -> bool {
        self.with_state(|st| st.observers.is_live(observer))
    }

    fn dispatch(&self, dispatch: Dispatch) {
        let Dispatch {
            info,
            events,
            after,
            update,
        } = dispatch;

        for (event, callbacks) in events {
            for (id, callback) in callbacks {
                if self.is_live(id) {
                    callback(&info, &event);
                }
            }
        }
        for (id, callback) in after {
            if self.is_live(id) {
                callback(&info);
            }
        }
        if let Some((bytes, callbacks)) = update {
            for (id, callback) in callbacks {
                if self.is_live(id) {
                    callback(&info, &bytes);
                }
            }
        }
    }
}

impl Default for Doc {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Doc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Doc")
            .field("client", &self.client_id())
            .finish_non_exhaustive()
    }
}

impl DocState {
    fn local_op(&mut self, target: &ContainerId, kind: OpKind) -> DocResult<OpId> {
        let actual = self
            .containers
            .get(target)
            .map(Container::kind)
            .ok_or_else(|| DocError::UnknownContainer {
                container: target.clone(),
            })?;
        let expected = kind.target_kind();
        if actual != expected {
            return Err(DocError::KindMismatch {
                container: target.clone(),
                expected,
                actual,
            });
        }
        match &kind {
            OpKind::MapSet {
                content: NewContent::Value(v),
                ..
            }
            | OpKind::SeqPush { value: v } => {
                to_canonical_cbor(v)?;
            }
            _ => {}
        }

        let lamport = self
            .lamport
            .checked_add(1)
            .filter(|l| *l <= MAX_LAMPORT)
            .ok_or(DocError::ClockExhausted)?;
        let mut txn = self.txn.take().ok_or(DocError::TransactionClosed)?;
        let id = OpId::new(self.client, self.state_vector.get(self.client));
        let op = Op {
            id,
            lamport,
            target: target.clone(),
            kind,
        };
        self.integrate(&mut txn, op);
        self.txn = Some(txn);
        Ok(id)
    }

    fn integrate_remote(&mut self, ops: Vec<Op>) -> DocResult<()> {
        let mut txn = self.txn.take().ok_or(DocError::TransactionClosed)?;

        let state_vector = &self.state_vector;
        self.pending
            .extend(ops.into_iter().filter(|op| !state_vector.contains(op.id)));

        loop {
            self.pending.sort_by_key(|op| op.id);
            self.pending.dedup_by_key(|op| op.id);

            let mut progressed = false;
            for op in std::mem::take(&mut self.pending) {
                if self.state_vector.contains(op.id) {
                    continue;
                }
                let next = self.state_vector.get(op.id.client);
                if op.id.seq == next && self.target_ready(&op.target) {
                    self.integrate(&mut txn, op);
                    progressed = true;
                } else {
                    self.pending.push(op);
                }
            }
            if !progressed {
                break;
            }
        }

        if !self.pending.is_empty() {
            debug!(
                pending = self.pending.len(),
                "operations waiting for dependencies"
            );
        }
        self.txn = Some(txn);
        Ok(())
    }

    fn target_ready(&self, target: &ContainerId) -> bool {
        match target {
            ContainerId::Root(_) => true,
            ContainerId::Op(_) => self.containers.contains_key(target),
        }
    }

    fn integrate(&mut self, txn: &mut TxnState, op: Op) {
        self.lamport = self.lamport.max(op.lamport);
        self.state_vector.set(op.id.client, op.id.seq + 1);
        self.version += 1;
        let version = self.version;
        let stamp = op.stamp();

        if let OpKind::MapSet {
            content: NewContent::Container(kind),
            ..
        } = &op.kind
        {
            // Created even if the write loses, so later operations addressed
            // to it still have a target.
            self.containers
                .entry(ContainerId::Op(op.id))
                .or_insert_with(|| Container::new(*kind));
        }

        let container = self
            .containers
            .entry(op.target.clone())
            .or_insert_with(|| Container::new(op.kind.target_kind()));

        match (&mut container.store, &op.kind) {
            (Store::Map(map), OpKind::MapSet { key, content }) => {
                let content = match content {
                    NewContent::Value(v) => Content::Value(v.clone()),
                    NewContent::Container(ContainerKind::Map) => {
                        Content::Map(ContainerId::Op(op.id))
                    }
                    NewContent::Container(ContainerKind::Seq) => {
                        Content::Seq(ContainerId::Op(op.id))
                    }
                };
                txn.map_before
                    .entry(op.target.clone())
                    .or_default()
                    .entry(key.clone())
                    .or_insert_with(|| map.get(key).cloned());
                if map.apply(key, stamp, Some(content)) {
                    container.version = version;
                }
            }
            (Store::Map(map), OpKind::MapRemove { key }) => {
                txn.map_before
                    .entry(op.target.clone())
                    .or_default()
                    .entry(key.clone())
                    .or_insert_with(|| map.get(key).cloned());
                if map.apply(key, stamp, None) {
                    container.version = version;
                }
            }
            (Store::Seq(seq), OpKind::SeqPush { value }) => {
                if seq.insert(op.id, stamp, value.clone()) {
                    txn.seq_added
                        .entry(op.target.clone())
                        .or_default()
                        .push(op.id);
                    container.version = version;
                }
            }
            (Store::Seq(seq), OpKind::SeqRemove { element }) => {
                if let Some(value) = seq.remove(*element) {
                    txn.seq_removed
                        .entry(op.target.clone())
                        .or_default()
                        .push((*element, value));
                    container.version = version;
                }
            }
            (store, kind) => {
                let actual = match store {
                    Store::Map(_) => ContainerKind::Map,
                    Store::Seq(_) => ContainerKind::Seq,
                };
                warn!(
                    op = %op.id,
                    container = %op.target,
                    expected = ?kind.target_kind(),
                    ?actual,
                    "operation targets a container of another kind, ignored"
                );
            }
        }

        self.log.push(op.clone());
        txn.ops.push(op);
    }

    fn commit(&mut self, txn: TxnState) -> Dispatch {
        self.commits += 1;
        let info = TransactionInfo {
            origin: txn.origin.clone(),
            sequence: self.commits,
        };

        let mut events: BTreeMap<ContainerId, ContainerEvent> = BTreeMap::new();

        for (container, keys) in &txn.map_before {
            let Some(map) = self.containers.get(container).and_then(Container::as_map) else {
                continue;
            };
            let changes: BTreeMap<String, EntryChange> = keys
                .iter()
                .filter_map(|(key, before)| {
                    let change = match (before.clone(), map.get(key).cloned()) {
                        (None, Some(new)) => EntryChange::Inserted(new),
                        (Some(old), None) => EntryChange::Removed(old),
                        (Some(old), Some(new)) if old != new => EntryChange::Updated { old, new },
                        _ => return None,
                    };
                    Some((key.clone(), change))
                })
                .collect();
            if !changes.is_empty() {
                events.insert(
                    container.clone(),
                    ContainerEvent::Map(MapEvent {
                        container: container.clone(),
                        keys: changes,
                    }),
                );
            }
        }

        let seq_containers: HashSet<&ContainerId> = txn
            .seq_added
            .keys()
            .chain(txn.seq_removed.keys())
            .collect();
        for container in seq_containers {
            let Some(seq) = self.containers.get(container).and_then(Container::as_seq) else {
                continue;
            };
            let added_ids: HashSet<OpId> = txn
                .seq_added
                .get(container)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default();
            let added: Vec<(OpId, Value)> = seq
                .iter()
                .filter(|(id, _)| added_ids.contains(id))
                .map(|(id, v)| (id, v.clone()))
                .collect();
            let removed: Vec<(OpId, Value)> = txn
                .seq_removed
                .get(container)
                .map(|r| {
                    r.iter()
                        .filter(|(id, _)| !added_ids.contains(id))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            if !added.is_empty() || !removed.is_empty() {
                events.insert(
                    container.clone(),
                    ContainerEvent::Seq(SeqEvent {
                        container: container.clone(),
                        added,
                        removed,
                    }),
                );
            }
        }

        let events = events
            .into_iter()
            .map(|(container, event)| {
                let callbacks = self.observers.container(&container);
                (event, callbacks)
            })
            .filter(|(_, callbacks)| !callbacks.is_empty())
            .collect();

        let update = if !txn.ops.is_empty() && self.observers.has_update_observers() {
            match encode_ops(&txn.ops) {
                Ok(bytes) => Some((bytes, self.observers.update())),
                Err(error) => {
                    warn!(%error, "failed to encode transaction update");
                    None
                }
            }
        } else {
            None
        };

        Dispatch {
            info,
            events,
            after: self.observers.after_transaction(),
            update,
        }
    }
}
