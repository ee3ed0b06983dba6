//! In-process replica sync over a broadcast channel.
//!
//! Every replica attached to one [`BroadcastHub`] shares a single
//! `tokio::sync::broadcast` channel. Local updates fan out to every other
//! replica of the same workspace; a state-vector handshake on attach lets a
//! late joiner catch up and hand its own history to the others.

use super::{Capability, CapabilityContext, CapabilityFuture, CapabilityHandle};
use crate::error::CoreResult;
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tessera_doc::{Doc, Origin, StateVector, Subscription};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Message exchanged between replicas.
#[derive(Debug, Clone)]
pub enum SyncMessage {
    /// Operations produced locally by `from`.
    Update {
        /// Sending replica.
        from: Uuid,
        /// Workspace the operations belong to.
        workspace: String,
        /// Encoded update.
        update: Arc<[u8]>,
    },
    /// Handshake: what `from` already holds.
    Hello {
        /// Sending replica.
        from: Uuid,
        /// Workspace being synced.
        workspace: String,
        /// Encoded state vector of the sender.
        state_vector: Arc<[u8]>,
        /// Whether receivers should answer with their own state vector.
        answer: bool,
    },
    /// Answer to a [`SyncMessage::Hello`]: what `to` is missing.
    Reply {
        /// Sending replica.
        from: Uuid,
        /// Replica that said hello.
        to: Uuid,
        /// Workspace being synced.
        workspace: String,
        /// Encoded update.
        update: Arc<[u8]>,
    },
}

impl SyncMessage {
    fn sender(&self) -> Uuid {
        match self {
            SyncMessage::Update { from, .. }
            | SyncMessage::Hello { from, .. }
            | SyncMessage::Reply { from, .. } => *from,
        }
    }

    fn workspace(&self) -> &str {
        match self {
            SyncMessage::Update { workspace, .. }
            | SyncMessage::Hello { workspace, .. }
            | SyncMessage::Reply { workspace, .. } => workspace,
        }
    }
}

/// Shared channel connecting replicas in one process.
///
/// `capacity` bounds how many messages a slow replica may fall behind
/// before it lags; a lagging replica recovers with a fresh handshake.
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    sender: broadcast::Sender<SyncMessage>,
}

impl BroadcastHub {
    /// Creates a hub buffering up to `capacity` messages per replica.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns a capability that joins this hub.
    pub fn sync(&self) -> BroadcastSync {
        BroadcastSync {
            sender: self.sender.clone(),
        }
    }

    /// Raw receiver, e.g. to watch traffic in tests.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncMessage> {
        self.sender.subscribe()
    }

    /// Number of replicas currently listening.
    pub fn replicas(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Capability joining a workspace to a [`BroadcastHub`].
#[derive(Debug, Clone)]
pub struct BroadcastSync {
    sender: broadcast::Sender<SyncMessage>,
}

impl Capability for BroadcastSync {
    fn name(&self) -> &str {
        "broadcast"
    }

    fn attach(&self, ctx: CapabilityContext) -> CapabilityFuture<Box<dyn CapabilityHandle>> {
        let sender = self.sender.clone();
        Box::pin(async move {
            let handle = BroadcastHandle::start(sender, ctx)?;
            Ok(Box::new(handle) as Box<dyn CapabilityHandle>)
        })
    }
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    applied: AtomicU64,
}

struct Peer {
    id: Uuid,
    workspace: String,
    doc: Doc,
    sender: broadcast::Sender<SyncMessage>,
    counters: Counters,
}

impl Peer {
    fn send(&self, message: SyncMessage) {
        // No receivers is not an error: the replica is simply alone.
        self.sender.send(message).unwrap_or(0);
        self.counters.sent.fetch_add(1, Ordering::Relaxed);
    }

    fn hello(&self, answer: bool) -> CoreResult<()> {
        let state_vector = self.doc.encode_state_vector()?;
        self.send(SyncMessage::Hello {
            from: self.id,
            workspace: self.workspace.clone(),
            state_vector: state_vector.into(),
            answer,
        });
        Ok(())
    }

    fn apply(&self, update: &[u8]) {
        match self.doc.apply_update(update, Origin::Remote) {
            Ok(()) => {
                self.counters.applied.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                warn!(workspace = %self.workspace, peer = %self.id, %error, "dropping malformed update");
            }
        }
    }

    fn handle(&self, message: SyncMessage) -> CoreResult<()> {
        if message.sender() == self.id || message.workspace() != self.workspace {
            return Ok(());
        }
        match message {
            SyncMessage::Update { update, .. } => self.apply(&update),
            SyncMessage::Reply { to, update, .. } => {
                if to == self.id {
                    self.apply(&update);
                }
            }
            SyncMessage::Hello {
                from,
                state_vector,
                answer,
                ..
            } => {
                let theirs = StateVector::decode(&state_vector)?;
                let update = self.doc.encode_state_as_update(Some(&theirs))?;
                debug!(workspace = %self.workspace, peer = %self.id, to = %from, bytes = update.len(), "answering hello");
                self.send(SyncMessage::Reply {
                    from: self.id,
                    to: from,
                    workspace: self.workspace.clone(),
                    update: update.into(),
                });
                if answer {
                    self.hello(false)?;
                }
            }
        }
        Ok(())
    }
}

/// Live broadcast sync of one workspace.
pub struct BroadcastHandle {
    peer: Arc<Peer>,
    subscription: Option<Subscription>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl BroadcastHandle {
    fn start(sender: broadcast::Sender<SyncMessage>, ctx: CapabilityContext) -> CoreResult<Self> {
        let peer = Arc::new(Peer {
            id: Uuid::new_v4(),
            workspace: ctx.id.clone(),
            doc: ctx.document.clone(),
            sender,
            counters: Counters::default(),
        });

        let mut receiver = peer.sender.subscribe();

        // Everything not received from a peer is forwarded, including
        // capability write-backs.
        let subscription = {
            let peer = peer.clone();
            ctx.document.observe_update(move |info, update| {
                if info.origin != Origin::Remote {
                    peer.send(SyncMessage::Update {
                        from: peer.id,
                        workspace: peer.workspace.clone(),
                        update: update.into(),
                    });
                }
            })
        };

        let (shutdown, mut stop) = oneshot::channel();
        let task = {
            let peer = peer.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        received = receiver.recv() => match received {
                            Ok(message) => {
                                if let Err(error) = peer.handle(message) {
                                    warn!(workspace = %peer.workspace, peer = %peer.id, %error, "sync message rejected");
                                }
                            }
                            Err(RecvError::Lagged(skipped)) => {
                                warn!(workspace = %peer.workspace, peer = %peer.id, skipped, "replica lagged, resyncing");
                                if let Err(error) = peer.hello(true) {
                                    warn!(workspace = %peer.workspace, %error, "resync failed");
                                }
                            }
                            Err(RecvError::Closed) => break,
                        },
                        _ = &mut stop => break,
                    }
                }
            })
        };

        peer.hello(true)?;
        info!(workspace = %peer.workspace, peer = %peer.id, "broadcast sync attached");

        Ok(Self {
            peer,
            subscription: Some(subscription),
            shutdown: Some(shutdown),
            task: Some(task),
        })
    }

    /// Id of this replica on the hub.
    pub fn peer_id(&self) -> Uuid {
        self.peer.id
    }

    /// Messages sent so far.
    pub fn sent(&self) -> u64 {
        self.peer.counters.sent.load(Ordering::Relaxed)
    }

    /// Updates applied from other replicas so far.
    pub fn applied(&self) -> u64 {
        self.peer.counters.applied.load(Ordering::Relaxed)
    }
}

impl CapabilityHandle for BroadcastHandle {
    fn name(&self) -> &str {
        "broadcast"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn destroy(mut self: Box<Self>) -> CapabilityFuture<()> {
        Box::pin(async move {
            drop(self.subscription.take());
            if let Some(shutdown) = self.shutdown.take() {
                let _ = shutdown.send(());
            }
            if let Some(task) = self.task.take() {
                let _ = task.await;
            }
            debug!(workspace = %self.peer.workspace, peer = %self.peer.id, "broadcast sync detached");
            Ok(())
        })
    }
}
