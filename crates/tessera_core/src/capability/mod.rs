//! Pluggable behaviours attached to a workspace document.
//!
//! A capability receives a [`CapabilityContext`] when the workspace is built
//! and returns a handle that lives as long as the workspace. Capabilities
//! never call each other: they coordinate only through the document's
//! transactions and notifications.
//!
//! Three capabilities ship with the crate:
//!
//! - [`SnapshotPersistence`]: binary snapshot per workspace epoch plus
//!   human-readable schema and settings mirrors.
//! - [`BroadcastSync`]: in-process replica sync over a broadcast channel.
//! - [`MirrorCapability`]: debounced relational mirror of every valid row.

mod broadcast;
mod mirror;
mod persistence;

pub use broadcast::{BroadcastHub, BroadcastHandle, BroadcastSync, SyncMessage};
pub use mirror::{
    MemoryMirror, MirrorCapability, MirrorError, MirrorHandle, MirrorResult, MirrorStore,
    MirrorTable, MIRROR_ORIGIN,
};
#[cfg(feature = "sqlite")]
pub use mirror::SqliteMirror;
pub use persistence::{PersistenceHandle, SnapshotPersistence, PERSISTENCE_ORIGIN};

use crate::error::CoreResult;
use crate::kv::Kv;
use crate::table::Tables;
use crate::workspace::WorkspaceDefinition;
use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tessera_doc::Doc;

/// Boxed future returned by capability hooks.
pub type CapabilityFuture<T> = Pin<Box<dyn Future<Output = CoreResult<T>> + Send + 'static>>;

/// What a capability can reach: the workspace identity, its document, and
/// the table and KV engines bound to that document.
#[derive(Clone, Debug)]
pub struct CapabilityContext {
    /// Workspace id.
    pub id: String,
    /// The workspace document.
    pub document: Doc,
    /// Declared tables.
    pub tables: Tables,
    /// Settings store.
    pub kv: Kv,
    /// Full workspace declaration.
    pub definition: Arc<WorkspaceDefinition>,
}

/// A behaviour that can be attached to a workspace.
pub trait Capability: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Attaches to a freshly built workspace.
    ///
    /// Capabilities of one workspace attach concurrently. A failure aborts
    /// the build.
    fn attach(&self, ctx: CapabilityContext) -> CapabilityFuture<Box<dyn CapabilityHandle>>;
}

/// A live, attached capability.
pub trait CapabilityHandle: Send + Sync {
    /// Name of the capability that produced this handle.
    fn name(&self) -> &str;

    /// Access to the concrete handle type.
    fn as_any(&self) -> &dyn Any;

    /// Tears the capability down. Runs before the document is disposed.
    fn destroy(self: Box<Self>) -> CapabilityFuture<()>;
}

impl std::fmt::Debug for dyn CapabilityHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityHandle")
            .field("name", &self.name())
            .finish()
    }
}
